// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Aggregation of CPUID leaves and probed MSRs into a dense feature set.
//!
//! [`CpuFeatures::build`] is a pure transform: same inputs, same output,
//! no I/O and no faults. It runs once at VM construction; everything on
//! the execution hot path reads the precomputed result.

use crate::cpuid::CpuidLeafSet;
use crate::msr::MsrRangeTable;
use crate::msr::MsrState;
use cpudefs::cpuid::CpuidFunction;
use cpudefs::cpuid::ExtendedAddressSpaceSizesEax;
use cpudefs::cpuid::ExtendedFeatureSubleaf0Ebx;
use cpudefs::cpuid::ExtendedFeatureSubleaf0Ecx;
use cpudefs::cpuid::ExtendedSvmVersionAndFeaturesEdx;
use cpudefs::cpuid::ExtendedVersionAndFeaturesEcx;
use cpudefs::cpuid::ExtendedVersionAndFeaturesEdx;
use cpudefs::cpuid::VersionAndFeaturesEcx;
use cpudefs::cpuid::VersionAndFeaturesEdx;
use cpudefs::identity::determine_microarch;
use cpudefs::identity::CpuVendor;
use cpudefs::identity::Microarch;
use cpudefs::vmx::PinBasedControls;
use cpudefs::vmx::ProcessorControls;
use cpudefs::vmx::SecondaryProcessorControls;
use cpudefs::X86X_AMD_VM_CR_SVMDIS;
use cpudefs::X86X_FEATURE_CONTROL_LOCKED;
use cpudefs::X86X_FEATURE_CONTROL_VMXON;

/// When no extended leaf reports address widths, legacy parts decode 32
/// bits of both.
const DEFAULT_ADDRESS_WIDTH: u8 = 32;

/// The legacy FXSAVE area size, reported when XSAVE is absent.
const FXSAVE_AREA_SIZE: u32 = 512;

/// Raw MSR values probed from the host or profile, consumed by
/// [`CpuFeatures::build`].
#[derive(Debug, Clone, Default)]
pub struct MsrProbe {
    /// `IA32_FEATURE_CONTROL`, when readable.
    pub feature_control: Option<u64>,
    /// The VMX capability MSRs, when the part reports VMX.
    pub vmx: Option<VmxCapabilityMsrs>,
    /// The AMD `VM_CR` MSR, when readable.
    pub vm_cr: Option<u64>,
}

impl MsrProbe {
    /// Probes the capability MSRs through an emulated range table, so VM
    /// construction feeds the aggregator with exactly the values the guest
    /// would read.
    pub fn from_table(table: &MsrRangeTable, state: &MsrState) -> Self {
        let read = |msr| table.read(msr, state).ok();
        let vmx = match (
            read(cpudefs::X86X_MSR_VMX_BASIC),
            read(cpudefs::X86X_MSR_VMX_PINBASED_CTLS),
            read(cpudefs::X86X_MSR_VMX_PROCBASED_CTLS),
            read(cpudefs::X86X_MSR_VMX_PROCBASED_CTLS2),
        ) {
            (Some(basic), Some(pin_ctls), Some(proc_ctls), Some(proc_ctls2)) => {
                Some(VmxCapabilityMsrs {
                    basic,
                    pin_ctls,
                    proc_ctls,
                    proc_ctls2,
                })
            }
            _ => None,
        };
        Self {
            feature_control: read(cpudefs::X86X_IA32_MSR_FEATURE_CONTROL),
            vmx,
            vm_cr: read(cpudefs::X86X_AMD_MSR_VM_CR),
        }
    }
}

/// The VMX capability MSR block. The low half of each control MSR is the
/// allowed-0 mask, the high half the allowed-1 mask.
#[derive(Debug, Copy, Clone, Default)]
pub struct VmxCapabilityMsrs {
    pub basic: u64,
    pub pin_ctls: u64,
    pub proc_ctls: u64,
    pub proc_ctls2: u64,
}

/// VMX execution capabilities.
///
/// Meaningful only when [`CpuFeatures::vmx`] is set; the contents are
/// undefined otherwise, not merely zero.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct VmxFeatures {
    pub ext_int_exit: bool,
    pub nmi_exit: bool,
    pub virtual_nmis: bool,
    pub preemption_timer: bool,
    pub hlt_exit: bool,
    pub cr3_load_exit: bool,
    pub cr3_store_exit: bool,
    pub tpr_shadow: bool,
    pub nmi_window_exit: bool,
    pub msr_bitmaps: bool,
    pub secondary_ctls: bool,
    pub ept: bool,
    pub vpid: bool,
    pub unrestricted_guest: bool,
}

/// SVM execution capabilities.
///
/// Meaningful only when [`CpuFeatures::svm`] is set; the contents are
/// undefined otherwise, not merely zero.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct SvmFeatures {
    pub rev: u8,
    pub nested_paging: bool,
    pub lbr_virt: bool,
    pub svm_lock: bool,
    pub nrip_save: bool,
    pub tsc_rate_msr: bool,
    pub vmcb_clean: bool,
    pub flush_by_asid: bool,
    pub decode_assists: bool,
    pub pause_filter: bool,
    pub pause_filter_threshold: bool,
}

/// The dense per-VM feature set, derived once at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuFeatures {
    pub vendor: CpuVendor,
    pub microarch: Microarch,
    pub family: u32,
    pub model: u32,
    pub stepping: u32,

    /// Physical address width, in bits.
    pub max_phys_addr_width: u8,
    /// Linear address width, in bits.
    pub max_linear_addr_width: u8,
    /// Size in bytes of the largest extended-state save area.
    pub max_ext_state_size: u32,

    // Leaf 1 edx.
    pub fpu: bool,
    pub tsc: bool,
    pub msr: bool,
    pub apic: bool,
    pub sep: bool,
    pub mtrr: bool,
    pub pge: bool,
    pub cmov: bool,
    pub pat: bool,
    pub clfsh: bool,
    pub mmx: bool,
    pub fxsr: bool,
    pub sse: bool,
    pub sse2: bool,
    pub htt: bool,

    // Leaf 1 ecx.
    pub sse3: bool,
    pub pclmulqdq: bool,
    pub monitor: bool,
    pub ssse3: bool,
    pub fma: bool,
    pub cx16: bool,
    pub pcid: bool,
    pub sse4_1: bool,
    pub sse4_2: bool,
    pub x2apic: bool,
    pub movbe: bool,
    pub popcnt: bool,
    pub tsc_deadline: bool,
    pub aes: bool,
    pub xsave: bool,
    pub avx: bool,
    pub f16c: bool,
    pub rdrand: bool,

    // Leaf 7 subleaf 0.
    pub fsgsbase: bool,
    pub bmi1: bool,
    pub hle: bool,
    pub avx2: bool,
    pub smep: bool,
    pub bmi2: bool,
    pub erms: bool,
    pub invpcid: bool,
    pub rtm: bool,
    pub rdseed: bool,
    pub adx: bool,
    pub smap: bool,
    pub clflushopt: bool,
    pub clwb: bool,
    pub umip: bool,
    pub rdpid: bool,

    // Extended leaf 0x80000001.
    pub lahf_sahf: bool,
    pub abm: bool,
    pub sse4a: bool,
    pub misalign_sse: bool,
    pub prefetch: bool,
    pub syscall: bool,
    pub nx: bool,
    pub amd_mmx: bool,
    pub ffxsr: bool,
    pub page_1gb: bool,
    pub rdtscp: bool,
    pub long_mode: bool,
    pub amd_3dnow: bool,
    pub amd_3dnow_ext: bool,

    /// FXSAVE/FXRSTOR leak the FPU pointer registers across tasks on the
    /// affected microarchitectures. Set from the quirk table, never from
    /// CPUID.
    pub leaky_fxsr: bool,

    /// Hardware virtualization (Intel). Gates [`Self::vmx_features`].
    pub vmx: bool,
    /// Hardware virtualization (AMD). Gates [`Self::svm_features`].
    pub svm: bool,
    /// Undefined unless [`Self::vmx`] is set.
    pub vmx_features: VmxFeatures,
    /// Undefined unless [`Self::svm`] is set.
    pub svm_features: SvmFeatures,
}

/// Microarchitectures with the leaky FXSAVE/FXRSTOR behavior. A fixed
/// list; no CPUID bit reports this.
const LEAKY_FXSR_MICROARCHS: &[Microarch] = &[
    Microarch::AMD_K7,
    Microarch::AMD_K8,
    Microarch::AMD_K10,
];

impl CpuFeatures {
    /// Aggregates the feature set for the given identity, CPUID table, and
    /// probed MSR values.
    pub fn build(
        vendor: CpuVendor,
        family: u32,
        model: u32,
        stepping: u32,
        leaves: &CpuidLeafSet,
        probe: &MsrProbe,
    ) -> Self {
        let microarch = determine_microarch(vendor, family, model, stepping);

        let leaf = |function: CpuidFunction, index: u32| -> [u32; 4] {
            leaves
                .get(function.0, index)
                .map(|x| x.result)
                .unwrap_or_default()
        };

        let std1 = leaf(CpuidFunction::VERSION_AND_FEATURES, 0);
        let ecx1 = VersionAndFeaturesEcx::from(std1[2]);
        let edx1 = VersionAndFeaturesEdx::from(std1[3]);

        let ext_features = leaf(CpuidFunction::EXTENDED_FEATURES, 0);
        let ebx7 = ExtendedFeatureSubleaf0Ebx::from(ext_features[1]);
        let ecx7 = ExtendedFeatureSubleaf0Ecx::from(ext_features[2]);

        let ext1 = leaf(CpuidFunction::EXTENDED_VERSION_AND_FEATURES, 0);
        let ext_ecx1 = ExtendedVersionAndFeaturesEcx::from(ext1[2]);
        let ext_edx1 = ExtendedVersionAndFeaturesEdx::from(ext1[3]);

        let (max_phys_addr_width, max_linear_addr_width) = {
            let sizes = leaf(CpuidFunction::EXTENDED_ADDRESS_SPACE_SIZES, 0);
            let eax = ExtendedAddressSpaceSizesEax::from(sizes[0]);
            if eax.physical_address_size() != 0 {
                (eax.physical_address_size(), eax.virtual_address_size())
            } else {
                (DEFAULT_ADDRESS_WIDTH, DEFAULT_ADDRESS_WIDTH)
            }
        };

        let max_ext_state_size = if ecx1.xsave() {
            let xstate = leaf(CpuidFunction::EXTENDED_STATE_ENUMERATION, 0);
            xstate[2]
        } else {
            FXSAVE_AREA_SIZE
        };

        // VMX requires the part to report it and firmware to have left it
        // enabled (or the lock bit clear, in which case the guest may still
        // enable it).
        let vmx = ecx1.vmx()
            && probe.vmx.is_some()
            && probe.feature_control.is_none_or(|fc| {
                fc & X86X_FEATURE_CONTROL_LOCKED == 0 || fc & X86X_FEATURE_CONTROL_VMXON != 0
            });
        let vmx_features = if vmx {
            build_vmx_features(&probe.vmx.unwrap_or_default())
        } else {
            VmxFeatures::default()
        };

        let svm = ext_ecx1.svm()
            && probe.vm_cr.is_none_or(|vm_cr| vm_cr & X86X_AMD_VM_CR_SVMDIS == 0);
        let svm_features = if svm {
            let svm_leaf = leaf(CpuidFunction::EXTENDED_SVM_VERSION_AND_FEATURES, 0);
            build_svm_features(svm_leaf)
        } else {
            SvmFeatures::default()
        };

        Self {
            vendor,
            microarch,
            family,
            model,
            stepping,
            max_phys_addr_width,
            max_linear_addr_width,
            max_ext_state_size,

            fpu: edx1.fpu(),
            tsc: edx1.tsc(),
            msr: edx1.msr(),
            apic: edx1.apic(),
            sep: edx1.sep(),
            mtrr: edx1.mtrr(),
            pge: edx1.pge(),
            cmov: edx1.cmov(),
            pat: edx1.pat(),
            clfsh: edx1.cl_fsh(),
            mmx: edx1.mmx(),
            fxsr: edx1.fxsr(),
            sse: edx1.sse(),
            sse2: edx1.sse2(),
            htt: edx1.mt_per_socket(),

            sse3: ecx1.sse3(),
            pclmulqdq: ecx1.pclmulqdq(),
            monitor: ecx1.monitor(),
            ssse3: ecx1.ssse3(),
            fma: ecx1.fma(),
            cx16: ecx1.cx16(),
            pcid: ecx1.pcid(),
            sse4_1: ecx1.sse4_1(),
            sse4_2: ecx1.sse4_2(),
            x2apic: ecx1.x2_apic(),
            movbe: ecx1.movbe(),
            popcnt: ecx1.pop_cnt(),
            tsc_deadline: ecx1.tsc_deadline_tmr(),
            aes: ecx1.aes(),
            xsave: ecx1.xsave(),
            avx: ecx1.avx(),
            f16c: ecx1.f16c(),
            rdrand: ecx1.rd_rand(),

            fsgsbase: ebx7.rd_wr_fs_gs(),
            bmi1: ebx7.bmi1(),
            hle: ebx7.hle(),
            avx2: ebx7.avx2(),
            smep: ebx7.smep(),
            bmi2: ebx7.bmi2(),
            erms: ebx7.enhanced_fast_string(),
            invpcid: ebx7.inv_pcid(),
            rtm: ebx7.rtm(),
            rdseed: ebx7.rd_seed(),
            adx: ebx7.adx(),
            smap: ebx7.smap(),
            clflushopt: ebx7.clflushopt(),
            clwb: ebx7.clwb(),
            umip: ecx7.umip(),
            rdpid: ecx7.rd_pid(),

            lahf_sahf: ext_ecx1.lahf_sahf_available(),
            abm: ext_ecx1.abm(),
            sse4a: ext_ecx1.sse4_a(),
            misalign_sse: ext_ecx1.mis_align_sse(),
            prefetch: ext_ecx1.prefetch(),
            syscall: ext_edx1.syscall(),
            nx: ext_edx1.no_execute(),
            amd_mmx: ext_edx1.amd_mmx(),
            ffxsr: ext_edx1.fast_fxsr(),
            page_1gb: ext_edx1.page_1gb(),
            rdtscp: ext_edx1.rdtscp(),
            long_mode: ext_edx1.long_mode(),
            amd_3dnow: ext_edx1.amd3d_now(),
            amd_3dnow_ext: ext_edx1.extended3d_now(),

            leaky_fxsr: LEAKY_FXSR_MICROARCHS.contains(&microarch),

            vmx,
            svm,
            vmx_features,
            svm_features,
        }
    }
}

fn build_vmx_features(msrs: &VmxCapabilityMsrs) -> VmxFeatures {
    // Allowed-1 bits live in the high half of each control MSR.
    let pin = PinBasedControls::from((msrs.pin_ctls >> 32) as u32);
    let proc = ProcessorControls::from((msrs.proc_ctls >> 32) as u32);
    let proc2 = SecondaryProcessorControls::from((msrs.proc_ctls2 >> 32) as u32);
    let secondary_ctls = proc.activate_secondary_controls();
    VmxFeatures {
        ext_int_exit: pin.external_interrupt_exiting(),
        nmi_exit: pin.nmi_exiting(),
        virtual_nmis: pin.virtual_nmis(),
        preemption_timer: pin.preemption_timer(),
        hlt_exit: proc.hlt_exiting(),
        cr3_load_exit: proc.cr3_load_exiting(),
        cr3_store_exit: proc.cr3_store_exiting(),
        tpr_shadow: proc.use_tpr_shadow(),
        nmi_window_exit: proc.nmi_window_exiting(),
        msr_bitmaps: proc.use_msr_bitmaps(),
        secondary_ctls,
        ept: secondary_ctls && proc2.enable_ept(),
        vpid: secondary_ctls && proc2.enable_vpid(),
        unrestricted_guest: secondary_ctls && proc2.unrestricted_guest(),
    }
}

fn build_svm_features(svm_leaf: [u32; 4]) -> SvmFeatures {
    let edx = ExtendedSvmVersionAndFeaturesEdx::from(svm_leaf[3]);
    SvmFeatures {
        rev: svm_leaf[0] as u8,
        nested_paging: edx.nested_paging(),
        lbr_virt: edx.lbr_virt(),
        svm_lock: edx.svm_lock(),
        nrip_save: edx.nrip_save(),
        tsc_rate_msr: edx.tsc_rate_msr(),
        vmcb_clean: edx.vmcb_clean(),
        flush_by_asid: edx.flush_by_asid(),
        decode_assists: edx.decode_assists(),
        pause_filter: edx.pause_filter(),
        pause_filter_threshold: edx.pause_filter_threshold(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpuid::CpuidLeaf;

    // A Skylake desktop part: family 6, model 94, stepping 3.
    fn skylake_leaves() -> CpuidLeafSet {
        CpuidLeafSet::new(vec![
            CpuidLeaf::new(0x0, [0x16, 0x756e6547, 0x6c65746e, 0x49656e69]),
            CpuidLeaf::new(0x1, [0x000506e3, 0x00100800, 0x7ffafbff, 0xbfebfbff]),
            CpuidLeaf::new(0x7, [0, 0x029c6fbf, 0, 0]).indexed(0),
            CpuidLeaf::new(0xd, [0x1f, 0x440, 0x440, 0]).masked_index(0, !0x7),
            CpuidLeaf::new(0x8000_0000, [0x8000_0008, 0, 0, 0]),
            CpuidLeaf::new(0x8000_0001, [0, 0, 0x121, 0x2c100800]),
            CpuidLeaf::new(0x8000_0008, [0x3027, 0, 0, 0]),
        ])
        .unwrap()
    }

    fn skylake_probe() -> MsrProbe {
        MsrProbe {
            feature_control: Some(0x5),
            vmx: Some(VmxCapabilityMsrs {
                basic: 0x00d8_1000_0000_0004,
                pin_ctls: 0x0000_00ff_0000_0016,
                proc_ctls: 0xfff9_fffe_0401_e172,
                proc_ctls2: 0x005f_1cff_0000_0000,
            }),
            vm_cr: None,
        }
    }

    #[test]
    fn test_skylake_golden() {
        let features = CpuFeatures::build(
            CpuVendor::Intel,
            6,
            94,
            3,
            &skylake_leaves(),
            &skylake_probe(),
        );
        assert_eq!(features.microarch, Microarch::INTEL_SKYLAKE);
        assert!(features.avx2);
        assert!(features.bmi1);
        assert!(features.long_mode);
        assert!(features.sse4_2);
        assert!(features.xsave);
        assert!(features.rdseed);
        assert!(features.syscall);
        assert!(features.nx);
        assert!(!features.sse4a);
        assert!(!features.svm);
        assert!(!features.leaky_fxsr);
        assert_eq!(features.max_phys_addr_width, 39);
        assert_eq!(features.max_linear_addr_width, 48);
        assert_eq!(features.max_ext_state_size, 0x440);
    }

    #[test]
    fn test_build_is_idempotent() {
        let leaves = skylake_leaves();
        let probe = skylake_probe();
        let a = CpuFeatures::build(CpuVendor::Intel, 6, 94, 3, &leaves, &probe);
        let b = CpuFeatures::build(CpuVendor::Intel, 6, 94, 3, &leaves, &probe);
        assert_eq!(a, b);
    }

    #[test]
    fn test_vmx_gated_on_feature_control() {
        let leaves = skylake_leaves();
        let mut probe = skylake_probe();
        let features = CpuFeatures::build(CpuVendor::Intel, 6, 94, 3, &leaves, &probe);
        assert!(features.vmx);
        assert!(features.vmx_features.virtual_nmis);
        assert!(features.vmx_features.ept);

        // Locked with VMXON disabled: firmware has switched VMX off.
        probe.feature_control = Some(X86X_FEATURE_CONTROL_LOCKED);
        let features = CpuFeatures::build(CpuVendor::Intel, 6, 94, 3, &leaves, &probe);
        assert!(!features.vmx);
    }

    #[test]
    fn test_leaky_fxsr_quirk_is_cpuid_independent() {
        // No CPUID bit drives the quirk, only the microarchitecture.
        let leaves = CpuidLeafSet::new(vec![CpuidLeaf::new(
            0x1,
            [0x00100f22, 0, 0, 0x078bfbff],
        )])
        .unwrap();
        let probe = MsrProbe::default();
        let k8 = CpuFeatures::build(CpuVendor::Amd, 0x0f, 0x22, 0, &leaves, &probe);
        assert_eq!(k8.microarch, Microarch::AMD_K8);
        assert!(k8.leaky_fxsr);
        let zen = CpuFeatures::build(CpuVendor::Amd, 0x17, 0x01, 0, &leaves, &probe);
        assert!(!zen.leaky_fxsr);
    }

    #[test]
    fn test_svm_disabled_by_vm_cr() {
        let leaves = CpuidLeafSet::new(vec![
            CpuidLeaf::new(0x8000_0001, [0, 0, 0x4, 0]),
            CpuidLeaf::new(0x8000_000A, [0x1, 0x8000, 0, 0x1005f]),
        ])
        .unwrap();
        let mut probe = MsrProbe::default();
        let features = CpuFeatures::build(CpuVendor::Amd, 0x17, 0x01, 0, &leaves, &probe);
        assert!(features.svm);
        assert!(features.svm_features.nested_paging);
        assert!(features.svm_features.nrip_save);

        probe.vm_cr = Some(X86X_AMD_VM_CR_SVMDIS);
        let features = CpuFeatures::build(CpuVendor::Amd, 0x17, 0x01, 0, &leaves, &probe);
        assert!(!features.svm);
    }
}
