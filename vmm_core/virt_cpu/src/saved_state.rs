// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Saved-state layouts.
//!
//! The save-state/migration layer persists these structures as opaque
//! versioned blobs. Their field order, bit assignments, and byte sizes are
//! normative: changing any of them breaks saved-state compatibility and
//! requires a version bump.

use crate::features::CpuFeatures;
use crate::features::SvmFeatures;
use crate::features::VmxFeatures;
use crate::inhibit::InterruptInhibit;
use crate::msr::MsrState;
use bitfield_struct::bitfield;
use cpudefs::identity::CpuVendor;
use cpudefs::identity::Microarch;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

/// Version of all layouts in this module.
pub const SAVED_STATE_VERSION: u32 = 1;

/// The packed inhibition flags.
#[bitfield(u32)]
#[derive(IntoBytes, Immutable, KnownLayout, FromBytes, PartialEq, Eq)]
pub struct SavedInhibitFlags {
    pub shadow_after_ss: bool,
    pub shadow_after_sti: bool,
    pub nmi_blocked: bool,
    pub global_inhibit: bool,
    #[bits(28)]
    _reserved: u32,
}

/// Interrupt-inhibition state: 16 bytes.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct SavedInhibit {
    pub flags: SavedInhibitFlags,
    pub reserved: u32,
    pub shadow_rip: u64,
}

const _: () = assert!(size_of::<SavedInhibit>() == 16);

impl SavedInhibit {
    /// Captures the runtime state.
    pub fn save(inhibit: &InterruptInhibit) -> Self {
        Self {
            flags: SavedInhibitFlags::new()
                .with_shadow_after_ss(inhibit.shadow_after_ss())
                .with_shadow_after_sti(inhibit.shadow_after_sti())
                .with_nmi_blocked(inhibit.raw_nmi_blocked())
                .with_global_inhibit(inhibit.global_inhibit()),
            reserved: 0,
            shadow_rip: inhibit.shadow_rip(),
        }
    }

    /// Rebuilds the runtime state.
    pub fn restore(&self) -> InterruptInhibit {
        InterruptInhibit::restore(
            self.flags.shadow_after_ss(),
            self.flags.shadow_after_sti(),
            self.flags.nmi_blocked(),
            self.flags.global_inhibit(),
            self.shadow_rip,
        )
    }
}

/// The mutable per-vCPU MSR values: 160 bytes, one u64 per field in the
/// order below.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct SavedMsrs {
    pub tsc: u64,
    pub tsc_offset: u64,
    pub apic_base: u64,
    pub efer: u64,
    pub pat: u64,
    pub sysenter_cs: u64,
    pub sysenter_esp: u64,
    pub sysenter_eip: u64,
    pub misc_enable: u64,
    pub mtrr_def_type: u64,
    pub star: u64,
    pub lstar: u64,
    pub cstar: u64,
    pub sfmask: u64,
    pub fs_base: u64,
    pub gs_base: u64,
    pub kernel_gs_base: u64,
    pub tsc_aux: u64,
    pub xss: u64,
    pub vm_hsave_pa: u64,
}

const _: () = assert!(size_of::<SavedMsrs>() == 160);

impl SavedMsrs {
    /// Captures the runtime state.
    pub fn save(state: &MsrState) -> Self {
        let MsrState {
            tsc,
            tsc_offset,
            apic_base,
            efer,
            pat,
            sysenter_cs,
            sysenter_esp,
            sysenter_eip,
            misc_enable,
            mtrr_def_type,
            star,
            lstar,
            cstar,
            sfmask,
            fs_base,
            gs_base,
            kernel_gs_base,
            tsc_aux,
            xss,
            vm_hsave_pa,
        } = *state;
        Self {
            tsc,
            tsc_offset,
            apic_base,
            efer,
            pat,
            sysenter_cs,
            sysenter_esp,
            sysenter_eip,
            misc_enable,
            mtrr_def_type,
            star,
            lstar,
            cstar,
            sfmask,
            fs_base,
            gs_base,
            kernel_gs_base,
            tsc_aux,
            xss,
            vm_hsave_pa,
        }
    }

    /// Rebuilds the runtime state.
    pub fn restore(&self) -> MsrState {
        let Self {
            tsc,
            tsc_offset,
            apic_base,
            efer,
            pat,
            sysenter_cs,
            sysenter_esp,
            sysenter_eip,
            misc_enable,
            mtrr_def_type,
            star,
            lstar,
            cstar,
            sfmask,
            fs_base,
            gs_base,
            kernel_gs_base,
            tsc_aux,
            xss,
            vm_hsave_pa,
        } = *self;
        MsrState {
            tsc,
            tsc_offset,
            apic_base,
            efer,
            pat,
            sysenter_cs,
            sysenter_esp,
            sysenter_eip,
            misc_enable,
            mtrr_def_type,
            star,
            lstar,
            cstar,
            sfmask,
            fs_base,
            gs_base,
            kernel_gs_base,
            tsc_aux,
            xss,
            vm_hsave_pa,
        }
    }
}

/// The aggregated feature set: 56 bytes. The flag words use the bit
/// assignments of [`pack`]/`unpack` call order below, which is normative.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct SavedCpuFeatures {
    pub vendor: u8,
    pub max_phys_addr_width: u8,
    pub max_linear_addr_width: u8,
    pub reserved: u8,
    pub microarch: u16,
    pub reserved2: u16,
    pub family: u32,
    pub model: u32,
    pub stepping: u32,
    pub max_ext_state_size: u32,
    pub basic_flags: u64,
    pub ext_flags: u64,
    pub vmx_flags: u64,
    pub svm_flags: u64,
}

const _: () = assert!(size_of::<SavedCpuFeatures>() == 56);

fn vendor_code(vendor: CpuVendor) -> u8 {
    match vendor {
        CpuVendor::Unknown => 0,
        CpuVendor::Intel => 1,
        CpuVendor::Amd => 2,
        CpuVendor::Via => 3,
        CpuVendor::Shanghai => 4,
        CpuVendor::Hygon => 5,
    }
}

fn vendor_from_code(code: u8) -> CpuVendor {
    match code {
        1 => CpuVendor::Intel,
        2 => CpuVendor::Amd,
        3 => CpuVendor::Via,
        4 => CpuVendor::Shanghai,
        5 => CpuVendor::Hygon,
        _ => CpuVendor::Unknown,
    }
}

fn pack(bits: &[bool]) -> u64 {
    bits.iter()
        .enumerate()
        .fold(0, |acc, (i, &b)| acc | ((b as u64) << i))
}

impl SavedCpuFeatures {
    /// Captures the runtime feature set.
    pub fn save(f: &CpuFeatures) -> Self {
        Self {
            vendor: vendor_code(f.vendor),
            max_phys_addr_width: f.max_phys_addr_width,
            max_linear_addr_width: f.max_linear_addr_width,
            reserved: 0,
            microarch: f.microarch.0,
            reserved2: 0,
            family: f.family,
            model: f.model,
            stepping: f.stepping,
            max_ext_state_size: f.max_ext_state_size,
            basic_flags: pack(&[
                f.fpu,
                f.tsc,
                f.msr,
                f.apic,
                f.sep,
                f.mtrr,
                f.pge,
                f.cmov,
                f.pat,
                f.clfsh,
                f.mmx,
                f.fxsr,
                f.sse,
                f.sse2,
                f.htt,
                f.sse3,
                f.pclmulqdq,
                f.monitor,
                f.ssse3,
                f.fma,
                f.cx16,
                f.pcid,
                f.sse4_1,
                f.sse4_2,
                f.x2apic,
                f.movbe,
                f.popcnt,
                f.tsc_deadline,
                f.aes,
                f.xsave,
                f.avx,
                f.f16c,
                f.rdrand,
                f.fsgsbase,
                f.bmi1,
                f.hle,
                f.avx2,
                f.smep,
                f.bmi2,
                f.erms,
                f.invpcid,
                f.rtm,
                f.rdseed,
                f.adx,
                f.smap,
                f.clflushopt,
                f.clwb,
                f.umip,
                f.rdpid,
            ]),
            ext_flags: pack(&[
                f.lahf_sahf,
                f.abm,
                f.sse4a,
                f.misalign_sse,
                f.prefetch,
                f.syscall,
                f.nx,
                f.amd_mmx,
                f.ffxsr,
                f.page_1gb,
                f.rdtscp,
                f.long_mode,
                f.amd_3dnow,
                f.amd_3dnow_ext,
                f.leaky_fxsr,
                f.vmx,
                f.svm,
            ]),
            vmx_flags: pack(&[
                f.vmx_features.ext_int_exit,
                f.vmx_features.nmi_exit,
                f.vmx_features.virtual_nmis,
                f.vmx_features.preemption_timer,
                f.vmx_features.hlt_exit,
                f.vmx_features.cr3_load_exit,
                f.vmx_features.cr3_store_exit,
                f.vmx_features.tpr_shadow,
                f.vmx_features.nmi_window_exit,
                f.vmx_features.msr_bitmaps,
                f.vmx_features.secondary_ctls,
                f.vmx_features.ept,
                f.vmx_features.vpid,
                f.vmx_features.unrestricted_guest,
            ]),
            svm_flags: (f.svm_features.rev as u64)
                | (pack(&[
                    f.svm_features.nested_paging,
                    f.svm_features.lbr_virt,
                    f.svm_features.svm_lock,
                    f.svm_features.nrip_save,
                    f.svm_features.tsc_rate_msr,
                    f.svm_features.vmcb_clean,
                    f.svm_features.flush_by_asid,
                    f.svm_features.decode_assists,
                    f.svm_features.pause_filter,
                    f.svm_features.pause_filter_threshold,
                ]) << 8),
        }
    }

    /// Rebuilds the runtime feature set.
    pub fn restore(&self) -> CpuFeatures {
        let basic = |i: u32| self.basic_flags & (1 << i) != 0;
        let ext = |i: u32| self.ext_flags & (1 << i) != 0;
        let vmxf = |i: u32| self.vmx_flags & (1 << i) != 0;
        let svmf = |i: u32| self.svm_flags & (1 << (i + 8)) != 0;
        CpuFeatures {
            vendor: vendor_from_code(self.vendor),
            microarch: Microarch(self.microarch),
            family: self.family,
            model: self.model,
            stepping: self.stepping,
            max_phys_addr_width: self.max_phys_addr_width,
            max_linear_addr_width: self.max_linear_addr_width,
            max_ext_state_size: self.max_ext_state_size,
            fpu: basic(0),
            tsc: basic(1),
            msr: basic(2),
            apic: basic(3),
            sep: basic(4),
            mtrr: basic(5),
            pge: basic(6),
            cmov: basic(7),
            pat: basic(8),
            clfsh: basic(9),
            mmx: basic(10),
            fxsr: basic(11),
            sse: basic(12),
            sse2: basic(13),
            htt: basic(14),
            sse3: basic(15),
            pclmulqdq: basic(16),
            monitor: basic(17),
            ssse3: basic(18),
            fma: basic(19),
            cx16: basic(20),
            pcid: basic(21),
            sse4_1: basic(22),
            sse4_2: basic(23),
            x2apic: basic(24),
            movbe: basic(25),
            popcnt: basic(26),
            tsc_deadline: basic(27),
            aes: basic(28),
            xsave: basic(29),
            avx: basic(30),
            f16c: basic(31),
            rdrand: basic(32),
            fsgsbase: basic(33),
            bmi1: basic(34),
            hle: basic(35),
            avx2: basic(36),
            smep: basic(37),
            bmi2: basic(38),
            erms: basic(39),
            invpcid: basic(40),
            rtm: basic(41),
            rdseed: basic(42),
            adx: basic(43),
            smap: basic(44),
            clflushopt: basic(45),
            clwb: basic(46),
            umip: basic(47),
            rdpid: basic(48),
            lahf_sahf: ext(0),
            abm: ext(1),
            sse4a: ext(2),
            misalign_sse: ext(3),
            prefetch: ext(4),
            syscall: ext(5),
            nx: ext(6),
            amd_mmx: ext(7),
            ffxsr: ext(8),
            page_1gb: ext(9),
            rdtscp: ext(10),
            long_mode: ext(11),
            amd_3dnow: ext(12),
            amd_3dnow_ext: ext(13),
            leaky_fxsr: ext(14),
            vmx: ext(15),
            svm: ext(16),
            vmx_features: VmxFeatures {
                ext_int_exit: vmxf(0),
                nmi_exit: vmxf(1),
                virtual_nmis: vmxf(2),
                preemption_timer: vmxf(3),
                hlt_exit: vmxf(4),
                cr3_load_exit: vmxf(5),
                cr3_store_exit: vmxf(6),
                tpr_shadow: vmxf(7),
                nmi_window_exit: vmxf(8),
                msr_bitmaps: vmxf(9),
                secondary_ctls: vmxf(10),
                ept: vmxf(11),
                vpid: vmxf(12),
                unrestricted_guest: vmxf(13),
            },
            svm_features: SvmFeatures {
                rev: self.svm_flags as u8,
                nested_paging: svmf(0),
                lbr_virt: svmf(1),
                svm_lock: svmf(2),
                nrip_save: svmf(3),
                tsc_rate_msr: svmf(4),
                vmcb_clean: svmf(5),
                flush_by_asid: svmf(6),
                decode_assists: svmf(7),
                pause_filter: svmf(8),
                pause_filter_threshold: svmf(9),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zerocopy::IntoBytes;

    #[test]
    fn test_inhibit_roundtrip() {
        let mut inhibit = InterruptInhibit::at_reset();
        inhibit.set_after_sti(0xfffff800_00001234);
        let mut nested = crate::nested::NestedVirt::None;
        inhibit.set_nmi_blocked(&mut nested, true);
        let saved = SavedInhibit::save(&inhibit);
        assert_eq!(saved.restore(), inhibit);
    }

    #[test]
    fn test_inhibit_byte_layout() {
        let mut inhibit = InterruptInhibit::at_reset();
        inhibit.set_after_ss(0x1122334455667788);
        let saved = SavedInhibit::save(&inhibit);
        // flags (le), pad, rip (le). This layout is normative.
        assert_eq!(
            saved.as_bytes(),
            [
                0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
                0x88, 0x77, 0x66, 0x55, 0x44, 0x33, 0x22, 0x11,
            ]
        );
    }

    #[test]
    fn test_msrs_roundtrip() {
        let mut state = MsrState::at_reset();
        state.lstar = 0xffff_8000_0000_0000;
        state.tsc = 123456789;
        state.vm_hsave_pa = 0x1000;
        let saved = SavedMsrs::save(&state);
        assert_eq!(saved.restore(), state);
        assert_eq!(saved.as_bytes().len(), 160);
    }

    #[test]
    fn test_features_roundtrip() {
        use crate::cpuid::CpuidLeaf;
        use crate::cpuid::CpuidLeafSet;
        use crate::features::MsrProbe;

        let leaves = CpuidLeafSet::new(vec![
            CpuidLeaf::new(0x1, [0x000506e3, 0, 0x7ffafbff, 0xbfebfbff]),
            CpuidLeaf::new(0x7, [0, 0x029c6fbf, 0, 0]).indexed(0),
            CpuidLeaf::new(0x8000_0001, [0, 0, 0x121, 0x2c100800]),
            CpuidLeaf::new(0x8000_0008, [0x3027, 0, 0, 0]),
        ])
        .unwrap();
        let features = CpuFeatures::build(
            CpuVendor::Intel,
            6,
            94,
            3,
            &leaves,
            &MsrProbe::default(),
        );
        let saved = SavedCpuFeatures::save(&features);
        assert_eq!(saved.restore(), features);
    }
}
