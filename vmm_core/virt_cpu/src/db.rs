// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The built-in CPU profile database.
//!
//! A profile binds a named vendor/family/model/stepping identity to the
//! CPUID leaves and MSR ranges a guest of that model may observe. The
//! database is process-wide and immutable; profiles build fresh tables so
//! each VM owns its mutable range state.

use crate::cpuid::CpuidLeaf;
use crate::cpuid::CpuidLeafFlags;
use crate::cpuid::CpuidLeafSet;
use crate::cpuid::UnknownCpuidPolicy;
use crate::msr::MsrField;
use crate::msr::MsrRange;
use crate::msr::MsrRangeTable;
use crate::msr::MsrReadAction;
use crate::msr::MsrWriteAction;
use crate::msr::SyntheticMsr;
use crate::TableError;
use cpudefs::identity::determine_microarch;
use cpudefs::identity::CpuVendor;
use cpudefs::identity::Microarch;

/// PAT entries only encode memory types 0-7, with 2 and 3 reserved.
const PAT_GP_MASK: u64 = 0xf8f8_f8f8_f8f8_f8f8;

/// EFER bits an Intel guest may set.
const EFER_VALID_INTEL: u64 = cpudefs::X64_EFER_SCE
    | cpudefs::X64_EFER_LME
    | cpudefs::X64_EFER_LMA
    | cpudefs::X64_EFER_NXE;

/// EFER bits an AMD guest may set.
const EFER_VALID_AMD: u64 = EFER_VALID_INTEL | cpudefs::X64_EFER_SVME | cpudefs::X64_EFER_FFXSR;

/// A named CPU profile.
pub struct CpuProfile {
    /// The marketing name, used for exact-match lookup.
    pub name: &'static str,
    pub vendor: CpuVendor,
    pub family: u32,
    pub model: u32,
    pub stepping: u32,
    /// Policy for CPUID functions with no table row.
    pub unknown_cpuid: UnknownCpuidPolicy,
    /// The response for unknown functions under
    /// [`UnknownCpuidPolicy::Defaults`].
    pub default_unknown_cpuid: [u32; 4],
    /// Mask applied to RDMSR/WRMSR addresses before range lookup.
    pub msr_mask: u32,
    leaves: fn() -> Vec<CpuidLeaf>,
    msr_ranges: fn() -> Vec<MsrRange>,
}

impl CpuProfile {
    /// The canonical microarchitecture of this profile.
    pub fn microarch(&self) -> Microarch {
        determine_microarch(self.vendor, self.family, self.model, self.stepping)
    }

    /// Builds the profile's CPUID leaf table.
    pub fn build_leaves(&self) -> Result<CpuidLeafSet, TableError> {
        CpuidLeafSet::new((self.leaves)())
    }

    /// Builds the profile's MSR dispatch table.
    ///
    /// `ignore_unknown_msrs` is the VM-wide tolerate-unknown switch; it is
    /// deliberately not part of the profile.
    pub fn build_msr_table(&self, ignore_unknown_msrs: bool) -> Result<MsrRangeTable, TableError> {
        MsrRangeTable::new((self.msr_ranges)(), self.msr_mask, ignore_unknown_msrs)
    }
}

/// Looks up a profile by exact name.
pub fn lookup_profile(name: &str) -> Option<&'static CpuProfile> {
    CPU_PROFILES.iter().find(|x| x.name == name)
}

/// Returns the profile at `index`, for enumeration by tooling.
pub fn profile_by_index(index: usize) -> Option<&'static CpuProfile> {
    CPU_PROFILES.get(index)
}

/// The names of all built-in profiles.
pub fn profile_names() -> impl Iterator<Item = &'static str> {
    CPU_PROFILES.iter().map(|x| x.name)
}

/// The built-in profiles.
pub static CPU_PROFILES: &[CpuProfile] = &[
    CpuProfile {
        name: "Intel Core i7-6700K",
        vendor: CpuVendor::Intel,
        family: 6,
        model: 0x5e,
        stepping: 3,
        unknown_cpuid: UnknownCpuidPolicy::Defaults,
        default_unknown_cpuid: [0, 0, 0, 0],
        msr_mask: !0,
        leaves: skylake_leaves,
        msr_ranges: skylake_msr_ranges,
    },
    CpuProfile {
        name: "AMD FX-8150",
        vendor: CpuVendor::Amd,
        family: 0x15,
        model: 0x01,
        stepping: 2,
        unknown_cpuid: UnknownCpuidPolicy::LastStdLeaf,
        default_unknown_cpuid: [0, 0, 0, 0],
        msr_mask: !0,
        leaves: fx8150_leaves,
        msr_ranges: amd_msr_ranges,
    },
    CpuProfile {
        name: "AMD Ryzen 7 1800X",
        vendor: CpuVendor::Amd,
        family: 0x17,
        model: 0x01,
        stepping: 1,
        unknown_cpuid: UnknownCpuidPolicy::Defaults,
        default_unknown_cpuid: [0, 0, 0, 0],
        msr_mask: !0,
        leaves: ryzen_leaves,
        msr_ranges: amd_msr_ranges,
    },
];

fn leaf1_flags() -> CpuidLeafFlags {
    CpuidLeafFlags::new()
        .with_contains_apic_id(true)
        .with_contains_osxsave(true)
        .with_contains_apic(true)
}

fn skylake_leaves() -> Vec<CpuidLeaf> {
    vec![
        CpuidLeaf::new(0x0, [0x16, 0x756e6547, 0x6c65746e, 0x49656e69]),
        CpuidLeaf::new(0x1, [0x000506e3, 0x00100800, 0x7ffafbff, 0xbfebfbff])
            .with_flags(leaf1_flags()),
        CpuidLeaf::new(0x2, [0x76036301, 0x00f0b5ff, 0, 0x00c30000]),
        CpuidLeaf::new(0x4, [0x1c004121, 0x01c0003f, 0x3f, 0]).indexed(0),
        CpuidLeaf::new(0x4, [0x1c004122, 0x01c0003f, 0x3f, 0]).indexed(1),
        CpuidLeaf::new(0x4, [0x1c004143, 0x00c0003f, 0x3ff, 0]).indexed(2),
        CpuidLeaf::new(0x4, [0x1c03c163, 0x02c0003f, 0x1fff, 0x6]).indexed(3),
        CpuidLeaf::new(0x5, [0x40, 0x40, 0x3, 0x11142120]),
        CpuidLeaf::new(0x7, [0, 0x029c6fbf, 0, 0x9c000000]).indexed(0),
        CpuidLeaf::new(0xb, [0x1, 0x2, 0x100, 0])
            .indexed(0)
            .with_flags(
                CpuidLeafFlags::new()
                    .with_intel_topology_subleaves(true)
                    .with_contains_apic_id(true),
            ),
        CpuidLeaf::new(0xb, [0x4, 0x8, 0x201, 0])
            .indexed(1)
            .with_flags(
                CpuidLeafFlags::new()
                    .with_intel_topology_subleaves(true)
                    .with_contains_apic_id(true),
            ),
        CpuidLeaf::new(0xd, [0x1f, 0x440, 0x440, 0]).indexed(0),
        CpuidLeaf::new(0xd, [0xf, 0x3c0, 0x100, 0]).indexed(1),
        CpuidLeaf::new(0x8000_0000, [0x8000_0008, 0, 0, 0]),
        CpuidLeaf::new(0x8000_0001, [0, 0, 0x121, 0x2c100800]),
        CpuidLeaf::new(0x8000_0002, [0x65746e49, 0x2952286c, 0x726f4320, 0x4d542865]),
        CpuidLeaf::new(0x8000_0003, [0x37692029, 0x3037362d, 0x204b3030, 0x20555043]),
        CpuidLeaf::new(0x8000_0004, [0x2e342040, 0x48474030, 0x7a, 0]),
        CpuidLeaf::new(0x8000_0006, [0, 0, 0x01006040, 0]),
        CpuidLeaf::new(0x8000_0008, [0x3027, 0, 0, 0]),
    ]
}

fn fx8150_leaves() -> Vec<CpuidLeaf> {
    vec![
        CpuidLeaf::new(0x0, [0xd, 0x68747541, 0x444d4163, 0x69746e65]),
        CpuidLeaf::new(0x1, [0x00600f12, 0x00080800, 0x1698220b, 0x178bfbff])
            .with_flags(leaf1_flags()),
        CpuidLeaf::new(0x5, [0x40, 0x40, 0x3, 0]),
        CpuidLeaf::new(0xd, [0x7, 0x340, 0x3c0, 0]).indexed(0),
        CpuidLeaf::new(0x8000_0000, [0x8000_001e, 0x68747541, 0x444d4163, 0x69746e65]),
        CpuidLeaf::new(0x8000_0001, [0x00600f12, 0x10000000, 0x1e7, 0x2fd3fbff]),
        CpuidLeaf::new(0x8000_0005, [0xff30ff10, 0xff30ff20, 0x40020140, 0x40020140]),
        CpuidLeaf::new(0x8000_0006, [0x20800000, 0x42004200, 0x02006140, 0]),
        CpuidLeaf::new(0x8000_0008, [0x3030, 0, 0x4007, 0]),
        CpuidLeaf::new(0x8000_000A, [0x1, 0x10000, 0, 0x246f]),
        CpuidLeaf::new(0x8000_001D, [0x121, 0x0040003f, 0x3f, 0]),
        CpuidLeaf::new(0x8000_001E, [0x10, 0x100, 0, 0]),
    ]
}

fn ryzen_leaves() -> Vec<CpuidLeaf> {
    vec![
        CpuidLeaf::new(0x0, [0xd, 0x68747541, 0x444d4163, 0x69746e65]),
        CpuidLeaf::new(0x1, [0x00800f11, 0x00100800, 0x7ed8320b, 0x178bfbff])
            .with_flags(leaf1_flags()),
        CpuidLeaf::new(0x5, [0x40, 0x40, 0x3, 0x11]),
        CpuidLeaf::new(0x7, [0, 0x209c01a9, 0, 0]).indexed(0),
        CpuidLeaf::new(0xd, [0x7, 0x340, 0x340, 0]).indexed(0),
        CpuidLeaf::new(0x8000_0000, [0x8000_001f, 0x68747541, 0x444d4163, 0x69746e65]),
        CpuidLeaf::new(0x8000_0001, [0x00800f11, 0x20000000, 0x1e7, 0x2fd3fbff]),
        CpuidLeaf::new(0x8000_0008, [0x3030, 0x1007, 0xf, 0]),
        CpuidLeaf::new(0x8000_000A, [0x1, 0x8000, 0, 0x1005f]),
        CpuidLeaf::new(0x8000_001D, [0x121, 0x0140003f, 0x3f, 0]),
        CpuidLeaf::new(0x8000_001E, [0x20, 0x100, 0x300, 0]),
    ]
}

/// Ranges common to every profile.
fn common_msr_ranges(efer_valid: u64) -> Vec<MsrRange> {
    vec![
        MsrRange {
            first: cpudefs::X86X_MSR_TSC,
            last: cpudefs::X86X_MSR_TSC,
            read: MsrReadAction::Synthetic(SyntheticMsr::OffsetTsc),
            write: MsrWriteAction::Value(MsrField::Tsc),
            init_value: 0,
            ignore_mask: 0,
            gp_mask: 0,
            name: "IA32_TIME_STAMP_COUNTER",
            stats: Default::default(),
        },
        MsrRange::value(cpudefs::X86X_MSR_APIC_BASE, "IA32_APIC_BASE", MsrField::ApicBase),
        MsrRange::value(
            cpudefs::X86X_MSR_SYSENTER_CS,
            "IA32_SYSENTER_CS",
            MsrField::SysenterCs,
        ),
        MsrRange::value(
            cpudefs::X86X_MSR_SYSENTER_ESP,
            "IA32_SYSENTER_ESP",
            MsrField::SysenterEsp,
        ),
        MsrRange::value(
            cpudefs::X86X_MSR_SYSENTER_EIP,
            "IA32_SYSENTER_EIP",
            MsrField::SysenterEip,
        ),
        MsrRange::value(cpudefs::X86X_MSR_CR_PAT, "IA32_PAT", MsrField::Pat)
            .with_write_masks(0, PAT_GP_MASK),
        MsrRange::value(cpudefs::X86X_MSR_EFER, "EFER", MsrField::Efer)
            .with_write_masks(0, !efer_valid),
        MsrRange::value(cpudefs::X86X_MSR_STAR, "STAR", MsrField::Star),
        MsrRange::value(cpudefs::X86X_MSR_LSTAR, "LSTAR", MsrField::Lstar),
        MsrRange::value(cpudefs::X86X_MSR_CSTAR, "CSTAR", MsrField::Cstar),
        MsrRange::value(cpudefs::X86X_MSR_SFMASK, "SFMASK", MsrField::Sfmask),
        MsrRange::value(cpudefs::X86X_MSR_FS_BASE, "FS_BASE", MsrField::FsBase),
        MsrRange::value(cpudefs::X86X_MSR_GS_BASE, "GS_BASE", MsrField::GsBase),
        MsrRange::value(
            cpudefs::X86X_MSR_KERNEL_GS_BASE,
            "KERNEL_GS_BASE",
            MsrField::KernelGsBase,
        ),
        MsrRange::value(cpudefs::X86X_MSR_TSC_AUX, "TSC_AUX", MsrField::TscAux),
    ]
}

fn skylake_msr_ranges() -> Vec<MsrRange> {
    let mut ranges = common_msr_ranges(EFER_VALID_INTEL);
    ranges.extend([
        MsrRange::fixed(
            cpudefs::X86X_IA32_MSR_PLATFORM_ID,
            cpudefs::X86X_IA32_MSR_PLATFORM_ID,
            "IA32_PLATFORM_ID",
            0,
        )
        .read_only(),
        MsrRange::fixed(
            cpudefs::X86X_IA32_MSR_FEATURE_CONTROL,
            cpudefs::X86X_IA32_MSR_FEATURE_CONTROL,
            "IA32_FEATURE_CONTROL",
            cpudefs::X86X_FEATURE_CONTROL_LOCKED | cpudefs::X86X_FEATURE_CONTROL_VMXON,
        )
        .read_only(),
        MsrRange::fixed(
            cpudefs::X86X_MSR_BIOS_SIGN_ID,
            cpudefs::X86X_MSR_BIOS_SIGN_ID,
            "IA32_BIOS_SIGN_ID",
            0xc6 << 32,
        ),
        MsrRange::fixed(
            cpudefs::X86X_MSR_MTRR_CAP,
            cpudefs::X86X_MSR_MTRR_CAP,
            "IA32_MTRRCAP",
            0xd0a,
        )
        .read_only(),
        MsrRange::value(
            cpudefs::X86X_IA32_MSR_MISC_ENABLE,
            "IA32_MISC_ENABLE",
            MsrField::MiscEnable,
        ),
        MsrRange::value(
            cpudefs::X86X_MSR_MTRR_DEF_TYPE,
            "IA32_MTRR_DEF_TYPE",
            MsrField::MtrrDefType,
        )
        .with_write_masks(0, !0xcff),
        // The VMX capability block reads as a Skylake part with EPT,
        // VPID, and unrestricted guest.
        MsrRange::fixed(
            cpudefs::X86X_MSR_VMX_BASIC,
            cpudefs::X86X_MSR_VMX_BASIC,
            "IA32_VMX_BASIC",
            0x00d8_1000_0000_0004,
        )
        .read_only(),
        MsrRange::fixed(
            cpudefs::X86X_MSR_VMX_PINBASED_CTLS,
            cpudefs::X86X_MSR_VMX_PINBASED_CTLS,
            "IA32_VMX_PINBASED_CTLS",
            0x0000_00ff_0000_0016,
        )
        .read_only(),
        MsrRange::fixed(
            cpudefs::X86X_MSR_VMX_PROCBASED_CTLS,
            cpudefs::X86X_MSR_VMX_PROCBASED_CTLS,
            "IA32_VMX_PROCBASED_CTLS",
            0xfff9_fffe_0401_e172,
        )
        .read_only(),
        MsrRange::fixed(
            cpudefs::X86X_MSR_VMX_EXIT_CTLS,
            cpudefs::X86X_MSR_VMX_EXIT_CTLS,
            "IA32_VMX_EXIT_CTLS",
            0x01ff_ffff_0003_6dff,
        )
        .read_only(),
        MsrRange::fixed(
            cpudefs::X86X_MSR_VMX_ENTRY_CTLS,
            cpudefs::X86X_MSR_VMX_ENTRY_CTLS,
            "IA32_VMX_ENTRY_CTLS",
            0x0003_ffff_0000_11ff,
        )
        .read_only(),
        MsrRange::fixed(
            cpudefs::X86X_MSR_VMX_PROCBASED_CTLS2,
            cpudefs::X86X_MSR_VMX_PROCBASED_CTLS2,
            "IA32_VMX_PROCBASED_CTLS2",
            0x005f_1cff_0000_0000,
        )
        .read_only(),
        MsrRange::fixed(
            cpudefs::X86X_MSR_VMX_EPT_VPID_CAP,
            cpudefs::X86X_MSR_VMX_EPT_VPID_CAP,
            "IA32_VMX_EPT_VPID_CAP",
            0x0f01_06dd_4114_1c07,
        )
        .read_only(),
        // XSS exists but no supervisor states are exposed.
        MsrRange::value(cpudefs::X86X_MSR_XSS, "IA32_XSS", MsrField::Xss)
            .with_write_masks(0, !0),
    ]);
    ranges
}

fn amd_msr_ranges() -> Vec<MsrRange> {
    let mut ranges = common_msr_ranges(EFER_VALID_AMD);
    ranges.extend([
        MsrRange::fixed(
            cpudefs::X86X_AMD_MSR_VM_CR,
            cpudefs::X86X_AMD_MSR_VM_CR,
            "AMD_VM_CR",
            0,
        ),
        MsrRange::value(
            cpudefs::X86X_AMD_MSR_VM_HSAVE_PA,
            "AMD_VM_HSAVE_PA",
            MsrField::VmHsavePa,
        )
        .with_write_masks(0, 0xfff),
    ]);
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msr::MsrState;

    #[test]
    fn test_lookup() {
        assert!(lookup_profile("Intel Core i7-6700K").is_some());
        assert!(lookup_profile("AMD Ryzen 7 1800X").is_some());
        // Exact match only.
        assert!(lookup_profile("intel core i7-6700k").is_none());
        assert!(lookup_profile("Intel Core i9-9900K").is_none());
        assert!(profile_by_index(0).is_some());
        assert!(profile_by_index(CPU_PROFILES.len()).is_none());
        assert_eq!(profile_names().count(), CPU_PROFILES.len());
    }

    #[test]
    fn test_profiles_classify() {
        let cases = &[
            ("Intel Core i7-6700K", Microarch::INTEL_SKYLAKE),
            ("AMD FX-8150", Microarch::AMD_BULLDOZER),
            ("AMD Ryzen 7 1800X", Microarch::AMD_ZEN1),
        ];
        for &(name, arch) in cases {
            assert_eq!(lookup_profile(name).unwrap().microarch(), arch, "{name}");
        }
    }

    #[test]
    fn test_profiles_build_valid_tables() {
        for profile in CPU_PROFILES {
            let leaves = profile.build_leaves().unwrap();
            assert!(leaves.get(0, 0).is_some(), "{}", profile.name);
            let table = profile.build_msr_table(false).unwrap();
            let mut state = MsrState::at_reset();
            table
                .write(cpudefs::X86X_MSR_SYSENTER_CS, 0x8, &mut state)
                .unwrap();
            assert_eq!(
                table.read(cpudefs::X86X_MSR_SYSENTER_CS, &state).unwrap(),
                0x8,
                "{}",
                profile.name
            );
        }
    }

    #[test]
    fn test_vendor_string_matches_vendor() {
        for profile in CPU_PROFILES {
            let leaves = profile.build_leaves().unwrap();
            let leaf0 = leaves.get(0, 0).unwrap().result;
            let vendor = cpudefs::cpuid::Vendor::from_ebx_ecx_edx(leaf0[1], leaf0[2], leaf0[3]);
            assert_eq!(
                cpudefs::identity::CpuVendor::detect(&vendor),
                profile.vendor,
                "{}",
                profile.name
            );
        }
    }
}
