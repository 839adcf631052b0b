// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! CPU vendor and microarchitecture classification.
//!
//! The microarchitecture space is carved into per-vendor ranges so that
//! callers can ask range questions ("is this any Zen part?") without
//! enumerating every member.

use crate::cpuid::Vendor;
use core::fmt::Display;
use open_enum::open_enum;

/// The CPU vendor, as derived from the CPUID leaf 0 identification string.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CpuVendor {
    Intel,
    Amd,
    Via,
    Shanghai,
    Hygon,
    /// The vendor string was not recognized.
    Unknown,
}

impl CpuVendor {
    /// Classifies a raw 12-byte vendor string. Never fails; unrecognized
    /// strings classify as [`CpuVendor::Unknown`].
    pub fn detect(vendor: &Vendor) -> Self {
        match *vendor {
            Vendor::INTEL => Self::Intel,
            Vendor::AMD => Self::Amd,
            Vendor::VIA => Self::Via,
            Vendor::SHANGHAI => Self::Shanghai,
            Vendor::HYGON => Self::Hygon,
            _ => Self::Unknown,
        }
    }

    /// The diagnostic name of the vendor.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Intel => "GenuineIntel",
            Self::Amd => "AuthenticAMD",
            Self::Via => "CentaurHauls",
            Self::Shanghai => "Shanghai",
            Self::Hygon => "HygonGenuine",
            Self::Unknown => "unknown",
        }
    }
}

impl Display for CpuVendor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.pad(self.name())
    }
}

open_enum! {
    /// A canonical microarchitecture.
    ///
    /// Values are grouped into vendor ranges delimited by `*_FIRST`/`*_END`
    /// aliases; the `*_UNKNOWN` member of each range is the classification
    /// fallback when the vendor is known but the family/model is not.
    pub enum Microarch: u16 {
        UNKNOWN = 0x0000,

        INTEL_FIRST = 0x0100,
        INTEL_P6 = 0x0100,
        INTEL_CORE2 = 0x0110,
        INTEL_CORE_FIRST = 0x0120,
        INTEL_NEHALEM = 0x0120,
        INTEL_WESTMERE = 0x0121,
        INTEL_SANDY_BRIDGE = 0x0122,
        INTEL_IVY_BRIDGE = 0x0123,
        INTEL_HASWELL = 0x0124,
        INTEL_BROADWELL = 0x0125,
        INTEL_SKYLAKE = 0x0126,
        INTEL_KABY_LAKE = 0x0127,
        INTEL_CASCADE_LAKE = 0x0128,
        INTEL_ICE_LAKE = 0x0129,
        INTEL_CORE_END = 0x0140,
        INTEL_ATOM_FIRST = 0x0140,
        INTEL_BONNELL = 0x0140,
        INTEL_SILVERMONT = 0x0141,
        INTEL_GOLDMONT = 0x0142,
        INTEL_TREMONT = 0x0143,
        INTEL_ATOM_END = 0x0160,
        INTEL_UNKNOWN = 0x01ff,
        INTEL_END = 0x0200,

        AMD_FIRST = 0x0200,
        AMD_K7 = 0x0200,
        AMD_K8 = 0x0201,
        AMD_K10 = 0x0202,
        AMD_BOBCAT = 0x0210,
        AMD_JAGUAR = 0x0211,
        AMD_BULLDOZER = 0x0220,
        AMD_PILEDRIVER = 0x0221,
        AMD_STEAMROLLER = 0x0222,
        AMD_EXCAVATOR = 0x0223,
        AMD_ZEN_FIRST = 0x0240,
        AMD_ZEN1 = 0x0240,
        AMD_ZEN2 = 0x0241,
        AMD_ZEN3 = 0x0242,
        AMD_ZEN4 = 0x0243,
        AMD_ZEN_END = 0x0260,
        AMD_UNKNOWN = 0x02ff,
        AMD_END = 0x0300,

        HYGON_FIRST = 0x0300,
        HYGON_DHYANA = 0x0300,
        HYGON_UNKNOWN = 0x03ff,
        HYGON_END = 0x0400,

        VIA_FIRST = 0x0400,
        VIA_C7 = 0x0400,
        VIA_NANO = 0x0401,
        VIA_UNKNOWN = 0x04ff,
        VIA_END = 0x0500,

        SHANGHAI_FIRST = 0x0500,
        SHANGHAI_ZHANGJIANG = 0x0500,
        SHANGHAI_UNKNOWN = 0x05ff,
        SHANGHAI_END = 0x0600,
    }
}

impl Microarch {
    pub const fn is_intel(&self) -> bool {
        self.0 >= Self::INTEL_FIRST.0 && self.0 < Self::INTEL_END.0
    }

    pub const fn is_intel_core(&self) -> bool {
        self.0 >= Self::INTEL_CORE_FIRST.0 && self.0 < Self::INTEL_CORE_END.0
    }

    pub const fn is_intel_atom(&self) -> bool {
        self.0 >= Self::INTEL_ATOM_FIRST.0 && self.0 < Self::INTEL_ATOM_END.0
    }

    pub const fn is_amd(&self) -> bool {
        self.0 >= Self::AMD_FIRST.0 && self.0 < Self::AMD_END.0
    }

    pub const fn is_amd_zen(&self) -> bool {
        self.0 >= Self::AMD_ZEN_FIRST.0 && self.0 < Self::AMD_ZEN_END.0
    }

    /// The diagnostic name of the microarchitecture.
    pub const fn name(&self) -> &'static str {
        match *self {
            Self::INTEL_P6 => "P6",
            Self::INTEL_CORE2 => "Core2",
            Self::INTEL_NEHALEM => "Nehalem",
            Self::INTEL_WESTMERE => "Westmere",
            Self::INTEL_SANDY_BRIDGE => "SandyBridge",
            Self::INTEL_IVY_BRIDGE => "IvyBridge",
            Self::INTEL_HASWELL => "Haswell",
            Self::INTEL_BROADWELL => "Broadwell",
            Self::INTEL_SKYLAKE => "Skylake",
            Self::INTEL_KABY_LAKE => "KabyLake",
            Self::INTEL_CASCADE_LAKE => "CascadeLake",
            Self::INTEL_ICE_LAKE => "IceLake",
            Self::INTEL_BONNELL => "Bonnell",
            Self::INTEL_SILVERMONT => "Silvermont",
            Self::INTEL_GOLDMONT => "Goldmont",
            Self::INTEL_TREMONT => "Tremont",
            Self::INTEL_UNKNOWN => "UnknownIntel",
            Self::AMD_K7 => "K7",
            Self::AMD_K8 => "K8",
            Self::AMD_K10 => "K10",
            Self::AMD_BOBCAT => "Bobcat",
            Self::AMD_JAGUAR => "Jaguar",
            Self::AMD_BULLDOZER => "Bulldozer",
            Self::AMD_PILEDRIVER => "Piledriver",
            Self::AMD_STEAMROLLER => "Steamroller",
            Self::AMD_EXCAVATOR => "Excavator",
            Self::AMD_ZEN1 => "Zen",
            Self::AMD_ZEN2 => "Zen2",
            Self::AMD_ZEN3 => "Zen3",
            Self::AMD_ZEN4 => "Zen4",
            Self::AMD_UNKNOWN => "UnknownAmd",
            Self::HYGON_DHYANA => "Dhyana",
            Self::HYGON_UNKNOWN => "UnknownHygon",
            Self::VIA_C7 => "C7",
            Self::VIA_NANO => "Nano",
            Self::VIA_UNKNOWN => "UnknownVia",
            Self::SHANGHAI_ZHANGJIANG => "ZhangJiang",
            Self::SHANGHAI_UNKNOWN => "UnknownShanghai",
            _ => "unknown",
        }
    }
}

impl Display for Microarch {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.pad(self.name())
    }
}

/// One row of the classification table. Model and stepping bounds are
/// inclusive.
struct MicroarchRange {
    vendor: CpuVendor,
    family: u32,
    models: (u32, u32),
    steppings: (u32, u32),
    arch: Microarch,
}

const fn row(
    vendor: CpuVendor,
    family: u32,
    models: (u32, u32),
    arch: Microarch,
) -> MicroarchRange {
    MicroarchRange {
        vendor,
        family,
        models,
        steppings: (0, 0xf),
        arch,
    }
}

// Ordered, first match wins. Entries with narrower stepping bounds must
// precede the catch-all row for the same model.
const MICROARCH_RANGES: &[MicroarchRange] = &[
    // Intel family 6, Core line.
    row(CpuVendor::Intel, 6, (0x0f, 0x16), Microarch::INTEL_CORE2),
    row(CpuVendor::Intel, 6, (0x17, 0x17), Microarch::INTEL_CORE2),
    row(CpuVendor::Intel, 6, (0x1d, 0x1d), Microarch::INTEL_CORE2),
    row(CpuVendor::Intel, 6, (0x1a, 0x1a), Microarch::INTEL_NEHALEM),
    row(CpuVendor::Intel, 6, (0x1e, 0x1f), Microarch::INTEL_NEHALEM),
    row(CpuVendor::Intel, 6, (0x2e, 0x2e), Microarch::INTEL_NEHALEM),
    row(CpuVendor::Intel, 6, (0x25, 0x25), Microarch::INTEL_WESTMERE),
    row(CpuVendor::Intel, 6, (0x2c, 0x2c), Microarch::INTEL_WESTMERE),
    row(CpuVendor::Intel, 6, (0x2f, 0x2f), Microarch::INTEL_WESTMERE),
    row(CpuVendor::Intel, 6, (0x2a, 0x2a), Microarch::INTEL_SANDY_BRIDGE),
    row(CpuVendor::Intel, 6, (0x2d, 0x2d), Microarch::INTEL_SANDY_BRIDGE),
    row(CpuVendor::Intel, 6, (0x3a, 0x3a), Microarch::INTEL_IVY_BRIDGE),
    row(CpuVendor::Intel, 6, (0x3e, 0x3e), Microarch::INTEL_IVY_BRIDGE),
    row(CpuVendor::Intel, 6, (0x3c, 0x3c), Microarch::INTEL_HASWELL),
    row(CpuVendor::Intel, 6, (0x3f, 0x3f), Microarch::INTEL_HASWELL),
    row(CpuVendor::Intel, 6, (0x45, 0x46), Microarch::INTEL_HASWELL),
    row(CpuVendor::Intel, 6, (0x3d, 0x3d), Microarch::INTEL_BROADWELL),
    row(CpuVendor::Intel, 6, (0x47, 0x47), Microarch::INTEL_BROADWELL),
    row(CpuVendor::Intel, 6, (0x4f, 0x4f), Microarch::INTEL_BROADWELL),
    row(CpuVendor::Intel, 6, (0x56, 0x56), Microarch::INTEL_BROADWELL),
    row(CpuVendor::Intel, 6, (0x4e, 0x4e), Microarch::INTEL_SKYLAKE),
    row(CpuVendor::Intel, 6, (0x5e, 0x5e), Microarch::INTEL_SKYLAKE),
    // Skylake-SP and Cascade Lake share a model; the stepping decides.
    MicroarchRange {
        vendor: CpuVendor::Intel,
        family: 6,
        models: (0x55, 0x55),
        steppings: (0, 4),
        arch: Microarch::INTEL_SKYLAKE,
    },
    MicroarchRange {
        vendor: CpuVendor::Intel,
        family: 6,
        models: (0x55, 0x55),
        steppings: (5, 0xf),
        arch: Microarch::INTEL_CASCADE_LAKE,
    },
    row(CpuVendor::Intel, 6, (0x8e, 0x8e), Microarch::INTEL_KABY_LAKE),
    row(CpuVendor::Intel, 6, (0x9e, 0x9e), Microarch::INTEL_KABY_LAKE),
    row(CpuVendor::Intel, 6, (0x7d, 0x7e), Microarch::INTEL_ICE_LAKE),
    row(CpuVendor::Intel, 6, (0x6a, 0x6c), Microarch::INTEL_ICE_LAKE),
    // Intel family 6, Atom line.
    row(CpuVendor::Intel, 6, (0x1c, 0x1c), Microarch::INTEL_BONNELL),
    row(CpuVendor::Intel, 6, (0x26, 0x27), Microarch::INTEL_BONNELL),
    row(CpuVendor::Intel, 6, (0x37, 0x37), Microarch::INTEL_SILVERMONT),
    row(CpuVendor::Intel, 6, (0x4c, 0x4d), Microarch::INTEL_SILVERMONT),
    row(CpuVendor::Intel, 6, (0x5c, 0x5c), Microarch::INTEL_GOLDMONT),
    row(CpuVendor::Intel, 6, (0x5f, 0x5f), Microarch::INTEL_GOLDMONT),
    row(CpuVendor::Intel, 6, (0x86, 0x86), Microarch::INTEL_TREMONT),
    row(CpuVendor::Intel, 6, (0x96, 0x96), Microarch::INTEL_TREMONT),
    row(CpuVendor::Intel, 6, (0x00, 0x0e), Microarch::INTEL_P6),
    // AMD.
    row(CpuVendor::Amd, 6, (0x00, 0xff), Microarch::AMD_K7),
    row(CpuVendor::Amd, 7, (0x00, 0xff), Microarch::AMD_K7),
    row(CpuVendor::Amd, 0x0f, (0x00, 0xff), Microarch::AMD_K8),
    row(CpuVendor::Amd, 0x10, (0x00, 0xff), Microarch::AMD_K10),
    row(CpuVendor::Amd, 0x12, (0x00, 0xff), Microarch::AMD_K10),
    row(CpuVendor::Amd, 0x14, (0x00, 0xff), Microarch::AMD_BOBCAT),
    row(CpuVendor::Amd, 0x15, (0x00, 0x0f), Microarch::AMD_BULLDOZER),
    row(CpuVendor::Amd, 0x15, (0x10, 0x1f), Microarch::AMD_PILEDRIVER),
    row(CpuVendor::Amd, 0x15, (0x30, 0x3f), Microarch::AMD_STEAMROLLER),
    row(CpuVendor::Amd, 0x15, (0x60, 0x7f), Microarch::AMD_EXCAVATOR),
    row(CpuVendor::Amd, 0x16, (0x00, 0xff), Microarch::AMD_JAGUAR),
    row(CpuVendor::Amd, 0x17, (0x00, 0x2f), Microarch::AMD_ZEN1),
    row(CpuVendor::Amd, 0x17, (0x30, 0xff), Microarch::AMD_ZEN2),
    row(CpuVendor::Amd, 0x19, (0x00, 0x5f), Microarch::AMD_ZEN3),
    row(CpuVendor::Amd, 0x19, (0x60, 0xff), Microarch::AMD_ZEN4),
    // Hygon Dhyana is a licensed Zen1 derivative.
    row(CpuVendor::Hygon, 0x18, (0x00, 0xff), Microarch::HYGON_DHYANA),
    // VIA / Zhaoxin.
    row(CpuVendor::Via, 6, (0x0a, 0x0d), Microarch::VIA_C7),
    row(CpuVendor::Via, 6, (0x0f, 0xff), Microarch::VIA_NANO),
    row(CpuVendor::Shanghai, 7, (0x00, 0xff), Microarch::SHANGHAI_ZHANGJIANG),
];

/// Determines the canonical microarchitecture for a
/// vendor/family/model/stepping tuple.
///
/// Falls back to the vendor's `*_UNKNOWN` sentinel when the vendor is
/// recognized but no finer classification exists, and to
/// [`Microarch::UNKNOWN`] otherwise.
pub fn determine_microarch(
    vendor: CpuVendor,
    family: u32,
    model: u32,
    stepping: u32,
) -> Microarch {
    for range in MICROARCH_RANGES {
        if range.vendor == vendor
            && range.family == family
            && model >= range.models.0
            && model <= range.models.1
            && stepping >= range.steppings.0
            && stepping <= range.steppings.1
        {
            return range.arch;
        }
    }
    match vendor {
        CpuVendor::Intel => Microarch::INTEL_UNKNOWN,
        CpuVendor::Amd => Microarch::AMD_UNKNOWN,
        CpuVendor::Hygon => Microarch::HYGON_UNKNOWN,
        CpuVendor::Via => Microarch::VIA_UNKNOWN,
        CpuVendor::Shanghai => Microarch::SHANGHAI_UNKNOWN,
        CpuVendor::Unknown => Microarch::UNKNOWN,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_vendor() {
        let cases = &[
            (*b"GenuineIntel", CpuVendor::Intel),
            (*b"AuthenticAMD", CpuVendor::Amd),
            (*b"HygonGenuine", CpuVendor::Hygon),
            (*b"CentaurHauls", CpuVendor::Via),
            (*b"TotallyReal!", CpuVendor::Unknown),
        ];
        for &(raw, vendor) in cases {
            assert_eq!(CpuVendor::detect(&Vendor(raw)), vendor, "{raw:?}");
        }
    }

    #[test]
    fn test_determine_microarch() {
        let cases = &[
            (CpuVendor::Intel, 6, 0x5e, 3, Microarch::INTEL_SKYLAKE),
            (CpuVendor::Intel, 6, 0x55, 4, Microarch::INTEL_SKYLAKE),
            (CpuVendor::Intel, 6, 0x55, 7, Microarch::INTEL_CASCADE_LAKE),
            (CpuVendor::Intel, 6, 0x3a, 9, Microarch::INTEL_IVY_BRIDGE),
            (CpuVendor::Intel, 6, 0xf0, 0, Microarch::INTEL_UNKNOWN),
            (CpuVendor::Amd, 0x0f, 0x04, 0, Microarch::AMD_K8),
            (CpuVendor::Amd, 0x15, 0x10, 0, Microarch::AMD_PILEDRIVER),
            (CpuVendor::Amd, 0x17, 0x01, 1, Microarch::AMD_ZEN1),
            (CpuVendor::Amd, 0x17, 0x71, 0, Microarch::AMD_ZEN2),
            (CpuVendor::Amd, 0x1a, 0x00, 0, Microarch::AMD_UNKNOWN),
            (CpuVendor::Hygon, 0x18, 0x00, 1, Microarch::HYGON_DHYANA),
            (CpuVendor::Unknown, 6, 0x5e, 3, Microarch::UNKNOWN),
        ];
        for &(vendor, family, model, stepping, arch) in cases {
            assert_eq!(
                determine_microarch(vendor, family, model, stepping),
                arch,
                "{vendor} {family:#x}/{model:#x}/{stepping:#x}"
            );
        }
    }

    #[test]
    fn test_range_predicates() {
        assert!(Microarch::INTEL_SKYLAKE.is_intel());
        assert!(Microarch::INTEL_SKYLAKE.is_intel_core());
        assert!(!Microarch::INTEL_SKYLAKE.is_intel_atom());
        assert!(Microarch::INTEL_TREMONT.is_intel_atom());
        assert!(Microarch::AMD_ZEN3.is_amd());
        assert!(Microarch::AMD_ZEN3.is_amd_zen());
        assert!(!Microarch::AMD_K8.is_amd_zen());
        assert!(!Microarch::UNKNOWN.is_intel());
    }
}
