// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! CPUID leaf numbers and result register formats.

use bitfield_struct::bitfield;
use core::fmt::Display;
use open_enum::open_enum;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::KnownLayout;

open_enum! {
    /// CPUID function (leaf) numbers, provided in eax.
    #[derive(FromBytes, Immutable, KnownLayout)]
    pub enum CpuidFunction: u32 {
        VENDOR_AND_MAX_FUNCTION = 0x00000000,
        VERSION_AND_FEATURES = 0x00000001,
        CACHE_AND_TLB_INFORMATION = 0x00000002,
        CACHE_PARAMETERS = 0x00000004,
        MONITOR_MWAIT = 0x00000005,
        POWER_MANAGEMENT = 0x00000006,
        EXTENDED_FEATURES = 0x00000007,
        EXTENDED_TOPOLOGY_ENUMERATION = 0x0000000B,
        EXTENDED_STATE_ENUMERATION = 0x0000000D,

        UNIMPLEMENTED_MINIMUM = 0x40000000,
        UNIMPLEMENTED_MAXIMUM = 0x4FFFFFFF,

        EXTENDED_MAX_FUNCTION = 0x80000000,
        EXTENDED_VERSION_AND_FEATURES = 0x80000001,
        EXTENDED_BRANDING_STRING1 = 0x80000002,
        EXTENDED_BRANDING_STRING2 = 0x80000003,
        EXTENDED_BRANDING_STRING3 = 0x80000004,
        EXTENDED_L1_CACHE_PARAMETERS = 0x80000005,
        EXTENDED_L2_CACHE_PARAMETERS = 0x80000006,
        EXTENDED_POWER_MANAGEMENT = 0x80000007,
        EXTENDED_ADDRESS_SPACE_SIZES = 0x80000008,
        EXTENDED_SVM_VERSION_AND_FEATURES = 0x8000000A,
        CACHE_TOPOLOGY_DEFINITION = 0x8000001D,
        PROCESSOR_TOPOLOGY_DEFINITION = 0x8000001E,
    }
}

impl CpuidFunction {
    /// True for the standard (non-extended, non-hypervisor) leaf range.
    pub const fn is_standard(&self) -> bool {
        self.0 < Self::UNIMPLEMENTED_MINIMUM.0
    }

    /// True for the 0x8000_0000 extended leaf range.
    pub const fn is_extended(&self) -> bool {
        self.0 >= Self::EXTENDED_MAX_FUNCTION.0
    }
}

/// The 12-byte vendor identification string returned in ebx/edx/ecx of
/// leaf 0.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct Vendor(pub [u8; 12]);

impl Display for Vendor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if let Ok(s) = core::str::from_utf8(&self.0) {
            f.pad(s)
        } else {
            core::fmt::Debug::fmt(&self.0, f)
        }
    }
}

impl Vendor {
    pub const INTEL: Self = Self(*b"GenuineIntel");
    pub const AMD: Self = Self(*b"AuthenticAMD");
    pub const HYGON: Self = Self(*b"HygonGenuine");
    pub const VIA: Self = Self(*b"CentaurHauls");
    pub const SHANGHAI: Self = Self(*b"  Shanghai  ");

    pub fn from_ebx_ecx_edx(ebx: u32, ecx: u32, edx: u32) -> Self {
        let mut vendor = [0; 12];
        vendor[0..4].copy_from_slice(&ebx.to_ne_bytes());
        vendor[4..8].copy_from_slice(&edx.to_ne_bytes());
        vendor[8..12].copy_from_slice(&ecx.to_ne_bytes());
        Self(vendor)
    }

    pub fn to_ebx_ecx_edx(self) -> (u32, u32, u32) {
        let ebx = u32::from_ne_bytes(self.0[0..4].try_into().unwrap());
        let edx = u32::from_ne_bytes(self.0[4..8].try_into().unwrap());
        let ecx = u32::from_ne_bytes(self.0[8..12].try_into().unwrap());

        (ebx, ecx, edx)
    }

    pub fn is_intel_compatible(&self) -> bool {
        self == &Self::INTEL
    }

    pub fn is_amd_compatible(&self) -> bool {
        self == &Self::AMD || self == &Self::HYGON
    }
}

#[bitfield(u32)]
pub struct VersionAndFeaturesEax {
    #[bits(4)]
    pub processor_stepping: u32,
    #[bits(4)]
    pub processor_model: u32,
    #[bits(4)]
    pub processor_family: u32,
    #[bits(2)]
    pub processor_type: u32,
    #[bits(2)]
    _reserved1: u32,
    #[bits(4)]
    pub extended_model: u32,
    pub extended_family: u8,
    #[bits(4)]
    _reserved2: u32,
}

impl VersionAndFeaturesEax {
    /// The display family: the base family, plus the extended family when
    /// the base family is 0xf.
    pub const fn display_family(&self) -> u32 {
        if self.processor_family() == 0xf {
            self.processor_family() + self.extended_family() as u32
        } else {
            self.processor_family()
        }
    }

    /// The display model: the extended model is an upper nibble for family
    /// 6 and 0xf parts.
    pub const fn display_model(&self) -> u32 {
        if self.processor_family() == 0xf || self.processor_family() == 0x6 {
            (self.extended_model() << 4) | self.processor_model()
        } else {
            self.processor_model()
        }
    }
}

#[bitfield(u32)]
pub struct VersionAndFeaturesEbx {
    pub brand_index: u8,
    pub clflush_line_size: u8,
    pub lps_per_package: u8,
    pub initial_apic_id: u8,
}

#[bitfield(u32)]
pub struct VersionAndFeaturesEcx {
    pub sse3: bool,
    pub pclmulqdq: bool,
    _reserved1: bool,
    pub monitor: bool,
    _reserved2: bool,
    pub vmx: bool,
    _reserved3: bool,
    _reserved4: bool,
    _reserved5: bool,
    pub ssse3: bool,
    #[bits(2)]
    _reserved6: u32,
    pub fma: bool,
    pub cx16: bool,
    #[bits(3)]
    _reserved7: u32,
    pub pcid: bool,
    _reserved8: bool,
    pub sse4_1: bool,
    pub sse4_2: bool,
    pub x2_apic: bool,
    pub movbe: bool,
    pub pop_cnt: bool,
    pub tsc_deadline_tmr: bool,
    pub aes: bool,
    pub xsave: bool,
    pub os_xsave: bool,
    pub avx: bool,
    pub f16c: bool,
    pub rd_rand: bool,
    pub hypervisor_present: bool,
}

#[bitfield(u32)]
pub struct VersionAndFeaturesEdx {
    pub fpu: bool,
    pub vme: bool,
    pub de: bool,
    pub pse: bool,
    pub tsc: bool,
    pub msr: bool,
    pub pae: bool,
    pub mce: bool,
    pub cx8: bool,
    pub apic: bool,
    _reserved1: bool,
    pub sep: bool,
    pub mtrr: bool,
    pub pge: bool,
    pub mca: bool,
    pub cmov: bool,
    pub pat: bool,
    pub pse36: bool,
    _reserved2: bool,
    pub cl_fsh: bool,
    _reserved3: bool,
    _reserved4: bool,
    _reserved5: bool,
    pub mmx: bool,
    pub fxsr: bool,
    pub sse: bool,
    pub sse2: bool,
    _reserved6: bool,
    pub mt_per_socket: bool,
    #[bits(3)]
    _reserved7: u32,
}

#[bitfield(u32)]
pub struct ExtendedFeatureSubleaf0Ebx {
    pub rd_wr_fs_gs: bool,
    pub tsc_adjust: bool,
    _reserved0: bool,
    pub bmi1: bool,
    pub hle: bool,
    pub avx2: bool,
    _reserved1: bool,
    pub smep: bool,
    pub bmi2: bool,
    pub enhanced_fast_string: bool,
    pub inv_pcid: bool,
    pub rtm: bool,
    #[bits(6)]
    _reserved2: u32,
    pub rd_seed: bool,
    pub adx: bool,
    pub smap: bool,
    #[bits(2)]
    _reserved3: u32,
    pub clflushopt: bool,
    pub clwb: bool,
    #[bits(7)]
    _reserved4: u32,
}

#[bitfield(u32)]
pub struct ExtendedFeatureSubleaf0Ecx {
    #[bits(2)]
    _reserved0: u32,
    pub umip: bool,
    #[bits(19)]
    _reserved1: u32,
    pub rd_pid: bool,
    #[bits(9)]
    _reserved2: u32,
}

#[bitfield(u32)]
pub struct ExtendedVersionAndFeaturesEcx {
    pub lahf_sahf_available: bool,
    pub cmp_legacy: bool,
    pub svm: bool,
    pub ext_apic_space: bool,
    pub alt_mov_cr8: bool,
    pub abm: bool,
    pub sse4_a: bool,
    pub mis_align_sse: bool,
    pub prefetch: bool,
    #[bits(23)]
    _reserved1: u32,
}

#[bitfield(u32)]
pub struct ExtendedVersionAndFeaturesEdx {
    pub fpu: bool,
    pub vme: bool,
    pub de: bool,
    pub pse: bool,
    pub tsc: bool,
    pub msr: bool,
    pub pae: bool,
    pub mce: bool,
    pub cx8: bool,
    pub apic: bool,
    _reserved1: bool,
    pub syscall: bool,
    pub mtrr: bool,
    pub pge: bool,
    pub mca: bool,
    pub cmov: bool,
    pub pat: bool,
    pub pse36: bool,
    #[bits(2)]
    _reserved2: u32,
    pub no_execute: bool,
    _reserved3: bool,
    pub amd_mmx: bool,
    pub mmx: bool,
    pub fxsr: bool,
    pub fast_fxsr: bool,
    pub page_1gb: bool,
    pub rdtscp: bool,
    _reserved4: bool,
    pub long_mode: bool,
    pub extended3d_now: bool,
    pub amd3d_now: bool,
}

#[bitfield(u32)]
pub struct ExtendedAddressSpaceSizesEax {
    pub physical_address_size: u8,
    pub virtual_address_size: u8,
    pub guest_physical_address_size: u8,
    pub reserved_eax: u8,
}

#[bitfield(u32)]
pub struct ExtendedStateEnumerationSubleaf0Eax {
    pub x87: bool,
    pub sse: bool,
    pub avx: bool,
    pub bndreg: bool,
    pub bndcsr: bool,
    pub opmask: bool,
    pub zmmhi: bool,
    pub zmm16_31: bool,
    #[bits(24)]
    _reserved: u32,
}

#[bitfield(u32)]
pub struct ExtendedSvmVersionAndFeaturesEax {
    pub svm_rev: u8,
    #[bits(24)]
    _reserved: u32,
}

#[bitfield(u32)]
pub struct ExtendedSvmVersionAndFeaturesEdx {
    pub nested_paging: bool,
    pub lbr_virt: bool,
    pub svm_lock: bool,
    pub nrip_save: bool,
    pub tsc_rate_msr: bool,
    pub vmcb_clean: bool,
    pub flush_by_asid: bool,
    pub decode_assists: bool,
    #[bits(2)]
    _reserved1: u32,
    pub pause_filter: bool,
    _reserved2: bool,
    pub pause_filter_threshold: bool,
    #[bits(19)]
    _reserved3: u32,
}
