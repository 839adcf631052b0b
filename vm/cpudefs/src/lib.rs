// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Architectural definitions for the virtualized x86 CPU core: control
//! register bits, MSR numbers, CPUID leaves, vendor/microarchitecture
//! taxonomy, and the VMX/SVM control formats the nested virtualization
//! support consumes.

#![no_std]
#![forbid(unsafe_code)]

pub mod cpuid;
pub mod identity;
pub mod svm;
pub mod vmx;

use bitfield_struct::bitfield;

pub const X64_CR0_PE: u64 = 0x0000000000000001; // protection enable
pub const X64_CR0_MP: u64 = 0x0000000000000002; // math present
pub const X64_CR0_EM: u64 = 0x0000000000000004; // emulate math coprocessor
pub const X64_CR0_TS: u64 = 0x0000000000000008; // task switched
pub const X64_CR0_ET: u64 = 0x0000000000000010; // extension type (80387)
pub const X64_CR0_NE: u64 = 0x0000000000000020; // numeric error
pub const X64_CR0_WP: u64 = 0x0000000000010000; // write protect
pub const X64_CR0_AM: u64 = 0x0000000000040000; // alignment mask
pub const X64_CR0_NW: u64 = 0x0000000020000000; // not write-through
pub const X64_CR0_CD: u64 = 0x0000000040000000; // cache disable
pub const X64_CR0_PG: u64 = 0x0000000080000000; // paging

pub const X64_CR4_VME: u64 = 0x0000000000000001; // Virtual 8086 mode extensions
pub const X64_CR4_PVI: u64 = 0x0000000000000002; // Protected mode virtual interrupts
pub const X64_CR4_TSD: u64 = 0x0000000000000004; // Time stamp disable
pub const X64_CR4_DE: u64 = 0x0000000000000008; // Debugging extensions
pub const X64_CR4_PSE: u64 = 0x0000000000000010; // Page size extensions
pub const X64_CR4_PAE: u64 = 0x0000000000000020; // Physical address extensions
pub const X64_CR4_MCE: u64 = 0x0000000000000040; // Machine check enable
pub const X64_CR4_PGE: u64 = 0x0000000000000080; // Page global enable
pub const X64_CR4_PCE: u64 = 0x0000000000000100; // Performance Counter Enable
pub const X64_CR4_FXSR: u64 = 0x0000000000000200; // FXSR used by OS
pub const X64_CR4_XMMEXCPT: u64 = 0x0000000000000400; // XMMI used by OS
pub const X64_CR4_UMIP: u64 = 0x0000000000000800; // UMIP used by OS
pub const X64_CR4_LA57: u64 = 0x0000000000001000; // 5-level paging enabled
pub const X64_CR4_VMXE: u64 = 0x0000000000002000; // VMX enabled
pub const X64_CR4_SMXE: u64 = 0x0000000000004000; // SMX enabled
pub const X64_CR4_RWFSGS: u64 = 0x0000000000010000; // RDWRFSGS enabled by OS
pub const X64_CR4_PCIDE: u64 = 0x0000000000020000; // PCID enabled by OS
pub const X64_CR4_OSXSAVE: u64 = 0x0000000000040000; // XSAVE enabled by OS
pub const X64_CR4_SMEP: u64 = 0x0000000000100000; // Supervisor Mode Execution Protection
pub const X64_CR4_SMAP: u64 = 0x0000000000200000; // Supervisor Mode Access Protection

pub const X64_EFER_SCE: u64 = 0x0000000000000001; // Syscall Enable
pub const X64_EFER_LME: u64 = 0x0000000000000100; // Long Mode Enabled
pub const X64_EFER_LMA: u64 = 0x0000000000000400; // Long Mode Active
pub const X64_EFER_NXE: u64 = 0x0000000000000800; // No-execute Enable
pub const X64_EFER_SVME: u64 = 0x0000000000001000; // SVM enable
pub const X64_EFER_FFXSR: u64 = 0x0000000000004000; // Fast save/restore enabled

pub const X86X_MSR_TSC: u32 = 0x10;
pub const X86X_IA32_MSR_PLATFORM_ID: u32 = 0x17;
pub const X86X_MSR_APIC_BASE: u32 = 0x1b;
pub const X86X_IA32_MSR_FEATURE_CONTROL: u32 = 0x3a;
pub const X86X_MSR_BIOS_SIGN_ID: u32 = 0x8b;
pub const X86X_MSR_MTRR_CAP: u32 = 0xfe;
pub const X86X_MSR_SYSENTER_CS: u32 = 0x174;
pub const X86X_MSR_SYSENTER_ESP: u32 = 0x175;
pub const X86X_MSR_SYSENTER_EIP: u32 = 0x176;
pub const X86X_IA32_MSR_MISC_ENABLE: u32 = 0x1a0;
pub const X86X_MSR_CR_PAT: u32 = 0x277;
pub const X86X_MSR_MTRR_DEF_TYPE: u32 = 0x2ff;

pub const X86X_MSR_VMX_BASIC: u32 = 0x480;
pub const X86X_MSR_VMX_PINBASED_CTLS: u32 = 0x481;
pub const X86X_MSR_VMX_PROCBASED_CTLS: u32 = 0x482;
pub const X86X_MSR_VMX_EXIT_CTLS: u32 = 0x483;
pub const X86X_MSR_VMX_ENTRY_CTLS: u32 = 0x484;
pub const X86X_MSR_VMX_PROCBASED_CTLS2: u32 = 0x48b;
pub const X86X_MSR_VMX_EPT_VPID_CAP: u32 = 0x48c;

pub const X86X_MSR_XSS: u32 = 0xda0;

pub const X86X_MSR_EFER: u32 = 0xC0000080;
pub const X86X_MSR_STAR: u32 = 0xC0000081;
pub const X86X_MSR_LSTAR: u32 = 0xC0000082;
pub const X86X_MSR_CSTAR: u32 = 0xC0000083;
pub const X86X_MSR_SFMASK: u32 = 0xC0000084;
pub const X86X_MSR_FS_BASE: u32 = 0xC0000100;
pub const X86X_MSR_GS_BASE: u32 = 0xC0000101;
pub const X86X_MSR_KERNEL_GS_BASE: u32 = 0xC0000102;
pub const X86X_MSR_TSC_AUX: u32 = 0xC0000103;
pub const X86X_AMD_MSR_VM_CR: u32 = 0xC0010114;
pub const X86X_AMD_MSR_VM_HSAVE_PA: u32 = 0xC0010117;

pub const X86X_MSR_DEFAULT_PAT: u64 = 0x0007040600070406;

/// Bits of `X86X_IA32_MSR_FEATURE_CONTROL`.
pub const X86X_FEATURE_CONTROL_LOCKED: u64 = 0x1;
pub const X86X_FEATURE_CONTROL_VMXON_IN_SMX: u64 = 0x2;
pub const X86X_FEATURE_CONTROL_VMXON: u64 = 0x4;

/// Bits of `X86X_AMD_MSR_VM_CR`.
pub const X86X_AMD_VM_CR_SVMDIS: u64 = 0x10;

/// Values for `X86X_IA32_MSR_MISC_ENABLE`.
///
/// Only the fields the virtual CPU synthesizes are named; the remainder
/// are model-dependent and left reserved.
#[bitfield(u64)]
pub struct MiscEnable {
    pub fast_string: bool,
    pub tcc: bool,
    pub x87_compat: bool,
    pub tm1: bool,
    #[bits(14)]
    _reserved1: u64,
    pub mwait: bool,
    #[bits(3)]
    _reserved2: u64,
    pub limit_cpuid: bool,
    pub xtpr_disable: bool,
    #[bits(40)]
    _reserved3: u64,
}

/// The RFLAGS register.
#[bitfield(u64, default = false)]
#[derive(PartialEq, Eq)]
pub struct RFlags {
    pub carry: bool,
    _reserved0: bool,
    pub parity: bool,
    _reserved1: bool,
    pub adjust: bool,
    _reserved2: bool,
    pub zero: bool,
    pub sign: bool,
    pub trap: bool,
    pub interrupt_enable: bool,
    pub direction: bool,
    pub overflow: bool,
    #[bits(2)]
    pub io_privilege_level: u8,
    pub nested_task: bool,
    _reserved3: bool,
    pub resume: bool,
    pub virtual_8086_mode: bool,
    pub alignment_check: bool,
    pub virtual_interrupt: bool,
    pub virtual_interrupt_pending: bool,
    pub cpuid_allowed: bool,
    #[bits(42)]
    _reserved4: u64,
}

impl Default for RFlags {
    fn default() -> Self {
        // Bit 1 is architecturally always set.
        Self(2)
    }
}

impl RFlags {
    /// Clears the six status flags (CF, PF, AF, ZF, SF, OF).
    pub fn clear_status(&mut self) {
        *self = self
            .with_carry(false)
            .with_parity(false)
            .with_adjust(false)
            .with_zero(false)
            .with_sign(false)
            .with_overflow(false);
    }
}
