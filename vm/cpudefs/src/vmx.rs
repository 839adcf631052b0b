// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Intel VMX definitions consumed by the nested virtualization support.

use bitfield_struct::bitfield;
use open_enum::open_enum;

open_enum! {
    /// VM-instruction error numbers, recorded in the VMCS when a VMX
    /// instruction fails with a valid current VMCS.
    pub enum VmxInstructionError: u32 {
        VMCALL_IN_VMX_ROOT = 1,
        VMCLEAR_INVALID_PHYS_ADDR = 2,
        VMCLEAR_VMXON_PTR = 3,
        VMLAUNCH_NON_CLEAR_VMCS = 4,
        VMRESUME_NON_LAUNCHED_VMCS = 5,
        VMRESUME_AFTER_VMXOFF = 6,
        VMENTRY_INVALID_CTL_FIELDS = 7,
        VMENTRY_INVALID_HOST_STATE = 8,
        VMPTRLD_INVALID_PHYS_ADDR = 9,
        VMPTRLD_VMXON_PTR = 10,
        VMPTRLD_WRONG_VMCS_REVISION = 11,
        VMREAD_VMWRITE_INVALID_COMPONENT = 12,
        VMWRITE_RO_COMPONENT = 13,
        VMXON_IN_VMX_ROOT = 15,
        VMENTRY_INVALID_EXEC_VMCS_PTR = 16,
        VMENTRY_NON_LAUNCHED_EXEC_VMCS = 17,
        VMENTRY_EXEC_VMCS_PTR = 18,
        VMCALL_NON_CLEAR_VMCS = 19,
        VMCALL_INVALID_EXITCTL_FIELDS = 20,
        VMCALL_WRONG_MSEG_REVISION = 22,
        VMXOFF_DUAL_MONITOR = 23,
        VMCALL_INVALID_SMM_MONITOR = 24,
        VMENTRY_INVALID_VM_EXEC_CTL = 25,
        VMENTRY_MOV_SS_BLOCKING = 26,
        INVEPT_INVPCID_INVALID_OPERAND = 28,
    }
}

impl Default for VmxInstructionError {
    /// Zero: no error recorded.
    fn default() -> Self {
        Self(0)
    }
}

/// Pin-based VM-execution controls.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PinBasedControls {
    pub external_interrupt_exiting: bool,
    #[bits(2)]
    _reserved1: u32,
    pub nmi_exiting: bool,
    _reserved2: bool,
    pub virtual_nmis: bool,
    pub preemption_timer: bool,
    pub posted_interrupts: bool,
    #[bits(24)]
    _reserved3: u32,
}

/// Primary processor-based VM-execution controls.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct ProcessorControls {
    #[bits(2)]
    _reserved: u32,
    pub interrupt_window_exiting: bool,
    pub use_tsc_offsetting: bool,
    #[bits(3)]
    _reserved2: u32,
    pub hlt_exiting: bool,
    _reserved3: bool,
    pub invlpg_exiting: bool,
    pub mwait_exiting: bool,
    pub rdpmc_exiting: bool,
    pub rdtsc_exiting: bool,
    #[bits(2)]
    _reserved4: u32,
    pub cr3_load_exiting: bool,
    pub cr3_store_exiting: bool,
    _reserved5: bool,
    _reserved6: bool,
    pub cr8_load_exiting: bool,
    pub cr8_store_exiting: bool,
    pub use_tpr_shadow: bool,
    pub nmi_window_exiting: bool,
    pub mov_dr_exiting: bool,
    pub unconditional_io_exiting: bool,
    pub use_io_bitmaps: bool,
    _reserved7: bool,
    pub monitor_trap_flag: bool,
    pub use_msr_bitmaps: bool,
    pub monitor_exiting: bool,
    pub pause_exiting: bool,
    pub activate_secondary_controls: bool,
}

/// Secondary processor-based VM-execution controls.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct SecondaryProcessorControls {
    pub virtualize_apic_accesses: bool,
    pub enable_ept: bool,
    pub descriptor_table_exiting: bool,
    pub enable_rdtscp: bool,
    pub virtualize_x2apic_mode: bool,
    pub enable_vpid: bool,
    pub wbinvd_exiting: bool,
    pub unrestricted_guest: bool,
    #[bits(2)]
    _reserved1: u32,
    pub pause_loop_exiting: bool,
    pub rdrand_exiting: bool,
    pub enable_invpcid: bool,
    #[bits(3)]
    _reserved2: u32,
    pub rdseed_exiting: bool,
    #[bits(3)]
    _reserved3: u32,
    pub enable_xsaves_xrstors: bool,
    #[bits(11)]
    _reserved4: u32,
}

/// Guest interruptibility state, as the VMCS encodes it.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct Interruptibility {
    pub blocked_by_sti: bool,
    pub blocked_by_movss: bool,
    pub blocked_by_smi: bool,
    pub blocked_by_nmi: bool,
    #[bits(28)]
    _reserved: u32,
}

/// The CR0/CR4 bits LMSW can reach.
pub const LMSW_MASK: u64 = 0xf;
