// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! AMD SVM definitions: the VMCB intercept vectors the nested
//! virtualization support queries.

use bitfield_struct::bitfield;

/// VMCB control intercept vector 3 (instruction and event intercepts).
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct SvmInterceptVector3 {
    pub intr: bool,
    pub nmi: bool,
    pub smi: bool,
    pub init: bool,
    pub vintr: bool,
    pub cr0_sel_write: bool,
    pub idtr_read: bool,
    pub gdtr_read: bool,
    pub ldtr_read: bool,
    pub tr_read: bool,
    pub idtr_write: bool,
    pub gdtr_write: bool,
    pub ldtr_write: bool,
    pub tr_write: bool,
    pub rdtsc: bool,
    pub rdpmc: bool,
    pub pushf: bool,
    pub popf: bool,
    pub cpuid: bool,
    pub rsm: bool,
    pub iret: bool,
    pub intn: bool,
    pub invd: bool,
    pub pause: bool,
    pub hlt: bool,
    pub invlpg: bool,
    pub invlpga: bool,
    pub ioio_prot: bool,
    pub msr_prot: bool,
    pub task_switch: bool,
    pub ferr_freeze: bool,
    pub shutdown: bool,
}

/// VMCB control intercept vector 4 (SVM instruction intercepts).
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct SvmInterceptVector4 {
    pub vmrun: bool,
    pub vmmcall: bool,
    pub vmload: bool,
    pub vmsave: bool,
    pub stgi: bool,
    pub clgi: bool,
    pub skinit: bool,
    pub rdtscp: bool,
    pub icebp: bool,
    pub wbinvd: bool,
    pub monitor: bool,
    pub mwait: bool,
    pub mwait_conditional: bool,
    pub xsetbv: bool,
    pub rdpru: bool,
    pub efer_write_trap: bool,
    pub cr_write_trap: u16,
}

/// CR read/write intercept bitmaps: one bit per CR0..CR15.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct SvmCrIntercepts {
    pub read: u16,
    pub write: u16,
}
