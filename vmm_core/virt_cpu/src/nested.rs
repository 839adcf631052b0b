// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Nested virtualization state accessors.
//!
//! Exactly one variant of [`NestedVirt`] is active per vCPU. The
//! hardware-assisted execution engine may pass a live snapshot of the
//! control fields into the intercept queries; when it does, that snapshot
//! wins over the in-memory control block, because the snapshot can be
//! fresher after a hardware-assisted nested entry. That preference order
//! is a contract, never reversed.

use cpudefs::svm::SvmCrIntercepts;
use cpudefs::svm::SvmInterceptVector3;
use cpudefs::svm::SvmInterceptVector4;
use cpudefs::vmx::Interruptibility;
use cpudefs::vmx::PinBasedControls;
use cpudefs::vmx::ProcessorControls;
use cpudefs::vmx::SecondaryProcessorControls;
use cpudefs::vmx::VmxInstructionError;
use cpudefs::vmx::LMSW_MASK;
use cpudefs::RFlags;

/// Per-vCPU nested virtualization state.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub enum NestedVirt {
    /// No nested virtualization in use.
    #[default]
    None,
    /// Intel VMX.
    Vmx(VmxNested),
    /// AMD SVM.
    Svm(SvmNested),
}

impl NestedVirt {
    /// State at vCPU reset.
    pub fn at_reset() -> Self {
        Self::None
    }
}

/// The shadow VMCS fields this core consults.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShadowVmcs {
    pub pin_ctls: PinBasedControls,
    pub proc_ctls: ProcessorControls,
    pub proc_ctls2: SecondaryProcessorControls,
    pub exception_bitmap: u32,
    pub cr0_guest_host_mask: u64,
    pub cr0_read_shadow: u64,
    pub cr4_guest_host_mask: u64,
    pub cr4_read_shadow: u64,
    /// Guest interruptibility, including the virtual-NMI blocking bit that
    /// replaces the ordinary NMI flag while in non-root mode with virtual
    /// NMIs enabled.
    pub interruptibility: Interruptibility,
    /// Error recorded by the last failing VMX instruction with a current
    /// VMCS.
    pub instruction_error: VmxInstructionError,
}

/// VMX nested state.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct VmxNested {
    /// The vCPU is executing a nested guest (VMX non-root operation).
    pub non_root: bool,
    /// Physical address of the current VMCS, if one is loaded.
    pub current_vmcs: Option<u64>,
    /// The shadow of the current VMCS.
    pub vmcs: ShadowVmcs,
}

impl VmxNested {
    /// True when NMI blocking is tracked by the virtual-NMI bit of the
    /// nested VMCS rather than the ordinary per-vCPU flag.
    pub fn virtual_nmi_active(&self) -> bool {
        self.non_root && self.vmcs.pin_ctls.virtual_nmis()
    }

    /// CR0 as the nested guest observes it: guest/host-masked bits read
    /// from the shadow, the rest from the real register.
    pub fn cr0_read(&self, real_cr0: u64) -> u64 {
        masked_projection(
            self.vmcs.cr0_guest_host_mask,
            self.vmcs.cr0_read_shadow,
            real_cr0,
        )
    }

    /// CR4 as the nested guest observes it.
    pub fn cr4_read(&self, real_cr4: u64) -> u64 {
        masked_projection(
            self.vmcs.cr4_guest_host_mask,
            self.vmcs.cr4_read_shadow,
            real_cr4,
        )
    }

    /// Whether MOV to CR0 of `new_value` must exit: it does iff any
    /// owner-masked bit would change relative to the read shadow.
    pub fn is_mov_to_cr0_intercepted(&self, new_value: u64) -> bool {
        self.vmcs.cr0_guest_host_mask & (self.vmcs.cr0_read_shadow ^ new_value) != 0
    }

    /// Whether MOV to CR4 of `new_value` must exit.
    pub fn is_mov_to_cr4_intercepted(&self, new_value: u64) -> bool {
        self.vmcs.cr4_guest_host_mask & (self.vmcs.cr4_read_shadow ^ new_value) != 0
    }

    /// Whether LMSW of `new_msw` must exit. LMSW only reaches the low
    /// machine-status-word bits.
    pub fn is_lmsw_intercepted(&self, new_msw: u16) -> bool {
        self.vmcs.cr0_guest_host_mask
            & LMSW_MASK
            & (self.vmcs.cr0_read_shadow ^ new_msw as u64)
            != 0
    }

    /// The effective processor controls: the engine-supplied cache when
    /// present, the shadow VMCS otherwise.
    pub fn proc_ctls(&self, cache: Option<ProcessorControls>) -> ProcessorControls {
        cache.unwrap_or(self.vmcs.proc_ctls)
    }

    /// Whether HLT in the nested guest exits.
    pub fn is_hlt_intercepted(&self, cache: Option<ProcessorControls>) -> bool {
        self.proc_ctls(cache).hlt_exiting()
    }

    /// Whether MOV DR in the nested guest exits.
    pub fn is_mov_dr_intercepted(&self, cache: Option<ProcessorControls>) -> bool {
        self.proc_ctls(cache).mov_dr_exiting()
    }

    /// Whether RDTSC in the nested guest exits.
    pub fn is_rdtsc_intercepted(&self, cache: Option<ProcessorControls>) -> bool {
        self.proc_ctls(cache).rdtsc_exiting()
    }

    /// Whether an NMI-window exit is requested.
    pub fn is_nmi_window_requested(&self, cache: Option<ProcessorControls>) -> bool {
        self.proc_ctls(cache).nmi_window_exiting()
    }

    /// Whether the given exception vector exits.
    pub fn is_exception_intercepted(&self, vector: u8) -> bool {
        self.vmcs.exception_bitmap & (1 << vector) != 0
    }

    /// Fails a VMX instruction, choosing the Valid or Invalid form based
    /// solely on whether a current VMCS is loaded.
    pub fn vm_fail(&mut self, rflags: &mut RFlags, error: VmxInstructionError) {
        if self.current_vmcs.is_some() {
            self.vm_fail_valid(rflags, error);
        } else {
            vm_fail_invalid(rflags);
        }
    }

    /// Fails a VMX instruction with a current VMCS: ZF set, the error code
    /// recorded in the VMCS.
    pub fn vm_fail_valid(&mut self, rflags: &mut RFlags, error: VmxInstructionError) {
        rflags.clear_status();
        *rflags = rflags.with_zero(true);
        self.vmcs.instruction_error = error;
    }
}

/// Succeeds a VMX instruction: all status flags clear.
pub fn vm_succeed(rflags: &mut RFlags) {
    rflags.clear_status();
}

/// Fails a VMX instruction with no current VMCS: CF set, nothing recorded.
pub fn vm_fail_invalid(rflags: &mut RFlags) {
    rflags.clear_status();
    *rflags = rflags.with_carry(true);
}

/// `effective = (mask & shadow) | (!mask & real)`.
fn masked_projection(mask: u64, shadow: u64, real: u64) -> u64 {
    (mask & shadow) | (!mask & real)
}

/// SVM nested state.
///
/// SVM has no virtual-NMI hardware bit; NMI blocking in a nested guest
/// uses the ordinary flag plus the IRET intercept tracked here.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SvmNested {
    /// The vCPU is executing a nested guest (VMRUN active).
    pub in_nested_guest: bool,
    /// VMCB control intercept vector 3.
    pub intercept_vec3: SvmInterceptVector3,
    /// VMCB control intercept vector 4.
    pub intercept_vec4: SvmInterceptVector4,
    /// CR read/write intercept bitmaps.
    pub cr_intercepts: SvmCrIntercepts,
    /// Exception intercept bitmap.
    pub exception_intercepts: u32,
}

impl SvmNested {
    /// The effective intercept vector 3: the engine-supplied cache when
    /// present, the VMCB shadow otherwise.
    pub fn vec3(&self, cache: Option<SvmInterceptVector3>) -> SvmInterceptVector3 {
        cache.unwrap_or(self.intercept_vec3)
    }

    /// The effective intercept vector 4.
    pub fn vec4(&self, cache: Option<SvmInterceptVector4>) -> SvmInterceptVector4 {
        cache.unwrap_or(self.intercept_vec4)
    }

    /// Whether IRET is intercepted. The NMI-unblocking path queries this
    /// on every IRET while a nested guest has NMIs latched.
    pub fn is_iret_intercepted(&self, cache: Option<SvmInterceptVector3>) -> bool {
        self.vec3(cache).iret()
    }

    /// Whether physical interrupts are intercepted.
    pub fn is_intr_intercepted(&self, cache: Option<SvmInterceptVector3>) -> bool {
        self.vec3(cache).intr()
    }

    /// Whether NMIs are intercepted.
    pub fn is_nmi_intercepted(&self, cache: Option<SvmInterceptVector3>) -> bool {
        self.vec3(cache).nmi()
    }

    /// Whether RDMSR/WRMSR go through the MSR protection bitmap.
    pub fn is_msr_prot_intercepted(&self, cache: Option<SvmInterceptVector3>) -> bool {
        self.vec3(cache).msr_prot()
    }

    /// Whether VMRUN is intercepted.
    pub fn is_vmrun_intercepted(&self, cache: Option<SvmInterceptVector4>) -> bool {
        self.vec4(cache).vmrun()
    }

    /// Whether a read of CRn is intercepted.
    pub fn is_cr_read_intercepted(&self, cr: u8, cache: Option<SvmCrIntercepts>) -> bool {
        let crs = cache.unwrap_or(self.cr_intercepts);
        crs.read() & (1 << cr) != 0
    }

    /// Whether a write of CRn is intercepted.
    pub fn is_cr_write_intercepted(&self, cr: u8, cache: Option<SvmCrIntercepts>) -> bool {
        let crs = cache.unwrap_or(self.cr_intercepts);
        crs.write() & (1 << cr) != 0
    }

    /// Whether the given exception vector is intercepted.
    pub fn is_exception_intercepted(&self, vector: u8) -> bool {
        self.exception_intercepts & (1 << vector) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masked_projection() {
        // Masked bits come from the shadow, the rest from the register.
        let vmx = VmxNested {
            vmcs: ShadowVmcs {
                cr0_guest_host_mask: 0xff,
                cr0_read_shadow: 0xaa,
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(vmx.cr0_read(0x55), 0xaa);
        assert_eq!(vmx.cr0_read(0x155), 0x1aa);
        assert_eq!(vmx.cr0_read(0xffff_ff00), 0xffff_ffaa);
    }

    #[test]
    fn test_mov_to_cr_intercept_decision() {
        let vmx = VmxNested {
            vmcs: ShadowVmcs {
                cr0_guest_host_mask: 0x1,
                cr0_read_shadow: 0x1,
                cr4_guest_host_mask: 0x2000,
                cr4_read_shadow: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        // Flipping an owned bit exits; changing unowned bits does not.
        assert!(vmx.is_mov_to_cr0_intercepted(0x0));
        assert!(!vmx.is_mov_to_cr0_intercepted(0x1));
        assert!(!vmx.is_mov_to_cr0_intercepted(0x8000_0001));
        assert!(vmx.is_mov_to_cr4_intercepted(0x2000));
        assert!(!vmx.is_mov_to_cr4_intercepted(0x0));
        // LMSW only reaches the low MSW bits.
        assert!(vmx.is_lmsw_intercepted(0x0));
        assert!(!vmx.is_lmsw_intercepted(0x1));
    }

    #[test]
    fn test_vmx_instruction_outcomes() {
        let mut rflags = RFlags::new()
            .with_carry(true)
            .with_zero(true)
            .with_sign(true)
            .with_overflow(true);
        vm_succeed(&mut rflags);
        assert!(!rflags.carry() && !rflags.zero() && !rflags.sign() && !rflags.overflow());

        let mut vmx = VmxNested::default();
        // No current VMCS: the Invalid form, CF only.
        vmx.vm_fail(&mut rflags, VmxInstructionError::VMPTRLD_WRONG_VMCS_REVISION);
        assert!(rflags.carry());
        assert!(!rflags.zero());

        // With a current VMCS: the Valid form, ZF plus a recorded error.
        vmx.current_vmcs = Some(0x1000);
        vmx.vm_fail(&mut rflags, VmxInstructionError::VMWRITE_RO_COMPONENT);
        assert!(rflags.zero());
        assert!(!rflags.carry());
        assert_eq!(
            vmx.vmcs.instruction_error,
            VmxInstructionError::VMWRITE_RO_COMPONENT
        );
    }

    #[test]
    fn test_intercept_cache_preferred() {
        let vmx = VmxNested {
            vmcs: ShadowVmcs {
                proc_ctls: ProcessorControls::new().with_hlt_exiting(false),
                ..Default::default()
            },
            ..Default::default()
        };
        // The live cache wins over the in-memory shadow, in both directions.
        let cache = ProcessorControls::new().with_hlt_exiting(true);
        assert!(vmx.is_hlt_intercepted(Some(cache)));
        assert!(!vmx.is_hlt_intercepted(None));

        let svm = SvmNested {
            intercept_vec3: SvmInterceptVector3::new().with_iret(true),
            ..Default::default()
        };
        let cache = SvmInterceptVector3::new().with_iret(false);
        assert!(!svm.is_iret_intercepted(Some(cache)));
        assert!(svm.is_iret_intercepted(None));
    }

    #[test]
    fn test_svm_cr_intercept_bitmaps() {
        let svm = SvmNested {
            cr_intercepts: SvmCrIntercepts::new().with_read(1 << 8).with_write(1 << 0),
            ..Default::default()
        };
        assert!(svm.is_cr_read_intercepted(8, None));
        assert!(!svm.is_cr_read_intercepted(0, None));
        assert!(svm.is_cr_write_intercepted(0, None));
        assert!(!svm.is_cr_write_intercepted(8, None));
    }
}
