// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-vCPU interrupt and NMI inhibition tracking.
//!
//! The two instruction-boundary shadows (MOV/POP SS and STI) share one
//! recorded RIP: a shadow is only live while the current instruction
//! pointer still equals that RIP. A stale shadow must read as inactive;
//! only the `_with_update` accessor may clear it.
//!
//! NMI blocking has two possible storages: the ordinary flag here, or the
//! virtual-NMI blocking bit of the nested VMCS when the vCPU is in VMX
//! non-root mode with virtual NMIs enabled. Exactly one is authoritative
//! at a time, and the mode check lives in [`InterruptInhibit::nmi_blocked`]
//! and [`InterruptInhibit::set_nmi_blocked`] alone — no caller branches on
//! the mode itself. SVM has no equivalent hardware bit; SVM nested guests
//! use the ordinary flag plus IRET-intercept bookkeeping in the nested
//! module.

use crate::nested::NestedVirt;

/// The inhibition state machine. All flags are independently settable;
/// none is terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterruptInhibit {
    shadow_after_ss: bool,
    shadow_after_sti: bool,
    nmi_blocked: bool,
    global_inhibit: bool,
    /// The RIP at which the active shadow was established. Shared by both
    /// shadow flags; meaningless while neither is set.
    shadow_rip: u64,
}

impl InterruptInhibit {
    /// State at vCPU reset: nothing inhibited.
    pub fn at_reset() -> Self {
        Self {
            shadow_after_ss: false,
            shadow_after_sti: false,
            nmi_blocked: false,
            global_inhibit: false,
            shadow_rip: 0,
        }
    }

    /// Enters the MOV/POP SS shadow for the instruction at `rip`.
    pub fn set_after_ss(&mut self, rip: u64) {
        self.shadow_after_ss = true;
        self.shadow_rip = rip;
    }

    /// Enters the STI shadow for the instruction at `rip`.
    pub fn set_after_sti(&mut self, rip: u64) {
        self.shadow_after_sti = true;
        self.shadow_rip = rip;
    }

    /// Whether an instruction shadow is live at `current_rip`.
    ///
    /// A peek: a stale shadow reads as inactive but is left in place.
    pub fn is_in_shadow(&self, current_rip: u64) -> bool {
        (self.shadow_after_ss || self.shadow_after_sti) && self.shadow_rip == current_rip
    }

    /// Whether an instruction shadow is live at `current_rip`, clearing
    /// the shadow flags when they turn out to be stale.
    ///
    /// This is the only accessor permitted to mutate on a stale read.
    pub fn is_in_shadow_with_update(&mut self, current_rip: u64) -> bool {
        if !(self.shadow_after_ss || self.shadow_after_sti) {
            return false;
        }
        if self.shadow_rip != current_rip {
            self.shadow_after_ss = false;
            self.shadow_after_sti = false;
            return false;
        }
        true
    }

    /// Leaves both instruction shadows.
    pub fn clear_shadow(&mut self) {
        self.shadow_after_ss = false;
        self.shadow_after_sti = false;
    }

    /// The MOV/POP SS shadow bit, regardless of staleness.
    pub fn shadow_after_ss(&self) -> bool {
        self.shadow_after_ss
    }

    /// The STI shadow bit, regardless of staleness.
    pub fn shadow_after_sti(&self) -> bool {
        self.shadow_after_sti
    }

    /// The recorded shadow RIP.
    pub fn shadow_rip(&self) -> u64 {
        self.shadow_rip
    }

    /// Sets or clears the global interrupt inhibit (CLGI/STGI style).
    pub fn set_global_inhibit(&mut self, inhibited: bool) {
        self.global_inhibit = inhibited;
    }

    /// The global interrupt inhibit.
    pub fn global_inhibit(&self) -> bool {
        self.global_inhibit
    }

    /// Whether interrupt delivery is inhibited at `current_rip`, by either
    /// the global inhibit or a live shadow.
    pub fn is_interrupt_inhibited(&self, current_rip: u64) -> bool {
        self.global_inhibit || self.is_in_shadow(current_rip)
    }

    /// Whether NMI delivery is blocked.
    ///
    /// In VMX non-root mode with virtual NMIs, the nested VMCS bit is
    /// authoritative; otherwise the ordinary flag is.
    pub fn nmi_blocked(&self, nested: &NestedVirt) -> bool {
        match nested {
            NestedVirt::Vmx(vmx) if vmx.virtual_nmi_active() => {
                vmx.vmcs.interruptibility.blocked_by_nmi()
            }
            _ => self.nmi_blocked,
        }
    }

    /// Sets or clears NMI blocking, in whichever storage is authoritative.
    pub fn set_nmi_blocked(&mut self, nested: &mut NestedVirt, blocked: bool) {
        match nested {
            NestedVirt::Vmx(vmx) if vmx.virtual_nmi_active() => {
                vmx.vmcs.interruptibility =
                    vmx.vmcs.interruptibility.with_blocked_by_nmi(blocked);
            }
            _ => self.nmi_blocked = blocked,
        }
    }

    /// The ordinary NMI-blocked flag, ignoring any nested projection. For
    /// save-state only.
    pub fn raw_nmi_blocked(&self) -> bool {
        self.nmi_blocked
    }

    /// Restores the raw flags from save-state.
    pub fn restore(
        shadow_after_ss: bool,
        shadow_after_sti: bool,
        nmi_blocked: bool,
        global_inhibit: bool,
        shadow_rip: u64,
    ) -> Self {
        Self {
            shadow_after_ss,
            shadow_after_sti,
            nmi_blocked,
            global_inhibit,
            shadow_rip,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nested::SvmNested;
    use crate::nested::VmxNested;
    use cpudefs::vmx::PinBasedControls;

    #[test]
    fn test_shadow_staleness() {
        let mut inhibit = InterruptInhibit::at_reset();
        inhibit.set_after_sti(100);
        // Live at the recorded RIP, stale anywhere else, no clear needed.
        assert!(inhibit.is_in_shadow(100));
        assert!(!inhibit.is_in_shadow(101));
        // The peek left the stale bit in place.
        assert!(inhibit.shadow_after_sti());
        assert!(inhibit.is_in_shadow(100));
    }

    #[test]
    fn test_shadow_with_update_clears_stale() {
        let mut inhibit = InterruptInhibit::at_reset();
        inhibit.set_after_ss(200);
        // A live hit does not clear.
        assert!(inhibit.is_in_shadow_with_update(200));
        assert!(inhibit.shadow_after_ss());
        // A stale hit clears both shadow bits.
        assert!(!inhibit.is_in_shadow_with_update(201));
        assert!(!inhibit.shadow_after_ss());
        assert!(!inhibit.is_in_shadow(200));
    }

    #[test]
    fn test_shadows_share_rip() {
        let mut inhibit = InterruptInhibit::at_reset();
        inhibit.set_after_ss(300);
        inhibit.set_after_sti(304);
        // The later set moved the shared RIP.
        assert!(inhibit.is_in_shadow(304));
        assert!(!inhibit.is_in_shadow(300));
    }

    #[test]
    fn test_global_inhibit_ignores_rip() {
        let mut inhibit = InterruptInhibit::at_reset();
        inhibit.set_global_inhibit(true);
        assert!(inhibit.is_interrupt_inhibited(0));
        assert!(inhibit.is_interrupt_inhibited(0xfff));
        inhibit.set_global_inhibit(false);
        assert!(!inhibit.is_interrupt_inhibited(0));
    }

    #[test]
    fn test_nmi_blocking_ordinary_storage() {
        let mut inhibit = InterruptInhibit::at_reset();
        let mut nested = NestedVirt::None;
        assert!(!inhibit.nmi_blocked(&nested));
        inhibit.set_nmi_blocked(&mut nested, true);
        assert!(inhibit.nmi_blocked(&nested));
        assert!(inhibit.raw_nmi_blocked());
    }

    #[test]
    fn test_nmi_blocking_redirected_to_virtual_nmi() {
        let mut inhibit = InterruptInhibit::at_reset();
        let mut nested = NestedVirt::Vmx(VmxNested {
            non_root: true,
            ..Default::default()
        });
        if let NestedVirt::Vmx(vmx) = &mut nested {
            vmx.vmcs.pin_ctls = PinBasedControls::new().with_virtual_nmis(true);
        }

        inhibit.set_nmi_blocked(&mut nested, true);
        // The write landed in the nested VMCS, not the ordinary flag.
        assert!(inhibit.nmi_blocked(&nested));
        assert!(!inhibit.raw_nmi_blocked());
        if let NestedVirt::Vmx(vmx) = &nested {
            assert!(vmx.vmcs.interruptibility.blocked_by_nmi());
        }

        // Back in root mode the ordinary flag is authoritative again.
        if let NestedVirt::Vmx(vmx) = &mut nested {
            vmx.non_root = false;
        }
        assert!(!inhibit.nmi_blocked(&nested));
    }

    #[test]
    fn test_nmi_blocking_svm_uses_ordinary_flag() {
        let mut inhibit = InterruptInhibit::at_reset();
        let mut nested = NestedVirt::Svm(SvmNested {
            in_nested_guest: true,
            ..Default::default()
        });
        inhibit.set_nmi_blocked(&mut nested, true);
        assert!(inhibit.raw_nmi_blocked());
        assert!(inhibit.nmi_blocked(&nested));
    }
}
