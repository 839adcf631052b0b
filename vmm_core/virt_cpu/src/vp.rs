// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-vCPU mutable state.
//!
//! One [`VpCpuState`] is exclusively owned and mutated by the thread
//! emulating that vCPU; nothing here is shared or locked.

use crate::cpuid::CpuidLeafSet;
use crate::db::CpuProfile;
use crate::features::CpuFeatures;
use crate::features::MsrProbe;
use crate::inhibit::InterruptInhibit;
use crate::msr::MsrRangeTable;
use crate::msr::MsrState;
use crate::nested::NestedVirt;
use crate::saved_state::SavedInhibit;
use crate::saved_state::SavedMsrs;
use crate::TableError;

/// The mutable CPU-core state of one vCPU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VpCpuState {
    pub msrs: MsrState,
    pub inhibit: InterruptInhibit,
    pub nested: NestedVirt,
}

impl VpCpuState {
    /// State at vCPU reset.
    pub fn at_reset() -> Self {
        Self {
            msrs: MsrState::at_reset(),
            inhibit: InterruptInhibit::at_reset(),
            nested: NestedVirt::at_reset(),
        }
    }

    /// Resets the state in place.
    pub fn reset(&mut self) {
        let Self {
            msrs,
            inhibit,
            nested,
        } = self;
        *msrs = MsrState::at_reset();
        *inhibit = InterruptInhibit::at_reset();
        *nested = NestedVirt::at_reset();
    }

    /// Whether NMI delivery is blocked, honoring the nested projection.
    pub fn nmi_blocked(&self) -> bool {
        self.inhibit.nmi_blocked(&self.nested)
    }

    /// Sets or clears NMI blocking, honoring the nested projection.
    pub fn set_nmi_blocked(&mut self, blocked: bool) {
        self.inhibit.set_nmi_blocked(&mut self.nested, blocked);
    }

    /// Captures the saved-state blobs.
    pub fn save(&self) -> (SavedMsrs, SavedInhibit) {
        (SavedMsrs::save(&self.msrs), SavedInhibit::save(&self.inhibit))
    }

    /// Restores from saved-state blobs. Nested state is renegotiated by
    /// the execution engine after restore, so it comes back reset.
    pub fn restore(msrs: &SavedMsrs, inhibit: &SavedInhibit) -> Self {
        Self {
            msrs: msrs.restore(),
            inhibit: inhibit.restore(),
            nested: NestedVirt::at_reset(),
        }
    }
}

/// Everything VM construction derives from one profile.
pub struct VmCpuTables {
    pub leaves: CpuidLeafSet,
    pub msrs: MsrRangeTable,
    pub features: CpuFeatures,
}

/// Builds the per-VM tables and aggregated features for `profile`.
///
/// Construction-time table errors abort here; they are never guest
/// visible.
pub fn build_vm_tables(
    profile: &CpuProfile,
    ignore_unknown_msrs: bool,
) -> Result<VmCpuTables, TableError> {
    let leaves = profile.build_leaves()?;
    let msrs = profile.build_msr_table(ignore_unknown_msrs)?;
    let probe = MsrProbe::from_table(&msrs, &MsrState::at_reset());
    let features = CpuFeatures::build(
        profile.vendor,
        profile.family,
        profile.model,
        profile.stepping,
        &leaves,
        &probe,
    );
    Ok(VmCpuTables {
        leaves,
        msrs,
        features,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::lookup_profile;
    use cpudefs::identity::Microarch;

    #[test]
    fn test_build_vm_tables_skylake() {
        let profile = lookup_profile("Intel Core i7-6700K").unwrap();
        let tables = build_vm_tables(profile, false).unwrap();
        assert_eq!(tables.features.microarch, Microarch::INTEL_SKYLAKE);
        // The profile's fixed FEATURE_CONTROL and VMX capability MSRs feed
        // straight into the aggregate.
        assert!(tables.features.vmx);
        assert!(tables.features.vmx_features.ept);
        assert!(tables.features.avx2);
        assert!(tables.features.long_mode);
        assert_eq!(tables.features.max_phys_addr_width, 39);
    }

    #[test]
    fn test_build_vm_tables_amd() {
        let profile = lookup_profile("AMD Ryzen 7 1800X").unwrap();
        let tables = build_vm_tables(profile, false).unwrap();
        assert_eq!(tables.features.microarch, Microarch::AMD_ZEN1);
        assert!(tables.features.svm);
        assert!(tables.features.svm_features.nested_paging);
        assert!(!tables.features.vmx);
    }

    #[test]
    fn test_reset_and_roundtrip() {
        let mut vp = VpCpuState::at_reset();
        vp.msrs.lstar = 0xffff_8000_1234_0000;
        vp.inhibit.set_after_sti(0x401000);
        vp.set_nmi_blocked(true);

        let (msrs, inhibit) = vp.save();
        let restored = VpCpuState::restore(&msrs, &inhibit);
        assert_eq!(restored, vp);

        vp.reset();
        assert_eq!(vp, VpCpuState::at_reset());
        assert!(!vp.nmi_blocked());
    }
}
