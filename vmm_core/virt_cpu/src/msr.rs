// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The MSR range table and RDMSR/WRMSR dispatch.
//!
//! A table is a sorted, non-overlapping list of address ranges, each bound
//! to a read action and a write action. The actions are closed enums so a
//! new action cannot be added without the dispatch arms being updated.
//!
//! The per-range counters are diagnostics only. They may be read by a
//! monitoring thread while the owning vCPU increments them, so they use
//! relaxed atomics; exact precision is not required.

use crate::MsrError;
use crate::TableError;
use cpudefs::MiscEnable;
use cpudefs::X86X_MSR_DEFAULT_PAT;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

/// Alias chains longer than this are treated as loops.
const MAX_ALIAS_DEPTH: u32 = 8;

/// The default APIC base: address 0xfee00000, globally enabled, BSP.
const APIC_BASE_AT_RESET: u64 = 0xfee0_0900;

/// Per-vCPU MSR-backed state.
///
/// Every field a [`MsrField`] can name lives here, as a plain named field;
/// the save-state layout is defined separately in
/// [`saved_state`](crate::saved_state).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsrState {
    pub tsc: u64,
    /// Offset added to `tsc` when the guest reads the counter. Not
    /// directly addressable as an MSR; consumed by
    /// [`SyntheticMsr::OffsetTsc`].
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

impl MsrState {
    /// State at vCPU reset.
    pub fn at_reset() -> Self {
        Self {
            tsc: 0,
            tsc_offset: 0,
            apic_base: APIC_BASE_AT_RESET,
            efer: 0,
            pat: X86X_MSR_DEFAULT_PAT,
            sysenter_cs: 0,
            sysenter_esp: 0,
            sysenter_eip: 0,
            misc_enable: MiscEnable::new().with_fast_string(true).into(),
            mtrr_def_type: 0,
            star: 0,
            lstar: 0,
            cstar: 0,
            sfmask: 0,
            fs_base: 0,
            gs_base: 0,
            kernel_gs_base: 0,
            tsc_aux: 0,
            xss: 0,
            vm_hsave_pa: 0,
        }
    }
}

/// Names one field of [`MsrState`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MsrField {
    Tsc,
    ApicBase,
    Efer,
    Pat,
    SysenterCs,
    SysenterEsp,
    SysenterEip,
    MiscEnable,
    MtrrDefType,
    Star,
    Lstar,
    Cstar,
    Sfmask,
    FsBase,
    GsBase,
    KernelGsBase,
    TscAux,
    Xss,
    VmHsavePa,
}

impl MsrField {
    fn read(&self, state: &MsrState) -> u64 {
        match self {
            Self::Tsc => state.tsc,
            Self::ApicBase => state.apic_base,
            Self::Efer => state.efer,
            Self::Pat => state.pat,
            Self::SysenterCs => state.sysenter_cs,
            Self::SysenterEsp => state.sysenter_esp,
            Self::SysenterEip => state.sysenter_eip,
            Self::MiscEnable => state.misc_enable,
            Self::MtrrDefType => state.mtrr_def_type,
            Self::Star => state.star,
            Self::Lstar => state.lstar,
            Self::Cstar => state.cstar,
            Self::Sfmask => state.sfmask,
            Self::FsBase => state.fs_base,
            Self::GsBase => state.gs_base,
            Self::KernelGsBase => state.kernel_gs_base,
            Self::TscAux => state.tsc_aux,
            Self::Xss => state.xss,
            Self::VmHsavePa => state.vm_hsave_pa,
        }
    }

    fn write(&self, state: &mut MsrState, value: u64) {
        match self {
            Self::Tsc => state.tsc = value,
            Self::ApicBase => state.apic_base = value,
            Self::Efer => state.efer = value,
            Self::Pat => state.pat = value,
            Self::SysenterCs => state.sysenter_cs = value,
            Self::SysenterEsp => state.sysenter_esp = value,
            Self::SysenterEip => state.sysenter_eip = value,
            Self::MiscEnable => state.misc_enable = value,
            Self::MtrrDefType => state.mtrr_def_type = value,
            Self::Star => state.star = value,
            Self::Lstar => state.lstar = value,
            Self::Cstar => state.cstar = value,
            Self::Sfmask => state.sfmask = value,
            Self::FsBase => state.fs_base = value,
            Self::GsBase => state.gs_base = value,
            Self::KernelGsBase => state.kernel_gs_base = value,
            Self::TscAux => state.tsc_aux = value,
            Self::Xss => state.xss = value,
            Self::VmHsavePa => state.vm_hsave_pa = value,
        }
    }
}

/// An MSR value synthesized from more than one state source.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SyntheticMsr {
    /// The time-stamp counter with the guest's offset applied.
    OffsetTsc,
}

impl SyntheticMsr {
    fn read(&self, state: &MsrState) -> u64 {
        match self {
            Self::OffsetTsc => state.tsc.wrapping_add(state.tsc_offset),
        }
    }
}

/// What a RDMSR of a range resolves to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MsrReadAction {
    /// The range's fixed initial value.
    FixedValue,
    /// The named per-vCPU field.
    Value(MsrField),
    /// The value of the range covering the target address.
    Alias(u32),
    /// A value composed from several state sources.
    Synthetic(SyntheticMsr),
    /// The range is write-only; reads always fault.
    WriteOnly,
}

/// What a WRMSR to a range resolves to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MsrWriteAction {
    /// Store to the named per-vCPU field.
    Value(MsrField),
    /// Accept and discard the value.
    IgnoreWrite,
    /// The range is read-only; writes always fault.
    ReadOnly,
    /// Forward to the range covering the target address.
    Alias(u32),
}

/// Diagnostic counters for one range.
#[derive(Debug, Default)]
pub struct MsrRangeStats {
    reads: AtomicU64,
    writes: AtomicU64,
    ignored_bits: AtomicU64,
    gp_faults: AtomicU64,
}

/// A point-in-time copy of a range's counters.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MsrRangeStatsSnapshot {
    /// Read dispatches.
    pub reads: u64,
    /// Write dispatches.
    pub writes: u64,
    /// Writes that had ignored bits stripped.
    pub ignored_bits: u64,
    /// Accesses rejected with #GP.
    pub gp_faults: u64,
}

impl MsrRangeStats {
    /// Copies the counters. The copy is torn-read tolerant, not a
    /// consistent snapshot across fields.
    pub fn snapshot(&self) -> MsrRangeStatsSnapshot {
        MsrRangeStatsSnapshot {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            ignored_bits: self.ignored_bits.load(Ordering::Relaxed),
            gp_faults: self.gp_faults.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// One MSR address range bound to its emulation actions.
#[derive(Debug)]
pub struct MsrRange {
    /// First MSR covered.
    pub first: u32,
    /// Last MSR covered, inclusive.
    pub last: u32,
    /// Read dispatch.
    pub read: MsrReadAction,
    /// Write dispatch.
    pub write: MsrWriteAction,
    /// The value [`MsrReadAction::FixedValue`] returns.
    pub init_value: u64,
    /// Bits silently stripped from written values.
    pub ignore_mask: u64,
    /// Bits that fault the whole write when set.
    pub gp_mask: u64,
    /// Diagnostic name.
    pub name: &'static str,
    /// Access counters.
    pub stats: MsrRangeStats,
}

impl MsrRange {
    /// A range returning `value` on reads and ignoring writes.
    pub fn fixed(first: u32, last: u32, name: &'static str, value: u64) -> Self {
        Self {
            first,
            last,
            read: MsrReadAction::FixedValue,
            write: MsrWriteAction::IgnoreWrite,
            init_value: value,
            ignore_mask: 0,
            gp_mask: 0,
            name,
            stats: Default::default(),
        }
    }

    /// A single-MSR range backed by a per-vCPU field.
    pub fn value(msr: u32, name: &'static str, field: MsrField) -> Self {
        Self {
            first: msr,
            last: msr,
            read: MsrReadAction::Value(field),
            write: MsrWriteAction::Value(field),
            init_value: 0,
            ignore_mask: 0,
            gp_mask: 0,
            name,
            stats: Default::default(),
        }
    }

    /// Restricts writes: `gp_mask` bits fault, `ignore_mask` bits are
    /// stripped.
    pub fn with_write_masks(self, ignore_mask: u64, gp_mask: u64) -> Self {
        Self {
            ignore_mask,
            gp_mask,
            ..self
        }
    }

    /// Makes the range read-only: every write faults.
    pub fn read_only(self) -> Self {
        Self {
            write: MsrWriteAction::ReadOnly,
            gp_mask: !0,
            ..self
        }
    }

    fn contains(&self, msr: u32) -> bool {
        self.first <= msr && msr <= self.last
    }
}

/// The per-profile MSR dispatch table.
#[derive(Debug)]
pub struct MsrRangeTable {
    ranges: Vec<MsrRange>,
    msr_mask: u32,
    ignore_unknown_msrs: bool,
    unknown_reads: AtomicU64,
    unknown_writes: AtomicU64,
}

impl MsrRangeTable {
    /// Builds a table from `ranges`.
    ///
    /// `msr_mask` is applied to every accessed MSR number before lookup;
    /// microarchitectures that ignore high ECX bits on RDMSR/WRMSR model
    /// that here. `ignore_unknown_msrs` selects the tolerate-and-zero
    /// policy for addresses no range covers; it is a VM-wide configuration
    /// decision, so it is an explicit constructor parameter.
    pub fn new(
        mut ranges: Vec<MsrRange>,
        msr_mask: u32,
        ignore_unknown_msrs: bool,
    ) -> Result<Self, TableError> {
        for range in &ranges {
            assert!(range.first <= range.last, "inverted msr range {}", range.name);
        }
        ranges.sort_by_key(|x| x.first);
        for pair in ranges.windows(2) {
            if pair[1].first <= pair[0].last {
                return Err(TableError::DuplicateMsrRange {
                    name: pair[1].name,
                    first: pair[1].first,
                    last: pair[1].last,
                });
            }
        }
        let table = Self {
            ranges,
            msr_mask,
            ignore_unknown_msrs,
            unknown_reads: AtomicU64::new(0),
            unknown_writes: AtomicU64::new(0),
        };
        table.validate_aliases()?;
        Ok(table)
    }

    /// Inserts a new range, keeping the table sorted.
    ///
    /// Fails with [`TableError::DuplicateMsrRange`] if the range overlaps
    /// an existing one; the table is unchanged on failure.
    pub fn insert(&mut self, range: MsrRange) -> Result<(), TableError> {
        assert!(range.first <= range.last, "inverted msr range {}", range.name);
        let pos = self.ranges.partition_point(|x| x.first < range.first);
        let overlaps_prev = pos > 0 && self.ranges[pos - 1].last >= range.first;
        let overlaps_next = self
            .ranges
            .get(pos)
            .is_some_and(|next| range.last >= next.first);
        if overlaps_prev || overlaps_next {
            return Err(TableError::DuplicateMsrRange {
                name: range.name,
                first: range.first,
                last: range.last,
            });
        }
        self.ranges.insert(pos, range);
        self.validate_aliases()
    }

    /// Alias chains must land on a covered address and terminate. Walking
    /// each chain here keeps runtime dispatch loop-free in practice; the
    /// runtime depth guard remains as a backstop.
    fn validate_aliases(&self) -> Result<(), TableError> {
        for range in &self.ranges {
            for target in [alias_target(range.read), alias_target_w(range.write)]
                .into_iter()
                .flatten()
            {
                let mut cursor = target & self.msr_mask;
                let mut depth = MAX_ALIAS_DEPTH;
                loop {
                    let Some(next) = self.find(cursor) else {
                        return Err(TableError::BrokenAlias {
                            msr: range.first,
                            target: cursor,
                        });
                    };
                    match (alias_target(next.read), alias_target_w(next.write)) {
                        (None, None) => break,
                        (r, w) => {
                            if depth == 0 {
                                return Err(TableError::AliasCycle { msr: range.first });
                            }
                            depth -= 1;
                            cursor = r.or(w).unwrap() & self.msr_mask;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Returns the range covering `msr`, after mask truncation.
    pub fn find(&self, msr: u32) -> Option<&MsrRange> {
        let msr = msr & self.msr_mask;
        let pos = self.ranges.partition_point(|x| x.last < msr);
        self.ranges.get(pos).filter(|x| x.contains(msr))
    }

    /// The ranges in table order, for diagnostics.
    pub fn ranges(&self) -> &[MsrRange] {
        &self.ranges
    }

    /// Tolerated accesses to addresses outside every range.
    pub fn unknown_access_counts(&self) -> (u64, u64) {
        (
            self.unknown_reads.load(Ordering::Relaxed),
            self.unknown_writes.load(Ordering::Relaxed),
        )
    }

    /// Emulates RDMSR.
    ///
    /// Faults are returned, never injected. [`MsrError::AliasLoop`] marks
    /// an internal table inconsistency and must not be surfaced to the
    /// guest as #GP.
    pub fn read(&self, msr: u32, state: &MsrState) -> Result<u64, MsrError> {
        self.read_inner(msr & self.msr_mask, state, MAX_ALIAS_DEPTH)
    }

    fn read_inner(&self, msr: u32, state: &MsrState, depth: u32) -> Result<u64, MsrError> {
        let Some(range) = self.find(msr) else {
            if self.ignore_unknown_msrs {
                self.unknown_reads.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(msr, "tolerated read of unknown msr");
                return Ok(0);
            }
            tracing::debug!(msr, "read of unknown msr");
            return Err(MsrError::Unknown);
        };
        MsrRangeStats::bump(&range.stats.reads);
        match range.read {
            MsrReadAction::FixedValue => Ok(range.init_value),
            MsrReadAction::Value(field) => Ok(field.read(state)),
            MsrReadAction::Synthetic(synth) => Ok(synth.read(state)),
            MsrReadAction::Alias(target) => {
                if depth == 0 {
                    tracing::error!(msr, target, "msr alias loop");
                    return Err(MsrError::AliasLoop);
                }
                self.read_inner(target & self.msr_mask, state, depth - 1)
            }
            MsrReadAction::WriteOnly => {
                MsrRangeStats::bump(&range.stats.gp_faults);
                tracing::debug!(msr, name = range.name, "read of write-only msr");
                Err(MsrError::InvalidAccess)
            }
        }
    }

    /// Emulates WRMSR.
    ///
    /// GP-masked bits fault the whole write before any state is touched;
    /// ignore-masked bits are stripped and counted, without faulting.
    pub fn write(&self, msr: u32, value: u64, state: &mut MsrState) -> Result<(), MsrError> {
        self.write_inner(msr & self.msr_mask, value, state, MAX_ALIAS_DEPTH)
    }

    fn write_inner(
        &self,
        msr: u32,
        value: u64,
        state: &mut MsrState,
        depth: u32,
    ) -> Result<(), MsrError> {
        let Some(range) = self.find(msr) else {
            if self.ignore_unknown_msrs {
                self.unknown_writes.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(msr, value, "tolerated write of unknown msr");
                return Ok(());
            }
            tracing::debug!(msr, value, "write of unknown msr");
            return Err(MsrError::Unknown);
        };
        if value & range.gp_mask != 0 {
            MsrRangeStats::bump(&range.stats.gp_faults);
            tracing::debug!(msr, value, name = range.name, "write sets gp-masked bits");
            return Err(MsrError::InvalidAccess);
        }
        MsrRangeStats::bump(&range.stats.writes);
        let effective = value & !range.ignore_mask;
        if value & range.ignore_mask != 0 {
            MsrRangeStats::bump(&range.stats.ignored_bits);
        }
        match range.write {
            MsrWriteAction::Value(field) => {
                field.write(state, effective);
                Ok(())
            }
            MsrWriteAction::IgnoreWrite => Ok(()),
            MsrWriteAction::ReadOnly => {
                MsrRangeStats::bump(&range.stats.gp_faults);
                tracing::debug!(msr, name = range.name, "write to read-only msr");
                Err(MsrError::InvalidAccess)
            }
            MsrWriteAction::Alias(target) => {
                if depth == 0 {
                    tracing::error!(msr, target, "msr alias loop");
                    return Err(MsrError::AliasLoop);
                }
                self.write_inner(target & self.msr_mask, effective, state, depth - 1)
            }
        }
    }
}

fn alias_target(action: MsrReadAction) -> Option<u32> {
    match action {
        MsrReadAction::Alias(target) => Some(target),
        _ => None,
    }
}

fn alias_target_w(action: MsrWriteAction) -> Option<u32> {
    match action {
        MsrWriteAction::Alias(target) => Some(target),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpudefs::X86X_MSR_CR_PAT;
    use cpudefs::X86X_MSR_EFER;
    use cpudefs::X86X_MSR_SYSENTER_CS;
    use cpudefs::X86X_MSR_TSC;

    fn table(ignore_unknown: bool) -> MsrRangeTable {
        MsrRangeTable::new(
            vec![
                MsrRange {
                    first: X86X_MSR_TSC,
                    last: X86X_MSR_TSC,
                    read: MsrReadAction::Synthetic(SyntheticMsr::OffsetTsc),
                    write: MsrWriteAction::Value(MsrField::Tsc),
                    init_value: 0,
                    ignore_mask: 0,
                    gp_mask: 0,
                    name: "IA32_TIME_STAMP_COUNTER",
                    stats: Default::default(),
                },
                MsrRange::value(X86X_MSR_SYSENTER_CS, "IA32_SYSENTER_CS", MsrField::SysenterCs),
                MsrRange::value(X86X_MSR_CR_PAT, "IA32_PAT", MsrField::Pat)
                    .with_write_masks(0xffff_ffff_0000_0000, 0),
                MsrRange::value(X86X_MSR_EFER, "EFER", MsrField::Efer)
                    .with_write_masks(0, !0x0000_0000_0000_1d01),
                MsrRange::fixed(0x300, 0x3ff, "P6_RESERVED", 0),
                MsrRange {
                    first: 0x2000,
                    last: 0x2000,
                    read: MsrReadAction::Alias(X86X_MSR_SYSENTER_CS),
                    write: MsrWriteAction::Alias(X86X_MSR_SYSENTER_CS),
                    init_value: 0,
                    ignore_mask: 0,
                    gp_mask: 0,
                    name: "SYSENTER_CS_ALIAS",
                    stats: Default::default(),
                },
                MsrRange::fixed(0x2001, 0x2001, "LOCKED_CONFIG", 0x5).read_only(),
                MsrRange {
                    first: 0x2002,
                    last: 0x2002,
                    read: MsrReadAction::WriteOnly,
                    write: MsrWriteAction::IgnoreWrite,
                    init_value: 0,
                    ignore_mask: 0,
                    gp_mask: 0,
                    name: "WRITE_ONLY_DOORBELL",
                    stats: Default::default(),
                },
            ],
            !0,
            ignore_unknown,
        )
        .unwrap()
    }

    #[test]
    fn test_find() {
        let table = table(false);
        assert_eq!(table.find(X86X_MSR_TSC).unwrap().name, "IA32_TIME_STAMP_COUNTER");
        assert_eq!(table.find(0x300).unwrap().name, "P6_RESERVED");
        assert_eq!(table.find(0x3ff).unwrap().name, "P6_RESERVED");
        assert!(table.find(0x400).is_none());
        assert!(table.find(0x2ff).is_none());
        assert!(table.find(0xffff_ffff).is_none());
    }

    #[test]
    fn test_value_roundtrip() {
        let table = table(false);
        let mut state = MsrState::at_reset();
        table
            .write(X86X_MSR_SYSENTER_CS, 0x1234, &mut state)
            .unwrap();
        assert_eq!(table.read(X86X_MSR_SYSENTER_CS, &state).unwrap(), 0x1234);
    }

    #[test]
    fn test_ignore_mask_strips_and_counts() {
        let table = table(false);
        let mut state = MsrState::at_reset();
        table
            .write(X86X_MSR_CR_PAT, 0xdead_beef_0000_0601, &mut state)
            .unwrap();
        // The high half is ignore-masked away, without a fault.
        assert_eq!(table.read(X86X_MSR_CR_PAT, &state).unwrap(), 0x601);
        let stats = table.find(X86X_MSR_CR_PAT).unwrap().stats.snapshot();
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.ignored_bits, 1);
        assert_eq!(stats.gp_faults, 0);
    }

    #[test]
    fn test_gp_mask_rejects_whole_write() {
        let table = table(false);
        let mut state = MsrState::at_reset();
        table.write(X86X_MSR_EFER, 0x500, &mut state).unwrap();
        let before = table.read(X86X_MSR_EFER, &state).unwrap();
        assert_eq!(
            table.write(X86X_MSR_EFER, 0x500 | (1 << 4), &mut state),
            Err(MsrError::InvalidAccess)
        );
        // No partial mutation.
        assert_eq!(table.read(X86X_MSR_EFER, &state).unwrap(), before);
        let stats = table.find(X86X_MSR_EFER).unwrap().stats.snapshot();
        assert_eq!(stats.gp_faults, 1);
    }

    #[test]
    fn test_unknown_msr_policies() {
        let mut state = MsrState::at_reset();

        let faulting = table(false);
        assert_eq!(faulting.read(0x9999, &state), Err(MsrError::Unknown));
        assert_eq!(faulting.write(0x9999, 1, &mut state), Err(MsrError::Unknown));

        let tolerant = table(true);
        assert_eq!(tolerant.read(0x9999, &state).unwrap(), 0);
        tolerant.write(0x9999, 1, &mut state).unwrap();
        assert_eq!(tolerant.unknown_access_counts(), (1, 1));
    }

    #[test]
    fn test_alias_dispatch() {
        let table = table(false);
        let mut state = MsrState::at_reset();
        table.write(0x2000, 0xbeef, &mut state).unwrap();
        assert_eq!(table.read(X86X_MSR_SYSENTER_CS, &state).unwrap(), 0xbeef);
        assert_eq!(table.read(0x2000, &state).unwrap(), 0xbeef);
    }

    #[test]
    fn test_alias_cycle_rejected_at_construction() {
        let err = MsrRangeTable::new(
            vec![
                MsrRange {
                    first: 0x10,
                    last: 0x10,
                    read: MsrReadAction::Alias(0x11),
                    write: MsrWriteAction::IgnoreWrite,
                    init_value: 0,
                    ignore_mask: 0,
                    gp_mask: 0,
                    name: "A",
                    stats: Default::default(),
                },
                MsrRange {
                    first: 0x11,
                    last: 0x11,
                    read: MsrReadAction::Alias(0x10),
                    write: MsrWriteAction::IgnoreWrite,
                    init_value: 0,
                    ignore_mask: 0,
                    gp_mask: 0,
                    name: "B",
                    stats: Default::default(),
                },
            ],
            !0,
            false,
        )
        .unwrap_err();
        assert!(matches!(err, TableError::AliasCycle { .. }));
    }

    #[test]
    fn test_broken_alias_rejected_at_construction() {
        let err = MsrRangeTable::new(
            vec![MsrRange {
                first: 0x10,
                last: 0x10,
                read: MsrReadAction::Alias(0x9999),
                write: MsrWriteAction::IgnoreWrite,
                init_value: 0,
                ignore_mask: 0,
                gp_mask: 0,
                name: "A",
                stats: Default::default(),
            }],
            !0,
            false,
        )
        .unwrap_err();
        assert_eq!(
            err,
            TableError::BrokenAlias {
                msr: 0x10,
                target: 0x9999
            }
        );
    }

    #[test]
    fn test_read_only_and_write_only() {
        let table = table(false);
        let mut state = MsrState::at_reset();
        assert_eq!(table.read(0x2001, &state).unwrap(), 0x5);
        assert_eq!(
            table.write(0x2001, 0, &mut state),
            Err(MsrError::InvalidAccess)
        );
        assert_eq!(table.read(0x2002, &state), Err(MsrError::InvalidAccess));
        table.write(0x2002, 0x77, &mut state).unwrap();
    }

    #[test]
    fn test_overlapping_insert_rejected() {
        let mut table = table(false);
        let err = table
            .insert(MsrRange::fixed(0x3f0, 0x410, "OVERLAP", 0))
            .unwrap_err();
        assert_eq!(
            err,
            TableError::DuplicateMsrRange {
                name: "OVERLAP",
                first: 0x3f0,
                last: 0x410
            }
        );
        // Prior lookups are unaffected.
        assert_eq!(table.find(0x300).unwrap().name, "P6_RESERVED");
        table.insert(MsrRange::fixed(0x400, 0x410, "OK", 0)).unwrap();
        assert_eq!(table.find(0x405).unwrap().name, "OK");
    }

    #[test]
    fn test_msr_mask_truncates_address() {
        let table = MsrRangeTable::new(
            vec![MsrRange::value(0x174, "IA32_SYSENTER_CS", MsrField::SysenterCs)],
            0xffff,
            false,
        )
        .unwrap();
        let mut state = MsrState::at_reset();
        // High address bits are not decoded on this profile.
        table.write(0xdead_0174, 0x8, &mut state).unwrap();
        assert_eq!(table.read(0x174, &state).unwrap(), 0x8);
    }

    #[test]
    fn test_synthetic_read() {
        let table = table(false);
        let mut state = MsrState::at_reset();
        state.tsc = 1000;
        state.tsc_offset = 24;
        assert_eq!(table.read(X86X_MSR_TSC, &state).unwrap(), 1024);
        // Writes land in the raw counter, not the offset.
        table.write(X86X_MSR_TSC, 5000, &mut state).unwrap();
        assert_eq!(state.tsc, 5000);
    }
}
