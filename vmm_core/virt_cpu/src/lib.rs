// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The CPU identity and MSR virtualization core.
//!
//! This crate classifies a virtual CPU's identity into a canonical
//! microarchitecture, stores the CPUID leaves and MSR ranges a guest may
//! observe, dispatches guest RDMSR/WRMSR/CPUID accesses to the matching
//! emulation routine, aggregates probe data into a dense feature set, and
//! tracks interrupt/NMI inhibition state including its projection into
//! nested VMX/SVM guest mode.
//!
//! Guest-visible faults are returned to the calling instruction emulator as
//! typed results; this crate never injects exceptions itself.

#![forbid(unsafe_code)]

pub mod cpuid;
pub mod db;
pub mod features;
pub mod inhibit;
pub mod msr;
pub mod nested;
pub mod saved_state;
pub mod vp;

use thiserror::Error;

/// Error returned by MSR emulation routines.
#[derive(Debug, PartialEq, Eq)]
pub enum MsrError {
    /// The MSR is not implemented. Depending on the configuration, this
    /// should either be ignored (returning 0 for reads) or should result in
    /// a #GP.
    Unknown,
    /// The MSR is implemented but this is an invalid read or write and
    /// should always result in a #GP.
    InvalidAccess,
    /// An MSR alias chain failed to terminate. This is an internal table
    /// consistency failure; the caller must treat it as fatal rather than
    /// delivering a fault to the guest.
    AliasLoop,
}

/// Extension trait to chain MSR accesses together.
pub trait MsrErrorExt: Sized {
    /// Calls `f` if `self` is `Err(MsrError::Unknown)`.
    fn or_else_if_unknown(self, f: impl FnOnce() -> Self) -> Self;
}

impl<T> MsrErrorExt for Result<T, MsrError> {
    fn or_else_if_unknown(self, f: impl FnOnce() -> Self) -> Self {
        match self {
            Err(MsrError::Unknown) => f(),
            r => r,
        }
    }
}

/// Error raised while building the CPUID leaf or MSR range tables.
///
/// These are configuration-time failures: they abort VM construction and
/// are never visible to the guest.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TableError {
    /// A CPUID leaf with the same post-mask function/index key already
    /// exists.
    #[error("duplicate cpuid leaf {function:#x}/{index:#x}")]
    DuplicateCpuidLeaf {
        /// The CPUID function of the rejected leaf.
        function: u32,
        /// The (masked) index of the rejected leaf.
        index: u32,
    },
    /// An MSR range overlaps a range already in the table.
    #[error("msr range {name} ({first:#x}..={last:#x}) overlaps an existing range")]
    DuplicateMsrRange {
        /// The diagnostic name of the rejected range.
        name: &'static str,
        /// First MSR covered by the rejected range.
        first: u32,
        /// Last MSR covered by the rejected range.
        last: u32,
    },
    /// An MSR alias chain loops back on itself.
    #[error("msr alias loop starting at {msr:#x}")]
    AliasCycle {
        /// The MSR at which the loop was detected.
        msr: u32,
    },
    /// An MSR alias points at an address no range covers.
    #[error("msr alias target {target:#x} (from {msr:#x}) is not covered by any range")]
    BrokenAlias {
        /// The aliasing MSR.
        msr: u32,
        /// The uncovered target address.
        target: u32,
    },
}
