//! Tuner path management.

pub mod ledger;

pub use ledger::{
    ClaimKind, CompliancePolicy, LedgerError, LedgerSnapshot, PathClaim, PathId, RecordingClaim,
    ResourceLedger,
};
