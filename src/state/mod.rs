//! Case state persistence
//!
//! One `state.json` per case under the configured state directory:
//! - Strict loads (missing document is an error, never a default)
//! - Atomic writes stamped with `updated_at`
//! - Per-case locks for read-modify-write cycles, released when idle

mod manager;

pub use manager::{validate_case_id, CaseGuard, StateStore, STATE_FILE};
