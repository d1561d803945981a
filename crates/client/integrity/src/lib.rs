//! Consistency checks for the staged sync.
//!
//! Every check returns a [ConsistencyViolation] on failure instead of aborting, the caller decides
//! to stop. The checks are:
//! - [check_change_set] / [check_changes]: the persisted change-set log against an independently
//!   recorded shadow ([ExpectedChangeSets]),
//! - [check_history]: every logged change is present in the history index,
//! - [check_mined_block]: a locally produced block commits to the same data as the known one,
//! - [check_trie] and [compare_states]: state commitment and reference store diffs.

mod changes;
mod compare;
mod error;
mod mined;
mod shadow;
mod trie;

pub use changes::{check_change_set, check_changes, check_history};
pub use compare::compare_states;
pub use error::{ConsistencyViolation, IntegrityError};
pub use mined::check_mined_block;
pub use shadow::ExpectedChangeSets;
pub use trie::check_trie;
