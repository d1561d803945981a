//! Staged sync.
//!
//! A [StagedSync] holds an ordered list of [Stage]s and runs them one after the other over a
//! single read-write transaction. Each stage persists how far it got; unwinding rolls stages
//! back in reverse order using the change-set log written by the execution stage.
//!
//! On top of the scheduler, the [Stepper] moves the state stages forward and backward in small
//! steps with consistency checks in between, and the [Miner] re-produces known blocks to check
//! that block production is deterministic.

pub mod chain_builder;
mod counter;
mod error;
pub mod mining;
mod scheduler;
mod stage;
pub mod stages;
mod stepper;

#[cfg(test)]
mod tests;

pub use error::SyncError;
pub use mining::{Miner, MiningBlock, MiningConfig};
pub use scheduler::{StageStatus, StagedSync};
pub use stage::{ExecFn, ExecInput, ExecOutput, ExecOverrideFn, Stage, StageId, UnwindState};
pub use stepper::{StepOutcome, StepPlan, Stepper, StepperConfig};
