use crate::{
    stage::{ExecFn, ExecInput, ExecOutput, Stage, StageId, UnwindState},
    SyncError,
};
use alloy_primitives::B256;
use kc_db::RwTx;
use std::{fmt, time::Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StageStatus {
    #[default]
    Idle,
    Forward,
    Unwinding,
    /// Terminal for the current cycle.
    Failed,
}

struct StageEntry {
    stage: Box<dyn Stage>,
    enabled: bool,
    exec: ExecFn,
    status: StageStatus,
}

/// Ordered list of stages and the driver of one pass over them.
///
/// The scheduler never commits nor rolls back: on error the caller owns the transaction and
/// decides what to do with it.
pub struct StagedSync {
    stages: Vec<StageEntry>,
    current: Option<StageId>,
}

impl fmt::Debug for StagedSync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagedSync")
            .field(
                "stages",
                &self.stages.iter().map(|entry| (entry.stage.id(), entry.enabled, entry.status)).collect::<Vec<_>>(),
            )
            .field("current", &self.current)
            .finish()
    }
}

impl StagedSync {
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self {
            stages: stages
                .into_iter()
                .map(|stage| StageEntry { stage, enabled: true, exec: ExecFn::Default, status: StageStatus::Idle })
                .collect(),
            current: None,
        }
    }

    fn entry_mut(&mut self, id: StageId) -> Result<&mut StageEntry, SyncError> {
        self.stages.iter_mut().find(|entry| entry.stage.id() == id).ok_or(SyncError::UnknownStage(id))
    }

    fn entry(&self, id: StageId) -> Option<&StageEntry> {
        self.stages.iter().find(|entry| entry.stage.id() == id)
    }

    pub fn stage_ids(&self) -> Vec<StageId> {
        self.stages.iter().map(|entry| entry.stage.id()).collect()
    }

    pub fn disable_stages(&mut self, ids: &[StageId]) {
        for entry in self.stages.iter_mut().filter(|entry| ids.contains(&entry.stage.id())) {
            entry.enabled = false;
        }
    }

    pub fn enable_stages(&mut self, ids: &[StageId]) {
        for entry in self.stages.iter_mut().filter(|entry| ids.contains(&entry.stage.id())) {
            entry.enabled = true;
        }
    }

    pub fn disable_all(&mut self) {
        for entry in &mut self.stages {
            entry.enabled = false;
        }
    }

    pub fn is_enabled(&self, id: StageId) -> bool {
        self.entry(id).is_some_and(|entry| entry.enabled)
    }

    pub fn status(&self, id: StageId) -> Option<StageStatus> {
        self.entry(id).map(|entry| entry.status)
    }

    /// Runs `f` instead of the stage's own execution until [StagedSync::clear_exec_override].
    pub fn set_exec_override(
        &mut self,
        id: StageId,
        f: impl FnMut(&mut RwTx, ExecInput) -> anyhow::Result<ExecOutput> + Send + 'static,
    ) -> Result<(), SyncError> {
        self.entry_mut(id)?.exec = ExecFn::Override(Box::new(f));
        Ok(())
    }

    pub fn clear_exec_override(&mut self, id: StageId) -> Result<(), SyncError> {
        self.entry_mut(id)?.exec = ExecFn::Default;
        Ok(())
    }

    /// Only used for progress reporting.
    pub fn set_current_stage(&mut self, id: StageId) -> Result<(), SyncError> {
        self.entry_mut(id)?;
        self.current = Some(id);
        Ok(())
    }

    pub fn current_stage(&self) -> Option<StageId> {
        self.current
    }

    /// Runs every enabled stage once, in registration order. The first error aborts the cycle.
    #[tracing::instrument(skip(self, tx))]
    pub fn run_cycle(&mut self, tx: &mut RwTx, first_cycle: bool) -> Result<(), SyncError> {
        for entry in self.stages.iter_mut().filter(|entry| entry.enabled) {
            let id = entry.stage.id();
            self.current = Some(id);
            let stage_progress = tx.get_stage_progress(id.as_str())?;

            entry.status = StageStatus::Forward;
            let started = Instant::now();
            let output = match entry.exec.run(entry.stage.as_mut(), tx, ExecInput { stage_progress, first_cycle }) {
                Ok(output) => output,
                Err(err) => {
                    entry.status = StageStatus::Failed;
                    return Err(SyncError::stage(id)(err));
                }
            };
            if output.progress < stage_progress {
                entry.status = StageStatus::Failed;
                return Err(SyncError::stage(id)(anyhow::anyhow!(
                    "Progress went backward from {stage_progress} to {} outside of an unwind",
                    output.progress
                )));
            }
            if output.progress != stage_progress {
                tx.write_stage_progress(id.as_str(), output.progress);
                tracing::info!(
                    target: "stage_runs",
                    stage = id.as_str(),
                    from = stage_progress,
                    to = output.progress,
                    elapsed = started.elapsed().as_micros(),
                    "Stage {id} progressed {stage_progress} -> {}",
                    output.progress
                );
            }
            entry.status = StageStatus::Idle;
        }
        Ok(())
    }

    /// Unwinds every enabled stage whose progress is above `target`, in reverse registration
    /// order. Stages unwound before an error stay unwound.
    #[tracing::instrument(skip(self, tx))]
    pub fn unwind_to(&mut self, tx: &mut RwTx, target: u64, bad_block: Option<B256>) -> Result<(), SyncError> {
        if let Some(hash) = bad_block {
            tracing::warn!("⚠️ Unwinding to block {target} because of bad block {hash:#x}");
        }
        for entry in self.stages.iter_mut().rev().filter(|entry| entry.enabled) {
            let id = entry.stage.id();
            let progress = tx.get_stage_progress(id.as_str())?;
            if progress <= target {
                continue;
            }
            self.current = Some(id);
            let unwind = UnwindState::new(id, target, progress)?;

            entry.status = StageStatus::Unwinding;
            if let Err(err) = entry.stage.unwind(tx, &unwind) {
                entry.status = StageStatus::Failed;
                return Err(SyncError::stage(id)(err));
            }
            tx.write_stage_progress(id.as_str(), target);
            entry.status = StageStatus::Idle;
            tracing::debug!("Stage {id} unwound {progress} -> {target}");
        }
        Ok(())
    }
}
