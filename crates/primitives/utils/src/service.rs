//! Cooperative cancellation shared by the node's long running loops.
//!
//! The stepper and the miner run on a blocking thread and poll
//! [ServiceContext::is_cancelled] between steps. The node cancels the context
//! on ctrl-c or SIGTERM.
use tokio_util::sync::CancellationToken;

#[derive(Clone, Default)]
pub struct ServiceContext {
    token: CancellationToken,
}

impl ServiceContext {
    /// Creates a new [Default] [ServiceContext]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_for_testing() -> Self {
        Self::default()
    }

    /// Stops every loop holding a clone of this context.
    pub fn cancel_global(&self) {
        tracing::info!("🔌 Gracefully shutting down");

        self.token.cancel();
    }

    /// Checks if this context was cancelled. Never blocks.
    #[inline(always)]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_reaches_clones() {
        let ctx = ServiceContext::new_for_testing();
        let stepper_ctx = ctx.clone();
        assert!(!stepper_ctx.is_cancelled());
        ctx.cancel_global();
        assert!(stepper_ctx.is_cancelled());
    }
}
