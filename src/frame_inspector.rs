//! Engine checkpoints that follow EVM call frames
//!
//! revm reverts its own journal when a call frame fails. This inspector makes
//! the engine follow: every call or create frame opens an engine checkpoint,
//! committed when the frame returns successfully and reverted otherwise. A
//! grant made inside a sub-call that reverts is gone afterwards, even when the
//! caller swallows the failure and the transaction itself succeeds.

use crate::{executor::FhevmExecutor, journal::EngineCheckpoint};
use revm::{
    Inspector,
    interpreter::{
        CallInputs, CallOutcome, CreateInputs, CreateOutcome, InstructionResult,
        interpreter::EthInterpreter,
    },
};
use std::{cell::RefCell, rc::Rc};
use tracing::{debug, warn};

/// Inspector that mirrors frame boundaries onto the engine journal
#[derive(Clone)]
pub struct FrameCheckpointInspector {
    engine: Rc<RefCell<dyn FhevmExecutor>>,
    /// One entry per open frame; `None` if the engine was busy when it opened
    open: Vec<Option<EngineCheckpoint>>,
}

impl std::fmt::Debug for FrameCheckpointInspector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameCheckpointInspector")
            .field("open_frames", &self.open.len())
            .finish()
    }
}

impl FrameCheckpointInspector {
    pub fn new(engine: Rc<RefCell<dyn FhevmExecutor>>) -> Self {
        Self {
            engine,
            open: Vec::new(),
        }
    }

    /// Frames entered but not yet returned
    pub fn open_frames(&self) -> usize {
        self.open.len()
    }

    /// Forget frames left open by an aborted transaction
    pub fn reset(&mut self) {
        self.open.clear();
    }

    fn enter(&mut self) {
        let checkpoint = match self.engine.try_borrow_mut() {
            Ok(mut engine) => Some(engine.checkpoint()),
            Err(_) => {
                warn!("engine busy at frame start, frame is not checkpointed");
                None
            }
        };
        self.open.push(checkpoint);
    }

    fn exit(&mut self, result: InstructionResult) {
        let Some(checkpoint) = self.open.pop().flatten() else {
            return;
        };
        let Ok(mut engine) = self.engine.try_borrow_mut() else {
            warn!(?result, "engine busy at frame end, checkpoint left open");
            return;
        };

        if result.is_ok() {
            engine.checkpoint_commit();
        } else {
            debug!(?result, "frame failed, reverting its engine work");
            engine.checkpoint_revert(checkpoint);
        }
    }
}

impl<CTX> Inspector<CTX, EthInterpreter> for FrameCheckpointInspector {
    fn call(&mut self, _context: &mut CTX, _inputs: &mut CallInputs) -> Option<CallOutcome> {
        self.enter();
        None
    }

    fn call_end(&mut self, _context: &mut CTX, _inputs: &CallInputs, outcome: &mut CallOutcome) {
        self.exit(outcome.result.result);
    }

    fn create(&mut self, _context: &mut CTX, _inputs: &mut CreateInputs) -> Option<CreateOutcome> {
        self.enter();
        None
    }

    fn create_end(
        &mut self,
        _context: &mut CTX,
        _inputs: &CreateInputs,
        outcome: &mut CreateOutcome,
    ) {
        self.exit(outcome.result.result);
    }
}
