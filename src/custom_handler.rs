//! Handler that leaves the transaction open
//!
//! Behaves like `MainnetHandler` but skips `commit_tx()` at the end of
//! execution, with or without an inspector. The
//! [`TransactionCoordinator`](crate::transaction_coordinator::TransactionCoordinator)
//! then commits or reverts the EVM journal together with the engine journal.

use revm::{
    Inspector,
    context::{LocalContextTr, result::ExecutionResult},
    context_interface::{ContextError, ContextTr, JournalTr, result::HaltReason},
    handler::{EthFrame, EvmTr, EvmTrError, FrameResult, FrameTr, Handler, post_execution},
    inspector::{InspectorEvmTr, InspectorHandler},
    interpreter::{interpreter::EthInterpreter, interpreter_action::FrameInit},
    state::EvmState,
};

/// Handler that defers the transaction commit to the coordinator
#[derive(Debug, Clone)]
pub struct DeferredCommitHandler<CTX, ERROR, FRAME> {
    pub _phantom: core::marker::PhantomData<(CTX, ERROR, FRAME)>,
}

impl<CTX, ERROR, FRAME> DeferredCommitHandler<CTX, ERROR, FRAME> {
    pub const fn new() -> Self {
        Self {
            _phantom: core::marker::PhantomData,
        }
    }
}

impl<CTX, ERROR, FRAME> Default for DeferredCommitHandler<CTX, ERROR, FRAME> {
    fn default() -> Self {
        Self::new()
    }
}

impl<EVM, ERROR, FRAME> Handler for DeferredCommitHandler<EVM, ERROR, FRAME>
where
    EVM: EvmTr<Context: ContextTr<Journal: JournalTr<State = EvmState>>, Frame = FRAME>,
    ERROR: EvmTrError<EVM>,
    FRAME: FrameTr<FrameResult = FrameResult, FrameInit = FrameInit>,
{
    type Evm = EVM;
    type Error = ERROR;
    type HaltReason = HaltReason;

    /// Same as the default `execution_result`, minus `commit_tx()`
    #[inline]
    fn execution_result(
        &mut self,
        evm: &mut Self::Evm,
        result: <<Self::Evm as EvmTr>::Frame as FrameTr>::FrameResult,
    ) -> Result<ExecutionResult<Self::HaltReason>, Self::Error> {
        match core::mem::replace(evm.ctx().error(), Ok(())) {
            Err(ContextError::Db(e)) => return Err(e.into()),
            Err(ContextError::Custom(e)) => return Err(Self::Error::from_string(e)),
            Ok(()) => (),
        }

        let exec_result = post_execution::output(evm.ctx(), result);

        // No commit_tx(): engine handles minted during this transaction must
        // stay revertible until the coordinator decides.

        evm.ctx().local_mut().clear();
        evm.frame_stack().clear();

        Ok(exec_result)
    }
}

/// Lets the host run transactions with frame inspection (`inspect_run`)
impl<EVM, ERROR> InspectorHandler for DeferredCommitHandler<EVM, ERROR, EthFrame<EthInterpreter>>
where
    EVM: InspectorEvmTr<
            Context: ContextTr<Journal: JournalTr<State = EvmState>>,
            Frame = EthFrame<EthInterpreter>,
            Inspector: Inspector<<<Self as Handler>::Evm as EvmTr>::Context, EthInterpreter>,
        >,
    ERROR: EvmTrError<EVM>,
{
    type IT = EthInterpreter;
}
