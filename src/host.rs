//! EVM host with the FHEVM executor precompile installed
//!
//! Every transaction runs under the [`DeferredCommitHandler`] and is committed
//! or reverted by the [`TransactionCoordinator`] together with the engine, so
//! a reverted transaction never leaves handles, permission rows or consumed
//! proofs behind. Inside a transaction the [`FrameCheckpointInspector`] does the
//! same per call frame.

use crate::{
    backend::FheBackend,
    custom_handler::DeferredCommitHandler,
    engine::FhevmEngine,
    executor::FhevmExecutor,
    frame_inspector::FrameCheckpointInspector,
    journal::EngineCheckpoint,
    precompiles::{FHEVM_EXECUTOR_ADDRESS, FhevmPrecompileProvider},
    transaction_coordinator::TransactionCoordinator,
    types::HandleId,
};
use alloy_sol_types::{Revert, SolCall, SolError, SolValue};
use anyhow::{Result, anyhow, bail};
use revm::{
    MainContext,
    bytecode::Bytecode,
    context::{
        BlockEnv,
        CfgEnv,
        Context,
        ContextSetters,
        ContextTr,
        Evm,
        FrameStack,
        Journal,
        LocalContext,
        TxEnv,
        result::{ExecutionResult, InvalidTransaction},
    },
    context_interface::{JournalTr, journaled_state::JournalCheckpoint, result::EVMError},
    database::InMemoryDB,
    handler::{EthFrame, instructions::EthInstructions},
    inspector::InspectorHandler,
    interpreter::interpreter::EthInterpreter,
    primitives::{Address, B256, Bytes, TxKind, hardfork::SpecId},
    state::AccountInfo,
};
use std::{
    cell::{Ref, RefCell, RefMut},
    rc::Rc,
    sync::Arc,
};
use tracing::debug;

pub type EvmContext =
    Context<BlockEnv, TxEnv, CfgEnv, InMemoryDB, Journal<InMemoryDB>, (), LocalContext>;

pub type FhevmEvm = Evm<
    EvmContext,
    FrameCheckpointInspector,
    EthInstructions<EthInterpreter, EvmContext>,
    FhevmPrecompileProvider,
    EthFrame<EthInterpreter>,
>;

type HostError = EVMError<core::convert::Infallible, InvalidTransaction>;

const DEFAULT_GAS_LIMIT: u64 = 1_000_000;

/// revm instance plus the engine behind its executor precompile
pub struct FhevmHost<B: FheBackend + 'static> {
    pub evm: FhevmEvm,
    engine: Rc<RefCell<FhevmEngine<B>>>,
    coordinator: Arc<TransactionCoordinator>,
    /// Set when revm discarded its journal during the open transaction
    evm_discarded: bool,
    gas_limit: u64,
}

impl<B: FheBackend + 'static> std::fmt::Debug for FhevmHost<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FhevmHost")
            .field("engine", &self.engine)
            .field("coordinator", &self.coordinator)
            .field("gas_limit", &self.gas_limit)
            .finish()
    }
}

impl<B: FheBackend + 'static> FhevmHost<B> {
    pub fn new(engine: FhevmEngine<B>) -> Self {
        let engine = Rc::new(RefCell::new(engine));
        let executor: Rc<RefCell<dyn FhevmExecutor>> = engine.clone();
        let coordinator = Arc::new(TransactionCoordinator::new());

        let ctx = Context::mainnet().with_db(InMemoryDB::default());
        let evm = Evm {
            ctx,
            inspector: FrameCheckpointInspector::new(executor.clone()),
            instruction: EthInstructions::new_mainnet(),
            precompiles: FhevmPrecompileProvider::new_with_coordinator(
                SpecId::CANCUN,
                executor,
                coordinator.clone(),
            ),
            frame_stack: FrameStack::new(),
        };

        Self {
            evm,
            engine,
            coordinator,
            evm_discarded: false,
            gas_limit: DEFAULT_GAS_LIMIT,
        }
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = gas_limit;
        self
    }

    pub fn engine(&self) -> Ref<'_, FhevmEngine<B>> {
        self.engine.borrow()
    }

    /// Direct engine access for host-level authority (maintenance, setup)
    pub fn engine_mut(&self) -> RefMut<'_, FhevmEngine<B>> {
        self.engine.borrow_mut()
    }

    pub fn coordinator(&self) -> &Arc<TransactionCoordinator> {
        &self.coordinator
    }

    /// Install runtime bytecode at `address`
    ///
    /// Writes to the database, so it must happen before the account is first
    /// touched by a transaction.
    pub fn deploy(&mut self, address: Address, code: Bytes) {
        let bytecode = Bytecode::new_raw(code);
        let info = AccountInfo {
            code_hash: bytecode.hash_slow(),
            code: Some(bytecode),
            ..Default::default()
        };
        self.evm.ctx.db_mut().insert_account_info(address, info);
    }

    /// Current nonce of `account` in the EVM journal
    pub fn nonce(&mut self, account: Address) -> Result<u64> {
        Ok(self.evm.ctx.journal_mut().load_account(account)?.info.nonce)
    }

    /// Execute one transaction from `from` to `to`
    ///
    /// Unless the transaction succeeds, every EVM and engine effect it had is
    /// rolled back. Inside [`FhevmHost::atomic`] a failure marks the whole
    /// section for rollback instead.
    pub fn transact(&mut self, from: Address, to: Address, data: Bytes) -> Result<ExecutionResult> {
        let nonce = self.nonce(from)?;
        let tx = TxEnv::builder()
            .caller(from)
            .kind(TxKind::Call(to))
            .data(data)
            .gas_limit(self.gas_limit)
            .nonce(nonce)
            .build()
            .map_err(|e| anyhow!("invalid transaction: {e:?}"))?;

        let checkpoints = self.begin();
        self.evm.ctx.set_tx(tx);

        self.evm.inspector.reset();
        let mut handler: DeferredCommitHandler<_, HostError, _> = DeferredCommitHandler::new();
        let outcome = handler.inspect_run(&mut self.evm);
        if outcome.is_err() {
            self.evm_discarded = true;
        }

        let succeeded = matches!(outcome, Ok(ExecutionResult::Success { .. }));
        self.finish(succeeded, checkpoints);

        let result = outcome.map_err(|e| anyhow!("EVM error: {e:?}"))?;
        debug!(
            %from,
            %to,
            success = result.is_success(),
            gas_used = result.gas_used(),
            "transaction executed"
        );
        Ok(result)
    }

    /// Call the executor precompile from `from`, returning its return data
    pub fn call_executor<C: SolCall>(&mut self, from: Address, call: &C) -> Result<Bytes> {
        let data = Bytes::from(call.abi_encode());
        match self.transact(from, FHEVM_EXECUTOR_ADDRESS, data)? {
            ExecutionResult::Success { output, .. } => Ok(output.into_data()),
            ExecutionResult::Revert { output, .. } => {
                let reason = Revert::abi_decode(&output)
                    .map(|revert| revert.reason)
                    .unwrap_or_else(|_| format!("0x{}", hex::encode(&output)));
                bail!("{} reverted: {reason}", C::SIGNATURE)
            }
            ExecutionResult::Halt { reason, .. } => bail!("{} halted: {reason:?}", C::SIGNATURE),
        }
    }

    /// Call an executor function that returns a handle
    pub fn call_for_handle<C: SolCall>(&mut self, from: Address, call: &C) -> Result<HandleId> {
        let output = self.call_executor(from, call)?;
        Ok(HandleId(B256::abi_decode(&output)?))
    }

    /// Run several transactions as one unit
    pub fn atomic<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let checkpoints = self.begin();
        let outcome = f(self);
        let succeeded = outcome.is_ok() && !self.coordinator.has_error();
        self.finish(succeeded, checkpoints);

        match outcome {
            Ok(_) if !succeeded => bail!("atomic section rolled back after a failed transaction"),
            other => other,
        }
    }

    fn begin(&mut self) -> (JournalCheckpoint, EngineCheckpoint) {
        if !self.coordinator.in_transaction() {
            self.evm_discarded = false;
        }
        let mut engine = self.engine.borrow_mut();
        self.coordinator
            .begin_transaction(self.evm.ctx.journal_mut(), &mut *engine)
    }

    fn finish(&mut self, succeeded: bool, checkpoints: (JournalCheckpoint, EngineCheckpoint)) {
        let (evm_checkpoint, engine_checkpoint) = checkpoints;
        let mut engine = self.engine.borrow_mut();
        let journal = self.evm.ctx.journal_mut();

        if self.evm_discarded {
            self.coordinator.abort_transaction(journal, &mut *engine);
        } else if succeeded && !self.coordinator.has_error() {
            self.coordinator.commit_transaction(journal, &mut *engine);
        } else {
            self.coordinator
                .revert_transaction(journal, &mut *engine, evm_checkpoint, engine_checkpoint);
        }
    }
}
