use crate::{executor::FhevmExecutor, transaction_coordinator::TransactionCoordinator};
use alloy_sol_types::{Revert, SolError};
use revm::{
    context::Cfg,
    context_interface::{ContextTr, LocalContextTr},
    handler::{EthPrecompiles, PrecompileProvider},
    interpreter::{CallInput, CallInputs, Gas, InstructionResult, InterpreterResult},
    precompile::PrecompileOutput,
    primitives::{Address, Bytes, address, hardfork::SpecId},
};
use std::{cell::RefCell, rc::Rc, sync::Arc};
use tracing::warn;

/// Address of the FHEVM executor precompile
///
/// Contracts call it with `IFhevmExecutor` calldata:
/// ```solidity
/// bytes32 sum = IFhevmExecutor(FHEVM_EXECUTOR).fheAdd(balance, amount);
/// IFhevmExecutor(FHEVM_EXECUTOR).allow(sum, address(this), 0);
/// ```
pub const FHEVM_EXECUTOR_ADDRESS: Address = address!("00000000000000000000000000000000000000E0");

/// Precompile provider that serves the executor next to the standard Ethereum precompiles
#[derive(Clone)]
pub struct FhevmPrecompileProvider {
    inner: EthPrecompiles,
    spec: SpecId,
    executor: Rc<RefCell<dyn FhevmExecutor>>,
    /// Optional coordinator for atomic EVM + engine transactions
    coordinator: Option<Arc<TransactionCoordinator>>,
}

impl std::fmt::Debug for FhevmPrecompileProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FhevmPrecompileProvider")
            .field("spec", &self.spec)
            .field("has_coordinator", &self.coordinator.is_some())
            .finish()
    }
}

impl FhevmPrecompileProvider {
    /// Create a provider whose executor calls commit on their own
    ///
    /// # Arguments
    /// * `spec` - The EVM specification ID
    /// * `executor` - Engine the precompile dispatches into
    pub fn new(spec: SpecId, executor: Rc<RefCell<dyn FhevmExecutor>>) -> Self {
        Self {
            inner: EthPrecompiles::default(),
            spec,
            executor,
            coordinator: None,
        }
    }

    /// Create a provider that reports into a transaction coordinator
    ///
    /// # Arguments
    /// * `spec` - The EVM specification ID
    /// * `executor` - Engine the precompile dispatches into
    /// * `coordinator` - Coordinator that commits or reverts EVM and engine together
    pub fn new_with_coordinator(
        spec: SpecId,
        executor: Rc<RefCell<dyn FhevmExecutor>>,
        coordinator: Arc<TransactionCoordinator>,
    ) -> Self {
        Self {
            inner: EthPrecompiles::default(),
            spec,
            executor,
            coordinator: Some(coordinator),
        }
    }
}

impl<CTX> PrecompileProvider<CTX> for FhevmPrecompileProvider
where
    CTX: ContextTr<Cfg: Cfg<Spec = SpecId>>,
{
    type Output = InterpreterResult;

    fn set_spec(&mut self, spec: <CTX::Cfg as Cfg>::Spec) -> bool {
        if spec == self.spec {
            return false;
        }
        self.spec = spec;
        self.inner = EthPrecompiles::default();
        true
    }

    fn run(
        &mut self,
        context: &mut CTX,
        inputs: &CallInputs,
    ) -> Result<Option<Self::Output>, String> {
        if inputs.bytecode_address == FHEVM_EXECUTOR_ADDRESS {
            return Ok(Some(run_executor_precompile(
                &self.executor,
                &self.coordinator,
                context,
                inputs,
            )?));
        }

        self.inner.run(context, inputs)
    }

    fn warm_addresses(&self) -> Box<impl Iterator<Item = Address>> {
        let mut addresses = vec![FHEVM_EXECUTOR_ADDRESS];
        addresses.extend(self.inner.warm_addresses());
        Box::new(addresses.into_iter())
    }

    fn contains(&self, address: &Address) -> bool {
        *address == FHEVM_EXECUTOR_ADDRESS || self.inner.contains(address)
    }
}

/// Runs one executor call.
///
/// Engine refusals (bad proof, missing permission, type mismatch) revert the
/// calling frame with an `Error(string)` payload. A backend failure is fatal:
/// the coordinator is told to roll back the whole transaction.
fn run_executor_precompile<CTX: ContextTr>(
    executor: &Rc<RefCell<dyn FhevmExecutor>>,
    coordinator: &Option<Arc<TransactionCoordinator>>,
    context: &mut CTX,
    inputs: &CallInputs,
) -> Result<InterpreterResult, String> {
    let input_bytes = match &inputs.input {
        CallInput::SharedBuffer(range) => context
            .local()
            .shared_memory_buffer_slice(range.clone())
            .map(|slice| slice.to_vec())
            .unwrap_or_default(),
        CallInput::Bytes(bytes) => bytes.0.to_vec(),
    };

    if let Some(coord) = coordinator {
        coord.enter_executor_call();
    }

    let outcome = match executor.try_borrow_mut() {
        Ok(mut executor) => executor
            .execute(inputs.caller, &input_bytes, inputs.is_static)
            .map_err(|e| (e.is_fatal(), e.to_string())),
        Err(_) => Err((true, "executor is already borrowed".to_string())),
    };

    let result = match outcome {
        Ok(executed) => {
            let precompile_output = PrecompileOutput::new(executed.gas_used, executed.output);
            let mut interpreter_result = InterpreterResult {
                result: InstructionResult::Return,
                gas: Gas::new(inputs.gas_limit),
                output: precompile_output.bytes,
            };
            let underflow = interpreter_result
                .gas
                .record_cost(precompile_output.gas_used);
            if !underflow {
                interpreter_result.result = InstructionResult::PrecompileOOG;
                // engine state already moved; without frame checkpoints only a full
                // rollback undoes it
                if let Some(coord) = coordinator {
                    coord.mark_error();
                }
            }
            Ok(interpreter_result)
        }
        Err((false, reason)) => {
            warn!(caller = %inputs.caller, %reason, "executor call reverted");
            Ok(InterpreterResult {
                result: InstructionResult::Revert,
                gas: Gas::new(inputs.gas_limit),
                output: Bytes::from(Revert { reason }.abi_encode()),
            })
        }
        Err((true, reason)) => {
            if let Some(coord) = coordinator {
                coord.mark_error();
            }
            Err(format!("FHEVM executor failure: {reason}"))
        }
    };

    if let Some(coord) = coordinator {
        coord.exit_executor_call();
    }

    result
}
