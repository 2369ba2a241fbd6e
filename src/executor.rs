//! Executor ABI exposed to EVM contracts
//!
//! Contracts reach the engine through the precompile at
//! [`FHEVM_EXECUTOR_ADDRESS`](crate::precompiles::FHEVM_EXECUTOR_ADDRESS),
//! calling the functions of [`IFhevmExecutor`]. The calling contract's address
//! is the principal for every check.
//!
//! Through this surface a contract may only grant on a handle it holds USE on
//! or that it created. Revoking another principal's row is reserved to the
//! creator. Calls that change state are refused in a static context.

use alloy_sol_types::{SolInterface, SolValue, sol};
use revm::primitives::{Address, B256, Bytes};
use thiserror::Error;
use tracing::debug;

use crate::{
    backend::FheBackend,
    config::GasSchedule,
    engine::FhevmEngine,
    error::EngineError,
    journal::EngineJournal,
    ops::OpKind,
    types::{Capability, HandleId, Principal, TypeTag},
};

use IFhevmExecutor::IFhevmExecutorCalls;

sol! {
    interface IFhevmExecutor {
        function verifyInput(bytes ciphertext, bytes inputProof, address user) external returns (bytes32);
        function trivialEncrypt(uint256 plaintext, uint8 fheType) external returns (bytes32);

        function fheAdd(bytes32 lhs, bytes32 rhs) external returns (bytes32);
        function fheSub(bytes32 lhs, bytes32 rhs) external returns (bytes32);
        function fheMul(bytes32 lhs, bytes32 rhs) external returns (bytes32);
        function fheDiv(bytes32 lhs, bytes32 rhs) external returns (bytes32);
        function fheRem(bytes32 lhs, bytes32 rhs) external returns (bytes32);
        function fheBitAnd(bytes32 lhs, bytes32 rhs) external returns (bytes32);
        function fheBitOr(bytes32 lhs, bytes32 rhs) external returns (bytes32);
        function fheBitXor(bytes32 lhs, bytes32 rhs) external returns (bytes32);
        function fheShl(bytes32 lhs, bytes32 rhs) external returns (bytes32);
        function fheShr(bytes32 lhs, bytes32 rhs) external returns (bytes32);
        function fheMin(bytes32 lhs, bytes32 rhs) external returns (bytes32);
        function fheMax(bytes32 lhs, bytes32 rhs) external returns (bytes32);
        function fheEq(bytes32 lhs, bytes32 rhs) external returns (bytes32);
        function fheNe(bytes32 lhs, bytes32 rhs) external returns (bytes32);
        function fheLt(bytes32 lhs, bytes32 rhs) external returns (bytes32);
        function fheLe(bytes32 lhs, bytes32 rhs) external returns (bytes32);
        function fheGt(bytes32 lhs, bytes32 rhs) external returns (bytes32);
        function fheGe(bytes32 lhs, bytes32 rhs) external returns (bytes32);
        function fheNeg(bytes32 ct) external returns (bytes32);
        function fheNot(bytes32 ct) external returns (bytes32);
        function fheIfThenElse(bytes32 control, bytes32 ifTrue, bytes32 ifFalse) external returns (bytes32);

        function allow(bytes32 handle, address account, uint8 capability) external;
        function allowTransient(bytes32 handle, address account, uint8 capability) external;
        function revoke(bytes32 handle, address account, uint8 capability) external;
        function isAllowed(bytes32 handle, address account, uint8 capability) external view returns (bool);
    }
}

/// Successful executor call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorOutput {
    /// ABI-encoded return data
    pub output: Bytes,
    pub gas_used: u64,
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Calldata does not match the executor ABI
    #[error("undecodable executor call: {0}")]
    Decode(String),

    /// State-changing call made through STATICCALL
    #[error("{0} is not allowed in a static call")]
    StaticCall(&'static str),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl ExecutorError {
    /// Failures that must abort the whole surrounding transaction
    pub fn is_fatal(&self) -> bool {
        matches!(self, ExecutorError::Engine(EngineError::BackendFailure(_)))
    }
}

/// Entry point the precompile dispatches into
pub trait FhevmExecutor: EngineJournal + std::fmt::Debug {
    fn execute(
        &mut self,
        caller: Address,
        input: &[u8],
        is_static: bool,
    ) -> Result<ExecutorOutput, ExecutorError>;
}

impl<B: FheBackend> FhevmExecutor for FhevmEngine<B> {
    fn execute(
        &mut self,
        caller: Address,
        input: &[u8],
        is_static: bool,
    ) -> Result<ExecutorOutput, ExecutorError> {
        let call = IFhevmExecutorCalls::abi_decode(input)
            .map_err(|e| ExecutorError::Decode(e.to_string()))?;
        let name = call_name(&call);
        if is_static && !matches!(call, IFhevmExecutorCalls::isAllowed(_)) {
            return Err(ExecutorError::StaticCall(name));
        }

        let caller = Principal(caller);
        let gas = self.config().precompile.gas.clone();

        let (output, gas_used) = match call {
            IFhevmExecutorCalls::verifyInput(c) => {
                let handle = self.verify_and_ingest(
                    &c.ciphertext,
                    &c.inputProof,
                    Principal(c.user),
                    caller,
                )?;
                (encode_handle(handle), gas.verify_input)
            }
            IFhevmExecutorCalls::trivialEncrypt(c) => {
                let tag = TypeTag::from_code(c.fheType).ok_or_else(|| {
                    ExecutorError::Decode(format!("unknown type code {}", c.fheType))
                })?;
                let handle = self.trivial_encrypt(tag, c.plaintext, caller)?;
                (encode_handle(handle), gas.trivial_encrypt)
            }
            IFhevmExecutorCalls::allow(c) => {
                let (handle, account, capability) =
                    authorize_acl_change(self, c.handle, c.account, c.capability, caller)?;
                self.grant(handle, account, capability)?;
                (Bytes::new(), gas.acl)
            }
            IFhevmExecutorCalls::allowTransient(c) => {
                let (handle, account, capability) =
                    authorize_acl_change(self, c.handle, c.account, c.capability, caller)?;
                self.grant_transient(handle, account, capability)?;
                (Bytes::new(), gas.acl)
            }
            IFhevmExecutorCalls::revoke(c) => {
                let (handle, account, capability) =
                    authorize_revoke(self, c.handle, c.account, c.capability, caller)?;
                self.revoke(handle, account, capability)?;
                (Bytes::new(), gas.acl)
            }
            IFhevmExecutorCalls::isAllowed(c) => {
                let capability = decode_capability(c.capability)?;
                let allowed = self.check(HandleId(c.handle), Principal(c.account), capability);
                (Bytes::from(allowed.abi_encode()), gas.acl)
            }
            other => {
                let Some((op, operands)) = operation(&other) else {
                    return Err(ExecutorError::Decode(format!("unsupported call {name}")));
                };
                compute(self, op, &operands, caller, &gas)?
            }
        };

        debug!(%caller, call = name, gas_used, "executor call completed");
        Ok(ExecutorOutput { output, gas_used })
    }
}

/// Operation and operand handles of a compute call
fn operation(call: &IFhevmExecutorCalls) -> Option<(OpKind, Vec<B256>)> {
    let binary = |op, lhs: B256, rhs: B256| Some((op, vec![lhs, rhs]));
    match call {
        IFhevmExecutorCalls::fheAdd(c) => binary(OpKind::Add, c.lhs, c.rhs),
        IFhevmExecutorCalls::fheSub(c) => binary(OpKind::Sub, c.lhs, c.rhs),
        IFhevmExecutorCalls::fheMul(c) => binary(OpKind::Mul, c.lhs, c.rhs),
        IFhevmExecutorCalls::fheDiv(c) => binary(OpKind::Div, c.lhs, c.rhs),
        IFhevmExecutorCalls::fheRem(c) => binary(OpKind::Rem, c.lhs, c.rhs),
        IFhevmExecutorCalls::fheBitAnd(c) => binary(OpKind::BitAnd, c.lhs, c.rhs),
        IFhevmExecutorCalls::fheBitOr(c) => binary(OpKind::BitOr, c.lhs, c.rhs),
        IFhevmExecutorCalls::fheBitXor(c) => binary(OpKind::BitXor, c.lhs, c.rhs),
        IFhevmExecutorCalls::fheShl(c) => binary(OpKind::Shl, c.lhs, c.rhs),
        IFhevmExecutorCalls::fheShr(c) => binary(OpKind::Shr, c.lhs, c.rhs),
        IFhevmExecutorCalls::fheMin(c) => binary(OpKind::Min, c.lhs, c.rhs),
        IFhevmExecutorCalls::fheMax(c) => binary(OpKind::Max, c.lhs, c.rhs),
        IFhevmExecutorCalls::fheEq(c) => binary(OpKind::Eq, c.lhs, c.rhs),
        IFhevmExecutorCalls::fheNe(c) => binary(OpKind::Ne, c.lhs, c.rhs),
        IFhevmExecutorCalls::fheLt(c) => binary(OpKind::Lt, c.lhs, c.rhs),
        IFhevmExecutorCalls::fheLe(c) => binary(OpKind::Le, c.lhs, c.rhs),
        IFhevmExecutorCalls::fheGt(c) => binary(OpKind::Gt, c.lhs, c.rhs),
        IFhevmExecutorCalls::fheGe(c) => binary(OpKind::Ge, c.lhs, c.rhs),
        IFhevmExecutorCalls::fheNeg(c) => Some((OpKind::Neg, vec![c.ct])),
        IFhevmExecutorCalls::fheNot(c) => Some((OpKind::Not, vec![c.ct])),
        IFhevmExecutorCalls::fheIfThenElse(c) => {
            Some((OpKind::Select, vec![c.control, c.ifTrue, c.ifFalse]))
        }
        _ => None,
    }
}

fn compute<B: FheBackend>(
    engine: &mut FhevmEngine<B>,
    op: OpKind,
    operands: &[B256],
    caller: Principal,
    gas: &GasSchedule,
) -> Result<(Bytes, u64), ExecutorError> {
    let operands: Vec<HandleId> = operands.iter().copied().map(HandleId::from).collect();
    let handle = engine.apply(op, &operands, caller)?;
    let cost = match op.arity() {
        1 => gas.unary_op,
        2 => gas.binary_op,
        _ => gas.select,
    };
    Ok((encode_handle(handle), cost))
}

/// A contract may change rows on a handle only if it may use it or created it
fn authorize_acl_change<B: FheBackend>(
    engine: &FhevmEngine<B>,
    handle: B256,
    account: Address,
    capability: u8,
    caller: Principal,
) -> Result<(HandleId, Principal, Capability), ExecutorError> {
    let handle = HandleId(handle);
    let capability = decode_capability(capability)?;

    let creator = engine.creator_of(handle)?;
    if creator != caller && !engine.check(handle, caller, Capability::Use) {
        return Err(EngineError::PermissionDenied {
            handle,
            principal: caller,
            capability: Capability::Use,
        }
        .into());
    }
    Ok((handle, Principal(account), capability))
}

/// Only the creator may revoke other principals' rows; anyone may drop their own
fn authorize_revoke<B: FheBackend>(
    engine: &FhevmEngine<B>,
    handle: B256,
    account: Address,
    capability: u8,
    caller: Principal,
) -> Result<(HandleId, Principal, Capability), ExecutorError> {
    let handle = HandleId(handle);
    let capability = decode_capability(capability)?;
    let account = Principal(account);

    if engine.creator_of(handle)? != caller && account != caller {
        return Err(EngineError::PermissionDenied {
            handle,
            principal: caller,
            capability,
        }
        .into());
    }
    Ok((handle, account, capability))
}

fn decode_capability(code: u8) -> Result<Capability, ExecutorError> {
    Capability::from_code(code)
        .ok_or_else(|| ExecutorError::Decode(format!("unknown capability {code}")))
}

fn encode_handle(handle: HandleId) -> Bytes {
    Bytes::from(handle.0.abi_encode())
}

fn call_name(call: &IFhevmExecutorCalls) -> &'static str {
    match call {
        IFhevmExecutorCalls::verifyInput(_) => "verifyInput",
        IFhevmExecutorCalls::trivialEncrypt(_) => "trivialEncrypt",
        IFhevmExecutorCalls::fheAdd(_) => "fheAdd",
        IFhevmExecutorCalls::fheSub(_) => "fheSub",
        IFhevmExecutorCalls::fheMul(_) => "fheMul",
        IFhevmExecutorCalls::fheDiv(_) => "fheDiv",
        IFhevmExecutorCalls::fheRem(_) => "fheRem",
        IFhevmExecutorCalls::fheBitAnd(_) => "fheBitAnd",
        IFhevmExecutorCalls::fheBitOr(_) => "fheBitOr",
        IFhevmExecutorCalls::fheBitXor(_) => "fheBitXor",
        IFhevmExecutorCalls::fheShl(_) => "fheShl",
        IFhevmExecutorCalls::fheShr(_) => "fheShr",
        IFhevmExecutorCalls::fheMin(_) => "fheMin",
        IFhevmExecutorCalls::fheMax(_) => "fheMax",
        IFhevmExecutorCalls::fheEq(_) => "fheEq",
        IFhevmExecutorCalls::fheNe(_) => "fheNe",
        IFhevmExecutorCalls::fheLt(_) => "fheLt",
        IFhevmExecutorCalls::fheLe(_) => "fheLe",
        IFhevmExecutorCalls::fheGt(_) => "fheGt",
        IFhevmExecutorCalls::fheGe(_) => "fheGe",
        IFhevmExecutorCalls::fheNeg(_) => "fheNeg",
        IFhevmExecutorCalls::fheNot(_) => "fheNot",
        IFhevmExecutorCalls::fheIfThenElse(_) => "fheIfThenElse",
        IFhevmExecutorCalls::allow(_) => "allow",
        IFhevmExecutorCalls::allowTransient(_) => "allowTransient",
        IFhevmExecutorCalls::revoke(_) => "revoke",
        IFhevmExecutorCalls::isAllowed(_) => "isAllowed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{backend::MockBackend, client::InputBinding};
    use alloy_sol_types::SolCall;
    use revm::primitives::{U256, address};

    const CONTRACT: Address = address!("00000000000000000000000000000000000000C0");
    const INTRUDER: Address = address!("00000000000000000000000000000000000000C1");
    const USER: Address = address!("0000000000000000000000000000000000000AAA");

    fn handle_of(output: &ExecutorOutput) -> HandleId {
        HandleId(B256::abi_decode(&output.output).unwrap())
    }

    fn constant(engine: &mut FhevmEngine<MockBackend>, value: u64) -> HandleId {
        let call = IFhevmExecutor::trivialEncryptCall {
            plaintext: U256::from(value),
            fheType: TypeTag::Uint8.code(),
        };
        handle_of(&engine.execute(CONTRACT, &call.abi_encode(), false).unwrap())
    }

    #[test]
    fn test_input_then_add_through_abi() {
        let mut engine = FhevmEngine::new(MockBackend);
        let input = InputBinding::new(Principal(CONTRACT), Principal(USER))
            .clear(TypeTag::Uint8, U256::from(5))
            .unwrap();

        let verify = IFhevmExecutor::verifyInputCall {
            ciphertext: input.ciphertext.clone().into(),
            inputProof: input.proof.clone().into(),
            user: USER,
        };
        let out = engine.execute(CONTRACT, &verify.abi_encode(), false).unwrap();
        assert_eq!(out.gas_used, GasSchedule::default().verify_input);
        let five = handle_of(&out);
        let three = constant(&mut engine, 3);

        for handle in [five, three] {
            let allow = IFhevmExecutor::allowCall {
                handle: handle.0,
                account: CONTRACT,
                capability: Capability::Use.code(),
            };
            engine.execute(CONTRACT, &allow.abi_encode(), false).unwrap();
        }

        let add = IFhevmExecutor::fheAddCall {
            lhs: five.0,
            rhs: three.0,
        };
        let sum = handle_of(&engine.execute(CONTRACT, &add.abi_encode(), false).unwrap());

        let allow = IFhevmExecutor::allowCall {
            handle: sum.0,
            account: USER,
            capability: Capability::Decrypt.code(),
        };
        engine.execute(CONTRACT, &allow.abi_encode(), false).unwrap();

        assert_eq!(engine.decrypt(sum, Principal(USER)).unwrap(), U256::from(8));
    }

    #[test]
    fn test_stranger_cannot_grant() {
        let mut engine = FhevmEngine::new(MockBackend);
        let handle = constant(&mut engine, 1);

        let allow = IFhevmExecutor::allowCall {
            handle: handle.0,
            account: INTRUDER,
            capability: Capability::Decrypt.code(),
        };
        let result = engine.execute(INTRUDER, &allow.abi_encode(), false);

        assert!(matches!(
            result,
            Err(ExecutorError::Engine(EngineError::PermissionDenied { .. }))
        ));
        assert!(!engine.check(handle, Principal(INTRUDER), Capability::Decrypt));
    }

    #[test]
    fn test_is_allowed_and_static_calls() {
        let mut engine = FhevmEngine::new(MockBackend);
        let handle = constant(&mut engine, 1);

        let query = IFhevmExecutor::isAllowedCall {
            handle: handle.0,
            account: CONTRACT,
            capability: Capability::Use.code(),
        };
        let out = engine.execute(CONTRACT, &query.abi_encode(), true).unwrap();
        assert!(!bool::abi_decode(&out.output).unwrap());

        let trivial = IFhevmExecutor::trivialEncryptCall {
            plaintext: U256::from(1),
            fheType: TypeTag::Bool.code(),
        };
        let refused = engine.execute(CONTRACT, &trivial.abi_encode(), true);
        assert!(matches!(refused, Err(ExecutorError::StaticCall("trivialEncrypt"))));
    }

    #[test]
    fn test_out_of_range_constant_is_refused() {
        let mut engine = FhevmEngine::new(MockBackend);
        let call = IFhevmExecutor::trivialEncryptCall {
            plaintext: U256::from(300),
            fheType: TypeTag::Uint8.code(),
        };

        let result = engine.execute(CONTRACT, &call.abi_encode(), false);

        let err = result.unwrap_err();
        assert!(!err.is_fatal());
        assert!(matches!(
            err,
            ExecutorError::Engine(EngineError::PlaintextOutOfRange {
                tag: TypeTag::Uint8,
                ..
            })
        ));
        assert!(engine.store().is_empty());
    }

    #[test]
    fn test_only_creator_revokes_foreign_rows() {
        let mut engine = FhevmEngine::new(MockBackend);
        let handle = constant(&mut engine, 1);
        for account in [CONTRACT, INTRUDER] {
            let allow = IFhevmExecutor::allowCall {
                handle: handle.0,
                account,
                capability: Capability::Use.code(),
            };
            engine.execute(CONTRACT, &allow.abi_encode(), false).unwrap();
        }

        // USE is enough to grant but not to strip the creator
        let strip = IFhevmExecutor::revokeCall {
            handle: handle.0,
            account: CONTRACT,
            capability: Capability::Use.code(),
        };
        let refused = engine.execute(INTRUDER, &strip.abi_encode(), false);
        assert!(matches!(
            refused,
            Err(ExecutorError::Engine(EngineError::PermissionDenied { .. }))
        ));
        assert!(engine.check(handle, Principal(CONTRACT), Capability::Use));

        let drop_own = IFhevmExecutor::revokeCall {
            handle: handle.0,
            account: INTRUDER,
            capability: Capability::Use.code(),
        };
        engine.execute(INTRUDER, &drop_own.abi_encode(), false).unwrap();
        assert!(!engine.check(handle, Principal(INTRUDER), Capability::Use));

        let allow = IFhevmExecutor::allowCall {
            handle: handle.0,
            account: USER,
            capability: Capability::Decrypt.code(),
        };
        engine.execute(CONTRACT, &allow.abi_encode(), false).unwrap();
        let revoke = IFhevmExecutor::revokeCall {
            handle: handle.0,
            account: USER,
            capability: Capability::Decrypt.code(),
        };
        engine.execute(CONTRACT, &revoke.abi_encode(), false).unwrap();
        assert!(!engine.check(handle, Principal(USER), Capability::Decrypt));
    }

    #[test]
    fn test_garbage_calldata() {
        let mut engine = FhevmEngine::new(MockBackend);
        let result = engine.execute(CONTRACT, &[0xde, 0xad, 0xbe, 0xef], false);
        assert!(matches!(result, Err(ExecutorError::Decode(_))));
        assert!(engine.store().is_empty());
    }
}
