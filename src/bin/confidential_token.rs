//! Confidential Token Demo
//!
//! Runs a confidential ERC-20 style transfer through revm. The token contract
//! is played by an account that calls the FHEVM executor precompile; each
//! transfer is one atomic section, so a failure anywhere in it rolls back the
//! EVM state and the engine state together.
//!
//! 1. Mint an encrypted balance to Alice
//! 2. Alice transfers an encrypted amount to Bob
//! 3. An overdraft is computed but leaves both balances unchanged
//! 4. A transfer with a misbound input proof reverts without a trace

use alloy_sol_types::{SolCall, SolValue};
use anyhow::{Context, Result};
use fhevm_engine::{
    Capability,
    FhevmEngine,
    HandleId,
    Principal,
    SealedBackend,
    TypeTag,
    client::{InputBinding, SubmittedInput},
    crypto::{ClientKeyPair, ClientKeys},
    executor::IFhevmExecutor,
    host::FhevmHost,
};
use revm::primitives::{Address, U256, address};
use tracing_subscriber::{EnvFilter, prelude::*};

const TOKEN: Address = address!("0000000000000000000000000000000000070CE0");
const ALICE: Address = address!("000000000000000000000000000000000000A11C");
const BOB: Address = address!("0000000000000000000000000000000000000B0B");

/// Balances the token contract keeps in storage
struct Balances {
    alice: HandleId,
    bob: HandleId,
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    println!("🪙 Confidential Token Demo\n");

    let backend: SealedBackend = SealedBackend::new();
    let coprocessor_key = backend.public_key();
    let mut host = FhevmHost::new(FhevmEngine::new(backend));
    let alice_keys = ClientKeys::generate();

    println!("📦 Minting 100 to Alice...");
    let mut balances = Balances {
        alice: mint(&mut host, ALICE, 100)?,
        bob: mint(&mut host, BOB, 0)?,
    };
    print_balances(&host, &balances)?;

    println!("\n💸 Alice transfers 30 to Bob...");
    let amount = InputBinding::new(Principal(TOKEN), Principal(ALICE)).seal(
        &alice_keys,
        &coprocessor_key,
        TypeTag::Uint64,
        U256::from(30),
    )?;
    balances = transfer(&mut host, &balances, ALICE, &amount)?;
    print_balances(&host, &balances)?;

    println!("\n🚫 Alice tries to transfer 500 (more than the balance)...");
    let amount = InputBinding::new(Principal(TOKEN), Principal(ALICE)).seal(
        &alice_keys,
        &coprocessor_key,
        TypeTag::Uint64,
        U256::from(500),
    )?;
    balances = transfer(&mut host, &balances, ALICE, &amount)?;
    print_balances(&host, &balances)?;

    println!("\n🔁 Bob submits an input bound to Alice...");
    let stolen = InputBinding::new(Principal(TOKEN), Principal(ALICE)).seal(
        &alice_keys,
        &coprocessor_key,
        TypeTag::Uint64,
        U256::from(1),
    )?;
    let handles_before = host.engine().store().len();
    match transfer(&mut host, &balances, BOB, &stolen) {
        Ok(_) => anyhow::bail!("misbound input was accepted"),
        Err(e) => println!("   ✓ transfer reverted: {:#}", e),
    }
    assert_eq!(host.engine().store().len(), handles_before);
    assert!(!host.engine().verifier().is_consumed(&stolen.proof_id));
    print_balances(&host, &balances)?;

    println!("\n✅ Confidential transfers behave atomically");
    Ok(())
}

/// Call the executor as the token contract and keep USE on the result
fn owned<C: SolCall>(host: &mut FhevmHost<SealedBackend>, call: &C) -> Result<HandleId> {
    let handle = host.call_for_handle(TOKEN, call)?;
    host.call_executor(
        TOKEN,
        &IFhevmExecutor::allowCall {
            handle: handle.0,
            account: TOKEN,
            capability: Capability::Use.code(),
        },
    )?;
    Ok(handle)
}

fn allow_decrypt(
    host: &mut FhevmHost<SealedBackend>,
    handle: HandleId,
    holder: Address,
) -> Result<()> {
    host.call_executor(
        TOKEN,
        &IFhevmExecutor::allowCall {
            handle: handle.0,
            account: holder,
            capability: Capability::Decrypt.code(),
        },
    )?;
    Ok(())
}

fn mint(host: &mut FhevmHost<SealedBackend>, holder: Address, value: u64) -> Result<HandleId> {
    host.atomic(|host| {
        let balance = owned(
            host,
            &IFhevmExecutor::trivialEncryptCall {
                plaintext: U256::from(value),
                fheType: TypeTag::Uint64.code(),
            },
        )?;
        allow_decrypt(host, balance, holder)?;
        Ok(balance)
    })
}

/// `transfer(to, encryptedAmount, inputProof)` as the token contract runs it
fn transfer(
    host: &mut FhevmHost<SealedBackend>,
    balances: &Balances,
    sender: Address,
    amount: &SubmittedInput,
) -> Result<Balances> {
    host.atomic(|host| {
        let amount = host.call_for_handle(
            TOKEN,
            &IFhevmExecutor::verifyInputCall {
                ciphertext: amount.ciphertext.clone().into(),
                inputProof: amount.proof.clone().into(),
                user: sender,
            },
        )?;
        host.call_executor(
            TOKEN,
            &IFhevmExecutor::allowTransientCall {
                handle: amount.0,
                account: TOKEN,
                capability: Capability::Use.code(),
            },
        )?;

        let (from, to) = (balances.alice, balances.bob);
        let can_pay = owned(
            host,
            &IFhevmExecutor::fheLeCall {
                lhs: amount.0,
                rhs: from.0,
            },
        )?;
        let debited = owned(
            host,
            &IFhevmExecutor::fheSubCall {
                lhs: from.0,
                rhs: amount.0,
            },
        )?;
        let credited = owned(
            host,
            &IFhevmExecutor::fheAddCall {
                lhs: to.0,
                rhs: amount.0,
            },
        )?;

        // An overdraft selects the old balances, so nothing moves
        let alice = owned(
            host,
            &IFhevmExecutor::fheIfThenElseCall {
                control: can_pay.0,
                ifTrue: debited.0,
                ifFalse: from.0,
            },
        )?;
        let bob = owned(
            host,
            &IFhevmExecutor::fheIfThenElseCall {
                control: can_pay.0,
                ifTrue: credited.0,
                ifFalse: to.0,
            },
        )?;
        allow_decrypt(host, alice, ALICE)?;
        allow_decrypt(host, bob, BOB)?;

        let checked = host.call_executor(
            TOKEN,
            &IFhevmExecutor::isAllowedCall {
                handle: alice.0,
                account: ALICE,
                capability: Capability::Decrypt.code(),
            },
        )?;
        anyhow::ensure!(bool::abi_decode(&checked)?, "new balance is not decryptable by Alice");

        Ok(Balances { alice, bob })
    })
}

fn print_balances(host: &FhevmHost<SealedBackend>, balances: &Balances) -> Result<()> {
    let engine = host.engine();
    let alice = engine
        .decrypt(balances.alice, Principal(ALICE))
        .context("decrypting Alice's balance")?;
    let bob = engine
        .decrypt(balances.bob, Principal(BOB))
        .context("decrypting Bob's balance")?;
    println!("   Alice: {}  Bob: {}", alice, bob);
    Ok(())
}
