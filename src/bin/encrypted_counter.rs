//! Encrypted Counter Demo
//!
//! Drives the engine directly with the sealed backend:
//!
//! 1. A user seals increments to the coprocessor key and submits them with proofs
//! 2. The counter contract adds each increment to its encrypted total
//! 3. The user reads the total back through re-encryption to their own key
//! 4. A replayed input and an unauthorized reader are both refused
//!
//! Usage: `encrypted_counter [config.toml]`

use anyhow::{Context, Result};
use fhevm_engine::{
    Capability,
    FhevmEngine,
    HandleId,
    OpKind,
    Principal,
    SealedBackend,
    TypeTag,
    client::InputBinding,
    config::EngineConfig,
    crypto::{ClientKeyPair, ClientKeys},
};
use revm::primitives::{U256, address};
use std::path::Path;
use tracing_subscriber::{EnvFilter, prelude::*};

const COUNTER: Principal = Principal(address!("00000000000000000000000000000000000C0FFE"));
const ALICE: Principal = Principal(address!("000000000000000000000000000000000000A11C"));
const MALLORY: Principal = Principal(address!("0000000000000000000000000000000000000BAD"));

fn main() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::from_file(Path::new(&path))
            .with_context(|| format!("failed to load {path}"))?,
        None => EngineConfig::default(),
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    println!("🔐 Encrypted Counter Demo\n");

    let backend: SealedBackend = SealedBackend::new();
    let coprocessor_key = backend.public_key();
    let mut engine = FhevmEngine::with_config(backend, config);
    let alice_keys = ClientKeys::generate();
    let binding = InputBinding::new(COUNTER, ALICE);

    println!("📦 Counter contract: {}", COUNTER);
    println!("👤 Alice:            {}", ALICE);
    println!("🔑 Coprocessor key:  0x{}\n", hex::encode(&coprocessor_key));

    // Counter starts at an encrypted zero the contract owns
    let mut total = engine.trivial_encrypt(TypeTag::Uint32, U256::ZERO, COUNTER)?;
    engine.grant(total, COUNTER, Capability::Use)?;

    for amount in [5u64, 3, 34] {
        let input =
            binding.seal(&alice_keys, &coprocessor_key, TypeTag::Uint32, U256::from(amount))?;
        total = increment(&mut engine, total, &input.ciphertext, &input.proof)?;
        println!("➕ Alice added an encrypted amount; new total handle {}", total);
    }

    engine.grant(total, ALICE, Capability::Decrypt)?;
    let sealed = engine.reencrypt(total, ALICE, &alice_keys.public_key_bytes())?;
    let opened = alice_keys.open_from_coprocessor(&sealed)?;
    let value = TypeTag::Uint32
        .decode_plaintext(&opened)
        .context("re-encrypted value has the wrong width")?;
    println!("\n🔓 Alice reads the counter: {}", value);

    println!("\n🛡️  Checking refusals...");
    let replay = binding.seal(&alice_keys, &coprocessor_key, TypeTag::Uint32, U256::from(1))?;
    engine.verify_and_ingest(&replay.ciphertext, &replay.proof, ALICE, COUNTER)?;
    match engine.verify_and_ingest(&replay.ciphertext, &replay.proof, ALICE, COUNTER) {
        Ok(_) => anyhow::bail!("replayed input was accepted"),
        Err(e) => println!("   ✓ replay refused: {}", e),
    }
    match engine.decrypt(total, MALLORY) {
        Ok(_) => anyhow::bail!("unauthorized decryption succeeded"),
        Err(e) => println!("   ✓ Mallory refused: {}", e),
    }

    println!(
        "\n✅ Done: {} handles live, {} permission rows, {} proofs consumed",
        engine.store().len(),
        engine.acl().len(),
        engine.verifier().consumed_len()
    );
    Ok(())
}

/// What the counter contract does for one `increment(input, proof)` call
fn increment(
    engine: &mut FhevmEngine<SealedBackend>,
    total: HandleId,
    ciphertext: &[u8],
    proof: &[u8],
) -> Result<HandleId> {
    let next = engine.transaction(|engine| {
        let amount = engine.verify_and_ingest(ciphertext, proof, ALICE, COUNTER)?;
        engine.grant_transient(amount, COUNTER, Capability::Use)?;
        let next = engine.apply(OpKind::Add, &[total, amount], COUNTER)?;
        engine.grant(next, COUNTER, Capability::Use)?;
        engine.revoke(total, COUNTER, Capability::Use)?;
        Ok(next)
    })?;
    engine.prune(total)?;
    Ok(next)
}
