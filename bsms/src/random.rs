//! Entropy for setup tokens.
//!
//! Tokens are secrets handed out-of-band to every signer, so their
//! generation mixes several sources: OS randomness always, RDRAND when the
//! CPU has it, and a pinch of contextual data, all folded through SHA-256.

use bitcoin::hashes::{sha256, Hash, HashEngine};

use std::{
    collections::hash_map,
    error, fmt,
    hash::{BuildHasher, Hasher},
    time::{SystemTime, UNIX_EPOCH},
};

#[derive(Debug)]
pub enum RandomnessError {
    Hardware(String),
    Os(String),
    ContextualInfo(String),
}

impl fmt::Display for RandomnessError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Hardware(s) => write!(f, "Error when getting randomness from hardware: {}", s),
            Self::Os(s) => write!(f, "Error when getting randomness from the OS: {}", s),
            Self::ContextualInfo(s) => write!(f, "Error when getting contextual info: {}", s),
        }
    }
}

impl error::Error for RandomnessError {}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
fn cpu_randomness(engine: &mut sha256::HashEngine) -> Result<(), RandomnessError> {
    // RDRAND is a bonus source, not a requirement.
    if let Ok(mut generator) = rdrand::RdRand::new() {
        let mut buf = [0; 32];
        generator
            .try_fill_bytes(&mut buf)
            .map_err(|e| RandomnessError::Hardware(e.to_string()))?;
        assert_ne!(buf, [0; 32]);
        engine.input(&buf);
    }
    Ok(())
}

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
fn cpu_randomness(_engine: &mut sha256::HashEngine) -> Result<(), RandomnessError> {
    Ok(())
}

// On Linux this is `getrandom()` or `/dev/urandom`, `getentropy()` /
// `/dev/random` on Mac, `BCryptGenRandom` on Windows. See
// https://docs.rs/getrandom/latest/getrandom/#supported-targets
fn os_randomness(engine: &mut sha256::HashEngine) -> Result<(), RandomnessError> {
    let mut buf = [0; 32];
    getrandom::getrandom(&mut buf).map_err(|e| RandomnessError::Os(e.to_string()))?;
    assert_ne!(buf, [0; 32]);
    engine.input(&buf);
    Ok(())
}

fn contextual_data(engine: &mut sha256::HashEngine) -> Result<(), RandomnessError> {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| RandomnessError::ContextualInfo(e.to_string()))?
        .subsec_nanos();
    engine.input(&timestamp.to_be_bytes());
    let hasher_number = hash_map::RandomState::new().build_hasher().finish();
    engine.input(&hasher_number.to_be_bytes());
    engine.input(&std::process::id().to_be_bytes());
    Ok(())
}

/// Get 32 bytes of mixed randomness for token generation.
pub fn random_bytes() -> Result<[u8; 32], RandomnessError> {
    let mut engine = sha256::HashEngine::default();
    cpu_randomness(&mut engine)?;
    os_randomness(&mut engine)?;
    contextual_data(&mut engine)?;
    Ok(sha256::Hash::from_engine(engine).to_byte_array())
}
