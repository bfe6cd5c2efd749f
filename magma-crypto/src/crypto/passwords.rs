//! Password hashing helpers built around Argon2id.
//! The configuration is centralized so that every stored credential uses the
//! same memory, iteration, and parallelism parameters.
//!
//! Rows created before the switch to Argon2id hold bcrypt strings (`$2a$`,
//! `$2b$`, `$2y$`). Those still verify, but new hashes are always Argon2id.

use argon2::password_hash::SaltString;
use argon2::{password_hash, Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version};
use rand::rngs::OsRng;
use thiserror::Error;

/// Argon2id parameters for the API's login path.
/// - memory_cost: 19 MiB
/// - time_cost: 3 iterations
/// - parallelism: 1 lane
const MEMORY_COST_KIB: u32 = 19 * 1024;
const TIME_COST: u32 = 3;
const PARALLELISM: u32 = 1;

const PASSWORDS_TARGET: &str = "magma_crypto::passwords";

const BCRYPT_PREFIXES: [&str; 3] = ["$2a$", "$2b$", "$2y$"];

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("password hashing failed: {0}")]
    Hash(String),
}

impl From<password_hash::Error> for PasswordError {
    fn from(err: password_hash::Error) -> Self {
        PasswordError::Hash(format!("{err}"))
    }
}

fn argon2_config() -> Result<Argon2<'static>, password_hash::Error> {
    let params = Params::new(MEMORY_COST_KIB, TIME_COST, PARALLELISM, None)?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

/// Hashes a password with Argon2id and returns the PHC string.
/// The resulting string embeds the salt and parameters so it can be verified later.
/// Empty passwords are hashed like any other; policy belongs to the caller.
pub fn hash_password(plaintext: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = argon2_config().map_err(|e| {
        tracing::error!(target: PASSWORDS_TARGET, error = %e, "invalid argon2 parameters");
        PasswordError::from(e)
    })?;
    let password_hash = argon2.hash_password(plaintext.as_bytes(), &salt)?.to_string();
    Ok(password_hash)
}

/// Verifies a plaintext password against a previously stored hash.
///
/// The algorithm, cost and salt come from the stored string: PHC strings are
/// checked with Argon2id, legacy bcrypt strings with bcrypt. Never fails;
/// unparsable hashes, unknown algorithms and empty inputs verify as `false`.
pub fn verify_password(plaintext: &str, stored_hash: &str) -> bool {
    if stored_hash.is_empty() {
        return false;
    }

    if is_legacy_bcrypt(stored_hash) {
        return match bcrypt::verify(plaintext, stored_hash) {
            Ok(matches) => matches,
            Err(e) => {
                tracing::debug!(target: PASSWORDS_TARGET, error = %e, "malformed bcrypt hash");
                false
            }
        };
    }

    let parsed_hash = match PasswordHash::new(stored_hash) {
        Ok(hash) => hash,
        Err(e) => {
            tracing::debug!(target: PASSWORDS_TARGET, error = %e, "stored hash is not a PHC string");
            return false;
        }
    };

    match argon2_config() {
        Ok(argon2) => argon2.verify_password(plaintext.as_bytes(), &parsed_hash).is_ok(),
        Err(_) => false,
    }
}

/// True for hashes written by the bcrypt scheme the API used before Argon2id.
pub fn is_legacy_bcrypt(stored_hash: &str) -> bool {
    BCRYPT_PREFIXES
        .iter()
        .any(|prefix| stored_hash.starts_with(prefix))
}
