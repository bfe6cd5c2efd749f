//! Field-level protection for persisted rows.
//!
//! Records are sealed right before they are written and opened right after they
//! are read, so sensitive columns only ever hold cipher envelopes at rest.
//! Empty values are left untouched in both directions.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::cipher::{CipherError, FieldCipher};
use crate::crypto::integrity::digest_string;

const RECORDS_TARGET: &str = "magma_crypto::records";

#[derive(Debug, Error)]
#[error("field `{field}`: {source}")]
pub struct RecordError {
    pub field: &'static str,
    #[source]
    pub source: CipherError,
}

/// A row with columns that must be encrypted at rest.
pub trait ProtectedRecord {
    /// Encrypts sensitive fields in place. Call before persisting.
    fn seal(&mut self, cipher: &FieldCipher) -> Result<(), RecordError>;
    /// Decrypts sensitive fields in place. Call after loading.
    fn open(&mut self, cipher: &FieldCipher) -> Result<(), RecordError>;
}

fn seal_field(cipher: &FieldCipher, field: &'static str, value: &mut String) -> Result<(), RecordError> {
    if value.is_empty() {
        return Ok(());
    }
    *value = cipher
        .encrypt(value)
        .map_err(|source| RecordError { field, source })?;
    Ok(())
}

fn open_field(cipher: &FieldCipher, field: &'static str, value: &mut String) -> Result<(), RecordError> {
    if value.is_empty() {
        return Ok(());
    }
    *value = cipher
        .decrypt(value)
        .map_err(|source| RecordError { field, source })?;
    Ok(())
}

fn seal_optional(cipher: &FieldCipher, field: &'static str, value: &mut Option<String>) -> Result<(), RecordError> {
    match value {
        Some(inner) => seal_field(cipher, field, inner),
        None => Ok(()),
    }
}

fn open_optional(cipher: &FieldCipher, field: &'static str, value: &mut Option<String>) -> Result<(), RecordError> {
    match value {
        Some(inner) => open_field(cipher, field, inner),
        None => Ok(()),
    }
}

/// Opens a column that may still hold plaintext written before the column was
/// encrypted. A value that fails to open is kept as stored; key errors still
/// propagate since they say nothing about the value.
fn open_legacy_field(cipher: &FieldCipher, field: &'static str, value: &mut String) -> Result<(), RecordError> {
    if value.is_empty() {
        return Ok(());
    }
    match cipher.decrypt(value) {
        Ok(plaintext) => {
            *value = plaintext;
            Ok(())
        }
        Err(source) if source.is_key_error() => Err(RecordError { field, source }),
        Err(_) => {
            tracing::debug!(target: RECORDS_TARGET, field, "keeping legacy plaintext value");
            Ok(())
        }
    }
}

/// Value stored in (and queried against) the `email_hash` column.
pub fn email_lookup_key(email: &str) -> String {
    digest_string(email)
}

/// The user row, restricted to the columns that carry protection rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserRecord {
    pub object_id: String,
    #[serde(rename = "name")]
    pub first_name: String,
    #[serde(rename = "surname")]
    pub last_name: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub phone: Option<String>,
    pub email: String,
    #[serde(skip_serializing)]
    pub email_hash: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
    pub github_username: String,
    pub github_avatar_url: String,
    pub google_email: String,
    pub google_name: String,
}

impl UserRecord {
    /// Stores a fresh Argon2id hash of `password`.
    pub fn set_password(&mut self, password: &str) -> Result<(), crate::crypto::PasswordError> {
        self.password_hash = crate::crypto::hash_password(password)?;
        Ok(())
    }

    /// Checks `password` against the stored hash. Never fails.
    pub fn check_password(&self, password: &str) -> bool {
        crate::crypto::verify_password(password, &self.password_hash)
    }
}

impl ProtectedRecord for UserRecord {
    fn seal(&mut self, cipher: &FieldCipher) -> Result<(), RecordError> {
        seal_field(cipher, "first_name", &mut self.first_name)?;
        seal_field(cipher, "last_name", &mut self.last_name)?;
        seal_optional(cipher, "phone", &mut self.phone)?;

        if !self.email.is_empty() {
            // Lookup hash is taken from the plaintext before it is replaced.
            self.email_hash = email_lookup_key(&self.email);
            seal_field(cipher, "email", &mut self.email)?;
        }

        seal_field(cipher, "google_email", &mut self.google_email)?;
        seal_field(cipher, "google_name", &mut self.google_name)?;
        // Avatar URL stays in plaintext.
        seal_field(cipher, "github_username", &mut self.github_username)?;

        seal_field(cipher, "address", &mut self.address)?;
        seal_field(cipher, "city", &mut self.city)?;
        seal_field(cipher, "state", &mut self.state)?;
        seal_field(cipher, "postal_code", &mut self.postal_code)?;
        seal_field(cipher, "country", &mut self.country)?;

        tracing::debug!(target: RECORDS_TARGET, object_id = %self.object_id, "sealed user record");
        Ok(())
    }

    fn open(&mut self, cipher: &FieldCipher) -> Result<(), RecordError> {
        open_field(cipher, "first_name", &mut self.first_name)?;
        open_field(cipher, "last_name", &mut self.last_name)?;
        open_optional(cipher, "phone", &mut self.phone)?;
        open_field(cipher, "email", &mut self.email)?;

        open_legacy_field(cipher, "google_email", &mut self.google_email)?;
        open_legacy_field(cipher, "google_name", &mut self.google_name)?;
        open_legacy_field(cipher, "github_username", &mut self.github_username)?;

        open_field(cipher, "address", &mut self.address)?;
        open_field(cipher, "city", &mut self.city)?;
        open_field(cipher, "state", &mut self.state)?;
        open_field(cipher, "postal_code", &mut self.postal_code)?;
        open_field(cipher, "country", &mut self.country)?;
        Ok(())
    }
}

/// Credentials held for a third-party integration (AWS account link, OAuth grant).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrationSecrets {
    pub object_id: String,
    pub provider: String,
    pub aws_role_arn: String,
    pub aws_external_id: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
}

impl ProtectedRecord for IntegrationSecrets {
    fn seal(&mut self, cipher: &FieldCipher) -> Result<(), RecordError> {
        seal_field(cipher, "aws_role_arn", &mut self.aws_role_arn)?;
        seal_field(cipher, "aws_external_id", &mut self.aws_external_id)?;
        seal_field(cipher, "access_token", &mut self.access_token)?;
        seal_optional(cipher, "refresh_token", &mut self.refresh_token)
    }

    fn open(&mut self, cipher: &FieldCipher) -> Result<(), RecordError> {
        open_field(cipher, "aws_role_arn", &mut self.aws_role_arn)?;
        open_field(cipher, "aws_external_id", &mut self.aws_external_id)?;
        open_field(cipher, "access_token", &mut self.access_token)?;
        open_optional(cipher, "refresh_token", &mut self.refresh_token)
    }
}
