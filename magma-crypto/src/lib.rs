//! Field protection for the Blue Magma API: sensitive columns are stored as
//! AES-256-GCM envelopes, passwords as Argon2id hashes, and content is
//! fingerprinted with SHA-256 for lookups and change detection.

pub mod config;
pub mod crypto;
pub mod records;
pub mod telemetry;

pub use crypto::{CipherError, FieldCipher};
pub use records::{ProtectedRecord, RecordError, UserRecord};
