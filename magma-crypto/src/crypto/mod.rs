//! Central cryptography module: field encryption, password hashing, content
//! digests and identifier generation. Each submodule owns one responsibility.

pub mod cipher;
pub mod integrity;
pub mod object_id;
pub mod passwords;

pub use cipher::{CipherError, FieldCipher};
pub use integrity::{digest_bytes, digest_json, digest_string, DigestError};
pub use object_id::generate_object_id;
pub use passwords::{hash_password, verify_password, PasswordError};
