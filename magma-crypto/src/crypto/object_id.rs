//! Opaque random identifiers: a v4 UUID rendered in base58.
//! Used for object ids, invitation and password-reset tokens, and OAuth state.

use uuid::Uuid;

/// Generates a new identifier. The output is 21 or 22 base58 characters.
pub fn generate_object_id() -> String {
    bs58::encode(Uuid::new_v4().as_bytes()).into_string()
}

/// Recovers the UUID behind an identifier, if it is one.
pub fn parse_object_id(id: &str) -> Option<Uuid> {
    let bytes = bs58::decode(id).into_vec().ok()?;
    Uuid::from_slice(&bytes).ok()
}
