use rand::Rng;
use subtle::ConstantTimeEq;

fn random_hex(len: usize) -> String {
    let mut rng = rand::thread_rng();
    let mut bytes = vec![0u8; len];
    rng.fill(bytes.as_mut_slice());
    hex::encode(bytes)
}

/// Generate a recipient's unsubscribe validation hash (32 bytes → 64 hex chars).
pub fn generate_validate_hash() -> String {
    random_hex(32)
}

/// Generate the public token of a tracked link (16 bytes → 32 hex chars).
pub fn generate_link_token() -> String {
    random_hex(16)
}

/// Constant-time comparison of a presented hash against the stored one.
pub fn verify_hash(provided: &str, expected: &str) -> bool {
    let a = provided.as_bytes();
    let b = expected.as_bytes();
    if a.is_empty() || a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}
