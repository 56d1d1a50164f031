use sha2::{Digest as _, Sha256};

/// Turns share passwords into stored verifiers and checks candidates
/// against them.
pub trait PasswordHasher: std::fmt::Debug + Send + Sync {
    fn hash(&self, password: &str) -> String;

    fn verify(&self, password: &str, stored: &str) -> bool;
}

/// Salted SHA-256, stored as `hex(salt)$hex(hash)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256PasswordHasher;

impl Sha256PasswordHasher {
    fn digest(salt: &[u8], password: &str) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(salt);
        hasher.update(password.as_bytes());
        hasher.finalize().to_vec()
    }
}

impl PasswordHasher for Sha256PasswordHasher {
    fn hash(&self, password: &str) -> String {
        let salt: [u8; 16] = rand::random();
        let hash = Self::digest(&salt, password);
        format!("{}${}", hex::encode(salt), hex::encode(hash))
    }

    fn verify(&self, password: &str, stored: &str) -> bool {
        let Some((salt, expected)) = stored.split_once('$') else {
            return false;
        };
        let (Ok(salt), Ok(expected)) = (hex::decode(salt), hex::decode(expected)) else {
            return false;
        };
        constant_time_eq(&Self::digest(&salt, password), &expected)
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
