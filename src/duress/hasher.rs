//! PIN hashing with Argon2id

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};

use crate::types::{Result, WayguardError};

/// Hashes and checks PINs as PHC strings
#[derive(Clone)]
pub struct PinHasher {
    argon2: Argon2<'static>,
}

impl PinHasher {
    pub fn new(params: Params) -> Self {
        Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        }
    }

    /// Hash with a fresh random salt
    pub fn hash(&self, pin: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2
            .hash_password(pin.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| WayguardError::Credential(format!("Failed to hash PIN: {e}")))
    }

    /// Check a PIN against a stored hash. Cost parameters come from the hash.
    pub fn verify(&self, pin: &str, phc: &str) -> Result<bool> {
        let parsed = PasswordHash::new(phc)
            .map_err(|e| WayguardError::Credential(format!("Invalid PIN hash format: {e}")))?;

        Ok(self.argon2.verify_password(pin.as_bytes(), &parsed).is_ok())
    }
}

impl Default for PinHasher {
    fn default() -> Self {
        Self::new(Params::default())
    }
}
