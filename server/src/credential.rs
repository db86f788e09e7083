//! Stored account credentials.
//!
//! New credentials are salted SHA-256 digests in the form
//! `sha256$<salt-hex>$<digest-hex>`. Entries written by older deployments
//! hold the plaintext secret and are compared verbatim.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const SCHEME: &str = "sha256";
const SALT_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    /// Hashes `secret` with a fresh random salt
    pub fn hash(secret: &str) -> Self {
        let salt: [u8; SALT_LEN] = rand::random();
        Self::with_salt(secret, &salt)
    }

    fn with_salt(secret: &str, salt: &[u8]) -> Self {
        Credential(format!(
            "{}${}${}",
            SCHEME,
            hex::encode(salt),
            digest(salt, secret)
        ))
    }

    pub fn verify(&self, secret: &str) -> bool {
        match self.parts() {
            Some((salt, expected)) => digest(&salt, secret) == expected,
            None => self.0 == secret,
        }
    }

    pub fn is_legacy_plaintext(&self) -> bool {
        self.parts().is_none()
    }

    fn parts(&self) -> Option<(Vec<u8>, &str)> {
        let mut fields = self.0.splitn(3, '$');
        if fields.next()? != SCHEME {
            return None;
        }
        let salt = hex::decode(fields.next()?).ok()?;
        let expected = fields.next()?;
        Some((salt, expected))
    }
}

fn digest(salt: &[u8], secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}
