//! One-time login credentials.
//!
//! A fresh credential is generated per pass, handed in memory to identity
//! provisioning and notification, then dropped. Only the salted hash is
//! ever written anywhere.

use rand::Rng;
use rand::distr::Alphanumeric;
use sha2::{Digest, Sha256};

const SECRET_LEN: usize = 20;
const SALT_LEN: usize = 16;
const SCHEME: &str = "sha256";

/// Plaintext credential. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    secret: String,
}

impl Credential {
    /// Generate a random alphanumeric credential.
    pub fn generate() -> Self {
        Self {
            secret: random_string(SECRET_LEN),
        }
    }

    /// Wrap an existing secret (login checks, tests).
    pub fn from_secret(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// The plaintext, for the submitter's notification only.
    pub fn expose(&self) -> &str {
        &self.secret
    }

    /// Salted, irreversible hash in the form `sha256$<salt>$<hex>`.
    pub fn hash(&self) -> String {
        let salt = random_string(SALT_LEN);
        format!("{SCHEME}${salt}${}", digest(&salt, &self.secret))
    }

    /// Check this credential against a stored hash.
    pub fn verify(&self, stored: &str) -> bool {
        let mut parts = stored.splitn(3, '$');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(SCHEME), Some(salt), Some(expected)) => digest(salt, &self.secret) == expected,
            _ => false,
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

fn digest(salt: &str, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(secret.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn random_string(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_credentials_differ() {
        let a = Credential::generate();
        let b = Credential::generate();
        assert_eq!(a.expose().len(), SECRET_LEN);
        assert_ne!(a, b);
    }

    #[test]
    fn hash_is_salted_and_verifiable() {
        let cred = Credential::from_secret("correct horse");
        let h1 = cred.hash();
        let h2 = cred.hash();
        assert_ne!(h1, h2);
        assert!(h1.starts_with("sha256$"));
        assert!(!h1.contains("correct horse"));
        assert!(cred.verify(&h1));
        assert!(cred.verify(&h2));
        assert!(!Credential::from_secret("wrong").verify(&h1));
        assert!(!cred.verify("plaintext"));
    }

    #[test]
    fn debug_redacts() {
        let cred = Credential::from_secret("hunter2");
        assert!(!format!("{cred:?}").contains("hunter2"));
    }
}
