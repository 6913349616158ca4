//! Signing identities and entry signatures.
//!
//! Entries are signed with ed25519. The [`Identity`] trait is the seam for
//! other key holders (hardware keys, remote signers); the core only needs the
//! public key bytes and a detached signature over the signable bytes.

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

/// A signer that can vouch for new entries.
pub trait Identity: Send + Sync {
    /// Raw public key bytes. Also used as the clock id of entries this
    /// identity creates.
    fn public_key(&self) -> Vec<u8>;

    /// Produce a detached signature over `bytes`.
    fn sign(&self, bytes: &[u8]) -> Signature;
}

impl Identity for SigningKey {
    fn public_key(&self) -> Vec<u8> {
        self.verifying_key().to_bytes().to_vec()
    }

    fn sign(&self, bytes: &[u8]) -> Signature {
        let signature: ed25519_dalek::Signature = Signer::sign(self, bytes);
        Signature {
            public_key: self.public_key(),
            signature: signature.to_bytes().to_vec(),
        }
    }
}

/// A signer's public key paired with its signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    pub public_key: Vec<u8>,
    pub signature: Vec<u8>,
}

impl Signature {
    /// Check this signature against `bytes`.
    ///
    /// Malformed keys or signatures verify as `false`.
    #[must_use]
    pub fn verify(&self, bytes: &[u8]) -> bool {
        let Ok(key) = <[u8; 32]>::try_from(self.public_key.as_slice()) else {
            return false;
        };
        let Ok(key) = VerifyingKey::from_bytes(&key) else {
            return false;
        };
        let Ok(signature) = ed25519_dalek::Signature::from_slice(&self.signature) else {
            return false;
        };
        key.verify(bytes, &signature).is_ok()
    }
}

/// Generate a fresh ed25519 identity from the OS RNG.
#[must_use]
pub fn generate_identity() -> SigningKey {
    SigningKey::generate(&mut rand::rngs::OsRng)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_roundtrips_through_verify() {
        let key = generate_identity();
        let sig = Identity::sign(&key, b"payload");
        assert_eq!(sig.public_key.len(), 32);
        assert_eq!(sig.signature.len(), 64);
        assert!(sig.verify(b"payload"));
        assert!(!sig.verify(b"other payload"));
    }

    #[test]
    fn foreign_key_does_not_verify() {
        let a = generate_identity();
        let b = generate_identity();
        let mut sig = Identity::sign(&a, b"x");
        sig.public_key = b.public_key();
        assert!(!sig.verify(b"x"));
    }

    #[test]
    fn malformed_signature_is_rejected() {
        let key = generate_identity();
        let sig = Signature {
            public_key: key.public_key(),
            signature: vec![0; 3],
        };
        assert!(!sig.verify(b"x"));
    }
}
