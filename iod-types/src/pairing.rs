//! The pairing credential.
//!
//! Authentication succeeds iff a presented `(token, extensionId, installId)` triple equals
//! the one currently stored, byte-for-byte. The comparison is constant-time (see
//! [`PairingTriple::matches`]) so that a timing side-channel cannot be used to recover the
//! token a byte at a time, per the design note in the protocol spec.

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq as _;

/// The client identity the daemon authenticates every session against: a one-shot pairing
/// binds a `token`, the extension's id, and its install id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingTriple {
    /// The opaque pairing token.
    pub token: String,
    /// The browser extension id that completed pairing.
    pub extension_id: String,
    /// The extension install id that completed pairing.
    pub install_id: String,
}

impl PairingTriple {
    /// Creates a new triple.
    pub fn new(
        token: impl Into<String>,
        extension_id: impl Into<String>,
        install_id: impl Into<String>,
    ) -> Self {
        Self {
            token: token.into(),
            extension_id: extension_id.into(),
            install_id: install_id.into(),
        }
    }

    /// Compares two triples in constant time. Authentication must use this instead of
    /// `PartialEq`, which is intentionally not implemented on this type.
    pub fn matches(&self, other: &PairingTriple) -> bool {
        let mut equal = self.token.as_bytes().ct_eq(other.token.as_bytes());
        equal &= self
            .extension_id
            .as_bytes()
            .ct_eq(other.extension_id.as_bytes());
        equal &= self
            .install_id
            .as_bytes()
            .ct_eq(other.install_id.as_bytes());
        equal.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_triples_match() {
        let a = PairingTriple::new("t", "e", "i");
        let b = PairingTriple::new("t", "e", "i");
        assert!(a.matches(&b));
    }

    #[test]
    fn differing_triples_do_not_match() {
        let a = PairingTriple::new("t", "e", "i");
        let b = PairingTriple::new("t", "e", "x");
        assert!(!a.matches(&b));
    }

    #[test]
    fn differing_lengths_do_not_match() {
        let a = PairingTriple::new("t", "e", "i");
        let b = PairingTriple::new("t", "e", "ii");
        assert!(!a.matches(&b));
    }
}
