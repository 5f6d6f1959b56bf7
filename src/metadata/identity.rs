//! Assembly identities.
//!
//! A member reference into another assembly is scoped by that assembly's identity: simple name,
//! four-part version, culture and, for strong-named assemblies, the public key token. The token
//! is the last 8 bytes of the SHA-1 hash of the public key, in reverse order (ECMA-335,
//! Partition II, 6.3).

use std::fmt;

use sha1::{Digest, Sha1};

/// Identity of an assembly, as written into an `AssemblyRef` row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct AssemblyIdentity {
    /// Simple name, e.g. `CilHook`
    pub name: String,
    /// Major, minor, build and revision
    pub version: [u16; 4],
    /// Culture, empty for the neutral culture
    pub culture: String,
    /// Public key token of a strong-named assembly
    pub public_key_token: Option<[u8; 8]>,
}

impl AssemblyIdentity {
    /// A culture-neutral identity without a public key.
    pub fn new(name: impl Into<String>, version: [u16; 4]) -> Self {
        AssemblyIdentity {
            name: name.into(),
            version,
            culture: String::new(),
            public_key_token: None,
        }
    }

    /// Set the public key token from a full public key.
    #[must_use]
    pub fn with_public_key(mut self, public_key: &[u8]) -> Self {
        self.public_key_token = public_key_token(public_key);
        self
    }
}

impl fmt::Display for AssemblyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [major, minor, build, revision] = self.version;
        write!(f, "{}, Version={major}.{minor}.{build}.{revision}", self.name)?;
        let culture = if self.culture.is_empty() {
            "neutral"
        } else {
            self.culture.as_str()
        };
        write!(f, ", Culture={culture}, PublicKeyToken=")?;
        match self.public_key_token {
            Some(token) => token.iter().try_for_each(|byte| write!(f, "{byte:02x}")),
            None => write!(f, "null"),
        }
    }
}

/// Public key token of `public_key`, `None` for an empty key.
#[must_use]
pub fn public_key_token(public_key: &[u8]) -> Option<[u8; 8]> {
    if public_key.is_empty() {
        return None;
    }

    let mut hasher = Sha1::new();
    hasher.update(public_key);
    let hash = hasher.finalize();

    let mut token = [0_u8; 8];
    for (slot, byte) in token.iter_mut().zip(hash.iter().rev()) {
        *slot = *byte;
    }
    Some(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        let identity = AssemblyIdentity::new("CilHook", [1, 2, 0, 0]);
        assert_eq!(
            identity.to_string(),
            "CilHook, Version=1.2.0.0, Culture=neutral, PublicKeyToken=null"
        );
    }

    #[test]
    fn token_is_reversed_hash_tail() {
        let key = [0x00, 0x24, 0x00, 0x00, 0x04, 0x80, 0x00, 0x00];
        let token = public_key_token(&key).unwrap();

        let mut hasher = Sha1::new();
        hasher.update(key);
        let hash = hasher.finalize();
        assert_eq!(token[0], hash[19]);
        assert_eq!(token[7], hash[12]);

        let identity = AssemblyIdentity::new("Signed", [1, 0, 0, 0]).with_public_key(&key);
        assert_eq!(identity.public_key_token, Some(token));
        assert!(public_key_token(&[]).is_none());
    }
}
