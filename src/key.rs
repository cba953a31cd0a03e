//! Record keys
//!
//! A key names a record by namespace, set and user key. The digest is what
//! actually travels on the wire and decides partition membership.

use std::fmt;

use crate::protocol::ParticleType;
use crate::value::Value;

/// Length of a key digest in bytes
pub const DIGEST_SIZE: usize = 20;

/// Fixed-length hash of set name and user key
pub type Digest = [u8; DIGEST_SIZE];

/// Immutable record key
#[derive(Debug, Clone, PartialEq)]
pub struct Key {
    namespace: String,
    set: String,
    user_key: Option<Value>,
    digest: Digest,
}

impl Key {
    /// Create a key and compute its digest
    pub fn new(namespace: impl Into<String>, set: impl Into<String>, user_key: impl Into<Value>) -> Self {
        let set = set.into();
        let user_key = user_key.into();
        let digest = compute_digest(&set, &user_key);
        Self {
            namespace: namespace.into(),
            set,
            user_key: Some(user_key),
            digest,
        }
    }

    /// Create a key from a digest the caller already holds
    pub fn with_digest(namespace: impl Into<String>, set: impl Into<String>, digest: Digest) -> Self {
        Self {
            namespace: namespace.into(),
            set: set.into(),
            user_key: None,
            digest,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn set(&self) -> &str {
        &self.set
    }

    pub fn user_key(&self) -> Option<&Value> {
        self.user_key.as_ref()
    }

    pub fn digest(&self) -> &Digest {
        &self.digest
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:", self.namespace, self.set)?;
        match &self.user_key {
            Some(user_key) => write!(f, "{}", user_key),
            None => {
                for byte in &self.digest {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
        }
    }
}

/// Digest = first 20 bytes of BLAKE3(set || particle type || user key payload)
pub fn compute_digest(set: &str, user_key: &Value) -> Digest {
    let mut payload = Vec::with_capacity(crate::protocol::particle::encoded_len(user_key));
    crate::protocol::particle::write_value(&mut payload, user_key);

    let mut hasher = blake3::Hasher::new();
    hasher.update(set.as_bytes());
    hasher.update(&[ParticleType::of(user_key) as u8]);
    hasher.update(&payload);

    let hash = hasher.finalize();
    let mut digest = [0u8; DIGEST_SIZE];
    digest.copy_from_slice(&hash.as_bytes()[..DIGEST_SIZE]);
    digest
}
