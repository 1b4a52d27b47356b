use super::StorageError;

const KEY_CONTEXT: &str = "photozip 2024-01-01 artifact url signing";

/// Signs and verifies `(path, expiry)` pairs with a keyed BLAKE3 hash.
#[derive(Clone)]
pub struct UrlSigner {
    key: [u8; 32],
}

impl UrlSigner {
    pub fn new(secret: &str) -> Self {
        Self {
            key: blake3::derive_key(KEY_CONTEXT, secret.as_bytes()),
        }
    }

    fn mac(&self, path: &str, expires: i64) -> blake3::Hash {
        blake3::keyed_hash(&self.key, format!("{}\n{}", path, expires).as_bytes())
    }

    /// Hex signature for `path` expiring at unix second `expires`.
    pub fn sign(&self, path: &str, expires: i64) -> String {
        self.mac(path, expires).to_hex().to_string()
    }

    /// Check a signature as of unix second `now`.
    pub fn verify(
        &self,
        path: &str,
        expires: i64,
        signature: &str,
        now: i64,
    ) -> Result<(), StorageError> {
        let provided =
            blake3::Hash::from_hex(signature).map_err(|_| StorageError::InvalidSignature)?;
        // blake3::Hash equality is constant time
        if provided != self.mac(path, expires) {
            return Err(StorageError::InvalidSignature);
        }
        if now > expires {
            return Err(StorageError::Expired);
        }
        Ok(())
    }
}
