//! Password verification with a read-through cache.
//!
//! bcrypt is deliberately slow, so successful verifications are memoized in
//! the key-value store keyed by the bcrypt hash itself. The cache is written
//! only after a cryptographic verify succeeds; a cached entry turns later
//! logins into a string comparison.

use std::sync::Arc;

use crate::kv::KeyValue;

const CACHE_KEY_PREFIX: &str = "akatsuki:cache:bcrypt:";

#[derive(Clone)]
pub struct BcryptCache {
    kv: Arc<dyn KeyValue>,
}

impl BcryptCache {
    pub fn new(kv: Arc<dyn KeyValue>) -> Self {
        Self { kv }
    }

    /// Checks `password_md5` against a stored bcrypt hash. The bcrypt work
    /// happens on a blocking thread; the cooperative scheduler never stalls
    /// on it.
    pub async fn verify_password(
        &self,
        password_md5: &str,
        bcrypt_hash: &str,
    ) -> anyhow::Result<bool> {
        let cache_key = format!("{CACHE_KEY_PREFIX}{bcrypt_hash}");

        if let Some(cached_md5) = self.kv.get(&cache_key).await? {
            return Ok(password_md5 == cached_md5);
        }

        let password = password_md5.to_owned();
        let hash = bcrypt_hash.to_owned();
        let correct = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash)).await??;

        if correct {
            self.kv.set(&cache_key, password_md5).await?;
        }

        Ok(correct)
    }
}
