use std::sync::Arc;

use anyhow::{anyhow, Result};
use base64::Engine;
use rand::RngCore;
use tracing::info;

use crate::database::{DocumentStore, MetaRepository, META_JWT_SECRET};

/// Random bytes in a freshly generated secret
pub const SECRET_LEN: usize = 32;

/// New signing secret: 32 random bytes, standard base64
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_LEN];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// The token signing secret, stored as the `jwt_secret` meta record
#[derive(Clone)]
pub struct SecretStore {
    metas: MetaRepository,
}

impl SecretStore {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            metas: MetaRepository::new(store),
        }
    }

    pub async fn current(&self) -> Result<Option<String>> {
        self.metas.get_value(META_JWT_SECRET).await
    }

    /// Current secret, failing when none was ever written
    pub async fn require(&self) -> Result<String> {
        self.current()
            .await?
            .ok_or_else(|| anyhow!("No token signing secret is stored; run with --init"))
    }

    /// Current secret, generating and storing one when absent
    pub async fn ensure(&self) -> Result<String> {
        if let Some(secret) = self.current().await? {
            return Ok(secret);
        }
        let secret = generate_secret();
        self.metas.set_value(META_JWT_SECRET, &secret).await?;
        info!("Generated token signing secret");
        Ok(secret)
    }

    /// Replace the secret, invalidating every issued token
    pub async fn rotate(&self) -> Result<String> {
        let secret = generate_secret();
        self.metas
            .set_value(META_JWT_SECRET, &secret)
            .await
            .map_err(|e| anyhow!("Failed to rotate token signing secret: {}", e))?;
        info!("Token signing secret rotated; existing sessions are revoked");
        Ok(secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::SqliteStore;

    fn secrets() -> SecretStore {
        SecretStore::new(Arc::new(SqliteStore::open_in_memory().unwrap()))
    }

    #[test]
    fn test_generated_secret_shape() {
        let secret = generate_secret();
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(&secret)
            .unwrap();
        assert_eq!(decoded.len(), SECRET_LEN);
        assert_ne!(secret, generate_secret());
    }

    #[tokio::test]
    async fn test_ensure_is_stable() {
        let secrets = secrets();
        assert_eq!(secrets.current().await.unwrap(), None);
        assert!(secrets.require().await.is_err());

        let first = secrets.ensure().await.unwrap();
        let second = secrets.ensure().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(secrets.require().await.unwrap(), first);
    }

    #[tokio::test]
    async fn test_rotate_replaces() {
        let secrets = secrets();
        let before = secrets.ensure().await.unwrap();
        let after = secrets.rotate().await.unwrap();
        assert_ne!(before, after);
        assert_eq!(secrets.current().await.unwrap(), Some(after));
    }
}
