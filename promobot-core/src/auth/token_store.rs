// File: promobot-core/src/auth/token_store.rs

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use promobot_common::Error;
use promobot_common::traits::RefreshTokenStore;

#[derive(Debug, Serialize, Deserialize, Default)]
struct TokenFile {
    accounts: HashMap<String, StoredToken>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct StoredToken {
    refresh_token: String,
    saved_at: String,
}

/// File-backed durable slot for long-lived refresh tokens, one JSON file
/// holding every account's token. Good enough for the single-process
/// deployments this layer targets; anything bigger implements
/// [`RefreshTokenStore`] over its own storage.
pub struct FileRefreshTokenStore {
    path: PathBuf,
}

impl FileRefreshTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_file(&self) -> Result<TokenFile, Error> {
        if !self.path.exists() {
            return Ok(TokenFile::default());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn write_file(&self, file: &TokenFile) -> Result<(), Error> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(file)?)?;
        Ok(())
    }
}

#[async_trait]
impl RefreshTokenStore for FileRefreshTokenStore {
    async fn load(&self, account: &str) -> Result<Option<String>, Error> {
        let file = self.read_file()?;
        Ok(file
            .accounts
            .get(account)
            .map(|t| t.refresh_token.clone()))
    }

    async fn save(&self, account: &str, refresh_token: &str) -> Result<(), Error> {
        let mut file = self.read_file()?;
        file.accounts.insert(
            account.to_string(),
            StoredToken {
                refresh_token: refresh_token.to_string(),
                saved_at: Utc::now().to_rfc3339(),
            },
        );
        self.write_file(&file)?;
        debug!("stored refresh token for account '{account}'");
        Ok(())
    }
}
