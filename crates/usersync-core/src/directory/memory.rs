// # Memory Directory
//
// In-process implementation of DirectoryClient.
//
// Accounts live in an owned table keyed by username. Subject ids are issued
// from a counter (`sub-1`, `sub-2`, ...). Nothing persists across restarts.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::config::DirectoryConfig;
use crate::model::STATUS_CONFIRMED;
use crate::traits::directory_client::{DirectoryAccount, DirectoryClient, DirectoryClientFactory};

#[derive(Debug, Default)]
struct Table {
    accounts: BTreeMap<String, DirectoryAccount>,
    issued: u64,
}

impl Table {
    fn find(&self, identifier: &str) -> Option<&DirectoryAccount> {
        self.accounts.get(identifier).or_else(|| {
            self.accounts
                .values()
                .find(|a| a.sub == identifier || a.email == identifier)
        })
    }

    fn find_key(&self, identifier: &str) -> Option<String> {
        self.find(identifier).map(|a| a.username.clone())
    }
}

/// In-memory user pool
///
/// `create` is idempotent like a real provider binding: an account that
/// already exists under the same username or email is returned unchanged.
///
/// # Example
///
/// ```rust,no_run
/// use usersync_core::directory::MemoryDirectory;
/// use usersync_core::traits::{DirectoryAccount, DirectoryClient};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let directory = MemoryDirectory::new();
///     let created = directory
///         .create(&DirectoryAccount::desired("alice", "a@x.com", true))
///         .await?;
///     assert_eq!(directory.get(&created.sub).await?.email, "a@x.com");
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryDirectory {
    table: Arc<RwLock<Table>>,
}

impl MemoryDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of accounts in the pool
    pub async fn len(&self) -> usize {
        self.table.read().await.accounts.len()
    }

    /// Check if the pool is empty
    pub async fn is_empty(&self) -> bool {
        self.table.read().await.accounts.is_empty()
    }

    /// Seed an account as if it had been created out of band
    ///
    /// A missing subject id is issued from the counter.
    pub async fn seed(&self, mut account: DirectoryAccount) -> DirectoryAccount {
        let mut table = self.table.write().await;
        if account.sub.is_empty() {
            table.issued += 1;
            account.sub = format!("sub-{}", table.issued);
        }
        table
            .accounts
            .insert(account.username.clone(), account.clone());
        account
    }
}

#[async_trait]
impl DirectoryClient for MemoryDirectory {
    async fn create(&self, account: &DirectoryAccount) -> Result<DirectoryAccount, Error> {
        if account.email.is_empty() {
            return Err(Error::invalid_input("account email cannot be empty"));
        }

        let mut table = self.table.write().await;
        let existing = table
            .find(&account.username)
            .or_else(|| table.find(&account.email))
            .cloned();
        if let Some(existing) = existing {
            tracing::debug!("Account {} already exists, returning it", existing.username);
            return Ok(existing);
        }

        table.issued += 1;
        let created = DirectoryAccount {
            username: account.username.clone(),
            email: account.email.clone(),
            enabled: account.enabled,
            sub: format!("sub-{}", table.issued),
            status: Some(STATUS_CONFIRMED.to_string()),
        };
        table
            .accounts
            .insert(created.username.clone(), created.clone());
        Ok(created)
    }

    async fn get(&self, identifier: &str) -> Result<DirectoryAccount, Error> {
        self.table
            .read()
            .await
            .find(identifier)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("account {}", identifier)))
    }

    async fn update(&self, account: &DirectoryAccount) -> Result<(), Error> {
        let identifier = account.identifier();
        if identifier.is_empty() {
            return Err(Error::invalid_input("account identifier cannot be empty"));
        }

        let mut table = self.table.write().await;
        let key = table
            .find_key(identifier)
            .ok_or_else(|| Error::not_found(format!("account {}", identifier)))?;
        if let Some(stored) = table.accounts.get_mut(&key) {
            stored.email = account.email.clone();
            stored.enabled = account.enabled;
        }
        Ok(())
    }

    async fn delete(&self, identifier: &str) -> Result<(), Error> {
        let mut table = self.table.write().await;
        if let Some(key) = table.find_key(identifier) {
            table.accounts.remove(&key);
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<DirectoryAccount>, Error> {
        Ok(self.table.read().await.accounts.values().cloned().collect())
    }

    fn directory_name(&self) -> &'static str {
        "memory"
    }
}

/// Factory for creating memory directories
pub struct MemoryDirectoryFactory;

#[async_trait]
impl DirectoryClientFactory for MemoryDirectoryFactory {
    async fn create(&self, config: &DirectoryConfig) -> Result<Box<dyn DirectoryClient>, Error> {
        match config {
            DirectoryConfig::Memory => Ok(Box::new(MemoryDirectory::new())),
            _ => Err(Error::config("Invalid config for memory directory")),
        }
    }
}
