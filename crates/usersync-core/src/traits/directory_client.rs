// # Directory Client Trait
//
// Defines the capability set the engine needs against the external user pool.
//
// ## Implementations
//
// - Cognito: `usersync-directory-cognito` crate
// - In-memory: `usersync_core::directory::MemoryDirectory` (tests, embedding)
//
// ## Usage
//
// ```rust,ignore
// use usersync_core::DirectoryClient;
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let directory = /* DirectoryClient implementation */;
//
//     let account = directory.get("alice@example.com").await?;
//     println!("sub = {}", account.sub);
//
//     Ok(())
// }
// ```

use async_trait::async_trait;

/// An account in the external user pool
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryAccount {
    /// Username the account is registered under
    pub username: String,
    /// Email attribute
    pub email: String,
    /// Whether the account may sign in
    pub enabled: bool,
    /// Provider-assigned subject id; empty when not yet known
    pub sub: String,
    /// Provider account state (e.g. `CONFIRMED`), when reported
    pub status: Option<String>,
}

impl DirectoryAccount {
    /// Describe a desired account that has not been created yet
    pub fn desired(username: impl Into<String>, email: impl Into<String>, enabled: bool) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            enabled,
            sub: String::new(),
            status: None,
        }
    }

    /// Identifier the provider should address this account by
    ///
    /// The subject id wins once known; otherwise the username.
    pub fn identifier(&self) -> &str {
        if self.sub.is_empty() {
            &self.username
        } else {
            &self.sub
        }
    }

    /// Whether the drift-able attributes differ from `other`
    pub fn differs_from(&self, email: &str, enabled: bool) -> bool {
        self.email != email || self.enabled != enabled
    }
}

/// Trait for user pool implementations
///
/// Every call goes to the live provider: implementations keep no cache and
/// implement no retry. The engine decides when to re-attempt.
///
/// # Errors
///
/// Implementations report a missing account as [`crate::Error::NotFound`];
/// every other failure is treated by the engine as transient.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Create an account
    ///
    /// Must be idempotent: when the provider reports that the account already
    /// exists, the existing account is fetched and returned instead of failing.
    /// `account.email` must be non-empty.
    async fn create(&self, account: &DirectoryAccount) -> Result<DirectoryAccount, crate::Error>;

    /// Fetch an account by subject id, email or username
    ///
    /// Returns [`crate::Error::NotFound`] when no account matches.
    async fn get(&self, identifier: &str) -> Result<DirectoryAccount, crate::Error>;

    /// Apply the email and enabled attributes of `account`
    ///
    /// The account is addressed by [`DirectoryAccount::identifier`], which
    /// must be non-empty.
    async fn update(&self, account: &DirectoryAccount) -> Result<(), crate::Error>;

    /// Delete an account
    ///
    /// An account that is already gone is not an error.
    async fn delete(&self, identifier: &str) -> Result<(), crate::Error>;

    /// Enumerate every account in the pool, following pagination
    ///
    /// An empty pool yields an empty vector.
    async fn list(&self) -> Result<Vec<DirectoryAccount>, crate::Error>;

    /// Name of the binding (for logging)
    fn directory_name(&self) -> &'static str;
}

/// Helper trait for constructing directory clients from configuration
#[async_trait]
pub trait DirectoryClientFactory: Send + Sync {
    /// Create a DirectoryClient instance from configuration
    ///
    /// Async because some bindings resolve the pool (e.g. by name) up front.
    async fn create(
        &self,
        config: &crate::config::DirectoryConfig,
    ) -> Result<Box<dyn DirectoryClient>, crate::Error>;
}
