// # Cognito Directory Binding
//
// This crate implements `DirectoryClient` against an AWS Cognito user pool.
//
// ## Behaviour
//
// - Accounts are registered with the email as username, the `email` and
//   `email_verified=true` attributes, and the welcome message suppressed
// - `create` is idempotent: `UsernameExistsException` resolves to the
//   existing account
// - `delete` treats `UserNotFoundException` as success
// - `update` writes the email attribute, then enables or disables the account
// - `list` follows `PaginationToken` until exhausted
// - Pools configured by name are resolved once, at construction
//
// ## Constraints
//
// - One API request per operation step; no retry, no caching. The
//   reconciler owns re-attempts.
// - Credentials come from the environment and never appear in logs.
//
// ## API Reference
//
// - Cognito Identity Provider API: JSON 1.1 protocol, `POST /` with
//   `X-Amz-Target: AWSCognitoIdentityProviderService.<Operation>`

pub mod api;
pub mod http;
pub mod sigv4;

use api::*;
use async_trait::async_trait;
use std::sync::Arc;
use usersync_core::config::{DirectoryConfig, UserPoolRef};
use usersync_core::traits::{DirectoryAccount, DirectoryClient, DirectoryClientFactory};
use usersync_core::{Error, Result};

pub use http::HttpCognitoApi;
pub use sigv4::Credentials;

/// Suppresses the invitation message on `AdminCreateUser`
const MESSAGE_ACTION_SUPPRESS: &str = "SUPPRESS";

const ATTR_EMAIL: &str = "email";
const ATTR_EMAIL_VERIFIED: &str = "email_verified";
const ATTR_SUB: &str = "sub";

/// Cognito user pool directory
pub struct CognitoDirectory {
    api: Arc<dyn CognitoApi>,
    user_pool_id: String,
}

impl std::fmt::Debug for CognitoDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CognitoDirectory")
            .field("user_pool_id", &self.user_pool_id)
            .finish()
    }
}

impl CognitoDirectory {
    /// Bind to a pool by id
    pub fn new(api: Arc<dyn CognitoApi>, user_pool_id: impl Into<String>) -> Result<Self> {
        let user_pool_id = user_pool_id.into();
        if user_pool_id.is_empty() {
            return Err(Error::config("Cognito user pool id cannot be empty"));
        }
        Ok(Self { api, user_pool_id })
    }

    /// Bind to a pool by name
    ///
    /// The name is resolved to an id once, here; later renames of the pool
    /// are not followed.
    pub async fn by_name(api: Arc<dyn CognitoApi>, user_pool_name: &str) -> Result<Self> {
        if user_pool_name.is_empty() {
            return Err(Error::config("Cognito user pool name cannot be empty"));
        }
        let user_pool_id = find_user_pool_id_by_name(api.as_ref(), user_pool_name).await?;
        Self::new(api, user_pool_id)
    }

    /// The resolved pool id
    pub fn user_pool_id(&self) -> &str {
        &self.user_pool_id
    }

    fn user_request(&self, username: &str) -> AdminUserRequest {
        AdminUserRequest {
            user_pool_id: self.user_pool_id.clone(),
            username: username.to_string(),
        }
    }

    async fn set_enabled(&self, username: &str, enabled: bool) -> Result<()> {
        let request = self.user_request(username);
        if enabled {
            self.api.admin_enable_user(request).await?;
        } else {
            self.api.admin_disable_user(request).await?;
        }
        Ok(())
    }
}

/// Find the id of the pool whose name matches `name`, ignoring case
///
/// Pages through `ListUserPools` at the maximum page size. Returns
/// [`Error::NotFound`] when no pool matches.
pub async fn find_user_pool_id_by_name(api: &dyn CognitoApi, name: &str) -> Result<String> {
    let mut next_token = None;

    loop {
        let page = api
            .list_user_pools(ListUserPoolsRequest {
                max_results: MAX_USER_POOLS_PAGE,
                next_token: next_token.take(),
            })
            .await?;

        let found = page.user_pools.into_iter().find_map(|pool| match (pool.name, pool.id) {
            (Some(pool_name), Some(id)) if pool_name.to_lowercase() == name.to_lowercase() => {
                Some(id)
            }
            _ => None,
        });
        if let Some(id) = found {
            tracing::debug!("Resolved user pool {} to {}", name, id);
            return Ok(id);
        }

        match page.next_token {
            Some(token) if !token.is_empty() => next_token = Some(token),
            _ => break,
        }
    }

    Err(Error::not_found(format!("user pool with name {} not found", name)))
}

/// Convert a Cognito user into the engine's account view
fn to_account(user: UserType, fallback_username: &str) -> DirectoryAccount {
    DirectoryAccount {
        username: user
            .username
            .unwrap_or_else(|| fallback_username.to_string()),
        email: attribute(&user.attributes, ATTR_EMAIL)
            .unwrap_or_default()
            .to_string(),
        enabled: user.enabled.unwrap_or(true),
        sub: attribute(&user.attributes, ATTR_SUB)
            .unwrap_or_default()
            .to_string(),
        status: user.user_status,
    }
}

#[async_trait]
impl DirectoryClient for CognitoDirectory {
    async fn create(&self, account: &DirectoryAccount) -> Result<DirectoryAccount> {
        if account.email.is_empty() {
            return Err(Error::invalid_input("email cannot be empty"));
        }

        let request = AdminCreateUserRequest {
            user_pool_id: self.user_pool_id.clone(),
            username: account.email.clone(),
            user_attributes: vec![
                AttributeType::new(ATTR_EMAIL, account.email.as_str()),
                AttributeType::new(ATTR_EMAIL_VERIFIED, "true"),
            ],
            message_action: Some(MESSAGE_ACTION_SUPPRESS.to_string()),
        };

        let created = match self.api.admin_create_user(request).await {
            Ok(response) => response.user,
            Err(ApiError::UsernameExists(_)) => {
                tracing::info!("Cognito user {} already exists, adopting it", account.email);
                return self.get(&account.email).await;
            }
            Err(e) => return Err(e.into()),
        };

        let mut created = match created {
            Some(user) if attribute(&user.attributes, ATTR_SUB).is_some() => {
                to_account(user, &account.email)
            }
            // The response omitted the subject id; read it back
            _ => self.get(&account.email).await?,
        };

        if !account.enabled && created.enabled {
            self.set_enabled(&created.username, false).await?;
            created.enabled = false;
        }

        tracing::info!("Created Cognito user {} (sub {})", created.username, created.sub);
        Ok(created)
    }

    async fn get(&self, identifier: &str) -> Result<DirectoryAccount> {
        if identifier.is_empty() {
            return Err(Error::invalid_input("identifier cannot be empty"));
        }

        let user = self.api.admin_get_user(self.user_request(identifier)).await?;
        Ok(to_account(user, identifier))
    }

    async fn update(&self, account: &DirectoryAccount) -> Result<()> {
        let identifier = account.identifier();
        if identifier.is_empty() {
            return Err(Error::invalid_input("identifier cannot be empty"));
        }

        self.api
            .admin_update_user_attributes(AdminUpdateUserAttributesRequest {
                user_pool_id: self.user_pool_id.clone(),
                username: identifier.to_string(),
                user_attributes: vec![
                    AttributeType::new(ATTR_EMAIL, account.email.as_str()),
                    AttributeType::new(ATTR_EMAIL_VERIFIED, "true"),
                ],
            })
            .await?;

        self.set_enabled(identifier, account.enabled).await?;

        tracing::info!(
            "Updated Cognito user {} (email {}, enabled {})",
            identifier,
            account.email,
            account.enabled
        );
        Ok(())
    }

    async fn delete(&self, identifier: &str) -> Result<()> {
        if identifier.is_empty() {
            return Err(Error::invalid_input("identifier cannot be empty"));
        }

        match self.api.admin_delete_user(self.user_request(identifier)).await {
            Ok(()) => {
                tracing::info!("Deleted Cognito user {}", identifier);
                Ok(())
            }
            Err(ApiError::UserNotFound(_)) => {
                tracing::debug!("Cognito user {} already gone", identifier);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<DirectoryAccount>> {
        let mut accounts = Vec::new();
        let mut pagination_token = None;

        loop {
            let page = self
                .api
                .list_users(ListUsersRequest {
                    user_pool_id: self.user_pool_id.clone(),
                    pagination_token: pagination_token.take(),
                })
                .await?;

            accounts.extend(
                page.users
                    .into_iter()
                    .filter(|user| user.username.is_some())
                    .map(|user| to_account(user, "")),
            );

            match page.pagination_token {
                Some(token) if !token.is_empty() => pagination_token = Some(token),
                _ => break,
            }
        }

        Ok(accounts)
    }

    fn directory_name(&self) -> &'static str {
        "cognito"
    }
}

/// Factory for creating Cognito directories
pub struct CognitoFactory;

#[async_trait]
impl DirectoryClientFactory for CognitoFactory {
    async fn create(&self, config: &DirectoryConfig) -> Result<Box<dyn DirectoryClient>> {
        match config {
            DirectoryConfig::Cognito {
                user_pool,
                region,
                endpoint,
            } => {
                config.validate()?;

                let credentials = Credentials::from_env();
                if credentials.is_none() {
                    tracing::warn!(
                        "No AWS credentials in the environment; Cognito requests will be unsigned"
                    );
                }

                let api: Arc<dyn CognitoApi> = Arc::new(HttpCognitoApi::new(
                    region.clone(),
                    endpoint.as_deref(),
                    credentials,
                )?);

                let directory = match user_pool {
                    UserPoolRef::Id(id) => CognitoDirectory::new(api, id.clone())?,
                    UserPoolRef::Name(name) => CognitoDirectory::by_name(api, name).await?,
                };

                tracing::info!(
                    "Cognito directory bound to user pool {}",
                    directory.user_pool_id()
                );
                Ok(Box::new(directory))
            }
            _ => Err(Error::config("Invalid config for Cognito directory")),
        }
    }
}

/// Register the Cognito directory with a registry
///
/// # Example
///
/// ```rust
/// use usersync_core::Registry;
///
/// let registry = Registry::with_builtin();
/// usersync_directory_cognito::register(&registry);
/// assert!(registry.has_directory("cognito"));
/// ```
pub fn register(registry: &usersync_core::Registry) {
    registry.register_directory("cognito", Box::new(CognitoFactory));
}
