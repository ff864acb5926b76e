//! Cognito Identity Provider wire types and the operation seam
//!
//! The JSON protocol uses PascalCase field names. Only the fields the
//! binding reads or writes are modelled; everything else is ignored.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum page size accepted by `ListUserPools`
pub const MAX_USER_POOLS_PAGE: i32 = 60;

/// Name/value pair as used by the user attribute APIs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AttributeType {
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
}

impl AttributeType {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }
}

/// Look up an attribute value by name
pub fn attribute<'a>(attributes: &'a [AttributeType], name: &str) -> Option<&'a str> {
    attributes
        .iter()
        .find(|a| a.name == name)
        .and_then(|a| a.value.as_deref())
}

/// A user as returned by `AdminCreateUser`, `AdminGetUser` and `ListUsers`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserType {
    #[serde(default)]
    pub username: Option<String>,
    /// `Attributes` in create/list responses, `UserAttributes` in get
    #[serde(default, alias = "UserAttributes")]
    pub attributes: Vec<AttributeType>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub user_status: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AdminCreateUserRequest {
    pub user_pool_id: String,
    pub username: String,
    pub user_attributes: Vec<AttributeType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_action: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AdminCreateUserResponse {
    #[serde(default)]
    pub user: Option<UserType>,
}

/// Request shape shared by the single-user admin operations
/// (`AdminGetUser`, `AdminEnableUser`, `AdminDisableUser`, `AdminDeleteUser`)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AdminUserRequest {
    pub user_pool_id: String,
    pub username: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AdminUpdateUserAttributesRequest {
    pub user_pool_id: String,
    pub username: String,
    pub user_attributes: Vec<AttributeType>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListUsersRequest {
    pub user_pool_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListUsersResponse {
    #[serde(default)]
    pub users: Vec<UserType>,
    #[serde(default)]
    pub pagination_token: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListUserPoolsRequest {
    pub max_results: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserPoolDescription {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListUserPoolsResponse {
    #[serde(default)]
    pub user_pools: Vec<UserPoolDescription>,
    #[serde(default)]
    pub next_token: Option<String>,
}

/// Failure of a single Cognito API call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("username already exists: {0}")]
    UsernameExists(String),

    #[error("user not found: {0}")]
    UserNotFound(String),

    #[error("request throttled: {0}")]
    Throttling(String),

    /// Any other service-side exception, by its `__type` code
    #[error("{code}: {message}")]
    Service { code: String, message: String },

    /// The request never produced a service response
    #[error("transport failure: {0}")]
    Transport(String),

    /// The response body could not be decoded
    #[error("malformed response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Classify a service error by its exception code
    ///
    /// Codes may arrive fully qualified (`com.amazonaws...#UserNotFoundException`).
    pub fn from_code(code: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        let short = code.rsplit('#').next().unwrap_or(code);
        match short {
            "UsernameExistsException" => Self::UsernameExists(message),
            "UserNotFoundException" => Self::UserNotFound(message),
            "TooManyRequestsException" | "ThrottlingException" => Self::Throttling(message),
            _ => Self::Service {
                code: short.to_string(),
                message,
            },
        }
    }
}

impl From<ApiError> for usersync_core::Error {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::UserNotFound(msg) => usersync_core::Error::not_found(msg),
            ApiError::UsernameExists(msg) => usersync_core::Error::conflict(msg),
            ApiError::Transport(msg) => usersync_core::Error::http(msg),
            other => usersync_core::Error::provider("cognito", other.to_string()),
        }
    }
}

/// The subset of the Cognito Identity Provider API the binding calls
///
/// One method per API operation; implementations make exactly one request
/// per call.
#[async_trait]
pub trait CognitoApi: Send + Sync {
    async fn admin_create_user(
        &self,
        request: AdminCreateUserRequest,
    ) -> Result<AdminCreateUserResponse, ApiError>;

    async fn admin_get_user(&self, request: AdminUserRequest) -> Result<UserType, ApiError>;

    async fn admin_update_user_attributes(
        &self,
        request: AdminUpdateUserAttributesRequest,
    ) -> Result<(), ApiError>;

    async fn admin_enable_user(&self, request: AdminUserRequest) -> Result<(), ApiError>;

    async fn admin_disable_user(&self, request: AdminUserRequest) -> Result<(), ApiError>;

    async fn admin_delete_user(&self, request: AdminUserRequest) -> Result<(), ApiError>;

    async fn list_users(&self, request: ListUsersRequest) -> Result<ListUsersResponse, ApiError>;

    async fn list_user_pools(
        &self,
        request: ListUserPoolsRequest,
    ) -> Result<ListUserPoolsResponse, ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_classified() {
        assert_eq!(
            ApiError::from_code("UserNotFoundException", "gone"),
            ApiError::UserNotFound("gone".to_string())
        );
        assert_eq!(
            ApiError::from_code(
                "com.amazonaws.cognito.identity.idp.model#UsernameExistsException",
                "taken"
            ),
            ApiError::UsernameExists("taken".to_string())
        );
        assert!(matches!(
            ApiError::from_code("TooManyRequestsException", "slow down"),
            ApiError::Throttling(_)
        ));
        assert!(matches!(
            ApiError::from_code("InternalErrorException", "boom"),
            ApiError::Service { code, .. } if code == "InternalErrorException"
        ));
    }

    #[test]
    fn test_not_found_maps_to_core_not_found() {
        let err: usersync_core::Error = ApiError::UserNotFound("alice".to_string()).into();
        assert!(err.is_not_found());

        let err: usersync_core::Error = ApiError::Throttling("slow".to_string()).into();
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_get_user_response_uses_user_attributes_alias() {
        let body = serde_json::json!({
            "Username": "a@x.com",
            "UserAttributes": [
                { "Name": "sub", "Value": "1234" },
                { "Name": "email", "Value": "a@x.com" }
            ],
            "Enabled": true,
            "UserStatus": "CONFIRMED"
        });

        let user: UserType = serde_json::from_value(body).unwrap();
        assert_eq!(attribute(&user.attributes, "sub"), Some("1234"));
        assert_eq!(user.enabled, Some(true));
        assert_eq!(user.user_status.as_deref(), Some("CONFIRMED"));
    }

    #[test]
    fn test_create_request_serializes_pascal_case() {
        let request = AdminCreateUserRequest {
            user_pool_id: "eu-west-1_abc".to_string(),
            username: "a@x.com".to_string(),
            user_attributes: vec![AttributeType::new("email", "a@x.com")],
            message_action: Some("SUPPRESS".to_string()),
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["UserPoolId"], "eu-west-1_abc");
        assert_eq!(json["MessageAction"], "SUPPRESS");
        assert_eq!(json["UserAttributes"][0]["Name"], "email");
    }
}
