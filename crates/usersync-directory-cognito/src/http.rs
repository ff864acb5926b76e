//! HTTP transport for the Cognito JSON protocol
//!
//! Each operation is a `POST /` with `X-Amz-Target` naming the operation.
//! Service errors come back as a non-2xx status with a `__type` code in the
//! body (or the `x-amzn-ErrorType` header).

use crate::api::*;
use crate::sigv4::{self, Credentials};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Default HTTP timeout for API requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

const TARGET_PREFIX: &str = "AWSCognitoIdentityProviderService";

/// Reqwest-backed [`CognitoApi`]
pub struct HttpCognitoApi {
    client: reqwest::Client,
    endpoint: reqwest::Url,
    region: String,
    /// `None` sends unsigned requests (local emulators, signing proxies)
    credentials: Option<Credentials>,
}

impl std::fmt::Debug for HttpCognitoApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCognitoApi")
            .field("endpoint", &self.endpoint.as_str())
            .field("region", &self.region)
            .field("signed", &self.credentials.is_some())
            .finish()
    }
}

impl HttpCognitoApi {
    /// Create a client for `region`, optionally against an endpoint override
    pub fn new(
        region: impl Into<String>,
        endpoint: Option<&str>,
        credentials: Option<Credentials>,
    ) -> usersync_core::Result<Self> {
        let region = region.into();
        let endpoint = match endpoint {
            Some(endpoint) => endpoint.to_string(),
            None => regional_endpoint(&region),
        };
        let endpoint = reqwest::Url::parse(&endpoint).map_err(|e| {
            usersync_core::Error::config(format!("Invalid Cognito endpoint {}: {}", endpoint, e))
        })?;

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| usersync_core::Error::http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            region,
            credentials,
        })
    }

    /// The URL requests are sent to
    pub fn endpoint(&self) -> &str {
        self.endpoint.as_str()
    }

    fn host_header(&self) -> String {
        let host = self.endpoint.host_str().unwrap_or_default();
        match self.endpoint.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    async fn invoke<Req, Resp>(&self, operation: &str, request: &Req) -> Result<Resp, ApiError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let target = format!("{}.{}", TARGET_PREFIX, operation);
        let body = serde_json::to_vec(request).map_err(|e| ApiError::Decode(e.to_string()))?;

        let mut builder = self
            .client
            .post(self.endpoint.clone())
            .header("Content-Type", sigv4::CONTENT_TYPE)
            .header("X-Amz-Target", &target);

        if let Some(credentials) = &self.credentials {
            let signed = sigv4::sign(
                credentials,
                &self.region,
                &self.host_header(),
                &target,
                &body,
                chrono::Utc::now(),
            )
            .map_err(|e| ApiError::Transport(e.to_string()))?;
            builder = builder
                .header("X-Amz-Date", signed.x_amz_date)
                .header("Authorization", signed.authorization);
            if let Some(token) = signed.security_token {
                builder = builder.header("X-Amz-Security-Token", token);
            }
        }

        tracing::debug!(operation, "Cognito request");

        let response = builder
            .body(body)
            .send()
            .await
            .map_err(|e| ApiError::Transport(format!("{} request failed: {}", operation, e)))?;

        let status = response.status();
        let header_code = response
            .headers()
            .get("x-amzn-ErrorType")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(':').next().unwrap_or(v).to_string());
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ApiError::Transport(format!("{} response unreadable: {}", operation, e)))?;

        if !status.is_success() {
            return Err(service_error(status, header_code, &bytes));
        }

        // Operations without output return an empty body
        let bytes: &[u8] = if bytes.is_empty() { b"{}" } else { &bytes[..] };
        serde_json::from_slice(bytes)
            .map_err(|e| ApiError::Decode(format!("{} response: {}", operation, e)))
    }
}

/// Default public endpoint of a region
pub fn regional_endpoint(region: &str) -> String {
    format!("https://cognito-idp.{}.amazonaws.com/", region)
}

fn service_error(status: reqwest::StatusCode, header_code: Option<String>, body: &[u8]) -> ApiError {
    let json: serde_json::Value = serde_json::from_slice(body).unwrap_or_default();
    let code = json["__type"]
        .as_str()
        .map(str::to_string)
        .or(header_code);
    let message = json["message"]
        .as_str()
        .or_else(|| json["Message"].as_str())
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {}", status));

    match code {
        Some(code) => ApiError::from_code(&code, message),
        None if status.as_u16() == 429 => ApiError::Throttling(message),
        None => ApiError::Service {
            code: format!("HTTP{}", status.as_u16()),
            message,
        },
    }
}

/// `{}` outputs
#[derive(serde::Deserialize)]
struct Empty {}

#[async_trait]
impl CognitoApi for HttpCognitoApi {
    async fn admin_create_user(
        &self,
        request: AdminCreateUserRequest,
    ) -> Result<AdminCreateUserResponse, ApiError> {
        self.invoke("AdminCreateUser", &request).await
    }

    async fn admin_get_user(&self, request: AdminUserRequest) -> Result<UserType, ApiError> {
        self.invoke("AdminGetUser", &request).await
    }

    async fn admin_update_user_attributes(
        &self,
        request: AdminUpdateUserAttributesRequest,
    ) -> Result<(), ApiError> {
        self.invoke::<_, Empty>("AdminUpdateUserAttributes", &request)
            .await
            .map(|_| ())
    }

    async fn admin_enable_user(&self, request: AdminUserRequest) -> Result<(), ApiError> {
        self.invoke::<_, Empty>("AdminEnableUser", &request)
            .await
            .map(|_| ())
    }

    async fn admin_disable_user(&self, request: AdminUserRequest) -> Result<(), ApiError> {
        self.invoke::<_, Empty>("AdminDisableUser", &request)
            .await
            .map(|_| ())
    }

    async fn admin_delete_user(&self, request: AdminUserRequest) -> Result<(), ApiError> {
        self.invoke::<_, Empty>("AdminDeleteUser", &request)
            .await
            .map(|_| ())
    }

    async fn list_users(&self, request: ListUsersRequest) -> Result<ListUsersResponse, ApiError> {
        self.invoke("ListUsers", &request).await
    }

    async fn list_user_pools(
        &self,
        request: ListUserPoolsRequest,
    ) -> Result<ListUserPoolsResponse, ApiError> {
        self.invoke("ListUserPools", &request).await
    }
}
