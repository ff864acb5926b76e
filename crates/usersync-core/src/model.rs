//! Control object types
//!
//! [`ManagedUser`] is the declarative resource the engine reconciles. Its
//! JSON shape follows the `kcp.cogniteo.io/v1alpha1` `User` kind so stored
//! objects stay readable by the surrounding platform.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// API group owning the `User` kind
pub const API_GROUP: &str = "kcp.cogniteo.io";

/// Versioned API of the `User` kind
pub const API_VERSION: &str = "kcp.cogniteo.io/v1alpha1";

/// Kind name of the control object
pub const USER_KIND: &str = "User";

/// Finalizer owned by the engine, gating deletion on user pool cleanup
pub const CLEANUP_FINALIZER: &str = "kcp.cogniteo.io/user-pool-cleanup";

/// Annotation stamped on every completed pass (RFC 3339)
pub const LAST_RECONCILED_ANNOTATION: &str = "kcp.cogniteo.io/lastReconciledAt";

/// Directory status recorded after a successful create
pub const STATUS_CONFIRMED: &str = "CONFIRMED";

/// API version and kind of a stored object
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeMeta {
    /// e.g. `kcp.cogniteo.io/v1alpha1`
    pub api_version: String,
    /// e.g. `User`
    pub kind: String,
}

impl TypeMeta {
    /// Create a type descriptor
    pub fn new(api_version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
        }
    }

    /// The `kcp.cogniteo.io/v1alpha1` `User` type
    pub fn user() -> Self {
        Self::new(API_VERSION, USER_KIND)
    }
}

impl Default for TypeMeta {
    fn default() -> Self {
        Self::user()
    }
}

impl fmt::Display for TypeMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api_version, self.kind)
    }
}

/// Reference delivered by a trigger: the only input a pass trusts
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    /// Logical cluster the object lives in
    pub cluster: String,
    /// Namespace within the cluster
    pub namespace: String,
    /// Object name, unique within the namespace
    pub name: String,
}

impl ObjectRef {
    /// Create a reference
    pub fn new(
        cluster: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            cluster: cluster.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Reject references that cannot address an object
    pub fn validate(&self) -> crate::Result<()> {
        if self.cluster.trim().is_empty() {
            return Err(crate::Error::invalid_input(format!(
                "reference {} has an empty cluster",
                self
            )));
        }
        if self.name.trim().is_empty() {
            return Err(crate::Error::invalid_input(format!(
                "reference {} has an empty name",
                self
            )));
        }
        Ok(())
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.cluster, self.namespace, self.name)
    }
}

/// Object metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Local identity of the user
    pub name: String,

    /// Namespace within the cluster
    #[serde(default)]
    pub namespace: String,

    /// Logical cluster
    #[serde(default)]
    pub cluster: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// Ordered set of deletion-gating markers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,

    /// Set by the platform when deletion has been requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,

    /// Bumped by the store when the spec changes
    #[serde(default)]
    pub generation: i64,

    /// Bumped by the store on every write
    #[serde(default)]
    pub resource_version: u64,
}

/// Desired state, owned by whoever declares the user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSpec {
    /// Email address of the account
    #[serde(default)]
    pub email: String,

    /// Whether the account may sign in
    #[serde(default)]
    pub enabled: bool,
}

/// Observed state, written only by the engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatus {
    /// Directory-assigned subject id; empty until the first create
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sub: String,

    /// Account state reported by the directory (e.g. `CONFIRMED`)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_pool_status: String,

    /// Last time the directory was confirmed to match the spec
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<DateTime<Utc>>,

    /// Generation the status was computed from
    #[serde(default)]
    pub observed_generation: i64,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Tri-state condition value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// A single observed condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type, e.g. `Ready`
    #[serde(rename = "type")]
    pub type_: String,

    pub status: ConditionStatus,

    /// Machine-readable reason in CamelCase
    pub reason: String,

    /// Human-readable detail
    #[serde(default)]
    pub message: String,

    /// Last time `status` changed
    pub last_transition_time: DateTime<Utc>,

    #[serde(default)]
    pub observed_generation: i64,
}

/// The control object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedUser {
    #[serde(flatten)]
    pub type_meta: TypeMeta,

    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: UserSpec,

    #[serde(default)]
    pub status: UserStatus,
}

impl ManagedUser {
    /// Create a user addressed by `object_ref` with the given desired state
    pub fn new(object_ref: &ObjectRef, spec: UserSpec) -> Self {
        Self {
            type_meta: TypeMeta::user(),
            metadata: ObjectMeta {
                name: object_ref.name.clone(),
                namespace: object_ref.namespace.clone(),
                cluster: object_ref.cluster.clone(),
                ..ObjectMeta::default()
            },
            spec,
            status: UserStatus::default(),
        }
    }

    /// Reference addressing this object
    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef::new(
            self.metadata.cluster.clone(),
            self.metadata.namespace.clone(),
            self.metadata.name.clone(),
        )
    }

    /// Local identity of the user
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Whether deletion has been requested
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Whether the engine's cleanup finalizer is present
    pub fn has_cleanup_finalizer(&self) -> bool {
        crate::finalizer::contains(&self.metadata.finalizers, CLEANUP_FINALIZER)
    }

    /// Last-reconciled annotation, if stamped
    pub fn last_reconciled_at(&self) -> Option<&str> {
        self.metadata
            .annotations
            .get(LAST_RECONCILED_ANNOTATION)
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_json_shape() {
        let object_ref = ObjectRef::new("root:org", "default", "alice");
        let mut user = ManagedUser::new(
            &object_ref,
            UserSpec {
                email: "a@x.com".to_string(),
                enabled: true,
            },
        );
        user.status.user_pool_status = STATUS_CONFIRMED.to_string();

        let json = serde_json::to_value(&user).unwrap();
        assert_eq!(json["apiVersion"], API_VERSION);
        assert_eq!(json["kind"], USER_KIND);
        assert_eq!(json["metadata"]["name"], "alice");
        assert_eq!(json["spec"]["email"], "a@x.com");
        assert_eq!(json["status"]["userPoolStatus"], "CONFIRMED");
        assert!(json["status"].get("sub").is_none());

        let back: ManagedUser = serde_json::from_value(json).unwrap();
        assert_eq!(back.object_ref(), object_ref);
    }

    #[test]
    fn test_object_ref_validation() {
        assert!(ObjectRef::new("c", "ns", "alice").validate().is_ok());
        assert!(ObjectRef::new("c", "", "alice").validate().is_ok());
        assert!(ObjectRef::new("", "ns", "alice").validate().is_err());
        assert!(ObjectRef::new("c", "ns", " ").validate().is_err());
    }

    #[test]
    fn test_deletion_and_finalizer_flags() {
        let mut user = ManagedUser::new(&ObjectRef::new("c", "ns", "u1"), UserSpec::default());
        assert!(!user.is_deleting());
        assert!(!user.has_cleanup_finalizer());

        user.metadata.finalizers.push(CLEANUP_FINALIZER.to_string());
        user.metadata.deletion_timestamp = Some(Utc::now());
        assert!(user.is_deleting());
        assert!(user.has_cleanup_finalizer());
    }
}
