use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of configuration object collected from Microsoft Graph
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceType {
    #[serde(rename = "users")]
    Users,
    #[serde(rename = "groups")]
    Groups,
    #[serde(rename = "conditionalAccessPolicies")]
    ConditionalAccessPolicies,
    #[serde(rename = "authenticationMethodsPolicy")]
    AuthenticationMethodsPolicy,
    #[serde(rename = "directoryRoles")]
    DirectoryRoles,
    #[serde(rename = "sharingSettings")]
    SharingSettings,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Users => "users",
            ResourceType::Groups => "groups",
            ResourceType::ConditionalAccessPolicies => "conditionalAccessPolicies",
            ResourceType::AuthenticationMethodsPolicy => "authenticationMethodsPolicy",
            ResourceType::DirectoryRoles => "directoryRoles",
            ResourceType::SharingSettings => "sharingSettings",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "users" => Some(ResourceType::Users),
            "groups" => Some(ResourceType::Groups),
            "conditionalAccessPolicies" => Some(ResourceType::ConditionalAccessPolicies),
            "authenticationMethodsPolicy" => Some(ResourceType::AuthenticationMethodsPolicy),
            "directoryRoles" => Some(ResourceType::DirectoryRoles),
            "sharingSettings" => Some(ResourceType::SharingSettings),
            _ => None,
        }
    }

    /// Graph path (relative to the API base URL) listing this resource type
    pub fn graph_path(&self) -> &'static str {
        match self {
            ResourceType::Users => "users",
            ResourceType::Groups => "groups",
            ResourceType::ConditionalAccessPolicies => "identity/conditionalAccess/policies",
            ResourceType::AuthenticationMethodsPolicy => "policies/authenticationMethodsPolicy",
            ResourceType::DirectoryRoles => "directoryRoles?$expand=members",
            ResourceType::SharingSettings => "admin/sharepoint/settings",
        }
    }

    pub fn all() -> Vec<Self> {
        vec![
            ResourceType::Users,
            ResourceType::Groups,
            ResourceType::ConditionalAccessPolicies,
            ResourceType::AuthenticationMethodsPolicy,
            ResourceType::DirectoryRoles,
            ResourceType::SharingSettings,
        ]
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cache key of one collected resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapshotKey {
    pub tenant_id: String,
    pub resource_type: ResourceType,
    pub resource_id: String,
}

impl SnapshotKey {
    pub fn new(tenant_id: &str, resource_type: ResourceType, resource_id: &str) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            resource_type,
            resource_id: resource_id.to_string(),
        }
    }
}

impl fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.tenant_id, self.resource_type, self.resource_id)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    Fresh,
    Stale,
    Missing,
}

impl Freshness {
    pub fn is_servable(&self) -> bool {
        !matches!(self, Freshness::Missing)
    }
}

/// Resource id of a Graph payload. Singleton settings objects without an `id`
/// are keyed by their resource type name.
pub fn resource_id_of(resource_type: ResourceType, item: &serde_json::Value) -> String {
    match item.get("id") {
        Some(serde_json::Value::String(id)) if !id.is_empty() => id.clone(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => resource_type.as_str().to_string(),
    }
}
