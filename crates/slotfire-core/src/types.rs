use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a scheduled job (UUIDv7, time-sortable for easier log correlation).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identity of whoever requested a job. Opaque to the engine: it only routes
/// notifications and gates cancel/list on it (a Telegram chat id in practice).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub String);

impl OwnerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for OwnerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for OwnerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// What a job acts on, e.g. `court-3:2024-03-10:18:00`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceKey(pub String);

impl ResourceKey {
    /// Join subject and slot identifiers with `:`. Empty parts are skipped.
    pub fn from_parts<S: AsRef<str>>(parts: &[S]) -> Self {
        let joined = parts
            .iter()
            .map(|p| p.as_ref().trim())
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join(":");
        Self(joined)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ResourceKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ResourceKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Mutual-exclusion identity of a job.
///
/// Two jobs with the same owner and resource never execute at the same time.
/// Equality compares the parts, so a `:` inside either one cannot make two
/// different pairs collide. Displays as `owner:{owner}:resource:{resource_key}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollisionKey {
    pub owner: OwnerId,
    pub resource: ResourceKey,
}

impl CollisionKey {
    pub fn new(owner: &OwnerId, resource: &ResourceKey) -> Self {
        Self {
            owner: owner.clone(),
            resource: resource.clone(),
        }
    }
}

impl fmt::Display for CollisionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "owner:{}:resource:{}", self.owner, self.resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_ids_are_unique() {
        assert_ne!(JobId::new(), JobId::new());
    }

    #[test]
    fn resource_key_skips_blank_parts() {
        let key = ResourceKey::from_parts(&["court-3", " ", "2024-03-10", "18:00"]);
        assert_eq!(key.as_str(), "court-3:2024-03-10:18:00");
    }

    #[test]
    fn collision_key_format() {
        let key = CollisionKey::new(&OwnerId::from("42"), &ResourceKey::from("court-1:2024-03-10"));
        assert_eq!(key.to_string(), "owner:42:resource:court-1:2024-03-10");
    }

    #[test]
    fn colons_in_parts_do_not_alias() {
        let a = CollisionKey::new(&OwnerId::from("a:resource:b"), &ResourceKey::from("c"));
        let b = CollisionKey::new(&OwnerId::from("a"), &ResourceKey::from("b:resource:c"));
        assert_eq!(a.to_string(), b.to_string());
        assert_ne!(a, b);
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let json = serde_json::to_string(&OwnerId::from("42")).unwrap();
        assert_eq!(json, r#""42""#);
    }
}
