//! The persisted per-player record and the commit rules shared by all backends.

use crate::error::StoreError;
use crate::identifier::Identifier;
use crate::utils::current_timestamp_millis;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Everything the bridge knows about one player.
///
/// `identifier` is fixed at creation. `version` and `last_modified` are owned
/// by the store: whatever a mutator writes into them is overwritten on commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    /// Normalized key of this record
    pub identifier: Identifier,

    /// Role tags granted to the player
    #[serde(default)]
    pub roles: BTreeSet<String>,

    /// Opaque credential issued to the player, if any
    #[serde(default)]
    pub token: Option<String>,

    /// Free-form cached attributes (chat alias, name colour, ...)
    #[serde(default)]
    pub cache_fields: BTreeMap<String, String>,

    /// Unix timestamp of the last commit, in milliseconds
    #[serde(default)]
    pub last_modified: u64,

    /// Number of committed updates; 1 after the first upsert
    pub version: u64,
}

impl IdentityRecord {
    /// Creates an empty, never-committed record for `identifier`.
    pub fn new(identifier: Identifier) -> Self {
        Self {
            identifier,
            roles: BTreeSet::new(),
            token: None,
            cache_fields: BTreeMap::new(),
            last_modified: 0,
            version: 0,
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(&normalize_role(role))
    }

    /// Adds a role tag. Returns `false` if it was already present.
    pub fn grant_role(&mut self, role: &str) -> bool {
        let role = normalize_role(role);
        if role.is_empty() {
            return false;
        }
        self.roles.insert(role)
    }

    /// Removes a role tag. Returns `false` if it was not present.
    pub fn revoke_role(&mut self, role: &str) -> bool {
        self.roles.remove(&normalize_role(role))
    }

    pub fn cache_field(&self, field: &str) -> Option<&str> {
        self.cache_fields.get(field).map(String::as_str)
    }
}

/// Role tags are compared trimmed and lower-cased.
pub fn normalize_role(role: &str) -> String {
    role.trim().to_ascii_lowercase()
}

/// Runs `mutator` against the current record and stamps the result.
///
/// The returned record has `version = previous + 1` (or 1 when new), a fresh
/// `last_modified`, and canonical role tags.
pub(crate) fn apply_mutator<F>(
    id: &Identifier,
    current: Option<IdentityRecord>,
    mutator: F,
) -> Result<IdentityRecord, StoreError>
where
    F: FnOnce(Option<IdentityRecord>) -> IdentityRecord,
{
    let previous_version = current.as_ref().map_or(0, |r| r.version);
    let mut next = mutator(current);

    if &next.identifier != id {
        return Err(StoreError::IdentifierChanged {
            from: id.to_string(),
            to: next.identifier.to_string(),
        });
    }

    next.roles = next
        .roles
        .iter()
        .map(|r| normalize_role(r))
        .filter(|r| !r.is_empty())
        .collect();
    next.version = previous_version + 1;
    next.last_modified = current_timestamp_millis();
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::normalize;

    #[test]
    fn test_role_helpers_normalize_tags() {
        let mut record = IdentityRecord::new(normalize("player").unwrap());
        assert!(record.grant_role(" Admin "));
        assert!(!record.grant_role("admin"));
        assert!(record.has_role("ADMIN"));
        assert!(!record.grant_role("   "));
        assert!(record.revoke_role("admin"));
        assert!(!record.revoke_role("admin"));
    }

    #[test]
    fn test_apply_mutator_stamps_version() {
        let id = normalize("player").unwrap();
        let first = apply_mutator(&id, None, |current| {
            assert!(current.is_none());
            let mut r = IdentityRecord::new(id.clone());
            r.roles.insert("Sponsor ".to_string());
            r.version = 99;
            r
        })
        .unwrap();
        assert_eq!(first.version, 1);
        assert!(first.roles.contains("sponsor"));
        assert!(first.last_modified > 0);

        let second = apply_mutator(&id, Some(first.clone()), |current| current.unwrap()).unwrap();
        assert_eq!(second.version, 2);
    }

    #[test]
    fn test_apply_mutator_rejects_identifier_change() {
        let id = normalize("player").unwrap();
        let other = normalize("someone_else").unwrap();
        let err = apply_mutator(&id, None, |_| IdentityRecord::new(other.clone())).unwrap_err();
        assert!(matches!(err, StoreError::IdentifierChanged { .. }));
    }
}
