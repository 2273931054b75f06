//! Authorization predicate deciding which callers may perform which actions.
//!
//! The check is a pure function of the caller, the action and the configured
//! policy. Nothing here touches the store or the network.

use crate::action::Action;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Who is asking.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallerContext {
    /// Display name or account of the caller, for audit logs
    pub name: String,
    /// Role tags held by the caller in the front end
    pub roles: BTreeSet<String>,
}

impl CallerContext {
    pub fn new(name: impl Into<String>, roles: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        Self {
            name: name.into(),
            roles: roles
                .into_iter()
                .map(|role| role.as_ref().trim().to_lowercase())
                .filter(|role| !role.is_empty())
                .collect(),
        }
    }
}

/// Maps each action kind to the caller roles allowed to perform it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionPolicy {
    /// Roles allowed to perform every action
    #[serde(default = "default_superuser_roles")]
    pub superuser_roles: BTreeSet<String>,

    /// Per action kind (`grant_role`, `revoke_role`, `kick`, `broadcast`, `custom`)
    #[serde(default = "default_allowed")]
    pub allowed: BTreeMap<String, BTreeSet<String>>,

    /// Role tags that only superusers may grant or revoke
    #[serde(default)]
    pub protected_roles: BTreeSet<String>,
}

fn default_superuser_roles() -> BTreeSet<String> {
    BTreeSet::from(["admin".to_string()])
}

fn default_allowed() -> BTreeMap<String, BTreeSet<String>> {
    let moderator = BTreeSet::from(["moderator".to_string()]);
    BTreeMap::from([
        ("kick".to_string(), moderator.clone()),
        ("broadcast".to_string(), moderator),
    ])
}

impl Default for PermissionPolicy {
    fn default() -> Self {
        Self {
            superuser_roles: default_superuser_roles(),
            allowed: default_allowed(),
            protected_roles: BTreeSet::new(),
        }
    }
}

/// Returns whether `caller` may perform `action` under `policy`.
pub fn can_perform(caller: &CallerContext, action: &Action, policy: &PermissionPolicy) -> bool {
    if caller.roles.iter().any(|role| policy.superuser_roles.contains(role)) {
        return true;
    }

    if let Action::GrantRole { role } | Action::RevokeRole { role } = action {
        if policy.protected_roles.contains(&role.trim().to_lowercase()) {
            return false;
        }
    }

    policy
        .allowed
        .get(action.kind_name())
        .is_some_and(|allowed| caller.roles.iter().any(|role| allowed.contains(role)))
}
