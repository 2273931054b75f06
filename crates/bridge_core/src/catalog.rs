//! Catalog of grantable roles.
//!
//! When a catalog is configured, only the roles it lists can be granted.
//! The file holds one role per line:
//!
//! ```text
//! # id|title|description
//! sponsor|Sponsor|Supports the server
//! mentor|Mentor|Helps new players
//! ```
//!
//! Blank lines and `#` comments are ignored. Malformed lines and ids that do
//! not follow the identifier rules are skipped with a warning.

use crate::identifier::normalize;
use crate::store::record::normalize_role;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

/// One catalog entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleDefinition {
    pub id: String,
    pub title: String,
    pub description: String,
}

/// The set of roles that may be granted.
#[derive(Debug, Clone, Default)]
pub struct RoleCatalog {
    roles: BTreeMap<String, RoleDefinition>,
}

impl RoleCatalog {
    /// Parses catalog text. Later definitions of the same id replace earlier ones.
    pub fn parse(text: &str) -> Self {
        let mut roles = BTreeMap::new();

        for (number, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let parts: Vec<&str> = line.split('|').collect();
            let [id, title, description] = parts.as_slice() else {
                warn!(
                    "⚠️ Role catalog line {}: expected 'id|title|description', got {:?}",
                    number + 1,
                    line
                );
                continue;
            };

            let id = match normalize(id) {
                Ok(id) => id.into_string(),
                Err(e) => {
                    warn!("⚠️ Role catalog line {}: invalid role id: {}", number + 1, e);
                    continue;
                }
            };
            roles.insert(
                id.clone(),
                RoleDefinition {
                    id,
                    title: title.trim().to_string(),
                    description: description.trim().to_string(),
                },
            );
        }

        Self { roles }
    }

    /// Loads the catalog at `path`.
    ///
    /// A missing file yields an empty catalog (so no role can be granted)
    /// and a warning.
    ///
    /// # Errors
    ///
    /// Any I/O error other than the file not existing.
    pub async fn load(path: &Path) -> std::io::Result<Self> {
        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("⚠️ Role catalog not found at {}; no role can be granted", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(e),
        };

        let catalog = Self::parse(&text);
        info!("📜 Loaded {} roles from {}", catalog.len(), path.display());
        Ok(catalog)
    }

    /// Whether `role` (trimmed, case-insensitive) is listed.
    pub fn exists(&self, role: &str) -> bool {
        self.roles.contains_key(&normalize_role(role))
    }

    pub fn get(&self, role: &str) -> Option<&RoleDefinition> {
        self.roles.get(&normalize_role(role))
    }

    /// All definitions, ordered by id.
    pub fn iter(&self) -> impl Iterator<Item = &RoleDefinition> {
        self.roles.values()
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}
