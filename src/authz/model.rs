use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::catalog::{Action, Module, PermissionKey, Role};

/// Pairs a role is granted by default
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePermissionSet {
    pub role: Role,
    pub grants: BTreeSet<PermissionKey>,
}

impl RolePermissionSet {
    pub fn new(role: Role, grants: impl IntoIterator<Item = PermissionKey>) -> Self {
        Self {
            role,
            grants: grants.into_iter().collect(),
        }
    }

    pub fn empty(role: Role) -> Self {
        Self::new(role, std::iter::empty())
    }
}

/// Per-user exceptions layered over the role defaults: `true` grants, `false` revokes
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UserPermissionOverride {
    pub user_id: Uuid,
    pub entries: BTreeMap<PermissionKey, bool>,
}

impl UserPermissionOverride {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            entries: BTreeMap::new(),
        }
    }

    pub fn grant(mut self, module: Module, action: Action) -> Self {
        self.entries.insert(PermissionKey::new(module, action), true);
        self
    }

    pub fn revoke(mut self, module: Module, action: Action) -> Self {
        self.entries.insert(PermissionKey::new(module, action), false);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Merged role defaults plus overrides for one user. Held in memory only.
#[derive(Debug, Clone)]
pub struct ResolvedPermissionMap {
    pub user_id: Uuid,
    pub role: Role,
    grants: HashMap<PermissionKey, bool>,
    pub resolved_at: DateTime<Utc>,
}

impl ResolvedPermissionMap {
    /// Apply overrides on top of role defaults; an override entry always wins.
    pub fn merge(
        user_id: Uuid,
        defaults: &RolePermissionSet,
        overrides: Option<&UserPermissionOverride>,
    ) -> Self {
        let mut grants: HashMap<PermissionKey, bool> =
            defaults.grants.iter().map(|key| (*key, true)).collect();

        if let Some(overrides) = overrides {
            for (key, granted) in &overrides.entries {
                grants.insert(*key, *granted);
            }
        }

        Self {
            user_id,
            role: defaults.role,
            grants,
            resolved_at: Utc::now(),
        }
    }

    /// Fail-closed substitute used when loading fails
    pub fn empty(user_id: Uuid, role: Role) -> Self {
        Self {
            user_id,
            role,
            grants: HashMap::new(),
            resolved_at: Utc::now(),
        }
    }

    pub fn is_granted(&self, key: PermissionKey) -> bool {
        self.grants.get(&key).copied().unwrap_or(false)
    }

    pub fn has(&self, module: Module, action: Action) -> bool {
        self.is_granted(PermissionKey::new(module, action))
    }

    /// Granted pairs, sorted
    pub fn granted(&self) -> Vec<PermissionKey> {
        let mut keys: Vec<PermissionKey> = self
            .grants
            .iter()
            .filter(|(_, granted)| **granted)
            .map(|(key, _)| *key)
            .collect();
        keys.sort();
        keys
    }

    pub fn is_empty(&self) -> bool {
        !self.grants.values().any(|granted| *granted)
    }
}
