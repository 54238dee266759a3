use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::authz::{
    Action, Module, PermissionKey, ResolvedPermissionMap, Role, RolePermissionSet,
    UserPermissionOverride,
};
use crate::events::{Loggable, Severity};

// =============================================================================
// CATALOG
// =============================================================================

#[derive(Debug, Serialize, ToSchema)]
pub struct ModuleInfo {
    pub id: Module,
    pub label: &'static str,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ActionInfo {
    pub id: Action,
    pub label: &'static str,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RoleInfo {
    pub id: Role,
    pub label: &'static str,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PermissionCatalog {
    pub modules: Vec<ModuleInfo>,
    pub actions: Vec<ActionInfo>,
    pub roles: Vec<RoleInfo>,
}

impl PermissionCatalog {
    pub fn build() -> Self {
        Self {
            modules: Module::ALL
                .into_iter()
                .map(|id| ModuleInfo { id, label: id.label() })
                .collect(),
            actions: Action::ALL
                .into_iter()
                .map(|id| ActionInfo { id, label: id.label() })
                .collect(),
            roles: Role::ALL
                .into_iter()
                .map(|id| RoleInfo { id, label: id.label() })
                .collect(),
        }
    }
}

// =============================================================================
// ROLE DEFAULTS
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RoleGrants {
    pub role: Role,
    pub grants: Vec<PermissionKey>,
}

impl From<RolePermissionSet> for RoleGrants {
    fn from(set: RolePermissionSet) -> Self {
        RoleGrants {
            role: set.role,
            grants: set.grants.into_iter().collect(),
        }
    }
}

impl Loggable for RoleGrants {
    fn entity_type() -> &'static str { "role_permissions" }
    fn subject_id(&self) -> Option<Uuid> { None }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ReplaceRoleGrantsRequest {
    pub grants: Vec<PermissionKey>,
}

// =============================================================================
// USER OVERRIDES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OverrideEntry {
    pub module: Module,
    pub action: Action,
    /// true grants, false revokes
    pub granted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserOverrides {
    pub user_id: Uuid,
    pub entries: Vec<OverrideEntry>,
}

impl From<UserPermissionOverride> for UserOverrides {
    fn from(overrides: UserPermissionOverride) -> Self {
        UserOverrides {
            user_id: overrides.user_id,
            entries: overrides
                .entries
                .into_iter()
                .map(|(key, granted)| OverrideEntry {
                    module: key.module,
                    action: key.action,
                    granted,
                })
                .collect(),
        }
    }
}

impl UserOverrides {
    pub fn into_override(self) -> UserPermissionOverride {
        let mut overrides = UserPermissionOverride::new(self.user_id);
        for entry in self.entries {
            overrides
                .entries
                .insert(PermissionKey::new(entry.module, entry.action), entry.granted);
        }
        overrides
    }
}

impl Loggable for UserOverrides {
    fn entity_type() -> &'static str { "user_overrides" }
    fn subject_id(&self) -> Option<Uuid> { Some(self.user_id) }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ReplaceOverridesRequest {
    pub entries: Vec<OverrideEntry>,
}

// =============================================================================
// RESOLVED PERMISSIONS (computed, never stored)
// =============================================================================

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ResolvedPermissions {
    pub user_id: Uuid,
    pub role: Role,
    pub granted: Vec<PermissionKey>,
    pub resolved_at: DateTime<Utc>,
    /// Set when loading failed and the empty fallback is being reported
    pub degraded: bool,
}

impl ResolvedPermissions {
    pub fn from_map(map: &ResolvedPermissionMap, degraded: bool) -> Self {
        Self {
            user_id: map.user_id,
            role: map.role,
            granted: map.granted(),
            resolved_at: map.resolved_at,
            degraded,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PermissionCheckQuery {
    pub module: Module,
    pub action: Action,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PermissionCheckResponse {
    pub module: Module,
    pub action: Action,
    pub granted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PermissionSource {
    Role,
    Override,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct EffectivePermission {
    pub module: Module,
    pub action: Action,
    pub granted: bool,
    pub source: PermissionSource,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct EffectivePermissions {
    pub user_id: Uuid,
    pub role: Role,
    pub permissions: Vec<EffectivePermission>,
}

impl EffectivePermissions {
    /// Every pair either source mentions, with the source that decided it
    pub fn explain(
        user_id: Uuid,
        defaults: &RolePermissionSet,
        overrides: Option<&UserPermissionOverride>,
    ) -> Self {
        let mut permissions: Vec<EffectivePermission> = defaults
            .grants
            .iter()
            .filter(|key| overrides.map_or(true, |o| !o.entries.contains_key(*key)))
            .map(|key| EffectivePermission {
                module: key.module,
                action: key.action,
                granted: true,
                source: PermissionSource::Role,
            })
            .collect();

        if let Some(overrides) = overrides {
            permissions.extend(overrides.entries.iter().map(|(key, granted)| EffectivePermission {
                module: key.module,
                action: key.action,
                granted: *granted,
                source: PermissionSource::Override,
            }));
        }

        permissions.sort_by_key(|p| PermissionKey::new(p.module, p.action));

        Self {
            user_id,
            role: defaults.role,
            permissions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explain_marks_override_source() {
        let user_id = Uuid::new_v4();
        let defaults = RolePermissionSet::new(
            Role::Treasurer,
            [
                PermissionKey::new(Module::Finance, Action::View),
                PermissionKey::new(Module::Dashboard, Action::View),
            ],
        );
        let overrides = UserPermissionOverride::new(user_id)
            .revoke(Module::Finance, Action::View)
            .grant(Module::Blog, Action::Create);

        let effective = EffectivePermissions::explain(user_id, &defaults, Some(&overrides));
        assert_eq!(effective.permissions.len(), 3);

        let finance = effective
            .permissions
            .iter()
            .find(|p| p.module == Module::Finance)
            .unwrap();
        assert!(!finance.granted);
        assert_eq!(finance.source, PermissionSource::Override);

        let dashboard = effective
            .permissions
            .iter()
            .find(|p| p.module == Module::Dashboard)
            .unwrap();
        assert_eq!(dashboard.source, PermissionSource::Role);
    }
}
