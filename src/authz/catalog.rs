use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::model::RolePermissionSet;

/// Functional area of the application subject to access control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Module {
    Dashboard,
    Members,
    Finance,
    Users,
    Blog,
    Events,
    Permissions,
    Assistance,
    Projects,
}

impl Module {
    pub const ALL: [Module; 9] = [
        Module::Dashboard,
        Module::Members,
        Module::Finance,
        Module::Users,
        Module::Blog,
        Module::Events,
        Module::Permissions,
        Module::Assistance,
        Module::Projects,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Module::Dashboard => "dashboard",
            Module::Members => "members",
            Module::Finance => "finance",
            Module::Users => "users",
            Module::Blog => "blog",
            Module::Events => "events",
            Module::Permissions => "permissions",
            Module::Assistance => "assistance",
            Module::Projects => "projects",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Module::Dashboard => "Dashboard",
            Module::Members => "Members",
            Module::Finance => "Finance",
            Module::Users => "Users",
            Module::Blog => "Blog",
            Module::Events => "Events",
            Module::Permissions => "Permissions",
            Module::Assistance => "Assistance",
            Module::Projects => "Projects",
        }
    }
}

/// Operation kind subject to access control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    View,
    Create,
    Update,
    Delete,
    Export,
    Approve,
    Manage,
}

impl Action {
    pub const ALL: [Action; 7] = [
        Action::View,
        Action::Create,
        Action::Update,
        Action::Delete,
        Action::Export,
        Action::Approve,
        Action::Manage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::View => "view",
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Export => "export",
            Action::Approve => "approve",
            Action::Manage => "manage",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Action::View => "View",
            Action::Create => "Create",
            Action::Update => "Update",
            Action::Delete => "Delete",
            Action::Export => "Export",
            Action::Approve => "Approve",
            Action::Manage => "Manage",
        }
    }
}

/// Role tag carried by every user account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    Admin,
    Treasurer,
    Leader,
    Member,
    Viewer,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::SuperAdmin,
        Role::Admin,
        Role::Treasurer,
        Role::Leader,
        Role::Member,
        Role::Viewer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "super_admin",
            Role::Admin => "admin",
            Role::Treasurer => "treasurer",
            Role::Leader => "leader",
            Role::Member => "member",
            Role::Viewer => "viewer",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "Super administrator",
            Role::Admin => "Administrator",
            Role::Treasurer => "Treasurer",
            Role::Leader => "Ministry leader",
            Role::Member => "Member",
            Role::Viewer => "Viewer",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogParseError {
    #[error("unknown module: {0}")]
    Module(String),
    #[error("unknown action: {0}")]
    Action(String),
    #[error("unknown role: {0}")]
    Role(String),
    #[error("malformed permission key: {0}")]
    Key(String),
}

impl FromStr for Module {
    type Err = CatalogParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_lowercase();
        Module::ALL
            .into_iter()
            .find(|m| m.as_str() == needle)
            .ok_or_else(|| CatalogParseError::Module(s.to_string()))
    }
}

impl FromStr for Action {
    type Err = CatalogParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_lowercase();
        Action::ALL
            .into_iter()
            .find(|a| a.as_str() == needle)
            .ok_or_else(|| CatalogParseError::Action(s.to_string()))
    }
}

impl FromStr for Role {
    type Err = CatalogParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_lowercase();
        Role::ALL
            .into_iter()
            .find(|r| r.as_str() == needle)
            .ok_or_else(|| CatalogParseError::Role(s.to_string()))
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A (module, action) pair, displayed and parsed as `module:action`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
pub struct PermissionKey {
    pub module: Module,
    pub action: Action,
}

impl PermissionKey {
    pub const fn new(module: Module, action: Action) -> Self {
        Self { module, action }
    }

    /// Every pair in the catalog, module-major
    pub fn all() -> impl Iterator<Item = PermissionKey> {
        Module::ALL
            .into_iter()
            .flat_map(|m| Action::ALL.into_iter().map(move |a| PermissionKey::new(m, a)))
    }
}

impl fmt::Display for PermissionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.module, self.action)
    }
}

impl FromStr for PermissionKey {
    type Err = CatalogParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (module, action) = s
            .split_once(':')
            .ok_or_else(|| CatalogParseError::Key(s.to_string()))?;
        Ok(PermissionKey::new(module.parse()?, action.parse()?))
    }
}

/// Seed grants a role starts with before any administrator edits
pub fn builtin_role_defaults(role: Role) -> RolePermissionSet {
    use Action::*;
    use Module::*;

    let pairs: Vec<PermissionKey> = match role {
        Role::SuperAdmin => PermissionKey::all().collect(),
        Role::Admin => PermissionKey::all()
            .filter(|k| *k != PermissionKey::new(Permissions, Manage))
            .collect(),
        Role::Treasurer => {
            let mut pairs: Vec<PermissionKey> = Action::ALL
                .into_iter()
                .map(|a| PermissionKey::new(Finance, a))
                .collect();
            pairs.extend([
                PermissionKey::new(Dashboard, View),
                PermissionKey::new(Members, View),
                PermissionKey::new(Events, View),
                PermissionKey::new(Projects, View),
            ]);
            pairs
        }
        Role::Leader => {
            let mut pairs = vec![PermissionKey::new(Dashboard, View)];
            for module in [Members, Events, Blog, Assistance] {
                pairs.extend([View, Create, Update].map(|a| PermissionKey::new(module, a)));
            }
            pairs.push(PermissionKey::new(Projects, View));
            pairs
        }
        Role::Member => vec![PermissionKey::new(Dashboard, View), PermissionKey::new(Events, View)],
        Role::Viewer => vec![PermissionKey::new(Dashboard, View)],
    };

    RolePermissionSet::new(role, pairs)
}
