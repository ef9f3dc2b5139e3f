//! Permission checks for state-mutating operations.
//!
//! The core only asks "may this actor do this?". `StaticRbac` answers from a
//! TOML file of role grants and actor assignments:
//!
//! ```toml
//! [roles]
//! operator = ["prioritize_tasks", "cancel_tasks"]
//! oncall = ["prioritize_tasks", "urgent_tasks", "critical_tasks", "cancel_tasks"]
//!
//! [actors]
//! "ops-bot" = ["operator"]
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::error::{Error, Result};
use crate::model::{Priority, UpgradeAction};

/// Identity of whoever is acting. Recorded for audit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Actor(pub String);

impl Actor {
    pub fn new(identity: impl Into<String>) -> Self {
        Self(identity.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Raise to 8.
    PrioritizeTasks,
    /// Raise to 9.
    UrgentTasks,
    /// Raise to 10.
    CriticalTasks,
    CancelTasks,
}

impl Permission {
    /// Tier needed to move a task to `priority`.
    pub fn for_priority(priority: Priority) -> Permission {
        match priority.value() {
            10.. => Permission::CriticalTasks,
            9 => Permission::UrgentTasks,
            _ => Permission::PrioritizeTasks,
        }
    }

    /// Tier needed for an upgrade action targeting `priority`.
    pub fn for_upgrade(action: UpgradeAction, priority: Priority) -> Permission {
        match action {
            UpgradeAction::Prioritize => Permission::PrioritizeTasks,
            UpgradeAction::Urgent => Permission::UrgentTasks,
            UpgradeAction::Critical => Permission::CriticalTasks,
            UpgradeAction::Custom => Permission::for_priority(priority),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Permission::PrioritizeTasks => "prioritize_tasks",
            Permission::UrgentTasks => "urgent_tasks",
            Permission::CriticalTasks => "critical_tasks",
            Permission::CancelTasks => "cancel_tasks",
        }
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Permission-check capability.
#[async_trait]
pub trait Rbac: Send + Sync {
    async fn has_permission(&self, actor: &Actor, permission: Permission) -> Result<bool>;
}

/// Check and convert a denial into `PermissionDenied`.
pub async fn require(rbac: &dyn Rbac, actor: &Actor, permission: Permission) -> Result<()> {
    if rbac.has_permission(actor, permission).await? {
        Ok(())
    } else {
        Err(Error::PermissionDenied {
            actor: actor.to_string(),
            permission: permission.to_string(),
        })
    }
}

/// Top-level TOML shape.
#[derive(Debug, Default, Deserialize)]
struct RbacFile {
    #[serde(default)]
    roles: HashMap<String, HashSet<Permission>>,
    #[serde(default)]
    actors: HashMap<String, Vec<String>>,
}

/// Fixed role grants, loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct StaticRbac {
    grants: HashMap<String, HashSet<Permission>>,
}

impl StaticRbac {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant a permission directly to an actor.
    pub fn grant(mut self, actor: impl Into<String>, permission: Permission) -> Self {
        self.grants.entry(actor.into()).or_default().insert(permission);
        self
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: RbacFile =
            toml::from_str(content).map_err(|e| Error::Config(format!("bad rbac config: {e}")))?;

        let mut grants: HashMap<String, HashSet<Permission>> = HashMap::new();
        for (actor, roles) in file.actors {
            let entry = grants.entry(actor.clone()).or_default();
            for role in roles {
                let perms = file.roles.get(&role).ok_or_else(|| {
                    Error::Config(format!("actor {actor} references unknown role {role}"))
                })?;
                entry.extend(perms.iter().copied());
            }
        }
        Ok(Self { grants })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read rbac file {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }
}

#[async_trait]
impl Rbac for StaticRbac {
    async fn has_permission(&self, actor: &Actor, permission: Permission) -> Result<bool> {
        Ok(self
            .grants
            .get(actor.as_str())
            .is_some_and(|perms| perms.contains(&permission)))
    }
}
