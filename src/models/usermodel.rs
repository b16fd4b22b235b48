use chrono::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize, Serialize, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "user_role", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Client,
    Freelancer,
    Admin,
}

impl UserRole {
    pub fn to_str(&self) -> &str {
        match self {
            UserRole::Client => "client",
            UserRole::Freelancer => "freelancer",
            UserRole::Admin => "admin",
        }
    }
}

#[derive(Debug, Deserialize, Serialize, sqlx::FromRow, Clone)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
}

/// Whoever drives a ledger operation: an authenticated user or the platform itself
/// (scheduled sweeps, gateway reconciliation).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    User { id: Uuid, role: UserRole },
    System,
}

impl Actor {
    pub fn id(&self) -> Option<Uuid> {
        match self {
            Actor::User { id, .. } => Some(*id),
            Actor::System => None,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Actor::User { role: UserRole::Admin, .. })
    }

    /// Admins and the system bypass ownership checks.
    pub fn is_privileged(&self) -> bool {
        self.is_admin() || matches!(self, Actor::System)
    }

    pub fn is(&self, user_id: Uuid) -> bool {
        self.id() == Some(user_id)
    }

    pub fn has_role(&self, wanted: UserRole) -> bool {
        matches!(self, Actor::User { role, .. } if *role == wanted)
    }
}

impl From<&User> for Actor {
    fn from(user: &User) -> Self {
        Actor::User {
            id: user.id,
            role: user.role,
        }
    }
}
