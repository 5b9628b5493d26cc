use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub external_id: String,
    pub email: String,
    pub name: String,
    pub role: String,
    pub department: Option<String>,
    pub job_title: Option<String>,
    pub availability: String,
    pub manager_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserRow {
    /// Parsed role. Rows are constrained by a CHECK, so unknown values fall back to employee.
    pub fn role(&self) -> Role {
        self.role.parse().unwrap_or(Role::Employee)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Employee,
    Pm,
    LineManager,
    Hr,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Employee => "employee",
            Role::Pm => "pm",
            Role::LineManager => "line_manager",
            Role::Hr => "hr",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "employee" => Ok(Role::Employee),
            "pm" => Ok(Role::Pm),
            "line_manager" => Ok(Role::LineManager),
            "hr" => Ok(Role::Hr),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// Derived from the user's current allocation load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Available,
    PartiallyAllocated,
    FullyAllocated,
}

impl Availability {
    pub fn from_load(load_percent: i32) -> Self {
        match load_percent {
            l if l <= 0 => Availability::Available,
            l if l < 100 => Availability::PartiallyAllocated,
            _ => Availability::FullyAllocated,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Availability::Available => "available",
            Availability::PartiallyAllocated => "partially_allocated",
            Availability::FullyAllocated => "fully_allocated",
        }
    }
}

impl FromStr for Availability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(Availability::Available),
            "partially_allocated" => Ok(Availability::PartiallyAllocated),
            "fully_allocated" => Ok(Availability::FullyAllocated),
            other => Err(format!("unknown availability '{other}'")),
        }
    }
}
