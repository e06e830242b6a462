//! Dashboard announcements.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::user::Role;

/// Audience of an announcement: everyone, or a single role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    All(AllAudience),
    Role(Role),
}

/// Marker for the literal `"all"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllAudience {
    All,
}

impl Audience {
    pub fn as_str(&self) -> &'static str {
        match self {
            Audience::All(_) => "all",
            Audience::Role(role) => role.as_str(),
        }
    }
}

impl Default for Audience {
    fn default() -> Self {
        Audience::All(AllAudience::All)
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Announcement {
    pub id: Uuid,
    pub title: String,
    pub body: String,
    /// `all` or a role name.
    pub audience: String,
    pub is_active: bool,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateAnnouncementRequest {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub audience: Audience,
}

#[derive(Debug, Deserialize)]
pub struct SetAnnouncementActiveRequest {
    pub is_active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audience_accepts_all_or_a_role() {
        let all: Audience = serde_json::from_str("\"all\"").unwrap();
        assert_eq!(all.as_str(), "all");
        let dealers: Audience = serde_json::from_str("\"dealer\"").unwrap();
        assert_eq!(dealers, Audience::Role(Role::Dealer));
        assert!(serde_json::from_str::<Audience>("\"everyone\"").is_err());
    }
}
