//! User profile access
//!
//! Scrobbles default their timezone from the owning user's profile, and users
//! may override completion thresholds per media kind.

use std::collections::HashMap;

use sqlx::{Pool, Row, Sqlite};
use tracing::warn;
use uuid::Uuid;

use crate::db::init::ANONYMOUS_USER_GUID;
use crate::error::Result;
use crate::media::MediaKind;

/// Profile fields the engine consults at record creation
#[derive(Debug, Clone)]
pub struct UserProfile {
    pub user_id: Uuid,
    pub username: String,
    /// IANA zone name captured onto new records
    pub timezone: String,
    /// Per-kind completion-percent overrides
    pub completion_overrides: HashMap<MediaKind, u8>,
}

impl UserProfile {
    pub fn completion_override(&self, kind: MediaKind) -> Option<u8> {
        self.completion_overrides.get(&kind).copied()
    }
}

/// The built-in anonymous user's id
pub fn anonymous_user_id() -> Uuid {
    // Constant is a valid UUID by construction
    Uuid::parse_str(ANONYMOUS_USER_GUID).unwrap()
}

/// Look up a user profile, falling back to the anonymous profile when the
/// user does not exist
pub async fn lookup_user_profile(db: &Pool<Sqlite>, user_id: Uuid) -> Result<UserProfile> {
    let row = sqlx::query(
        "SELECT guid, username, timezone, completion_overrides FROM users WHERE guid = ?",
    )
    .bind(user_id.to_string())
    .fetch_optional(db)
    .await?;

    let row = match row {
        Some(row) => row,
        None => {
            warn!("Unknown user {}, using anonymous profile", user_id);
            return Box::pin(lookup_user_profile(db, anonymous_user_id())).await;
        }
    };

    let guid: String = row.try_get("guid")?;
    let username: String = row.try_get("username")?;
    let timezone: String = row.try_get("timezone")?;
    let overrides_json: Option<String> = row.try_get("completion_overrides")?;

    let mut completion_overrides = HashMap::new();
    if let Some(json) = overrides_json {
        match serde_json::from_str::<HashMap<String, u8>>(&json) {
            Ok(parsed) => {
                for (kind_str, pct) in parsed {
                    match kind_str.parse::<MediaKind>() {
                        Ok(kind) => {
                            completion_overrides.insert(kind, pct.min(100));
                        }
                        Err(_) => warn!(
                            "Ignoring completion override for unknown kind '{}'",
                            kind_str
                        ),
                    }
                }
            }
            Err(e) => warn!("Unparseable completion_overrides for {}: {}", username, e),
        }
    }

    Ok(UserProfile {
        user_id: Uuid::parse_str(&guid)
            .map_err(|e| crate::Error::Internal(format!("Bad user guid in db: {}", e)))?,
        username,
        timezone,
        completion_overrides,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init::init_memory_database;

    #[tokio::test]
    async fn anonymous_profile_resolves() {
        let db = init_memory_database().await.unwrap();
        let profile = lookup_user_profile(&db, anonymous_user_id()).await.unwrap();
        assert_eq!(profile.username, "Anonymous");
        assert_eq!(profile.timezone, "UTC");
    }

    #[tokio::test]
    async fn unknown_user_falls_back_to_anonymous() {
        let db = init_memory_database().await.unwrap();
        let profile = lookup_user_profile(&db, Uuid::new_v4()).await.unwrap();
        assert_eq!(profile.username, "Anonymous");
    }

    #[tokio::test]
    async fn completion_overrides_parse() {
        let db = init_memory_database().await.unwrap();
        let user_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO users (guid, username, timezone, completion_overrides) VALUES (?, ?, ?, ?)",
        )
        .bind(user_id.to_string())
        .bind("reader")
        .bind("Europe/Amsterdam")
        .bind(r#"{"book": 80, "garbage_kind": 5}"#)
        .execute(&db)
        .await
        .unwrap();

        let profile = lookup_user_profile(&db, user_id).await.unwrap();
        assert_eq!(profile.completion_override(MediaKind::Book), Some(80));
        assert_eq!(profile.completion_override(MediaKind::Track), None);
        assert_eq!(profile.timezone, "Europe/Amsterdam");
    }
}
