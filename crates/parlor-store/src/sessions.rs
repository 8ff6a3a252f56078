use chrono::{DateTime, Utc};
use tracing::instrument;

use parlor_core::ids::{MessageId, SessionId};
use parlor_core::messages::Sentiment;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Persisted shape of one visitor session's aggregate state.
#[derive(Debug, Clone)]
pub struct SessionRow {
    pub id: SessionId,
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Message ids authored during this session, in arrival order.
    pub messages: Vec<MessageId>,
    /// Touch timestamps (RFC 3339), in arrival order.
    pub activity: Vec<String>,
    pub ip_address: String,
    pub user_agent: String,
    pub device: Option<String>,
    pub sentiment: Option<Sentiment>,
    pub duration_secs: i64,
}

impl SessionRow {
    pub fn new(id: SessionId, ip_address: String, user_agent: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id: None,
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
            activity: Vec::new(),
            ip_address,
            user_agent,
            device: None,
            sentiment: None,
            duration_secs: 0,
        }
    }
}

/// Durable store for session aggregates. The tracker holds the live copy
/// and persists with full-row overwrites, so `upsert` replaces every
/// mutable column.
pub struct SessionRepo {
    db: Database,
}

impl SessionRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, session), fields(session_id = %session.id))]
    pub fn upsert(&self, session: &SessionRow) -> Result<(), StoreError> {
        let messages = serde_json::to_string(&session.messages)?;
        let activity = serde_json::to_string(&session.activity)?;

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, user_id, created_at, updated_at, messages, activity,
                                       ip_address, user_agent, device, sentiment, duration_secs)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(id) DO UPDATE SET
                     user_id = excluded.user_id,
                     updated_at = excluded.updated_at,
                     messages = excluded.messages,
                     activity = excluded.activity,
                     device = excluded.device,
                     sentiment = excluded.sentiment,
                     duration_secs = excluded.duration_secs",
                rusqlite::params![
                    session.id.as_str(),
                    session.user_id,
                    session.created_at.to_rfc3339(),
                    session.updated_at.to_rfc3339(),
                    messages,
                    activity,
                    session.ip_address,
                    session.user_agent,
                    session.device,
                    session.sentiment.map(|s| s.to_string()),
                    session.duration_secs,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get(&self, id: &SessionId) -> Result<SessionRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, created_at, updated_at, messages, activity,
                        ip_address, user_agent, device, sentiment, duration_secs
                 FROM sessions WHERE id = ?1",
            )?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_session(row),
                None => Err(StoreError::NotFound(format!("session {id}"))),
            }
        })
    }

    /// All sessions, most recently updated first. Used on room restart to
    /// rebuild the tracker's live map.
    pub fn load_all(&self) -> Result<Vec<SessionRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, created_at, updated_at, messages, activity,
                        ip_address, user_agent, device, sentiment, duration_secs
                 FROM sessions ORDER BY updated_at DESC",
            )?;
            let mut rows = stmt.query([])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_session(row)?);
            }
            Ok(results)
        })
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> Result<SessionRow, StoreError> {
    let created_raw: String = row_helpers::get(row, 2, "sessions", "created_at")?;
    let updated_raw: String = row_helpers::get(row, 3, "sessions", "updated_at")?;
    let messages_raw: String = row_helpers::get(row, 4, "sessions", "messages")?;
    let activity_raw: String = row_helpers::get(row, 5, "sessions", "activity")?;
    let sentiment_raw: Option<String> = row_helpers::get_opt(row, 9, "sessions", "sentiment")?;

    let message_ids: Vec<String> = row_helpers::parse_json(&messages_raw, "sessions", "messages")?;

    Ok(SessionRow {
        id: SessionId::from_raw(row_helpers::get::<String>(row, 0, "sessions", "id")?),
        user_id: row_helpers::get_opt(row, 1, "sessions", "user_id")?,
        created_at: parse_timestamp(&created_raw, "created_at")?,
        updated_at: parse_timestamp(&updated_raw, "updated_at")?,
        messages: message_ids.into_iter().map(MessageId::from_raw).collect(),
        activity: row_helpers::parse_json(&activity_raw, "sessions", "activity")?,
        ip_address: row_helpers::get(row, 6, "sessions", "ip_address")?,
        user_agent: row_helpers::get(row, 7, "sessions", "user_agent")?,
        device: row_helpers::get_opt(row, 8, "sessions", "device")?,
        sentiment: match sentiment_raw {
            Some(raw) => Some(row_helpers::parse_enum(&raw, "sessions", "sentiment")?),
            None => None,
        },
        duration_secs: row_helpers::get(row, 10, "sessions", "duration_secs")?,
    })
}

fn parse_timestamp(raw: &str, column: &'static str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::CorruptRow {
            table: "sessions",
            column,
            detail: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> SessionRepo {
        SessionRepo::new(Database::in_memory().unwrap())
    }

    fn session(id: &str) -> SessionRow {
        SessionRow::new(
            SessionId::from_raw(id),
            "203.0.113.7".into(),
            "Mozilla/5.0".into(),
        )
    }

    #[test]
    fn upsert_and_get() {
        let repo = repo();
        let mut s = session("s1");
        s.user_id = Some("u-42".into());
        s.activity.push("2026-01-05T10:00:00+00:00".into());
        repo.upsert(&s).unwrap();

        let fetched = repo.get(&SessionId::from_raw("s1")).unwrap();
        assert_eq!(fetched.user_id.as_deref(), Some("u-42"));
        assert_eq!(fetched.activity, vec!["2026-01-05T10:00:00+00:00"]);
        assert_eq!(fetched.ip_address, "203.0.113.7");
    }

    #[test]
    fn overwrite_replaces_lists() {
        let repo = repo();
        let mut s = session("s1");
        repo.upsert(&s).unwrap();

        s.messages.push(MessageId::from_raw("m1"));
        s.messages.push(MessageId::from_raw("m2"));
        s.activity.push("2026-01-05T10:01:30+00:00".into());
        s.duration_secs = 90;
        repo.upsert(&s).unwrap();

        let fetched = repo.get(&SessionId::from_raw("s1")).unwrap();
        assert_eq!(fetched.messages.len(), 2);
        assert_eq!(fetched.messages[1].as_str(), "m2");
        assert_eq!(fetched.duration_secs, 90);
    }

    #[test]
    fn fingerprint_columns_survive_overwrite() {
        let repo = repo();
        let s = session("s1");
        repo.upsert(&s).unwrap();
        repo.upsert(&s).unwrap();

        let fetched = repo.get(&SessionId::from_raw("s1")).unwrap();
        assert_eq!(fetched.ip_address, "203.0.113.7");
        assert_eq!(fetched.user_agent, "Mozilla/5.0");
    }

    #[test]
    fn sentiment_roundtrip() {
        let repo = repo();
        let mut s = session("s1");
        s.sentiment = Some(Sentiment::Negative);
        repo.upsert(&s).unwrap();

        let fetched = repo.get(&SessionId::from_raw("s1")).unwrap();
        assert_eq!(fetched.sentiment, Some(Sentiment::Negative));
    }

    #[test]
    fn get_missing_fails() {
        let repo = repo();
        assert!(matches!(
            repo.get(&SessionId::from_raw("nope")),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn load_all_returns_every_session() {
        let repo = repo();
        repo.upsert(&session("s1")).unwrap();
        repo.upsert(&session("s2")).unwrap();
        assert_eq!(repo.load_all().unwrap().len(), 2);
    }
}
