use chrono::Utc;
use tracing::instrument;

use parlor_core::ids::{MessageId, SessionId};
use parlor_core::messages::ChatMessage;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Durable store for one room's ordered message log.
///
/// `upsert` is idempotent by id: an existing row keeps its original
/// `position` (assigned at first insert) while the mutable fields are
/// replaced, so the log's ordering never changes under update frames.
pub struct MessageRepo {
    db: Database,
}

impl MessageRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or update a message. Position is fixed at first insertion;
    /// conflict resolution happens in the database, never in string-built SQL.
    #[instrument(skip(self, message), fields(message_id = %message.id))]
    pub fn upsert(&self, message: &ChatMessage) -> Result<(), StoreError> {
        let attachments = serde_json::to_string(&message.attachments)?;
        let now = Utc::now().to_rfc3339();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, user, role, content, attachments, user_id, thread_id,
                                       reply_to, session_id, sentiment, position, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                         (SELECT COALESCE(MAX(position) + 1, 0) FROM messages), ?11)
                 ON CONFLICT(id) DO UPDATE SET
                     content = excluded.content,
                     attachments = excluded.attachments,
                     thread_id = excluded.thread_id,
                     reply_to = excluded.reply_to,
                     sentiment = excluded.sentiment",
                rusqlite::params![
                    message.id.as_str(),
                    message.user,
                    message.role.to_string(),
                    message.content,
                    attachments,
                    message.user_id,
                    message.thread_id,
                    message.reply_to.as_ref().map(|r| r.as_str()),
                    message.session_id.as_ref().map(|s| s.as_str()),
                    message.sentiment.map(|s| s.to_string()),
                    now,
                ],
            )?;
            Ok(())
        })
    }

    /// Load the most recent `limit` messages (offset pages further back),
    /// returned in insertion order.
    #[instrument(skip(self))]
    pub fn load_recent(&self, limit: u32, offset: u32) -> Result<Vec<ChatMessage>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user, role, content, attachments, user_id, thread_id, reply_to,
                        session_id, sentiment
                 FROM messages ORDER BY position DESC LIMIT ?1 OFFSET ?2",
            )?;
            let mut rows = stmt.query(rusqlite::params![limit, offset])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_message(row)?);
            }
            results.reverse();
            Ok(results)
        })
    }

    /// Fetch one message by id.
    pub fn get(&self, id: &MessageId) -> Result<ChatMessage, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user, role, content, attachments, user_id, thread_id, reply_to,
                        session_id, sentiment
                 FROM messages WHERE id = ?1",
            )?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_message(row),
                None => Err(StoreError::NotFound(format!("message {id}"))),
            }
        })
    }

    pub fn count(&self) -> Result<u64, StoreError> {
        self.db.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
            Ok(n as u64)
        })
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<ChatMessage, StoreError> {
    let role_str: String = row_helpers::get(row, 2, "messages", "role")?;
    let attachments_raw: String = row_helpers::get(row, 4, "messages", "attachments")?;
    let sentiment_raw: Option<String> = row_helpers::get_opt(row, 9, "messages", "sentiment")?;

    Ok(ChatMessage {
        id: MessageId::from_raw(row_helpers::get::<String>(row, 0, "messages", "id")?),
        user: row_helpers::get(row, 1, "messages", "user")?,
        role: row_helpers::parse_enum(&role_str, "messages", "role")?,
        content: row_helpers::get(row, 3, "messages", "content")?,
        attachments: row_helpers::parse_json(&attachments_raw, "messages", "attachments")?,
        user_id: row_helpers::get_opt(row, 5, "messages", "user_id")?,
        thread_id: row_helpers::get_opt(row, 6, "messages", "thread_id")?,
        reply_to: row_helpers::get_opt::<String>(row, 7, "messages", "reply_to")?
            .map(MessageId::from_raw),
        session_id: row_helpers::get_opt::<String>(row, 8, "messages", "session_id")?
            .map(SessionId::from_raw),
        sentiment: match sentiment_raw {
            Some(raw) => Some(row_helpers::parse_enum(&raw, "messages", "sentiment")?),
            None => None,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parlor_core::messages::{Role, Sentiment};

    fn repo() -> MessageRepo {
        MessageRepo::new(Database::in_memory().unwrap())
    }

    fn msg(id: &str, content: &str) -> ChatMessage {
        ChatMessage::user_text(MessageId::from_raw(id), "Alice", content)
    }

    #[test]
    fn insert_and_get() {
        let repo = repo();
        repo.upsert(&msg("m1", "hello")).unwrap();
        let fetched = repo.get(&MessageId::from_raw("m1")).unwrap();
        assert_eq!(fetched.content, "hello");
        assert_eq!(fetched.role, Role::User);
    }

    #[test]
    fn upsert_is_idempotent_by_id() {
        let repo = repo();
        repo.upsert(&msg("m1", "hello")).unwrap();
        repo.upsert(&msg("m1", "hello")).unwrap();
        assert_eq!(repo.count().unwrap(), 1);
    }

    #[test]
    fn update_preserves_position() {
        let repo = repo();
        repo.upsert(&msg("m1", "first")).unwrap();
        repo.upsert(&msg("m2", "second")).unwrap();
        repo.upsert(&msg("m3", "third")).unwrap();

        // Update the first message; it must stay first.
        repo.upsert(&msg("m1", "first, edited")).unwrap();

        let all = repo.load_recent(10, 0).unwrap();
        let ids: Vec<&str> = all.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2", "m3"]);
        assert_eq!(all[0].content, "first, edited");
    }

    #[test]
    fn last_write_wins_on_content() {
        let repo = repo();
        repo.upsert(&msg("m1", "from connection A")).unwrap();
        repo.upsert(&msg("m1", "from connection B")).unwrap();
        assert_eq!(repo.count().unwrap(), 1);
        assert_eq!(
            repo.get(&MessageId::from_raw("m1")).unwrap().content,
            "from connection B"
        );
    }

    #[test]
    fn update_does_not_change_role_or_user() {
        let repo = repo();
        repo.upsert(&msg("m1", "original")).unwrap();

        let mut edit = ChatMessage::assistant_text(MessageId::from_raw("m1"), "forged");
        edit.user = "Mallory".into();
        repo.upsert(&edit).unwrap();

        let fetched = repo.get(&MessageId::from_raw("m1")).unwrap();
        assert_eq!(fetched.role, Role::User);
        assert_eq!(fetched.user, "Alice");
        assert_eq!(fetched.content, "forged");
    }

    #[test]
    fn load_recent_is_bounded_and_ordered() {
        let repo = repo();
        for i in 0..10 {
            repo.upsert(&msg(&format!("m{i}"), &format!("body {i}"))).unwrap();
        }
        let window = repo.load_recent(3, 0).unwrap();
        let ids: Vec<&str> = window.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m7", "m8", "m9"]);

        let older = repo.load_recent(3, 3).unwrap();
        let ids: Vec<&str> = older.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m4", "m5", "m6"]);
    }

    #[test]
    fn attachments_and_sentiment_roundtrip() {
        let repo = repo();
        let mut m = msg("m1", "see attached");
        m.attachments = vec!["https://cdn/a.png".into(), "https://cdn/b.png".into()];
        m.sentiment = Some(Sentiment::Positive);
        m.session_id = Some(SessionId::from_raw("sess_1"));
        repo.upsert(&m).unwrap();

        let fetched = repo.get(&MessageId::from_raw("m1")).unwrap();
        assert_eq!(fetched.attachments.len(), 2);
        assert_eq!(fetched.sentiment, Some(Sentiment::Positive));
        assert_eq!(fetched.session_id.unwrap().as_str(), "sess_1");
    }

    #[test]
    fn get_missing_fails() {
        let repo = repo();
        assert!(matches!(
            repo.get(&MessageId::from_raw("nope")),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn injection_shaped_content_is_inert() {
        let repo = repo();
        repo.upsert(&msg("m1", "'); DROP TABLE messages; --")).unwrap();
        assert_eq!(repo.count().unwrap(), 1);
        let fetched = repo.get(&MessageId::from_raw("m1")).unwrap();
        assert!(fetched.content.contains("DROP TABLE"));
    }
}
