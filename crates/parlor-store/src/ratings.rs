use chrono::Utc;
use tracing::instrument;

use parlor_core::ids::{MessageId, RatingId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

pub const RATING_MIN: i64 = 1;
pub const RATING_MAX: i64 = 5;

#[derive(Debug, Clone)]
pub struct RatingRow {
    pub id: RatingId,
    pub user_id: String,
    pub message_id: MessageId,
    pub value: i64,
}

/// Store for message ratings. A user may rate the same message more than
/// once; each rating is its own row. Range is enforced here and backed by
/// a CHECK constraint in the schema.
pub struct RatingRepo {
    db: Database,
}

impl RatingRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self), fields(message_id = %message_id))]
    pub fn add(
        &self,
        user_id: &str,
        message_id: &MessageId,
        value: i64,
    ) -> Result<RatingId, StoreError> {
        if !(RATING_MIN..=RATING_MAX).contains(&value) {
            return Err(StoreError::RangeViolation(format!(
                "rating {value} outside {RATING_MIN}..={RATING_MAX}"
            )));
        }

        let id = RatingId::new();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO ratings (id, user_id, message_id, value, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    id.as_str(),
                    user_id,
                    message_id.as_str(),
                    value,
                    Utc::now().to_rfc3339(),
                ],
            )?;
            Ok(())
        })?;
        Ok(id)
    }

    pub fn for_message(&self, message_id: &MessageId) -> Result<Vec<RatingRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, message_id, value FROM ratings
                 WHERE message_id = ?1 ORDER BY created_at",
            )?;
            let mut rows = stmt.query([message_id.as_str()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(RatingRow {
                    id: RatingId::from_raw(row_helpers::get::<String>(row, 0, "ratings", "id")?),
                    user_id: row_helpers::get(row, 1, "ratings", "user_id")?,
                    message_id: MessageId::from_raw(row_helpers::get::<String>(
                        row,
                        2,
                        "ratings",
                        "message_id",
                    )?),
                    value: row_helpers::get(row, 3, "ratings", "value")?,
                });
            }
            Ok(results)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> RatingRepo {
        RatingRepo::new(Database::in_memory().unwrap())
    }

    #[test]
    fn add_within_range() {
        let repo = repo();
        let mid = MessageId::from_raw("m1");
        repo.add("u1", &mid, 1).unwrap();
        repo.add("u1", &mid, 5).unwrap();
        assert_eq!(repo.for_message(&mid).unwrap().len(), 2);
    }

    #[test]
    fn out_of_range_rejected() {
        let repo = repo();
        let mid = MessageId::from_raw("m1");
        assert!(matches!(
            repo.add("u1", &mid, 0),
            Err(StoreError::RangeViolation(_))
        ));
        assert!(matches!(
            repo.add("u1", &mid, 6),
            Err(StoreError::RangeViolation(_))
        ));
        assert!(repo.for_message(&mid).unwrap().is_empty());
    }

    #[test]
    fn same_user_may_rate_twice() {
        let repo = repo();
        let mid = MessageId::from_raw("m1");
        repo.add("u1", &mid, 3).unwrap();
        repo.add("u1", &mid, 4).unwrap();
        let ratings = repo.for_message(&mid).unwrap();
        assert_eq!(ratings.len(), 2);
        assert_eq!(ratings[1].value, 4);
    }

    #[test]
    fn ratings_scoped_to_message() {
        let repo = repo();
        repo.add("u1", &MessageId::from_raw("m1"), 2).unwrap();
        repo.add("u2", &MessageId::from_raw("m2"), 5).unwrap();
        assert_eq!(repo.for_message(&MessageId::from_raw("m1")).unwrap().len(), 1);
    }
}
