use std::collections::HashMap;

use tracing::debug;

use parlor_core::ids::MessageId;
use parlor_core::messages::ChatMessage;
use parlor_store::messages::MessageRepo;
use parlor_store::StoreError;

pub const DEFAULT_WINDOW: usize = 200;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Write-through view of a room's ordered message log.
///
/// The mirror holds the most recent window of messages for snapshots and
/// prompt grounding; the repo holds everything. The mirror is only touched
/// after the durable write succeeds, so a failed write never leaves the two
/// disagreeing.
pub struct MessageLog {
    repo: MessageRepo,
    window: usize,
    mirror: Vec<ChatMessage>,
    index: HashMap<MessageId, usize>,
}

impl MessageLog {
    /// Hydrate the mirror from the most recent stored window.
    pub fn new(repo: MessageRepo, window: usize) -> Result<Self, StoreError> {
        let mirror = repo.load_recent(window as u32, 0)?;
        let index = mirror
            .iter()
            .enumerate()
            .map(|(i, m)| (m.id.clone(), i))
            .collect();
        debug!(hydrated = mirror.len(), "message log hydrated");
        Ok(Self {
            repo,
            window,
            mirror,
            index,
        })
    }

    /// Insert or update a message, durably first. An update replaces only
    /// the mutable fields of the existing entry; its position never moves.
    /// An update to a message that has scrolled out of the live window is
    /// written durably without re-entering the window.
    pub fn upsert(&mut self, message: &ChatMessage) -> Result<UpsertOutcome, StoreError> {
        if let Some(&i) = self.index.get(&message.id) {
            self.repo.upsert(message)?;
            self.mirror[i].apply_update(message);
            return Ok(UpsertOutcome::Updated);
        }

        // A mirror miss does not mean the id is new: it may exist durably
        // beyond the window.
        let known = match self.repo.get(&message.id) {
            Ok(_) => true,
            Err(StoreError::NotFound(_)) => false,
            Err(error) => return Err(error),
        };
        self.repo.upsert(message)?;
        if known {
            return Ok(UpsertOutcome::Updated);
        }

        self.mirror.push(message.clone());
        self.index.insert(message.id.clone(), self.mirror.len() - 1);
        if self.mirror.len() > self.window {
            let evicted = self.mirror.remove(0);
            self.index.remove(&evicted.id);
            for slot in self.index.values_mut() {
                *slot -= 1;
            }
        }
        Ok(UpsertOutcome::Inserted)
    }

    pub fn get(&self, id: &MessageId) -> Option<&ChatMessage> {
        self.index.get(id).map(|&i| &self.mirror[i])
    }

    /// Find a message by id, falling back to durable storage when it has
    /// scrolled out of the live window.
    pub fn fetch(&self, id: &MessageId) -> Result<Option<ChatMessage>, StoreError> {
        if let Some(found) = self.get(id) {
            return Ok(Some(found.clone()));
        }
        match self.repo.get(id) {
            Ok(message) => Ok(Some(message)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(error) => Err(error),
        }
    }

    /// The in-memory window, oldest first.
    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.mirror.clone()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChatMessage> {
        self.mirror.iter()
    }

    pub fn len(&self) -> usize {
        self.mirror.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mirror.is_empty()
    }

    /// Older history beyond the live window, via the repo.
    pub fn load_recent(&self, limit: u32, offset: u32) -> Result<Vec<ChatMessage>, StoreError> {
        self.repo.load_recent(limit, offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parlor_core::messages::Role;
    use parlor_store::Database;

    fn log(window: usize) -> MessageLog {
        let db = Database::in_memory().unwrap();
        MessageLog::new(MessageRepo::new(db), window).unwrap()
    }

    fn msg(id: &str, content: &str) -> ChatMessage {
        ChatMessage::user_text(MessageId::from_raw(id), "Alice", content)
    }

    #[test]
    fn insert_then_update_keeps_order() {
        let mut log = log(10);
        assert_eq!(log.upsert(&msg("m1", "one")).unwrap(), UpsertOutcome::Inserted);
        assert_eq!(log.upsert(&msg("m2", "two")).unwrap(), UpsertOutcome::Inserted);
        assert_eq!(
            log.upsert(&msg("m1", "one, edited")).unwrap(),
            UpsertOutcome::Updated
        );

        let snapshot = log.snapshot();
        assert_eq!(snapshot[0].id.as_str(), "m1");
        assert_eq!(snapshot[0].content, "one, edited");
        assert_eq!(snapshot[1].id.as_str(), "m2");
    }

    #[test]
    fn update_preserves_author_and_role() {
        let mut log = log(10);
        log.upsert(&msg("m1", "original")).unwrap();

        let mut forged = ChatMessage::assistant_text(MessageId::from_raw("m1"), "edited");
        forged.user = "Mallory".into();
        log.upsert(&forged).unwrap();

        let kept = log.get(&MessageId::from_raw("m1")).unwrap();
        assert_eq!(kept.user, "Alice");
        assert_eq!(kept.role, Role::User);
        assert_eq!(kept.content, "edited");
    }

    #[test]
    fn window_evicts_oldest() {
        let mut log = log(3);
        for i in 0..5 {
            log.upsert(&msg(&format!("m{i}"), "body")).unwrap();
        }
        assert_eq!(log.len(), 3);
        let ids: Vec<&str> = log.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m2", "m3", "m4"]);
        assert!(log.get(&MessageId::from_raw("m0")).is_none());
        // Evicted messages remain durable
        assert_eq!(log.load_recent(10, 0).unwrap().len(), 5);
    }

    #[test]
    fn hydrates_from_storage() {
        let db = Database::in_memory().unwrap();
        {
            let mut log = MessageLog::new(MessageRepo::new(db.clone()), 10).unwrap();
            log.upsert(&msg("m1", "persisted")).unwrap();
            log.upsert(&msg("m2", "also persisted")).unwrap();
        }
        let log = MessageLog::new(MessageRepo::new(db), 10).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log.snapshot()[0].content, "persisted");
    }

    #[test]
    fn evicted_message_update_stays_out_of_window() {
        let db = Database::in_memory().unwrap();
        let mut log = MessageLog::new(MessageRepo::new(db.clone()), 2).unwrap();
        log.upsert(&msg("m1", "first")).unwrap();
        log.upsert(&msg("m2", "second")).unwrap();
        log.upsert(&msg("m3", "third")).unwrap(); // evicts m1

        assert_eq!(
            log.upsert(&msg("m1", "first, edited")).unwrap(),
            UpsertOutcome::Updated
        );
        let ids: Vec<&str> = log.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m2", "m3"]);

        // Durable copy updated, position untouched.
        let repo = MessageRepo::new(db);
        assert_eq!(
            repo.get(&MessageId::from_raw("m1")).unwrap().content,
            "first, edited"
        );
        assert_eq!(repo.load_recent(10, 0).unwrap()[0].id.as_str(), "m1");
    }

    #[test]
    fn fetch_falls_back_to_storage() {
        let mut log = log(2);
        for i in 0..3 {
            log.upsert(&msg(&format!("m{i}"), "body")).unwrap();
        }
        assert!(log.get(&MessageId::from_raw("m0")).is_none());
        let fetched = log.fetch(&MessageId::from_raw("m0")).unwrap().unwrap();
        assert_eq!(fetched.id.as_str(), "m0");
        assert!(log.fetch(&MessageId::from_raw("ghost")).unwrap().is_none());
    }

    #[test]
    fn duplicate_insert_is_single_entry() {
        let mut log = log(10);
        log.upsert(&msg("m1", "same")).unwrap();
        log.upsert(&msg("m1", "same")).unwrap();
        assert_eq!(log.len(), 1);
    }
}
