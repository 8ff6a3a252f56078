use std::collections::HashMap;

use chrono::Utc;
use tracing::{debug, instrument, warn};

use parlor_core::fingerprint::ConnectionContext;
use parlor_core::ids::{MessageId, SessionId};
use parlor_core::messages::Sentiment;
use parlor_store::sessions::{SessionRepo, SessionRow};
use parlor_store::StoreError;

use crate::error::RoomError;

/// Per-session aggregate state for one room.
///
/// Sessions are created lazily on first sight of a session id. The creating
/// connection's descriptor becomes the session fingerprint; later touches
/// from a non-matching descriptor are rejected so a leaked session id cannot
/// be driven from elsewhere. The live map is committed only after the row is
/// durably written, and holds only the most recently updated `capacity`
/// sessions; older ones stay durable and are reloaded on demand.
pub struct SessionTracker {
    repo: SessionRepo,
    sessions: HashMap<SessionId, SessionRow>,
    capacity: usize,
}

impl SessionTracker {
    pub fn new(repo: SessionRepo, capacity: usize) -> Result<Self, RoomError> {
        // load_all returns most recently updated first.
        let sessions = repo
            .load_all()?
            .into_iter()
            .take(capacity)
            .map(|row| (row.id.clone(), row))
            .collect::<HashMap<_, _>>();
        debug!(hydrated = sessions.len(), "session tracker hydrated");
        Ok(Self {
            repo,
            sessions,
            capacity,
        })
    }

    /// Record activity against a session, creating it if unseen.
    #[instrument(skip_all, fields(session_id = %session_id))]
    pub fn touch(
        &mut self,
        session_id: &SessionId,
        context: &ConnectionContext,
        user_id: Option<&str>,
        message_id: Option<&MessageId>,
        sentiment: Option<Sentiment>,
    ) -> Result<(), RoomError> {
        let mut row = match self.lookup(session_id)? {
            Some(existing) => {
                let fingerprint =
                    ConnectionContext::new(&existing.ip_address, &existing.user_agent);
                if !fingerprint.matches(context) {
                    warn!(
                        ip = %context.ip_address,
                        "fingerprint mismatch, session touch rejected"
                    );
                    return Err(RoomError::FingerprintMismatch(session_id.clone()));
                }
                existing
            }
            None => SessionRow::new(
                session_id.clone(),
                context.ip_address.clone(),
                context.user_agent.clone(),
            ),
        };

        let now = Utc::now();
        row.updated_at = now;
        // Duration only ever grows, even if clocks wobble.
        let elapsed = (now - row.created_at).num_seconds().max(0);
        row.duration_secs = row.duration_secs.max(elapsed);

        // Activity is a plain trail of touch timestamps.
        row.activity.push(now.to_rfc3339());
        if let Some(message_id) = message_id {
            if !row.messages.iter().any(|m| m == message_id) {
                row.messages.push(message_id.clone());
            }
        }
        if let Some(user_id) = user_id {
            row.user_id = Some(user_id.to_string());
        }
        if let Some(device) = &context.device {
            row.device = Some(device.clone());
        }
        if let Some(sentiment) = sentiment {
            row.sentiment = Some(sentiment);
        }

        // Durable first, live map second.
        self.repo.upsert(&row)?;
        self.sessions.insert(session_id.clone(), row);
        self.evict_to_capacity();
        Ok(())
    }

    pub fn get(&self, session_id: &SessionId) -> Option<&SessionRow> {
        self.sessions.get(session_id)
    }

    /// Find a session, falling back to durable storage when it has been
    /// evicted from the live map.
    pub fn lookup(&self, session_id: &SessionId) -> Result<Option<SessionRow>, RoomError> {
        if let Some(row) = self.sessions.get(session_id) {
            return Ok(Some(row.clone()));
        }
        match self.repo.get(session_id) {
            Ok(row) => Ok(Some(row)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    fn evict_to_capacity(&mut self) {
        while self.sessions.len() > self.capacity {
            let Some(stalest) = self
                .sessions
                .values()
                .min_by_key(|row| row.updated_at)
                .map(|row| row.id.clone())
            else {
                break;
            };
            self.sessions.remove(&stalest);
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
