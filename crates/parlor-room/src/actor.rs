use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use parlor_core::fingerprint::ConnectionContext;
use parlor_core::frames::Frame;
use parlor_core::ids::{ConnectionId, RoomId, SessionId};
use parlor_core::messages::{ChatMessage, Role};
use parlor_core::provider::{ChatProvider, PromptContext};
use parlor_core::sentiment;
use parlor_store::messages::MessageRepo;
use parlor_store::sessions::{SessionRepo, SessionRow};
use parlor_store::Database;

use crate::error::RoomError;
use crate::log::MessageLog;
use crate::registry::ConnectionRegistry;
use crate::tracker::SessionTracker;
use crate::turn;

const COMMAND_QUEUE: usize = 256;

/// Everything a room can be asked to do. Commands are processed strictly in
/// arrival order by a single task, which is the room's whole concurrency
/// story: no mutation of the log, tracker or registry happens anywhere else.
pub enum RoomCommand {
    Connect {
        connection_id: ConnectionId,
        sender: mpsc::Sender<String>,
    },
    Disconnect {
        connection_id: ConnectionId,
    },
    Inbound {
        connection_id: ConnectionId,
        raw: String,
        context: ConnectionContext,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<ChatMessage>>,
    },
    Session {
        session_id: SessionId,
        reply: oneshot::Sender<Option<SessionRow>>,
    },
}

/// Cheap cloneable handle to a running room actor.
#[derive(Clone)]
pub struct RoomHandle {
    room_id: RoomId,
    tx: mpsc::Sender<RoomCommand>,
}

impl RoomHandle {
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub async fn connect(
        &self,
        connection_id: ConnectionId,
        sender: mpsc::Sender<String>,
    ) -> Result<(), RoomError> {
        self.send(RoomCommand::Connect {
            connection_id,
            sender,
        })
        .await
    }

    pub async fn disconnect(&self, connection_id: ConnectionId) -> Result<(), RoomError> {
        self.send(RoomCommand::Disconnect { connection_id }).await
    }

    pub async fn inbound(
        &self,
        connection_id: ConnectionId,
        raw: String,
        context: ConnectionContext,
    ) -> Result<(), RoomError> {
        self.send(RoomCommand::Inbound {
            connection_id,
            raw,
            context,
        })
        .await
    }

    pub async fn snapshot(&self) -> Result<Vec<ChatMessage>, RoomError> {
        let (reply, rx) = oneshot::channel();
        self.send(RoomCommand::Snapshot { reply }).await?;
        rx.await.map_err(|_| RoomError::ActorUnavailable)
    }

    pub async fn session(&self, session_id: SessionId) -> Result<Option<SessionRow>, RoomError> {
        let (reply, rx) = oneshot::channel();
        self.send(RoomCommand::Session { session_id, reply }).await?;
        rx.await.map_err(|_| RoomError::ActorUnavailable)
    }

    async fn send(&self, command: RoomCommand) -> Result<(), RoomError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| RoomError::ActorUnavailable)
    }
}

/// The per-room actor: ordered log, session tracker and connection registry
/// behind one command queue. Streamed replies run inline in the command
/// loop, so everything that arrives during a reply queues behind it.
pub struct RoomActor {
    room_id: RoomId,
    log: MessageLog,
    tracker: SessionTracker,
    registry: ConnectionRegistry,
    provider: Arc<dyn ChatProvider>,
}

impl RoomActor {
    pub fn spawn(
        room_id: RoomId,
        db: Database,
        provider: Arc<dyn ChatProvider>,
        window: usize,
    ) -> Result<RoomHandle, RoomError> {
        let log = MessageLog::new(MessageRepo::new(db.clone()), window)?;
        let tracker = SessionTracker::new(SessionRepo::new(db), window)?;

        let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
        let mut actor = Self {
            room_id: room_id.clone(),
            log,
            tracker,
            registry: ConnectionRegistry::new(),
            provider,
        };

        info!(room_id = %room_id, "room actor started");
        tokio::spawn(async move { actor.run(rx).await });

        Ok(RoomHandle { room_id, tx })
    }

    async fn run(&mut self, mut rx: mpsc::Receiver<RoomCommand>) {
        while let Some(command) = rx.recv().await {
            self.handle(command).await;
        }
        debug!(room_id = %self.room_id, "room actor stopped");
    }

    async fn handle(&mut self, command: RoomCommand) {
        match command {
            RoomCommand::Connect {
                connection_id,
                sender,
            } => self.handle_connect(connection_id, sender),
            RoomCommand::Disconnect { connection_id } => {
                self.registry.unregister(&connection_id);
            }
            RoomCommand::Inbound {
                connection_id,
                raw,
                context,
            } => self.handle_inbound(connection_id, raw, context).await,
            RoomCommand::Snapshot { reply } => {
                let _ = reply.send(self.log.snapshot());
            }
            RoomCommand::Session { session_id, reply } => {
                let session = self.tracker.lookup(&session_id).unwrap_or_else(|error| {
                    warn!(room_id = %self.room_id, error = %error, "session lookup failed");
                    None
                });
                let _ = reply.send(session);
            }
        }
    }

    fn handle_connect(&mut self, connection_id: ConnectionId, sender: mpsc::Sender<String>) {
        self.registry.register(connection_id.clone(), sender);

        // Full ordered log before any live traffic.
        let all = Frame::All {
            messages: self.log.snapshot(),
        };
        match all.to_json() {
            Ok(payload) => {
                self.registry.send_to(&connection_id, &payload);
            }
            Err(error) => {
                warn!(room_id = %self.room_id, error = %error, "snapshot serialization failed");
            }
        }
        info!(
            room_id = %self.room_id,
            connection_id = %connection_id,
            connections = self.registry.len(),
            "connection joined"
        );
    }

    async fn handle_inbound(
        &mut self,
        connection_id: ConnectionId,
        raw: String,
        context: ConnectionContext,
    ) {
        let frame = match Frame::parse(&raw) {
            Ok(frame) => frame,
            Err(error) => {
                warn!(room_id = %self.room_id, error = %error, "dropping malformed frame");
                return;
            }
        };

        let (mut message, typing, is_update) = match frame {
            Frame::Add { message } => (message, None, false),
            Frame::Update { message, typing } => (message, typing, true),
            Frame::All { .. } => {
                warn!(room_id = %self.room_id, "dropping client-sent all frame");
                return;
            }
        };

        // Assistant frames are minted by the room itself, never accepted
        // from a connection.
        if message.role == Role::Assistant {
            warn!(room_id = %self.room_id, message_id = %message.id, "dropping client frame with assistant role");
            return;
        }

        if is_update {
            // The mirror only covers the live window; check storage before
            // rejecting an edit of an older message.
            let existing = match self.log.fetch(&message.id) {
                Ok(Some(existing)) => existing,
                Ok(None) => {
                    warn!(
                        room_id = %self.room_id,
                        message_id = %message.id,
                        "dropping update for unknown message"
                    );
                    return;
                }
                Err(error) => {
                    warn!(room_id = %self.room_id, error = %error, "message lookup failed, frame dropped");
                    return;
                }
            };
            if existing.user != message.user || existing.role != message.role {
                warn!(
                    room_id = %self.room_id,
                    message_id = %message.id,
                    "dropping update that changes author or role"
                );
                return;
            }
        }

        message.sentiment = Some(sentiment::classify(&message.content));

        if let Some(session_id) = message.session_id.clone() {
            if let Err(error) = self.tracker.touch(
                &session_id,
                &context,
                message.user_id.as_deref(),
                Some(&message.id),
                message.sentiment,
            ) {
                warn!(room_id = %self.room_id, error = %error, "session touch rejected, frame dropped");
                return;
            }
        }

        if let Err(error) = self.log.upsert(&message) {
            warn!(room_id = %self.room_id, error = %error, "durable write failed, frame dropped");
            return;
        }

        // Peers see a frame only once it has cleared validation, session
        // guard and the durable write; the sender already renders its own
        // copy locally, so it is excluded.
        let outbound = if is_update {
            Frame::Update {
                message: message.clone(),
                typing,
            }
        } else {
            Frame::Add {
                message: message.clone(),
            }
        };
        match outbound.to_json() {
            Ok(payload) => {
                self.registry.broadcast(&payload, Some(&connection_id));
            }
            Err(error) => {
                warn!(room_id = %self.room_id, error = %error, "outbound frame serialization failed");
            }
        }

        // A fresh user message gets a streamed reply; edits do not.
        if !is_update {
            let context = self.prompt_context(message.session_id.as_ref());
            let provider = Arc::clone(&self.provider);
            let result = turn::run_assistant_turn(
                provider.as_ref(),
                &mut self.log,
                &mut self.registry,
                &context,
                &message.id,
                message.session_id.as_ref(),
            )
            .await;
            match result {
                Ok(outcome) => {
                    debug!(
                        room_id = %self.room_id,
                        message_id = %outcome.message_id,
                        state = ?outcome.state,
                        "reply turn complete"
                    );
                }
                Err(error) => {
                    warn!(room_id = %self.room_id, error = %error, "reply turn failed");
                }
            }
        }
    }

    /// Room window first, then the requesting session's own messages.
    fn prompt_context(&self, session_id: Option<&SessionId>) -> PromptContext {
        let session_subset: Vec<&ChatMessage> = match session_id {
            Some(sid) => self
                .log
                .iter()
                .filter(|m| m.session_id.as_ref() == Some(sid))
                .collect(),
            None => Vec::new(),
        };
        PromptContext::from_history(self.log.iter(), session_subset)
    }
}
