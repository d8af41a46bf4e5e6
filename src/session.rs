// SPDX-License-Identifier: AGPL-3.0-or-later

//! The per-document actor: component D, the session coordinator.
//!
//! One task owns a [`Document`] and a table of connected peers; every commit, cursor update,
//! presence event, and hard reset for that document funnels through this task's mailbox, which
//! is what gives the commit pipeline its single-writer discipline (§5). Handles are cheap to
//! clone `mpsc::Sender`s, the same idiom the teacher daemon uses for its document task.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use time::OffsetDateTime;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::document::{Document, DocumentSnapshot, DocumentStats};
use crate::error::SessionError;
use crate::ot::{Edit, Op};
use crate::protocol::{CursorPosition, ServerMessage};

pub type ConnId = u64;

/// Capacity of a peer's reliable outgoing queue before it is considered slow (§5 backpressure).
const RELIABLE_CHANNEL_CAPACITY: usize = 64;
/// How long the actor waits for a reliable send to drain before disconnecting that peer.
const RELIABLE_SEND_TIMEOUT: Duration = Duration::from_secs(5);
/// Bound on the actor's own command mailbox; a full mailbox is the "enqueue suspension point"
/// named in §5.
const COMMAND_CHANNEL_CAPACITY: usize = 256;

/// Coalescing mailbox for cursor broadcasts to one peer.
///
/// Keeps only the newest [`CursorPosition`] per source user and wakes the peer's connection
/// task via [`Notify`]. Posting never blocks, so a slow peer can never stall the document
/// actor on a cursor update (§5: "must not reorder cursor updates from a single sender", which
/// holds here since a single sender's updates only ever replace their own prior slot).
#[derive(Default)]
pub struct CursorMailbox {
    slots: Mutex<HashMap<String, CursorPosition>>,
    notify: Notify,
}

impl CursorMailbox {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn post(&self, user_id: String, cursor: CursorPosition) {
        self.slots.lock().expect("cursor mailbox poisoned").insert(user_id, cursor);
        self.notify.notify_one();
    }

    /// Wait for at least one pending cursor, then drain everything queued so far.
    pub async fn recv_batch(&self) -> Vec<(String, CursorPosition)> {
        self.notify.notified().await;
        self.drain()
    }

    fn drain(&self) -> Vec<(String, CursorPosition)> {
        self.slots.lock().expect("cursor mailbox poisoned").drain().collect()
    }
}

struct ConnectionState {
    user_id: String,
    username: String,
    reliable_tx: mpsc::Sender<ServerMessage>,
    cursor_mailbox: Arc<CursorMailbox>,
}

/// Connection count and idle duration, used by the registry's eviction reaper (§9).
#[derive(Debug, Clone, Copy)]
pub struct DocStats {
    pub connection_count: usize,
    pub idle_since: Option<Instant>,
}

enum DocCommand {
    Join {
        user_id: String,
        username: String,
        reliable_tx: mpsc::Sender<ServerMessage>,
        cursor_mailbox: Arc<CursorMailbox>,
        reply: oneshot::Sender<(ConnId, String, u64)>,
    },
    Disconnect {
        conn_id: ConnId,
    },
    Operation {
        conn_id: ConnId,
        ops: Vec<Op>,
        client_version: u64,
    },
    CursorUpdate {
        conn_id: ConnId,
        cursor: CursorPosition,
    },
    ContentUpdate {
        conn_id: ConnId,
        content: String,
    },
    ChatMessage {
        conn_id: ConnId,
        message: String,
        username: Option<String>,
    },
    ReadOnly {
        reply: oneshot::Sender<(DocumentSnapshot, DocumentStats)>,
    },
    Stats {
        reply: oneshot::Sender<DocStats>,
    },
}

/// A cloneable handle to a running document actor (the "document actor handle" idiom, §10.5).
#[derive(Clone)]
pub struct DocumentActorHandle {
    doc_id: String,
    tx: mpsc::Sender<DocCommand>,
}

impl DocumentActorHandle {
    /// Spawn a fresh actor owning an empty document with the given id.
    pub fn spawn(doc_id: String) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let actor = DocumentActor::new(Document::new(doc_id.clone()), rx);
        tokio::spawn(actor.run());
        DocumentActorHandle { doc_id, tx }
    }

    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }

    /// Register a new connection; returns its id plus the current `(content, version)` to send
    /// as the connection's initial `document_state` (§4.4 step 2).
    pub async fn join(
        &self,
        user_id: String,
        username: String,
        reliable_tx: mpsc::Sender<ServerMessage>,
        cursor_mailbox: Arc<CursorMailbox>,
    ) -> (ConnId, String, u64) {
        let (reply, recv) = oneshot::channel();
        let _ = self
            .tx
            .send(DocCommand::Join {
                user_id,
                username,
                reliable_tx,
                cursor_mailbox,
                reply,
            })
            .await;
        recv.await.expect("document actor task has been killed")
    }

    pub async fn disconnect(&self, conn_id: ConnId) {
        let _ = self.tx.send(DocCommand::Disconnect { conn_id }).await;
    }

    pub async fn operation(&self, conn_id: ConnId, ops: Vec<Op>, client_version: u64) {
        let _ = self
            .tx
            .send(DocCommand::Operation {
                conn_id,
                ops,
                client_version,
            })
            .await;
    }

    pub async fn cursor_update(&self, conn_id: ConnId, cursor: CursorPosition) {
        let _ = self.tx.send(DocCommand::CursorUpdate { conn_id, cursor }).await;
    }

    pub async fn content_update(&self, conn_id: ConnId, content: String) {
        let _ = self
            .tx
            .send(DocCommand::ContentUpdate { conn_id, content })
            .await;
    }

    /// `username` is the client-supplied display name carried on the wire `chat_message`
    /// envelope (§6); when absent, the connection's own joined username is used instead.
    pub async fn chat_message(&self, conn_id: ConnId, message: String, username: Option<String>) {
        let _ = self
            .tx
            .send(DocCommand::ChatMessage {
                conn_id,
                message,
                username,
            })
            .await;
    }

    /// `read_only` (§4.3): content, version, and metadata, without registering a connection.
    pub async fn read_only(&self) -> (DocumentSnapshot, DocumentStats) {
        let (reply, recv) = oneshot::channel();
        let _ = self.tx.send(DocCommand::ReadOnly { reply }).await;
        recv.await.expect("document actor task has been killed")
    }

    pub async fn stats(&self) -> DocStats {
        let (reply, recv) = oneshot::channel();
        let _ = self.tx.send(DocCommand::Stats { reply }).await;
        recv.await.expect("document actor task has been killed")
    }
}

struct DocumentActor {
    document: Document,
    connections: HashMap<ConnId, ConnectionState>,
    next_conn_id: ConnId,
    empty_since: Option<Instant>,
    rx: mpsc::Receiver<DocCommand>,
}

impl DocumentActor {
    fn new(document: Document, rx: mpsc::Receiver<DocCommand>) -> Self {
        DocumentActor {
            document,
            connections: HashMap::new(),
            next_conn_id: 0,
            empty_since: Some(Instant::now()),
            rx,
        }
    }

    async fn run(mut self) {
        let doc_id = self.document.id.clone();
        info!(doc_id = %doc_id, "document actor started");
        while let Some(cmd) = self.rx.recv().await {
            self.handle(cmd).await;
        }
        info!(doc_id = %doc_id, "document actor shut down (evicted or registry dropped)");
    }

    async fn handle(&mut self, cmd: DocCommand) {
        match cmd {
            DocCommand::Join {
                user_id,
                username,
                reliable_tx,
                cursor_mailbox,
                reply,
            } => self.handle_join(user_id, username, reliable_tx, cursor_mailbox, reply).await,
            DocCommand::Disconnect { conn_id } => self.handle_disconnect(conn_id).await,
            DocCommand::Operation {
                conn_id,
                ops,
                client_version,
            } => self.handle_operation(conn_id, ops, client_version).await,
            DocCommand::CursorUpdate { conn_id, cursor } => self.handle_cursor_update(conn_id, cursor),
            DocCommand::ContentUpdate { conn_id, content } => {
                self.handle_content_update(conn_id, content).await
            }
            DocCommand::ChatMessage {
                conn_id,
                message,
                username,
            } => self.handle_chat_message(conn_id, message, username).await,
            DocCommand::ReadOnly { reply } => {
                let _ = reply.send((self.document.snapshot_full(), self.document.stats()));
            }
            DocCommand::Stats { reply } => {
                let _ = reply.send(DocStats {
                    connection_count: self.connections.len(),
                    idle_since: self.empty_since,
                });
            }
        }
    }

    async fn handle_join(
        &mut self,
        user_id: String,
        username: String,
        reliable_tx: mpsc::Sender<ServerMessage>,
        cursor_mailbox: Arc<CursorMailbox>,
        reply: oneshot::Sender<(ConnId, String, u64)>,
    ) {
        let conn_id = self.next_conn_id;
        self.next_conn_id += 1;
        self.empty_since = None;

        let (content, version) = self.document.snapshot();
        let _ = reply.send((conn_id, content, version));

        self.broadcast_except(
            conn_id,
            ServerMessage::UserJoined {
                user_id: user_id.clone(),
                username: username.clone(),
            },
        )
        .await;

        self.connections.insert(
            conn_id,
            ConnectionState {
                user_id,
                username,
                reliable_tx,
                cursor_mailbox,
            },
        );
        debug!(doc_id = %self.document.id, conn_id, "connection joined");
    }

    async fn handle_disconnect(&mut self, conn_id: ConnId) {
        let Some(state) = self.connections.remove(&conn_id) else {
            return;
        };
        if self.connections.is_empty() {
            self.empty_since = Some(Instant::now());
        }
        debug!(doc_id = %self.document.id, conn_id, "connection left");
        self.broadcast_except(
            conn_id,
            ServerMessage::UserLeft {
                user_id: state.user_id,
                username: state.username,
            },
        )
        .await;
    }

    /// The commit pipeline, §4.4 steps 1-6.
    async fn handle_operation(&mut self, conn_id: ConnId, ops: Vec<Op>, client_version: u64) {
        let edit = match Edit::new(ops) {
            Ok(edit) => edit,
            Err(err) => {
                warn!(doc_id = %self.document.id, conn_id, %err, "rejected malformed edit");
                self.reply_error(conn_id, &SessionError::Edit(err)).await;
                return;
            }
        };

        let now = OffsetDateTime::now_utc();
        match self.document.rebase_and_commit(edit, client_version, now) {
            Ok((transformed, new_version)) => {
                let user_id = self
                    .connections
                    .get(&conn_id)
                    .map(|c| c.user_id.clone())
                    .unwrap_or_default();
                debug!(
                    doc_id = %self.document.id,
                    conn_id,
                    new_version,
                    "committed operation"
                );
                self.broadcast_except(
                    conn_id,
                    ServerMessage::OperationApplied {
                        operation: transformed.ops().to_vec(),
                        version: new_version,
                        user_id,
                    },
                )
                .await;
                self.reply(conn_id, ServerMessage::OperationConfirmed { version: new_version })
                    .await;
            }
            Err(err) => {
                warn!(doc_id = %self.document.id, conn_id, %err, "rejected operation");
                self.reply_error(conn_id, &err).await;
            }
        }
    }

    fn handle_cursor_update(&mut self, conn_id: ConnId, cursor: CursorPosition) {
        let Some(user_id) = self.connections.get(&conn_id).map(|c| c.user_id.clone()) else {
            return;
        };
        for (&other_id, other) in &self.connections {
            if other_id != conn_id {
                other.cursor_mailbox.post(user_id.clone(), cursor);
            }
        }
    }

    /// The privileged hard-reset path (§4.4, §9 open question): diff the replacement text
    /// against current content into a synthetic edit, commit it like any other edit so replay
    /// and monotonicity still hold, and resync every connected peer with a fresh
    /// `document_state` rather than an incremental `content_update` echo.
    async fn handle_content_update(&mut self, conn_id: ConnId, content: String) {
        let now = OffsetDateTime::now_utc();
        match self.document.hard_reset(content, now) {
            Ok(new_version) => {
                let (content, version) = self.document.snapshot();
                debug_assert_eq!(version, new_version);
                info!(doc_id = %self.document.id, conn_id, new_version, "hard content reset");
                self.broadcast_all(ServerMessage::DocumentState { content, version }).await;
            }
            Err(err) => {
                warn!(doc_id = %self.document.id, conn_id, %err, "content update failed");
                self.reply_error(conn_id, &err).await;
            }
        }
    }

    /// Rebroadcasts with the client-supplied `username` when present (§6, matching the
    /// original system's `main.py` chat relay, which forwards `message["username"]` verbatim),
    /// falling back to the connection's own joined username otherwise.
    async fn handle_chat_message(&mut self, conn_id: ConnId, message: String, username: Option<String>) {
        let Some(joined_username) = self.connections.get(&conn_id).map(|c| c.username.clone()) else {
            return;
        };
        let username = username.unwrap_or(joined_username);
        self.broadcast_except(conn_id, ServerMessage::ChatMessage { message, username })
            .await;
    }

    async fn reply(&mut self, conn_id: ConnId, msg: ServerMessage) {
        let Some(state) = self.connections.get(&conn_id) else {
            return;
        };
        if !send_reliable(&state.reliable_tx, msg).await {
            self.drop_connection(conn_id).await;
        }
    }

    async fn reply_error(&mut self, conn_id: ConnId, err: &SessionError) {
        self.reply(conn_id, ServerMessage::from_session_error(err)).await;
    }

    async fn broadcast_except(&mut self, except: ConnId, msg: ServerMessage) {
        let targets: Vec<ConnId> = self
            .connections
            .keys()
            .copied()
            .filter(|id| *id != except)
            .collect();
        self.broadcast_to(&targets, msg).await;
    }

    async fn broadcast_all(&mut self, msg: ServerMessage) {
        let targets: Vec<ConnId> = self.connections.keys().copied().collect();
        self.broadcast_to(&targets, msg).await;
    }

    async fn broadcast_to(&mut self, targets: &[ConnId], msg: ServerMessage) {
        let mut failed = Vec::new();
        for &conn_id in targets {
            let Some(state) = self.connections.get(&conn_id) else {
                continue;
            };
            if !send_reliable(&state.reliable_tx, msg.clone()).await {
                failed.push(conn_id);
            }
        }
        for conn_id in failed {
            self.drop_connection(conn_id).await;
        }
    }

    /// A peer whose reliable send timed out or whose channel is already closed (§7
    /// `TransportError`): drop it and, best-effort, tell the remaining peers it left.
    async fn drop_connection(&mut self, conn_id: ConnId) {
        if let Some(state) = self.connections.remove(&conn_id) {
            warn!(doc_id = %self.document.id, conn_id, "dropping slow or closed peer");
            if self.connections.is_empty() {
                self.empty_since = Some(Instant::now());
            }
            self.broadcast_except(
                conn_id,
                ServerMessage::UserLeft {
                    user_id: state.user_id,
                    username: state.username,
                },
            )
            .await;
        }
    }
}

/// Send with a bound, per §5's backpressure policy: block up to [`RELIABLE_SEND_TIMEOUT`],
/// then report failure so the caller can drop the peer rather than stalling every other
/// broadcast behind one slow reader.
async fn send_reliable(tx: &mpsc::Sender<ServerMessage>, msg: ServerMessage) -> bool {
    matches!(timeout(RELIABLE_SEND_TIMEOUT, tx.send(msg)).await, Ok(Ok(())))
}

/// A fresh bounded channel for a connection's reliable outgoing queue (§5).
pub fn reliable_channel() -> (mpsc::Sender<ServerMessage>, mpsc::Receiver<ServerMessage>) {
    mpsc::channel(RELIABLE_CHANNEL_CAPACITY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    async fn join_test_conn(
        handle: &DocumentActorHandle,
        user_id: &str,
    ) -> (ConnId, mpsc::Receiver<ServerMessage>, Arc<CursorMailbox>) {
        let (tx, rx) = reliable_channel();
        let mailbox = CursorMailbox::new();
        let (conn_id, _content, _version) = handle
            .join(user_id.to_string(), user_id.to_string(), tx, mailbox.clone())
            .await;
        (conn_id, rx, mailbox)
    }

    #[tokio::test]
    async fn single_insert_commits_and_echoes_to_self() {
        let handle = DocumentActorHandle::spawn("doc-1".into());
        let (conn_id, mut rx, _mailbox) = join_test_conn(&handle, "alice").await;

        let ops = vec![Op::Insert {
            value: "hello".into(),
        }];
        handle.operation(conn_id, ops, 0).await;

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg, ServerMessage::OperationConfirmed { version: 1 });

        let (snapshot, _stats) = handle.read_only().await;
        assert_eq!(snapshot.content, "hello");
        assert_eq!(snapshot.version, 1);
    }

    #[tokio::test]
    async fn broadcast_fidelity_every_peer_gets_one_operation_applied() {
        let handle = DocumentActorHandle::spawn("doc-1".into());
        let (author, mut author_rx, _m1) = join_test_conn(&handle, "alice").await;
        let (_peer, mut peer_rx, _m2) = join_test_conn(&handle, "bob").await;

        // bob's join broadcast a user_joined to alice; drain it before the operation.
        assert!(matches!(
            author_rx.recv().await.unwrap(),
            ServerMessage::UserJoined { .. }
        ));

        handle
            .operation(author, vec![Op::Insert { value: "hi".into() }], 0)
            .await;

        assert_eq!(
            author_rx.recv().await.unwrap(),
            ServerMessage::OperationConfirmed { version: 1 }
        );
        match peer_rx.recv().await.unwrap() {
            ServerMessage::OperationApplied { version, user_id, .. } => {
                assert_eq!(version, 1);
                assert_eq!(user_id, "alice");
            }
            other => panic!("expected OperationApplied, got {other:?}"),
        }
    }

    #[traced_test]
    #[tokio::test]
    async fn stale_version_rejected_with_error_envelope() {
        let handle = DocumentActorHandle::spawn("doc-1".into());
        let (conn_id, mut rx, _mailbox) = join_test_conn(&handle, "alice").await;

        handle
            .operation(conn_id, vec![Op::Insert { value: "x".into() }], 9)
            .await;

        match rx.recv().await.unwrap() {
            ServerMessage::Error { code, .. } => assert_eq!(code, "stale_or_future_version"),
            other => panic!("expected Error, got {other:?}"),
        }
        assert!(logs_contain("rejected operation"));
    }

    #[tokio::test]
    async fn disconnect_and_reconnect_resyncs_from_current_version() {
        let handle = DocumentActorHandle::spawn("doc-1".into());
        let (conn_id, _rx, _mailbox) = join_test_conn(&handle, "alice").await;
        handle
            .operation(conn_id, vec![Op::Insert { value: "abc".into() }], 0)
            .await;
        // Drain the confirmation so the channel doesn't matter for this assertion.
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.disconnect(conn_id).await;

        let (tx2, _rx2) = reliable_channel();
        let mailbox = CursorMailbox::new();
        let (_conn2, content, version) = handle.join("alice".into(), "alice".into(), tx2, mailbox).await;
        assert_eq!(content, "abc");
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn cursor_updates_coalesce_to_latest_per_user() {
        let handle = DocumentActorHandle::spawn("doc-1".into());
        let (author, _arx, _m1) = join_test_conn(&handle, "alice").await;
        let (_peer, _prx, peer_mailbox) = join_test_conn(&handle, "bob").await;

        handle
            .cursor_update(author, CursorPosition { line: 0, column: 1 })
            .await;
        handle
            .cursor_update(author, CursorPosition { line: 0, column: 2 })
            .await;
        // Give the actor a moment to process both before we drain the mailbox.
        tokio::time::sleep(Duration::from_millis(10)).await;

        let batch = peer_mailbox.recv_batch().await;
        assert_eq!(batch, vec![("alice".to_string(), CursorPosition { line: 0, column: 2 })]);
    }

    #[tokio::test]
    async fn chat_message_relays_client_supplied_username_verbatim() {
        let handle = DocumentActorHandle::spawn("doc-1".into());
        let (author, mut author_rx, _m1) = join_test_conn(&handle, "alice").await;
        let (_peer, mut peer_rx, _m2) = join_test_conn(&handle, "bob").await;
        assert!(matches!(
            author_rx.recv().await.unwrap(),
            ServerMessage::UserJoined { .. }
        ));

        handle
            .chat_message(author, "hi all".into(), Some("Alice The Great".into()))
            .await;

        match peer_rx.recv().await.unwrap() {
            ServerMessage::ChatMessage { message, username } => {
                assert_eq!(message, "hi all");
                assert_eq!(username, "Alice The Great");
            }
            other => panic!("expected ChatMessage, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn chat_message_falls_back_to_joined_username_when_absent() {
        let handle = DocumentActorHandle::spawn("doc-1".into());
        let (author, mut author_rx, _m1) = join_test_conn(&handle, "alice").await;
        let (_peer, mut peer_rx, _m2) = join_test_conn(&handle, "bob").await;
        assert!(matches!(
            author_rx.recv().await.unwrap(),
            ServerMessage::UserJoined { .. }
        ));

        handle.chat_message(author, "hi all".into(), None).await;

        match peer_rx.recv().await.unwrap() {
            ServerMessage::ChatMessage { username, .. } => assert_eq!(username, "alice"),
            other => panic!("expected ChatMessage, got {other:?}"),
        }
    }
}
