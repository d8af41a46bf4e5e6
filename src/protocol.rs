// SPDX-License-Identifier: AGPL-3.0-or-later

//! Typed wire envelopes for the per-connection JSON transport (§6, component E).
//!
//! Every message is a JSON object tagged by a `type` field. Edits cross the wire as a plain
//! array of [`Op`]; the connection layer is responsible for turning that into a normalized
//! [`Edit`] (and back) via `ot::Edit::new`/`Edit::ops`.

use serde::{Deserialize, Serialize};

use crate::ot::Op;

/// `{line, column}` cursor position, opaque to the transform engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorPosition {
    pub line: u64,
    pub column: u64,
}

/// Messages a client sends to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Must be the first message on a connection; selects which document it is bound to for
    /// the connection's lifetime. `user_id`/`username` default to server-generated values.
    Join {
        doc_id: String,
        #[serde(default)]
        user_id: Option<String>,
        #[serde(default)]
        username: Option<String>,
    },
    Operation {
        operation: Vec<Op>,
        version: u64,
    },
    CursorUpdate {
        cursor_position: CursorPosition,
    },
    ContentUpdate {
        content: String,
    },
    ChatMessage {
        message: String,
        #[serde(default)]
        username: Option<String>,
    },
}

/// Messages the server sends to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    DocumentState {
        content: String,
        version: u64,
    },
    OperationApplied {
        operation: Vec<Op>,
        version: u64,
        user_id: String,
    },
    OperationConfirmed {
        version: u64,
    },
    UserJoined {
        user_id: String,
        username: String,
    },
    UserLeft {
        user_id: String,
        username: String,
    },
    CursorUpdate {
        user_id: String,
        cursor_position: CursorPosition,
    },
    ContentUpdate {
        content: String,
        version: u64,
        user_id: String,
    },
    ChatMessage {
        message: String,
        username: String,
    },
    Error {
        message: String,
        code: String,
    },
}

impl ServerMessage {
    /// Build the `error` envelope for a [`crate::error::SessionError`] (§7): the human-readable
    /// message plus the stable wire code clients switch on.
    pub fn from_session_error(err: &crate::error::SessionError) -> Self {
        ServerMessage::Error {
            message: err.to_string(),
            code: err.code().to_string(),
        }
    }
}
