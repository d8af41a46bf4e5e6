// SPDX-License-Identifier: AGPL-3.0-or-later

//! Typed error hierarchy for the operation model, transform engine, and session layer.

use thiserror::Error;

/// Errors raised while constructing, normalizing, or applying a single edit.
///
/// These are pure: raised by `ot::op` and `ot::transform`, never by I/O.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EditError {
    #[error("malformed edit: {reason}")]
    MalformedEdit { reason: String },

    #[error("edit consumed past end of text (position {position}, text length {text_len})")]
    EditOutOfRange { position: usize, text_len: usize },

    #[error("edits diverge: base length {a_base} does not match {b_base}")]
    EditDivergence { a_base: usize, b_base: usize },
}

/// Errors raised by the document store and session coordinator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Edit(#[from] EditError),

    #[error("client version {client_version} outside valid range [0, {current_version}]")]
    StaleOrFutureVersion {
        client_version: u64,
        current_version: u64,
    },

    #[error("unknown document {doc_id}")]
    UnknownDocument { doc_id: String },

    #[error("failed to deliver message to peer {user_id}")]
    TransportError { user_id: String },
}

impl SessionError {
    /// The stable, wire-facing error code carried in an `error` envelope (see protocol.rs).
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::Edit(EditError::MalformedEdit { .. }) => "malformed_edit",
            SessionError::Edit(EditError::EditOutOfRange { .. }) => "edit_out_of_range",
            SessionError::Edit(EditError::EditDivergence { .. }) => "edit_divergence",
            SessionError::StaleOrFutureVersion { .. } => "stale_or_future_version",
            SessionError::UnknownDocument { .. } => "unknown_document",
            SessionError::TransportError { .. } => "transport_error",
        }
    }
}
