// SPDX-License-Identifier: AGPL-3.0-or-later

//! Server-side core of a real-time collaborative text editor: an operational-transform engine
//! (component A/B, [`ot`]), per-document state with a versioned history (component C,
//! [`document`]), a per-document session actor that linearizes commits and fans out broadcasts
//! (component D, [`session`]), the wire envelopes that actor speaks (component E,
//! [`protocol`]), and the process-wide document table and transport that wire it all together.

pub mod cli;
pub mod document;
pub mod error;
pub mod logging;
pub mod ot;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod transport;
