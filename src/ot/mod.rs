// SPDX-License-Identifier: AGPL-3.0-or-later

//! Operation model and transform engine: components A and B.

mod op;
mod transform;

pub use op::{Edit, Op};
pub use transform::{apply, compose, invert, rebase, transform};
