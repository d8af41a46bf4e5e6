// SPDX-License-Identifier: AGPL-3.0-or-later

//! The primitive operation and the normalized edit built out of them.

use serde::{Deserialize, Serialize};

use crate::error::EditError;

/// A single primitive, counted in `char`s rather than bytes.
///
/// Serializes directly to the wire shape `{"type": "retain"|"insert"|"delete", length?, value?}`
/// — there is deliberately no separate wire type, since the tagged representation already
/// matches the external protocol exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Op {
    Retain { length: usize },
    Insert { value: String },
    Delete { length: usize },
}

impl Op {
    /// Discriminant used to detect "same kind" for merge-on-construction (invariant 1).
    fn kind(&self) -> u8 {
        match self {
            Op::Retain { .. } => 0,
            Op::Insert { .. } => 1,
            Op::Delete { .. } => 2,
        }
    }
}

/// An ordered, normalized sequence of [`Op`]s, together with the base/target lengths it was
/// authored against.
///
/// `base_len`/`target_len` are captured once, from the *unnormalized* op list, before a
/// trailing retain is ever dropped (invariant 4). This is what lets normalization actually
/// drop trailing retains — as the spec requires, since they are equivalent to omission —
/// without losing the information transform/compose need to detect a genuine base-length
/// mismatch (`EditDivergence`) versus an ordinary implicit tail. Mirrors how the reference
/// `operational-transform` crate caches `base_len`/`target_len` on `OperationSeq` rather than
/// reconstructing them from the op list.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Edit {
    ops: Vec<Op>,
    base_len: usize,
    target_len: usize,
}

impl Edit {
    pub fn empty() -> Self {
        Edit {
            ops: Vec::new(),
            base_len: 0,
            target_len: 0,
        }
    }

    /// Build a normalized edit from raw ops, merging adjacent same-kind ops and dropping a
    /// trailing retain. `base_len`/`target_len` are computed from `ops` as given, before that
    /// trailing-retain trim happens.
    ///
    /// A `retain`/`delete` of length zero, or an `insert` of an empty string, is rejected
    /// outright rather than silently dropped: §3 defines `n ≥ 1`/`|s| ≥ 1` as part of what a
    /// valid primitive op *is*, distinct from invariant 4's allowance for omitting a *trailing*
    /// retain that runs to end-of-document.
    pub fn new(ops: Vec<Op>) -> Result<Self, EditError> {
        let mut base_len = 0usize;
        let mut target_len = 0usize;
        for op in &ops {
            match op {
                Op::Insert { value } if value.is_empty() => {
                    return Err(EditError::MalformedEdit {
                        reason: "insert with empty value".into(),
                    })
                }
                Op::Retain { length } if *length == 0 => {
                    return Err(EditError::MalformedEdit {
                        reason: "retain with zero length".into(),
                    })
                }
                Op::Delete { length } if *length == 0 => {
                    return Err(EditError::MalformedEdit {
                        reason: "delete with zero length".into(),
                    })
                }
                Op::Retain { length } => {
                    base_len += length;
                    target_len += length;
                }
                Op::Delete { length } => base_len += length,
                Op::Insert { value } => target_len += value.chars().count(),
            }
        }

        let mut normalized: Vec<Op> = Vec::with_capacity(ops.len());
        for op in ops {
            match normalized.last_mut() {
                Some(prev) if prev.kind() == op.kind() => merge_into(prev, op),
                _ => normalized.push(op),
            }
        }
        if matches!(normalized.last(), Some(Op::Retain { .. })) {
            normalized.pop();
        }

        Ok(Edit {
            ops: normalized,
            base_len,
            target_len,
        })
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn is_identity(&self) -> bool {
        self.ops.is_empty()
    }

    /// Length of the text this edit must be applied against.
    pub fn base_len(&self) -> usize {
        self.base_len
    }

    /// Length of the text produced by applying this edit.
    pub fn target_len(&self) -> usize {
        self.target_len
    }

    /// Construct the minimal prefix-only diff between two strings (§4.1): common prefix,
    /// then a delete of the old suffix, then an insert of the new suffix.
    ///
    /// This never optimizes for a common suffix; it is adequate because clients send small
    /// incremental edits, and callers needing a tighter diff may build one with the same
    /// primitives.
    pub fn diff(old: &str, new: &str) -> Self {
        let old_chars: Vec<char> = old.chars().collect();
        let new_chars: Vec<char> = new.chars().collect();
        let prefix_len = old_chars
            .iter()
            .zip(new_chars.iter())
            .take_while(|(a, b)| a == b)
            .count();

        let mut ops = Vec::with_capacity(3);
        if prefix_len > 0 {
            ops.push(Op::Retain { length: prefix_len });
        }
        if old_chars.len() > prefix_len {
            ops.push(Op::Delete {
                length: old_chars.len() - prefix_len,
            });
        }
        if new_chars.len() > prefix_len {
            let value: String = new_chars[prefix_len..].iter().collect();
            ops.push(Op::Insert { value });
        }
        // All lengths above are non-negative by construction; this cannot fail.
        Edit::new(ops).expect("diff always produces a well-formed edit")
    }
}

fn merge_into(prev: &mut Op, next: Op) {
    match (prev, next) {
        (Op::Retain { length: a }, Op::Retain { length: b }) => *a += b,
        (Op::Delete { length: a }, Op::Delete { length: b }) => *a += b,
        (Op::Insert { value: a }, Op::Insert { value: b }) => a.push_str(&b),
        _ => unreachable!("merge_into called on ops of differing kind"),
    }
}
