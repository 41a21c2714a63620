//! Compact text frames carried in the BLE local-name field.
//!
//! Two frames exist on the air:
//!
//! - broadcast: `AB:<identity>:Z`
//! - acknowledgment: `AC:<identity1>,<identity2>,...:<subject>:Z`
//!
//! The local name has a hard byte budget ([`MAX_LOCAL_NAME_LEN`]). Encoding
//! never produces a frame over budget and never lets a token carry a framing
//! character, so a decoder can always split on `:` and `,`.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use utoipa::ToSchema;

use crate::types::{Identity, SubjectTag};

/// Maximum number of characters a frame may occupy in the local-name field.
pub const MAX_LOCAL_NAME_LEN: usize = 26;

/// Default number of identities per acknowledgment frame.
pub const DEFAULT_MAX_BATCH: usize = 4;

const BROADCAST_TAG: &str = "AB";
const ACK_TAG: &str = "AC";
const TERMINATOR: &str = "Z";
const FIELD_SEPARATOR: char = ':';
const LIST_SEPARATOR: char = ',';

/// `AB:` + `:Z`
const BROADCAST_OVERHEAD: usize = 5;
/// `AC:` + `:` + `:Z`
const ACK_OVERHEAD: usize = 6;

/// Longest identity a broadcast frame can carry.
pub const MAX_IDENTITY_LEN: usize = MAX_LOCAL_NAME_LEN - BROADCAST_OVERHEAD;

/// Longest subject an acknowledgment frame can carry while leaving room for
/// at least one single-character identity.
pub const MAX_SUBJECT_LEN: usize = MAX_LOCAL_NAME_LEN - ACK_OVERHEAD - 1;

/// Errors produced while encoding a frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodingError {
    /// Nothing encodable was left after sanitization.
    #[error("{field} is empty after removing characters that cannot be carried in a frame")]
    EmptyToken {
        /// Which token was empty (`identity` or `subject`).
        field: &'static str,
    },

    /// The frame would not fit in the local-name budget.
    #[error("frame would be {length} characters, the local name holds at most {max}")]
    FrameTooLong {
        /// Length of the rejected frame.
        length: usize,
        /// The budget.
        max: usize,
    },
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BeaconFrame {
    /// A broadcaster announcing its identity.
    Broadcast {
        /// The announced identity.
        identity: Identity,
    },
    /// A collector acknowledging a batch of identities.
    Ack {
        /// Identities acknowledged by this frame, in frame order.
        identities: Vec<Identity>,
        /// Session the identities were counted for.
        subject: SubjectTag,
    },
}

impl BeaconFrame {
    /// Whether this is an acknowledgment that names `identity`.
    #[must_use]
    pub fn acknowledges(&self, identity: &Identity) -> bool {
        match self {
            Self::Ack { identities, .. } => identities.contains(identity),
            Self::Broadcast { .. } => false,
        }
    }
}

/// How pending identities are split into acknowledgment frames.
///
/// Every policy also respects [`MAX_LOCAL_NAME_LEN`]; a batch closes early if
/// the next identity would not fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BatchPolicy {
    /// At most `max_identities` per frame.
    Fixed {
        /// Upper bound on identities in one frame.
        max_identities: usize,
    },
    /// As many identities as the length budget allows.
    Budget,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self::Fixed {
            max_identities: DEFAULT_MAX_BATCH,
        }
    }
}

impl BatchPolicy {
    /// Upper bound on identities per frame under this policy.
    #[must_use]
    pub const fn max_identities(&self) -> usize {
        match self {
            Self::Fixed { max_identities } => *max_identities,
            Self::Budget => usize::MAX,
        }
    }
}

/// One acknowledgment frame and the identities it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckBatch {
    /// Identities covered by this frame, as they were discovered.
    pub identities: Vec<Identity>,
    /// The encoded local name.
    pub name: String,
}

/// The frames for a set of pending identities, plus the identities that no
/// frame for this subject can carry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AckPlan {
    /// Frames in send order.
    pub batches: Vec<AckBatch>,
    /// Identities too long to sit beside the subject. Never truncated: a
    /// shortened token would acknowledge some other identity.
    pub unfit: Vec<Identity>,
}

impl AckPlan {
    /// Whether there is nothing to send.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

/// Whether `c` may appear inside an identity or subject token.
#[must_use]
pub const fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

/// Drop every character that cannot be carried inside a token.
#[must_use]
pub fn sanitize_token(raw: &str) -> String {
    raw.chars().filter(|c| is_token_char(*c)).collect()
}

fn is_valid_token(token: &str) -> bool {
    !token.is_empty() && token.chars().all(is_token_char)
}

/// Encode the broadcast frame for `identity`.
///
/// # Errors
///
/// [`EncodingError::EmptyToken`] if nothing encodable remains after
/// sanitization, [`EncodingError::FrameTooLong`] if the identity exceeds
/// [`MAX_IDENTITY_LEN`].
pub fn encode_broadcast(identity: &Identity) -> Result<String, EncodingError> {
    let token = sanitize_token(identity.as_str());
    if token.is_empty() {
        return Err(EncodingError::EmptyToken { field: "identity" });
    }

    let name = format!("{BROADCAST_TAG}{FIELD_SEPARATOR}{token}{FIELD_SEPARATOR}{TERMINATOR}");
    if name.len() > MAX_LOCAL_NAME_LEN {
        return Err(EncodingError::FrameTooLong {
            length: name.len(),
            max: MAX_LOCAL_NAME_LEN,
        });
    }
    Ok(name)
}

/// Sanitize and truncate a subject so that it fits an acknowledgment frame.
///
/// # Errors
///
/// [`EncodingError::EmptyToken`] if nothing encodable remains.
pub fn subject_token(subject: &SubjectTag) -> Result<String, EncodingError> {
    let mut token = sanitize_token(subject.as_str());
    if token.is_empty() {
        return Err(EncodingError::EmptyToken { field: "subject" });
    }
    if token.len() > MAX_SUBJECT_LEN {
        warn!(subject = %subject, max = MAX_SUBJECT_LEN, "Truncating subject to fit frame");
        token.truncate(MAX_SUBJECT_LEN);
    }
    Ok(token)
}

/// Split `identities` into acknowledgment frames for `subject`.
///
/// Frames are filled in order. A frame closes when it holds
/// `policy.max_identities()` identities or when the next identity would push
/// it over [`MAX_LOCAL_NAME_LEN`]. Duplicate identities are encoded once.
/// Identities longer than [`ack_capacity`] land in [`AckPlan::unfit`];
/// identities with no encodable characters are skipped.
///
/// # Errors
///
/// [`EncodingError::EmptyToken`] if the subject has no encodable characters.
pub fn encode_ack(
    identities: &[Identity],
    subject: &SubjectTag,
    policy: BatchPolicy,
) -> Result<AckPlan, EncodingError> {
    let subject = subject_token(subject)?;
    let capacity = MAX_LOCAL_NAME_LEN - ACK_OVERHEAD - subject.len();
    let max_per_frame = policy.max_identities().max(1);

    let mut batches = Vec::new();
    let mut unfit = Vec::new();
    let mut seen = HashSet::new();
    let mut members: Vec<Identity> = Vec::new();
    let mut tokens: Vec<String> = Vec::new();
    let mut used = 0usize;

    for identity in identities {
        if !seen.insert(identity) {
            continue;
        }

        let token = sanitize_token(identity.as_str());
        if token.is_empty() {
            warn!(identity = %identity, "Skipping identity with no encodable characters");
            continue;
        }
        if token.len() > capacity {
            warn!(identity = %identity, capacity, "Identity does not fit an acknowledgment frame");
            unfit.push(identity.clone());
            continue;
        }

        let needed = if tokens.is_empty() {
            token.len()
        } else {
            token.len() + 1
        };
        if !tokens.is_empty() && (tokens.len() == max_per_frame || used + needed > capacity) {
            batches.push(close_batch(&mut members, &mut tokens, &subject));
            used = 0;
        }

        used += if tokens.is_empty() {
            token.len()
        } else {
            token.len() + 1
        };
        members.push(identity.clone());
        tokens.push(token);
    }

    if !tokens.is_empty() {
        batches.push(close_batch(&mut members, &mut tokens, &subject));
    }

    Ok(AckPlan { batches, unfit })
}

/// Longest identity an acknowledgment frame for `subject` can carry.
///
/// # Errors
///
/// [`EncodingError::EmptyToken`] if the subject has no encodable characters.
pub fn ack_capacity(subject: &SubjectTag) -> Result<usize, EncodingError> {
    Ok(MAX_LOCAL_NAME_LEN - ACK_OVERHEAD - subject_token(subject)?.len())
}

fn close_batch(members: &mut Vec<Identity>, tokens: &mut Vec<String>, subject: &str) -> AckBatch {
    let list = tokens.join(&LIST_SEPARATOR.to_string());
    tokens.clear();
    AckBatch {
        identities: std::mem::take(members),
        name: format!(
            "{ACK_TAG}{FIELD_SEPARATOR}{list}{FIELD_SEPARATOR}{subject}{FIELD_SEPARATOR}{TERMINATOR}"
        ),
    }
}

/// Decode a local name.
///
/// Returns `None` for anything that is not a well-formed rollcall frame:
/// foreign device names, wrong field counts, empty or invalid tokens. Scan
/// traffic is full of other devices, so malformed input is never an error.
#[must_use]
pub fn decode(raw_name: &str) -> Option<BeaconFrame> {
    let fields: Vec<&str> = raw_name.split(FIELD_SEPARATOR).collect();

    match fields.as_slice() {
        [BROADCAST_TAG, identity, TERMINATOR] if is_valid_token(identity) => {
            Some(BeaconFrame::Broadcast {
                identity: Identity::new(*identity),
            })
        }
        [ACK_TAG, list, subject, TERMINATOR] if is_valid_token(subject) => {
            let identities = list
                .split(LIST_SEPARATOR)
                .map(|token| is_valid_token(token).then(|| Identity::new(token)))
                .collect::<Option<Vec<_>>>()?;
            Some(BeaconFrame::Ack {
                identities,
                subject: SubjectTag::new(*subject),
            })
        }
        _ => None,
    }
}
