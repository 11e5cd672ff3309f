//! The actions the journal plans onto the durable queue.
//!
//! An action is the unit of crash-safe work: the flush path persists them,
//! the upload coordinator consumes them, and uncompleted actions are
//! re-delivered after a restart. Per file the queue always carries
//! `Start, Conj…, [Upload…], End`, which the enqueue order in the flush path
//! guarantees.
use crate::position::Position;
use crate::queue::ActionQueue;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// The queue topic every journal plans its actions on.
pub(crate) const TOPIC: &str = "actions";

/// Version tag prepended to every serialized action. Bump when the payload
/// layout changes; unknown versions decode as corrupt.
const ACTION_VERSION: u8 = 1;

/// One unit of planned work, serialized onto the durable queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum Action {
    /// Initialize the multipart upload for the file containing the position.
    Start(Position),
    /// Append a chunk's bytes to the part at the position.
    Conj {
        position: Position,
        entry_count: u64,
        bytes: Vec<u8>,
    },
    /// Upload the part accumulated at the position.
    Upload(Position),
    /// Finalize the multipart upload for the file containing the position.
    End(Position),
    /// Enqueue an `End` for every live upload.
    Flush,
    /// Sentinel for work that should be acknowledged and dropped.
    Skip,
}

impl Action {
    /// Serialize with the leading version tag.
    pub(crate) fn encode(&self) -> Bytes {
        let mut buf = vec![ACTION_VERSION];
        bincode::serialize_into(&mut buf, self).expect("action serialization is infallible");
        buf.into()
    }

    /// Deserialize a tagged payload.
    pub(crate) fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        match payload.split_first() {
            Some((&ACTION_VERSION, body)) => {
                bincode::deserialize(body).map_err(|e| DecodeError(e.to_string()))
            }
            Some((version, _)) => Err(DecodeError(format!("unknown action version {version}"))),
            None => Err(DecodeError("empty payload".to_string())),
        }
    }

    /// The position this action applies to, if it carries one.
    pub(crate) fn position(&self) -> Option<&Position> {
        match self {
            Self::Start(pos) | Self::Upload(pos) | Self::End(pos) => Some(pos),
            Self::Conj { position, .. } => Some(position),
            Self::Flush | Self::Skip => None,
        }
    }
}

/// The durable payload could not be turned back into an [`Action`].
#[derive(Debug, thiserror::Error)]
#[error("corrupt action payload: {0}")]
pub(crate) struct DecodeError(String);

/// Persist an action, retrying until the durable queue accepts it.
///
/// Planned work cannot be dropped on a put failure without breaking the
/// per-file ordering of everything enqueued after it.
pub(crate) async fn put_with_retry(queue: &dyn ActionQueue, action: &Action, delay: Duration) {
    let payload = action.encode();
    loop {
        match queue.put(TOPIC, payload.clone()).await {
            Ok(()) => return,
            Err(e) => {
                warn!(error = %e, "durable queue put failed; retrying");
                tokio::time::sleep(delay).await;
            }
        }
    }
}
