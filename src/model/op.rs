use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ItemId, item_id};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OpKind::Create => "create",
            OpKind::Update => "update",
            OpKind::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// A recorded mutation intent the remote service has not durably applied.
/// Immutable once appended to a pending log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingOp {
    pub kind: OpKind,

    /// The full item for a create, the changed fields plus id for an update,
    /// an id-bearing object for a delete.
    pub item: Value,

    /// Unix milliseconds at append time. Strictly increasing within one log,
    /// which makes synthetic ids derived from it unique.
    pub recorded_at: i64,
}

impl PendingOp {
    pub fn target_id(&self) -> Option<ItemId> {
        item_id(&self.item)
    }
}
