//! Pure overlay merge: apply a pending-operation log onto a fresh server
//! snapshot and produce the view presentation code consumes.

use serde_json::Value;

use crate::model::{ID_KEY, ItemId, OpKind, PROVISIONAL_KEY, PendingOp, item_id};

struct Entry {
    /// Canonical id key. Snapshot items without a usable id keep `None`: they
    /// appear in the output unchanged but cannot be targeted by operations.
    key: Option<String>,
    item: Value,
}

/// Applies `log` in append order onto `snapshot` and returns the merged view.
///
/// Deterministic for a fixed input pair and never fails: operations that do
/// not apply cleanly (create on an existing id, update or delete on a missing
/// id) degrade to no-ops instead of errors. Snapshot order is preserved;
/// created items are appended in application order.
pub fn merge(snapshot: &[Value], log: &[PendingOp]) -> Vec<Value> {
    let mut entries: Vec<Entry> = snapshot
        .iter()
        .map(|item| Entry {
            key: item_id(item).map(|id| id.0),
            item: item.clone(),
        })
        .collect();

    for op in log {
        match op.kind {
            OpKind::Create => apply_create(&mut entries, op),
            OpKind::Update => apply_update(&mut entries, op),
            OpKind::Delete => apply_delete(&mut entries, op),
        }
    }

    entries.into_iter().map(|e| e.item).collect()
}

fn position(entries: &[Entry], key: &str) -> Option<usize> {
    entries.iter().position(|e| e.key.as_deref() == Some(key))
}

fn apply_create(entries: &mut Vec<Entry>, op: &PendingOp) {
    match item_id(&op.item) {
        Some(id) => {
            // First create wins; an existing entry is never overwritten.
            if position(entries, id.as_str()).is_some() {
                tracing::debug!(id = %id, "create for existing id ignored");
                return;
            }
            entries.push(Entry {
                key: Some(id.0),
                item: op.item.clone(),
            });
        }
        None => {
            let id = ItemId::synthetic(op.recorded_at);
            let mut item = op.item.clone();
            if let Some(map) = item.as_object_mut() {
                map.insert(ID_KEY.to_string(), Value::String(id.0.clone()));
                map.insert(PROVISIONAL_KEY.to_string(), Value::Bool(true));
            }
            entries.push(Entry {
                key: Some(id.0),
                item,
            });
        }
    }
}

fn apply_update(entries: &mut [Entry], op: &PendingOp) {
    let Some(id) = item_id(&op.item) else {
        tracing::debug!("update without id dropped");
        return;
    };
    let Some(pos) = position(entries, id.as_str()) else {
        // Dropped, not upserted: the next list simply will not reflect it.
        tracing::debug!(id = %id, "update for missing id dropped");
        return;
    };
    let Some(fields) = op.item.as_object() else {
        return;
    };
    let Some(target) = entries[pos].item.as_object_mut() else {
        return;
    };
    // Shallow merge, operation fields win per field.
    for (k, v) in fields {
        target.insert(k.clone(), v.clone());
    }
}

fn apply_delete(entries: &mut Vec<Entry>, op: &PendingOp) {
    let Some(id) = item_id(&op.item) else {
        return;
    };
    if let Some(pos) = position(entries, id.as_str()) {
        entries.remove(pos);
    }
}
