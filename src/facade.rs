//! Resource facade: fresh snapshot + pending log -> merged view, with
//! optimistic local recording when a mutation cannot reach the service.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::merge::merge;
use crate::model::{ID_KEY, Item, ItemId, OpKind, PendingOp, item_id};
use crate::remote::{Payload, RemoteClient};
use crate::store::LocalStore;

/// Outcome of a mutation attempt.
#[derive(Clone, Debug)]
pub enum Mutation {
    /// The remote service accepted the mutation; carries its response item
    /// when one was returned.
    Applied(Option<Value>),
    /// The mutation was recorded locally and will be overlaid on every
    /// subsequent read until the log is cleared.
    Recorded(PendingOp),
}

impl Mutation {
    pub fn is_recorded(&self) -> bool {
        matches!(self, Mutation::Recorded(_))
    }
}

pub struct Resources {
    client: RemoteClient,
    store: LocalStore,
}

impl Resources {
    pub fn new(client: RemoteClient, store: LocalStore) -> Self {
        Self { client, store }
    }

    /// Fresh snapshot fetch, overlaid with the resource's pending log. The
    /// snapshot itself is never cached; fetch failures propagate.
    pub fn list(&self, resource: &str) -> Result<Vec<Value>> {
        let snapshot = self.fetch_snapshot(resource)?;
        let log = self.store.pending(resource)?;
        Ok(merge(&snapshot, &log))
    }

    /// Typed view of [`list`](Self::list).
    pub fn list_as<T: DeserializeOwned>(&self, resource: &str) -> Result<Vec<Item<T>>> {
        self.list(resource)?
            .into_iter()
            .map(|v| serde_json::from_value(v).context("decode merged item"))
            .collect()
    }

    fn fetch_snapshot(&self, resource: &str) -> Result<Vec<Value>> {
        let payload = self
            .client
            .get(&format!("/{resource}"))
            .with_context(|| format!("list {resource}"))?;

        // The service returns either a bare array or `{"items": [...]}`.
        match payload {
            Payload::Json(Value::Array(items)) => Ok(items),
            Payload::Json(Value::Object(mut map)) => match map.remove("items") {
                Some(Value::Array(items)) => Ok(items),
                _ => anyhow::bail!("unexpected snapshot shape for {resource}"),
            },
            Payload::NoContent => Ok(Vec::new()),
            _ => anyhow::bail!("unexpected snapshot shape for {resource}"),
        }
    }

    pub fn create(&self, resource: &str, item: Value) -> Result<Mutation> {
        self.mutate(resource, OpKind::Create, item)
    }

    /// Shallow field update; `patch` carries only the changed fields.
    pub fn update(&self, resource: &str, id: &ItemId, patch: Value) -> Result<Mutation> {
        self.mutate(resource, OpKind::Update, with_id(patch, id))
    }

    pub fn delete(&self, resource: &str, id: &ItemId) -> Result<Mutation> {
        let item = with_id(Value::Object(serde_json::Map::new()), id);
        self.mutate(resource, OpKind::Delete, item)
    }

    fn mutate(&self, resource: &str, kind: OpKind, item: Value) -> Result<Mutation> {
        if self.client.remote().record_only.contains(resource) {
            tracing::debug!(resource, %kind, "record-only resource, skipping remote attempt");
            let op = self.store.append_pending(resource, kind, item)?;
            return Ok(Mutation::Recorded(op));
        }

        let attempt = match kind {
            OpKind::Create => self.client.post_json(&format!("/{resource}"), item.clone()),
            OpKind::Update => {
                let id = item_id(&item).context("update requires an id")?;
                self.client
                    .put_json(&format!("/{resource}/{id}"), item.clone())
            }
            OpKind::Delete => {
                let id = item_id(&item).context("delete requires an id")?;
                self.client.delete(&format!("/{resource}/{id}"))
            }
        };

        match attempt {
            Ok(payload) => Ok(Mutation::Applied(payload.into_json())),
            Err(err) if err.is_connectivity() => {
                tracing::warn!(
                    resource,
                    %kind,
                    error = %err,
                    "remote unreachable, recording pending operation"
                );
                let op = self.store.append_pending(resource, kind, item)?;
                Ok(Mutation::Recorded(op))
            }
            Err(err) => Err(err).with_context(|| format!("{kind} {resource}")),
        }
    }

    pub fn pending(&self, resource: &str) -> Result<Vec<PendingOp>> {
        self.store.pending(resource)
    }

    pub fn clear_pending(&self, resource: &str) -> Result<()> {
        self.store.clear_pending(resource)
    }
}

fn with_id(mut item: Value, id: &ItemId) -> Value {
    if let Some(map) = item.as_object_mut() {
        map.insert(ID_KEY.to_string(), Value::String(id.0.clone()));
    }
    item
}
