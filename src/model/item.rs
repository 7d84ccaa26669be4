use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ItemId;

/// Key holding an item's identifier.
pub const ID_KEY: &str = "id";

/// Key marking a locally created item the server has not acknowledged.
/// Absent on server-issued items and on provisional items it is never false.
pub const PROVISIONAL_KEY: &str = "provisional";

fn is_false(v: &bool) -> bool {
    !*v
}

/// Typed view of a merged item. `body` carries the resource-specific fields;
/// id and the provisional marker are lifted out of the JSON object.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Item<T> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ItemId>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub provisional: bool,

    #[serde(flatten)]
    pub body: T,
}

/// Canonical id of a JSON item, if it carries one.
pub fn item_id(item: &Value) -> Option<ItemId> {
    item.get(ID_KEY).and_then(ItemId::from_value)
}
