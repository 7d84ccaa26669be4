use serde::{Deserialize, Deserializer, Serialize, de};
use serde_json::Value;

/// Prefix of client-generated identifiers. Server-issued ids never carry it,
/// so synthetic ids cannot collide with acknowledged items.
pub const SYNTHETIC_PREFIX: &str = "t_";

/// Identifier of an item within a resource collection.
///
/// The service hands out ids as JSON strings or numbers; both are
/// canonicalized to their string form so `5` and `"5"` address the same item.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct ItemId(pub String);

impl ItemId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Id for a locally created item, derived from the unix-millisecond
    /// timestamp the operation was recorded at.
    pub fn synthetic(recorded_at: i64) -> Self {
        ItemId(format!("{SYNTHETIC_PREFIX}{recorded_at}"))
    }

    pub fn is_synthetic(&self) -> bool {
        self.0.starts_with(SYNTHETIC_PREFIX)
    }

    /// Canonical id of a JSON value. Anything other than a non-empty string
    /// or a number has no usable id.
    pub fn from_value(v: &Value) -> Option<Self> {
        match v {
            Value::String(s) if !s.is_empty() => Some(ItemId(s.clone())),
            Value::Number(n) => Some(ItemId(n.to_string())),
            _ => None,
        }
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ItemId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = Value::deserialize(deserializer)?;
        ItemId::from_value(&v)
            .ok_or_else(|| de::Error::custom("expected a string or numeric id"))
    }
}
