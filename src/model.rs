mod config;
mod ids;
mod item;
mod op;

pub use self::config::{ClientConfig, ClientState, RemoteConfig, Session};
pub use self::ids::{ItemId, SYNTHETIC_PREFIX};
pub use self::item::{ID_KEY, Item, PROVISIONAL_KEY, item_id};
pub use self::op::{OpKind, PendingOp};
