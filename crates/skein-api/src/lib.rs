pub mod stream;
pub mod types;
pub mod wire;

pub use stream::{Notification, NotificationKind, StreamEvent, StreamEventPayload};
pub use types::*;
pub use wire::*;
