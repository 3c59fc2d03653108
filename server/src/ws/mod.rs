//! Real-time messaging: per-socket sessions feeding one hub event loop.

pub mod actor;
pub mod dispatch;
pub mod handler;
pub mod hub;
pub mod protocol;
pub mod registry;

pub use dispatch::{DispatchError, Dispatcher};
pub use hub::{ConnectionHub, HubError, HubHandle};
pub use protocol::{ClientIntent, ServerEvent, UserId};
