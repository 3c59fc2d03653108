//! REST surface for direct messages and presence.

pub mod conversations;
pub mod messages;
pub mod presence;
