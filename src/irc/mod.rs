//! IRC collaborator surface.
//!
//! The engine does not implement IRC. It consumes a narrow outbound surface
//! ([`IrcLink`]) and an inbound event feed (`InboundSender`), and ships one
//! adapter over the `irc` crate for callers that want batteries included.

pub mod connection;
pub mod link;

pub use connection::{connect, IrcSession};
pub use link::IrcLink;
