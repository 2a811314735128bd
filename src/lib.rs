//! crabget: an XDCC/DCC file retrieval engine.
//!
//! Point it at a bot, name some packs, and it handles the rest: the
//! `XDCC SEND` request, the CTCP/DCC negotiation (active or passive, fresh
//! or resumed), the data channel with its acknowledgement protocol, and the
//! per-bot queue with retry and cancellation.
//!
//! ```no_run
//! use crabget::{Engine, EngineConfig, EngineEvent};
//!
//! # async fn demo() -> Result<(), crabget::EngineError> {
//! let mut config = EngineConfig::default();
//! config.server.host = "irc.rizon.net".into();
//! config.server.channels = vec!["#somewhere".into()];
//!
//! let (engine, mut events) = Engine::connect(config).await?;
//! engine.download("SomeBot", "1-5,7")?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         EngineEvent::Downloaded { file } => println!("got {}", file.name),
//!         EngineEvent::CanQuit => break,
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! The IRC protocol itself is a collaborator, not part of the engine: use
//! [`Engine::connect`] for the bundled adapter, or implement
//! [`irc::IrcLink`] and feed inbound traffic through [`Engine::inbound`].

pub mod config;
pub mod dcc;
pub mod engine;
pub mod error;
pub mod irc;

pub use config::{load_config, save_config, EngineConfig, PortRange, ServerConfig};
pub use engine::event::{EngineEvent, FileInfo, InboundSender};
pub use engine::state::JobSnapshot;
pub use engine::Engine;
pub use error::EngineError;
