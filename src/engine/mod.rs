//! Engine front-end and event loop.
//!
//! [`Engine`] is a cheap handle around the dispatcher's command channel. The
//! dispatcher task owns every job; the handle (and the IRC adapter, and the
//! transfer tasks) only post events at it. Consumers watch the returned
//! [`EngineEvent`] receiver.

pub mod event;
pub mod handler;
pub mod packs;
pub mod state;

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::config::EngineConfig;
use crate::engine::event::{Event, EventTx, EngineEvent, InboundSender};
use crate::engine::handler::Dispatcher;
use crate::engine::state::JobSnapshot;
use crate::error::EngineError;
use crate::irc::IrcLink;

pub struct Engine {
    tx: EventTx,
}

impl Engine {
    /// Start the engine over a caller-supplied IRC link. Returns the handle
    /// and the consumer event stream.
    pub fn start(
        config: EngineConfig,
        link: Arc<dyn IrcLink>,
    ) -> Result<(Engine, mpsc::UnboundedReceiver<EngineEvent>), EngineError> {
        let (tx, rx) = mpsc::unbounded_channel();
        Self::start_with_channel(config, link, tx, rx)
    }

    /// Connect the bundled IRC adapter, then start the engine over it.
    pub async fn connect(
        config: EngineConfig,
    ) -> Result<(Engine, mpsc::UnboundedReceiver<EngineEvent>), EngineError> {
        config.validate_server()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let inbound = InboundSender::new(tx.clone());
        let session = crate::irc::connect(&config, inbound)
            .await
            .map_err(|e| EngineError::Connection(std::io::Error::other(e.to_string())))?;
        Self::start_with_channel(config, Arc::new(session), tx, rx)
    }

    fn start_with_channel(
        config: EngineConfig,
        link: Arc<dyn IrcLink>,
        tx: EventTx,
        rx: mpsc::UnboundedReceiver<Event>,
    ) -> Result<(Engine, mpsc::UnboundedReceiver<EngineEvent>), EngineError> {
        config.validate()?;
        if let Some(dir) = &config.download_dir {
            std::fs::create_dir_all(dir).map_err(|e| {
                EngineError::Config(format!(
                    "cannot create download dir {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(Arc::new(config), link, events_tx, tx.clone());
        tokio::spawn(dispatcher.run(rx));
        Ok((Engine { tx }, events_rx))
    }

    /// Queue packs for a bot. `packs` is a spec like `"1-5,7,#20"`; parse
    /// errors surface synchronously.
    pub fn download(&self, target: &str, packs: &str) -> Result<(), EngineError> {
        let packs = packs::parse_pack_spec(packs)?;
        self.send(Event::Download {
            target: target.to_string(),
            packs,
        });
        Ok(())
    }

    /// Queue already-parsed pack numbers for a bot.
    pub fn download_packs(&self, target: &str, packs: &[u32]) -> Result<(), EngineError> {
        let packs = packs::normalize(packs.iter().copied());
        if packs.is_empty() {
            return Err(EngineError::Parse("no packs requested".into()));
        }
        self.send(Event::Download {
            target: target.to_string(),
            packs,
        });
        Ok(())
    }

    /// Cancel a bot's active transfer or negotiation and drop its queue.
    pub fn cancel(&self, nick: &str) {
        self.send(Event::Cancel {
            nick: nick.to_string(),
        });
    }

    /// Snapshot of one job, if the bot is being serviced.
    pub async fn get(&self, nick: &str) -> Option<JobSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(Event::GetJob {
            nick: nick.to_string(),
            reply,
        });
        rx.await.ok().flatten()
    }

    /// Snapshots of every job, in arrival order.
    pub async fn list(&self) -> Vec<JobSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(Event::ListJobs { reply });
        rx.await.unwrap_or_default()
    }

    /// Sender for feeding inbound IRC traffic from a custom client.
    pub fn inbound(&self) -> InboundSender {
        InboundSender::new(self.tx.clone())
    }

    fn send(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}
