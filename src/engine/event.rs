use std::path::PathBuf;

use tokio::io::DuplexStream;
use tokio::sync::{mpsc, oneshot};

use crate::engine::state::JobSnapshot;
use crate::error::EngineError;

pub(crate) type EventTx = mpsc::UnboundedSender<Event>;

/// Read-only description of the file behind a transfer, carried by every
/// public event that concerns one.
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Bot nick the file comes from.
    pub nick: String,
    /// Pack number that produced the offer.
    pub pack: u32,
    /// Sanitized file name from the offer.
    pub name: String,
    /// Destination path, `None` in pipe mode.
    pub path: Option<PathBuf>,
    /// Total size on disk once complete (advertised length).
    pub length: u64,
    /// Offset writes resume from (0 for a fresh transfer).
    pub position: u64,
}

/// Notifications delivered to engine consumers.
#[derive(Debug)]
pub enum EngineEvent {
    /// The IRC side is connected and requests will be serviced.
    Ready,
    /// Periodic progress for the active transfer.
    Downloading {
        file: FileInfo,
        received: u64,
        percentage: f64,
        eta_secs: u64,
    },
    /// A pack finished and its destination is closed.
    Downloaded { file: FileInfo },
    /// Pipe-mode handoff: read the file bytes from `stream`.
    Pipe {
        stream: DuplexStream,
        file: FileInfo,
    },
    /// A classified failure; per-pack, never fatal to the engine.
    Error {
        error: EngineError,
        file: Option<FileInfo>,
    },
    /// A job ran out of work and left the active set.
    Done { job: JobSnapshot },
    /// No jobs remain anywhere.
    CanQuit,
}

/// Everything the dispatcher reacts to. Public commands, IRC traffic,
/// transfer-task reports, and timer fires all arrive on one channel so no
/// two handlers ever race on the same job.
#[derive(Debug)]
pub(crate) enum Event {
    // Public commands.
    Download { target: String, packs: Vec<u32> },
    Cancel { nick: String },
    GetJob {
        nick: String,
        reply: oneshot::Sender<Option<JobSnapshot>>,
    },
    ListJobs {
        reply: oneshot::Sender<Vec<JobSnapshot>>,
    },

    // Inbound IRC surface.
    Connected,
    Ctcp { from: String, payload: String },
    Notice { from: String, text: String },

    // Supervisor timers.
    TimerFired { job: String, seq: u64 },

    // Transfer-task reports.
    Opened { job: String, stream: DuplexStream },
    Progress { job: String, received: u64 },
    Finished { job: String },
    Failed { job: String, error: EngineError },
}

/// Handle for feeding inbound IRC traffic into the dispatcher. The bundled
/// adapter uses one; a custom IRC client gets one from `Engine::inbound`.
#[derive(Debug, Clone)]
pub struct InboundSender {
    tx: EventTx,
}

impl InboundSender {
    pub(crate) fn new(tx: EventTx) -> Self {
        Self { tx }
    }

    /// Signal that the IRC connection is registered and usable.
    pub fn connected(&self) {
        let _ = self.tx.send(Event::Connected);
    }

    /// Deliver a CTCP request payload (the text between the \x01 markers).
    pub fn ctcp(&self, from: &str, payload: &str) {
        let _ = self.tx.send(Event::Ctcp {
            from: from.to_string(),
            payload: payload.to_string(),
        });
    }

    /// Deliver a NOTICE; bots use these for queue chatter.
    pub fn notice(&self, from: &str, text: &str) {
        let _ = self.tx.send(Event::Notice {
            from: from.to_string(),
            text: text.to_string(),
        });
    }
}
