//! The dispatcher: single owner of all job state.
//!
//! Every stimulus (public command, IRC traffic, transfer report, timer
//! fire) arrives on one channel and is handled to completion before the
//! next, so job fields are mutated without locking. Components never reach
//! into jobs directly; they post events here and the dispatcher applies the
//! change.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::TcpListener;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::dcc::parser::{
    quote_name, tokenize, Destination, NegotiationStep, Negotiator, TransferOffer,
};
use crate::dcc::ports::PortPool;
use crate::dcc::supervisor::TimerKind;
use crate::dcc::transfer::{self, Endpoint, TransferSpec};
use crate::engine::event::{EngineEvent, Event, EventTx, FileInfo};
use crate::engine::state::{ActiveTransfer, EngineState};
use crate::error::EngineError;
use crate::irc::IrcLink;

pub(crate) struct Dispatcher {
    cfg: Arc<EngineConfig>,
    link: Arc<dyn IrcLink>,
    state: EngineState,
    negotiator: Negotiator,
    ports: Arc<PortPool>,
    events: mpsc::UnboundedSender<EngineEvent>,
    tx: EventTx,
    timer_seq: u64,
}

impl Dispatcher {
    pub fn new(
        cfg: Arc<EngineConfig>,
        link: Arc<dyn IrcLink>,
        events: mpsc::UnboundedSender<EngineEvent>,
        tx: EventTx,
    ) -> Self {
        let ports = Arc::new(PortPool::new(cfg.passive_ports));
        Self {
            cfg,
            link,
            state: EngineState::default(),
            negotiator: Negotiator::default(),
            ports,
            events,
            tx,
            timer_seq: 0,
        }
    }

    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Event>) {
        while let Some(event) = rx.recv().await {
            self.handle(event).await;
        }
        debug!("dispatcher channel closed");
    }

    async fn handle(&mut self, event: Event) {
        match event {
            Event::Download { target, packs } => {
                info!(bot = %target, ?packs, "queued");
                if self.state.enqueue(&target, packs) {
                    self.request_step(&EngineState::key(&target));
                }
            }
            Event::Cancel { nick } => self.cancel(&nick),
            Event::GetJob { nick, reply } => {
                let snap = self.state.job(&EngineState::key(&nick)).map(|j| j.snapshot());
                let _ = reply.send(snap);
            }
            Event::ListJobs { reply } => {
                let _ = reply.send(self.state.snapshots());
            }
            Event::Connected => {
                info!("irc connected; engine ready");
                self.emit(EngineEvent::Ready);
            }
            Event::Notice { from, text } => {
                debug!(from = %from, "notice: {}", text);
            }
            Event::Ctcp { from, payload } => self.handle_ctcp(&from, &payload).await,
            Event::TimerFired { job, seq } => self.timer_fired(&job, seq),
            Event::Opened { job, stream } => {
                let file = self
                    .state
                    .job(&job)
                    .and_then(|j| j.active.as_ref())
                    .map(|a| a.file.clone());
                if let Some(file) = file {
                    self.emit(EngineEvent::Pipe { stream, file });
                }
            }
            Event::Progress { job, received } => self.progress(&job, received),
            Event::Finished { job } => self.finished(&job),
            Event::Failed { job, error } => self.failed(&job, error),
        }
    }

    /// Pop the lowest pending pack, ask the bot for it, and open the offer
    /// window.
    fn request_step(&mut self, key: &str) {
        let seq = self.next_seq();
        let offer_secs = self.cfg.offer_timeout_secs;
        let tx = self.tx.clone();
        let Some(job) = self.state.job_mut(key) else {
            return;
        };
        let Some(pack) = job.take_next() else {
            return;
        };
        let nick = job.nick.clone();
        job.timer.arm(
            tx,
            key.to_string(),
            TimerKind::Offer,
            Duration::from_secs(offer_secs),
            seq,
        );
        info!(bot = %nick, pack, "requesting pack");
        if let Err(e) = self.link.say(&nick, &format!("XDCC SEND {}", pack)) {
            // The armed window recovers through the retry routine.
            warn!(bot = %nick, "could not send request: {}", e);
        }
    }

    async fn handle_ctcp(&mut self, from: &str, payload: &str) {
        let tokens = tokenize(payload);
        if tokens.len() < 2 || tokens[0] != "DCC" {
            return;
        }
        let Some(key) = self.state.head_key() else {
            debug!(from = %from, "ignoring unsolicited DCC message");
            return;
        };
        let (nick, pack, waiting) = {
            let job = self.state.job(&key).expect("head job exists");
            (job.nick.clone(), job.now, job.timer.is_armed())
        };
        if pack == 0 || !waiting {
            debug!(from = %from, "no negotiation in flight; ignoring DCC message");
            return;
        }
        if self.cfg.require_matching_nick && !from.eq_ignore_ascii_case(&nick) {
            debug!(from = %from, expected = %nick, "offer from unexpected nick dropped");
            return;
        }

        let step = match tokens[1].as_str() {
            "SEND" => self.negotiator.on_send(&self.cfg, &key, pack, &tokens),
            "ACCEPT" => self.negotiator.on_accept(&key, &tokens),
            other => {
                debug!(kind = %other, "ignoring DCC message");
                return;
            }
        };

        match step {
            Ok(NegotiationStep::Begin(offer)) => {
                if let Some(job) = self.state.job_mut(&key) {
                    job.timer.clear();
                }
                self.begin_transfer(&key, offer).await;
            }
            Ok(NegotiationStep::Resume { reply }) => {
                // Same window, new expectation: the bot's ACCEPT.
                let seq = self.next_seq();
                let offer_secs = self.cfg.offer_timeout_secs;
                let tx = self.tx.clone();
                if let Some(job) = self.state.job_mut(&key) {
                    job.timer.arm(
                        tx,
                        key.clone(),
                        TimerKind::Accept,
                        Duration::from_secs(offer_secs),
                        seq,
                    );
                }
                info!(bot = %nick, "partial file found; requesting resume");
                if let Err(e) = self.link.ctcp_request(&nick, &reply) {
                    warn!(bot = %nick, "could not send DCC RESUME: {}", e);
                }
            }
            Err(error) => {
                // Local to this message; the armed window keeps waiting.
                warn!(from = %from, "{}", error);
                self.emit(EngineEvent::Error { error, file: None });
            }
        }
    }

    /// Launch the transfer task for a completed offer.
    async fn begin_transfer(&mut self, key: &str, offer: TransferOffer) {
        let Some(nick) = self.state.job(key).map(|j| j.nick.clone()) else {
            return;
        };
        let file = FileInfo {
            nick: nick.clone(),
            pack: offer.pack,
            name: offer.file.clone(),
            path: match &offer.dest {
                Destination::Create(p) | Destination::Resume(p) => Some(p.clone()),
                Destination::Pipe => None,
            },
            length: offer.total,
            position: offer.position,
        };

        let endpoint = if offer.port == 0 {
            // Passive: we listen, the bot dials in.
            let Some(lease) = self.ports.pick() else {
                warn!(bot = %nick, "passive port pool exhausted");
                self.retry_or_fail(key, EngineError::PortPoolExhausted, Some(file));
                return;
            };
            let port = lease.port();
            let listener = match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
                Ok(l) => l,
                Err(e) => {
                    self.retry_or_fail(key, e.into(), Some(file));
                    return;
                }
            };
            let ip32 = u32::from(self.cfg.public_ip);
            let name = quote_name(&offer.wire_name);
            let reply = match &offer.token {
                Some(t) => format!("DCC SEND {} {} {} {} {}", name, ip32, port, offer.total, t),
                None => format!("DCC SEND {} {} {} {}", name, ip32, port, offer.total),
            };
            if let Err(e) = self.link.ctcp_request(&nick, &reply) {
                warn!(bot = %nick, "could not advertise listener: {}", e);
            }
            Endpoint::Accept(listener, lease)
        } else {
            Endpoint::Connect(SocketAddr::from((offer.ip, offer.port)))
        };

        let cancel = Arc::new(Notify::new());
        let spec = TransferSpec {
            job: key.to_string(),
            endpoint,
            dest: offer.dest.clone(),
            expected: offer.remaining(),
            position: offer.position,
            connect_timeout: Duration::from_secs(self.cfg.connect_timeout_secs),
            idle_timeout: Duration::from_secs(self.cfg.idle_timeout_secs),
            progress: self.cfg.progress,
        };

        let Some(job) = self.state.job_mut(key) else {
            return;
        };
        job.cancel = Some(Arc::clone(&cancel));
        job.active = Some(ActiveTransfer {
            file,
            started: Instant::now(),
        });
        info!(bot = %nick, file = %offer.file, bytes = offer.remaining(), "transfer starting");
        transfer::spawn(spec, cancel, self.tx.clone());
    }

    fn cancel(&mut self, nick: &str) {
        let key = EngineState::key(nick);
        self.negotiator.drop_entry(&key);
        let Some(job) = self.state.job_mut(&key) else {
            return;
        };
        if let Some(cancel) = &job.cancel {
            // The transfer task observes the marker, deletes the partial
            // file, and reports back as Cancelled.
            cancel.notify_one();
            return;
        }
        // Mid-negotiation or queued-only: no socket to tear down.
        job.timer.clear();
        job.queue.clear();
        if job.now != 0 {
            let now = job.now;
            job.failures.push(now);
        }
        info!(bot = %nick, "cancelled");
        self.advance(&key);
    }

    fn timer_fired(&mut self, key: &str, seq: u64) {
        let Some(job) = self.state.job_mut(key) else {
            return;
        };
        let Some(kind) = job.timer.fire(seq) else {
            return; // raced a clear; stale
        };
        let file = job.active.take().map(|a| a.file);
        if kind == TimerKind::Accept {
            self.negotiator.drop_entry(key);
        }
        let secs = self.cfg.offer_timeout_secs;
        self.retry_or_fail(key, EngineError::NegotiationTimeout(secs), file);
    }

    fn progress(&mut self, key: &str, received: u64) {
        let Some(active) = self.state.job(key).and_then(|j| j.active.as_ref()) else {
            return;
        };
        let file = active.file.clone();
        let done = file.position + received;
        let percentage = (done as f64 / file.length.max(1) as f64) * 100.0;
        let elapsed = active.started.elapsed().as_secs_f64();
        let eta_secs = if received > 0 && elapsed > 0.0 {
            let rate = received as f64 / elapsed;
            (file.length.saturating_sub(done) as f64 / rate).round() as u64
        } else {
            0
        };
        self.emit(EngineEvent::Downloading {
            file,
            received: done,
            percentage,
            eta_secs,
        });
    }

    fn finished(&mut self, key: &str) {
        let Some(job) = self.state.job_mut(key) else {
            return;
        };
        job.cancel = None;
        let Some(active) = job.active.take() else {
            return;
        };
        job.success.push(active.file.name.clone());
        info!(bot = %job.nick, file = %active.file.name, "downloaded");
        self.emit(EngineEvent::Downloaded { file: active.file });
        self.advance(key);
    }

    fn failed(&mut self, key: &str, error: EngineError) {
        let Some(job) = self.state.job_mut(key) else {
            return;
        };
        job.cancel = None;
        let file = job.active.take().map(|a| a.file);
        if matches!(error, EngineError::Cancelled) {
            // Local cancel: drop everything pending for this bot, no retry.
            job.queue.clear();
            if job.now != 0 {
                let now = job.now;
                job.failures.push(now);
            }
            info!(bot = %job.nick, "transfer cancelled; dropping remaining queue");
            self.advance(key);
            return;
        }
        self.retry_or_fail(key, error, file);
    }

    /// The single convergence point for stalled negotiation, stalled
    /// transfer, and transport failure: burn a retry or give the pack up.
    fn retry_or_fail(&mut self, key: &str, error: EngineError, file: Option<FileInfo>) {
        let max = self.cfg.retry_limit;
        let seq = self.next_seq();
        let offer_secs = self.cfg.offer_timeout_secs;
        let tx = self.tx.clone();
        let Some(job) = self.state.job_mut(key) else {
            return;
        };
        job.cancel = None;
        job.active = None;
        let nick = job.nick.clone();
        let pack = job.now;

        if job.retry < max {
            job.retry += 1;
            let attempt = job.retry;
            job.timer.arm(
                tx,
                key.to_string(),
                TimerKind::Offer,
                Duration::from_secs(offer_secs),
                seq,
            );
            warn!(bot = %nick, pack, "retrying ({}/{}): {}", attempt, max, error);
            self.emit(EngineEvent::Error { error, file });
            if let Err(e) = self.link.say(&nick, &format!("XDCC SEND {}", pack)) {
                warn!(bot = %nick, "could not resend request: {}", e);
            }
        } else {
            job.timer.clear();
            job.failures.push(pack);
            warn!(bot = %nick, pack, "giving up: {}", error);
            self.emit(EngineEvent::Error { error, file });
            self.advance(key);
        }
    }

    /// The `next` protocol: continue this job, or retire it and move to the
    /// next bot in arrival order.
    fn advance(&mut self, key: &str) {
        let Some(job) = self.state.job_mut(key) else {
            return;
        };
        job.now = 0;
        job.retry = 0;
        job.cancel = None;
        job.active = None;
        job.timer.clear();

        if !job.queue.is_empty() {
            self.request_step(key);
            return;
        }

        let Some(job) = self.state.remove(key) else {
            return;
        };
        let snapshot = job.snapshot();
        info!(
            bot = %snapshot.nick,
            ok = snapshot.success.len(),
            failed = snapshot.failures.len(),
            "job finished"
        );
        self.emit(EngineEvent::Done { job: snapshot });

        if self.state.is_empty() {
            self.emit(EngineEvent::CanQuit);
            return;
        }
        if let Some(next) = self.state.head_key() {
            // The new head has never been scheduled; start it.
            let idle = self.state.job(&next).map(|j| j.is_idle()).unwrap_or(false);
            if idle {
                self.request_step(&next);
            }
        }
    }

    fn next_seq(&mut self) -> u64 {
        self.timer_seq += 1;
        self.timer_seq
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }
}
