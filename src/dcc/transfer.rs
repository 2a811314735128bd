//! DCC data-channel execution.
//!
//! Runs one negotiated transfer as a background task: dials out (or accepts
//! on a leased passive port), streams chunks to the destination, writes the
//! cumulative 8-byte big-endian acknowledgement after every chunk, and
//! reports progress and the final outcome to the dispatcher. All waiting
//! steps are bounded: the connection attempt by the connect window, each
//! read by the idle window.

use std::io::SeekFrom;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::fs::OpenOptions;
use tokio::io::{duplex, AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::time::timeout;
use tracing::debug;

use crate::dcc::parser::Destination;
use crate::dcc::ports::PortLease;
use crate::engine::event::{Event, EventTx};
use crate::error::EngineError;

const CHUNK: usize = 8192;
const PIPE_CAPACITY: usize = 64 * 1024;
const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

/// How the data socket comes to exist.
pub(crate) enum Endpoint {
    /// Active DCC: dial the advertised address.
    Connect(SocketAddr),
    /// Passive DCC: accept exactly one connection on the leased port.
    Accept(TcpListener, PortLease),
}

pub(crate) struct TransferSpec {
    /// Dispatcher routing key for the owning job.
    pub job: String,
    pub endpoint: Endpoint,
    pub dest: Destination,
    /// Bytes expected on the wire this session.
    pub expected: u64,
    /// Offset an existing file is positioned to before writing.
    pub position: u64,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    pub progress: bool,
}

/// Run the transfer in a spawned task; the outcome arrives as a
/// `Finished`/`Failed` event.
pub(crate) fn spawn(spec: TransferSpec, cancel: Arc<Notify>, tx: EventTx) {
    tokio::spawn(async move {
        let job = spec.job.clone();
        match run(spec, cancel, &tx).await {
            Ok(()) => {
                let _ = tx.send(Event::Finished { job });
            }
            Err(error) => {
                let _ = tx.send(Event::Failed { job, error });
            }
        }
    });
}

async fn run(spec: TransferSpec, cancel: Arc<Notify>, tx: &EventTx) -> Result<(), EngineError> {
    let TransferSpec {
        job,
        endpoint,
        dest,
        expected,
        position,
        connect_timeout,
        idle_timeout,
        progress,
    } = spec;

    // `_passive` keeps the listener and its port lease alive for the whole
    // transfer; both are torn down on every exit path.
    let (mut stream, _passive) = tokio::select! {
        _ = cancel.notified() => return Err(EngineError::Cancelled),
        r = establish(endpoint, connect_timeout) => r?,
    };

    let mut sink: Box<dyn AsyncWrite + Unpin + Send> = match &dest {
        Destination::Create(path) => {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            Box::new(tokio::fs::File::create(path).await?)
        }
        Destination::Resume(path) => {
            let mut file = OpenOptions::new().read(true).write(true).open(path).await?;
            file.seek(SeekFrom::Start(position)).await?;
            Box::new(file)
        }
        Destination::Pipe => {
            let (ours, theirs) = duplex(PIPE_CAPACITY);
            let _ = tx.send(Event::Opened {
                job: job.clone(),
                stream: theirs,
            });
            Box::new(ours)
        }
    };

    let idle_secs = idle_timeout.as_secs();
    let mut received: u64 = 0;
    let mut buf = [0u8; CHUNK];
    let mut last_progress = Instant::now();

    loop {
        let n = tokio::select! {
            _ = cancel.notified() => {
                drop(sink);
                discard(&dest).await;
                return Err(EngineError::Cancelled);
            }
            r = timeout(idle_timeout, stream.read(&mut buf)) => match r {
                Err(_) => return Err(EngineError::IdleTimeout(idle_secs)),
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(e.into()),
            },
        };
        if n == 0 {
            break;
        }

        sink.write_all(&buf[..n]).await?;
        received += n as u64;

        // Cumulative acknowledgement after every chunk. Some bots tear the
        // channel down without reading the final ack; that is not a fault.
        let _ = stream.write_all(&received.to_be_bytes()).await;

        if progress && last_progress.elapsed() >= PROGRESS_INTERVAL {
            let _ = tx.send(Event::Progress {
                job: job.clone(),
                received,
            });
            last_progress = Instant::now();
        }

        if received >= expected {
            // Everything advertised has arrived: half-close so the sender
            // sees a clean end of session.
            let _ = stream.shutdown().await;
            break;
        }
    }

    sink.flush().await?;
    debug!(job = %job, received, "transfer stream closed");
    Ok(())
}

async fn establish(
    endpoint: Endpoint,
    limit: Duration,
) -> Result<(TcpStream, Option<(TcpListener, PortLease)>), EngineError> {
    let secs = limit.as_secs();
    match endpoint {
        Endpoint::Connect(addr) => match timeout(limit, TcpStream::connect(addr)).await {
            Err(_) => Err(EngineError::TransferTimeout(secs)),
            Ok(Ok(stream)) => Ok((stream, None)),
            Ok(Err(e)) => Err(e.into()),
        },
        Endpoint::Accept(listener, lease) => {
            let accepted = timeout(limit, listener.accept()).await;
            match accepted {
                Err(_) => Err(EngineError::TransferTimeout(secs)),
                Ok(Ok((stream, peer))) => {
                    debug!(%peer, "passive peer connected");
                    Ok((stream, Some((listener, lease))))
                }
                Ok(Err(e)) => Err(e.into()),
            }
        }
    }
}

/// Remove the partial destination after a local cancel. Best effort.
async fn discard(dest: &Destination) {
    let path = match dest {
        Destination::Create(path) | Destination::Resume(path) => path,
        Destination::Pipe => return,
    };
    if let Err(e) = tokio::fs::remove_file(path).await {
        debug!(path = %path.display(), "could not remove partial file: {}", e);
    }
}

/// Read everything from a pipe-mode stream (helper for consumers and tests).
pub async fn drain_pipe<R: AsyncRead + Unpin>(mut stream: R) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    stream.read_to_end(&mut out).await?;
    Ok(out)
}
