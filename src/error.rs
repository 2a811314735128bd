//! Engine error taxonomy.
//!
//! Every failure the engine can report flows through [`EngineError`]. Parse
//! errors are local to one CTCP message; timeout and connection errors feed
//! the per-pack retry routine; `Cancelled` is a control marker rather than a
//! real fault and bypasses retry entirely.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed or unexpected DCC payload. Drops only the offending message.
    #[error("unparsable DCC payload: {0}")]
    Parse(String),

    /// The bot never answered an `XDCC SEND` request with a DCC offer.
    #[error("no DCC offer received within {0}s")]
    NegotiationTimeout(u64),

    /// The data connection could not be established in time.
    #[error("data connection not established within {0}s")]
    TransferTimeout(u64),

    /// An established data connection stopped delivering bytes.
    #[error("no data received for {0}s")]
    IdleTimeout(u64),

    /// Transport-level failure on the data channel.
    #[error("transfer connection failed: {0}")]
    Connection(#[from] std::io::Error),

    /// Local cancellation marker. Not a fault: short-circuits to cleanup.
    #[error("transfer cancelled")]
    Cancelled,

    /// No free port in the configured passive pool.
    #[error("passive port pool exhausted")]
    PortPoolExhausted,

    /// Rejected configuration, reported synchronously at construction.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl EngineError {
    /// Whether the retry routine should consume a retry attempt for this
    /// error. Parse errors never reach the retry path and `Cancelled`
    /// short-circuits around it.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::NegotiationTimeout(_)
                | EngineError::TransferTimeout(_)
                | EngineError::IdleTimeout(_)
                | EngineError::Connection(_)
                | EngineError::PortPoolExhausted
        )
    }
}
