//! DCC CTCP negotiation.
//!
//! Parses `DCC SEND <file> <ip32> <port> <length> [<token>]` offers and
//! `DCC ACCEPT <file> <port> <position> [<token>]` resume confirmations into
//! transfer descriptors. When the destination file already has bytes on
//! disk, the offer is answered with `DCC RESUME` and parked until the bot's
//! ACCEPT arrives; everything needed to finish that handshake lives in a
//! [`ResumeEntry`] keyed by job.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::PathBuf;

use crate::config::EngineConfig;
use crate::dcc::security;
use crate::error::EngineError;

/// Bytes rewound from the end of an existing file before resuming, to
/// overwrite a possibly torn tail from the interrupted transfer.
pub(crate) const RESUME_REWIND: u64 = 8192;

/// Where the received bytes go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Destination {
    /// Fresh file at this path.
    Create(PathBuf),
    /// Existing file, opened read/write and positioned at the resume offset.
    Resume(PathBuf),
    /// No filesystem destination: hand the caller an in-memory pipe.
    Pipe,
}

/// A fully negotiated transfer, ready for the transfer engine.
#[derive(Debug, Clone)]
pub(crate) struct TransferOffer {
    pub pack: u32,
    /// Sanitized name, used for the destination and reporting.
    pub file: String,
    /// Name exactly as offered, echoed back in protocol replies.
    pub wire_name: String,
    pub ip: Ipv4Addr,
    /// 0 means passive: this side listens and the bot dials in.
    pub port: u16,
    pub token: Option<String>,
    /// Advertised total length.
    pub total: u64,
    /// Offset the transfer starts from.
    pub position: u64,
    pub dest: Destination,
}

impl TransferOffer {
    /// Bytes still expected on the wire.
    pub fn remaining(&self) -> u64 {
        self.total.saturating_sub(self.position)
    }
}

/// Offer fields parked while a `DCC RESUME` reply waits for its ACCEPT.
#[derive(Debug, Clone)]
pub(crate) struct ResumeEntry {
    pub pack: u32,
    pub file: String,
    pub wire_name: String,
    pub ip: Ipv4Addr,
    pub port: u16,
    pub token: Option<String>,
    pub total: u64,
    pub position: u64,
    pub path: PathBuf,
}

/// Next step decided from one inbound DCC payload.
#[derive(Debug)]
pub(crate) enum NegotiationStep {
    /// Start the transfer now.
    Begin(TransferOffer),
    /// Send this CTCP reply and wait for `DCC ACCEPT`.
    Resume { reply: String },
}

/// Parses offers and owns the pending-resume table.
#[derive(Debug, Default)]
pub(crate) struct Negotiator {
    resume: HashMap<String, ResumeEntry>,
}

impl Negotiator {
    /// Handle a `DCC SEND` payload for the job currently at the head of the
    /// line. `tokens` is the full tokenized payload including `DCC SEND`.
    pub fn on_send(
        &mut self,
        cfg: &EngineConfig,
        job: &str,
        pack: u32,
        tokens: &[String],
    ) -> Result<NegotiationStep, EngineError> {
        if tokens.len() < 6 {
            return Err(EngineError::Parse(format!(
                "DCC SEND with {} fields",
                tokens.len()
            )));
        }
        let wire_name = tokens[2].clone();
        let file = security::sanitize_filename(&wire_name)
            .ok_or_else(|| EngineError::Parse(format!("unusable file name '{}'", wire_name)))?;
        let ip32: u32 = tokens[3]
            .parse()
            .map_err(|_| EngineError::Parse(format!("bad ip '{}'", tokens[3])))?;
        let ip = Ipv4Addr::from(ip32);
        let port: u16 = tokens[4]
            .parse()
            .map_err(|_| EngineError::Parse(format!("bad port '{}'", tokens[4])))?;
        let total: u64 = tokens[5]
            .parse()
            .map_err(|_| EngineError::Parse(format!("bad length '{}'", tokens[5])))?;
        let token = tokens.get(6).cloned();

        if cfg.reject_private_ips && port != 0 && security::is_private_ip(ip) {
            return Err(EngineError::Parse(format!(
                "offer from private address {} rejected",
                ip
            )));
        }
        if cfg.max_file_size > 0 && total > cfg.max_file_size {
            return Err(EngineError::Parse(format!(
                "offered size {} exceeds limit {}",
                total, cfg.max_file_size
            )));
        }

        let Some(dir) = cfg.download_dir.as_deref() else {
            return Ok(NegotiationStep::Begin(TransferOffer {
                pack,
                file,
                wire_name,
                ip,
                port,
                token,
                total,
                position: 0,
                dest: Destination::Pipe,
            }));
        };

        let path = security::destination_path(dir, &file)
            .ok_or_else(|| EngineError::Parse(format!("unusable file name '{}'", wire_name)))?;

        match std::fs::metadata(&path) {
            Ok(meta) if meta.len() > 0 => {
                let position = meta.len().saturating_sub(RESUME_REWIND);
                let reply = match &token {
                    Some(t) => format!(
                        "DCC RESUME {} {} {} {}",
                        quote_name(&wire_name),
                        port,
                        position,
                        t
                    ),
                    None => format!("DCC RESUME {} {} {}", quote_name(&wire_name), port, position),
                };
                self.resume.insert(
                    job.to_string(),
                    ResumeEntry {
                        pack,
                        file,
                        wire_name,
                        ip,
                        port,
                        token,
                        total,
                        position,
                        path,
                    },
                );
                Ok(NegotiationStep::Resume { reply })
            }
            _ => Ok(NegotiationStep::Begin(TransferOffer {
                pack,
                file,
                wire_name,
                ip,
                port,
                token,
                total,
                position: 0,
                dest: Destination::Create(path),
            })),
        }
    }

    /// Handle a `DCC ACCEPT`, consuming the parked entry for `job`.
    pub fn on_accept(
        &mut self,
        job: &str,
        tokens: &[String],
    ) -> Result<NegotiationStep, EngineError> {
        if tokens.len() < 5 {
            return Err(EngineError::Parse(format!(
                "DCC ACCEPT with {} fields",
                tokens.len()
            )));
        }
        let entry = self
            .resume
            .remove(job)
            .ok_or_else(|| EngineError::Parse(format!("DCC ACCEPT without pending RESUME ({})", job)))?;
        Ok(NegotiationStep::Begin(TransferOffer {
            pack: entry.pack,
            file: entry.file,
            wire_name: entry.wire_name,
            ip: entry.ip,
            port: entry.port,
            token: entry.token,
            total: entry.total,
            position: entry.position,
            dest: Destination::Resume(entry.path),
        }))
    }

    /// Forget the parked entry for `job`, if any. Called when the
    /// negotiation window times out.
    pub fn drop_entry(&mut self, job: &str) {
        self.resume.remove(job);
    }

    #[cfg(test)]
    fn has_entry(&self, job: &str) -> bool {
        self.resume.contains_key(job)
    }
}

/// Split a CTCP payload on whitespace, keeping double-quoted spans (file
/// names with spaces) as single tokens.
pub(crate) fn tokenize(payload: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in payload.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Quote a file name for the wire when it contains whitespace.
pub(crate) fn quote_name(name: &str) -> String {
    if name.chars().any(char::is_whitespace) {
        format!("\"{}\"", name)
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg_with_dir(dir: Option<PathBuf>) -> EngineConfig {
        let mut cfg = EngineConfig::default();
        cfg.download_dir = dir;
        cfg
    }

    fn send_tokens(payload: &str) -> Vec<String> {
        tokenize(payload)
    }

    #[test]
    fn tokenize_respects_quotes() {
        assert_eq!(
            tokenize("DCC SEND \"my file.txt\" 2130706433 5000 1024 7"),
            vec!["DCC", "SEND", "my file.txt", "2130706433", "5000", "1024", "7"]
        );
        assert_eq!(tokenize("  a   b "), vec!["a", "b"]);
    }

    #[test]
    fn fresh_send_becomes_offer() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg_with_dir(Some(dir.path().to_path_buf()));
        let mut neg = Negotiator::default();
        let step = neg
            .on_send(
                &cfg,
                "bot",
                4,
                &send_tokens("DCC SEND a.txt 2130706433 5000 1024"),
            )
            .unwrap();
        let NegotiationStep::Begin(offer) = step else {
            panic!("expected an immediate offer");
        };
        assert_eq!(offer.ip, Ipv4Addr::new(127, 0, 0, 1));
        assert_eq!(offer.port, 5000);
        assert_eq!(offer.total, 1024);
        assert_eq!(offer.position, 0);
        assert_eq!(offer.remaining(), 1024);
        assert_eq!(offer.dest, Destination::Create(dir.path().join("a.txt")));
    }

    #[test]
    fn existing_file_triggers_resume() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), vec![0u8; 10_000]).unwrap();
        let cfg = cfg_with_dir(Some(dir.path().to_path_buf()));
        let mut neg = Negotiator::default();
        let step = neg
            .on_send(
                &cfg,
                "bot",
                4,
                &send_tokens("DCC SEND a.txt 2130706433 5000 16384 9"),
            )
            .unwrap();
        let NegotiationStep::Resume { reply } = step else {
            panic!("expected a resume step");
        };
        assert_eq!(reply, "DCC RESUME a.txt 5000 1808 9");
        assert!(neg.has_entry("bot"));

        let step = neg
            .on_accept("bot", &send_tokens("DCC ACCEPT a.txt 5000 1808 9"))
            .unwrap();
        let NegotiationStep::Begin(offer) = step else {
            panic!("expected an offer after ACCEPT");
        };
        assert_eq!(offer.position, 1808);
        assert_eq!(offer.total, 16384);
        assert_eq!(offer.remaining(), 16384 - 1808);
        assert_eq!(offer.dest, Destination::Resume(dir.path().join("a.txt")));
        assert!(!neg.has_entry("bot"));
    }

    #[test]
    fn short_existing_file_resumes_from_zero() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), vec![0u8; 100]).unwrap();
        let cfg = cfg_with_dir(Some(dir.path().to_path_buf()));
        let mut neg = Negotiator::default();
        let NegotiationStep::Resume { reply } = neg
            .on_send(
                &cfg,
                "bot",
                1,
                &send_tokens("DCC SEND a.txt 2130706433 5000 1024"),
            )
            .unwrap()
        else {
            panic!("expected a resume step");
        };
        assert_eq!(reply, "DCC RESUME a.txt 5000 0");
    }

    #[test]
    fn pipe_mode_never_resumes() {
        let cfg = cfg_with_dir(None);
        let mut neg = Negotiator::default();
        let NegotiationStep::Begin(offer) = neg
            .on_send(
                &cfg,
                "bot",
                2,
                &send_tokens("DCC SEND a.txt 2130706433 5000 1024"),
            )
            .unwrap()
        else {
            panic!("expected an immediate offer");
        };
        assert_eq!(offer.dest, Destination::Pipe);
    }

    #[test]
    fn passive_offer_keeps_token() {
        let cfg = cfg_with_dir(None);
        let mut neg = Negotiator::default();
        let NegotiationStep::Begin(offer) = neg
            .on_send(
                &cfg,
                "bot",
                2,
                &send_tokens("DCC SEND a.txt 2130706433 0 1024 42"),
            )
            .unwrap()
        else {
            panic!("expected an immediate offer");
        };
        assert_eq!(offer.port, 0);
        assert_eq!(offer.token.as_deref(), Some("42"));
    }

    #[test]
    fn malformed_payloads_are_parse_errors() {
        let cfg = cfg_with_dir(None);
        let mut neg = Negotiator::default();
        for payload in [
            "DCC SEND a.txt",
            "DCC SEND a.txt notanip 5000 1024",
            "DCC SEND a.txt 2130706433 notaport 1024",
            "DCC SEND ... 2130706433 5000 1024",
        ] {
            let err = neg.on_send(&cfg, "bot", 1, &send_tokens(payload)).unwrap_err();
            assert!(matches!(err, EngineError::Parse(_)), "{}", payload);
        }
        assert!(matches!(
            neg.on_accept("bot", &send_tokens("DCC ACCEPT a.txt 5000 0 1")),
            Err(EngineError::Parse(_))
        ));
    }

    #[test]
    fn oversized_offers_are_rejected() {
        let mut cfg = cfg_with_dir(None);
        cfg.max_file_size = 512;
        let mut neg = Negotiator::default();
        assert!(matches!(
            neg.on_send(
                &cfg,
                "bot",
                1,
                &send_tokens("DCC SEND a.txt 2130706433 5000 1024")
            ),
            Err(EngineError::Parse(_))
        ));
    }

    #[test]
    fn private_ips_are_rejected_when_configured() {
        let mut cfg = cfg_with_dir(None);
        cfg.reject_private_ips = true;
        let mut neg = Negotiator::default();
        assert!(matches!(
            neg.on_send(
                &cfg,
                "bot",
                1,
                &send_tokens("DCC SEND a.txt 2130706433 5000 1024")
            ),
            Err(EngineError::Parse(_))
        ));
        // Passive offers carry a placeholder address; they are exempt.
        assert!(neg
            .on_send(
                &cfg,
                "bot",
                1,
                &send_tokens("DCC SEND a.txt 2130706433 0 1024 7")
            )
            .is_ok());
    }
}
