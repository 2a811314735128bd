use anyhow::Result;
use futures::StreamExt;
use irc::client::prelude::*;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::engine::event::InboundSender;
use crate::irc::link::IrcLink;

/// Bundled IRC adapter over the `irc` crate. Outbound messages go through
/// the crate's sender; a spawned reader forwards inbound CTCP traffic into
/// the engine.
pub struct IrcSession {
    sender: irc::client::Sender,
}

pub async fn connect(cfg: &EngineConfig, inbound: InboundSender) -> Result<IrcSession> {
    let config = Config {
        server: Some(cfg.server.host.clone()),
        port: Some(cfg.server.port),
        use_tls: Some(cfg.server.tls),
        nickname: Some(cfg.nick.clone()),
        channels: cfg.server.channels.clone(),
        ..Config::default()
    };

    let mut client = Client::from_config(config).await?;
    client.identify()?;

    let sender = client.sender();
    let mut stream = client.stream()?;
    inbound.connected();

    tokio::spawn(async move {
        while let Some(result) = stream.next().await {
            match result {
                Ok(message) => forward(&inbound, &message),
                Err(e) => {
                    warn!("irc stream error: {}", e);
                    break;
                }
            }
        }
        debug!("irc stream closed");
    });

    Ok(IrcSession { sender })
}

fn forward(inbound: &InboundSender, message: &Message) {
    let from = match &message.prefix {
        Some(Prefix::Nickname(nick, _, _)) => nick.as_str(),
        _ => return,
    };
    match &message.command {
        Command::PRIVMSG(_, text) => {
            if let Some(payload) = ctcp_payload(text) {
                inbound.ctcp(from, payload);
            }
        }
        Command::NOTICE(_, text) => {
            if let Some(payload) = ctcp_payload(text) {
                inbound.ctcp(from, payload);
            } else {
                inbound.notice(from, text);
            }
        }
        _ => {}
    }
}

/// Extract the payload of a \x01-framed CTCP message.
fn ctcp_payload(text: &str) -> Option<&str> {
    let inner = text.strip_prefix('\x01')?;
    Some(inner.strip_suffix('\x01').unwrap_or(inner))
}

impl IrcLink for IrcSession {
    fn say(&self, target: &str, text: &str) -> Result<()> {
        // No CTCP injection in outbound plain messages.
        let clean = text.replace('\x01', "");
        self.sender.send_privmsg(target, &clean)?;
        Ok(())
    }

    fn raw(&self, line: &str) -> Result<()> {
        self.sender.send(Command::Raw(line.to_string(), vec![]))?;
        Ok(())
    }

    fn ctcp_request(&self, target: &str, payload: &str) -> Result<()> {
        let ctcp = format!("\x01{}\x01", payload);
        self.sender.send_privmsg(target, &ctcp)?;
        Ok(())
    }

    fn join(&self, channel: &str) -> Result<()> {
        self.sender.send_join(channel)?;
        Ok(())
    }

    fn part(&self, channel: &str) -> Result<()> {
        self.sender
            .send(Command::PART(channel.to_string(), None))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ctcp_payload_strips_markers() {
        assert_eq!(
            ctcp_payload("\u{1}DCC SEND a.txt 1 2 3\u{1}"),
            Some("DCC SEND a.txt 1 2 3")
        );
        // Some clients omit the trailing marker.
        assert_eq!(ctcp_payload("\u{1}VERSION"), Some("VERSION"));
        assert_eq!(ctcp_payload("plain text"), None);
    }
}
