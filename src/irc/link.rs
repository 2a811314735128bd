use anyhow::Result;

/// Outbound surface the engine needs from an IRC client.
///
/// Implement this to drive the engine from your own connection; feed the
/// inbound half through the sender returned by `Engine::inbound`.
pub trait IrcLink: Send + Sync {
    /// PRIVMSG plain text to a nick or channel.
    fn say(&self, target: &str, text: &str) -> Result<()>;

    /// Send a raw protocol line.
    fn raw(&self, line: &str) -> Result<()>;

    /// Send a CTCP request: `payload` framed in \x01 markers as a PRIVMSG.
    fn ctcp_request(&self, target: &str, payload: &str) -> Result<()>;

    fn join(&self, channel: &str) -> Result<()>;

    fn part(&self, channel: &str) -> Result<()>;
}
