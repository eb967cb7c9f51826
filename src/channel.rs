//! The interface a chat backend exposes to the core, and the outbound
//! message type.
//!
//! Transports (websockets, gateways) live outside this crate; they implement
//! [`Channel`] and hand inbound frames to the ingest path.

/// One piece of an outbound message. Emotes stay separate so backends can
/// substitute platform codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    Text(String),
    Emote(String),
}

/// An outbound chat message assembled from fragments; fragments are joined
/// with single spaces unless appended with [`Message::add_no_space`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub fragments: Vec<Fragment>,
}

impl Message {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_text(text: impl Into<String>) -> Self {
        Self::new().add(text)
    }

    #[must_use]
    pub fn add(mut self, text: impl Into<String>) -> Self {
        self.fragments.push(Fragment::Text(text.into()));
        self
    }

    #[must_use]
    pub fn add_emote(mut self, name: impl Into<String>) -> Self {
        self.fragments.push(Fragment::Emote(name.into()));
        self
    }

    /// Append to the previous text fragment without a separating space
    /// (used to attach punctuation).
    #[must_use]
    pub fn add_no_space(mut self, text: impl Into<String>) -> Self {
        match self.fragments.last_mut() {
            Some(Fragment::Text(prev)) => prev.push_str(&text.into()),
            _ => self.fragments.push(Fragment::Text(text.into())),
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Render to a single line, fragments joined with spaces.
    pub fn flatten(&self) -> String {
        let mut out = String::new();
        for (i, frag) in self.fragments.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            match frag {
                Fragment::Text(t) => out.push_str(t),
                Fragment::Emote(e) => out.push_str(e),
            }
        }
        out
    }
}

/// A chat channel as the core sees it. Implementations read their own
/// backend's records for permission checks and deliver outbound messages.
pub trait Channel {
    /// Channel name (without any `#` sigil).
    fn name(&self) -> &str;

    /// The bot's own username on this backend.
    fn username(&self) -> &str;

    /// Prefix that marks a message as a command (`!` by default).
    fn command_prefix(&self) -> &str;

    /// When set, interpreter diagnostics are not echoed into chat.
    fn silent_interp_errors(&self) -> bool;

    /// When set, mentioning the bot gets a generated reply.
    fn respond_to_pings(&self) -> bool;

    /// Lurking channels log and train but never run commands.
    fn lurking(&self) -> bool;

    /// Permission flags for a user id in this channel.
    fn user_permissions(&self, user_id: &str) -> u64;

    fn send_message(&self, msg: &Message);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_joins_with_spaces() {
        let msg = Message::new().add("hello").add_emote("Kappa").add("world");
        assert_eq!(msg.flatten(), "hello Kappa world");
    }

    #[test]
    fn test_no_space_append() {
        let msg = Message::new().add("right").add_no_space("!");
        assert_eq!(msg.flatten(), "right!");

        // after an emote there is nothing to attach to
        let msg = Message::new().add_emote("Kappa").add_no_space("!");
        assert_eq!(msg.flatten(), "Kappa !");
    }
}
