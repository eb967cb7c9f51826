//! IRC-family wire codec.
//!
//! One frame per call, already stripped of its CR/LF terminator:
//! `[@tags] [:prefix] command params... [:trailing]`. Twitch chat speaks
//! this grammar with its metadata in the tags section.

use crate::error::{WireError, WireResult};
use crate::util::bisect;
use std::collections::HashMap;

/// A parsed wire frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WireMessage {
    pub tags: HashMap<String, String>,
    pub nick: String,
    pub user: String,
    pub host: String,
    pub command: String,
    pub params: Vec<String>,
}

impl WireMessage {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}

/// Parse one frame.
pub fn parse(line: &str) -> WireResult<WireMessage> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.is_empty() {
        return Err(WireError::Empty);
    }

    let mut msg = WireMessage::default();
    let mut rest = line;

    if rest.starts_with('@') {
        let (tag_part, after) = bisect(rest, ' ');
        parse_tags(&mut msg, &tag_part[1..])?;
        rest = after.trim_start_matches(' ');
    }

    if rest.starts_with(':') {
        let (prefix_part, after) = bisect(rest, ' ');
        parse_prefix(&mut msg, &prefix_part[1..])?;
        rest = after.trim_start_matches(' ');
    }

    let (command, mut rest) = bisect(rest, ' ');
    if command.is_empty() {
        return Err(WireError::MissingCommand);
    }
    msg.command = command.to_string();

    while !rest.is_empty() {
        if let Some(trailing) = rest.strip_prefix(':') {
            msg.params.push(trailing.to_string());
            break;
        }

        let (param, after) = bisect(rest, ' ');
        msg.params.push(param.to_string());
        rest = after.trim_start_matches(' ');
    }

    Ok(msg)
}

// <tags> ::= <tag> [';' <tag>]*    <tag> ::= <key> ['=' <escaped_value>]
fn parse_tags(msg: &mut WireMessage, mut tags: &str) -> WireResult<()> {
    while !tags.is_empty() {
        let key_end = tags.find(['=', ';']).unwrap_or(tags.len());
        let key = &tags[..key_end];
        if key.is_empty() {
            return Err(WireError::Tags(format!("empty key near '{tags}'")));
        }

        tags = &tags[key_end..];

        // a bare key or a key with an empty value are both fine
        if !tags.starts_with('=') {
            msg.tags.insert(key.to_string(), String::new());
            tags = tags.strip_prefix(';').unwrap_or(tags);
            continue;
        }

        tags = &tags[1..];
        let val_end = tags.find(';').unwrap_or(tags.len());
        let value = unescape_tag_value(&tags[..val_end]);
        msg.tags.insert(key.to_string(), value);

        tags = &tags[val_end..];
        tags = tags.strip_prefix(';').unwrap_or(tags);
    }

    Ok(())
}

fn unescape_tag_value(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }

        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => {}
        }
    }

    out
}

fn escape_tag_value(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            ';' => out.push_str("\\:"),
            ' ' => out.push_str("\\s"),
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
    }
    out
}

// <prefix> ::= <nick> ['!' <user>] ['@' <host>]
fn parse_prefix(msg: &mut WireMessage, prefix: &str) -> WireResult<()> {
    let nick_end = prefix.find(['!', '@']).unwrap_or(prefix.len());
    let nick = &prefix[..nick_end];
    if nick.is_empty() {
        return Err(WireError::Prefix(format!("empty nick in '{prefix}'")));
    }

    msg.nick = nick.to_string();
    let mut rest = &prefix[nick_end..];

    if let Some(after) = rest.strip_prefix('!') {
        let user_end = after.find('@').unwrap_or(after.len());
        msg.user = after[..user_end].to_string();
        rest = &after[user_end..];
    }

    if let Some(host) = rest.strip_prefix('@') {
        msg.host = host.to_string();
    }

    Ok(())
}

/// Format a frame; the inverse of [`parse`]. The terminating CR/LF is left
/// to the transport.
pub fn encode(msg: &WireMessage) -> String {
    let mut out = String::new();

    if !msg.tags.is_empty() {
        out.push('@');
        let mut keys: Vec<&String> = msg.tags.keys().collect();
        keys.sort();
        for (i, key) in keys.iter().enumerate() {
            if i > 0 {
                out.push(';');
            }
            out.push_str(key);
            let value = &msg.tags[*key];
            if !value.is_empty() {
                out.push('=');
                out.push_str(&escape_tag_value(value));
            }
        }
        out.push(' ');
    }

    if !msg.nick.is_empty() {
        out.push(':');
        out.push_str(&msg.nick);
        if !msg.user.is_empty() {
            out.push('!');
            out.push_str(&msg.user);
        }
        if !msg.host.is_empty() {
            out.push('@');
            out.push_str(&msg.host);
        }
        out.push(' ');
    }

    out.push_str(&msg.command);

    for (i, param) in msg.params.iter().enumerate() {
        out.push(' ');
        let last = i + 1 == msg.params.len();
        if last && (param.is_empty() || param.contains(' ') || param.starts_with(':')) {
            out.push(':');
        }
        out.push_str(param);
    }

    out
}
