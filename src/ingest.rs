//! The inbound message pipeline.
//!
//! For every PRIVMSG: filter self and ignored users, fold the wire tags
//! into per-channel credentials, resolve emote spans, dispatch commands,
//! feed the markov trainer, and append to the message log.

use crate::channel::{Channel, Message};
use crate::commands;
use crate::config::BotConfig;
use crate::db::{LoggedMessage, Store, TwitchUser, UserCredentials};
use crate::markov::{self, MarkovWorker};
use crate::perms;
use crate::util::{bisect, codepoint_byte_offsets, split_outbound, timestamp_ms};
use crate::wire::WireMessage;
use tracing::{debug, warn};

/// Invisible tag appended when the same message is sent twice in a row, so
/// the platform's duplicate filter does not eat it.
pub const DEDUPE_SUFFIX: &str = " \u{e0000}";

/// Route one raw inbound line. PRIVMSG goes through the full pipeline;
/// PING gets a PONG back. Returns any frames the transport should send.
pub fn process_frame(
    store: &Store,
    worker: &MarkovWorker,
    config: &BotConfig,
    chan: &dyn Channel,
    line: &str,
) -> Vec<WireMessage> {
    let msg = match crate::wire::parse(line) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(error = %e, "discarding invalid frame");
            return Vec::new();
        }
    };

    match msg.command.as_str() {
        "PING" => {
            let mut pong = WireMessage::new("PONG");
            pong.params = msg.params;
            vec![pong]
        }
        "PRIVMSG" => {
            process_privmsg(store, worker, config, chan, &msg);
            Vec::new()
        }
        other => {
            debug!(command = other, "unhandled frame");
            Vec::new()
        }
    }
}

/// Handle one parsed PRIVMSG-equivalent frame.
pub fn process_privmsg(
    store: &Store,
    worker: &MarkovWorker,
    config: &BotConfig,
    chan: &dyn Channel,
    msg: &WireMessage,
) {
    if msg.params.len() < 2 {
        warn!(command = %msg.command, "discarding malformed privmsg");
        return;
    }

    let nick = msg.nick.as_str();
    let text = msg.params[1].as_str();

    if nick == chan.username() {
        return;
    }
    if config.twitch.is_user_ignored(nick) {
        debug!(user = nick, "ignored user");
        return;
    }

    let user_id = msg.tag("user-id").filter(|s| !s.is_empty()).unwrap_or(nick);
    let display = msg
        .tag("display-name")
        .filter(|s| !s.is_empty())
        .unwrap_or(nick);

    let mask = badge_permissions(
        msg.tag("badges").unwrap_or(""),
        !config.owner.is_empty() && user_id == config.owner,
    );
    let months = badge_months(msg.tag("badge-info").unwrap_or(""));

    // the stored record's id always matches its key
    store.write(|db| {
        let data = db.twitch.channels.entry(chan.name().to_string()).or_default();
        data.users.insert(
            user_id.to_string(),
            TwitchUser {
                id: user_id.to_string(),
                username: nick.to_string(),
                displayname: display.to_string(),
            },
        );
        data.credentials.insert(
            user_id.to_string(),
            UserCredentials {
                permissions: mask,
                subscribed_months: months,
            },
        );
    });

    let emotes = parse_emote_spans(msg.tag("emotes").unwrap_or(""), text);

    let mut ran = false;
    if !chan.lurking() {
        ran = commands::process_message(store, chan, user_id, display, text);
    }

    if !ran && chan.respond_to_pings() && text.contains(chan.username()) {
        let reply = store.markov_read(|m| markov::generate(m, &config.markov, &[]));
        if !reply.is_empty() {
            chan.send_message(&reply);
        }
    }

    if !ran {
        worker.feed(text, emotes.clone());
    }

    store.write(|db| {
        let span = db.twitch.message_log.store_text(text);
        db.twitch.message_log.messages.push(LoggedMessage {
            timestamp: timestamp_ms(),
            user_id: user_id.to_string(),
            username: nick.to_string(),
            channel: chan.name().to_string(),
            text: span,
            emotes: emotes
                .iter()
                .map(|&(s, e)| crate::codec::RelStr::new(s as u64, (e - s) as u64))
                .collect(),
            is_command: ran,
        });
    });
}

/// Map wire badges onto permission flags. Everyone gets EVERYONE; the
/// configured owner additionally gets OWNER.
pub fn badge_permissions(badges: &str, is_owner: bool) -> u64 {
    let mut mask = perms::EVERYONE;

    for badge in badges.split(',') {
        let (name, _count) = bisect(badge, '/');
        match name {
            "subscriber" | "founder" => mask |= perms::SUBSCRIBER,
            "vip" => mask |= perms::VIP,
            "moderator" => mask |= perms::MODERATOR,
            "broadcaster" => mask |= perms::BROADCASTER,
            _ => {}
        }
    }

    if is_owner {
        mask |= perms::OWNER;
    }

    mask
}

/// Subscription months from the `badge-info` tag (`subscriber/16`).
pub fn badge_months(badge_info: &str) -> u64 {
    for entry in badge_info.split(',') {
        let (name, count) = bisect(entry, '/');
        if name == "subscriber" || name == "founder" {
            return count.parse().unwrap_or(0);
        }
    }
    0
}

/// Resolve the `emotes` wire tag (`ID:a-b,c-d/ID:e-f`, codepoint-inclusive
/// ranges) into byte spans over `text`, using parallel UTF-8/UTF-32 index
/// maps. Out-of-range entries are dropped.
pub fn parse_emote_spans(tag: &str, text: &str) -> Vec<(usize, usize)> {
    if tag.is_empty() {
        return Vec::new();
    }

    let offsets = codepoint_byte_offsets(text);
    let cp_count = offsets.len() - 1;
    let mut out = Vec::new();

    for group in tag.split('/') {
        let (_id, ranges) = bisect(group, ':');
        for range in ranges.split(',') {
            if range.is_empty() {
                continue;
            }

            let (a, b) = bisect(range, '-');
            let (Ok(start), Ok(end)) = (a.parse::<usize>(), b.parse::<usize>()) else {
                debug!(range, "bad emote range");
                continue;
            };

            if end < start || end >= cp_count {
                debug!(range, "emote range out of bounds");
                continue;
            }

            out.push((offsets[start], offsets[end + 1]));
        }
    }

    out.sort_unstable();
    out
}

/// Render an outbound message as PRIVMSG frames, splitting past the
/// 500-codepoint limit.
pub fn outbound_frames(channel_name: &str, msg: &Message) -> Vec<WireMessage> {
    split_outbound(&msg.flatten())
        .into_iter()
        .map(|chunk| {
            let mut frame = WireMessage::new("PRIVMSG");
            frame.params = vec![format!("#{channel_name}"), chunk];
            frame
        })
        .collect()
}

/// Append the invisible suffix when `text` repeats the previous send.
pub fn dedupe_outbound(text: &str, last_sent: &str) -> String {
    if text == last_sent {
        format!("{text}{DEDUPE_SUFFIX}")
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markov::MarkovWorker;
    use crate::wire;
    use std::cell::RefCell;
    use std::path::PathBuf;
    use std::sync::Arc;

    struct TestChannel {
        lurk: bool,
        sent: RefCell<Vec<String>>,
    }

    impl TestChannel {
        fn new() -> Self {
            Self {
                lurk: false,
                sent: RefCell::new(Vec::new()),
            }
        }
    }

    impl Channel for TestChannel {
        fn name(&self) -> &str {
            "ponkochan"
        }

        fn username(&self) -> &str {
            "ikura"
        }

        fn command_prefix(&self) -> &str {
            "!"
        }

        fn silent_interp_errors(&self) -> bool {
            false
        }

        fn respond_to_pings(&self) -> bool {
            false
        }

        fn lurking(&self) -> bool {
            self.lurk
        }

        fn user_permissions(&self, _user_id: &str) -> u64 {
            crate::perms::EVERYONE
        }

        fn send_message(&self, msg: &Message) {
            self.sent.borrow_mut().push(msg.flatten());
        }
    }

    fn test_store(name: &str) -> Arc<Store> {
        let mut p = PathBuf::from(std::env::temp_dir());
        p.push(format!("ikura-ingest-{name}-{}", std::process::id()));
        let _ = std::fs::remove_file(&p);
        Store::load(p, true).unwrap()
    }

    #[test]
    fn test_badge_permissions() {
        assert_eq!(badge_permissions("", false), perms::EVERYONE);
        assert_eq!(
            badge_permissions("subscriber/12", false),
            perms::EVERYONE | perms::SUBSCRIBER
        );
        assert_eq!(
            badge_permissions("founder/0,vip/1", false),
            perms::EVERYONE | perms::SUBSCRIBER | perms::VIP
        );
        assert_eq!(
            badge_permissions("moderator/1", false),
            perms::EVERYONE | perms::MODERATOR
        );
        assert_eq!(
            badge_permissions("broadcaster/1", true),
            perms::EVERYONE | perms::BROADCASTER | perms::OWNER
        );
    }

    #[test]
    fn test_badge_months() {
        assert_eq!(badge_months("subscriber/16"), 16);
        assert_eq!(badge_months("predictions/blue-1,subscriber/3"), 3);
        assert_eq!(badge_months(""), 0);
    }

    #[test]
    fn test_emote_spans_use_codepoint_indices() {
        // é is two bytes; the emote range is in codepoints
        let text = "éé Kappa x";
        let spans = parse_emote_spans("25:3-7", text);
        assert_eq!(spans, vec![(5, 10)]);
        assert_eq!(&text[5..10], "Kappa");
    }

    #[test]
    fn test_emote_spans_multiple_and_invalid() {
        let text = "a Kappa b Kappa";
        let spans = parse_emote_spans("25:2-6,10-14", text);
        assert_eq!(spans, vec![(2, 7), (10, 15)]);

        assert!(parse_emote_spans("25:90-95", text).is_empty());
        assert!(parse_emote_spans("25:5-2", text).is_empty());
        assert!(parse_emote_spans("", text).is_empty());
    }

    #[test]
    fn test_privmsg_updates_credentials_and_log() {
        let store = test_store("creds");
        let worker = MarkovWorker::spawn(Arc::clone(&store));
        let config = BotConfig::default();
        let chan = TestChannel::new();

        let msg = wire::parse(
            "@badges=moderator/1;badge-info=subscriber/7;display-name=Ponko;user-id=99 \
             :ponko!ponko@ponko.tmi.twitch.tv PRIVMSG #ponkochan :hello hello there",
        )
        .unwrap();

        process_privmsg(&store, &worker, &config, &chan, &msg);

        store.read(|db| {
            let data = &db.twitch.channels["ponkochan"];
            assert_eq!(data.users["99"].id, "99");
            assert_eq!(data.users["99"].displayname, "Ponko");
            assert_ne!(data.credentials["99"].permissions & perms::MODERATOR, 0);
            assert_eq!(data.credentials["99"].subscribed_months, 7);

            let logged = &db.twitch.message_log.messages[0];
            assert!(!logged.is_command);
            assert_eq!(
                db.twitch.message_log.text_of(logged),
                Some("hello hello there")
            );
        });

        worker.shutdown();
    }

    #[test]
    fn test_privmsg_runs_commands_and_flags_log() {
        let store = test_store("command");
        let worker = MarkovWorker::spawn(Arc::clone(&store));
        let config = BotConfig::default();
        let chan = TestChannel::new();

        let msg = wire::parse(":u!u@h PRIVMSG #ponkochan :!eval 1 + 1").unwrap();
        process_privmsg(&store, &worker, &config, &chan, &msg);

        assert_eq!(chan.sent.borrow().as_slice(), &["2".to_string()]);
        store.read(|db| {
            assert!(db.twitch.message_log.messages[0].is_command);
        });

        worker.shutdown();
    }

    #[test]
    fn test_lurking_channel_never_runs_commands() {
        let store = test_store("lurk");
        let worker = MarkovWorker::spawn(Arc::clone(&store));
        let config = BotConfig::default();
        let mut chan = TestChannel::new();
        chan.lurk = true;

        let msg = wire::parse(":u!u@h PRIVMSG #ponkochan :!eval 1 + 1").unwrap();
        process_privmsg(&store, &worker, &config, &chan, &msg);

        assert!(chan.sent.borrow().is_empty());
        worker.shutdown();
    }

    #[test]
    fn test_self_and_ignored_messages_dropped() {
        let store = test_store("ignored");
        let worker = MarkovWorker::spawn(Arc::clone(&store));
        let mut config = BotConfig::default();
        config.twitch.ignored_users.push("spambot".to_string());
        let chan = TestChannel::new();

        let own = wire::parse(":ikura!ikura@h PRIVMSG #ponkochan :hi").unwrap();
        process_privmsg(&store, &worker, &config, &chan, &own);

        let spam = wire::parse(":spambot!s@h PRIVMSG #ponkochan :buy followers").unwrap();
        process_privmsg(&store, &worker, &config, &chan, &spam);

        store.read(|db| assert!(db.twitch.message_log.messages.is_empty()));
        worker.shutdown();
    }

    #[test]
    fn test_ping_gets_pong() {
        let store = test_store("ping");
        let worker = MarkovWorker::spawn(Arc::clone(&store));
        let config = BotConfig::default();
        let chan = TestChannel::new();

        let replies = process_frame(&store, &worker, &config, &chan, "PING :tmi.twitch.tv");
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].command, "PONG");
        assert_eq!(replies[0].params, vec!["tmi.twitch.tv".to_string()]);

        // a prefix with no command is rejected by the wire parser
        assert!(process_frame(&store, &worker, &config, &chan, ":nick!user@host").is_empty());
        worker.shutdown();
    }

    #[test]
    fn test_outbound_frames_split_long_messages() {
        let word = "x".repeat(400);
        let msg = Message::new().add(word.clone()).add(word.clone());
        let frames = outbound_frames("chan", &msg);

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].command, "PRIVMSG");
        assert_eq!(frames[0].params[0], "#chan");
        assert_eq!(frames[0].params[1], word);
    }

    #[test]
    fn test_dedupe_suffix() {
        assert_eq!(dedupe_outbound("hi", "hello"), "hi");
        assert_eq!(dedupe_outbound("hi", "hi"), format!("hi{DEDUPE_SUFFIX}"));
    }
}
