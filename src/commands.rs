//! Command dispatch: prefix handling, permission checks, the builtin
//! command set (`def`, `redef`, `undef`, `show`, `chmod`, `global`,
//! `eval`), and user macro execution.

use crate::channel::{Channel, Message};
use crate::db::Store;
use crate::interp::parser::parse_type_str;
use crate::interp::{self, eval, CmdContext, Command, Macro, Value};
use crate::perms;
use crate::util::bisect;
use tracing::{info, warn};

/// Dispatch a chat message. Returns true when the message carried the
/// command prefix (whether or not the command succeeded).
pub fn process_message(
    store: &Store,
    chan: &dyn Channel,
    caller_id: &str,
    caller_name: &str,
    message: &str,
) -> bool {
    let prefix = chan.command_prefix();
    if prefix.is_empty() {
        return false;
    }

    let Some(line) = message.strip_prefix(prefix) else {
        return false;
    };

    let line = line.trim();
    if line.is_empty() {
        return false;
    }

    let (cmd, args) = bisect(line, ' ');
    run_command(store, chan, caller_id, caller_name, cmd, args.trim());
    true
}

/// Run one named command with already-split arguments.
pub fn run_command(
    store: &Store,
    chan: &dyn Channel,
    caller_id: &str,
    caller_name: &str,
    cmd: &str,
    args: &str,
) {
    let user_perms = chan.user_permissions(caller_id);
    let ctx = CmdContext {
        caller_id: caller_id.to_string(),
        caller_name: caller_name.to_string(),
        channel_name: chan.name().to_string(),
        bot_username: chan.username().to_string(),
        args: args.split_whitespace().map(Value::of_string).collect(),
    };

    if interp::is_builtin_command(cmd) {
        let required = store.interp_read(|i| i.builtin_perms.get(cmd).copied().unwrap_or(0));
        if !perms::verify(required, user_perms) {
            warn!(
                user = caller_id,
                command = cmd,
                perms = user_perms,
                "insufficient permissions"
            );
            send(chan, "insufficient permissions");
            return;
        }

        run_builtin(store, chan, &ctx, cmd, args);
        return;
    }

    let found = store.interp_read(|i| {
        i.find_command(cmd).map(|c| match c {
            Command::Macro(m) => (m.permissions, m.code.clone()),
            other => (other.permissions(), Vec::new()),
        })
    });

    let Some((required, code)) = found else {
        if !chan.silent_interp_errors() {
            send(chan, &format!("'{cmd}' is not a command"));
        }
        return;
    };

    if !perms::verify(required, user_perms) {
        warn!(
            user = caller_id,
            command = cmd,
            perms = user_perms,
            "insufficient permissions"
        );
        send(chan, "insufficient permissions");
        return;
    }

    let result = store.interp_write(|i| eval::run_macro(i, &ctx, &code));
    match result {
        Ok(v) => {
            let msg = value_to_message(&v);
            if !msg.is_empty() {
                chan.send_message(&msg);
            }
        }
        Err(diag) => {
            if !chan.silent_interp_errors() {
                send(chan, &format!("error: {diag}"));
            }
        }
    }
}

/// Turn an interpreter result into an outbound message. String lists (the
/// macro result shape) become one fragment per piece.
pub fn value_to_message(v: &Value) -> Message {
    match v {
        Value::Void => Message::new(),
        Value::List(elem, pieces) if !elem.is_char() => {
            let mut msg = Message::new();
            for p in pieces {
                let text = p.raw_str();
                if !text.is_empty() {
                    msg = msg.add(text);
                }
            }
            msg
        }
        other => Message::from_text(other.raw_str()),
    }
}

fn send(chan: &dyn Channel, text: &str) {
    chan.send_message(&Message::from_text(text));
}

fn run_builtin(store: &Store, chan: &dyn Channel, ctx: &CmdContext, cmd: &str, args: &str) {
    match cmd {
        "def" => cmd_define(store, chan, args, false),
        "redef" => cmd_define(store, chan, args, true),
        "undef" => cmd_undef(store, chan, args),
        "show" => cmd_show(store, chan, args),
        "chmod" => cmd_chmod(store, chan, args),
        "global" => cmd_global(store, chan, args),
        "eval" => cmd_eval(store, chan, ctx, args),
        _ => {}
    }
}

fn cmd_define(store: &Store, chan: &dyn Channel, args: &str, redef: bool) {
    let which = if redef { "redef" } else { "def" };
    let (name, body) = bisect(args, ' ');
    let body = body.trim();

    if name.is_empty() {
        return send(chan, &format!("not enough arguments to '{which}'"));
    }
    if body.is_empty() {
        return send(chan, &format!("'{which}' expansion cannot be empty"));
    }
    if interp::is_builtin_command(name) {
        return send(chan, &format!("'{name}' is reserved"));
    }

    let result = store.interp_write(|i| {
        let exists = i.find_command(name).is_some();
        if exists && !redef {
            return Err(format!("'{name}' is already defined"));
        }
        if !exists && redef {
            return Err(format!("'{name}' does not exist"));
        }

        i.commands
            .insert(name.to_string(), Command::Macro(Macro::new(name, body)));
        Ok(())
    });

    match result {
        Ok(()) => {
            info!(command = name, redef, "command defined");
            send(chan, &format!("{}defined '{name}'", if redef { "re" } else { "" }));
        }
        Err(e) => send(chan, &e),
    }
}

fn cmd_undef(store: &Store, chan: &dyn Channel, args: &str) {
    if args.is_empty() || args.contains(' ') {
        return send(chan, "'undef' takes exactly 1 argument");
    }

    let removed = store.interp_write(|i| i.remove_command(args));
    if removed {
        send(chan, &format!("removed '{args}'"));
    } else {
        send(chan, &format!("'{args}' does not exist"));
    }
}

fn cmd_show(store: &Store, chan: &dyn Channel, args: &str) {
    if args.is_empty() || args.contains(' ') {
        return send(chan, "'show' takes exactly 1 argument");
    }

    if interp::is_builtin_command(args) {
        return send(chan, &format!("'{args}' is a builtin command"));
    }

    let code = store.interp_read(|i| match i.find_command(args) {
        Some(Command::Macro(m)) => Some(m.code.clone()),
        _ => None,
    });

    match code {
        Some(code) => {
            let mut msg = Message::from_text(format!("'{args}' is defined as:"));
            for word in code {
                msg = msg.add(word);
            }
            chan.send_message(&msg);
        }
        None => send(chan, &format!("'{args}' does not exist")),
    }
}

fn cmd_chmod(store: &Store, chan: &dyn Channel, args: &str) {
    let (name, perm_str) = bisect(args, ' ');
    let perm_str = perm_str.trim();

    if name.is_empty() || perm_str.is_empty() {
        return send(chan, "not enough arguments to 'chmod'");
    }

    let Ok(perm) = u64::from_str_radix(perm_str.trim_start_matches("0x"), 16) else {
        return send(chan, &format!("invalid permission string '{perm_str}'"));
    };

    let changed = store.interp_write(|i| {
        if interp::is_builtin_command(name) {
            i.builtin_perms.insert(name.to_string(), perm);
            return true;
        }

        match i.commands.get_mut(name) {
            Some(cmd) => {
                cmd.set_permissions(perm);
                true
            }
            None => false,
        }
    });

    if changed {
        send(
            chan,
            &format!("permissions for '{name}' changed to {perm:x}"),
        );
    } else {
        send(chan, &format!("'{name}' does not exist"));
    }
}

fn cmd_global(store: &Store, chan: &dyn Channel, args: &str) {
    let (name, type_str) = bisect(args, ' ');
    let type_str = type_str.trim();

    if name.is_empty() || type_str.is_empty() {
        return send(chan, "not enough arguments to 'global'");
    }

    let ty = match parse_type_str(type_str) {
        Ok(ty) => ty,
        Err(_) => return send(chan, &format!("invalid type '{type_str}'")),
    };

    let result = store.interp_write(|i| i.add_global(name, Value::default_of(&ty)));
    match result {
        Ok(()) => send(chan, &format!("added global '{name}' with type '{ty}'")),
        Err(e) => send(chan, &e),
    }
}

fn cmd_eval(store: &Store, chan: &dyn Channel, ctx: &CmdContext, args: &str) {
    if args.is_empty() {
        return send(chan, "not enough arguments to 'eval'");
    }

    let result = store.interp_write(|i| i.evaluate_expr(args, ctx));
    match result {
        Ok(Value::Void) => {}
        Ok(v) => {
            let msg = value_to_message(&v);
            if !msg.is_empty() {
                chan.send_message(&msg);
            }
        }
        Err(diag) => {
            if !chan.silent_interp_errors() {
                send(chan, &format!("error: {diag}"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Arc;

    struct MockChannel {
        perms: HashMap<String, u64>,
        silent: bool,
        sent: RefCell<Vec<String>>,
    }

    impl MockChannel {
        fn new() -> Self {
            Self {
                perms: HashMap::new(),
                silent: false,
                sent: RefCell::new(Vec::new()),
            }
        }

        fn with_user(mut self, id: &str, mask: u64) -> Self {
            self.perms.insert(id.to_string(), mask);
            self
        }

        fn last(&self) -> String {
            self.sent.borrow().last().cloned().unwrap_or_default()
        }

        fn count(&self) -> usize {
            self.sent.borrow().len()
        }
    }

    impl Channel for MockChannel {
        fn name(&self) -> &str {
            "testchan"
        }

        fn username(&self) -> &str {
            "ikura"
        }

        fn command_prefix(&self) -> &str {
            "!"
        }

        fn silent_interp_errors(&self) -> bool {
            self.silent
        }

        fn respond_to_pings(&self) -> bool {
            false
        }

        fn lurking(&self) -> bool {
            false
        }

        fn user_permissions(&self, user_id: &str) -> u64 {
            self.perms
                .get(user_id)
                .copied()
                .unwrap_or(crate::perms::EVERYONE)
        }

        fn send_message(&self, msg: &Message) {
            self.sent.borrow_mut().push(msg.flatten());
        }
    }

    fn test_store(name: &str) -> Arc<Store> {
        let mut p = PathBuf::from(std::env::temp_dir());
        p.push(format!("ikura-cmd-{name}-{}", std::process::id()));
        let _ = std::fs::remove_file(&p);
        Store::load(p, true).unwrap()
    }

    fn owner() -> u64 {
        perms::OWNER | perms::EVERYONE
    }

    #[test]
    fn test_define_and_expand_macro() {
        let store = test_store("greet");
        let chan = MockChannel::new().with_user("boss", owner());

        assert!(process_message(
            &store, &chan, "boss", "Boss", "!def greet Hello, $1!"
        ));
        assert_eq!(chan.last(), "defined 'greet'");

        assert!(process_message(&store, &chan, "boss", "Boss", "!greet World"));
        assert_eq!(chan.last(), "Hello, World!");
    }

    #[test]
    fn test_eval_hex_and_binary_literals() {
        let store = test_store("eval");
        let chan = MockChannel::new();

        process_message(&store, &chan, "u", "U", "!eval 0x10 + 0b10");
        assert_eq!(chan.last(), "18");
    }

    #[test]
    fn test_chmod_gates_execution() {
        let store = test_store("chmod");
        let chan = MockChannel::new()
            .with_user("boss", owner())
            .with_user("everyone", 0x1)
            .with_user("trusted", 0x2);

        process_message(&store, &chan, "boss", "Boss", "!def greet hi $user");
        process_message(&store, &chan, "boss", "Boss", "!chmod greet 1");
        assert_eq!(chan.last(), "permissions for 'greet' changed to 1");

        process_message(&store, &chan, "everyone", "Every1", "!greet x");
        assert_eq!(chan.last(), "hi Every1");

        process_message(&store, &chan, "trusted", "Trusted", "!greet x");
        assert_eq!(chan.last(), "insufficient permissions");
    }

    #[test]
    fn test_def_refuses_overwrite_and_reserved_names() {
        let store = test_store("def-rules");
        let chan = MockChannel::new().with_user("boss", owner());

        process_message(&store, &chan, "boss", "Boss", "!def x one");
        process_message(&store, &chan, "boss", "Boss", "!def x two");
        assert_eq!(chan.last(), "'x' is already defined");

        process_message(&store, &chan, "boss", "Boss", "!def eval nope");
        assert_eq!(chan.last(), "'eval' is reserved");

        process_message(&store, &chan, "boss", "Boss", "!redef y body");
        assert_eq!(chan.last(), "'y' does not exist");

        process_message(&store, &chan, "boss", "Boss", "!redef x two words");
        assert_eq!(chan.last(), "redefined 'x'");
        process_message(&store, &chan, "boss", "Boss", "!x");
        assert_eq!(chan.last(), "two words");
    }

    #[test]
    fn test_undef_and_show() {
        let store = test_store("undef");
        let chan = MockChannel::new().with_user("boss", owner());

        process_message(&store, &chan, "boss", "Boss", "!def x says $0");
        process_message(&store, &chan, "boss", "Boss", "!show x");
        assert_eq!(chan.last(), "'x' is defined as: says $0");

        process_message(&store, &chan, "boss", "Boss", "!undef x");
        assert_eq!(chan.last(), "removed 'x'");
        process_message(&store, &chan, "boss", "Boss", "!undef x");
        assert_eq!(chan.last(), "'x' does not exist");

        process_message(&store, &chan, "boss", "Boss", "!show eval");
        assert_eq!(chan.last(), "'eval' is a builtin command");
    }

    #[test]
    fn test_global_and_stateful_eval() {
        let store = test_store("global");
        let chan = MockChannel::new().with_user("boss", owner());

        process_message(&store, &chan, "boss", "Boss", "!global counter int");
        assert_eq!(chan.last(), "added global 'counter' with type 'int'");

        process_message(&store, &chan, "boss", "Boss", "!eval counter += 5");
        process_message(&store, &chan, "boss", "Boss", "!eval counter * 2");
        assert_eq!(chan.last(), "10");

        process_message(&store, &chan, "boss", "Boss", "!global bad frobnicate");
        assert_eq!(chan.last(), "invalid type 'frobnicate'");
    }

    #[test]
    fn test_permission_denied_for_builtin() {
        let store = test_store("denied");
        let chan = MockChannel::new().with_user("pleb", perms::EVERYONE);

        process_message(&store, &chan, "pleb", "Pleb", "!def nope body");
        assert_eq!(chan.last(), "insufficient permissions");
    }

    #[test]
    fn test_interp_errors_reach_chat_unless_silent() {
        let store = test_store("errors");
        let chan = MockChannel::new();
        process_message(&store, &chan, "u", "U", "!eval 1 +");
        assert!(chan.last().starts_with("error: "), "got: {}", chan.last());

        let store = test_store("errors-silent");
        let mut chan = MockChannel::new();
        chan.silent = true;
        process_message(&store, &chan, "u", "U", "!eval 1 +");
        assert_eq!(chan.count(), 0);
    }

    #[test]
    fn test_non_prefixed_messages_are_not_commands() {
        let store = test_store("prefix");
        let chan = MockChannel::new();

        assert!(!process_message(&store, &chan, "u", "U", "just chatting"));
        assert!(!process_message(&store, &chan, "u", "U", "!"));
        assert_eq!(chan.count(), 0);
    }

    #[test]
    fn test_inline_expression_words() {
        let store = test_store("inline");
        let chan = MockChannel::new().with_user("boss", owner());

        process_message(&store, &chan, "boss", "Boss", r"!def roll you rolled \(2 ** 6) points");
        process_message(&store, &chan, "boss", "Boss", "!roll");
        assert_eq!(chan.last(), "you rolled 64 points");
    }

    #[test]
    fn test_pipeline_in_eval() {
        let store = test_store("pipeline");
        let chan = MockChannel::new();

        process_message(&store, &chan, "u", "U", "!eval 3.9 |> int |> str");
        assert_eq!(chan.last(), "3");
    }
}
