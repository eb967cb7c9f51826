//! The embedded command-language interpreter.
//!
//! [`Interpreter`] owns everything the language can see: the user command
//! registry, global variables, and the permission table for builtin
//! commands. It is held in its own reader-writer cell by the store; the
//! evaluator runs with the exclusive borrow its caller already holds and
//! never re-locks.

pub mod ast;
pub mod command;
pub mod eval;
pub mod lexer;
pub mod parser;
pub mod types;
pub mod value;

pub use command::{Command, Macro};
pub use eval::CmdContext;
pub use value::Value;

use crate::codec::{tags, Persist, Reader, Writer};
use crate::error::CodecResult;
use crate::perms;
use std::collections::HashMap;
use tracing::info;

/// Builtin command names, reserved against user definition.
pub const BUILTIN_COMMANDS: &[&str] = &["def", "redef", "undef", "show", "chmod", "global", "eval"];

/// Interpreter state: commands, globals, builtin-command permissions.
#[derive(Debug)]
pub struct Interpreter {
    pub commands: HashMap<String, Command>,
    pub globals: HashMap<String, Value>,
    pub builtin_perms: HashMap<String, u64>,
}

impl Interpreter {
    pub fn new() -> Self {
        Self {
            commands: HashMap::new(),
            globals: HashMap::new(),
            builtin_perms: default_builtin_permissions(),
        }
    }

    /// Look up a user command. Lookups are case-sensitive.
    pub fn find_command(&self, name: &str) -> Option<&Command> {
        self.commands.get(name)
    }

    /// Remove a user command. Returns whether anything was removed.
    pub fn remove_command(&mut self, name: &str) -> bool {
        self.commands.remove(name).is_some()
    }

    /// Define a new global. Refuses builtin variable names, names starting
    /// with a digit, and redefinition.
    pub fn add_global(&mut self, name: &str, val: Value) -> Result<(), String> {
        if eval::is_builtin_var(name) || name.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(format!("'{name}' is a builtin global"));
        }

        if self.globals.contains_key(name) {
            return Err(format!("redefinition of global '{name}'"));
        }

        self.globals.insert(name.to_string(), val);
        info!(global = name, "added global");
        Ok(())
    }

    /// Parse and evaluate one expression.
    pub fn evaluate_expr(&mut self, src: &str, ctx: &CmdContext) -> Result<Value, String> {
        let expr = parser::parse_expr_str(src)?;
        eval::eval(self, ctx, &expr)
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether `name` is one of the reserved builtin commands.
pub fn is_builtin_command(name: &str) -> bool {
    BUILTIN_COMMANDS.contains(&name)
}

fn default_builtin_permissions() -> HashMap<String, u64> {
    let admin = perms::MODERATOR | perms::BROADCASTER | perms::OWNER | perms::TRUSTED;

    let mut out = HashMap::new();
    out.insert("def".to_string(), admin);
    out.insert("redef".to_string(), admin);
    out.insert("undef".to_string(), admin);
    out.insert("global".to_string(), admin);
    out.insert("chmod".to_string(), perms::BROADCASTER | perms::OWNER);
    out.insert("show".to_string(), 0);
    out.insert("eval".to_string(), 0);
    out
}

// commands are serialized before globals: a global may hold a function value
// that resolves by command name, so the registry must already be populated
// when globals are decoded.
impl Persist for Interpreter {
    fn write_to(&self, w: &mut Writer) {
        w.tag(tags::INTERP_STATE);
        w.write(&self.commands);
        w.write(&self.builtin_perms);
        w.write(&self.globals);
    }

    fn read_from(r: &mut Reader<'_>) -> CodecResult<Self> {
        r.expect_tag(tags::INTERP_STATE)?;

        let commands = r.read()?;
        let mut builtin_perms: HashMap<String, u64> = r.read()?;
        let globals = r.read()?;

        if builtin_perms.is_empty() {
            builtin_perms = default_builtin_permissions();
        }

        Ok(Self {
            commands,
            globals,
            builtin_perms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::types::Type;

    #[test]
    fn test_global_rules() {
        let mut interp = Interpreter::new();
        assert!(interp.add_global("x", Value::Int(1)).is_ok());
        assert!(interp.add_global("x", Value::Int(2)).is_err());
        assert!(interp.add_global("user", Value::Int(1)).is_err());
        assert!(interp.add_global("1abc", Value::Int(1)).is_err());
    }

    #[test]
    fn test_builtin_command_names_reserved() {
        for name in BUILTIN_COMMANDS {
            assert!(is_builtin_command(name));
        }
        assert!(!is_builtin_command("greet"));
    }

    #[test]
    fn test_state_roundtrip() {
        let mut interp = Interpreter::new();
        interp.commands.insert(
            "greet".to_string(),
            Command::Macro(Macro::new("greet", "Hello, $1!")),
        );
        interp.add_global("n", Value::Int(7)).unwrap();
        interp
            .add_global(
                "words",
                Value::List(Type::string(), vec![Value::of_string("hi")]),
            )
            .unwrap();
        interp.builtin_perms.insert("def".to_string(), 0x20);

        let mut w = Writer::new();
        w.write(&interp);
        let bytes = w.into_bytes();

        let mut r = Reader::new(&bytes);
        let back: Interpreter = r.read().unwrap();
        assert_eq!(r.remaining(), 0);

        assert!(matches!(
            back.find_command("greet"),
            Some(Command::Macro(m)) if m.code == vec!["Hello,".to_string(), "$1!".to_string()]
        ));
        assert_eq!(back.globals.get("n"), Some(&Value::Int(7)));
        assert_eq!(back.builtin_perms.get("def"), Some(&0x20));
    }
}
