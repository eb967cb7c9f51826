//! Commands: user-defined macros and native builtin functions.
//!
//! The registry proper lives on [`Interpreter`](crate::interp::Interpreter);
//! this module defines the command variants, macro code-word splitting, and
//! the static builtin function table (`int`, `str`) with cast-distance
//! overload resolution.

use crate::codec::{tags, Persist, Reader, Writer};
use crate::error::{CodecError, CodecResult};
use crate::interp::types::Type;
use crate::interp::value::Value;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// A named, permission-gated command.
#[derive(Debug, Clone)]
pub enum Command {
    /// User-defined macro.
    Macro(Macro),
    /// Native overload group (builtin functions share a name).
    Overloads(OverloadSet),
    /// A single native function.
    Builtin(BuiltinFn),
}

impl Command {
    pub fn name(&self) -> &str {
        match self {
            Command::Macro(m) => &m.name,
            Command::Overloads(s) => &s.name,
            Command::Builtin(f) => &f.name,
        }
    }

    pub fn permissions(&self) -> u64 {
        match self {
            Command::Macro(m) => m.permissions,
            _ => 0,
        }
    }

    pub fn set_permissions(&mut self, perms: u64) {
        if let Command::Macro(m) = self {
            m.permissions = perms;
        }
    }

    pub fn signature(&self) -> Arc<Type> {
        match self {
            Command::Macro(_) | Command::Overloads(_) => Type::macro_function(),
            Command::Builtin(f) => f.sig.clone(),
        }
    }
}

impl Persist for Command {
    fn write_to(&self, w: &mut Writer) {
        match self {
            Command::Macro(m) => m.write_to(w),
            // the registry only ever holds macros; natives live in the
            // static table and their tag stays reserved
            _ => unreachable!("native commands are never serialised"),
        }
    }

    fn read_from(r: &mut Reader<'_>) -> CodecResult<Self> {
        match r.peek_tag()? {
            tags::MACRO => Ok(Command::Macro(Macro::read_from(r)?)),
            tags::BUILTIN => Err(CodecError::Invalid(
                "native commands are not persisted".to_string(),
            )),
            found => Err(CodecError::TagMismatch {
                found,
                expected: tags::MACRO,
            }),
        }
    }
}

// ============================================================================
// Macros
// ============================================================================

/// A user macro: the body split into code words at definition time.
/// Expansion substitutes `$N` placeholders and evaluates `\`-prefixed words
/// as inline expressions.
#[derive(Debug, Clone)]
pub struct Macro {
    pub name: String,
    pub permissions: u64,
    pub code: Vec<String>,
}

impl Macro {
    pub fn new(name: impl Into<String>, body: &str) -> Self {
        Self {
            name: name.into(),
            permissions: 0,
            code: split_code_words(body),
        }
    }

    pub fn from_words(name: String, permissions: u64, code: Vec<String>) -> Self {
        Self {
            name,
            permissions,
            code,
        }
    }
}

impl Persist for Macro {
    fn write_to(&self, w: &mut Writer) {
        w.tag(tags::MACRO);
        w.write_str(&self.name);
        w.write(&self.permissions);
        w.write(&self.code);
    }

    fn read_from(r: &mut Reader<'_>) -> CodecResult<Self> {
        r.expect_tag(tags::MACRO)?;
        let name = r.read_str()?;
        let permissions = r.read()?;
        let code = r.read()?;
        Ok(Macro::from_words(name, permissions, code))
    }
}

/// Split a macro body into code words. Whitespace separates, except that a
/// word beginning with a single `\` extends through balanced brackets to the
/// next top-level space (an inline expression); `\\` introduces a literal
/// word starting with a backslash.
pub fn split_code_words(body: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = body.trim_matches([' ', '\t']);

    while !rest.is_empty() {
        let bytes = rest.as_bytes();
        let end = if bytes[0] == b'\\' && !rest.starts_with("\\\\") {
            let mut depth = 0i32;
            let mut idx = rest.len();
            for (i, &b) in bytes.iter().enumerate().skip(1) {
                match b {
                    b'(' | b'{' | b'[' => depth += 1,
                    b')' | b'}' | b']' => depth -= 1,
                    b' ' if depth == 0 => {
                        idx = i;
                        break;
                    }
                    _ => {}
                }
            }
            idx
        } else {
            rest.find(' ').unwrap_or(rest.len())
        };

        out.push(rest[..end].to_string());
        rest = rest[end..].trim_start_matches([' ', '\t']);
    }

    out
}

// ============================================================================
// Builtin functions
// ============================================================================

type NativeFn = fn(&[Value]) -> Result<Value, String>;

/// A native function with a declared signature.
#[derive(Clone)]
pub struct BuiltinFn {
    pub name: String,
    pub sig: Arc<Type>,
    pub run: NativeFn,
}

impl std::fmt::Debug for BuiltinFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltinFn")
            .field("name", &self.name)
            .field("sig", &self.sig.to_string())
            .finish_non_exhaustive()
    }
}

/// A named group of native functions dispatched by cast distance.
#[derive(Debug, Clone)]
pub struct OverloadSet {
    pub name: String,
    pub variants: Vec<BuiltinFn>,
}

impl OverloadSet {
    /// Pick the variant with the lowest total cast distance over the
    /// argument types. Ties go to the first declared variant.
    pub fn resolve(&self, args: &[Value]) -> Result<&BuiltinFn, String> {
        let mut best: Option<(&BuiltinFn, i32)> = None;

        for cand in &self.variants {
            let params = cand.sig.arg_types();
            if params.len() != args.len() {
                continue;
            }

            let mut cost = 0;
            let mut viable = true;
            for (arg, param) in args.iter().zip(params) {
                let d = arg.ty().cast_distance(param);
                if d == -1 {
                    viable = false;
                    break;
                }
                cost += d;
            }

            if viable && best.map_or(true, |(_, c)| cost < c) {
                best = Some((cand, cost));
            }
        }

        best.map(|(f, _)| f)
            .ok_or_else(|| format!("no matching function for call to '{}'", self.name))
    }

    /// Resolve, cast the arguments into the chosen signature, and run.
    pub fn call(&self, args: &[Value]) -> Result<Value, String> {
        let chosen = self.resolve(args)?;
        let params = chosen.sig.arg_types();

        let mut cast_args = Vec::with_capacity(args.len());
        for (arg, param) in args.iter().zip(params) {
            match arg.cast_to(param) {
                Some(v) => cast_args.push(v),
                None => {
                    return Err(format!(
                        "cannot cast '{}' to '{}' in call to '{}'",
                        arg.ty(),
                        param,
                        self.name
                    ))
                }
            }
        }

        (chosen.run)(&cast_args)
    }
}

static BUILTIN_FNS: OnceLock<HashMap<&'static str, Command>> = OnceLock::new();

/// Look up a builtin function group by name.
pub fn builtin_function(name: &str) -> Option<&'static Command> {
    BUILTIN_FNS.get_or_init(make_builtin_fns).get(name)
}

fn make_builtin_fns() -> HashMap<&'static str, Command> {
    let t_int = Type::integer;
    let t_str = Type::string;
    let t_dbl = Type::double;
    let t_chr = Type::character;
    let t_bool = Type::boolean;

    let fun = |ret: Arc<Type>, arg: Arc<Type>| Type::function(ret, vec![arg]);
    let variant = |name: &str, sig: Arc<Type>, run: NativeFn| BuiltinFn {
        name: name.to_string(),
        sig,
        run,
    };

    let int_set = OverloadSet {
        name: "int".to_string(),
        variants: vec![
            variant("int", fun(t_int(), t_int()), fn_int_from_int),
            variant("int", fun(t_int(), t_str()), fn_int_from_str),
            variant("int", fun(t_int(), t_dbl()), fn_int_from_dbl),
            variant("int", fun(t_int(), t_bool()), fn_int_from_bool),
            variant("int", fun(t_int(), t_chr()), fn_int_from_char),
        ],
    };

    let str_set = OverloadSet {
        name: "str".to_string(),
        variants: vec![
            variant("str", fun(t_str(), t_str()), fn_str_from_any),
            variant("str", fun(t_str(), t_int()), fn_str_from_any),
            variant("str", fun(t_str(), t_dbl()), fn_str_from_any),
            variant("str", fun(t_str(), t_bool()), fn_str_from_any),
            variant("str", fun(t_str(), t_chr()), fn_str_from_any),
            variant("str", fun(t_str(), Type::list(Type::void())), fn_str_from_any),
            variant(
                "str",
                fun(t_str(), Type::map(Type::void(), Type::void())),
                fn_str_from_any,
            ),
        ],
    };

    let mut out = HashMap::new();
    out.insert("int", Command::Overloads(int_set));
    out.insert("str", Command::Overloads(str_set));
    out
}

fn arg0<'a>(args: &'a [Value]) -> Result<&'a Value, String> {
    args.first().ok_or_else(|| "missing argument".to_string())
}

fn fn_int_from_int(args: &[Value]) -> Result<Value, String> {
    Ok(arg0(args)?.clone())
}

fn fn_int_from_str(args: &[Value]) -> Result<Value, String> {
    let s = arg0(args)?.raw_str();
    s.trim()
        .parse::<i64>()
        .map(Value::Int)
        .map_err(|_| format!("'{s}' is not an integer"))
}

fn fn_int_from_dbl(args: &[Value]) -> Result<Value, String> {
    match arg0(args)? {
        Value::Dbl(d) => Ok(Value::Int(*d as i64)),
        v => Err(format!("expected dbl, found '{}'", v.ty())),
    }
}

fn fn_int_from_bool(args: &[Value]) -> Result<Value, String> {
    match arg0(args)? {
        Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
        v => Err(format!("expected bool, found '{}'", v.ty())),
    }
}

fn fn_int_from_char(args: &[Value]) -> Result<Value, String> {
    match arg0(args)? {
        Value::Char(c) => Ok(Value::Int(*c as i64)),
        v => Err(format!("expected char, found '{}'", v.ty())),
    }
}

fn fn_str_from_any(args: &[Value]) -> Result<Value, String> {
    let v = arg0(args)?;
    if v.is_string() {
        Ok(v.clone())
    } else {
        Ok(Value::of_string(&v.str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_code_words() {
        assert_eq!(
            split_code_words("Hello, $1!"),
            vec!["Hello,".to_string(), "$1!".to_string()]
        );
        assert_eq!(split_code_words("  a   b  "), vec!["a", "b"]);
        assert!(split_code_words("").is_empty());
    }

    #[test]
    fn test_split_inline_expression_keeps_brackets() {
        assert_eq!(
            split_code_words(r"you rolled \(1 + 2) today"),
            vec!["you", "rolled", r"\(1 + 2)", "today"]
        );
        // escaped backslash words split on spaces like any other
        assert_eq!(
            split_code_words(r"\\not an expr"),
            vec![r"\\not", "an", "expr"]
        );
    }

    #[test]
    fn test_overload_resolution_prefers_exact() {
        let Some(Command::Overloads(set)) = builtin_function("int") else {
            panic!("int builtin missing");
        };

        let exact = set.resolve(&[Value::Int(1)]).unwrap();
        assert!(exact.sig.arg_types()[0].is_int());

        let dbl = set.resolve(&[Value::Dbl(1.5)]).unwrap();
        assert!(dbl.sig.arg_types()[0].is_dbl());

        assert!(set.resolve(&[Value::Int(1), Value::Int(2)]).is_err());
        assert!(set
            .resolve(&[Value::List(Type::integer(), vec![])])
            .is_err());
    }

    #[test]
    fn test_generic_placeholder_matches_lists() {
        let Some(Command::Overloads(set)) = builtin_function("str") else {
            panic!("str builtin missing");
        };

        // [int] casts into [void] at distance 2
        let v = Value::List(Type::integer(), vec![Value::Int(1), Value::Int(2)]);
        let out = set.call(&[v]).unwrap();
        assert_eq!(out.raw_str(), "[ 1, 2 ]");
    }

    #[test]
    fn test_int_conversions() {
        let Some(Command::Overloads(set)) = builtin_function("int") else {
            panic!("int builtin missing");
        };

        assert_eq!(set.call(&[Value::of_string("42")]).unwrap(), Value::Int(42));
        assert_eq!(set.call(&[Value::Dbl(3.9)]).unwrap(), Value::Int(3));
        assert_eq!(set.call(&[Value::Bool(true)]).unwrap(), Value::Int(1));
        assert_eq!(set.call(&[Value::Char('A')]).unwrap(), Value::Int(65));
        assert!(set.call(&[Value::of_string("nope")]).is_err());
    }

    #[test]
    fn test_macro_roundtrip() {
        let m = Macro::new("greet", "Hello, $1!");
        let cmd = Command::Macro(Macro {
            permissions: 0x21,
            ..m
        });

        let mut w = Writer::new();
        w.write(&cmd);
        let bytes = w.into_bytes();

        let mut r = Reader::new(&bytes);
        let back: Command = r.read().unwrap();
        match back {
            Command::Macro(m) => {
                assert_eq!(m.name, "greet");
                assert_eq!(m.permissions, 0x21);
                assert_eq!(m.code, vec!["Hello,".to_string(), "$1!".to_string()]);
            }
            other => panic!("expected macro, got {other:?}"),
        }
    }
}
