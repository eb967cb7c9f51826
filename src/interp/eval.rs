//! Tree-walking evaluator for the command language.
//!
//! Operators are overloaded over the runtime value set; assignment resolves
//! its target as a place (a global plus a subscript path) and writes through
//! the interpreter's global table.

use crate::interp::ast::Expr;
use crate::interp::command::{builtin_function, Command};
use crate::interp::lexer::TokenKind;
use crate::interp::parser::parse_expr_str;
use crate::interp::types::Type;
use crate::interp::value::Value;
use crate::interp::Interpreter;

/// Everything a command invocation knows about its caller.
#[derive(Debug, Clone, Default)]
pub struct CmdContext {
    pub caller_id: String,
    pub caller_name: String,
    pub channel_name: String,
    pub bot_username: String,
    /// invocation arguments; `$1` is the first
    pub args: Vec<Value>,
}

impl CmdContext {
    fn with_args(&self, args: Vec<Value>) -> CmdContext {
        CmdContext {
            args,
            ..self.clone()
        }
    }
}

const BUILTIN_VARS: &[&str] = &["user", "self", "channel", "args"];

/// Names that resolve without `$` before user globals are consulted.
pub fn is_builtin_var(name: &str) -> bool {
    BUILTIN_VARS.contains(&name)
}

/// Evaluate an expression tree.
pub fn eval(interp: &mut Interpreter, ctx: &CmdContext, expr: &Expr) -> Result<Value, String> {
    match expr {
        Expr::Int(v) => Ok(Value::Int(*v)),
        Expr::Dbl(v) => Ok(Value::Dbl(*v)),
        Expr::Bool(v) => Ok(Value::Bool(*v)),
        Expr::Char(c) => Ok(Value::Char(*c)),
        Expr::Str(s) => Ok(Value::of_string(s)),

        Expr::List(elems) => {
            if elems.is_empty() {
                return Ok(Value::List(Type::void(), Vec::new()));
            }

            let mut vals = Vec::with_capacity(elems.len());
            for e in elems {
                vals.push(eval(interp, ctx, e)?);
            }

            let elem_ty = vals[0].ty();
            for v in &vals[1..] {
                if !v.ty().is_same(&elem_ty) {
                    return Err(format!(
                        "conflicting types in list -- '{}' and '{}'",
                        elem_ty,
                        v.ty()
                    ));
                }
            }

            Ok(Value::List(elem_ty, vals))
        }

        Expr::Var(name) => resolve_var(interp, ctx, name),

        Expr::Unary { op, op_str, expr } => {
            let v = eval(interp, ctx, expr)?;
            eval_unary(*op, op_str, v)
        }

        Expr::Binary { op, op_str, lhs, rhs } => {
            // logical operators short-circuit
            if *op == TokenKind::LogicalAnd || *op == TokenKind::LogicalOr {
                return eval_logical(interp, ctx, *op, op_str, lhs, rhs);
            }

            let l = eval(interp, ctx, lhs)?;
            let r = eval(interp, ctx, rhs)?;
            binop(*op, op_str, l, r)
        }

        Expr::Assign {
            op,
            op_str,
            target,
            value,
        } => eval_assign(interp, ctx, *op, op_str, target, value),

        Expr::Ternary {
            cond,
            then,
            otherwise,
        } => {
            let c = eval(interp, ctx, cond)?;
            match c {
                Value::Bool(true) => eval(interp, ctx, then),
                Value::Bool(false) => eval(interp, ctx, otherwise),
                other => Err(format!(
                    "invalid use of ?: with type '{}' as first operand",
                    other.ty()
                )),
            }
        }

        Expr::Compare { operands, ops } => {
            if operands.len() != ops.len() + 1 || operands.len() < 2 {
                return Err("operand count mismatch".to_string());
            }

            // a < b < c behaves as (a < b) && (b < c)
            for (i, (op, op_str)) in ops.iter().enumerate() {
                let l = eval(interp, ctx, &operands[i])?;
                let r = eval(interp, ctx, &operands[i + 1])?;
                if !compare_values(*op, op_str, &l, &r)? {
                    return Ok(Value::Bool(false));
                }
            }

            Ok(Value::Bool(true))
        }

        Expr::Index { base, index } => {
            let b = eval(interp, ctx, base)?;
            let i = eval(interp, ctx, index)?;
            eval_index(&b, &i)
        }

        Expr::Slice { base, start, end } => {
            let b = eval(interp, ctx, base)?;
            let s = match start {
                Some(e) => Some(eval(interp, ctx, e)?),
                None => None,
            };
            let e = match end {
                Some(x) => Some(eval(interp, ctx, x)?),
                None => None,
            };
            eval_slice(&b, s, e)
        }

        Expr::Call { callee, args } => {
            // list method calls: xs.len(), xs.append(v)
            if let Expr::Dot { lhs, rhs } = callee.as_ref() {
                if let Expr::Var(method) = rhs.as_ref() {
                    return eval_method(interp, ctx, lhs, method, args);
                }
            }

            let target = eval(interp, ctx, callee)?;
            let Value::Func(name, _) = target else {
                return Err(format!("type '{}' is not callable", target.ty()));
            };

            let mut arg_vals = Vec::with_capacity(args.len());
            for a in args {
                arg_vals.push(eval(interp, ctx, a)?);
            }

            call_function(interp, ctx, &name, arg_vals)
        }

        Expr::Pipeline { lhs, rhs } => {
            // x |> f  is  f(x); chains associate leftward
            let v = eval(interp, ctx, lhs)?;
            let target = eval(interp, ctx, rhs)?;
            let Value::Func(name, _) = target else {
                return Err(format!("type '{}' is not callable", target.ty()));
            };

            call_function(interp, ctx, &name, vec![v])
        }

        Expr::Dot { lhs, .. } => Err(format!(
            "invalid '.' on expression '{lhs}' (only list methods are supported)"
        )),
    }
}

/// Call a command or builtin function by name.
pub fn call_function(
    interp: &mut Interpreter,
    ctx: &CmdContext,
    name: &str,
    args: Vec<Value>,
) -> Result<Value, String> {
    if let Some(cmd) = builtin_function(name) {
        return match cmd {
            Command::Overloads(set) => set.call(&args),
            Command::Builtin(f) => (f.run)(&args),
            Command::Macro(_) => Err(format!("'{name}' is not callable")),
        };
    }

    let code = match interp.find_command(name) {
        Some(Command::Macro(m)) => m.code.clone(),
        Some(_) => return Err(format!("'{name}' is not callable")),
        None => return Err(format!("'{name}' is not defined")),
    };

    // macros take strings in and give strings out
    let string_args = args
        .iter()
        .map(|a| Value::of_string(&a.raw_str()))
        .collect();

    run_macro(interp, &ctx.with_args(string_args), &code)
}

/// Expand and evaluate a macro body, producing a list of string pieces.
pub fn run_macro(
    interp: &mut Interpreter,
    ctx: &CmdContext,
    code: &[String],
) -> Result<Value, String> {
    let mut pieces = Vec::new();

    for word in code {
        if word.is_empty() {
            continue;
        }

        if let Some(rest) = word.strip_prefix("\\\\") {
            pieces.push(Value::of_string(&format!("\\{rest}")));
        } else if let Some(rest) = word.strip_prefix('\\') {
            let expr = parse_expr_str(rest)?;
            let v = eval(interp, ctx, &expr)?;
            pieces.push(Value::of_string(&v.raw_str()));
        } else if let Some(rest) = word.strip_prefix('$') {
            pieces.push(Value::of_string(&expand_argument(interp, ctx, rest)?));
        } else {
            pieces.push(Value::of_string(word));
        }
    }

    Ok(Value::List(Type::string(), pieces))
}

/// Expand a `$`-word: `$0` joins every argument, `$N` is the N-th (1-based),
/// `$name` resolves a builtin variable. Any non-name suffix is kept, so
/// `$1!` expands to the first argument followed by `!`.
fn expand_argument(
    interp: &mut Interpreter,
    ctx: &CmdContext,
    rest: &str,
) -> Result<String, String> {
    if rest.starts_with(|c: char| c.is_ascii_digit()) {
        let split = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        let (digits, suffix) = rest.split_at(split);
        let n: usize = digits
            .parse()
            .map_err(|_| format!("invalid argument index '{digits}'"))?;

        let text = if n == 0 {
            ctx.args
                .iter()
                .map(|a| a.raw_str())
                .collect::<Vec<_>>()
                .join(" ")
        } else {
            match ctx.args.get(n - 1) {
                Some(v) => v.raw_str(),
                None => {
                    return Err(format!(
                        "argument index out of bounds (want {n}, have {})",
                        ctx.args.len()
                    ))
                }
            }
        };

        return Ok(format!("{text}{suffix}"));
    }

    let split = rest
        .find(|c: char| c != '_' && !c.is_alphanumeric())
        .unwrap_or(rest.len());
    let (name, suffix) = rest.split_at(split);
    let v = resolve_var(interp, ctx, &format!("${name}"))?;
    Ok(format!("{}{suffix}", v.raw_str()))
}

fn resolve_var(interp: &Interpreter, ctx: &CmdContext, name: &str) -> Result<Value, String> {
    if let Some(rest) = name.strip_prefix('$') {
        if rest.starts_with(|c: char| c.is_ascii_digit()) {
            let idx: usize = rest
                .parse()
                .map_err(|_| format!("invalid argument index '{rest}'"))?;

            if idx == 0 {
                let joined = ctx
                    .args
                    .iter()
                    .map(|a| a.raw_str())
                    .collect::<Vec<_>>()
                    .join(" ");
                return Ok(Value::of_string(&joined));
            }

            return ctx.args.get(idx - 1).cloned().ok_or_else(|| {
                format!(
                    "argument index out of bounds (want {idx}, have {})",
                    ctx.args.len()
                )
            });
        }

        return match rest {
            "user" => Ok(Value::of_string(&ctx.caller_name)),
            "self" => Ok(Value::of_string(&ctx.bot_username)),
            "channel" => Ok(Value::of_string(&ctx.channel_name)),
            "args" => Ok(Value::List(Type::string(), ctx.args.clone())),
            other => Err(format!("'${other}' not found")),
        };
    }

    if let Some(v) = interp.globals.get(name) {
        return Ok(v.clone());
    }

    if let Some(cmd) = builtin_function(name) {
        return Ok(Value::Func(name.to_string(), cmd.signature()));
    }

    if let Some(cmd) = interp.find_command(name) {
        return Ok(Value::Func(name.to_string(), cmd.signature()));
    }

    Err(format!("'{name}' not found"))
}

// ============================================================================
// Operators
// ============================================================================

fn eval_unary(op: TokenKind, op_str: &str, v: Value) -> Result<Value, String> {
    match (op, &v) {
        (TokenKind::Plus, Value::Int(_) | Value::Dbl(_)) => Ok(v),
        (TokenKind::Minus, Value::Int(i)) => Ok(Value::Int(-i)),
        (TokenKind::Minus, Value::Dbl(d)) => Ok(Value::Dbl(-d)),
        (TokenKind::Exclamation, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (TokenKind::Tilde, Value::Int(i)) => Ok(Value::Int(!i)),
        _ => Err(format!("invalid unary '{op_str}' on type '{}'", v.ty())),
    }
}

fn eval_logical(
    interp: &mut Interpreter,
    ctx: &CmdContext,
    op: TokenKind,
    op_str: &str,
    lhs: &Expr,
    rhs: &Expr,
) -> Result<Value, String> {
    let l = eval(interp, ctx, lhs)?;
    let Value::Bool(lb) = l else {
        return Err(format!(
            "invalid binary '{op_str}' on type '{}'",
            l.ty()
        ));
    };

    match (op, lb) {
        (TokenKind::LogicalAnd, false) => return Ok(Value::Bool(false)),
        (TokenKind::LogicalOr, true) => return Ok(Value::Bool(true)),
        _ => {}
    }

    let r = eval(interp, ctx, rhs)?;
    match r {
        Value::Bool(rb) => Ok(Value::Bool(rb)),
        other => Err(format!(
            "invalid binary '{op_str}' on type '{}'",
            other.ty()
        )),
    }
}

/// Map a compound-assignment operator onto its base operator.
fn base_op(op: TokenKind) -> TokenKind {
    use TokenKind::*;
    match op {
        PlusEquals => Plus,
        MinusEquals => Minus,
        TimesEquals => Asterisk,
        DivideEquals => Slash,
        RemainderEquals => Percent,
        ShiftLeftEquals => ShiftLeft,
        ShiftRightEquals => ShiftRight,
        AndEquals => Ampersand,
        OrEquals => Pipe,
        ExponentEquals => Exponent,
        other => other,
    }
}

fn binop(op: TokenKind, op_str: &str, lhs: Value, rhs: Value) -> Result<Value, String> {
    use TokenKind::*;
    use Value::*;

    let fail = |l: &Value, r: &Value| {
        Err(format!(
            "invalid binary '{op_str}' between types '{}' and '{}' -- in expr ({} {op_str} {})",
            l.ty(),
            r.ty(),
            l.str(),
            r.str()
        ))
    };

    match op {
        Plus => match (&lhs, &rhs) {
            (Int(a), Int(b)) => Ok(Int(a.wrapping_add(*b))),
            (Int(a), Dbl(b)) => Ok(Dbl(*a as f64 + b)),
            (Dbl(a), Int(b)) => Ok(Dbl(a + *b as f64)),
            (Dbl(a), Dbl(b)) => Ok(Dbl(a + b)),
            (Char(c), Int(i)) => shift_char(*c, *i),
            (Int(i), Char(c)) => shift_char(*c, *i),
            (List(le, lv), List(re, rv)) => {
                if le.is_same(re) || le.is_void() || re.is_void() {
                    let elem = if le.is_void() { re.clone() } else { le.clone() };
                    let mut out = lv.clone();
                    out.extend(rv.iter().cloned());
                    Ok(List(elem, out))
                } else {
                    fail(&lhs, &rhs)
                }
            }
            _ => fail(&lhs, &rhs),
        },

        Minus => match (&lhs, &rhs) {
            (Int(a), Int(b)) => Ok(Int(a.wrapping_sub(*b))),
            (Int(a), Dbl(b)) => Ok(Dbl(*a as f64 - b)),
            (Dbl(a), Int(b)) => Ok(Dbl(a - *b as f64)),
            (Dbl(a), Dbl(b)) => Ok(Dbl(a - b)),
            (Char(c), Int(i)) => shift_char(*c, -i),
            _ => fail(&lhs, &rhs),
        },

        Asterisk => match (&lhs, &rhs) {
            (Int(a), Int(b)) => Ok(Int(a.wrapping_mul(*b))),
            (Int(a), Dbl(b)) => Ok(Dbl(*a as f64 * b)),
            (Dbl(a), Int(b)) => Ok(Dbl(a * *b as f64)),
            (Dbl(a), Dbl(b)) => Ok(Dbl(a * b)),
            _ => fail(&lhs, &rhs),
        },

        Slash => match (&lhs, &rhs) {
            // division by zero saturates rather than aborting the command
            (Int(a), Int(b)) => Ok(Int(if *b == 0 { i64::MAX } else { a / b })),
            (Int(a), Dbl(b)) => Ok(Dbl(*a as f64 / b)),
            (Dbl(a), Int(b)) => Ok(Dbl(a / *b as f64)),
            (Dbl(a), Dbl(b)) => Ok(Dbl(a / b)),
            _ => fail(&lhs, &rhs),
        },

        Percent => match (&lhs, &rhs) {
            (Int(a), Int(b)) => Ok(Int(if *b == 0 { i64::MAX } else { a % b })),
            (Int(a), Dbl(b)) => Ok(Dbl(*a as f64 % b)),
            (Dbl(a), Int(b)) => Ok(Dbl(a % *b as f64)),
            (Dbl(a), Dbl(b)) => Ok(Dbl(a % b)),
            _ => fail(&lhs, &rhs),
        },

        Exponent => match (&lhs, &rhs) {
            (Int(a), Int(b)) => Ok(Int(int_pow(*a, *b))),
            (Int(a), Dbl(b)) => Ok(Dbl((*a as f64).powf(*b))),
            (Dbl(a), Int(b)) => Ok(Dbl(a.powi(*b as i32))),
            (Dbl(a), Dbl(b)) => Ok(Dbl(a.powf(*b))),
            _ => fail(&lhs, &rhs),
        },

        ShiftLeft => match (&lhs, &rhs) {
            (Int(a), Int(b)) => Ok(Int(a.wrapping_shl(*b as u32))),
            _ => fail(&lhs, &rhs),
        },

        ShiftRight => match (&lhs, &rhs) {
            (Int(a), Int(b)) => Ok(Int(a.wrapping_shr(*b as u32))),
            _ => fail(&lhs, &rhs),
        },

        Ampersand => match (&lhs, &rhs) {
            (Int(a), Int(b)) => Ok(Int(a & b)),
            _ => fail(&lhs, &rhs),
        },

        Pipe => match (&lhs, &rhs) {
            (Int(a), Int(b)) => Ok(Int(a | b)),
            _ => fail(&lhs, &rhs),
        },

        _ => fail(&lhs, &rhs),
    }
}

fn shift_char(c: char, delta: i64) -> Result<Value, String> {
    let shifted = (c as i64).wrapping_add(delta);
    u32::try_from(shifted)
        .ok()
        .and_then(char::from_u32)
        .map(Value::Char)
        .ok_or_else(|| format!("character arithmetic out of range ({c:?} + {delta})"))
}

fn int_pow(base: i64, exp: i64) -> i64 {
    if exp >= 0 {
        let e = u32::try_from(exp).unwrap_or(u32::MAX);
        base.checked_pow(e).unwrap_or(i64::MAX)
    } else {
        (base as f64).powi(exp as i32) as i64
    }
}

fn compare_values(op: TokenKind, op_str: &str, l: &Value, r: &Value) -> Result<bool, String> {
    use std::cmp::Ordering;
    use TokenKind::*;
    use Value::*;

    let by_order = |ord: Ordering| match op {
        LAngle => ord == Ordering::Less,
        RAngle => ord == Ordering::Greater,
        LessThanEqual => ord != Ordering::Greater,
        GreaterThanEqual => ord != Ordering::Less,
        EqualTo => ord == Ordering::Equal,
        NotEqual => ord != Ordering::Equal,
        _ => false,
    };

    let ord = match (l, r) {
        (Int(a), Int(b)) => a.cmp(b),
        (Int(a), Dbl(b)) => (*a as f64).total_cmp(b),
        (Dbl(a), Int(b)) => a.total_cmp(&(*b as f64)),
        (Dbl(a), Dbl(b)) => a.total_cmp(b),
        (Char(a), Int(b)) => (*a as i64).cmp(b),
        (Int(a), Char(b)) => a.cmp(&(*b as i64)),
        (Char(a), Char(b)) => a.cmp(b),
        (Bool(a), Bool(b)) if matches!(op, EqualTo | NotEqual) => a.cmp(b),
        (Void, Void) if matches!(op, EqualTo | NotEqual) => Ordering::Equal,
        (List(..), List(..)) => l.cmp(r),
        (Map(..), Map(..)) => l.cmp(r),
        _ => {
            return Err(format!(
                "invalid comparison '{op_str}' between types '{}' and '{}'",
                l.ty(),
                r.ty()
            ))
        }
    };

    Ok(by_order(ord))
}

// ============================================================================
// Places (assignment targets)
// ============================================================================

fn eval_assign(
    interp: &mut Interpreter,
    ctx: &CmdContext,
    op: TokenKind,
    op_str: &str,
    target: &Expr,
    value: &Expr,
) -> Result<Value, String> {
    let rhs = eval(interp, ctx, value)?;

    // flatten the target into a global name plus a subscript path
    let (name, index_exprs) = flatten_place(target)
        .ok_or_else(|| "cannot assign to rvalue".to_string())?;

    let mut path = Vec::with_capacity(index_exprs.len());
    for e in index_exprs {
        path.push(eval(interp, ctx, e)?);
    }

    let new_val = if op == TokenKind::Equal {
        rhs
    } else {
        let Some(root) = interp.globals.get_mut(name) else {
            return Err(format!("'{name}' not found"));
        };
        let current = walk_path(root, &path)?.clone();
        binop(base_op(op), op_str.trim_end_matches('='), current, rhs)?
    };

    let Some(root) = interp.globals.get_mut(name) else {
        return Err(format!("'{name}' not found"));
    };
    let slot = walk_path(root, &path)?;
    if !slot.ty().is_same(&new_val.ty()) {
        return Err(format!(
            "cannot assign value of type '{}' to variable of type '{}'",
            new_val.ty(),
            slot.ty()
        ));
    }

    *slot = new_val.clone();
    Ok(new_val)
}

/// A target is assignable when it is a bare global or a chain of subscripts
/// rooted at one.
fn flatten_place(e: &Expr) -> Option<(&str, Vec<&Expr>)> {
    match e {
        Expr::Var(name) if !name.starts_with('$') => Some((name, Vec::new())),
        Expr::Index { base, index } => {
            let (name, mut path) = flatten_place(base)?;
            path.push(index);
            Some((name, path))
        }
        _ => None,
    }
}

fn walk_path<'v>(root: &'v mut Value, path: &[Value]) -> Result<&'v mut Value, String> {
    let mut cur = root;

    for key in path {
        cur = match cur {
            Value::List(_, xs) => {
                let Value::Int(i) = key else {
                    return Err("index on a list must be an integer".to_string());
                };

                let len = xs.len() as i64;
                let idx = if *i < 0 { len + i } else { *i };
                if idx < 0 || idx >= len {
                    return Err("index out of range".to_string());
                }

                &mut xs[idx as usize]
            }
            Value::Map(kt, vt, m) => {
                if !key.ty().is_same(kt) {
                    return Err(format!(
                        "cannot index '[{kt}: {vt}]' with key of type '{}'",
                        key.ty()
                    ));
                }

                let default_ty = vt.clone();
                m.entry(key.clone())
                    .or_insert_with(|| Value::default_of(&default_ty))
            }
            other => {
                return Err(format!("type '{}' cannot be indexed", other.ty()));
            }
        };
    }

    Ok(cur)
}

// ============================================================================
// Subscripts, slices and methods
// ============================================================================

fn eval_index(base: &Value, index: &Value) -> Result<Value, String> {
    match base {
        Value::List(_, xs) => {
            let Value::Int(i) = index else {
                return Err("index on a list must be an integer".to_string());
            };

            let len = xs.len() as i64;
            let idx = if *i < 0 { len + i } else { *i };
            if idx < 0 || idx >= len {
                return Err("index out of range".to_string());
            }

            Ok(xs[idx as usize].clone())
        }

        Value::Map(kt, vt, m) => {
            if !index.ty().is_same(kt) {
                return Err(format!(
                    "cannot index '{}' with key of type '{}'",
                    base.ty(),
                    index.ty()
                ));
            }

            Ok(m.get(index)
                .cloned()
                .unwrap_or_else(|| Value::default_of(vt)))
        }

        other => Err(format!("type '{}' cannot be indexed", other.ty())),
    }
}

fn eval_slice(base: &Value, start: Option<Value>, end: Option<Value>) -> Result<Value, String> {
    let Value::List(elem, xs) = base else {
        return Err(format!("type '{}' cannot be sliced", base.ty()));
    };

    let size = xs.len() as i64;
    let empty = || Value::List(elem.clone(), Vec::new());
    if size == 0 {
        return Ok(empty());
    }

    let mut first = 0i64;
    let mut last = size;

    if let Some(v) = start {
        let Value::Int(i) = v else {
            return Err("slice indices must be integers".to_string());
        };

        if i < 0 {
            // too far negative clamps to the start of the list
            if -i <= size {
                first = size + i;
            }
        } else if i >= size {
            return Ok(empty());
        } else {
            first = i;
        }
    }

    if let Some(v) = end {
        let Value::Int(i) = v else {
            return Err("slice indices must be integers".to_string());
        };

        if i < 0 {
            if -i > size {
                return Ok(empty());
            }
            last = size + i;
        } else if i < size {
            last = i;
        }
    }

    if first >= last {
        return Ok(empty());
    }

    Ok(Value::List(
        elem.clone(),
        xs[first as usize..last as usize].to_vec(),
    ))
}

fn eval_method(
    interp: &mut Interpreter,
    ctx: &CmdContext,
    recv: &Expr,
    method: &str,
    args: &[Expr],
) -> Result<Value, String> {
    match method {
        "len" => {
            if !args.is_empty() {
                return Err("expected no arguments to len()".to_string());
            }

            let v = eval(interp, ctx, recv)?;
            match v {
                Value::List(_, xs) => Ok(Value::Int(xs.len() as i64)),
                Value::Map(_, _, m) => Ok(Value::Int(m.len() as i64)),
                other => Err(format!("type '{}' has no method 'len'", other.ty())),
            }
        }

        "append" => {
            if args.is_empty() {
                return Err("expected at least one argument to append()".to_string());
            }

            let (name, index_exprs) = flatten_place(recv)
                .ok_or_else(|| "cannot append to rvalue".to_string())?;

            let mut path = Vec::with_capacity(index_exprs.len());
            for e in index_exprs {
                path.push(eval(interp, ctx, e)?);
            }

            let mut arg_vals = Vec::with_capacity(args.len());
            for a in args {
                arg_vals.push(eval(interp, ctx, a)?);
            }

            let Some(root) = interp.globals.get_mut(name) else {
                return Err(format!("'{name}' not found"));
            };

            let slot = walk_path(root, &path)?;
            match &mut *slot {
                Value::List(elem, xs) => {
                    let elem_ty = elem.clone();
                    for (i, v) in arg_vals.into_iter().enumerate() {
                        match v.cast_to(&elem_ty) {
                            Some(cast) => xs.push(cast),
                            None => {
                                return Err(format!(
                                    "element type mismatch for append() (arg {i}); expected '{elem_ty}', found '{}'",
                                    v.ty()
                                ))
                            }
                        }
                    }

                    Ok(Value::List(elem_ty, xs.clone()))
                }
                other => Err(format!("type '{}' has no method 'append'", other.ty())),
            }
        }

        other => Err(format!("no method '{other}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::parser::parse_type_str;

    fn run(interp: &mut Interpreter, src: &str) -> Result<Value, String> {
        let ctx = CmdContext::default();
        interp.evaluate_expr(src, &ctx)
    }

    fn eval_ok(src: &str) -> Value {
        let mut interp = Interpreter::new();
        run(&mut interp, src).unwrap()
    }

    #[test]
    fn test_arithmetic_precedence() {
        assert_eq!(eval_ok("1 + 2 * 3"), Value::Int(7));
        assert_eq!(eval_ok("(1 + 2) * 3"), Value::Int(9));
    }

    #[test]
    fn test_exponent_right_associativity() {
        assert_eq!(eval_ok("2 ** 3 ** 2"), Value::Int(512));
        assert_eq!(eval_ok("2 ^ 3 ^ 2"), Value::Int(512));
    }

    #[test]
    fn test_base_prefixed_literals() {
        assert_eq!(eval_ok("0x10 + 0b10"), Value::Int(18));
    }

    #[test]
    fn test_division_by_zero_saturates() {
        assert_eq!(eval_ok("1 / 0"), Value::Int(i64::MAX));
    }

    #[test]
    fn test_chained_comparison() {
        assert_eq!(eval_ok("1 < 2 < 3"), Value::Bool(true));
        assert_eq!(eval_ok("1 < 2 < 2"), Value::Bool(false));
        assert_eq!(eval_ok("3 > 2 >= 2"), Value::Bool(true));
    }

    #[test]
    fn test_logical_short_circuit() {
        // rhs would be a type error if evaluated
        assert_eq!(eval_ok("false && (1 < \"x\")"), Value::Bool(false));
        assert_eq!(eval_ok("true || (1 < \"x\")"), Value::Bool(true));
    }

    #[test]
    fn test_ternary() {
        assert_eq!(eval_ok("1 < 2 ? 10 : 20"), Value::Int(10));
        assert!(matches!(
            eval_ok("2 < 1 ? 10 : 20"),
            Value::Int(20)
        ));
    }

    #[test]
    fn test_string_ops() {
        assert_eq!(
            eval_ok("\"foo\" + \"bar\""),
            Value::of_string("foobar")
        );
        assert_eq!(eval_ok("'a' + 1"), Value::Char('b'));
    }

    #[test]
    fn test_pipeline_composition() {
        // x |> f |> g  ==  g(f(x))
        assert_eq!(eval_ok("3.7 |> int |> str"), Value::of_string("3"));
        assert_eq!(eval_ok("str(int(3.7))"), eval_ok("3.7 |> int |> str"));
    }

    #[test]
    fn test_globals_and_assignment() {
        let mut interp = Interpreter::new();
        interp
            .add_global("counter", Value::Int(0))
            .unwrap();

        assert_eq!(run(&mut interp, "counter = 5").unwrap(), Value::Int(5));
        assert_eq!(run(&mut interp, "counter += 3").unwrap(), Value::Int(8));
        assert_eq!(run(&mut interp, "counter").unwrap(), Value::Int(8));

        // type mismatch is rejected
        assert!(run(&mut interp, "counter = \"oops\"").is_err());
        // macro arguments are not assignable
        assert!(run(&mut interp, "$1 = 5").is_err());
    }

    #[test]
    fn test_map_subscript_assignment() {
        let mut interp = Interpreter::new();
        let ty = parse_type_str("[str: int]").unwrap();
        interp
            .add_global("scores", Value::default_of(&ty))
            .unwrap();

        run(&mut interp, "scores[\"a\"] = 3").unwrap();
        run(&mut interp, "scores[\"a\"] += 2").unwrap();
        assert_eq!(run(&mut interp, "scores[\"a\"]").unwrap(), Value::Int(5));

        // absent key reads as the default
        assert_eq!(run(&mut interp, "scores[\"b\"]").unwrap(), Value::Int(0));
        // wrong key type is a type error
        assert!(run(&mut interp, "scores[1]").is_err());
    }

    #[test]
    fn test_list_indexing_and_slices() {
        let mut interp = Interpreter::new();
        interp
            .add_global(
                "xs",
                Value::List(
                    Type::integer(),
                    vec![Value::Int(10), Value::Int(20), Value::Int(30)],
                ),
            )
            .unwrap();

        assert_eq!(run(&mut interp, "xs[0]").unwrap(), Value::Int(10));
        assert_eq!(run(&mut interp, "xs[-1]").unwrap(), Value::Int(30));
        assert!(run(&mut interp, "xs[3]").is_err());

        let mid = run(&mut interp, "xs[1:]").unwrap();
        assert_eq!(
            mid,
            Value::List(Type::integer(), vec![Value::Int(20), Value::Int(30)])
        );

        let all = run(&mut interp, "xs[:]").unwrap();
        assert_eq!(all, run(&mut interp, "xs").unwrap());
    }

    #[test]
    fn test_list_methods() {
        let mut interp = Interpreter::new();
        interp
            .add_global("xs", Value::List(Type::integer(), vec![Value::Int(1)]))
            .unwrap();

        assert_eq!(run(&mut interp, "xs.len()").unwrap(), Value::Int(1));
        run(&mut interp, "xs.append(2, 3)").unwrap();
        assert_eq!(run(&mut interp, "xs.len()").unwrap(), Value::Int(3));
        assert!(run(&mut interp, "xs.append(\"x\")").is_err());
    }

    #[test]
    fn test_macro_arguments() {
        let mut interp = Interpreter::new();
        let ctx = CmdContext {
            args: vec![Value::of_string("World"), Value::of_string("x")],
            ..CmdContext::default()
        };

        let v = interp.evaluate_expr("$1", &ctx).unwrap();
        assert_eq!(v, Value::of_string("World"));

        let v = interp.evaluate_expr("$args", &ctx).unwrap();
        match v {
            Value::List(_, xs) => assert_eq!(xs.len(), 2),
            other => panic!("expected list, got {other:?}"),
        }

        assert!(interp.evaluate_expr("$5", &ctx).is_err());
    }

    #[test]
    fn test_unknown_identifier() {
        let err = eval_err("nonesuch + 1");
        assert!(err.contains("'nonesuch' not found"), "got: {err}");
    }

    fn eval_err(src: &str) -> String {
        let mut interp = Interpreter::new();
        run(&mut interp, src).unwrap_err()
    }

    #[test]
    fn test_overload_failure_diagnostic() {
        let err = eval_err("int([1, 2])");
        assert!(
            err.contains("no matching function"),
            "got: {err}"
        );
    }
}
