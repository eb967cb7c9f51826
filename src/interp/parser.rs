//! Precedence-climbing parser for the command language.
//!
//! Produces [`Expr`] trees from token streams. Every failure is a
//! human-readable string carrying the offending token; alternatives that all
//! fail report their diagnostics joined with `"; "`.

use crate::interp::ast::Expr;
use crate::interp::lexer::{lex, Token, TokenKind};
use crate::interp::types::Type;
use std::sync::Arc;

/// Parse a complete expression from source text.
pub fn parse_expr_str(src: &str) -> Result<Expr, String> {
    let toks = lex(src)?;
    let mut c = Cursor::new(toks);
    let expr = parse_expr(&mut c)?;

    match c.peek() {
        None => Ok(expr),
        Some(t) => Err(format!("unexpected trailing token '{}'", t.text)),
    }
}

/// Parse a type expression (`int | dbl | bool | str | char | void | [T] |
/// [K: V]`) from source text.
pub fn parse_type_str(src: &str) -> Result<Arc<Type>, String> {
    let toks = lex(src)?;
    let mut c = Cursor::new(toks);
    let ty = parse_type(&mut c)?;

    match c.peek() {
        None => Ok(ty),
        Some(t) => Err(format!("unexpected trailing token '{}' in type", t.text)),
    }
}

struct Cursor {
    toks: Vec<Token>,
    pos: usize,
}

impl Cursor {
    fn new(toks: Vec<Token>) -> Self {
        Self { toks, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.toks.get(self.pos)
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.peek().map(|t| t.kind)
    }

    fn pop(&mut self) -> Option<Token> {
        let t = self.toks.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.peek_kind() == Some(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }
}

fn precedence(op: TokenKind) -> i32 {
    use TokenKind::*;
    match op {
        Period => 8000,
        LParen => 3000,
        LSquare => 2800,
        Exponent => 2600,
        Asterisk => 2400,
        Slash => 2200,
        Percent => 2000,
        Plus | Minus => 1800,
        ShiftLeft | ShiftRight => 1600,
        Ampersand => 1400,
        Pipe => 1000,
        EqualTo | NotEqual | LAngle | RAngle | LessThanEqual | GreaterThanEqual => 800,
        LogicalAnd => 600,
        LogicalOr => 400,
        Equal | PlusEquals | MinusEquals | TimesEquals | DivideEquals | RemainderEquals
        | ShiftLeftEquals | ShiftRightEquals | AndEquals | OrEquals | ExponentEquals => 200,
        Question => 10,
        Pipeline => 1,
        _ => -1,
    }
}

fn is_postfix(op: TokenKind) -> bool {
    matches!(op, TokenKind::LParen | TokenKind::LSquare)
}

fn is_right_assoc(op: TokenKind) -> bool {
    op == TokenKind::Exponent
}

fn is_assignment(op: TokenKind) -> bool {
    use TokenKind::*;
    matches!(
        op,
        Equal
            | PlusEquals
            | MinusEquals
            | TimesEquals
            | DivideEquals
            | RemainderEquals
            | ShiftLeftEquals
            | ShiftRightEquals
            | AndEquals
            | OrEquals
            | ExponentEquals
    )
}

fn is_comparison(op: TokenKind) -> bool {
    use TokenKind::*;
    matches!(
        op,
        EqualTo | NotEqual | LAngle | RAngle | LessThanEqual | GreaterThanEqual
    )
}

fn parse_expr(c: &mut Cursor) -> Result<Expr, String> {
    let lhs = parse_unary(c)?;
    parse_rhs(c, lhs, 0)
}

fn parse_rhs(c: &mut Cursor, mut lhs: Expr, prio: i32) -> Result<Expr, String> {
    loop {
        let Some(op_tok) = c.peek() else {
            return Ok(lhs);
        };

        let op = op_tok.kind;
        let prec = precedence(op);
        if prec == -1 {
            return Ok(lhs);
        }
        // right-associative and postfix operators never bail on precedence
        if prec < prio && !is_right_assoc(op) && !is_postfix(op) {
            return Ok(lhs);
        }

        let op_str = op_tok.text.clone();
        c.pop();

        if is_postfix(op) {
            lhs = parse_postfix(c, lhs, op)?;
            continue;
        }

        if op == TokenKind::Question {
            let then_lhs = parse_unary(c)?;
            let then = parse_rhs(c, then_lhs, prec + 1)?;

            if !c.eat(TokenKind::Colon) {
                return Err("expected ':' after '?'".to_string());
            }

            let else_lhs = parse_unary(c)?;
            let otherwise = parse_rhs(c, else_lhs, 0)?;

            lhs = Expr::Ternary {
                cond: Box::new(lhs),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            };
            continue;
        }

        let mut rhs = parse_unary(c)?;

        let next_prec = c.peek_kind().map(precedence).unwrap_or(-1);
        let next_right = c.peek_kind().map(is_right_assoc).unwrap_or(false);
        if next_prec > prec || next_right {
            rhs = parse_rhs(c, rhs, prec + 1)?;
        }

        if is_assignment(op) {
            lhs = Expr::Assign {
                op,
                op_str,
                target: Box::new(lhs),
                value: Box::new(rhs),
            };
        } else if is_comparison(op) {
            // fold a < b < c into one chained node
            lhs = match lhs {
                Expr::Compare {
                    mut operands,
                    mut ops,
                } => {
                    operands.push(rhs);
                    ops.push((op, op_str));
                    Expr::Compare { operands, ops }
                }
                other => Expr::Compare {
                    operands: vec![other, rhs],
                    ops: vec![(op, op_str)],
                },
            };
        } else if op == TokenKind::Period {
            lhs = Expr::Dot {
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        } else if op == TokenKind::Pipeline {
            lhs = Expr::Pipeline {
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        } else {
            lhs = Expr::Binary {
                op,
                op_str,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }
}

fn parse_unary(c: &mut Cursor) -> Result<Expr, String> {
    for (kind, op_str) in [
        (TokenKind::Exclamation, "!"),
        (TokenKind::Minus, "-"),
        (TokenKind::Plus, "+"),
        (TokenKind::Tilde, "~"),
    ] {
        if c.eat(kind) {
            let expr = parse_unary(c)?;
            return Ok(Expr::Unary {
                op: kind,
                op_str: op_str.to_string(),
                expr: Box::new(expr),
            });
        }
    }

    parse_primary(c)
}

fn parse_primary(c: &mut Cursor) -> Result<Expr, String> {
    let Some(tok) = c.peek() else {
        return Err("unexpected end of input".to_string());
    };

    match tok.kind {
        TokenKind::StringLit => {
            let text = c.pop().unwrap().text;
            Ok(Expr::Str(decode_escapes(&text)))
        }

        TokenKind::CharLit => {
            let text = c.pop().unwrap().text;
            match text.chars().next() {
                Some(ch) => Ok(Expr::Char(ch)),
                None => Err("empty char literal".to_string()),
            }
        }

        TokenKind::NumberLit => {
            let text = c.pop().unwrap().text;
            parse_number(&text)
        }

        TokenKind::BoolLit => {
            let text = c.pop().unwrap().text;
            Ok(Expr::Bool(text == "true"))
        }

        TokenKind::LParen => {
            c.pop();
            let inner = parse_expr(c)?;
            if !c.eat(TokenKind::RParen) {
                return Err("expected ')'".to_string());
            }
            Ok(inner)
        }

        TokenKind::LSquare => parse_list(c),

        TokenKind::Dollar => {
            c.pop();
            match c.peek() {
                Some(t) if t.kind == TokenKind::Identifier => {
                    let name = c.pop().unwrap().text;
                    Ok(Expr::Var(format!("${name}")))
                }
                Some(t) if t.kind == TokenKind::NumberLit => {
                    let text = c.pop().unwrap().text;
                    if text.chars().all(|ch| ch.is_ascii_digit()) {
                        Ok(Expr::Var(format!("${text}")))
                    } else {
                        Err(format!("invalid numeric literal '{text}' after '$'"))
                    }
                }
                Some(t) => Err(format!("invalid token '{}' after '$'", t.text)),
                None => Err("unexpected end of input after '$'".to_string()),
            }
        }

        TokenKind::Identifier => {
            let name = c.pop().unwrap().text;
            Ok(Expr::Var(name))
        }

        _ => Err(format!("unexpected token '{}'", tok.text)),
    }
}

fn parse_list(c: &mut Cursor) -> Result<Expr, String> {
    c.pop();

    let mut elems = Vec::new();
    loop {
        if c.eat(TokenKind::RSquare) {
            return Ok(Expr::List(elems));
        }

        elems.push(parse_expr(c)?);

        if c.eat(TokenKind::Comma) {
            continue;
        } else if c.eat(TokenKind::RSquare) {
            return Ok(Expr::List(elems));
        } else {
            let found = c
                .peek()
                .map(|t| t.text.clone())
                .unwrap_or_else(|| "end of input".to_string());
            return Err(format!(
                "expected ',' or ']' in list literal, found '{found}'"
            ));
        }
    }
}

fn parse_postfix(c: &mut Cursor, lhs: Expr, op: TokenKind) -> Result<Expr, String> {
    if op == TokenKind::LParen {
        let mut args = Vec::new();
        loop {
            if c.eat(TokenKind::RParen) {
                break;
            }

            args.push(parse_expr(c)?);

            if c.eat(TokenKind::Comma) {
                continue;
            } else if c.eat(TokenKind::RParen) {
                break;
            } else {
                return Err("expected ',' or ')'".to_string());
            }
        }

        return Ok(Expr::Call {
            callee: Box::new(lhs),
            args,
        });
    }

    // subscript or one of the five slice forms: [i], [:], [i:], [:j], [i:j]
    if c.eat(TokenKind::Colon) {
        if c.eat(TokenKind::RSquare) {
            return Ok(Expr::Slice {
                base: Box::new(lhs),
                start: None,
                end: None,
            });
        }

        let end = parse_expr(c)?;
        if !c.eat(TokenKind::RSquare) {
            return Err("expected ']'".to_string());
        }
        return Ok(Expr::Slice {
            base: Box::new(lhs),
            start: None,
            end: Some(Box::new(end)),
        });
    }

    let idx = parse_expr(c)?;
    if c.eat(TokenKind::Colon) {
        if c.eat(TokenKind::RSquare) {
            return Ok(Expr::Slice {
                base: Box::new(lhs),
                start: Some(Box::new(idx)),
                end: None,
            });
        }

        let end = parse_expr(c)?;
        if !c.eat(TokenKind::RSquare) {
            return Err("expected ']'".to_string());
        }
        Ok(Expr::Slice {
            base: Box::new(lhs),
            start: Some(Box::new(idx)),
            end: Some(Box::new(end)),
        })
    } else if c.eat(TokenKind::RSquare) {
        Ok(Expr::Index {
            base: Box::new(lhs),
            index: Box::new(idx),
        })
    } else {
        let found = c
            .peek()
            .map(|t| t.text.clone())
            .unwrap_or_else(|| "end of input".to_string());
        Err(format!("expected either ']' or ':', found '{found}'"))
    }
}

fn parse_number(text: &str) -> Result<Expr, String> {
    let lower_has = |ch: char| text.contains(ch) || text.contains(ch.to_ascii_uppercase());
    let is_floating = text.contains('.') || (!lower_has('x') && lower_has('e'));

    if is_floating {
        return text
            .parse::<f64>()
            .map(Expr::Dbl)
            .map_err(|_| format!("invalid floating point literal '{text}'"));
    }

    let (digits, base) = if let Some(d) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X"))
    {
        (d, 16)
    } else if let Some(d) = text.strip_prefix("0b").or_else(|| text.strip_prefix("0B")) {
        (d, 2)
    } else {
        (text, 10)
    };

    i64::from_str_radix(digits, base)
        .map(Expr::Int)
        .map_err(|_| format!("invalid integer literal '{text}'"))
}

fn decode_escapes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();

    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }

        match chars.next() {
            Some('n') => out.push('\n'),
            Some('b') => out.push('\u{8}'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            // unknown escapes keep the backslash and the char verbatim
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }

    out
}

fn parse_type(c: &mut Cursor) -> Result<Arc<Type>, String> {
    let Some(tok) = c.peek() else {
        return Err("unexpected end of input in type".to_string());
    };

    match tok.kind {
        TokenKind::Identifier => {
            let name = c.pop().unwrap().text;
            match name.as_str() {
                "int" => Ok(Type::integer()),
                "dbl" | "double" => Ok(Type::double()),
                "bool" => Ok(Type::boolean()),
                "char" => Ok(Type::character()),
                "str" => Ok(Type::string()),
                "void" => Ok(Type::void()),
                other => Err(format!("unknown type '{other}'")),
            }
        }

        TokenKind::LSquare => {
            c.pop();
            let first = parse_type(c)?;

            if c.eat(TokenKind::Colon) {
                let value = parse_type(c)?;
                if !c.eat(TokenKind::RSquare) {
                    return Err("expected ']' in map type".to_string());
                }
                Ok(Type::map(first, value))
            } else if c.eat(TokenKind::RSquare) {
                Ok(Type::list(first))
            } else {
                Err("expected ']' in list type".to_string())
            }
        }

        _ => Err(format!("unexpected token '{}' in type", tok.text)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiplication_binds_tighter() {
        let e = parse_expr_str("1 + 2 * 3").unwrap();
        match e {
            Expr::Binary { op, lhs, rhs, .. } => {
                assert_eq!(op, TokenKind::Plus);
                assert!(matches!(*lhs, Expr::Int(1)));
                assert!(matches!(*rhs, Expr::Binary { .. }));
            }
            other => panic!("expected binary op, got {other}"),
        }
    }

    #[test]
    fn test_exponent_is_right_associative() {
        let e = parse_expr_str("2 ** 3 ** 2").unwrap();
        match e {
            Expr::Binary { op, lhs, rhs, .. } => {
                assert_eq!(op, TokenKind::Exponent);
                assert!(matches!(*lhs, Expr::Int(2)));
                match *rhs {
                    Expr::Binary { op, .. } => assert_eq!(op, TokenKind::Exponent),
                    other => panic!("expected nested exponent, got {other}"),
                }
            }
            other => panic!("expected binary op, got {other}"),
        }
    }

    #[test]
    fn test_chained_comparison_folds() {
        let e = parse_expr_str("a < b < c").unwrap();
        match e {
            Expr::Compare { operands, ops } => {
                assert_eq!(operands.len(), 3);
                assert_eq!(ops.len(), 2);
            }
            other => panic!("expected chained comparison, got {other}"),
        }
    }

    #[test]
    fn test_pipeline_is_left_associative() {
        let e = parse_expr_str("x |> f |> g").unwrap();
        match e {
            Expr::Pipeline { lhs, rhs } => {
                assert!(matches!(*rhs, Expr::Var(ref n) if n == "g"));
                assert!(matches!(*lhs, Expr::Pipeline { .. }));
            }
            other => panic!("expected pipeline, got {other}"),
        }
    }

    #[test]
    fn test_slice_forms() {
        assert!(matches!(
            parse_expr_str("x[1]").unwrap(),
            Expr::Index { .. }
        ));
        assert!(matches!(
            parse_expr_str("x[:]").unwrap(),
            Expr::Slice {
                start: None,
                end: None,
                ..
            }
        ));
        assert!(matches!(
            parse_expr_str("x[1:]").unwrap(),
            Expr::Slice {
                start: Some(_),
                end: None,
                ..
            }
        ));
        assert!(matches!(
            parse_expr_str("x[:2]").unwrap(),
            Expr::Slice {
                start: None,
                end: Some(_),
                ..
            }
        ));
        assert!(matches!(
            parse_expr_str("x[1:2]").unwrap(),
            Expr::Slice {
                start: Some(_),
                end: Some(_),
                ..
            }
        ));
    }

    #[test]
    fn test_call_arguments() {
        let e = parse_expr_str("f(1, \"two\", g(3))").unwrap();
        match e {
            Expr::Call { callee, args } => {
                assert!(matches!(*callee, Expr::Var(ref n) if n == "f"));
                assert_eq!(args.len(), 3);
            }
            other => panic!("expected call, got {other}"),
        }
    }

    #[test]
    fn test_dollar_arguments_merge() {
        assert!(matches!(
            parse_expr_str("$1").unwrap(),
            Expr::Var(ref n) if n == "$1"
        ));
        assert!(matches!(
            parse_expr_str("$name").unwrap(),
            Expr::Var(ref n) if n == "$name"
        ));
        assert!(parse_expr_str("$+").is_err());
    }

    #[test]
    fn test_unknown_escape_is_preserved() {
        match parse_expr_str(r#""a\qb""#).unwrap() {
            Expr::Str(s) => assert_eq!(s, "a\\qb"),
            other => panic!("expected string, got {other}"),
        }

        match parse_expr_str(r#""a\"b""#).unwrap() {
            Expr::Str(s) => assert_eq!(s, "a\"b"),
            other => panic!("expected string, got {other}"),
        }
    }

    #[test]
    fn test_ternary() {
        let e = parse_expr_str("true ? 1 : 2").unwrap();
        assert!(matches!(e, Expr::Ternary { .. }));
    }

    #[test]
    fn test_error_carries_offending_token() {
        let err = parse_expr_str("1 + ]").unwrap_err();
        assert!(err.contains("']'"), "error was: {err}");
    }

    #[test]
    fn test_type_expressions() {
        assert!(parse_type_str("int").unwrap().is_int());
        assert!(parse_type_str("str").unwrap().is_string());
        assert!(parse_type_str("[int]").unwrap().is_list());

        let m = parse_type_str("[str: int]").unwrap();
        assert!(m.is_map());
        assert!(m.key_type().unwrap().is_string());

        assert!(parse_type_str("frob").is_err());
    }
}
