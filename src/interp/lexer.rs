//! Tokenizer for the command language.
//!
//! Longest-match operator scanning, base-prefixed numeric literals, and the
//! period rule that keeps `x.0.1` as member access rather than a float.

/// Token kinds. Compound assignment operators and the exponent (`**`, with
/// `^` accepted as an alias) are distinct kinds so the parser can dispatch
/// on them directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // keywords
    Fn,
    If,
    Let,
    Else,
    While,
    Return,
    For,

    // punctuation and operators
    Semicolon,
    Dollar,
    Colon,
    Pipe,
    Ampersand,
    Period,
    Asterisk,
    Exclamation,
    Plus,
    Comma,
    Minus,
    Slash,
    LParen,
    RParen,
    LSquare,
    RSquare,
    LBrace,
    RBrace,
    LAngle,
    RAngle,
    Equal,
    Percent,
    Tilde,
    Question,
    LogicalOr,
    LogicalAnd,
    EqualTo,
    NotEqual,
    LessThanEqual,
    GreaterThanEqual,
    ShiftLeft,
    ShiftRight,
    Exponent,
    RightArrow,
    Pipeline,

    PlusEquals,
    MinusEquals,
    TimesEquals,
    DivideEquals,
    RemainderEquals,
    ShiftLeftEquals,
    ShiftRightEquals,
    AndEquals,
    OrEquals,
    ExponentEquals,

    // literals and names
    NumberLit,
    StringLit,
    CharLit,
    BoolLit,
    Identifier,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
}

impl Token {
    fn new(kind: TokenKind, text: &str) -> Self {
        Self {
            kind,
            text: text.to_string(),
        }
    }
}

const THREE_CHAR_OPS: &[(&str, TokenKind)] = &[
    ("<<=", TokenKind::ShiftLeftEquals),
    (">>=", TokenKind::ShiftRightEquals),
    ("**=", TokenKind::ExponentEquals),
];

const TWO_CHAR_OPS: &[(&str, TokenKind)] = &[
    ("&&", TokenKind::LogicalAnd),
    ("||", TokenKind::LogicalOr),
    ("==", TokenKind::EqualTo),
    ("!=", TokenKind::NotEqual),
    ("<=", TokenKind::LessThanEqual),
    (">=", TokenKind::GreaterThanEqual),
    ("<<", TokenKind::ShiftLeft),
    (">>", TokenKind::ShiftRight),
    ("|>", TokenKind::Pipeline),
    ("**", TokenKind::Exponent),
    ("+=", TokenKind::PlusEquals),
    ("-=", TokenKind::MinusEquals),
    ("*=", TokenKind::TimesEquals),
    ("/=", TokenKind::DivideEquals),
    ("%=", TokenKind::RemainderEquals),
    ("^=", TokenKind::ExponentEquals),
    ("&=", TokenKind::AndEquals),
    ("|=", TokenKind::OrEquals),
    ("->", TokenKind::RightArrow),
];

/// Tokenize a whole source string.
pub fn lex(src: &str) -> Result<Vec<Token>, String> {
    let mut rest = src;
    let mut out = Vec::new();
    let mut prev: Option<TokenKind> = None;

    while let Some(tok) = lex_one(&mut rest, prev)? {
        prev = Some(tok.kind);
        out.push(tok);
    }

    Ok(out)
}

fn lex_one(src: &mut &str, prev: Option<TokenKind>) -> Result<Option<Token>, String> {
    *src = src.trim_start();
    if src.is_empty() {
        return Ok(None);
    }

    for (text, kind) in THREE_CHAR_OPS {
        if let Some(rest) = src.strip_prefix(text) {
            *src = rest;
            return Ok(Some(Token::new(*kind, text)));
        }
    }

    for (text, kind) in TWO_CHAR_OPS {
        if let Some(rest) = src.strip_prefix(text) {
            *src = rest;
            return Ok(Some(Token::new(*kind, text)));
        }
    }

    let first = src.chars().next().unwrap();

    if first.is_ascii_digit() {
        return lex_number(src, prev).map(Some);
    }

    if first == '\'' {
        return lex_char(src).map(Some);
    }

    if first == '"' {
        return lex_string(src).map(Some);
    }

    if first == '_' || first.is_alphabetic() {
        return Ok(Some(lex_identifier(src)));
    }

    let kind = match first {
        ';' => TokenKind::Semicolon,
        '$' => TokenKind::Dollar,
        ':' => TokenKind::Colon,
        '|' => TokenKind::Pipe,
        '&' => TokenKind::Ampersand,
        '.' => TokenKind::Period,
        '*' => TokenKind::Asterisk,
        '^' => TokenKind::Exponent,
        '!' => TokenKind::Exclamation,
        '+' => TokenKind::Plus,
        ',' => TokenKind::Comma,
        '-' => TokenKind::Minus,
        '/' => TokenKind::Slash,
        '(' => TokenKind::LParen,
        ')' => TokenKind::RParen,
        '[' => TokenKind::LSquare,
        ']' => TokenKind::RSquare,
        '{' => TokenKind::LBrace,
        '}' => TokenKind::RBrace,
        '<' => TokenKind::LAngle,
        '>' => TokenKind::RAngle,
        '=' => TokenKind::Equal,
        '%' => TokenKind::Percent,
        '~' => TokenKind::Tilde,
        '?' => TokenKind::Question,
        _ => return Err(format!("invalid character '{first}'")),
    };

    let len = first.len_utf8();
    let tok = Token::new(kind, &src[..len]);
    *src = &src[len..];
    Ok(Some(tok))
}

fn lex_number(src: &mut &str, prev: Option<TokenKind>) -> Result<Token, String> {
    let s = *src;
    let mut tmp = s;
    let mut base = 10u32;

    if tmp.starts_with("0x") || tmp.starts_with("0X") {
        base = 16;
        tmp = &tmp[2..];
    } else if tmp.starts_with("0b") || tmp.starts_with("0B") {
        base = 2;
        tmp = &tmp[2..];
    }

    let digit_ok = |c: char| match base {
        16 => c.is_ascii_hexdigit(),
        2 => c == '0' || c == '1',
        _ => c.is_ascii_digit(),
    };

    let end = tmp.find(|c: char| !digit_ok(c)).unwrap_or(tmp.len());
    tmp = &tmp[end..];

    let mut had_exp = false;
    if tmp.starts_with('e') || tmp.starts_with('E') {
        if base != 10 {
            return Err("exponents are only supported on base-10 literals".to_string());
        }

        let rest = &tmp[1..];
        let de = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        tmp = &rest[de..];
        had_exp = true;
    }

    let mut consumed = s.len() - tmp.len();
    let post = &s[consumed..];

    if post.starts_with('.') {
        if base != 10 {
            return Err("floating point literals are only valid in base 10".to_string());
        }
        if had_exp {
            return Err("decimal point cannot follow the exponent".to_string());
        }

        // a float only if the previous token was not '.' and a digit follows,
        // so member access like x.0.1 stays three tokens
        let after = &post[1..];
        if prev != Some(TokenKind::Period)
            && after.starts_with(|c: char| c.is_ascii_digit())
        {
            let frac = after
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(after.len());
            consumed += 1 + frac;
        }
    }

    let tok = Token::new(TokenKind::NumberLit, &s[..consumed]);
    *src = &s[consumed..];
    Ok(tok)
}

fn lex_char(src: &mut &str) -> Result<Token, String> {
    let s = &src[1..];
    let c = s
        .chars()
        .next()
        .ok_or_else(|| "unexpected end of input in char literal".to_string())?;

    let rest = &s[c.len_utf8()..];
    if !rest.starts_with('\'') {
        return Err("expected closing ' in char literal".to_string());
    }

    let tok = Token::new(TokenKind::CharLit, &s[..c.len_utf8()]);
    *src = &rest[1..];
    Ok(tok)
}

fn lex_string(src: &mut &str) -> Result<Token, String> {
    // escapes are left intact here; the parser decodes them. only \" matters
    // for finding the closing quote.
    let s = &src[1..];
    let bytes = s.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'"' => {
                let tok = Token::new(TokenKind::StringLit, &s[..i]);
                *src = &s[i + 1..];
                return Ok(tok);
            }
            b'\\' if i + 1 < bytes.len() => i += 2,
            _ => {
                // step over one codepoint
                i += 1;
                while i < bytes.len() && (bytes[i] & 0xC0) == 0x80 {
                    i += 1;
                }
            }
        }
    }

    Err("unterminated string literal".to_string())
}

fn lex_identifier(src: &mut &str) -> Token {
    let end = src
        .find(|c: char| c != '_' && !c.is_alphanumeric())
        .unwrap_or(src.len());
    let text = &src[..end];

    let kind = match text {
        "fn" => TokenKind::Fn,
        "if" => TokenKind::If,
        "let" => TokenKind::Let,
        "else" => TokenKind::Else,
        "while" => TokenKind::While,
        "return" => TokenKind::Return,
        "for" => TokenKind::For,
        "true" | "false" => TokenKind::BoolLit,
        _ => TokenKind::Identifier,
    };

    let tok = Token::new(kind, text);
    *src = &src[end..];
    tok
}
