use crate::error::CompileError;
use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, take_while1},
    character::complete::{char, digit1},
    combinator::{map, opt, recognize, value},
    multi::many0,
    sequence::{delimited, pair, tuple},
    IResult,
};
use smol_str::SmolStr;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbol {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    LParen,
    RParen,
    Comma,
    Star,
    Semicolon,
}

impl Symbol {
    fn as_str(&self) -> &'static str {
        match self {
            Symbol::Eq => "=",
            Symbol::Neq => "!=",
            Symbol::Lt => "<",
            Symbol::Lte => "<=",
            Symbol::Gt => ">",
            Symbol::Gte => ">=",
            Symbol::LParen => "(",
            Symbol::RParen => ")",
            Symbol::Comma => ",",
            Symbol::Star => "*",
            Symbol::Semicolon => ";",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Keyword or bare identifier.
    Word(SmolStr),
    Key,
    Value,
    /// `$value.<path>`, holding the raw path after the dot.
    ValuePath(SmolStr),
    /// Single-quoted literal with escapes resolved.
    Str(SmolStr),
    /// Backticked or double-quoted text.
    Quoted(SmolStr),
    Number(SmolStr),
    Symbol(Symbol),
    /// `$` followed by something other than `key`/`value`.
    BadPseudo(SmolStr),
}

impl Token {
    pub fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self, Token::Word(w) if w.eq_ignore_ascii_case(keyword))
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Word(w) | Token::Number(w) | Token::BadPseudo(w) => f.write_str(w),
            Token::Key => f.write_str("$key"),
            Token::Value => f.write_str("$value"),
            Token::ValuePath(p) => write!(f, "$value.{}", p),
            Token::Str(s) => write!(f, "'{}'", s),
            Token::Quoted(s) => write!(f, "`{}`", s),
            Token::Symbol(s) => f.write_str(s.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    /// Byte offset into the query text.
    pub position: usize,
}

fn lex_pseudo(input: &str) -> IResult<&str, Token> {
    let path_char = |c: char| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '[' | ']');
    map(recognize(pair(char('$'), take_while1(path_char))), |s: &str| {
        match s {
            "$key" => Token::Key,
            "$value" => Token::Value,
            _ => match s.strip_prefix("$value.") {
                Some(path) => Token::ValuePath(SmolStr::new(path)),
                None => Token::BadPseudo(SmolStr::new(s)),
            },
        }
    })(input)
}

fn lex_string(input: &str) -> IResult<&str, Token> {
    let body = recognize(many0(alt((
        tag("\\'"),
        tag("\\\\"),
        is_not("'\\"),
        tag("\\"),
    ))));
    map(delimited(char('\''), body, char('\'')), |s: &str| {
        Token::Str(unescape(s))
    })(input)
}

fn lex_quoted(input: &str) -> IResult<&str, Token> {
    let backtick = delimited(char('`'), is_not("`"), char('`'));
    let double = delimited(char('"'), is_not("\""), char('"'));
    map(alt((backtick, double)), |s: &str| Token::Quoted(SmolStr::new(s)))(input)
}

fn lex_number(input: &str) -> IResult<&str, Token> {
    map(
        recognize(tuple((opt(char('-')), digit1, opt(pair(char('.'), digit1))))),
        |s: &str| Token::Number(SmolStr::new(s)),
    )(input)
}

fn lex_word(input: &str) -> IResult<&str, Token> {
    map(take_while1(|c: char| c.is_alphanumeric() || c == '_'), |s: &str| {
        Token::Word(SmolStr::new(s))
    })(input)
}

fn lex_symbol(input: &str) -> IResult<&str, Token> {
    map(
        alt((
            value(Symbol::Neq, tag("!=")),
            value(Symbol::Neq, tag("<>")),
            value(Symbol::Lte, tag("<=")),
            value(Symbol::Gte, tag(">=")),
            value(Symbol::Eq, tag("=")),
            value(Symbol::Lt, tag("<")),
            value(Symbol::Gt, tag(">")),
            value(Symbol::LParen, tag("(")),
            value(Symbol::RParen, tag(")")),
            value(Symbol::Comma, tag(",")),
            value(Symbol::Star, tag("*")),
            value(Symbol::Semicolon, tag(";")),
        )),
        Token::Symbol,
    )(input)
}

fn lex_token(input: &str) -> IResult<&str, Token> {
    alt((
        lex_pseudo,
        lex_string,
        lex_quoted,
        lex_number,
        lex_word,
        lex_symbol,
    ))(input)
}

fn unescape(s: &str) -> SmolStr {
    if !s.contains('\\') {
        return SmolStr::new(s);
    }
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(&next) = chars.peek() {
                if next == '\'' || next == '\\' {
                    out.push(next);
                    chars.next();
                    continue;
                }
            }
        }
        out.push(c);
    }
    SmolStr::from(out)
}

/// Split query text into tokens, keeping byte offsets for error reporting.
pub fn tokenize(input: &str) -> Result<Vec<Spanned>, CompileError> {
    let mut tokens = Vec::new();
    let mut rest = input.trim_start();

    while !rest.is_empty() {
        let position = input.len() - rest.len();
        match lex_token(rest) {
            Ok((_, Token::BadPseudo(name))) => {
                return Err(CompileError::syntax(
                    position,
                    format!("unknown pseudo-column '{}'", name),
                ));
            }
            Ok((remaining, token)) => {
                tokens.push(Spanned { token, position });
                rest = remaining.trim_start();
            }
            Err(_) => {
                let message = match rest.chars().next() {
                    Some('\'') => "unterminated string literal".to_string(),
                    Some('`') | Some('"') => "unterminated quoted identifier".to_string(),
                    Some(c) => format!("unexpected character '{}'", c),
                    None => "unexpected end of input".to_string(),
                };
                return Err(CompileError::syntax(position, message));
            }
        }
    }

    Ok(tokens)
}
