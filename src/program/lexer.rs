use super::diagnostics::{Diagnostic, Span};
use logos::Logos;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
pub enum Token {
    #[regex(r"//[^\n]*", logos::skip)]
    #[regex(r"/\*([^*]|\*+[^*/])*\*+/", logos::skip)]
    Comment,

    /// A preprocessor line. Only `#pragma` is accepted, and ignored.
    #[regex(r"#[^\n]*", |lex| lex.slice().to_string())]
    Directive(String),

    #[token("__kernel")]
    #[token("kernel")]
    Kernel,
    #[token("void")]
    Void,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("for")]
    For,
    #[token("while")]
    While,
    #[token("return")]
    Return,
    #[token("break")]
    Break,
    #[token("continue")]
    Continue,
    #[token("const")]
    Const,
    #[token("__global")]
    #[token("global")]
    Global,
    #[token("__constant")]
    #[token("constant")]
    Constant,
    #[token("__local")]
    #[token("local")]
    Local,
    #[token("__private")]
    #[token("private")]
    Private,
    #[token("restrict")]
    #[token("__restrict")]
    #[token("volatile")]
    Restrict,
    #[token("unsigned")]
    Unsigned,
    #[token("true")]
    True,
    #[token("false")]
    False,

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    #[regex(r"[0-9]+[uUlL]*", |lex| lex.slice().to_string())]
    #[regex(r"0[xX][0-9a-fA-F]+[uUlL]*", |lex| lex.slice().to_string())]
    IntLit(String),

    #[regex(r"[0-9]+\.[0-9]*([eE][+-]?[0-9]+)?[fF]?", |lex| lex.slice().to_string())]
    #[regex(r"\.[0-9]+([eE][+-]?[0-9]+)?[fF]?", |lex| lex.slice().to_string())]
    #[regex(r"[0-9]+[eE][+-]?[0-9]+[fF]?", |lex| lex.slice().to_string())]
    FloatLit(String),

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,
    #[token(";")]
    Semi,
    #[token("?")]
    Question,
    #[token(":")]
    Colon,

    #[token("=")]
    Assign,
    #[token("+=")]
    PlusAssign,
    #[token("-=")]
    MinusAssign,
    #[token("*=")]
    StarAssign,
    #[token("/=")]
    SlashAssign,
    #[token("%=")]
    PercentAssign,
    #[token("&=")]
    AmpAssign,
    #[token("|=")]
    PipeAssign,
    #[token("^=")]
    CaretAssign,
    #[token("<<=")]
    ShlAssign,
    #[token(">>=")]
    ShrAssign,

    #[token("++")]
    PlusPlus,
    #[token("--")]
    MinusMinus,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("!")]
    Bang,
    #[token("~")]
    Tilde,
    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,
    #[token("<<")]
    Shl,
    #[token(">>")]
    Shr,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
}

impl Token {
    pub fn describe(&self) -> String {
        match self {
            Token::Ident(name) => format!("identifier `{}`", name),
            Token::IntLit(s) | Token::FloatLit(s) => format!("literal `{}`", s),
            other => format!("{:?}", other),
        }
    }
}

pub type Spanned = (Token, Span);

/// Tokenize kernel source, replacing identifiers named in `defines` with
/// the tokens of their value.
pub fn lex(source: &str, defines: &[(String, String)]) -> Result<Vec<Spanned>, Diagnostic> {
    let mut expansions: Vec<(String, Vec<Token>)> = Vec::with_capacity(defines.len());
    for (name, value) in defines {
        let mut tokens = Vec::new();
        for (tok, span) in Token::lexer(value).spanned() {
            match tok {
                Ok(tok) => tokens.push(tok),
                Err(()) => {
                    return Err(Diagnostic::new(
                        format!("invalid token in value of define `{}`: `{}`", name, &value[span]),
                        0..0,
                    ))
                }
            }
        }
        expansions.push((name.clone(), tokens));
    }

    let mut out = Vec::new();
    for (tok, span) in Token::lexer(source).spanned() {
        match tok {
            Ok(Token::Ident(name)) => {
                match expansions.iter().find(|(n, _)| *n == name) {
                    Some((_, tokens)) => {
                        out.extend(tokens.iter().cloned().map(|t| (t, span.clone())));
                    }
                    None => out.push((Token::Ident(name), span)),
                }
            }
            Ok(Token::Directive(line)) => {
                let name = directive_name(&line);
                if name != "pragma" {
                    return Err(Diagnostic::new(
                        format!("preprocessor directive `#{}` is not supported", name),
                        span,
                    ));
                }
            }
            Ok(tok) => out.push((tok, span)),
            Err(()) => {
                return Err(Diagnostic::new(
                    format!("unexpected character `{}`", &source[span.clone()]),
                    span,
                ))
            }
        }
    }

    Ok(out)
}

fn directive_name(line: &str) -> &str {
    let rest = line.trim_start_matches('#').trim_start();
    let end = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    &rest[..end]
}
