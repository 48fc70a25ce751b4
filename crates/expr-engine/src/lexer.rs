//! 表达式文本的词法分析

use crate::error::{ExprError, Result};
use crate::node::Value;
use logos::Logos;
use std::fmt;
use std::ops::Range;

/// 表达式词法单元
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
#[logos(skip r"[ \t\r\n]+")]
pub enum Token<'src> {
    /// 十进制或 `0x` 十六进制整数
    #[regex(r"[0-9]+", |lex| lex.slice().parse::<Value>().ok())]
    #[regex(r"0[xX][0-9a-fA-F]+", |lex| Value::from_str_radix(&lex.slice()[2..], 16).ok())]
    Number(Value),

    /// 字段名
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice())]
    Ident(&'src str),

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

    #[token("<<")]
    Shl,
    #[token(">>")]
    Shr,
    #[token("<")]
    Lt,
    #[token("<=")]
    LtEq,
    #[token(">")]
    Gt,
    #[token(">=")]
    GtEq,
    #[token("==")]
    EqEq,
    #[token("!=")]
    BangEq,

    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("!")]
    Bang,

    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,
    #[token("~")]
    Tilde,

    #[token("?")]
    Question,
    #[token(":")]
    Colon,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
}

impl fmt::Display for Token<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Token::Number(n) => return write!(f, "{}", n),
            Token::Ident(name) => return write!(f, "{}", name),
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::Shl => "<<",
            Token::Shr => ">>",
            Token::Lt => "<",
            Token::LtEq => "<=",
            Token::Gt => ">",
            Token::GtEq => ">=",
            Token::EqEq => "==",
            Token::BangEq => "!=",
            Token::AndAnd => "&&",
            Token::OrOr => "||",
            Token::Bang => "!",
            Token::Amp => "&",
            Token::Pipe => "|",
            Token::Caret => "^",
            Token::Tilde => "~",
            Token::Question => "?",
            Token::Colon => ":",
            Token::LParen => "(",
            Token::RParen => ")",
        };
        write!(f, "{}", s)
    }
}

/// 带源文本区间的词法单元
pub type Spanned<'src> = (Token<'src>, Range<usize>);

/// 将整段文本切分为词法单元
///
/// 遇到无法识别的字符或超出操作数宽度的数字时报错，错误中带偏移。
pub fn tokenize(input: &str) -> Result<Vec<Spanned<'_>>> {
    Token::lexer(input)
        .spanned()
        .map(|(token, span)| match token {
            Ok(token) => Ok((token, span)),
            Err(()) => Err(ExprError::Parse {
                input: input.to_string(),
                offset: span.start,
                message: format!("无法识别的输入 '{}'", &input[span]),
            }),
        })
        .collect()
}
