//! 表达式文本解析
//!
//! 优先级爬升（Pratt）解析二元运算，前缀处理一元运算和括号，
//! 最外层处理右结合的三元条件表达式。运算符优先级与 C 一致。

use crate::ast::{Expr, binary_precedence};
use crate::error::{ExprError, Result};
use crate::field::Field;
use crate::lexer::{Spanned, Token, tokenize};
use crate::opcode::Opcode;

/// 最大语法嵌套层数，防止恶意输入耗尽栈
const MAX_NESTING: usize = 256;

/// 语法树最大深度；左结合长链在循环里构建，不经过嵌套计数，需单独限制
pub const MAX_TREE_DEPTH: usize = MAX_NESTING;

/// 子树及其深度
type Parsed = (Expr, usize);

/// 解析一段完整的表达式文本
pub fn parse(input: &str) -> Result<Expr> {
    let mut parser = Parser::new(input)?;
    let (expr, _) = parser.parse_expr()?;

    if let Some((token, span)) = parser.peek_spanned() {
        return Err(parser.error_at(span.start, format!("多余的输入 '{}'", token)));
    }
    Ok(expr)
}

struct Parser<'src> {
    input: &'src str,
    tokens: Vec<Spanned<'src>>,
    pos: usize,
    depth: usize,
}

fn binary_op(token: &Token<'_>) -> Option<Opcode> {
    let op = match token {
        Token::OrOr => Opcode::LogicalOr,
        Token::AndAnd => Opcode::LogicalAnd,
        Token::Pipe => Opcode::BitOr,
        Token::Caret => Opcode::BitXor,
        Token::Amp => Opcode::BitAnd,
        Token::EqEq => Opcode::Eq,
        Token::BangEq => Opcode::Ne,
        Token::Lt => Opcode::Lt,
        Token::LtEq => Opcode::Le,
        Token::Gt => Opcode::Gt,
        Token::GtEq => Opcode::Ge,
        Token::Shl => Opcode::Shl,
        Token::Shr => Opcode::Shr,
        Token::Plus => Opcode::Add,
        Token::Minus => Opcode::Sub,
        Token::Star => Opcode::Mul,
        Token::Slash => Opcode::Div,
        Token::Percent => Opcode::Mod,
        _ => return None,
    };
    Some(op)
}

fn unary_op(token: &Token<'_>) -> Option<Opcode> {
    match token {
        Token::Minus => Some(Opcode::Neg),
        Token::Bang => Some(Opcode::LogicalNot),
        Token::Tilde => Some(Opcode::BitNot),
        _ => None,
    }
}

impl<'src> Parser<'src> {
    fn new(input: &'src str) -> Result<Self> {
        Ok(Self {
            input,
            tokens: tokenize(input)?,
            pos: 0,
            depth: 0,
        })
    }

    fn peek(&self) -> Option<&Token<'src>> {
        self.tokens.get(self.pos).map(|(token, _)| token)
    }

    fn peek_spanned(&self) -> Option<&Spanned<'src>> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Spanned<'src>> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// 当前词法单元的起始偏移；到达末尾时为输入长度
    fn offset(&self) -> usize {
        self.peek_spanned()
            .map(|(_, span)| span.start)
            .unwrap_or(self.input.len())
    }

    fn error_at(&self, offset: usize, message: impl Into<String>) -> ExprError {
        ExprError::Parse {
            input: self.input.to_string(),
            offset,
            message: message.into(),
        }
    }

    fn unexpected(&self, expected: &str) -> ExprError {
        match self.peek() {
            Some(token) => self.error_at(
                self.offset(),
                format!("期望{}，实际为 '{}'", expected, token),
            ),
            None => self.error_at(self.offset(), format!("期望{}，但输入已结束", expected)),
        }
    }

    fn expect(&mut self, expected: Token<'src>) -> Result<()> {
        match self.peek() {
            Some(token) if *token == expected => {
                self.pos += 1;
                Ok(())
            }
            _ => Err(self.unexpected(&format!(" '{}'", expected))),
        }
    }

    /// 在子树之上加一层，超过最大深度时报错
    fn grow(&self, offset: usize, depth: usize) -> Result<usize> {
        let depth = depth + 1;
        if depth > MAX_TREE_DEPTH {
            return Err(self.error_at(
                offset,
                format!("表达式深度超过 {} 层", MAX_TREE_DEPTH),
            ));
        }
        Ok(depth)
    }

    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.depth >= MAX_NESTING {
            return Err(self.error_at(self.offset(), format!("嵌套超过 {} 层", MAX_NESTING)));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    /// 条件表达式：`binary ('?' expr ':' expr)?`
    fn parse_expr(&mut self) -> Result<Parsed> {
        self.nested(|p| {
            let (cond, cond_depth) = p.parse_pratt(0)?;
            if p.peek() != Some(&Token::Question) {
                return Ok((cond, cond_depth));
            }
            let offset = p.offset();
            p.advance();
            let (then, then_depth) = p.parse_expr()?;
            p.expect(Token::Colon)?;
            let (otherwise, otherwise_depth) = p.parse_expr()?;
            let depth = p.grow(offset, cond_depth.max(then_depth).max(otherwise_depth))?;
            Ok((Expr::conditional(cond, then, otherwise), depth))
        })
    }

    fn parse_pratt(&mut self, min_prec: u8) -> Result<Parsed> {
        let (mut left, mut depth) = self.parse_prefix()?;

        while let Some(op) = self.peek().and_then(binary_op) {
            let prec = binary_precedence(op).unwrap_or(0);
            if prec < min_prec {
                break;
            }
            let offset = self.offset();
            self.advance();

            let (right, right_depth) = self.parse_pratt(prec + 1)?;
            depth = self.grow(offset, depth.max(right_depth))?;
            left = Expr::binary(op, left, right);
        }

        Ok((left, depth))
    }

    fn parse_prefix(&mut self) -> Result<Parsed> {
        self.nested(|p| match p.peek().and_then(unary_op) {
            Some(op) => {
                let offset = p.offset();
                p.advance();
                let (operand, depth) = p.parse_prefix()?;
                Ok((Expr::unary(op, operand), p.grow(offset, depth)?))
            }
            None => p.parse_atom(),
        })
    }

    fn parse_atom(&mut self) -> Result<Parsed> {
        let offset = self.offset();
        match self.peek().copied() {
            Some(Token::Number(value)) => {
                self.advance();
                Ok((Expr::Literal(value), 1))
            }
            Some(Token::Ident(name)) => {
                let field = Field::from_name(name)
                    .ok_or_else(|| self.error_at(offset, format!("未知字段 '{}'", name)))?;
                self.advance();
                Ok((Expr::Field(field), 1))
            }
            Some(Token::LParen) => {
                self.advance();
                let parsed = self.parse_expr()?;
                self.expect(Token::RParen)?;
                Ok(parsed)
            }
            _ => Err(self.unexpected("数字、字段或 '('")),
        }
    }
}
