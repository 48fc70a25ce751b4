//! 微表达式操作码定义

use std::fmt;

/// 操作码占用的低 6 位
pub const OPCODE_MASK: u8 = 0x3F;
/// 左操作数为立即数
pub const LH_IMMEDIATE: u8 = 1 << 6;
/// 右操作数为立即数
pub const RH_IMMEDIATE: u8 = 1 << 7;

/// 操作码
///
/// 数值与线上格式一一对应，不可重排。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    // 算术
    None = 0,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Neg,

    // 关系比较
    Lt = 7,
    Le,
    Eq,
    Ne,
    Gt,
    Ge,

    // 逻辑运算
    LogicalNot = 13,
    LogicalAnd,
    LogicalOr,

    // 位运算
    Shl = 16,
    Shr,
    BitNot,
    BitAnd,
    BitOr,
    BitXor,

    // 保留
    Assign = 22,
    Offset,
    Deref,
    If,
    Else,
}

impl Opcode {
    const ALL: [Opcode; 27] = [
        Self::None,
        Self::Add,
        Self::Sub,
        Self::Mul,
        Self::Div,
        Self::Mod,
        Self::Neg,
        Self::Lt,
        Self::Le,
        Self::Eq,
        Self::Ne,
        Self::Gt,
        Self::Ge,
        Self::LogicalNot,
        Self::LogicalAnd,
        Self::LogicalOr,
        Self::Shl,
        Self::Shr,
        Self::BitNot,
        Self::BitAnd,
        Self::BitOr,
        Self::BitXor,
        Self::Assign,
        Self::Offset,
        Self::Deref,
        Self::If,
        Self::Else,
    ];

    /// 从原始字节（已去掉标志位）解码
    pub fn from_raw(raw: u8) -> Option<Self> {
        Self::ALL.get(usize::from(raw)).copied()
    }

    pub fn as_raw(self) -> u8 {
        self as u8
    }

    /// 一元操作忽略右操作数
    pub fn is_unary(self) -> bool {
        matches!(
            self,
            Self::None | Self::Neg | Self::LogicalNot | Self::BitNot | Self::Deref
        )
    }

    /// 保留但求值器不执行的操作
    pub fn is_unsupported(self) -> bool {
        matches!(self, Self::Assign | Self::Offset | Self::Deref)
    }

    /// 中缀形式的运算符文本，仅二元运算有
    pub fn infix_symbol(self) -> Option<&'static str> {
        let s = match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::LogicalAnd => "&&",
            Self::LogicalOr => "||",
            Self::Shl => "<<",
            Self::Shr => ">>",
            Self::BitAnd => "&",
            Self::BitOr => "|",
            Self::BitXor => "^",
            _ => return None,
        };
        Some(s)
    }

    /// 前缀形式的运算符文本，仅一元运算有
    pub fn prefix_symbol(self) -> Option<&'static str> {
        match self {
            Self::Neg => Some("-"),
            Self::LogicalNot => Some("!"),
            Self::BitNot => Some("~"),
            _ => None,
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::Mod => "mod",
            Self::Neg => "neg",
            Self::Lt => "lt",
            Self::Le => "le",
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Gt => "gt",
            Self::Ge => "ge",
            Self::LogicalNot => "lnot",
            Self::LogicalAnd => "land",
            Self::LogicalOr => "lor",
            Self::Shl => "shl",
            Self::Shr => "shr",
            Self::BitNot => "not",
            Self::BitAnd => "and",
            Self::BitOr => "or",
            Self::BitXor => "xor",
            Self::Assign => "assign",
            Self::Offset => "offset",
            Self::Deref => "deref",
            Self::If => "if",
            Self::Else => "else",
        };
        write!(f, "{}", s)
    }
}
