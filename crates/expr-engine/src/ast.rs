//! 表达式语法树
//!
//! 编译器从文本构造语法树再生成节点；打印器从节点还原语法树再输出文本。
//! 运算符优先级只在这里定义一次。

use crate::field::Field;
use crate::node::Value;
use crate::opcode::Opcode;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Literal(Value),
    Field(Field),
    Unary {
        op: Opcode,
        operand: Box<Expr>,
    },
    Binary {
        op: Opcode,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// `cond ? then : otherwise`
    Conditional {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
}

/// 条件表达式的优先级，低于所有二元运算
pub(crate) const CONDITIONAL_PRECEDENCE: u8 = 5;
/// 一元运算的优先级，高于所有二元运算
pub(crate) const UNARY_PRECEDENCE: u8 = 110;
const ATOM_PRECEDENCE: u8 = 120;

/// 二元运算符的优先级（越大结合越紧），全部左结合
pub(crate) fn binary_precedence(op: Opcode) -> Option<u8> {
    let prec = match op {
        Opcode::LogicalOr => 10,
        Opcode::LogicalAnd => 20,
        Opcode::BitOr => 30,
        Opcode::BitXor => 40,
        Opcode::BitAnd => 50,
        Opcode::Eq | Opcode::Ne => 60,
        Opcode::Lt | Opcode::Le | Opcode::Gt | Opcode::Ge => 70,
        Opcode::Shl | Opcode::Shr => 80,
        Opcode::Add | Opcode::Sub => 90,
        Opcode::Mul | Opcode::Div | Opcode::Mod => 100,
        _ => return None,
    };
    Some(prec)
}

impl Expr {
    pub fn unary(op: Opcode, operand: Expr) -> Self {
        Self::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn binary(op: Opcode, left: Expr, right: Expr) -> Self {
        Self::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn conditional(cond: Expr, then: Expr, otherwise: Expr) -> Self {
        Self::Conditional {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        }
    }

    /// 叶子节点（字面量或字段）可以直接放进操作数槽位
    pub fn is_leaf(&self) -> bool {
        matches!(self, Self::Literal(_) | Self::Field(_))
    }

    fn precedence(&self) -> u8 {
        match self {
            Self::Literal(_) | Self::Field(_) => ATOM_PRECEDENCE,
            Self::Unary { .. } => UNARY_PRECEDENCE,
            Self::Binary { op, .. } => binary_precedence(*op).unwrap_or(ATOM_PRECEDENCE),
            Self::Conditional { .. } => CONDITIONAL_PRECEDENCE,
        }
    }

    fn write_child(&self, f: &mut fmt::Formatter<'_>, min_prec: u8) -> fmt::Result {
        if self.precedence() < min_prec {
            write!(f, "({})", self)
        } else {
            write!(f, "{}", self)
        }
    }
}

/// 规范文本形式：二元运算符和 `?`/`:` 两侧各一个空格，只保留必要的括号
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(value) => write!(f, "{}", value),
            Self::Field(field) => write!(f, "{}", field),
            Self::Unary { op, operand } => {
                write!(f, "{}", op.prefix_symbol().unwrap_or("?"))?;
                operand.write_child(f, UNARY_PRECEDENCE)
            }
            Self::Binary { op, left, right } => {
                let prec = self.precedence();
                left.write_child(f, prec)?;
                write!(f, " {} ", op.infix_symbol().unwrap_or("?"))?;
                // 左结合：同级的右子树需要括号
                right.write_child(f, prec + 1)
            }
            Self::Conditional {
                cond,
                then,
                otherwise,
            } => {
                cond.write_child(f, CONDITIONAL_PRECEDENCE + 1)?;
                write!(f, " ? ")?;
                then.write_child(f, CONDITIONAL_PRECEDENCE)?;
                write!(f, " : ")?;
                otherwise.write_child(f, CONDITIONAL_PRECEDENCE)
            }
        }
    }
}
