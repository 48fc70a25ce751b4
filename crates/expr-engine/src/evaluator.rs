//! 表达式求值器
//!
//! 对前序存放的节点序列做递归下降：读取游标处节点，分别解析左右操作数
//! （立即数、子表达式或字段），应用操作码，返回结果和下一个未消费节点的位置。
//! 每个节点恰好访问一次，递归深度等于树深度。
//!
//! 求值器不做结构校验，调用方应只传入经过 [`crate::validator::BlockValidator`]
//! 校验的表达式块。即便如此，所有读取都带边界检查，结构错误会以 [`EvalError`]
//! 返回而不会越界。

use crate::block::ExprBlock;
use crate::error::EvalError;
use crate::field::{Field, FieldResolver};
use crate::node::{Node, Operand, Value};
use crate::opcode::Opcode;

/// 表达式求值器
pub struct Evaluator;

impl Evaluator {
    /// 从根节点求值
    pub fn evaluate<R>(block: &ExprBlock, record: &R) -> Result<Value, EvalError>
    where
        R: FieldResolver + ?Sized,
    {
        Self::evaluate_from(block, 0, record).map(|(value, _)| value)
    }

    /// 从指定游标求值，返回结果和紧随该子表达式之后的游标
    pub fn evaluate_from<R>(
        block: &ExprBlock,
        cursor: usize,
        record: &R,
    ) -> Result<(Value, usize), EvalError>
    where
        R: FieldResolver + ?Sized,
    {
        Self::descend(block.nodes(), cursor, record)
    }

    fn descend<R>(nodes: &[Node], cursor: usize, record: &R) -> Result<(Value, usize), EvalError>
    where
        R: FieldResolver + ?Sized,
    {
        let node = nodes.get(cursor).ok_or(EvalError::OutOfBounds(cursor))?;
        let mut next = cursor + 1;

        if node.opcode == Opcode::Else {
            return Err(EvalError::DanglingElse(cursor));
        }

        let lh = Self::operand(nodes, node.left(), &mut next, record)?;

        if node.opcode == Opcode::If {
            return Self::conditional(nodes, cursor, node, lh, next, record);
        }

        let rh = Self::operand(nodes, node.right(), &mut next, record)?;
        let result = apply(node.opcode, lh, rh)?;

        Ok((result, next))
    }

    /// `if` 节点的右侧必须是紧随其后的 `else` 节点，两个分支都会求值
    fn conditional<R>(
        nodes: &[Node],
        cursor: usize,
        node: &Node,
        condition: Value,
        mut next: usize,
        record: &R,
    ) -> Result<(Value, usize), EvalError>
    where
        R: FieldResolver + ?Sized,
    {
        if node.right() != Operand::Sub {
            return Err(EvalError::MissingElse(cursor));
        }
        let branches = nodes.get(next).ok_or(EvalError::OutOfBounds(next))?;
        if branches.opcode != Opcode::Else {
            return Err(EvalError::MissingElse(cursor));
        }
        next += 1;

        let on_true = Self::operand(nodes, branches.left(), &mut next, record)?;
        let on_false = Self::operand(nodes, branches.right(), &mut next, record)?;

        let value = if condition != 0 { on_true } else { on_false };
        Ok((value, next))
    }

    /// 解析一个操作数槽位；子表达式会推进 `next`
    fn operand<R>(
        nodes: &[Node],
        operand: Operand,
        next: &mut usize,
        record: &R,
    ) -> Result<Value, EvalError>
    where
        R: FieldResolver + ?Sized,
    {
        match operand {
            Operand::Immediate(value) => Ok(value),
            Operand::Sub => {
                let (value, end) = Self::descend(nodes, *next, record)?;
                *next = end;
                Ok(value)
            }
            Operand::Field(raw) => {
                let field = Field::from_raw(raw).ok_or(EvalError::UnknownField(u64::from(raw)))?;
                record
                    .resolve(field)
                    .ok_or(EvalError::UnsupportedField(field))
            }
        }
    }
}

/// 对已求出的左右操作数应用操作码
///
/// - 算术按 2^宽度 取模回绕
/// - 关系和逻辑运算结果只有 0 和 1
/// - 移位量按位宽取模
/// - 除零和模零结果为 0（不匹配）
/// - `&&` / `||` 不短路，两侧在此之前都已求值
pub fn apply(opcode: Opcode, lh: Value, rh: Value) -> Result<Value, EvalError> {
    let result = match opcode {
        Opcode::None => lh,
        Opcode::Add => lh.wrapping_add(rh),
        Opcode::Sub => lh.wrapping_sub(rh),
        Opcode::Mul => lh.wrapping_mul(rh),
        Opcode::Div => lh.checked_div(rh).unwrap_or(0),
        Opcode::Mod => lh.checked_rem(rh).unwrap_or(0),
        Opcode::Neg => lh.wrapping_neg(),

        Opcode::Lt => Value::from(lh < rh),
        Opcode::Le => Value::from(lh <= rh),
        Opcode::Eq => Value::from(lh == rh),
        Opcode::Ne => Value::from(lh != rh),
        Opcode::Gt => Value::from(lh > rh),
        Opcode::Ge => Value::from(lh >= rh),

        Opcode::LogicalNot => Value::from(lh == 0),
        Opcode::LogicalAnd => Value::from(lh != 0 && rh != 0),
        Opcode::LogicalOr => Value::from(lh != 0 || rh != 0),

        Opcode::Shl => lh.wrapping_shl(shift_amount(rh)),
        Opcode::Shr => lh.wrapping_shr(shift_amount(rh)),
        Opcode::BitNot => !lh,
        Opcode::BitAnd => lh & rh,
        Opcode::BitOr => lh | rh,
        Opcode::BitXor => lh ^ rh,

        Opcode::Assign | Opcode::Offset | Opcode::Deref | Opcode::If | Opcode::Else => {
            return Err(EvalError::UnsupportedOperation(opcode));
        }
    };
    Ok(result)
}

fn shift_amount(rh: Value) -> u32 {
    // 掩码后必然小于位宽
    (rh & Value::from(Value::BITS as u8 - 1)) as u32
}
