//! 表达式打印器
//!
//! 从表达式块还原语法树，再以规范文本输出。输出重新编译后与原块语义相同。

use crate::ast::Expr;
use crate::block::ExprBlock;
use crate::error::{ExprError, Result};
use crate::field::Field;
use crate::node::{Node, Operand};
use crate::opcode::Opcode;

/// 以规范文本输出表达式块
pub fn print(block: &ExprBlock) -> Result<String> {
    decompile(block).map(|expr| expr.to_string())
}

/// 从表达式块还原语法树
///
/// 必须恰好消费全部节点，否则报告节点数不符。
pub fn decompile(block: &ExprBlock) -> Result<Expr> {
    let nodes = block.nodes();
    let (expr, consumed) = node(nodes, 0)?;
    if consumed != nodes.len() {
        return Err(ExprError::NodeCountMismatch {
            declared: nodes.len(),
            consumed,
        });
    }
    Ok(expr)
}

fn node(nodes: &[Node], cursor: usize) -> Result<(Expr, usize)> {
    let n = nodes
        .get(cursor)
        .ok_or(ExprError::OverRead { index: cursor })?;

    if n.opcode == Opcode::Else {
        return Err(ExprError::MalformedConditional { index: cursor });
    }
    if n.opcode.is_unsupported() {
        return Err(ExprError::UnsupportedOperation {
            index: cursor,
            opcode: n.opcode,
        });
    }

    let (left, next) = operand(nodes, cursor, n.left(), cursor + 1)?;

    match n.opcode {
        Opcode::If => {
            let paired = n.right() == Operand::Sub
                && nodes.get(next).is_some_and(|e| e.opcode == Opcode::Else);
            if !paired {
                return Err(ExprError::MalformedConditional { index: cursor });
            }
            let branches = &nodes[next];
            let (then, after) = operand(nodes, next, branches.left(), next + 1)?;
            let (otherwise, end) = operand(nodes, next, branches.right(), after)?;
            Ok((Expr::conditional(left, then, otherwise), end))
        }
        // 一元运算忽略右操作数，但其中的子表达式仍要跳过
        op if op.is_unary() => {
            let (_, end) = operand(nodes, cursor, n.right(), next)?;
            let expr = if op == Opcode::None {
                left
            } else {
                Expr::unary(op, left)
            };
            Ok((expr, end))
        }
        op => {
            let (right, end) = operand(nodes, cursor, n.right(), next)?;
            Ok((Expr::binary(op, left, right), end))
        }
    }
}

fn operand(nodes: &[Node], index: usize, operand: Operand, next: usize) -> Result<(Expr, usize)> {
    match operand {
        Operand::Immediate(value) => Ok((Expr::Literal(value), next)),
        Operand::Sub => node(nodes, next),
        Operand::Field(raw) => {
            let field = Field::from_raw(raw).ok_or(ExprError::UnknownField {
                index,
                raw: u64::from(raw),
            })?;
            Ok((Expr::Field(field), next))
        }
    }
}
