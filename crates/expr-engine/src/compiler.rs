//! 表达式编译器
//!
//! 将表达式文本编译成前序存放的表达式块：字面量和字段直接放进操作数槽位，
//! 复合子表达式以 SUB 哨兵引用，紧随父节点之后存放。
//! 条件表达式编码为 `{if, cond, SUB}` 后接 `{else, then, otherwise}`。

use crate::ast::Expr;
use crate::block::ExprBlock;
use crate::error::Result;
use crate::node::{Node, Operand};
use crate::opcode::Opcode;
use crate::parser;
use crate::rule::ExprRule;
use crate::validator::BlockValidator;

/// 将表达式文本编译成表达式块（不做结构校验）
///
/// 解析失败时返回带偏移的解析错误，不会产生部分结果。
pub fn compile(text: &str) -> Result<ExprBlock> {
    let expr = parser::parse(text)?;
    Ok(lower(&expr))
}

/// 将语法树展开为节点序列
pub fn lower(expr: &Expr) -> ExprBlock {
    let mut nodes = Vec::new();
    emit(expr, &mut nodes);
    ExprBlock::new(nodes)
}

fn slot(expr: &Expr) -> Operand {
    match expr {
        Expr::Literal(value) => Operand::Immediate(*value),
        Expr::Field(field) => Operand::field(*field),
        _ => Operand::Sub,
    }
}

fn emit_sub(expr: &Expr, out: &mut Vec<Node>) {
    if !expr.is_leaf() {
        emit(expr, out);
    }
}

fn emit(expr: &Expr, out: &mut Vec<Node>) {
    match expr {
        // 单独的字面量或字段：恒等节点
        Expr::Literal(_) | Expr::Field(_) => {
            out.push(Node::new(Opcode::None, slot(expr), Operand::Immediate(0)));
        }
        Expr::Unary { op, operand } => {
            out.push(Node::new(*op, slot(operand), Operand::Immediate(0)));
            emit_sub(operand, out);
        }
        Expr::Binary { op, left, right } => {
            out.push(Node::new(*op, slot(left), slot(right)));
            emit_sub(left, out);
            emit_sub(right, out);
        }
        Expr::Conditional {
            cond,
            then,
            otherwise,
        } => {
            out.push(Node::new(Opcode::If, slot(cond), Operand::Sub));
            emit_sub(cond, out);
            out.push(Node::new(Opcode::Else, slot(then), slot(otherwise)));
            emit_sub(then, out);
            emit_sub(otherwise, out);
        }
    }
}

/// 规则编译器
///
/// 把文本或外部字节变成经过校验的规则，每次成功编译递增版本号。
pub struct ExprCompiler {
    validator: BlockValidator,
    compile_version: u64,
}

impl ExprCompiler {
    pub fn new(validator: BlockValidator) -> Self {
        Self {
            validator,
            compile_version: 0,
        }
    }

    pub fn validator(&self) -> &BlockValidator {
        &self.validator
    }

    /// 从表达式文本编译规则
    pub fn compile(&mut self, name: &str, text: &str) -> Result<ExprRule> {
        let block = compile(text)?;
        self.compile_block(name, block)
    }

    /// 从线上格式的字节编译规则
    pub fn compile_bytes(&mut self, name: &str, bytes: &[u8]) -> Result<ExprRule> {
        let block = ExprBlock::decode(bytes, self.validator.config().max_nodes)?;
        self.compile_block(name, block)
    }

    /// 校验已有的表达式块并生成规则
    pub fn compile_block(&mut self, name: &str, block: ExprBlock) -> Result<ExprRule> {
        let rule = ExprRule::install(name, block, &self.validator, self.compile_version + 1)?;
        self.compile_version += 1;
        Ok(rule)
    }
}

impl Default for ExprCompiler {
    fn default() -> Self {
        Self::new(BlockValidator::default())
    }
}
