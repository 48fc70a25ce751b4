//! 微表达式节点
//!
//! 每个节点由一个操作码（含两个立即数标志）和左右两个定宽操作数组成。
//! 操作数的含义取决于标志位和取值：立即数、子表达式（SUB 哨兵）或字段标识。

use crate::field::Field;
use crate::opcode::{LH_IMMEDIATE, OPCODE_MASK, Opcode, RH_IMMEDIATE};

/// 操作数、字段值和求值结果的统一整数类型
#[cfg(feature = "wide-operands")]
pub type Value = u64;

/// 操作数、字段值和求值结果的统一整数类型
#[cfg(not(feature = "wide-operands"))]
pub type Value = u32;

/// 单个操作数的字节宽度
pub const OPERAND_WIDTH: usize = std::mem::size_of::<Value>();

/// 编码后单个节点的字节数：1 字节操作码 + 两个操作数
pub const NODE_SIZE: usize = 1 + 2 * OPERAND_WIDTH;

/// 操作数槽位的解释结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// 立即数
    Immediate(Value),
    /// 下降到下一个未消费的节点
    Sub,
    /// 字段标识（原始值，可能不在已知枚举中）
    Field(Value),
}

impl Operand {
    pub fn field(field: Field) -> Self {
        Self::Field(field.as_raw())
    }
}

/// 微表达式节点
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Node {
    pub opcode: Opcode,
    pub lh_immediate: bool,
    pub rh_immediate: bool,
    pub lh: Value,
    pub rh: Value,
}

impl Node {
    /// 由两个已解释的操作数构造节点
    pub fn new(opcode: Opcode, lh: Operand, rh: Operand) -> Self {
        let (lh_immediate, lh) = Self::split(lh);
        let (rh_immediate, rh) = Self::split(rh);
        Self {
            opcode,
            lh_immediate,
            rh_immediate,
            lh,
            rh,
        }
    }

    /// 两侧均为立即数的节点
    pub fn immediate(opcode: Opcode, lh: Value, rh: Value) -> Self {
        Self::new(opcode, Operand::Immediate(lh), Operand::Immediate(rh))
    }

    fn split(operand: Operand) -> (bool, Value) {
        match operand {
            Operand::Immediate(v) => (true, v),
            Operand::Sub => (false, Field::Sub.as_raw()),
            Operand::Field(raw) => (false, raw),
        }
    }

    fn interpret(immediate: bool, raw: Value) -> Operand {
        if immediate {
            Operand::Immediate(raw)
        } else if raw == Field::Sub.as_raw() {
            Operand::Sub
        } else {
            Operand::Field(raw)
        }
    }

    /// 左操作数
    pub fn left(&self) -> Operand {
        Self::interpret(self.lh_immediate, self.lh)
    }

    /// 右操作数
    pub fn right(&self) -> Operand {
        Self::interpret(self.rh_immediate, self.rh)
    }

    /// 操作码字节（含标志位）
    pub fn op_byte(&self) -> u8 {
        let mut byte = self.opcode.as_raw() & OPCODE_MASK;
        if self.lh_immediate {
            byte |= LH_IMMEDIATE;
        }
        if self.rh_immediate {
            byte |= RH_IMMEDIATE;
        }
        byte
    }

    /// 直接引用的子表达式个数（0..=2）
    pub fn sub_count(&self) -> usize {
        usize::from(self.left() == Operand::Sub) + usize::from(self.right() == Operand::Sub)
    }
}
