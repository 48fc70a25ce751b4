//! 表达式块
//!
//! 一个表达式块是按前序（父节点、左子树、右子树）连续存放的节点序列，
//! 附带显式的节点数。线上格式：
//!
//! ```text
//! +----------------+-----------------------------------------------+
//! | count: u32 LE  | count × ( op: u8 | lh: Value LE | rh: Value LE ) |
//! +----------------+-----------------------------------------------+
//! ```
//!
//! 解码来自外部的字节时总是复制到自有存储中，之后不再引用原缓冲区。
//! 解码只检查格式；结构合法性由 [`crate::validator::BlockValidator`] 负责。

use crate::error::{ExprError, Result};
use crate::field::{Field, FieldSet};
use crate::node::{NODE_SIZE, Node, OPERAND_WIDTH, Operand, Value};
use crate::opcode::{LH_IMMEDIATE, OPCODE_MASK, Opcode, RH_IMMEDIATE};
use std::sync::Arc;

/// 节点数字段的字节数
pub const COUNT_SIZE: usize = 4;

/// 表达式块
///
/// 构造后不可变，克隆只增加引用计数。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExprBlock {
    nodes: Arc<[Node]>,
}

impl ExprBlock {
    /// 由节点序列构造（不做结构校验）
    pub fn new(nodes: Vec<Node>) -> Self {
        Self {
            nodes: nodes.into(),
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Node> {
        self.nodes.get(index)
    }

    /// 块中引用到的已知字段
    pub fn fields(&self) -> FieldSet {
        self.nodes
            .iter()
            .flat_map(|node| [node.left(), node.right()])
            .filter_map(|operand| match operand {
                Operand::Field(raw) => Field::from_raw(raw),
                _ => None,
            })
            .fold(FieldSet::empty(), FieldSet::with)
    }

    /// 编码后的字节数
    pub fn encoded_len(&self) -> usize {
        COUNT_SIZE + self.nodes.len() * NODE_SIZE
    }

    /// 编码为线上格式
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        // 节点数已受 max_nodes 约束，不会超过 u32
        let count = u32::try_from(self.nodes.len()).unwrap_or(u32::MAX);
        out.extend_from_slice(&count.to_le_bytes());
        for node in self.nodes.iter() {
            out.push(node.op_byte());
            out.extend_from_slice(&node.lh.to_le_bytes());
            out.extend_from_slice(&node.rh.to_le_bytes());
        }
        out
    }

    /// 从不可信的字节解码
    ///
    /// 先检查节点数是否在 `1..=max_nodes` 之内，再检查总长度，最后复制到自有存储。
    pub fn decode(bytes: &[u8], max_nodes: usize) -> Result<Self> {
        let (count_bytes, body) =
            bytes
                .split_first_chunk::<COUNT_SIZE>()
                .ok_or(ExprError::LengthMismatch {
                    expected: COUNT_SIZE,
                    actual: bytes.len(),
                })?;

        let count = u32::from_le_bytes(*count_bytes);
        let count = usize::try_from(count)
            .ok()
            .filter(|c| (1..=max_nodes).contains(c))
            .ok_or(ExprError::InvalidNodeCount {
                count: u64::from(count),
                max: max_nodes,
            })?;

        let expected = count * NODE_SIZE;
        if body.len() != expected {
            return Err(ExprError::LengthMismatch {
                expected: COUNT_SIZE + expected,
                actual: bytes.len(),
            });
        }

        let mut nodes = Vec::new();
        nodes
            .try_reserve_exact(count)
            .map_err(|_| ExprError::AllocationFailed {
                bytes: count * std::mem::size_of::<Node>(),
            })?;

        for (index, chunk) in body.chunks_exact(NODE_SIZE).enumerate() {
            nodes.push(decode_node(index, chunk)?);
        }

        Ok(Self::new(nodes))
    }
}

fn decode_node(index: usize, chunk: &[u8]) -> Result<Node> {
    let op_byte = chunk[0];
    let raw = op_byte & OPCODE_MASK;
    let opcode = Opcode::from_raw(raw).ok_or(ExprError::InvalidOpcode { index, raw })?;

    Ok(Node {
        opcode,
        lh_immediate: op_byte & LH_IMMEDIATE != 0,
        rh_immediate: op_byte & RH_IMMEDIATE != 0,
        lh: read_value(&chunk[1..1 + OPERAND_WIDTH]),
        rh: read_value(&chunk[1 + OPERAND_WIDTH..NODE_SIZE]),
    })
}

fn read_value(bytes: &[u8]) -> Value {
    let mut buf = [0u8; OPERAND_WIDTH];
    buf.copy_from_slice(bytes);
    Value::from_le_bytes(buf)
}

impl From<Vec<Node>> for ExprBlock {
    fn from(nodes: Vec<Node>) -> Self {
        Self::new(nodes)
    }
}
