//! 表达式块结构校验
//!
//! 对不可信的表达式块做一次有界的前序遍历，确认：
//!
//! - 声明的节点数等于遍历实际消费的节点数，既不越界也不残留
//! - 每个非立即数、非 SUB 的操作数都是已知且受支持的字段
//! - 嵌套深度不超过上限
//! - `if` 后紧跟 `else`，不存在孤立的 `else`
//! - 不使用求值器不执行的保留操作
//!
//! 校验受截止时间约束，超时即拒绝。通过校验的块可以安全地交给
//! [`crate::evaluator::Evaluator`]。

use crate::block::ExprBlock;
use crate::error::{ExprError, Result};
use crate::field::{Field, FieldSet, PacketRecord};
use crate::node::{Node, Operand};
use crate::opcode::Opcode;
use expr_shared::config::EngineConfig;
use std::time::{Duration, Instant};
use tracing::debug;

/// 每遍历这么多节点检查一次截止时间
const DEADLINE_CHECK_INTERVAL: usize = 64;

/// 校验参数
#[derive(Debug, Clone, Copy)]
pub struct ValidatorConfig {
    pub max_nodes: usize,
    pub max_depth: usize,
    pub timeout: Duration,
    /// 解析器支持的字段
    pub fields: FieldSet,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_nodes: 4096,
            max_depth: 64,
            timeout: Duration::from_millis(50),
            fields: PacketRecord::FIELDS,
        }
    }
}

impl From<&EngineConfig> for ValidatorConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_nodes: config.max_nodes,
            max_depth: config.max_depth,
            timeout: Duration::from_millis(config.validation_timeout_ms),
            fields: PacketRecord::FIELDS,
        }
    }
}

/// 表达式块校验器
#[derive(Debug, Clone, Default)]
pub struct BlockValidator {
    config: ValidatorConfig,
}

impl BlockValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// 解码并校验来自外部的字节
    pub fn decode(&self, bytes: &[u8]) -> Result<ExprBlock> {
        let block = ExprBlock::decode(bytes, self.config.max_nodes)?;
        self.validate(&block)?;
        Ok(block)
    }

    /// 校验表达式块的结构
    pub fn validate(&self, block: &ExprBlock) -> Result<()> {
        let declared = block.len();
        if declared == 0 || declared > self.config.max_nodes {
            return Err(ExprError::InvalidNodeCount {
                count: declared as u64,
                max: self.config.max_nodes,
            });
        }

        let mut walk = Walk {
            nodes: block.nodes(),
            config: &self.config,
            deadline: Instant::now() + self.config.timeout,
            visited: 0,
        };

        let consumed = walk.node(0, 1).inspect_err(|e| {
            debug!(error = %e, nodes = declared, "表达式块校验失败");
        })?;

        if consumed != declared {
            debug!(declared, consumed, "表达式块存在未消费的节点");
            return Err(ExprError::NodeCountMismatch { declared, consumed });
        }

        Ok(())
    }
}

struct Walk<'a> {
    nodes: &'a [Node],
    config: &'a ValidatorConfig,
    deadline: Instant,
    visited: usize,
}

impl Walk<'_> {
    /// 校验以 `cursor` 为根的子树，返回其后的第一个游标
    fn node(&mut self, cursor: usize, depth: usize) -> Result<usize> {
        if depth > self.config.max_depth {
            return Err(ExprError::DepthExceeded {
                max: self.config.max_depth,
            });
        }
        self.check_deadline()?;

        let node = self
            .nodes
            .get(cursor)
            .ok_or(ExprError::OverRead { index: cursor })?;

        match node.opcode {
            op if op.is_unsupported() => {
                return Err(ExprError::UnsupportedOperation {
                    index: cursor,
                    opcode: op,
                });
            }
            Opcode::Else => return Err(ExprError::MalformedConditional { index: cursor }),
            _ => {}
        }

        let next = self.operand(cursor, node.left(), cursor + 1, depth)?;

        if node.opcode == Opcode::If {
            return self.branches(cursor, node, next, depth);
        }

        self.operand(cursor, node.right(), next, depth)
    }

    /// `if` 的右操作数必须下降到一个 `else` 节点，其两个操作数即两个分支
    fn branches(&mut self, cursor: usize, node: &Node, next: usize, depth: usize) -> Result<usize> {
        let paired = node.right() == Operand::Sub
            && self
                .nodes
                .get(next)
                .is_some_and(|n| n.opcode == Opcode::Else);
        if !paired {
            return Err(ExprError::MalformedConditional { index: cursor });
        }

        self.check_deadline()?;
        let else_node = &self.nodes[next];
        let after = self.operand(next, else_node.left(), next + 1, depth)?;
        self.operand(next, else_node.right(), after, depth)
    }

    fn operand(&mut self, index: usize, operand: Operand, next: usize, depth: usize) -> Result<usize> {
        match operand {
            Operand::Immediate(_) => Ok(next),
            Operand::Sub => self.node(next, depth + 1),
            Operand::Field(raw) => {
                let field = Field::from_raw(raw).ok_or(ExprError::UnknownField {
                    index,
                    raw: u64::from(raw),
                })?;
                if !self.config.fields.contains(field) {
                    return Err(ExprError::UnsupportedField { index, field });
                }
                Ok(next)
            }
        }
    }

    fn check_deadline(&mut self) -> Result<()> {
        if self.visited % DEADLINE_CHECK_INTERVAL == 0 && Instant::now() >= self.deadline {
            return Err(ExprError::ValidationTimeout {
                timeout_ms: self.config.timeout.as_millis() as u64,
            });
        }
        self.visited += 1;
        Ok(())
    }
}
