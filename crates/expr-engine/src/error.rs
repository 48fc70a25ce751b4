//! 表达式引擎错误类型

use crate::field::Field;
use crate::opcode::Opcode;
use thiserror::Error;

/// 求值错误
///
/// 求值路径上不允许分配内存，因此只携带 `Copy` 数据。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("不支持的操作: {0}")]
    UnsupportedOperation(Opcode),

    #[error("不支持的字段: {0}")]
    UnsupportedField(Field),

    #[error("未知的字段标识: {0}")]
    UnknownField(u64),

    #[error("节点 {0} 处的 else 没有对应的 if")]
    DanglingElse(usize),

    #[error("节点 {0} 处的 if 缺少 else 分支")]
    MissingElse(usize),

    #[error("读取越界: 游标 {0}")]
    OutOfBounds(usize),
}

#[derive(Debug, Error)]
pub enum ExprError {
    #[error("表达式解析失败 (偏移 {offset}): {message}, 输入: '{input}'")]
    Parse {
        input: String,
        offset: usize,
        message: String,
    },

    #[error("节点数 {count} 超出范围 1..={max}")]
    InvalidNodeCount { count: u64, max: usize },

    #[error("表达式块长度不符: 期望 {expected} 字节, 实际 {actual} 字节")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("节点 {index} 的操作码无效: {raw:#04x}")]
    InvalidOpcode { index: usize, raw: u8 },

    #[error("分配表达式块存储失败: {bytes} 字节")]
    AllocationFailed { bytes: usize },

    #[error("节点数不符: 声明 {declared}, 实际消费 {consumed}")]
    NodeCountMismatch { declared: usize, consumed: usize },

    #[error("表达式块在节点 {index} 处越界读取")]
    OverRead { index: usize },

    #[error("节点 {index} 引用了未知字段标识 {raw}")]
    UnknownField { index: usize, raw: u64 },

    #[error("节点 {index} 引用了不支持的字段: {field}")]
    UnsupportedField { index: usize, field: Field },

    #[error("嵌套深度超过上限 {max}")]
    DepthExceeded { max: usize },

    #[error("节点 {index} 使用了不支持的操作: {opcode}")]
    UnsupportedOperation { index: usize, opcode: Opcode },

    #[error("节点 {index} 处的条件表达式结构无效")]
    MalformedConditional { index: usize },

    #[error("表达式块校验超时 ({timeout_ms}ms)")]
    ValidationTimeout { timeout_ms: u64 },

    #[error("规则未找到: {0}")]
    RuleNotFound(String),

    #[error("规则集无效: {0}")]
    InvalidRuleSet(String),

    #[error("规则集加载失败: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Base64 解码失败: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("表达式求值失败: {0}")]
    Eval(#[from] EvalError),
}

impl ExprError {
    /// 用于指标标签的简短原因
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Parse { .. } => "parse",
            Self::InvalidNodeCount { .. } => "node_count",
            Self::LengthMismatch { .. } => "length",
            Self::InvalidOpcode { .. } => "opcode",
            Self::AllocationFailed { .. } => "allocation",
            Self::NodeCountMismatch { .. } => "consumption",
            Self::OverRead { .. } => "over_read",
            Self::UnknownField { .. } => "unknown_field",
            Self::UnsupportedField { .. } => "unsupported_field",
            Self::DepthExceeded { .. } => "depth",
            Self::UnsupportedOperation { .. } => "unsupported_operation",
            Self::MalformedConditional { .. } => "conditional",
            Self::ValidationTimeout { .. } => "timeout",
            Self::RuleNotFound(_) => "not_found",
            Self::InvalidRuleSet(_) => "rule_set",
            Self::Config(_) => "config",
            Self::Base64(_) => "base64",
            Self::Eval(_) => "eval",
        }
    }
}

pub type Result<T> = std::result::Result<T, ExprError>;
