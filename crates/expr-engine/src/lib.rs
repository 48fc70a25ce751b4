//! 表达式引擎
//!
//! 把形如 `ctmark == 0 && mark > 1` 的表达式编译成紧凑的前序节点块，
//! 对每条数据包记录求值并给出是否匹配：
//! - 文本表达式的词法分析、解析和编译
//! - 线上格式的编解码与不可信输入的结构校验
//! - 不分配内存、不短路的求值器
//! - 规则存储、规则集整体应用和热更新

pub mod ast;
pub mod block;
pub mod compiler;
pub mod error;
pub mod evaluator;
pub mod field;
pub mod lexer;
pub mod node;
pub mod opcode;
pub mod parser;
pub mod printer;
pub mod reload;
pub mod rule;
pub mod ruleset;
pub mod store;
pub mod validator;

pub use block::ExprBlock;
pub use compiler::{ExprCompiler, compile};
pub use error::{EvalError, ExprError, Result};
pub use evaluator::Evaluator;
pub use field::{Field, FieldResolver, FieldSet, PacketRecord};
pub use node::{Node, Operand, Value};
pub use opcode::Opcode;
pub use printer::print;
pub use reload::RuleReloader;
pub use rule::ExprRule;
pub use ruleset::{RuleEntry, RuleSet};
pub use store::{ApplyReport, RuleHandle, RuleStore, RuleStoreStats};
pub use validator::{BlockValidator, ValidatorConfig};
