//! 表达式规则
//!
//! 规则拥有一个已校验的表达式块，对每条输入记录求值并给出是否匹配。
//! 规则构造后不可变；替换时构造新规则，旧规则在最后一个引用释放时回收。

use crate::block::ExprBlock;
use crate::error::{EvalError, Result};
use crate::evaluator::Evaluator;
use crate::field::{FieldResolver, FieldSet};
use crate::node::Value;
use crate::printer;
use crate::validator::BlockValidator;
use chrono::{DateTime, Utc};
use metrics::counter;
use tracing::warn;

/// 已安装的表达式规则
#[derive(Debug, Clone)]
pub struct ExprRule {
    name: String,
    block: ExprBlock,
    /// 规范文本
    text: String,
    required_fields: FieldSet,
    /// 编译版本号，每次安装或替换递增
    generation: u64,
    installed_at: DateTime<Utc>,
}

impl ExprRule {
    /// 校验表达式块并生成规则；校验失败时不产生任何状态
    pub fn install(
        name: &str,
        block: ExprBlock,
        validator: &BlockValidator,
        generation: u64,
    ) -> Result<Self> {
        validator.validate(&block)?;
        let text = printer::print(&block)?;

        Ok(Self {
            name: name.to_string(),
            required_fields: block.fields(),
            block,
            text,
            generation,
            installed_at: Utc::now(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn block(&self) -> &ExprBlock {
        &self.block
    }

    pub fn required_fields(&self) -> FieldSet {
        self.required_fields
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn installed_at(&self) -> DateTime<Utc> {
        self.installed_at
    }

    /// 对一条记录求值，返回原始结果
    pub fn evaluate<R>(&self, record: &R) -> std::result::Result<Value, EvalError>
    where
        R: FieldResolver + ?Sized,
    {
        Evaluator::evaluate(&self.block, record)
    }

    /// 对一条记录判断是否匹配
    ///
    /// 结果非零即匹配。求值出错时记录告警并视为不匹配。
    pub fn matches<R>(&self, record: &R) -> bool
    where
        R: FieldResolver + ?Sized,
    {
        match self.evaluate(record) {
            Ok(value) => value != 0,
            Err(e) => {
                warn!(rule = %self.name, generation = self.generation, error = %e, "表达式求值失败");
                counter!("expr_eval_errors_total").increment(1);
                false
            }
        }
    }

    /// 规范文本
    pub fn display(&self) -> &str {
        &self.text
    }

    /// 规则选项形式，例如 `--expr 'ctmark == 0'`
    pub fn to_rule_option(&self) -> String {
        format!("--expr '{}'", self.text)
    }
}
