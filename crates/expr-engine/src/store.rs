//! 规则存储管理
//!
//! 使用 DashMap 保存按名字索引的规则，每个规则槽位是一个 `ArcSwap`：
//! 替换时先在旁边完成编译和校验，再原子地换入新快照。
//! 正在求值的调用继续持有旧快照，最后一个引用释放时旧块才被回收。

use crate::compiler::ExprCompiler;
use crate::error::{ExprError, Result};
use crate::field::FieldResolver;
use crate::rule::ExprRule;
use crate::ruleset::{RuleSet, RuleSource};
use crate::validator::BlockValidator;
use arc_swap::ArcSwap;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use metrics::counter;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};

type RuleSlot = Arc<ArcSwap<ExprRule>>;

/// 单条规则的读取句柄
///
/// 持有规则槽位本身而非某个快照，之后的替换对句柄立即可见。
#[derive(Clone)]
pub struct RuleHandle {
    slot: RuleSlot,
}

impl RuleHandle {
    /// 当前快照
    pub fn load(&self) -> Arc<ExprRule> {
        self.slot.load_full()
    }

    pub fn matches<R>(&self, record: &R) -> bool
    where
        R: FieldResolver + ?Sized,
    {
        self.slot.load().matches(record)
    }
}

/// 规则存储
#[derive(Clone)]
pub struct RuleStore {
    rules: Arc<DashMap<String, RuleSlot>>,
    /// 规则编译器；管理操作从编译到发布全程持有此锁，版本号按发布顺序单调递增
    compiler: Arc<Mutex<ExprCompiler>>,
}

impl RuleStore {
    /// 创建新的规则存储
    pub fn new() -> Self {
        Self::with_validator(BlockValidator::default())
    }

    pub fn with_validator(validator: BlockValidator) -> Self {
        Self {
            rules: Arc::new(DashMap::new()),
            compiler: Arc::new(Mutex::new(ExprCompiler::new(validator))),
        }
    }

    /// 获取当前存储的规则数量
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// 检查存储是否为空
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// 安装或替换规则（从表达式文本），返回新规则的版本号
    #[instrument(skip(self, text), fields(rule = %name))]
    pub fn install(&self, name: &str, text: &str) -> Result<u64> {
        let mut compiler = self.compiler.lock();
        let rule = compiler.compile(name, text);
        self.publish_checked(name, rule)
    }

    /// 安装或替换规则（从线上格式的字节）
    #[instrument(skip(self, bytes), fields(rule = %name, bytes = bytes.len()))]
    pub fn install_bytes(&self, name: &str, bytes: &[u8]) -> Result<u64> {
        let mut compiler = self.compiler.lock();
        let rule = compiler.compile_bytes(name, bytes);
        self.publish_checked(name, rule)
    }

    /// 替换已存在的规则
    #[instrument(skip(self, text), fields(rule = %name))]
    pub fn replace(&self, name: &str, text: &str) -> Result<u64> {
        let mut compiler = self.compiler.lock();
        if !self.rules.contains_key(name) {
            warn!("替换不存在的规则: {}", name);
            return Err(ExprError::RuleNotFound(name.to_string()));
        }

        let rule = compiler.compile(name, text);
        self.publish_checked(name, rule)
    }

    /// 删除规则
    ///
    /// 只是从表中摘除；正在使用旧快照的求值不受影响。
    #[instrument(skip(self))]
    pub fn remove(&self, name: &str) -> Result<()> {
        let _compiler = self.compiler.lock();
        if self.rules.remove(name).is_some() {
            info!("规则已删除: {}", name);
            Ok(())
        } else {
            warn!("删除不存在的规则: {}", name);
            Err(ExprError::RuleNotFound(name.to_string()))
        }
    }

    /// 获取规则当前快照
    pub fn get(&self, name: &str) -> Option<Arc<ExprRule>> {
        self.rules.get(name).map(|slot| slot.load_full())
    }

    /// 获取规则读取句柄
    pub fn handle(&self, name: &str) -> Option<RuleHandle> {
        self.rules.get(name).map(|slot| RuleHandle {
            slot: Arc::clone(slot.value()),
        })
    }

    /// 检查规则是否存在
    pub fn contains(&self, name: &str) -> bool {
        self.rules.contains_key(name)
    }

    /// 获取所有规则名（已排序）
    pub fn list_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.rules.iter().map(|r| r.key().clone()).collect();
        ids.sort();
        ids
    }

    /// 获取所有规则的当前快照
    pub fn list_all(&self) -> Vec<Arc<ExprRule>> {
        self.rules.iter().map(|r| r.value().load_full()).collect()
    }

    /// 用指定规则判断一条记录
    pub fn matches<R>(&self, name: &str, record: &R) -> Result<bool>
    where
        R: FieldResolver + ?Sized,
    {
        let slot = self
            .rules
            .get(name)
            .ok_or_else(|| ExprError::RuleNotFound(name.to_string()))?;
        Ok(slot.load().matches(record))
    }

    /// 返回与记录匹配的所有规则名（已排序）
    pub fn matching<R>(&self, record: &R) -> Vec<String>
    where
        R: FieldResolver + ?Sized,
    {
        let mut names: Vec<String> = self
            .rules
            .iter()
            .filter(|r| r.value().load().matches(record))
            .map(|r| r.key().clone())
            .collect();
        names.sort();
        names
    }

    /// 整体应用规则集
    ///
    /// 先编译并校验全部规则，任何一条失败则不做任何改动；
    /// 全部成功后安装或替换每条规则，并删除规则集中不存在的规则。
    #[instrument(skip(self, set), fields(rules = set.len()))]
    pub fn apply(&self, set: &RuleSet) -> Result<ApplyReport> {
        let mut compiler = self.compiler.lock();

        let mut compiled = Vec::with_capacity(set.rules.len());
        for entry in &set.rules {
            let rule = entry.source().and_then(|source| match source {
                RuleSource::Text(text) => compiler.compile(&entry.name, text),
                RuleSource::Bytes(bytes) => compiler.compile_bytes(&entry.name, &bytes),
            });
            match rule {
                Ok(rule) => compiled.push(rule),
                Err(e) => {
                    warn!(rule = %entry.name, error = %e, "规则集中的规则无效，放弃整个规则集");
                    counter!("expr_rules_rejected_total", "reason" => e.reason()).increment(1);
                    return Err(e);
                }
            }
        }

        let keep: HashSet<&str> = set.rules.iter().map(|e| e.name.as_str()).collect();
        let mut report = ApplyReport::default();

        for rule in compiled {
            if self.publish(rule) {
                report.replaced += 1;
            } else {
                report.installed += 1;
            }
        }

        let stale: Vec<String> = self
            .rules
            .iter()
            .filter(|r| !keep.contains(r.key().as_str()))
            .map(|r| r.key().clone())
            .collect();
        for name in stale {
            if self.rules.remove(&name).is_some() {
                report.removed += 1;
            }
        }

        info!(
            "规则集已应用: 新增 {}, 替换 {}, 删除 {}",
            report.installed, report.replaced, report.removed
        );
        Ok(report)
    }

    /// 清空所有规则
    #[instrument(skip(self))]
    pub fn clear(&self) {
        let _compiler = self.compiler.lock();
        let count = self.rules.len();
        self.rules.clear();
        info!("已清空 {} 条规则", count);
    }

    /// 获取规则统计信息
    pub fn stats(&self) -> RuleStoreStats {
        let rules = self.list_all();
        let rules_count = rules.len();
        let total_fields: usize = rules.iter().map(|r| r.required_fields().len()).sum();
        let total_nodes: usize = rules.iter().map(|r| r.block().len()).sum();

        RuleStoreStats {
            rules_count,
            total_fields,
            total_nodes,
            avg_fields_per_rule: if rules_count > 0 {
                total_fields as f64 / rules_count as f64
            } else {
                0.0
            },
        }
    }

    /// 调用方须持有编译器锁
    fn publish_checked(&self, name: &str, rule: Result<ExprRule>) -> Result<u64> {
        match rule {
            Ok(rule) => {
                let generation = rule.generation();
                let replaced = self.publish(rule);
                info!(generation, replaced, "规则已安装: {}", name);
                Ok(generation)
            }
            Err(e) => {
                warn!(error = %e, "规则安装被拒绝: {}", name);
                counter!("expr_rules_rejected_total", "reason" => e.reason()).increment(1);
                Err(e)
            }
        }
    }

    /// 换入新快照，返回是否替换了已有规则
    fn publish(&self, rule: ExprRule) -> bool {
        counter!("expr_rules_installed_total").increment(1);
        match self.rules.entry(rule.name().to_string()) {
            Entry::Occupied(slot) => {
                slot.get().store(Arc::new(rule));
                true
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(ArcSwap::from_pointee(rule)));
                false
            }
        }
    }
}

impl Default for RuleStore {
    fn default() -> Self {
        Self::new()
    }
}

/// 规则集应用结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub installed: usize,
    pub replaced: usize,
    pub removed: usize,
}

/// 规则存储统计信息
#[derive(Debug, Clone)]
pub struct RuleStoreStats {
    /// 规则总数
    pub rules_count: usize,
    /// 所有规则使用的字段总数
    pub total_fields: usize,
    /// 所有规则的节点总数
    pub total_nodes: usize,
    /// 平均每条规则使用的字段数
    pub avg_fields_per_rule: f64,
}
