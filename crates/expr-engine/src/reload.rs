//! 规则集热更新
//!
//! 文件变更时重新读取规则集并整体应用到规则存储。
//! 任何一条规则无效时整个规则集被拒绝，存储保持原状。

use crate::error::Result;
use crate::ruleset::RuleSet;
use crate::store::{ApplyReport, RuleStore};
use expr_shared::watcher::ReloadHandler;
use metrics::counter;
use std::path::Path;
use tracing::{info, warn};

/// 规则集重载器
#[derive(Clone)]
pub struct RuleReloader {
    store: RuleStore,
}

impl RuleReloader {
    pub fn new(store: RuleStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &RuleStore {
        &self.store
    }

    /// 加载规则集文件并应用
    pub fn load(&self, path: &Path) -> Result<ApplyReport> {
        let result = RuleSet::load(path).and_then(|set| self.store.apply(&set));
        match &result {
            Ok(report) => {
                counter!("expr_rule_reloads_total", "outcome" => "success").increment(1);
                info!(
                    path = %path.display(),
                    installed = report.installed,
                    replaced = report.replaced,
                    removed = report.removed,
                    "规则集已重新加载"
                );
            }
            Err(e) => {
                counter!("expr_rule_reloads_total", "outcome" => "failure").increment(1);
                warn!(path = %path.display(), error = %e, "规则集重新加载失败，保留当前规则");
            }
        }
        result
    }
}

impl ReloadHandler for RuleReloader {
    fn reload(&self, path: &Path) -> anyhow::Result<()> {
        self.load(path)?;
        Ok(())
    }
}
