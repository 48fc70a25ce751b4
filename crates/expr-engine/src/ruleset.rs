//! 规则集文件
//!
//! TOML 格式，每条规则给出名字和文本表达式或 base64 编码的表达式块之一：
//!
//! ```toml
//! [[rules]]
//! name = "unmarked"
//! expr = "ctmark == 0"
//!
//! [[rules]]
//! name = "raw"
//! block = "AQAAAMEEAAAAAgAAAA=="
//! ```

use crate::error::{ExprError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use config::{Config, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// 规则集
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub rules: Vec<RuleEntry>,
}

/// 规则集中的一条规则
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expr: Option<String>,
    /// base64 编码的线上格式
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block: Option<String>,
}

/// 规则来源
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleSource<'a> {
    Text(&'a str),
    Bytes(Vec<u8>),
}

impl RuleEntry {
    pub fn text(name: impl Into<String>, expr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expr: Some(expr.into()),
            block: None,
        }
    }

    pub fn bytes(name: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            name: name.into(),
            expr: None,
            block: Some(STANDARD.encode(bytes)),
        }
    }

    /// 解析规则来源，`expr` 和 `block` 必须恰好给出一个
    pub fn source(&self) -> Result<RuleSource<'_>> {
        match (&self.expr, &self.block) {
            (Some(text), None) => Ok(RuleSource::Text(text)),
            (None, Some(encoded)) => Ok(RuleSource::Bytes(STANDARD.decode(encoded.trim())?)),
            _ => Err(ExprError::InvalidRuleSet(format!(
                "规则 '{}' 必须且只能指定 expr 或 block 之一",
                self.name
            ))),
        }
    }
}

impl RuleSet {
    /// 从 TOML 文件加载
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let set: Self = Config::builder()
            .add_source(File::from(path.as_ref()).format(FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        set.check()?;
        Ok(set)
    }

    /// 从 TOML 文本解析
    pub fn from_toml(text: &str) -> Result<Self> {
        let set: Self = Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        set.check()?;
        Ok(set)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// 规则名非空且不重复
    fn check(&self) -> Result<()> {
        let mut seen = HashSet::with_capacity(self.rules.len());
        for entry in &self.rules {
            if entry.name.trim().is_empty() {
                return Err(ExprError::InvalidRuleSet("规则名称不能为空".to_string()));
            }
            if !seen.insert(entry.name.as_str()) {
                return Err(ExprError::InvalidRuleSet(format!(
                    "规则名称重复: {}",
                    entry.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
        [[rules]]
        name = "unmarked"
        expr = "ctmark == 0"

        [[rules]]
        name = "raw"
        block = "AQAAAMEEAAAAAgAAAA=="
    "#;

    #[test]
    fn test_parse_rule_set() {
        let set = RuleSet::from_toml(SAMPLE).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.rules[0], RuleEntry::text("unmarked", "ctmark == 0"));
        assert_eq!(
            set.rules[0].source().unwrap(),
            RuleSource::Text("ctmark == 0")
        );
        assert!(matches!(set.rules[1].source().unwrap(), RuleSource::Bytes(b) if !b.is_empty()));
    }

    #[test]
    fn test_empty_rule_set() {
        let set = RuleSet::from_toml("").unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn test_entry_must_have_exactly_one_source() {
        let both = RuleEntry {
            name: "both".to_string(),
            expr: Some("1".to_string()),
            block: Some("AA==".to_string()),
        };
        assert!(matches!(both.source(), Err(ExprError::InvalidRuleSet(_))));

        let neither = RuleEntry {
            name: "neither".to_string(),
            expr: None,
            block: None,
        };
        assert!(matches!(neither.source(), Err(ExprError::InvalidRuleSet(_))));

        let garbage = RuleEntry {
            name: "garbage".to_string(),
            expr: None,
            block: Some("not base64!".to_string()),
        };
        assert!(matches!(garbage.source(), Err(ExprError::Base64(_))));
    }

    #[test]
    fn test_bytes_entry() {
        let entry = RuleEntry::bytes("wire", &[1, 2, 3]);
        assert_eq!(entry.source().unwrap(), RuleSource::Bytes(vec![1, 2, 3]));
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let text = r#"
            [[rules]]
            name = "a"
            expr = "1"

            [[rules]]
            name = "a"
            expr = "2"
        "#;
        assert!(matches!(
            RuleSet::from_toml(text),
            Err(ExprError::InvalidRuleSet(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let set = RuleSet::load(file.path()).unwrap();
        assert_eq!(set.len(), 2);

        assert!(matches!(
            RuleSet::load(file.path().with_extension("missing")),
            Err(ExprError::Config(_))
        ));
    }
}
