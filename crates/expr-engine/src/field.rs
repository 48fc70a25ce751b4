//! 字段标识与字段解析
//!
//! 字段是求值时从输入记录读取的外部值。`FieldResolver` 由调用方提供，
//! 在一次求值期间只读。

use crate::node::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 字段标识
///
/// 数值与线上格式一一对应。`Sub` 是内部哨兵，永远不可解析。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Field {
    None = 0,
    Sub,
    This,
    Mark,
    CtMark,
    SecMark,
    L2Proto,
    L3Proto,
    L4Proto,
    L4Offset,
}

impl Field {
    const ALL: [Field; 10] = [
        Self::None,
        Self::Sub,
        Self::This,
        Self::Mark,
        Self::CtMark,
        Self::SecMark,
        Self::L2Proto,
        Self::L3Proto,
        Self::L4Proto,
        Self::L4Offset,
    ];

    pub fn from_raw(raw: Value) -> Option<Self> {
        usize::try_from(raw)
            .ok()
            .and_then(|i| Self::ALL.get(i))
            .copied()
    }

    pub fn as_raw(self) -> Value {
        Value::from(self as u8)
    }

    /// 表达式文本中使用的名字
    pub fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Sub => "sub",
            Self::This => "this",
            Self::Mark => "mark",
            Self::CtMark => "ctmark",
            Self::SecMark => "secmark",
            Self::L2Proto => "l2proto",
            Self::L3Proto => "l3proto",
            Self::L4Proto => "l4proto",
            Self::L4Offset => "l4offset",
        }
    }

    /// 按名字查找字段；`sub` 不是合法的字段名
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "nfmark" => Some(Self::Mark),
            "sub" => None,
            _ => Self::ALL.iter().copied().find(|f| f.name() == name),
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// 字段集合（位图）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FieldSet(u16);

impl FieldSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn of(fields: &[Field]) -> Self {
        let mut bits = 0u16;
        let mut i = 0;
        while i < fields.len() {
            bits |= 1 << (fields[i] as u8);
            i += 1;
        }
        Self(bits)
    }

    pub const fn with(self, field: Field) -> Self {
        Self(self.0 | 1 << (field as u8))
    }

    pub const fn contains(self, field: Field) -> bool {
        self.0 & (1 << (field as u8)) != 0
    }

    pub const fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Field> {
        Field::ALL.into_iter().filter(move |f| self.contains(*f))
    }
}

/// 字段解析能力
///
/// 返回 `None` 表示当前记录不支持该字段，求值器会将其报告为显式错误，
/// 而不是当作 0 处理。
#[cfg_attr(test, mockall::automock)]
pub trait FieldResolver {
    fn resolve(&self, field: Field) -> Option<Value>;
}

/// 数据包记录
///
/// 求值时的输入记录，字段取自数据包及其连接跟踪条目。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacketRecord {
    /// 数据包标记
    pub mark: u32,
    /// 连接跟踪标记；无连接跟踪条目时为 `None`
    pub ctmark: Option<u32>,
    /// 安全标记
    pub secmark: u32,
    pub l2proto: u16,
    pub l3proto: u16,
    pub l4proto: u8,
    /// 传输层头部相对于网络层头部的偏移
    pub l4offset: u32,
}

impl PacketRecord {
    /// 数据包记录可解析的字段
    pub const FIELDS: FieldSet = FieldSet::of(&[
        Field::None,
        Field::Mark,
        Field::CtMark,
        Field::SecMark,
        Field::L2Proto,
        Field::L3Proto,
        Field::L4Proto,
        Field::L4Offset,
    ]);

    pub fn with_mark(mut self, mark: u32) -> Self {
        self.mark = mark;
        self
    }

    pub fn with_ctmark(mut self, ctmark: u32) -> Self {
        self.ctmark = Some(ctmark);
        self
    }
}

impl FieldResolver for PacketRecord {
    fn resolve(&self, field: Field) -> Option<Value> {
        let value = match field {
            Field::None => 0,
            Field::Mark => Value::from(self.mark),
            // 没有连接跟踪条目时按 0 处理
            Field::CtMark => self.ctmark.map(Value::from).unwrap_or(0),
            Field::SecMark => Value::from(self.secmark),
            Field::L2Proto => Value::from(self.l2proto),
            Field::L3Proto => Value::from(self.l3proto),
            Field::L4Proto => Value::from(self.l4proto),
            Field::L4Offset => Value::from(self.l4offset),
            Field::Sub | Field::This => return None,
        };
        Some(value)
    }
}
