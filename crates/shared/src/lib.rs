//! 共享库
//!
//! 表达式引擎和命令行工具共用的配置加载、日志初始化和文件热更新基础设施。

pub mod config;
pub mod observability;
pub mod watcher;
