//! 表达式匹配命令行工具
//!
//! 编译、打印和求值单个表达式，或者加载规则集后对标准输入的
//! JSON-lines 数据包记录逐条输出匹配的规则名。

use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use clap::{Args, Parser, Subcommand};
use expr_engine::{
    BlockValidator, ExprCompiler, PacketRecord, RuleReloader, RuleStore, ValidatorConfig, compile,
    print,
};
use expr_shared::config::AppConfig;
use expr_shared::observability;
use expr_shared::watcher::{FileWatch, FileWatcher};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "expr-match", version, about = "数据包匹配表达式工具")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 编译表达式，输出规范文本、节点数和 base64 编码的表达式块
    Compile {
        expr: String,
    },
    /// 解码并校验 base64 编码的表达式块，输出规范文本
    Print {
        block: String,
    },
    /// 对单条记录求值
    Eval {
        expr: String,
        #[command(flatten)]
        record: RecordArgs,
    },
    /// 加载规则集，对标准输入的每条 JSON 记录输出匹配的规则名
    Run {
        /// 规则集文件，缺省时使用配置中的 rules.path
        #[arg(long)]
        rules: Option<PathBuf>,
        /// 规则集文件变更时自动重新加载
        #[arg(long)]
        watch: bool,
    },
}

#[derive(Args)]
struct RecordArgs {
    #[arg(long, default_value = "0", value_parser = parse_number)]
    mark: u32,
    /// 不指定时视为没有连接跟踪条目
    #[arg(long, value_parser = parse_number)]
    ctmark: Option<u32>,
    #[arg(long, default_value = "0", value_parser = parse_number)]
    secmark: u32,
    #[arg(long, default_value = "0", value_parser = parse_number)]
    l2proto: u32,
    #[arg(long, default_value = "0", value_parser = parse_number)]
    l3proto: u32,
    #[arg(long, default_value = "0", value_parser = parse_number)]
    l4proto: u32,
    #[arg(long, default_value = "0", value_parser = parse_number)]
    l4offset: u32,
}

impl RecordArgs {
    fn to_record(&self) -> Result<PacketRecord> {
        Ok(PacketRecord {
            mark: self.mark,
            ctmark: self.ctmark,
            secmark: self.secmark,
            l2proto: u16::try_from(self.l2proto).context("l2proto 超出 16 位")?,
            l3proto: u16::try_from(self.l3proto).context("l3proto 超出 16 位")?,
            l4proto: u8::try_from(self.l4proto).context("l4proto 超出 8 位")?,
            l4offset: self.l4offset,
        })
    }
}

/// 十进制或 0x 前缀的十六进制
fn parse_number(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("无效数值 '{}': {}", s, e))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load("expr-match").unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });

    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config)?;

    let validator = BlockValidator::new(ValidatorConfig::from(&config.engine));

    match cli.command {
        Command::Compile { expr } => {
            let block = compile(&expr)?;
            validator.validate(&block)?;
            println!("{}", print(&block)?);
            println!("nodes: {}", block.len());
            println!("{}", STANDARD.encode(block.encode()));
        }
        Command::Print { block } => {
            let bytes = STANDARD
                .decode(block.trim())
                .context("base64 解码失败")?;
            let block = validator.decode(&bytes)?;
            println!("{}", print(&block)?);
        }
        Command::Eval { expr, record } => {
            let record = record.to_record()?;
            let rule = ExprCompiler::new(validator).compile("eval", &expr)?;
            let value = rule.evaluate(&record)?;
            println!("{}", rule.display());
            println!("value: {}", value);
            println!("match: {}", value != 0);
        }
        Command::Run { rules, watch } => {
            let path = rules
                .or_else(|| config.rules.path.clone())
                .context("未指定规则集文件 (--rules 或 rules.path)")?;
            let watch = watch || config.rules.watch;
            let debounce = Duration::from_millis(config.rules.debounce_ms);
            run(RuleStore::with_validator(validator), path, watch, debounce).await?;
        }
    }

    Ok(())
}

async fn run(store: RuleStore, path: PathBuf, watch: bool, debounce: Duration) -> Result<()> {
    let reloader = RuleReloader::new(store.clone());
    reloader
        .load(&path)
        .with_context(|| format!("加载规则集失败: {}", path.display()))?;
    info!(rules = store.len(), path = %path.display(), "规则集已加载");

    let watcher = if watch {
        let watcher = FileWatcher::new(&path, debounce, reloader);
        watcher.start().await?;
        Some(watcher)
    } else {
        None
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_no = 0usize;
    let mut invalid = 0usize;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<PacketRecord>(line) {
            Ok(record) => {
                let names = store.matching(&record);
                println!("{}", serde_json::to_string(&names)?);
            }
            Err(e) => {
                invalid += 1;
                warn!(line = line_no, error = %e, "无效的数据包记录");
            }
        }
    }

    if let Some(watcher) = watcher {
        watcher.stop().await?;
    }
    if invalid > 0 {
        bail!("{} 条记录解析失败", invalid);
    }
    Ok(())
}
