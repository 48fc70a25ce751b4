//! 文件热更新模块
//!
//! 使用 `notify` 监听单个文件所在目录，过滤出目标文件的写入、创建和删除事件，
//! 经 debounce 窗口去抖后调用重载回调。监听目录而不是文件本身，
//! 这样编辑器或 K8s ConfigMap 以替换方式更新文件时也能收到事件。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

/// 文件监听器抽象
#[async_trait]
pub trait FileWatch: Send + Sync {
    /// 启动监听
    async fn start(&self) -> Result<()>;

    /// 停止监听并释放资源
    async fn stop(&self) -> Result<()>;
}

/// 文件变更后的重载回调
pub trait ReloadHandler: Send + Sync + 'static {
    fn reload(&self, path: &Path) -> Result<()>;
}

impl<F> ReloadHandler for F
where
    F: Fn(&Path) -> Result<()> + Send + Sync + 'static,
{
    fn reload(&self, path: &Path) -> Result<()> {
        self(path)
    }
}

/// 基于文件系统事件的监听器
pub struct FileWatcher {
    /// 监听的文件
    path: PathBuf,
    /// debounce 窗口，避免文件连续写入触发多次重载
    debounce: Duration,
    handler: Arc<dyn ReloadHandler>,
    /// 用于通知监听循环退出
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl FileWatcher {
    pub fn new(
        path: impl AsRef<Path>,
        debounce: Duration,
        handler: impl ReloadHandler,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            path: path.as_ref().to_path_buf(),
            debounce,
            handler: Arc::new(handler),
            shutdown_tx,
            shutdown_rx,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn watch_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

/// 只关心目标文件的写入、创建和删除事件
fn is_relevant(event: &Event, target: &Path) -> bool {
    let kind_matches = matches!(
        event.kind,
        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
    );
    kind_matches
        && event
            .paths
            .iter()
            .any(|p| p.file_name().is_some() && p.file_name() == target.file_name())
}

#[async_trait]
impl FileWatch for FileWatcher {
    async fn start(&self) -> Result<()> {
        let path = self.path.clone();
        let debounce = self.debounce;
        let handler = Arc::clone(&self.handler);
        let mut shutdown_rx = self.shutdown_rx.clone();

        // notify 回调运行在它自己的线程上，通过 channel 转发到 tokio 任务
        let (event_tx, mut event_rx) = mpsc::channel::<()>(16);

        let mut watcher = notify::recommended_watcher({
            let target = path.clone();
            move |res: notify::Result<Event>| match res {
                Ok(event) if is_relevant(&event, &target) => {
                    let _ = event_tx.try_send(());
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "文件监听器事件错误");
                }
            }
        })
        .context("创建文件监听器失败")?;

        let dir = self.watch_dir();
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("启动文件监听失败: {}", dir.display()))?;

        info!(path = %path.display(), "文件监听已启动");

        tokio::spawn(async move {
            // 监听器随任务存活，任务结束时释放
            let _watcher = watcher;
            loop {
                tokio::select! {
                    Some(()) = event_rx.recv() => {
                        // Debounce：等待窗口期，丢弃窗口内的后续事件
                        tokio::time::sleep(debounce).await;
                        while event_rx.try_recv().is_ok() {}

                        match handler.reload(&path) {
                            Ok(()) => info!(path = %path.display(), "文件变更，已重新加载"),
                            Err(e) => error!(
                                path = %path.display(),
                                error = %e,
                                "文件重新加载失败，保留当前状态"
                            ),
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            info!(path = %path.display(), "文件监听已停止");
                            break;
                        }
                    }
                }
            }
        });

        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);
        Ok(())
    }
}
