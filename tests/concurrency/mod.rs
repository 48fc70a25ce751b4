//! 并发测试模块
//!
//! 多个线程持续求值的同时替换规则，验证每次求值只看到某一个完整版本。

mod hot_swap;

use expr_engine::{PacketRecord, RuleStore};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

/// 读线程数
const READERS: usize = 4;

/// 在写线程运行期间启动读线程，写线程结束后汇总读线程的结果
fn run_with_readers<R, W, T>(store: &RuleStore, reader: R, writer: W) -> Vec<T>
where
    R: Fn(&RuleStore, &AtomicBool) -> T + Send + Sync + 'static,
    W: FnOnce(&RuleStore),
    T: Send + 'static,
{
    let done = Arc::new(AtomicBool::new(false));
    let reader = Arc::new(reader);

    let handles: Vec<_> = (0..READERS)
        .map(|_| {
            let store = store.clone();
            let done = Arc::clone(&done);
            let reader = Arc::clone(&reader);
            thread::spawn(move || reader.as_ref()(&store, &*done))
        })
        .collect();

    writer(store);
    done.store(true, Ordering::Release);

    handles
        .into_iter()
        .map(|h| h.join().expect("读线程 panic"))
        .collect()
}

fn record(mark: u32) -> PacketRecord {
    PacketRecord::default().with_mark(mark)
}
