use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::{Notify, Semaphore};

use crate::error::BoxError;

/// 后台任务执行器：请求线程只负责提交，任务的错误和 panic 在任务内部记录
#[derive(Clone)]
pub struct Background {
    inner: Arc<Inner>,
}

struct Inner {
    permits: Semaphore,
    in_flight: AtomicUsize,
    drained: Notify,
    closed: AtomicBool,
}

impl Inner {
    fn finish_one(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }
}

impl Background {
    pub fn new(workers: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                permits: Semaphore::new(workers.max(1)),
                in_flight: AtomicUsize::new(0),
                drained: Notify::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// 提交任务后立即返回；关闭后提交的任务会被丢弃
    pub fn spawn<F>(&self, name: &'static str, job: F) -> bool
    where
        F: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        // 先计数再检查关闭标记，shutdown 要么看到计数，要么让这里看到关闭
        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
        if self.inner.closed.load(Ordering::SeqCst) {
            self.inner.finish_one();
            tracing::warn!(job = name, "Background runner is shutting down, job dropped");
            return false;
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            match inner.permits.acquire().await {
                Ok(_permit) => match AssertUnwindSafe(job).catch_unwind().await {
                    Ok(Ok(())) => tracing::debug!(job = name, "Background job finished"),
                    Ok(Err(err)) => tracing::error!(job = name, error = %err, "Background job failed"),
                    Err(panic) => tracing::error!(
                        job = name,
                        panic = %panic_message(&*panic),
                        "Background job panicked"
                    ),
                },
                Err(_) => tracing::warn!(job = name, "Background worker pool closed"),
            }

            inner.finish_one();
        });
        true
    }

    /// 停止接收新任务，并等待已提交的任务完成；返回是否在超时前全部完成
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.inner.closed.store(true, Ordering::SeqCst);

        let wait = async {
            loop {
                let notified = self.inner.drained.notified();
                if self.in_flight() == 0 {
                    return;
                }
                notified.await;
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(()) => {
                tracing::info!("Background jobs drained");
                true
            }
            Err(_) => {
                tracing::warn!(remaining = self.in_flight(), "Timed out waiting for background jobs");
                false
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
