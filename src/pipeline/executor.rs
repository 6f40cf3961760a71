/// 推理执行上下文 (InferenceContext)
/// 一个具名后台线程 + bounded(1) 通道; 采集线程只做 try_send, 永不阻塞
use crossbeam_channel::{bounded, Sender, TrySendError};
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use crate::error::{PipelineError, Result};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct InferenceContext {
    name: String,
    tx: Option<Sender<Job>>,
    handle: Option<JoinHandle<()>>,
}

impl InferenceContext {
    /// 启动推理线程
    pub fn spawn(name: &str) -> Result<Self> {
        let (tx, rx) = bounded::<Job>(1);
        let thread_name = name.to_string();
        let handle = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                tracing::info!(thread = %thread_name, "✅ 推理线程启动");
                for job in rx.iter() {
                    // 单个任务崩溃不影响后续帧
                    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                        tracing::error!(thread = %thread_name, "❌ 推理任务崩溃");
                    }
                }
                tracing::info!(thread = %thread_name, "🛑 推理线程退出");
            })
            .map_err(|e| {
                tracing::error!("❌ 推理线程启动失败: {e}");
                PipelineError::ContextUnavailable("推理线程启动失败")
            })?;

        Ok(Self {
            name: name.to_string(),
            tx: Some(tx),
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.tx.is_some()
    }

    /// 投递任务; 线程忙或已停止时任务被丢弃 (任务内资源随之析构)
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or(PipelineError::ContextUnavailable("推理线程已停止"))?;
        match tx.try_send(Box::new(job)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(PipelineError::ContextUnavailable("推理线程忙")),
            Err(TrySendError::Disconnected(_)) => {
                Err(PipelineError::ContextUnavailable("推理线程已停止"))
            }
        }
    }

    /// 停止并等待线程退出 (已排队的任务会先执行完); 可重复调用
    pub fn shutdown(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            // 在推理线程自身上析构时不能 join 自己
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                tracing::warn!(thread = %self.name, "⚠️ 推理线程异常退出");
            }
        }
    }
}

impl Drop for InferenceContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_jobs_run_on_named_thread() {
        let mut ctx = InferenceContext::spawn("inference-test").unwrap();
        let (tx, rx) = bounded(1);
        ctx.execute(move || {
            let _ = tx.send(thread::current().name().map(str::to_string));
        })
        .unwrap();
        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("inference-test"));
        ctx.shutdown();
        assert!(!ctx.is_running());
    }

    #[test]
    fn test_execute_after_shutdown_fails() {
        let mut ctx = InferenceContext::spawn("inference-stop").unwrap();
        ctx.shutdown();
        ctx.shutdown();
        assert!(matches!(
            ctx.execute(|| {}),
            Err(PipelineError::ContextUnavailable(_))
        ));
    }

    #[test]
    fn test_panicking_job_does_not_kill_worker() {
        let mut ctx = InferenceContext::spawn("inference-panic").unwrap();
        let done = Arc::new(AtomicUsize::new(0));
        ctx.execute(|| panic!("模拟崩溃")).unwrap();

        // 等待第一个任务被取走后再投递
        let d = done.clone();
        let mut sent = false;
        for _ in 0..500 {
            let d = d.clone();
            if ctx
                .execute(move || {
                    d.fetch_add(1, Ordering::SeqCst);
                })
                .is_ok()
            {
                sent = true;
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }
        assert!(sent);
        ctx.shutdown();
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }
}
