//! 单飞推理闸门 (InferenceGate)
//!
//! 任意时刻最多一帧处于 "转换/推理/绘制" 阶段; 忙时到达的帧直接丢弃, 不排队.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};

#[derive(Debug, Default)]
pub struct InferenceGate {
    busy: AtomicBool,
    lock: Mutex<()>,
    idle: Condvar,
}

impl InferenceGate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// 原子地 空闲 → 忙碌; 已忙碌返回 false (调用方丢帧)
    ///
    /// 成功后必须调用且只调用一次 [`end_frame`](Self::end_frame)
    pub fn try_begin_frame(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// RAII 版本: 许可析构时自动 `end_frame`
    pub fn try_acquire(self: &Arc<Self>) -> Option<InferencePermit> {
        self.try_begin_frame().then(|| InferencePermit {
            gate: Arc::clone(self),
        })
    }

    /// 阻塞直到拿到闸门 (用于关闭流程, 保证没有帧仍在飞行)
    pub fn acquire_blocking(self: &Arc<Self>) -> InferencePermit {
        loop {
            if let Some(permit) = self.try_acquire() {
                return permit;
            }
            self.wait_idle();
        }
    }

    /// 等待当前帧结束
    pub fn wait_idle(&self) {
        let mut guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        while self.busy.load(Ordering::Acquire) {
            guard = self
                .idle
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// 忙碌 → 空闲, 并唤醒等待方
    pub fn end_frame(&self) {
        // 持锁清除标志再通知, 避免等待方错过唤醒
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.busy.store(false, Ordering::Release);
        self.idle.notify_all();
    }
}

/// 推理许可: 析构时闸门回到空闲, 所有退出路径 (包括出错) 都会归还
#[derive(Debug)]
pub struct InferencePermit {
    gate: Arc<InferenceGate>,
}

impl Drop for InferencePermit {
    fn drop(&mut self) {
        self.gate.end_frame();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_second_frame_is_dropped_while_busy() {
        let gate = InferenceGate::new();
        let permit = gate.try_acquire().unwrap();
        assert!(gate.is_busy());
        assert!(gate.try_acquire().is_none());

        drop(permit);
        assert!(!gate.is_busy());
        assert!(gate.try_acquire().is_some());
    }

    #[test]
    fn test_raw_begin_end() {
        let gate = InferenceGate::new();
        assert!(gate.try_begin_frame());
        assert!(!gate.try_begin_frame());
        gate.end_frame();
        assert!(gate.try_begin_frame());
        gate.end_frame();
        assert!(!gate.is_busy());
    }

    #[test]
    fn test_permit_released_on_panic() {
        let gate = InferenceGate::new();
        let g = gate.clone();
        let result = thread::spawn(move || {
            let _permit = g.try_acquire().unwrap();
            panic!("推理失败");
        })
        .join();
        assert!(result.is_err());
        assert!(!gate.is_busy());
    }

    #[test]
    fn test_at_most_one_in_flight_under_contention() {
        let gate = InferenceGate::new();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let accepted = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let (gate, in_flight, max_seen, accepted, barrier) = (
                    gate.clone(),
                    in_flight.clone(),
                    max_seen.clone(),
                    accepted.clone(),
                    barrier.clone(),
                );
                thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..200 {
                        if let Some(_permit) = gate.try_acquire() {
                            accepted.fetch_add(1, Ordering::SeqCst);
                            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                            max_seen.fetch_max(now, Ordering::SeqCst);
                            thread::yield_now();
                            in_flight.fetch_sub(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert!(accepted.load(Ordering::SeqCst) >= 1);
        assert!(!gate.is_busy());
    }

    #[test]
    fn test_acquire_blocking_waits_for_in_flight_frame() {
        let gate = InferenceGate::new();
        let permit = gate.try_acquire().unwrap();
        let released = Arc::new(AtomicBool::new(false));

        let (g, r) = (gate.clone(), released.clone());
        let waiter = thread::spawn(move || {
            let _p = g.acquire_blocking();
            r.load(Ordering::SeqCst)
        });

        thread::sleep(Duration::from_millis(50));
        released.store(true, Ordering::SeqCst);
        drop(permit);
        assert!(waiter.join().unwrap());
        assert!(!gate.is_busy());
    }
}
