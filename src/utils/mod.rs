/// 工具模块
/// Utility modules
pub mod affine_transform;
pub mod yuv;

use std::time::{Duration, Instant};

/// 时间字符串 (本地时区), 用于快照文件名
pub fn gen_time_string(delimiter: &str) -> String {
    let t_now = chrono::Local::now();
    let fmt = format!(
        "%Y{}%m{}%d{}%H{}%M{}%S{}%f",
        delimiter, delimiter, delimiter, delimiter, delimiter, delimiter
    );
    t_now.format(&fmt).to_string()
}

/// 吞吐统计: 每满一个窗口 (默认1秒) 产出一次帧率
#[derive(Debug, Clone)]
pub struct FpsCounter {
    count: u64,
    last: Instant,
    window: Duration,
    current: f64,
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl FpsCounter {
    pub fn new(window: Duration) -> Self {
        Self {
            count: 0,
            last: Instant::now(),
            window,
            current: 0.0,
        }
    }

    /// 记录一帧; 窗口结束时返回新帧率
    pub fn tick(&mut self) -> Option<f64> {
        self.tick_at(Instant::now())
    }

    pub fn tick_at(&mut self, now: Instant) -> Option<f64> {
        self.count += 1;
        let elapsed = now.saturating_duration_since(self.last);
        if elapsed >= self.window {
            self.current = self.count as f64 / elapsed.as_secs_f64();
            self.count = 0;
            self.last = now;
            Some(self.current)
        } else {
            None
        }
    }

    pub fn current(&self) -> f64 {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fps_counter_reports_per_window() {
        let start = Instant::now();
        let mut fps = FpsCounter {
            count: 0,
            last: start,
            window: Duration::from_secs(1),
            current: 0.0,
        };
        for i in 1..10 {
            assert!(fps.tick_at(start + Duration::from_millis(i * 100)).is_none());
        }
        let rate = fps.tick_at(start + Duration::from_secs(1)).unwrap();
        assert!((rate - 10.0).abs() < 1e-9);
        assert_eq!(fps.current(), rate);
    }

    #[test]
    fn test_time_string_uses_delimiter() {
        let s = gen_time_string("-");
        assert_eq!(s.split('-').count(), 7);
    }
}
