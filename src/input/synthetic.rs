//! 合成摄像头 (SyntheticCamera)
//!
//! 不依赖硬件的 `CameraBackend`: 在采集线程上按固定间隔生成带行填充的
//! YUV420 帧 (灰底 + 移动的亮块), 用于回放演示与端到端测试.

use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::camera::{CameraBackend, PreviewSize};
use super::frame::OwnedYuvFrame;
use super::session::{CaptureRequest, SessionEvent, SessionTarget};
use crate::error::{PipelineError, Result};
use crate::pipeline::FrameSink;

/// 已交付 / 已归还的帧数
#[derive(Debug, Default)]
pub struct CaptureCounters {
    pub delivered: AtomicUsize,
    pub released: AtomicUsize,
}

pub struct SyntheticCamera {
    frame_limit: Option<usize>,
    interval: Duration,
    padding: usize,
    opened: bool,
    stopped: Arc<AtomicBool>,
    counters: Arc<CaptureCounters>,
    capture: Option<JoinHandle<()>>,
}

impl SyntheticCamera {
    pub fn new(interval: Duration) -> Self {
        Self {
            frame_limit: None,
            interval,
            padding: 16,
            opened: false,
            stopped: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(CaptureCounters::default()),
            capture: None,
        }
    }

    /// 生成指定帧数后停止出帧 (会话保持)
    pub fn with_frame_limit(mut self, frames: usize) -> Self {
        self.frame_limit = Some(frames);
        self
    }

    /// 每行末尾的填充字节数
    pub fn with_padding(mut self, padding: usize) -> Self {
        self.padding = padding;
        self
    }

    pub fn counters(&self) -> Arc<CaptureCounters> {
        self.counters.clone()
    }

    fn draw_frame(frame: &mut OwnedYuvFrame, index: usize) {
        let (w, h) = (frame.width as usize, frame.height as usize);
        let block = (w.min(h) / 4).max(1);
        let x0 = (index * 8) % (w - block + 1);
        let y0 = (h - block) / 2;
        for y in 0..h {
            for x in 0..w {
                let inside = (x0..x0 + block).contains(&x) && (y0..y0 + block).contains(&y);
                frame.set_luma(x, y, if inside { 235 } else { 96 });
            }
        }
    }

    fn run(
        preview: PreviewSize,
        padding: usize,
        interval: Duration,
        limit: Option<usize>,
        sink: Arc<dyn FrameSink>,
        stopped: Arc<AtomicBool>,
        counters: Arc<CaptureCounters>,
    ) {
        let mut frame = OwnedYuvFrame::solid(preview.width, preview.height, padding, (96, 128, 128));
        let mut index = 0;
        while !stopped.load(Ordering::Acquire) {
            if limit.is_some_and(|limit| index >= limit) {
                thread::park_timeout(interval);
                continue;
            }
            Self::draw_frame(&mut frame, index);
            let released = counters.clone();
            let raw = frame.as_raw().with_release(move || {
                released.released.fetch_add(1, Ordering::AcqRel);
            });
            counters.delivered.fetch_add(1, Ordering::AcqRel);
            sink.on_frame_available(raw);
            index += 1;
            thread::sleep(interval);
        }
        tracing::info!(frames = index, "🛑 合成采集结束");
    }
}

impl CameraBackend for SyntheticCamera {
    fn open_device(&mut self, target: &SessionTarget, events: Sender<SessionEvent>) -> Result<()> {
        tracing::info!(camera = %target.camera_id, "📷 合成摄像头已打开");
        self.opened = true;
        events
            .send(SessionEvent::DeviceOpened)
            .map_err(|e| PipelineError::CameraOpen(e.to_string()))
    }

    fn create_session(
        &mut self,
        preview: PreviewSize,
        sink: Arc<dyn FrameSink>,
        events: Sender<SessionEvent>,
    ) -> Result<()> {
        if !self.opened {
            return Err(PipelineError::CameraConfigure("设备未打开".into()));
        }
        if preview.width == 0 || preview.height == 0 {
            return Err(PipelineError::CameraConfigure(format!(
                "预览尺寸非法: {}x{}",
                preview.width, preview.height
            )));
        }
        self.stopped = Arc::new(AtomicBool::new(false));
        let (stopped, counters) = (self.stopped.clone(), self.counters.clone());
        let (padding, interval, limit) = (self.padding, self.interval, self.frame_limit);
        let handle = thread::Builder::new()
            .name("synthetic-capture".into())
            .spawn(move || {
                Self::run(preview, padding, interval, limit, sink, stopped, counters)
            })
            .map_err(|e| PipelineError::CameraConfigure(e.to_string()))?;
        self.capture = Some(handle);
        events
            .send(SessionEvent::SessionConfigured)
            .map_err(|e| PipelineError::CameraConfigure(e.to_string()))
    }

    fn start_repeating(&mut self, request: CaptureRequest) -> Result<()> {
        tracing::debug!(?request, "重复采集请求");
        Ok(())
    }

    fn close_session(&mut self) {
        self.stopped.store(true, Ordering::Release);
        if let Some(handle) = self.capture.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                tracing::warn!("⚠️ 合成采集线程异常退出");
            }
        }
    }

    fn close_device(&mut self) {
        self.opened = false;
    }

    fn close_reader(&mut self) {}
}
