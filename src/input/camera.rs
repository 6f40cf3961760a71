//! 摄像头选择与会话控制
//!
//! - 预览尺寸协商 / 摄像头选择
//! - `LifecyclePermit`: 打开与关闭互斥的单令牌锁
//! - `CameraBackend`: 实际设备 (FFmpeg / 合成源 / 测试替身)
//! - `CaptureSessionController`: 解释 [`transition`] 产生的副作用

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::session::{
    transition, CaptureRequest, SessionEffect, SessionEvent, SessionState, SessionTarget,
};
use crate::error::{PipelineError, Result};
use crate::pipeline::{FrameSink, Pipeline, PipelineDeps};

/// 预览尺寸
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PreviewSize {
    pub width: u32,
    pub height: u32,
}

impl PreviewSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    fn same_aspect(&self, other: &PreviewSize) -> bool {
        self.width as u64 * other.height as u64 == self.height as u64 * other.width as u64
    }
}

/// 选择预览尺寸: 长边不小于 `min_size` 的候选中面积最小者 (同面积时优先目标宽高比);
/// 都不满足时退回第一个候选
pub fn choose_optimal_size(
    choices: &[PreviewSize],
    min_size: u32,
    aspect: PreviewSize,
) -> Option<PreviewSize> {
    let best = choices
        .iter()
        .filter(|s| s.width.max(s.height) >= min_size)
        .min_by_key(|s| (s.area(), !s.same_aspect(&aspect)))
        .copied();

    match best {
        Some(size) => {
            tracing::info!(width = size.width, height = size.height, "📐 选定预览尺寸");
            Some(size)
        }
        None => {
            let fallback = choices.first().copied();
            if let Some(size) = fallback {
                tracing::warn!(
                    width = size.width,
                    height = size.height,
                    "⚠️ 没有足够大的预览尺寸, 使用第一个候选"
                );
            }
            fallback
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LensFacing {
    Front,
    Back,
    External,
}

/// 摄像头描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraInfo {
    pub id: String,
    pub facing: Option<LensFacing>,
    pub output_sizes: Vec<PreviewSize>,
}

/// 选择摄像头与预览尺寸
///
/// 存在后置摄像头时忽略前置; 取第一个有输出尺寸的摄像头,
/// 以其最大输出尺寸作为目标宽高比
pub fn select_camera(cameras: &[CameraInfo], min_size: u32) -> Result<(String, PreviewSize)> {
    let has_back = cameras
        .iter()
        .any(|c| c.facing == Some(LensFacing::Back) && !c.output_sizes.is_empty());

    let camera = cameras
        .iter()
        .filter(|c| !(has_back && c.facing == Some(LensFacing::Front)))
        .find(|c| !c.output_sizes.is_empty())
        .ok_or(PipelineError::NoCamera)?;

    let largest = camera
        .output_sizes
        .iter()
        .max_by_key(|s| s.area())
        .copied()
        .ok_or(PipelineError::NoCamera)?;
    let preview =
        choose_optimal_size(&camera.output_sizes, min_size, largest).ok_or(PipelineError::NoCamera)?;

    tracing::info!(camera = %camera.id, facing = ?camera.facing, "📷 选定摄像头");
    Ok((camera.id.clone(), preview))
}

/// 摄像头开关锁: 单令牌, 打开期间持有, 关闭前必须取得
pub struct LifecyclePermit {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl Default for LifecyclePermit {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecyclePermit {
    pub fn new() -> Self {
        let (tx, rx) = bounded(1);
        let _ = tx.try_send(());
        Self { tx, rx }
    }

    /// 限时获取
    pub fn acquire_timeout(&self, timeout: Duration) -> bool {
        self.rx.recv_timeout(timeout).is_ok()
    }

    /// 无限等待
    pub fn acquire(&self) {
        // 自身持有发送端, 通道不会断开
        let _ = self.rx.recv();
    }

    pub fn release(&self) {
        if self.tx.try_send(()).is_err() {
            tracing::warn!("⚠️ 开关锁未被持有, 忽略释放");
        }
    }

    pub fn is_available(&self) -> bool {
        !self.rx.is_empty()
    }
}

/// 摄像头设备后端
///
/// 打开/配置结果通过 `events` 异步回报 (`DeviceOpened`, `SessionConfigured` ...);
/// 方法返回 `Err` 表示请求本身被拒绝
pub trait CameraBackend: Send {
    fn open_device(&mut self, target: &SessionTarget, events: Sender<SessionEvent>) -> Result<()>;

    fn create_session(
        &mut self,
        preview: PreviewSize,
        sink: Arc<dyn FrameSink>,
        events: Sender<SessionEvent>,
    ) -> Result<()>;

    fn start_repeating(&mut self, request: CaptureRequest) -> Result<()>;

    fn close_session(&mut self);
    fn close_device(&mut self);
    fn close_reader(&mut self);
}

/// 打开过且尚未关闭的资源
#[derive(Debug, Default)]
struct OpenResources {
    session: bool,
    device: bool,
    reader: bool,
}

pub type DepsFactory = Box<dyn FnMut() -> Result<PipelineDeps> + Send>;
pub type FatalHandler = Box<dyn Fn(&str) + Send + Sync>;

pub struct CaptureSessionController<B: CameraBackend> {
    backend: Mutex<B>,
    pipeline: Arc<Pipeline>,
    deps_factory: Mutex<DepsFactory>,
    permit: LifecyclePermit,
    state: Mutex<SessionState>,
    dispatch: Mutex<()>,
    resources: Mutex<OpenResources>,
    events_tx: Sender<SessionEvent>,
    events_rx: Receiver<SessionEvent>,
    permit_timeout: Duration,
    on_fatal: FatalHandler,
}

impl<B: CameraBackend> CaptureSessionController<B> {
    /// `deps_factory` 在每次建立会话时提供流水线的运行时资源
    pub fn new(
        backend: B,
        pipeline: Arc<Pipeline>,
        deps_factory: impl FnMut() -> Result<PipelineDeps> + Send + 'static,
    ) -> Self {
        let (events_tx, events_rx) = unbounded();
        let permit_timeout = pipeline.config().permit_timeout();
        Self {
            backend: Mutex::new(backend),
            pipeline,
            deps_factory: Mutex::new(Box::new(deps_factory)),
            permit: LifecyclePermit::new(),
            state: Mutex::new(SessionState::Closed),
            dispatch: Mutex::new(()),
            resources: Mutex::new(OpenResources::default()),
            events_tx,
            events_rx,
            permit_timeout,
            on_fatal: Box::new(|_| {}),
        }
    }

    /// 致命错误回调 (不可在回调内再调用本控制器)
    pub fn on_fatal(mut self, handler: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_fatal = Box::new(handler);
        self
    }

    pub fn with_permit_timeout(mut self, timeout: Duration) -> Self {
        self.permit_timeout = timeout;
        self
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn state(&self) -> SessionState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn event_sender(&self) -> Sender<SessionEvent> {
        self.events_tx.clone()
    }

    pub fn with_backend<R>(&self, f: impl FnOnce(&mut B) -> R) -> R {
        let mut backend = self.backend.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut backend)
    }

    /// 预览表面就绪
    pub fn open(&self, camera_id: impl Into<String>, preview: PreviewSize) {
        self.handle_event(SessionEvent::SurfaceAvailable {
            camera_id: camera_id.into(),
            preview,
        });
    }

    /// 按选择规则挑选摄像头后打开
    pub fn open_best(&self, cameras: &[CameraInfo]) -> Result<()> {
        let (camera_id, preview) = select_camera(cameras, self.pipeline.config().min_preview_size)?;
        self.open(camera_id, preview);
        Ok(())
    }

    /// 关闭摄像头: 等待开关锁, 释放流水线与设备资源
    pub fn teardown(&self) {
        self.permit.acquire();
        self.handle_event(SessionEvent::Teardown);
        self.permit.release();
    }

    /// 处理已到达的后端事件, 返回处理数量
    pub fn pump_events(&self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    /// 最多等待 `timeout` 直到有事件到达, 然后处理所有已到达事件
    pub fn pump_events_timeout(&self, timeout: Duration) -> usize {
        match self.events_rx.recv_timeout(timeout) {
            Ok(event) => {
                self.handle_event(event);
                1 + self.pump_events()
            }
            Err(_) => 0,
        }
    }

    pub fn handle_event(&self, event: SessionEvent) {
        let fatal = {
            let _dispatch = self.dispatch.lock().unwrap_or_else(PoisonError::into_inner);
            let mut queue = VecDeque::from([event]);
            let mut fatal = Vec::new();

            while let Some(event) = queue.pop_front() {
                let effects = {
                    let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
                    let current = std::mem::replace(&mut *state, SessionState::Closed);
                    let from = current.name();
                    let (next, effects) = transition(current, event);
                    if from != next.name() {
                        tracing::info!("🔄 摄像头会话: {} → {}", from, next.name());
                    }
                    *state = next;
                    effects
                };
                for effect in effects {
                    self.run_effect(effect, &mut queue, &mut fatal);
                }
            }
            fatal
        };

        for message in fatal {
            (self.on_fatal)(&message);
        }
    }

    fn run_effect(
        &self,
        effect: SessionEffect,
        queue: &mut VecDeque<SessionEvent>,
        fatal: &mut Vec<String>,
    ) {
        match effect {
            SessionEffect::OpenDevice(target) => {
                if !self.permit.acquire_timeout(self.permit_timeout) {
                    let err = PipelineError::PermitTimeout(self.permit_timeout);
                    queue.push_back(SessionEvent::PermitTimeout(err.to_string()));
                    return;
                }
                tracing::info!(camera = %target.camera_id, "📷 打开摄像头");
                let opened = self
                    .with_backend(|b| b.open_device(&target, self.events_tx.clone()));
                match opened {
                    Ok(()) => self.resources().device = true,
                    Err(e) => queue.push_back(SessionEvent::DeviceError(e.to_string())),
                }
            }
            SessionEffect::ReleasePermit => self.permit.release(),
            SessionEffect::CreateSession(preview) => {
                self.resources().reader = true;
                let deps = {
                    let mut factory = self
                        .deps_factory
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner);
                    (*factory)()
                };
                match deps {
                    Ok(deps) => self.pipeline.initialize(deps),
                    Err(e) => {
                        queue.push_back(SessionEvent::SessionConfigureFailed(e.to_string()));
                        return;
                    }
                }
                let sink: Arc<dyn FrameSink> = self.pipeline.clone();
                let created =
                    self.with_backend(|b| b.create_session(preview, sink, self.events_tx.clone()));
                match created {
                    Ok(()) => self.resources().session = true,
                    Err(e) => queue.push_back(SessionEvent::SessionConfigureFailed(e.to_string())),
                }
            }
            SessionEffect::StartRepeating(request) => {
                if let Err(e) = self.with_backend(|b| b.start_repeating(request)) {
                    queue.push_back(SessionEvent::AccessError(e.to_string()));
                }
            }
            SessionEffect::DeinitializePipeline => self.pipeline.deinitialize(),
            SessionEffect::ReleaseResources => {
                self.release_resources();
                if matches!(self.state(), SessionState::Error(_)) {
                    queue.push_back(SessionEvent::ResourcesReleased);
                }
            }
            SessionEffect::ReportFatal(message) => {
                tracing::error!("❌ 摄像头错误: {message}");
                fatal.push(message);
            }
        }
    }

    fn resources(&self) -> std::sync::MutexGuard<'_, OpenResources> {
        self.resources.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 会话 → 设备 → 读取器, 每个最多关闭一次
    fn release_resources(&self) {
        let mut resources = self.resources();
        let mut backend = self.backend.lock().unwrap_or_else(PoisonError::into_inner);
        if std::mem::take(&mut resources.session) {
            backend.close_session();
        }
        if std::mem::take(&mut resources.device) {
            backend.close_device();
        }
        if std::mem::take(&mut resources.reader) {
            backend.close_reader();
        }
        tracing::debug!("摄像头资源已释放");
    }
}
