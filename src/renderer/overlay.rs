/// 悬浮叠加窗口 (OverlaySurface)
///
/// 推理线程只投递命令, 所有窗口操作都在显示线程上执行.
/// 图像与文本命令 try_send, 显示线程跟不上时直接丢弃; 释放命令阻塞投递.
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use image::RgbaImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use crate::detection::StatusSink;
use crate::error::{PipelineError, Result};

/// 拖动阈值 (像素)
pub const MOVE_THRESHOLD: i32 = 10;

/// 窗口几何: 锚定在屏幕右下角, (x, y) 为距右/下边缘的偏移
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowLayout {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl WindowLayout {
    /// 默认尺寸为屏幕的一半
    pub fn default_for_screen(screen_width: i32, screen_height: i32) -> Self {
        let half = |v: i32| if v / 2 >= 1 && v / 2 < v { v / 2 } else { v };
        Self {
            x: 0,
            y: 0,
            width: half(screen_width),
            height: half(screen_height),
        }
    }

    /// 指定尺寸, 必须在屏幕范围内
    pub fn with_size(
        screen_width: i32,
        screen_height: i32,
        width: i32,
        height: i32,
    ) -> Result<Self> {
        if width < 0 || width > screen_width || height < 0 || height > screen_height {
            return Err(PipelineError::InvalidWindowSize {
                width,
                height,
                screen_width,
                screen_height,
            });
        }
        Ok(Self {
            x: 0,
            y: 0,
            width,
            height,
        })
    }
}

/// 触摸事件 (屏幕绝对坐标)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchEvent {
    Down { x: i32, y: i32 },
    Move { x: i32, y: i32, pointers: u32 },
    Up,
}

/// 拖动状态: 累计位移超过阈值后才开始移动窗口
#[derive(Debug, Default, Clone, Copy)]
struct DragTracker {
    last: (i32, i32),
    first: (i32, i32),
    moving: bool,
}

impl DragTracker {
    /// 返回窗口位置是否变化
    fn on_touch(&mut self, event: TouchEvent, layout: &mut WindowLayout) -> bool {
        match event {
            TouchEvent::Down { x, y } => {
                self.last = (x, y);
                self.first = (x, y);
                false
            }
            TouchEvent::Move { x, y, pointers } => {
                let (dx, dy) = (x - self.last.0, y - self.last.1);
                self.last = (x, y);
                let (total_x, total_y) = (x - self.first.0, y - self.first.1);
                if self.moving || total_x.abs() >= MOVE_THRESHOLD || total_y.abs() >= MOVE_THRESHOLD
                {
                    self.moving = true;
                    if pointers == 1 {
                        // 右下角锚定: 向右拖动 → 距右边缘的偏移减小
                        layout.x -= dx;
                        layout.y -= dy;
                        return true;
                    }
                }
                false
            }
            TouchEvent::Up => {
                self.moving = false;
                false
            }
        }
    }
}

/// 窗口句柄 (注册表下标)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowId(usize);

impl WindowId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug)]
struct WindowEntry {
    layout: WindowLayout,
    drag: DragTracker,
}

/// 显示线程持有的窗口表; 视图通过 WindowId 回指窗口
#[derive(Debug, Default)]
pub struct WindowRegistry {
    windows: Vec<Option<WindowEntry>>,
}

impl WindowRegistry {
    pub fn create(&mut self, layout: WindowLayout) -> WindowId {
        let entry = Some(WindowEntry {
            layout,
            drag: DragTracker::default(),
        });
        match self.windows.iter().position(Option::is_none) {
            Some(index) => {
                self.windows[index] = entry;
                WindowId(index)
            }
            None => {
                self.windows.push(entry);
                WindowId(self.windows.len() - 1)
            }
        }
    }

    pub fn layout(&self, id: WindowId) -> Option<WindowLayout> {
        self.windows
            .get(id.0)
            .and_then(Option::as_ref)
            .map(|w| w.layout)
    }

    /// 处理触摸事件, 位置变化时返回新布局
    pub fn on_touch(&mut self, id: WindowId, event: TouchEvent) -> Option<WindowLayout> {
        let entry = self.windows.get_mut(id.0).and_then(Option::as_mut)?;
        entry
            .drag
            .on_touch(event, &mut entry.layout)
            .then_some(entry.layout)
    }

    pub fn remove(&mut self, id: WindowId) -> bool {
        self.windows
            .get_mut(id.0)
            .map(|slot| slot.take().is_some())
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.windows.iter().filter(|w| w.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 实际的显示后端 (窗口系统 / 文件 / 内存)
pub trait OverlayHost: Send + 'static {
    fn create_window(&mut self, id: WindowId, layout: &WindowLayout);
    fn update_layout(&mut self, id: WindowId, layout: &WindowLayout);
    fn present_image(&mut self, id: WindowId, image: &RgbaImage);
    fn show_fps(&mut self, id: WindowId, text: &str);
    fn show_info(&mut self, id: WindowId, text: &str);
    fn destroy_window(&mut self, id: WindowId);
}

enum OverlayCommand {
    Image(RgbaImage),
    Throughput(f32),
    Info(String),
    Touch(TouchEvent),
    Release,
}

/// 显示线程上下文
struct DisplayContext<H: OverlayHost> {
    host: H,
    registry: WindowRegistry,
    layout: WindowLayout,
    window: Option<WindowId>,
}

impl<H: OverlayHost> DisplayContext<H> {
    fn ensure_window(&mut self) -> WindowId {
        match self.window {
            Some(id) => id,
            None => {
                let id = self.registry.create(self.layout);
                self.host.create_window(id, &self.layout);
                tracing::info!(
                    width = self.layout.width,
                    height = self.layout.height,
                    "📺 叠加窗口已创建"
                );
                self.window = Some(id);
                id
            }
        }
    }

    /// 返回 false 表示退出显示循环
    fn handle(&mut self, command: OverlayCommand) -> bool {
        match command {
            OverlayCommand::Image(image) => {
                let id = self.ensure_window();
                self.host.present_image(id, &image);
            }
            OverlayCommand::Throughput(fps) => {
                let id = self.ensure_window();
                self.host.show_fps(id, &format!("FPS: {:.2}", fps));
            }
            OverlayCommand::Info(text) => {
                let id = self.ensure_window();
                self.host.show_info(id, &text);
            }
            OverlayCommand::Touch(event) => {
                // 窗口未创建时没有可拖动的视图
                if let Some(id) = self.window {
                    if let Some(layout) = self.registry.on_touch(id, event) {
                        self.host.update_layout(id, &layout);
                    }
                }
            }
            OverlayCommand::Release => {
                if let Some(id) = self.window.take() {
                    self.registry.remove(id);
                    self.host.destroy_window(id);
                    tracing::info!("🛑 叠加窗口已关闭");
                }
                return false;
            }
        }
        true
    }

    fn run(mut self, rx: Receiver<OverlayCommand>) {
        for command in rx.iter() {
            if !self.handle(command) {
                break;
            }
        }
    }
}

pub struct OverlaySurface {
    tx: Sender<OverlayCommand>,
    handle: Mutex<Option<JoinHandle<()>>>,
    released: AtomicBool,
}

impl OverlaySurface {
    /// 启动显示线程; 窗口在第一条命令到达时才创建
    pub fn spawn<H: OverlayHost>(host: H, layout: WindowLayout, queue: usize) -> Result<Arc<Self>> {
        let (tx, rx) = bounded(queue.max(1));
        let context = DisplayContext {
            host,
            registry: WindowRegistry::default(),
            layout,
            window: None,
        };
        let handle = thread::Builder::new()
            .name("overlay-display".into())
            .spawn(move || context.run(rx))
            .map_err(|e| {
                tracing::error!("❌ 显示线程启动失败: {e}");
                PipelineError::ContextUnavailable("显示线程启动失败")
            })?;

        Ok(Arc::new(Self {
            tx,
            handle: Mutex::new(Some(handle)),
            released: AtomicBool::new(false),
        }))
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    fn post(&self, command: OverlayCommand) {
        if self.is_released() {
            tracing::debug!("叠加窗口已释放, 忽略命令");
            return;
        }
        match self.tx.try_send(command) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => tracing::debug!("显示队列已满, 丢弃"),
            Err(TrySendError::Disconnected(_)) => tracing::debug!("显示线程已退出"),
        }
    }

    pub fn set_image(&self, image: RgbaImage) {
        self.post(OverlayCommand::Image(image));
    }

    pub fn set_throughput(&self, fps: f32) {
        self.post(OverlayCommand::Throughput(fps));
    }

    pub fn set_status_text(&self, text: impl Into<String>) {
        self.post(OverlayCommand::Info(text.into()));
    }

    /// 触摸事件不丢弃, 保证拖动连续
    pub fn touch(&self, event: TouchEvent) {
        if !self.is_released() {
            let _ = self.tx.send(OverlayCommand::Touch(event));
        }
    }

    /// 关闭窗口并等待显示线程退出; 可重复调用
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.tx.send(OverlayCommand::Release);
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::warn!("⚠️ 显示线程异常退出");
            }
        }
    }
}

impl StatusSink for OverlaySurface {
    fn set_status(&self, text: &str) {
        self.set_status_text(text);
    }
}

impl Drop for OverlaySurface {
    fn drop(&mut self) {
        self.release();
    }
}

/// 记录型显示后端: 不依赖窗口系统, 把所有调用记录在内存中
#[derive(Debug, Clone, PartialEq)]
pub enum HostCall {
    Create(WindowId, WindowLayout),
    Layout(WindowId, WindowLayout),
    Image(WindowId, RgbaImage),
    Fps(WindowId, String),
    Info(WindowId, String),
    Destroy(WindowId),
}

#[derive(Debug, Clone, Default)]
pub struct RecordingHost {
    calls: Arc<Mutex<Vec<HostCall>>>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<HostCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn images(&self) -> Vec<RgbaImage> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                HostCall::Image(_, img) => Some(img),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: HostCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }
}

impl OverlayHost for RecordingHost {
    fn create_window(&mut self, id: WindowId, layout: &WindowLayout) {
        self.record(HostCall::Create(id, *layout));
    }

    fn update_layout(&mut self, id: WindowId, layout: &WindowLayout) {
        self.record(HostCall::Layout(id, *layout));
    }

    fn present_image(&mut self, id: WindowId, image: &RgbaImage) {
        self.record(HostCall::Image(id, image.clone()));
    }

    fn show_fps(&mut self, id: WindowId, text: &str) {
        self.record(HostCall::Fps(id, text.to_string()));
    }

    fn show_info(&mut self, id: WindowId, text: &str) {
        self.record(HostCall::Info(id, text.to_string()));
    }

    fn destroy_window(&mut self, id: WindowId) {
        self.record(HostCall::Destroy(id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(host: RecordingHost) -> DisplayContext<RecordingHost> {
        DisplayContext {
            host,
            registry: WindowRegistry::default(),
            layout: WindowLayout::default_for_screen(1080, 1920),
            window: None,
        }
    }

    #[test]
    fn test_default_and_explicit_sizes() {
        assert_eq!(
            WindowLayout::default_for_screen(1080, 1920),
            WindowLayout {
                x: 0,
                y: 0,
                width: 540,
                height: 960
            }
        );
        assert_eq!(WindowLayout::default_for_screen(1, 1).width, 1);

        assert!(WindowLayout::with_size(1080, 1920, 1080, 1920).is_ok());
        assert!(matches!(
            WindowLayout::with_size(1080, 1920, 1200, 100),
            Err(PipelineError::InvalidWindowSize { width: 1200, .. })
        ));
        assert!(WindowLayout::with_size(1080, 1920, -1, 100).is_err());
    }

    #[test]
    fn test_window_created_lazily_once() {
        let host = RecordingHost::new();
        let mut ctx = context(host.clone());
        assert!(ctx.handle(OverlayCommand::Touch(TouchEvent::Down { x: 0, y: 0 })));
        assert!(host.calls().is_empty());

        ctx.handle(OverlayCommand::Throughput(29.971));
        ctx.handle(OverlayCommand::Info("Time cost: 0.031 sec".into()));
        ctx.handle(OverlayCommand::Image(RgbaImage::new(2, 2)));
        assert!(!ctx.handle(OverlayCommand::Release));

        let calls = host.calls();
        assert_eq!(calls.len(), 5);
        assert!(matches!(calls[0], HostCall::Create(..)));
        assert_eq!(calls[1], HostCall::Fps(WindowId(0), "FPS: 29.97".into()));
        assert_eq!(
            calls[2],
            HostCall::Info(WindowId(0), "Time cost: 0.031 sec".into())
        );
        assert_eq!(calls[4], HostCall::Destroy(WindowId(0)));
        assert!(ctx.registry.is_empty());
    }

    #[test]
    fn test_drag_moves_after_threshold_with_single_pointer() {
        let mut registry = WindowRegistry::default();
        let id = registry.create(WindowLayout::default_for_screen(1000, 1000));

        assert!(registry.on_touch(id, TouchEvent::Down { x: 100, y: 100 }).is_none());
        // 阈值内不动
        assert!(registry
            .on_touch(id, TouchEvent::Move { x: 105, y: 103, pointers: 1 })
            .is_none());
        // 超过阈值, 按最近一次增量移动
        let layout = registry
            .on_touch(id, TouchEvent::Move { x: 112, y: 104, pointers: 1 })
            .unwrap();
        assert_eq!((layout.x, layout.y), (-7, -1));

        // 多指不移动窗口
        assert!(registry
            .on_touch(id, TouchEvent::Move { x: 130, y: 104, pointers: 2 })
            .is_none());

        // 抬起后重新计算阈值
        registry.on_touch(id, TouchEvent::Up);
        registry.on_touch(id, TouchEvent::Down { x: 0, y: 0 });
        assert!(registry
            .on_touch(id, TouchEvent::Move { x: 3, y: 0, pointers: 1 })
            .is_none());
        assert_eq!(registry.layout(id).map(|l| (l.x, l.y)), Some((-7, -1)));
    }

    #[test]
    fn test_registry_reuses_slots() {
        let mut registry = WindowRegistry::default();
        let layout = WindowLayout::default_for_screen(100, 100);
        let a = registry.create(layout);
        let b = registry.create(layout);
        assert!(registry.remove(a));
        assert!(!registry.remove(a));
        let c = registry.create(layout);
        assert_eq!(c.index(), a.index());
        assert_ne!(b, c);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_surface_release_is_idempotent_and_ignores_late_commands() {
        let host = RecordingHost::new();
        let surface =
            OverlaySurface::spawn(host.clone(), WindowLayout::default_for_screen(800, 600), 4)
                .unwrap();
        surface.set_status_text("hello");
        surface.release();
        surface.release();
        surface.set_image(RgbaImage::new(1, 1));
        surface.set_throughput(1.0);

        let calls = host.calls();
        assert!(matches!(calls.first(), Some(HostCall::Create(..))));
        assert!(matches!(calls.last(), Some(HostCall::Destroy(_))));
        assert!(!calls.iter().any(|c| matches!(c, HostCall::Image(..))));
        assert!(surface.is_released());
    }

    #[test]
    fn test_release_without_window_does_not_create_one() {
        let host = RecordingHost::new();
        let surface =
            OverlaySurface::spawn(host.clone(), WindowLayout::default_for_screen(800, 600), 1)
                .unwrap();
        surface.release();
        assert!(host.calls().is_empty());
    }
}
