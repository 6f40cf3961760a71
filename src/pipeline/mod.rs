/// 帧处理流水线 (Frame Processing Pipeline)
///
/// 三个执行上下文:
/// - 采集线程: 拷贝平面 → YUV转ARGB → 裁剪/旋转/缩放, 然后投递, 不等待推理
/// - 推理线程: 模型准备 → 检测 → 叠加绘制 → 发布到悬浮窗口
/// - 显示线程: 由 OverlaySurface 持有
///
/// 单飞闸门保证任意时刻最多一帧在飞行, 忙时新帧直接丢弃
pub mod buffers;
pub mod executor;
pub mod gate;

use image::RgbaImage;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use crate::config::PipelineConfig;
use crate::detection::{Detection, DetectorService, ModelAsset, StatusSink};
use crate::error::Result;
use crate::input::frame::RawFrame;
use crate::renderer::{DetectionOverlayRenderer, OverlaySurface};
use crate::utils::affine_transform::{compute_crop_rotate_scale, device_rotation_hint};
use crate::utils::{gen_time_string, FpsCounter};

pub use buffers::{FrameBufferPool, InferenceFrame, PackedFrame};
pub use executor::InferenceContext;
pub use gate::{InferenceGate, InferencePermit};

/// 原始帧接收方 (采集层回调)
pub trait FrameSink: Send + Sync {
    /// 不阻塞, 不向外传播错误; 返回前必须归还原始帧
    fn on_frame_available(&self, raw: RawFrame<'_>);
}

/// 初始化时注入的运行时资源
pub struct PipelineDeps {
    pub detector: Box<dyn DetectorService>,
    pub model_asset: Arc<ModelAsset>,
    pub overlay: Arc<OverlaySurface>,
    pub status: Arc<dyn StatusSink>,
    pub inference: InferenceContext,
}

/// 流水线状态快照
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineState {
    pub preview_width: u32,
    pub preview_height: u32,
    pub screen_rotation_degrees: i32,
    pub busy: bool,
}

struct Runtime {
    detector: Mutex<Box<dyn DetectorService>>,
    model_asset: Arc<ModelAsset>,
    overlay: Arc<OverlaySurface>,
    status: Arc<dyn StatusSink>,
    inference: Mutex<InferenceContext>,
}

impl Runtime {
    /// 检测器在互斥锁内调用; 出错或崩溃都视为无检测结果
    fn detect(&self, image: &RgbaImage) -> Vec<Detection> {
        let mut detector = self
            .detector
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match panic::catch_unwind(AssertUnwindSafe(|| detector.detect(image))) {
            Ok(Ok(detections)) => detections,
            Ok(Err(e)) => {
                tracing::warn!("⚠️ 检测失败: {e}");
                Vec::new()
            }
            Err(_) => {
                tracing::error!("❌ 检测器崩溃, 本帧按无结果处理");
                Vec::new()
            }
        }
    }
}

/// 推理线程上处理一帧所需的共享状态
#[derive(Clone)]
struct FrameTask {
    runtime: Arc<Runtime>,
    pool: Arc<Mutex<FrameBufferPool>>,
    renderer: DetectionOverlayRenderer,
    fps: Arc<Mutex<FpsCounter>>,
    save_preview_dir: Option<PathBuf>,
}

impl FrameTask {
    fn run(self, mut frame: InferenceFrame, permit: InferencePermit) {
        let rt = &self.runtime;
        if let Err(e) = rt.model_asset.ensure_present(rt.status.as_ref()) {
            tracing::error!("❌ {e}");
        }

        let start = Instant::now();
        let detections = rt.detect(frame.image());
        let cost = start.elapsed().as_secs_f32();
        rt.status.set_status(&format!("Time cost: {:.3} sec", cost));
        tracing::debug!(detections = detections.len(), cost, "🔍 检测完成");

        self.renderer.render(&mut frame, &detections);

        if let Some(dir) = &self.save_preview_dir {
            save_preview(dir, frame.image());
        }

        rt.overlay.set_image(frame.image().clone());
        let fps = self
            .fps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .tick();
        if let Some(fps) = fps {
            rt.overlay.set_throughput(fps as f32);
            tracing::info!("📊 推理 FPS: {:.2}", fps);
        }

        self.pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .restore_inference(frame);
        drop(permit);
    }
}

fn save_preview(dir: &Path, image: &RgbaImage) {
    let path = dir.join(format!("preview_{}.png", gen_time_string("-")));
    let saved = std::fs::create_dir_all(dir)
        .map_err(|e| e.to_string())
        .and_then(|_| image.save(&path).map_err(|e| e.to_string()));
    match saved {
        Ok(()) => tracing::debug!(path = %path.display(), "💾 预览帧已保存"),
        Err(e) => tracing::warn!("⚠️ 保存预览帧失败: {e}"),
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    gate: Arc<InferenceGate>,
    pool: Arc<Mutex<FrameBufferPool>>,
    renderer: DetectionOverlayRenderer,
    fps: Arc<Mutex<FpsCounter>>,
    runtime: Mutex<Option<Arc<Runtime>>>,
    preview_width: AtomicU32,
    preview_height: AtomicU32,
    screen_rotation: AtomicI32,
    swap_uv: bool,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            gate: InferenceGate::new(),
            pool: Arc::new(Mutex::new(FrameBufferPool::new(config.inference_size))),
            renderer: DetectionOverlayRenderer::from_config(&config),
            fps: Arc::new(Mutex::new(FpsCounter::default())),
            runtime: Mutex::new(None),
            preview_width: AtomicU32::new(0),
            preview_height: AtomicU32::new(0),
            // 未知屏幕时按竖屏处理
            screen_rotation: AtomicI32::new(90),
            swap_uv: false,
            config,
        }
    }

    /// NV21类数据源 (V在前)
    pub fn with_swapped_chroma(mut self, swap_uv: bool) -> Self {
        self.swap_uv = swap_uv;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn gate(&self) -> &Arc<InferenceGate> {
        &self.gate
    }

    /// 屏幕尺寸 → 旋转角度 (竖屏90°, 横屏0°)
    pub fn set_screen_size(&self, width: u32, height: u32) {
        let rotation = device_rotation_hint(width, height);
        tracing::debug!(width, height, rotation, "屏幕尺寸");
        self.screen_rotation.store(rotation, Ordering::Release);
    }

    pub fn state(&self) -> PipelineState {
        PipelineState {
            preview_width: self.preview_width.load(Ordering::Acquire),
            preview_height: self.preview_height.load(Ordering::Acquire),
            screen_rotation_degrees: self.screen_rotation.load(Ordering::Acquire),
            busy: self.gate.is_busy(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.lock_runtime().is_some()
    }

    fn lock_runtime(&self) -> std::sync::MutexGuard<'_, Option<Arc<Runtime>>> {
        self.runtime.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 注入检测器、模型、悬浮窗口、状态输出与推理线程
    ///
    /// 已初始化时忽略 (仅警告); `deinitialize` 之后可再次初始化
    pub fn initialize(&self, deps: PipelineDeps) {
        let mut runtime = self.lock_runtime();
        if runtime.is_some() {
            tracing::warn!("⚠️ 流水线已初始化, 忽略重复初始化");
            return;
        }
        tracing::info!(
            detector = deps.detector.name(),
            inference = deps.inference.name(),
            size = self.config.inference_size,
            "✅ 流水线初始化"
        );
        *runtime = Some(Arc::new(Runtime {
            detector: Mutex::new(deps.detector),
            model_asset: deps.model_asset,
            overlay: deps.overlay,
            status: deps.status,
            inference: Mutex::new(deps.inference),
        }));
    }

    /// 等待在飞行的帧结束, 然后依次释放 检测器 → 悬浮窗口 → 推理线程
    ///
    /// 未初始化或重复调用都是安全的
    pub fn deinitialize(&self) {
        let Some(runtime) = self.lock_runtime().take() else {
            tracing::debug!("流水线未初始化, 无需释放");
            return;
        };
        let permit = self.gate.acquire_blocking();

        runtime
            .detector
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .release();
        runtime.overlay.release();
        runtime
            .inference
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .shutdown();

        drop(permit);
        tracing::info!("🛑 流水线已释放");
    }

    /// 采集线程入口
    pub fn on_frame_available(&self, raw: RawFrame<'_>) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.process_frame(raw)));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("⚠️ 丢弃帧: {e}"),
            Err(_) => tracing::error!("❌ 帧处理崩溃, 已丢弃"),
        }
    }

    fn process_frame(&self, raw: RawFrame<'_>) -> Result<()> {
        let Some(runtime) = self.lock_runtime().clone() else {
            raw.release();
            return Ok(());
        };
        let Some(permit) = self.gate.try_acquire() else {
            tracing::debug!("推理忙, 丢弃新帧");
            raw.release();
            return Ok(());
        };

        let frame = self.normalize(raw)?;

        let task = FrameTask {
            runtime: Arc::clone(&runtime),
            pool: Arc::clone(&self.pool),
            renderer: self.renderer,
            fps: Arc::clone(&self.fps),
            save_preview_dir: self.config.save_preview_dir.clone(),
        };
        let inference = runtime
            .inference
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        inference.execute(move || task.run(frame, permit))
    }

    /// 拷贝平面并归还原始帧, 再转换与几何归一化
    fn normalize(&self, raw: RawFrame<'_>) -> Result<InferenceFrame> {
        let mut pool = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
        let (width, height) = (raw.width(), raw.height());
        pool.stage(&raw);
        raw.release();

        let prev_width = self.preview_width.swap(width, Ordering::AcqRel);
        let prev_height = self.preview_height.swap(height, Ordering::AcqRel);
        if (prev_width, prev_height) != (width, height) {
            tracing::info!(width, height, "📷 预览尺寸");
        }

        pool.convert_staged(self.swap_uv)?;
        let rotation = self.screen_rotation.load(Ordering::Acquire);
        let matrix = compute_crop_rotate_scale(width, height, pool.inference_size(), rotation)?;
        pool.normalize(&matrix)
    }
}

impl FrameSink for Pipeline {
    fn on_frame_available(&self, raw: RawFrame<'_>) {
        Pipeline::on_frame_available(self, raw);
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.deinitialize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{AssetSource, LogStatus, ReplayDetector};
    use crate::input::frame::OwnedYuvFrame;
    use crate::renderer::{RecordingHost, WindowLayout};
    use std::sync::atomic::AtomicUsize;

    fn deps(dir: &Path, detector: Box<dyn DetectorService>, host: RecordingHost) -> PipelineDeps {
        let overlay =
            OverlaySurface::spawn(host, WindowLayout::default_for_screen(1080, 1920), 8).unwrap();
        PipelineDeps {
            detector,
            model_asset: Arc::new(ModelAsset::new(
                AssetSource::Bytes(b"model".to_vec()),
                dir.join("shape.dat"),
            )),
            overlay,
            status: Arc::new(LogStatus),
            inference: InferenceContext::spawn("inference").unwrap(),
        }
    }

    fn counted<'a>(owned: &'a OwnedYuvFrame, counter: &Arc<AtomicUsize>) -> RawFrame<'a> {
        let c = counter.clone();
        owned.as_raw().with_release(move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_frame_without_runtime_is_released_and_dropped() {
        let pipeline = Pipeline::new(PipelineConfig::default());
        let released = Arc::new(AtomicUsize::new(0));
        let owned = OwnedYuvFrame::solid(64, 48, 0, (128, 128, 128));
        pipeline.on_frame_available(counted(&owned, &released));
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert_eq!(pipeline.state().preview_width, 0);
    }

    #[test]
    fn test_busy_gate_drops_frame_and_releases_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(PipelineConfig::default());
        pipeline.initialize(deps(
            dir.path(),
            Box::new(ReplayDetector::constant(vec![])),
            RecordingHost::new(),
        ));

        let held = pipeline.gate().try_acquire().unwrap();
        let released = Arc::new(AtomicUsize::new(0));
        let owned = OwnedYuvFrame::solid(64, 48, 0, (128, 128, 128));
        pipeline.on_frame_available(counted(&owned, &released));
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert!(pipeline.state().busy);
        drop(held);

        pipeline.deinitialize();
    }

    #[test]
    fn test_bad_frame_releases_buffer_and_frees_gate() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(PipelineConfig::default());
        pipeline.initialize(deps(
            dir.path(),
            Box::new(ReplayDetector::constant(vec![])),
            RecordingHost::new(),
        ));

        let mut owned = OwnedYuvFrame::solid(64, 48, 0, (128, 128, 128));
        owned.y.truncate(10);
        let released = Arc::new(AtomicUsize::new(0));
        pipeline.on_frame_available(counted(&owned, &released));
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert!(!pipeline.state().busy);
        pipeline.deinitialize();
    }

    struct PanickingDetector;

    impl DetectorService for PanickingDetector {
        fn detect(&mut self, _image: &RgbaImage) -> Result<Vec<Detection>> {
            panic!("native crash");
        }
    }

    #[test]
    fn test_detector_panic_is_treated_as_empty_result() {
        let dir = tempfile::tempdir().unwrap();
        let host = RecordingHost::new();
        let pipeline = Pipeline::new(PipelineConfig::default());
        pipeline.initialize(deps(dir.path(), Box::new(PanickingDetector), host.clone()));

        let owned = OwnedYuvFrame::solid(64, 48, 0, (128, 128, 128));
        pipeline.on_frame_available(owned.as_raw());
        pipeline.gate().wait_idle();
        pipeline.deinitialize();

        // 帧仍然被发布, 只是没有叠加
        assert_eq!(host.images().len(), 1);
    }

    #[test]
    fn test_initialize_twice_is_ignored_and_deinitialize_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(PipelineConfig::default());
        pipeline.deinitialize();

        pipeline.initialize(deps(
            dir.path(),
            Box::new(ReplayDetector::constant(vec![])),
            RecordingHost::new(),
        ));
        pipeline.initialize(deps(
            dir.path(),
            Box::new(ReplayDetector::constant(vec![])),
            RecordingHost::new(),
        ));
        assert!(pipeline.is_initialized());

        pipeline.deinitialize();
        pipeline.deinitialize();
        assert!(!pipeline.is_initialized());
        assert!(!pipeline.state().busy);
    }

    #[test]
    fn test_screen_size_sets_rotation() {
        let pipeline = Pipeline::new(PipelineConfig::default());
        pipeline.set_screen_size(1920, 1080);
        assert_eq!(pipeline.state().screen_rotation_degrees, 0);
        pipeline.set_screen_size(1080, 1920);
        assert_eq!(pipeline.state().screen_rotation_degrees, 90);
    }

    #[test]
    fn test_snapshot_saved_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = dir.path().join("snapshots");
        let config = PipelineConfig {
            save_preview_dir: Some(snapshots.clone()),
            ..PipelineConfig::default()
        };
        let pipeline = Pipeline::new(config);
        pipeline.initialize(deps(
            dir.path(),
            Box::new(ReplayDetector::constant(vec![])),
            RecordingHost::new(),
        ));
        let owned = OwnedYuvFrame::solid(64, 48, 0, (128, 128, 128));
        pipeline.on_frame_available(owned.as_raw());
        pipeline.deinitialize();

        let count = std::fs::read_dir(&snapshots)
            .map(|d| d.count())
            .unwrap_or(0);
        assert_eq!(count, 1);
    }
}
