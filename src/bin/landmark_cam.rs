/// 人脸关键点摄像头 (Landmark Cam)
///
/// 子命令:
/// - image:  静态图片标注 (大图缩放到512后按比例绘制)
/// - replay: 合成摄像头 → 流水线 → PNG帧输出
/// - camera: 本地摄像头 (需要 `camera` feature)
///
/// 检测结果来自回放JSON (DetectorService 的可替换实现)
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use image::RgbaImage;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

use landmark_cam_rs::detection::{AssetSource, ModelAsset, ReplayDetector};
use landmark_cam_rs::input::{CameraInfo, LensFacing, SyntheticCamera};
use landmark_cam_rs::renderer::{OverlayHost, WindowId, WindowLayout};
use landmark_cam_rs::{
    CaptureSessionController, Detection, DetectionOverlayRenderer, InferenceContext, LogStatus,
    OverlayColor, OverlaySurface, Pipeline, PipelineConfig, PipelineDeps,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "人脸关键点摄像头 - 实时检测叠加", long_about = None)]
struct Cli {
    /// 流水线配置文件 (不存在时写出默认配置)
    #[arg(short, long, default_value = "pipeline.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 标注静态图片
    Image {
        /// 输入图片
        #[arg(short, long)]
        input: PathBuf,

        /// 检测结果JSON (原图坐标)
        #[arg(short, long)]
        detections: PathBuf,

        /// 按行人绘制 (蓝色), 默认人脸 (绿色)
        #[arg(long, default_value_t = false)]
        person: bool,

        /// 输出图片
        #[arg(short, long, default_value = "annotated.png")]
        output: PathBuf,
    },

    /// 合成摄像头回放
    Replay {
        /// 生成帧数
        #[arg(long, default_value_t = 30)]
        frames: usize,

        #[arg(long, default_value_t = 640)]
        width: u32,

        #[arg(long, default_value_t = 480)]
        height: u32,

        /// 帧间隔 (毫秒)
        #[arg(long, default_value_t = 33)]
        interval_ms: u64,

        #[command(flatten)]
        live: LiveArgs,
    },

    /// 本地摄像头
    #[cfg(feature = "camera")]
    Camera {
        /// 运行时长 (秒)
        #[arg(long, default_value_t = 30)]
        seconds: u64,

        #[command(flatten)]
        live: LiveArgs,
    },
}

/// 实时路径公共参数
#[derive(Args, Debug, Clone)]
struct LiveArgs {
    /// 检测回放JSON (推理帧坐标); 缺省时使用内置的居中人脸
    #[arg(short, long)]
    detections: Option<PathBuf>,

    /// 关键点模型来源, 首次推理前拷贝到配置的 model_path
    #[arg(long)]
    model_source: Option<PathBuf>,

    /// 叠加帧输出目录
    #[arg(short, long, default_value = "overlay_frames")]
    out_dir: PathBuf,

    #[arg(long, default_value_t = 1080)]
    screen_width: u32,

    #[arg(long, default_value_t = 1920)]
    screen_height: u32,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = PipelineConfig::load(&cli.config);
    config.print_summary();

    match cli.command {
        Command::Image {
            input,
            detections,
            person,
            output,
        } => annotate(&config, &input, &detections, person, &output),
        Command::Replay {
            frames,
            width,
            height,
            interval_ms,
            live,
        } => replay(config, frames, width, height, interval_ms, live),
        #[cfg(feature = "camera")]
        Command::Camera { seconds, live } => camera(config, seconds, live),
    }
}

fn annotate(
    config: &PipelineConfig,
    input: &Path,
    detections: &Path,
    person: bool,
    output: &Path,
) -> Result<()> {
    let json = std::fs::read_to_string(detections)
        .with_context(|| format!("读取检测结果失败: {}", detections.display()))?;
    let detections: Vec<Detection> =
        serde_json::from_str(&json).context("检测结果JSON格式错误")?;
    let color = if person {
        OverlayColor::Person
    } else {
        OverlayColor::Face
    };

    let start = Instant::now();
    let renderer = DetectionOverlayRenderer::from_config(config);
    let annotated = renderer
        .annotate_image(input, &detections, color)
        .with_context(|| format!("标注图片失败: {}", input.display()))?;
    annotated
        .image
        .save(output)
        .with_context(|| format!("保存图片失败: {}", output.display()))?;

    tracing::info!(
        output = %output.display(),
        detections = detections.len(),
        ratio = annotated.resize_ratio,
        "✅ Time cost: {:.3} sec",
        start.elapsed().as_secs_f32()
    );
    Ok(())
}

/// 内置检测: 推理帧中央的一张人脸与五个关键点
fn default_detections() -> Vec<Detection> {
    vec![Detection::new(62, 52, 162, 172)
        .with_landmarks([(92, 100), (132, 100), (112, 125), (95, 150), (129, 150)])]
}

/// 每次建立会话时构造流水线资源
fn deps_factory(
    config: &PipelineConfig,
    live: &LiveArgs,
) -> Result<impl FnMut() -> landmark_cam_rs::Result<PipelineDeps> + Send + 'static> {
    let recording = match &live.detections {
        Some(path) => ReplayDetector::load(path)
            .with_context(|| format!("加载检测回放失败: {}", path.display()))?,
        None => ReplayDetector::constant(default_detections()),
    };
    let model_asset = Arc::new(match &live.model_source {
        Some(source) => ModelAsset::new(AssetSource::File(source.clone()), &config.model_path),
        None => {
            if !config.model_path.exists() {
                tracing::warn!(path = %config.model_path.display(), "⚠️ 关键点模型不存在");
            }
            ModelAsset::existing(&config.model_path)
        }
    });

    let layout = WindowLayout::default_for_screen(live.screen_width as i32, live.screen_height as i32);
    let out_dir = live.out_dir.clone();
    let queue = config.overlay_queue;

    Ok(move || {
        let overlay = OverlaySurface::spawn(PngFrameHost::new(out_dir.clone()), layout, queue)?;
        Ok(PipelineDeps {
            detector: Box::new(recording.clone()),
            model_asset: model_asset.clone(),
            status: overlay.clone(),
            overlay,
            inference: InferenceContext::spawn("landmark-inference")?,
        })
    })
}

fn replay(
    config: PipelineConfig,
    frames: usize,
    width: u32,
    height: u32,
    interval_ms: u64,
    live: LiveArgs,
) -> Result<()> {
    let factory = deps_factory(&config, &live)?;
    let pipeline = Arc::new(Pipeline::new(config.clone()));
    pipeline.set_screen_size(live.screen_width, live.screen_height);

    let camera = SyntheticCamera::new(Duration::from_millis(interval_ms)).with_frame_limit(frames);
    let counters = camera.counters();
    let controller = CaptureSessionController::new(camera, pipeline.clone(), factory)
        .on_fatal(|msg| tracing::error!("❌ 会话终止: {msg}"));

    let cameras = [CameraInfo {
        id: "synthetic".into(),
        facing: Some(LensFacing::Back),
        output_sizes: vec![landmark_cam_rs::PreviewSize::new(width, height)],
    }];
    controller.open_best(&cameras)?;

    let deadline = Instant::now() + Duration::from_millis(interval_ms * frames as u64 + 10_000);
    while counters.delivered.load(Ordering::Acquire) < frames && Instant::now() < deadline {
        controller.pump_events_timeout(Duration::from_millis(100));
        if controller.state().name() == "Closed" {
            break;
        }
    }
    pipeline.gate().wait_idle();
    controller.teardown();

    tracing::info!(
        delivered = counters.delivered.load(Ordering::Acquire),
        released = counters.released.load(Ordering::Acquire),
        out_dir = %live.out_dir.display(),
        "📊 回放结束"
    );
    Ok(())
}

#[cfg(feature = "camera")]
fn camera(config: PipelineConfig, seconds: u64, live: LiveArgs) -> Result<()> {
    use landmark_cam_rs::input::{list_cameras, FfmpegCameraBackend};

    let factory = deps_factory(&config, &live)?;
    let pipeline = Arc::new(Pipeline::new(config.clone()));
    pipeline.set_screen_size(live.screen_width, live.screen_height);

    let cameras = list_cameras();
    for camera in &cameras {
        tracing::info!(id = %camera.id, "📷 可用摄像头");
    }
    let controller = CaptureSessionController::new(FfmpegCameraBackend::new(), pipeline, factory)
        .on_fatal(|msg| tracing::error!("❌ 会话终止: {msg}"));
    controller.open_best(&cameras).context("没有可用的摄像头")?;

    let deadline = Instant::now() + Duration::from_secs(seconds);
    while Instant::now() < deadline {
        controller.pump_events_timeout(Duration::from_millis(200));
        if controller.state().name() == "Closed" {
            break;
        }
    }
    controller.teardown();
    Ok(())
}

/// 把叠加窗口内容写成PNG序列的显示后端
struct PngFrameHost {
    out_dir: PathBuf,
    frames: usize,
}

impl PngFrameHost {
    fn new(out_dir: PathBuf) -> Self {
        Self { out_dir, frames: 0 }
    }
}

impl OverlayHost for PngFrameHost {
    fn create_window(&mut self, id: WindowId, layout: &WindowLayout) {
        if let Err(e) = std::fs::create_dir_all(&self.out_dir) {
            tracing::error!("❌ 创建输出目录失败: {e}");
        }
        tracing::info!(window = id.index(), ?layout, "📺 输出到 {}", self.out_dir.display());
    }

    fn update_layout(&mut self, id: WindowId, layout: &WindowLayout) {
        tracing::debug!(window = id.index(), ?layout, "窗口移动");
    }

    fn present_image(&mut self, _id: WindowId, image: &RgbaImage) {
        let path = self.out_dir.join(format!("frame_{:05}.png", self.frames));
        self.frames += 1;
        if let Err(e) = image.save(&path) {
            tracing::warn!("⚠️ 保存帧失败 {}: {e}", path.display());
        }
    }

    fn show_fps(&mut self, _id: WindowId, text: &str) {
        tracing::info!("📊 {text}");
    }

    fn show_info(&mut self, _id: WindowId, text: &str) {
        tracing::debug!("{text}");
    }

    fn destroy_window(&mut self, _id: WindowId) {
        tracing::info!(frames = self.frames, "🛑 输出结束");
    }
}
