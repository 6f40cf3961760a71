/// FFmpeg摄像头采集 (需要 `camera` feature)
/// FFmpeg camera capture
///
/// 解码线程上的帧过滤器把 YUV420P 平面直接借给流水线 (零拷贝),
/// 回调返回后帧交还给 FFmpeg.
use crossbeam_channel::Sender;
use ez_ffmpeg::core::context::null_output::create_null_output;
use ez_ffmpeg::filter::frame_filter::FrameFilter;
use ez_ffmpeg::filter::frame_filter_context::FrameFilterContext;
use ez_ffmpeg::filter::frame_pipeline_builder::FramePipelineBuilder;
use ez_ffmpeg::{AVMediaType, FfmpegContext, Frame, Input};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::camera::{CameraBackend, CameraInfo, LensFacing, PreviewSize};
use super::frame::{RawFrame, YuvPlane};
use super::session::{CaptureRequest, SessionEvent, SessionTarget};
use crate::error::{PipelineError, Result};
use crate::pipeline::FrameSink;
use crate::utils::FpsCounter;

/// AVPixelFormat 取值 (FFmpeg 枚举顺序固定)
const AV_PIX_FMT_YUV420P: i32 = 0;
const AV_PIX_FMT_YUVJ420P: i32 = 12;

/// 只接受三平面 4:2:0; 其它格式由滤镜图先转成 yuv420p
fn is_planar_yuv420(format: i32) -> bool {
    matches!(format, AV_PIX_FMT_YUV420P | AV_PIX_FMT_YUVJ420P)
}

/// 解码帧 → RawFrame → 流水线
#[derive(Clone)]
pub struct CameraFrameFilter {
    sink: Arc<dyn FrameSink>,
    stopped: Arc<AtomicBool>,
    fps: FpsCounter,
    dropped_frames: usize,
    total_frames: usize,
}

impl CameraFrameFilter {
    pub fn new(sink: Arc<dyn FrameSink>, stopped: Arc<AtomicBool>) -> Self {
        Self {
            sink,
            stopped,
            fps: FpsCounter::default(),
            dropped_frames: 0,
            total_frames: 0,
        }
    }

    fn drop_frame(&mut self, reason: &str) -> std::result::Result<Option<Frame>, String> {
        self.dropped_frames += 1;
        if self.total_frames <= 10 {
            tracing::warn!("⚠️ 丢弃帧 #{}: {reason}", self.total_frames);
        }
        Ok(None)
    }
}

impl FrameFilter for CameraFrameFilter {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn init(&mut self, _ctx: &FrameFilterContext) -> std::result::Result<(), String> {
        tracing::info!("✅ 采集线程启动");
        Ok(())
    }

    fn filter_frame(
        &mut self,
        frame: Frame,
        _ctx: &FrameFilterContext,
    ) -> std::result::Result<Option<Frame>, String> {
        if self.stopped.load(Ordering::Acquire) {
            tracing::info!("🛑 采集会话已关闭, 停止解码");
            return Err("capture session closed".to_string());
        }

        self.total_frames += 1;
        if frame.as_ptr().is_null() || frame.is_empty() || frame.is_corrupt() {
            return self.drop_frame("空帧/损坏帧");
        }

        // SAFETY: 指针非空; 平面数据在本次回调期间由 FFmpeg 持有
        unsafe {
            let av = &*frame.as_ptr();
            let (w, h) = (av.width as u32, av.height as u32);
            if w == 0 || h == 0 || w > 4096 || h > 4096 {
                return self.drop_frame("非法分辨率");
            }
            if !is_planar_yuv420(av.format) {
                return self.drop_frame("像素格式不是 yuv420p");
            }

            let (y_plane, u_plane, v_plane) = (av.data[0], av.data[1], av.data[2]);
            let y_stride = av.linesize[0] as usize;
            let uv_stride = av.linesize[1] as usize;
            if y_plane.is_null() || u_plane.is_null() || v_plane.is_null() {
                return self.drop_frame("YUV指针为空");
            }
            if y_stride < w as usize || uv_stride < (w as usize).div_ceil(2) {
                return self.drop_frame("步长异常");
            }

            let chroma_rows = (h as usize).div_ceil(2);
            let raw = RawFrame::new(
                w,
                h,
                [
                    YuvPlane::new(std::slice::from_raw_parts(y_plane, y_stride * h as usize), y_stride, 1),
                    YuvPlane::new(std::slice::from_raw_parts(u_plane, uv_stride * chroma_rows), uv_stride, 1),
                    YuvPlane::new(std::slice::from_raw_parts(v_plane, uv_stride * chroma_rows), uv_stride, 1),
                ],
            );
            self.sink.on_frame_available(raw);
        }

        if let Some(fps) = self.fps.tick() {
            let drop_rate = self.dropped_frames as f64 / self.total_frames as f64 * 100.0;
            tracing::info!(
                "📺 采集统计: {:.1}fps | 总帧{} | 丢弃{} ({:.1}%)",
                fps,
                self.total_frames,
                self.dropped_frames,
                drop_rate
            );
        }

        Ok(Some(frame))
    }

    fn uninit(&mut self, _ctx: &FrameFilterContext) {
        tracing::info!("✅ 采集线程退出");
    }
}

/// 平台输入格式
fn input_format() -> &'static str {
    #[cfg(target_os = "windows")]
    {
        "dshow"
    }
    #[cfg(target_os = "macos")]
    {
        "avfoundation"
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        "v4l2"
    }
}

/// 设备名 → FFmpeg 输入URL
fn camera_url(index: usize, name: &str) -> String {
    #[cfg(target_os = "windows")]
    {
        let _ = index;
        format!("video={}", name)
    }
    #[cfg(target_os = "macos")]
    {
        let _ = name;
        format!("{}", index)
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        let _ = name;
        format!("/dev/video{}", index)
    }
}

/// 枚举本地摄像头; FFmpeg 不报告朝向与输出尺寸, 使用常见尺寸
pub fn list_cameras() -> Vec<CameraInfo> {
    let common = [(1280, 720), (640, 480), (320, 240)]
        .into_iter()
        .map(|(w, h)| PreviewSize::new(w, h))
        .collect::<Vec<_>>();
    match ez_ffmpeg::device::get_input_video_devices() {
        Ok(devices) => devices
            .into_iter()
            .enumerate()
            .map(|(index, name)| CameraInfo {
                id: camera_url(index, &name),
                facing: Some(LensFacing::External),
                output_sizes: common.clone(),
            })
            .collect(),
        Err(e) => {
            tracing::warn!("⚠️ 获取摄像头列表失败: {e}");
            Vec::new()
        }
    }
}

/// FFmpeg 摄像头后端: 设备在会话建立时由 FFmpeg 打开
#[derive(Default)]
pub struct FfmpegCameraBackend {
    target: Option<SessionTarget>,
    stopped: Arc<AtomicBool>,
    capture: Option<JoinHandle<()>>,
}

impl FfmpegCameraBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn run_capture(
        url: String,
        preview: PreviewSize,
        filter: CameraFrameFilter,
        stopped: Arc<AtomicBool>,
        events: Sender<SessionEvent>,
    ) {
        let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
        let pipe = pipe.filter("capture", Box::new(filter));
        let out = create_null_output().add_frame_pipeline(pipe);
        let video_size = format!("{}x{}", preview.width, preview.height);
        let input = Input::new(url.as_str())
            .set_format(input_format())
            .set_input_opts([("video_size", video_size.as_str())].into());

        let ctx = match FfmpegContext::builder()
            .input(input)
            .filter_desc("format=yuv420p")
            .output(out)
            .build()
        {
            Ok(ctx) => ctx,
            Err(e) => {
                let _ = events.send(SessionEvent::SessionConfigureFailed(e.to_string()));
                return;
            }
        };
        let sch = match ctx.start() {
            Ok(sch) => sch,
            Err(e) => {
                let _ = events.send(SessionEvent::SessionConfigureFailed(e.to_string()));
                return;
            }
        };

        tracing::info!(url = %url, size = %video_size, "✅ 摄像头连接成功, 开始采集");
        let _ = events.send(SessionEvent::SessionConfigured);
        let _ = sch.wait();

        if !stopped.load(Ordering::Acquire) {
            tracing::warn!("⚠️ 摄像头数据流意外结束");
            let _ = events.send(SessionEvent::DeviceDisconnected);
        }
    }
}

impl CameraBackend for FfmpegCameraBackend {
    fn open_device(&mut self, target: &SessionTarget, events: Sender<SessionEvent>) -> Result<()> {
        tracing::info!(format = input_format(), url = %target.camera_id, "🔍 打开摄像头");
        self.target = Some(target.clone());
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
        let url = self
            .target
            .as_ref()
            .map(|t| t.camera_id.clone())
            .ok_or_else(|| PipelineError::CameraConfigure("设备未打开".into()))?;

        self.stopped = Arc::new(AtomicBool::new(false));
        let stopped = self.stopped.clone();
        let filter = CameraFrameFilter::new(sink, stopped.clone());
        let handle = thread::Builder::new()
            .name("camera-capture".into())
            .spawn(move || Self::run_capture(url, preview, filter, stopped, events))
            .map_err(|e| PipelineError::CameraConfigure(e.to_string()))?;
        self.capture = Some(handle);
        Ok(())
    }

    fn start_repeating(&mut self, request: CaptureRequest) -> Result<()> {
        // FFmpeg 输入建立后即连续出帧; 对焦/曝光由驱动默认值决定
        tracing::debug!(?request, "重复采集请求");
        if self.capture.is_none() {
            return Err(PipelineError::CameraAccess("采集会话不存在".into()));
        }
        Ok(())
    }

    fn close_session(&mut self) {
        self.stopped.store(true, Ordering::Release);
        if let Some(handle) = self.capture.take() {
            if handle.join().is_err() {
                tracing::warn!("⚠️ 采集线程异常退出");
            }
        }
    }

    fn close_device(&mut self) {
        if let Some(target) = self.target.take() {
            tracing::info!(url = %target.camera_id, "🛑 摄像头已关闭");
        }
    }

    fn close_reader(&mut self) {
        tracing::debug!("帧读取器已关闭");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_planar_420_frames_are_accepted() {
        assert!(is_planar_yuv420(0));
        assert!(is_planar_yuv420(12));
        // yuyv422 / yuv422p / nv12 / nv21
        for format in [1, 4, 23, 24] {
            assert!(!is_planar_yuv420(format), "format {format}");
        }
    }
}
