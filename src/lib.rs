// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod config; // 流水线配置参数
pub mod detection; // 检测服务与模型文件
pub mod error; // 错误类型
pub mod input; // 摄像头输入与会话
pub mod pipeline; // 帧处理流水线
pub mod renderer; // 叠加绘制与悬浮窗口
pub mod utils; // 颜色转换 / 几何变换 / 统计

pub use crate::config::PipelineConfig;
pub use crate::detection::{
    AssetSource, Detection, DetectorService, Landmark, LogStatus, ModelAsset, ReplayDetector,
    StatusSink,
};
pub use crate::error::{ErrorKind, PipelineError, Result};
pub use crate::input::{
    CameraBackend, CameraInfo, CaptureSessionController, OwnedYuvFrame, PreviewSize, RawFrame,
    SessionState,
};
pub use crate::pipeline::{FrameSink, InferenceContext, Pipeline, PipelineDeps, PipelineState};
pub use crate::renderer::{
    DetectionOverlayRenderer, OverlayColor, OverlayHost, OverlaySurface, WindowLayout,
};
pub use crate::utils::gen_time_string;
