/// 视频输入系统 (Video Input System)
///
/// - frame: 原始YUV帧与缓冲归还
/// - session: 摄像头会话状态机
/// - camera: 尺寸协商、开关锁与会话控制器
/// - synthetic: 合成摄像头 (回放与测试)
/// - decode_filter: FFmpeg本地摄像头后端 (feature `camera`)
pub mod camera;
pub mod frame;
pub mod session;
pub mod synthetic;

#[cfg(feature = "camera")]
pub mod decode_filter;

pub use camera::{
    choose_optimal_size, select_camera, CameraBackend, CameraInfo, CaptureSessionController,
    LensFacing, LifecyclePermit, PreviewSize,
};
#[cfg(feature = "camera")]
pub use decode_filter::{list_cameras, CameraFrameFilter, FfmpegCameraBackend};
pub use frame::{OwnedYuvFrame, RawFrame, YuvPlane};
pub use session::{CaptureRequest, SessionEffect, SessionEvent, SessionState, SessionTarget};
pub use synthetic::{CaptureCounters, SyntheticCamera};
