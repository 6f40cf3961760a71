/// 检测系统 (Detection System)
///
/// - types:  检测结果 + 检测服务接口
/// - asset:  关键点模型文件准备
/// - replay: 回放检测器 (无原生模型时驱动整条流水线)
pub mod asset;
pub mod replay;
pub mod types;

pub use asset::{AssetSource, ModelAsset};
pub use replay::ReplayDetector;
pub use types::{Detection, DetectorService, Landmark, LogStatus, StatusSink};
