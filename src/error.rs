//! 流水线错误类型
//! Pipeline error taxonomy

use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// 错误分类: 决定出错后流水线如何反应
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 单帧错误: 记录日志, 丢弃该帧, 继续处理后续帧
    Transient,
    /// 摄像头会话级错误: 通知宿主并拆除会话
    ResourceLifecycle,
    /// 环境错误: 在流水线启动前交给宿主处理
    Environment,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{plane} 平面数据不足: 需要 {required} 字节, 实际 {actual} 字节")]
    BufferUnderrun {
        plane: &'static str,
        required: usize,
        actual: usize,
    },

    #[error("{plane} 平面步长非法: row_stride={row_stride}, pixel_stride={pixel_stride}, width={width}")]
    InvalidStride {
        plane: &'static str,
        row_stride: usize,
        pixel_stride: usize,
        width: usize,
    },

    #[error("不支持的旋转角度: {0}° (仅支持 0/90/180/270)")]
    UnsupportedRotation(i32),

    #[error("仿射矩阵不可逆")]
    NonInvertibleTransform,

    #[error("检测器错误: {0}")]
    Detector(String),

    #[error("执行上下文不可用: {0}")]
    ContextUnavailable(&'static str),

    #[error("等待摄像头开关锁超时 ({0:?})")]
    PermitTimeout(Duration),

    #[error("摄像头打开失败: {0}")]
    CameraOpen(String),

    #[error("摄像头会话配置失败: {0}")]
    CameraConfigure(String),

    #[error("摄像头访问异常: {0}")]
    CameraAccess(String),

    #[error("没有可用的摄像头")]
    NoCamera,

    #[error("窗口尺寸非法: {width}x{height} (屏幕 {screen_width}x{screen_height})")]
    InvalidWindowSize {
        width: i32,
        height: i32,
        screen_width: i32,
        screen_height: i32,
    },

    #[error("模型文件 {path} 准备失败: {source}")]
    Asset {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("配置错误: {0}")]
    Config(String),

    #[error("图像处理失败: {0}")]
    Image(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::BufferUnderrun { .. }
            | PipelineError::InvalidStride { .. }
            | PipelineError::UnsupportedRotation(_)
            | PipelineError::NonInvertibleTransform
            | PipelineError::Detector(_)
            | PipelineError::ContextUnavailable(_) => ErrorKind::Transient,
            PipelineError::PermitTimeout(_)
            | PipelineError::CameraOpen(_)
            | PipelineError::CameraConfigure(_)
            | PipelineError::CameraAccess(_)
            | PipelineError::NoCamera => ErrorKind::ResourceLifecycle,
            PipelineError::InvalidWindowSize { .. }
            | PipelineError::Asset { .. }
            | PipelineError::Config(_)
            | PipelineError::Image(_) => ErrorKind::Environment,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        let underrun = PipelineError::BufferUnderrun {
            plane: "Y",
            required: 10,
            actual: 4,
        };
        assert!(underrun.is_transient());
        assert_eq!(
            PipelineError::PermitTimeout(Duration::from_millis(2500)).kind(),
            ErrorKind::ResourceLifecycle
        );
        assert_eq!(
            PipelineError::Config("bad".into()).kind(),
            ErrorKind::Environment
        );
    }
}
