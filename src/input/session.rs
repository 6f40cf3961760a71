//! 摄像头会话状态机
//!
//! `transition(state, event) -> (state, effects)` 为纯函数, 不触碰任何设备;
//! 副作用由 [`CaptureSessionController`](super::camera::CaptureSessionController) 解释执行.
//!
//! ```text
//! Closed ──SurfaceAvailable──▶ Opening ──DeviceOpened──▶ Configuring ──SessionConfigured──▶ Streaming
//!    ▲                            │                          │                                │
//!    │                            └──────── 失败 ───────────▶ Error ◀──────── 访问异常 ───────┘
//!    └──────── ResourcesReleased ─────────────────────────────┘      (Teardown: 任意打开状态 → Closed)
//! ```

use super::camera::PreviewSize;

/// 正在使用的摄像头与预览尺寸
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTarget {
    pub camera_id: String,
    pub preview: PreviewSize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Opening(SessionTarget),
    Configuring(SessionTarget),
    Streaming(SessionTarget),
    Error(String),
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Closed => "Closed",
            SessionState::Opening(_) => "Opening",
            SessionState::Configuring(_) => "Configuring",
            SessionState::Streaming(_) => "Streaming",
            SessionState::Error(_) => "Error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// 预览表面就绪, 摄像头与预览尺寸已选定
    SurfaceAvailable {
        camera_id: String,
        preview: PreviewSize,
    },
    /// 等待开关锁超时 (未持有锁)
    PermitTimeout(String),
    DeviceOpened,
    DeviceDisconnected,
    DeviceError(String),
    SessionConfigured,
    SessionConfigureFailed(String),
    AccessError(String),
    /// 显式拆除 (表面销毁 / 暂停); 调用方已持有开关锁
    Teardown,
    ResourcesReleased,
}

/// 自动对焦模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoFocusMode {
    ContinuousPicture,
}

/// 自动曝光模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExposureMode {
    OnAutoFlash,
}

/// 预览用重复采集请求
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureRequest {
    pub autofocus: AutoFocusMode,
    pub exposure: ExposureMode,
}

impl CaptureRequest {
    /// 连续对焦 + 自动闪光
    pub fn preview() -> Self {
        Self {
            autofocus: AutoFocusMode::ContinuousPicture,
            exposure: ExposureMode::OnAutoFlash,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEffect {
    OpenDevice(SessionTarget),
    ReleasePermit,
    CreateSession(PreviewSize),
    StartRepeating(CaptureRequest),
    DeinitializePipeline,
    /// 依次关闭 会话 → 设备 → 帧读取器
    ReleaseResources,
    ReportFatal(String),
}

/// 状态转移; 不适用于当前状态的事件被忽略 (状态不变, 无副作用)
pub fn transition(state: SessionState, event: SessionEvent) -> (SessionState, Vec<SessionEffect>) {
    use SessionEffect::*;
    use SessionEvent as E;
    use SessionState as S;

    match (state, event) {
        (S::Closed, E::SurfaceAvailable { camera_id, preview }) => {
            let target = SessionTarget { camera_id, preview };
            (S::Opening(target.clone()), vec![OpenDevice(target)])
        }

        (S::Opening(_), E::PermitTimeout(msg)) => (
            S::Error(msg.clone()),
            vec![ReportFatal(msg), ReleaseResources],
        ),
        (S::Opening(target), E::DeviceOpened) => {
            let preview = target.preview;
            // 会话建立后再放开锁, 拆除流程不会与建会话交错
            (
                S::Configuring(target),
                vec![CreateSession(preview), ReleasePermit],
            )
        }
        (S::Opening(_), E::DeviceDisconnected) => (
            S::Closed,
            vec![ReleasePermit, DeinitializePipeline, ReleaseResources],
        ),
        (S::Opening(_), E::DeviceError(msg)) | (S::Opening(_), E::AccessError(msg)) => (
            S::Error(msg.clone()),
            vec![
                ReleasePermit,
                ReportFatal(msg),
                DeinitializePipeline,
                ReleaseResources,
            ],
        ),

        (S::Configuring(target), E::SessionConfigured) => (
            S::Streaming(target),
            vec![StartRepeating(CaptureRequest::preview())],
        ),
        (S::Configuring(_), E::SessionConfigureFailed(msg))
        | (S::Configuring(_), E::DeviceError(msg))
        | (S::Configuring(_), E::AccessError(msg))
        | (S::Streaming(_), E::DeviceError(msg))
        | (S::Streaming(_), E::AccessError(msg)) => (
            S::Error(msg.clone()),
            vec![ReportFatal(msg), DeinitializePipeline, ReleaseResources],
        ),
        (S::Configuring(_), E::DeviceDisconnected) | (S::Streaming(_), E::DeviceDisconnected) => {
            (S::Closed, vec![DeinitializePipeline, ReleaseResources])
        }

        // 打开结果尚未到达: 放开 OpenDevice 持有的锁
        (S::Opening(_), E::Teardown) => (
            S::Closed,
            vec![ReleasePermit, DeinitializePipeline, ReleaseResources],
        ),
        (S::Configuring(_), E::Teardown)
        | (S::Streaming(_), E::Teardown)
        | (S::Error(_), E::Teardown) => (S::Closed, vec![DeinitializePipeline, ReleaseResources]),

        (S::Error(_), E::ResourcesReleased) => (S::Closed, Vec::new()),

        (state, event) => {
            tracing::debug!(state = state.name(), ?event, "忽略不适用的会话事件");
            (state, Vec::new())
        }
    }
}
