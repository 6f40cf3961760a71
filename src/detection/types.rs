/// 检测结果与检测服务接口
/// Detection values and the detector service seam
use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// 关键点 (推理帧像素坐标)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: i32,
    pub y: i32,
}

/// 检测框 + 有序关键点, 坐标位于推理帧 (N×N) 空间
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Detection {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    #[serde(default)]
    pub landmarks: Vec<Landmark>,
}

impl Detection {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
            landmarks: Vec::new(),
        }
    }

    pub fn with_landmarks(mut self, points: impl IntoIterator<Item = (i32, i32)>) -> Self {
        self.landmarks
            .extend(points.into_iter().map(|(x, y)| Landmark { x, y }));
        self
    }

    /// 保证 left ≤ right, top ≤ bottom
    pub fn normalized(&self) -> (i32, i32, i32, i32) {
        (
            self.left.min(self.right),
            self.top.min(self.bottom),
            self.left.max(self.right),
            self.top.max(self.bottom),
        )
    }
}

/// 区域检测服务 (人脸 + 关键点)
///
/// 实现方不要求线程安全; 流水线在互斥锁内独占调用
pub trait DetectorService: Send {
    /// 检测: 推理帧 → 检测列表
    ///
    /// # Arguments
    /// * `image` - N×N RGBA 推理帧
    fn detect(&mut self, image: &RgbaImage) -> Result<Vec<Detection>>;

    /// 释放原生资源, 之后不再调用 `detect`
    fn release(&mut self) {}

    fn name(&self) -> &str {
        "detector"
    }
}

/// 状态文本输出 (例如 "Time cost: 0.031 sec")
pub trait StatusSink: Send + Sync {
    fn set_status(&self, text: &str);
}

/// 只写日志的状态输出
#[derive(Debug, Default, Clone, Copy)]
pub struct LogStatus;

impl StatusSink for LogStatus {
    fn set_status(&self, text: &str) {
        tracing::info!("📝 {text}");
    }
}
