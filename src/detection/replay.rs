/// 回放检测器 (ReplayDetector)
/// 从JSON文件读取预先录制的检测结果, 按帧循环返回
use image::RgbaImage;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use super::types::{Detection, DetectorService};
use crate::error::{PipelineError, Result};

/// JSON 格式: 单帧 `[det, ...]` (每帧相同) 或多帧 `[[det, ...], ...]`
#[derive(Deserialize)]
#[serde(untagged)]
enum Recording {
    Sequence(Vec<Vec<Detection>>),
    Single(Vec<Detection>),
}

#[derive(Debug, Clone)]
pub struct ReplayDetector {
    frames: Vec<Vec<Detection>>,
    calls: usize,
    released: bool,
}

impl ReplayDetector {
    pub fn new(frames: Vec<Vec<Detection>>) -> Self {
        Self {
            frames,
            calls: 0,
            released: false,
        }
    }

    /// 每帧返回相同的检测结果
    pub fn constant(detections: Vec<Detection>) -> Self {
        Self::new(vec![detections])
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let recording: Recording = serde_json::from_str(json)
            .map_err(|e| PipelineError::Config(format!("检测回放文件解析失败: {e}")))?;
        Ok(match recording {
            Recording::Sequence(frames) => Self::new(frames),
            Recording::Single(dets) => Self::constant(dets),
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| PipelineError::Asset {
            path: path.display().to_string(),
            source,
        })?;
        let detector = Self::from_json(&json)?;
        tracing::info!(
            path = %path.display(),
            frames = detector.frames.len(),
            "✅ 检测回放文件加载成功"
        );
        Ok(detector)
    }

    pub fn calls(&self) -> usize {
        self.calls
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl DetectorService for ReplayDetector {
    fn detect(&mut self, image: &RgbaImage) -> Result<Vec<Detection>> {
        if self.released {
            return Err(PipelineError::Detector("检测器已释放".into()));
        }
        let index = self.calls;
        self.calls += 1;
        tracing::debug!(
            frame = index,
            width = image.width(),
            height = image.height(),
            "🔍 回放检测"
        );
        if self.frames.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.frames[index % self.frames.len()].clone())
    }

    fn release(&mut self) {
        self.released = true;
    }

    fn name(&self) -> &str {
        "replay"
    }
}
