//! 流水线配置 - 通过JSON文件调整参数

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{PipelineError, Result};

/// 推理输入尺寸 (正方形边长)
pub const INPUT_SIZE: u32 = 224;
/// 预览尺寸最小可用边长
pub const MINIMUM_PREVIEW_SIZE: u32 = 320;
/// 静态图片显示最大边长
pub const MAX_DISPLAY_SIZE: u32 = 512;
/// 摄像头开关锁等待时间
pub const PERMIT_TIMEOUT_MS: u64 = 2500;

/// 流水线参数配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    // === 几何归一化 ===
    pub inference_size: u32,   // 推理帧边长 N
    pub min_preview_size: u32, // 预览尺寸下限
    pub static_max_size: u32,  // 静态图片缩放阈值

    // === 摄像头会话 ===
    pub permit_timeout_ms: u64, // 打开摄像头时的锁等待

    // === 叠加绘制 ===
    pub landmark_radius: i32, // 关键点圆半径
    pub stroke_width: u32,    // 检测框线宽

    // === 模型与调试 ===
    pub model_path: PathBuf,               // 关键点模型目标路径
    pub save_preview_dir: Option<PathBuf>, // 保存裁剪后预览帧的目录
    pub overlay_queue: usize,              // 显示线程队列深度
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            inference_size: INPUT_SIZE,
            min_preview_size: MINIMUM_PREVIEW_SIZE,
            static_max_size: MAX_DISPLAY_SIZE,

            permit_timeout_ms: PERMIT_TIMEOUT_MS,

            landmark_radius: 2,
            stroke_width: 2,

            model_path: PathBuf::from("models/shape_predictor_68_face_landmarks.dat"),
            save_preview_dir: None,
            overlay_queue: 2,
        }
    }
}

impl PipelineConfig {
    /// 从JSON文件加载配置, 文件不存在时写出默认配置
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str::<Self>(&json) {
                Ok(config) => match config.validate() {
                    Ok(()) => {
                        tracing::info!(path = %path.display(), "✅ 配置已加载");
                        config
                    }
                    Err(e) => {
                        tracing::warn!("⚠️ 配置无效: {e}, 使用默认值");
                        Self::default()
                    }
                },
                Err(e) => {
                    tracing::warn!("⚠️ 配置文件解析失败: {e}, 使用默认值");
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!(path = %path.display(), "📝 配置文件不存在,创建默认配置");
                let config = Self::default();
                if let Err(e) = config.save(path) {
                    tracing::warn!("⚠️ {e}");
                }
                config
            }
        }
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| PipelineError::Config(format!("序列化配置失败: {e}")))?;
        fs::write(path, json).map_err(|e| {
            PipelineError::Config(format!("保存配置到 {} 失败: {e}", path.display()))
        })?;
        tracing::info!(path = %path.display(), "💾 配置已保存");
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.inference_size == 0 {
            return Err(PipelineError::Config("inference_size 必须大于0".into()));
        }
        if self.static_max_size == 0 {
            return Err(PipelineError::Config("static_max_size 必须大于0".into()));
        }
        if self.overlay_queue == 0 {
            return Err(PipelineError::Config("overlay_queue 必须大于0".into()));
        }
        Ok(())
    }

    pub fn permit_timeout(&self) -> Duration {
        Duration::from_millis(self.permit_timeout_ms)
    }

    /// 打印当前配置
    pub fn print_summary(&self) {
        tracing::info!(
            inference_size = self.inference_size,
            min_preview_size = self.min_preview_size,
            static_max_size = self.static_max_size,
            permit_timeout_ms = self.permit_timeout_ms,
            model = %self.model_path.display(),
            "🎛️ 当前流水线配置"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_constants() {
        let config = PipelineConfig::default();
        assert_eq!(config.inference_size, 224);
        assert_eq!(config.min_preview_size, 320);
        assert_eq!(config.static_max_size, 512);
        assert_eq!(config.permit_timeout(), Duration::from_millis(2500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");

        let config = PipelineConfig::load(&path);
        assert_eq!(config, PipelineConfig::default());
        assert!(path.exists());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        fs::write(&path, r#"{ "inference_size": 160, "save_preview_dir": "snapshots" }"#).unwrap();

        let config = PipelineConfig::load(&path);
        assert_eq!(config.inference_size, 160);
        assert_eq!(config.save_preview_dir, Some(PathBuf::from("snapshots")));
        assert_eq!(config.static_max_size, 512);
    }

    #[test]
    fn test_invalid_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        fs::write(&path, r#"{ "inference_size": 0 }"#).unwrap();
        assert_eq!(PipelineConfig::load(&path), PipelineConfig::default());

        fs::write(&path, "not json").unwrap();
        assert_eq!(PipelineConfig::load(&path), PipelineConfig::default());
    }
}
