/// 关键点模型文件 (ModelAsset)
///
/// 首次推理前确保模型存在于目标路径; 并发调用只拷贝一次,
/// 拷贝写入同目录临时文件后再重命名, 读者不会看到半截文件
use once_cell::sync::OnceCell;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use super::types::StatusSink;
use crate::error::{PipelineError, Result};

/// 模型来源 (随程序打包的数据或磁盘上的文件)
#[derive(Debug, Clone)]
pub enum AssetSource {
    Bytes(Vec<u8>),
    File(PathBuf),
}

#[derive(Debug)]
pub struct ModelAsset {
    source: AssetSource,
    target: PathBuf,
    ready: OnceCell<()>,
    copies: AtomicUsize,
}

impl ModelAsset {
    pub fn new(source: AssetSource, target: impl Into<PathBuf>) -> Self {
        Self {
            source,
            target: target.into(),
            ready: OnceCell::new(),
            copies: AtomicUsize::new(0),
        }
    }

    /// 目标路径已存在的模型 (不需要拷贝)
    pub fn existing(path: impl Into<PathBuf>) -> Self {
        let target = path.into();
        Self::new(AssetSource::File(target.clone()), target)
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// 实际执行过的拷贝次数
    pub fn copies(&self) -> usize {
        self.copies.load(Ordering::SeqCst)
    }

    /// 确保模型文件存在; 幂等, 并发安全
    pub fn ensure_present(&self, status: &dyn StatusSink) -> Result<&Path> {
        self.ready.get_or_try_init(|| {
            if self.target.exists() {
                return Ok(());
            }
            status.set_status(&format!(
                "Copying landmark model to {}",
                self.target.display()
            ));
            tracing::info!(target = %self.target.display(), "📦 拷贝关键点模型");
            self.copy_into_place().map_err(|source| PipelineError::Asset {
                path: self.target.display().to_string(),
                source,
            })?;
            self.copies.fetch_add(1, Ordering::SeqCst);
            tracing::info!("✅ 模型就绪");
            Ok(())
        })?;
        Ok(&self.target)
    }

    fn copy_into_place(&self) -> io::Result<()> {
        if let Some(parent) = self.target.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file_name = self
            .target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "model".to_string());
        let tmp = self
            .target
            .with_file_name(format!(".{}.{}.tmp", file_name, std::process::id()));

        let written = match &self.source {
            AssetSource::Bytes(bytes) => fs::write(&tmp, bytes),
            AssetSource::File(path) => fs::copy(path, &tmp).map(|_| ()),
        };
        if let Err(e) = written.and_then(|_| fs::rename(&tmp, &self.target)) {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::thread;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl StatusSink for Recorder {
        fn set_status(&self, text: &str) {
            self.0.lock().unwrap().push(text.to_string());
        }
    }

    #[test]
    fn test_copies_once_and_reports_status() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("models").join("shape.dat");
        let asset = ModelAsset::new(AssetSource::Bytes(b"landmarks".to_vec()), &target);
        let status = Recorder::default();

        assert_eq!(asset.ensure_present(&status).unwrap(), target.as_path());
        asset.ensure_present(&status).unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"landmarks");
        assert_eq!(asset.copies(), 1);
        let messages = status.0.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].starts_with("Copying landmark model to "));
        // 不残留临时文件
        assert_eq!(fs::read_dir(target.parent().unwrap()).unwrap().count(), 1);
    }

    #[test]
    fn test_existing_target_is_not_copied() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("shape.dat");
        fs::write(&target, b"already").unwrap();

        let asset = ModelAsset::new(AssetSource::Bytes(b"new".to_vec()), &target);
        asset.ensure_present(&Recorder::default()).unwrap();
        assert_eq!(asset.copies(), 0);
        assert_eq!(fs::read(&target).unwrap(), b"already");
    }

    #[test]
    fn test_concurrent_callers_copy_once() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("bundled.dat");
        fs::write(&source, vec![7u8; 4096]).unwrap();
        let target = dir.path().join("out").join("shape.dat");
        let asset = Arc::new(ModelAsset::new(AssetSource::File(source), &target));
        let status = Arc::new(Recorder::default());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let (asset, status) = (asset.clone(), status.clone());
                thread::spawn(move || {
                    asset.ensure_present(status.as_ref()).unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(asset.copies(), 1);
        assert_eq!(fs::read(&target).unwrap().len(), 4096);
    }

    #[test]
    fn test_missing_source_is_environment_error() {
        let dir = tempfile::tempdir().unwrap();
        let asset = ModelAsset::new(
            AssetSource::File(dir.path().join("nope.dat")),
            dir.path().join("shape.dat"),
        );
        let err = asset.ensure_present(&Recorder::default()).unwrap_err();
        assert!(matches!(err, PipelineError::Asset { .. }));
        assert!(!dir.path().join("shape.dat").exists());
    }
}
