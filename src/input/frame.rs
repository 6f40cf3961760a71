//! 原始摄像头帧 (RawFrame)
//!
//! 平面YUV420 + 每平面步长. 底层硬件缓冲由采集层持有,
//! 流水线必须在返回前归还: 显式 `release()` 或析构时自动归还, 且只归还一次.

use std::fmt;

/// 单个YUV平面
#[derive(Debug, Clone, Copy)]
pub struct YuvPlane<'a> {
    pub data: &'a [u8],
    pub row_stride: usize,
    pub pixel_stride: usize,
}

impl<'a> YuvPlane<'a> {
    pub fn new(data: &'a [u8], row_stride: usize, pixel_stride: usize) -> Self {
        Self {
            data,
            row_stride,
            pixel_stride,
        }
    }
}

type ReleaseHook<'a> = Box<dyn FnOnce() + Send + 'a>;

pub struct RawFrame<'a> {
    width: u32,
    height: u32,
    planes: [YuvPlane<'a>; 3],
    release: Option<ReleaseHook<'a>>,
}

impl<'a> RawFrame<'a> {
    /// 平面顺序: Y, U, V
    pub fn new(width: u32, height: u32, planes: [YuvPlane<'a>; 3]) -> Self {
        Self {
            width,
            height,
            planes,
            release: None,
        }
    }

    /// 设置归还硬件缓冲的回调
    pub fn with_release(mut self, hook: impl FnOnce() + Send + 'a) -> Self {
        self.release = Some(Box::new(hook));
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn planes(&self) -> &[YuvPlane<'a>; 3] {
        &self.planes
    }

    pub fn y(&self) -> &YuvPlane<'a> {
        &self.planes[0]
    }

    pub fn u(&self) -> &YuvPlane<'a> {
        &self.planes[1]
    }

    pub fn v(&self) -> &YuvPlane<'a> {
        &self.planes[2]
    }

    /// 立即归还底层缓冲
    pub fn release(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(hook) = self.release.take() {
            hook();
        }
    }
}

impl Drop for RawFrame<'_> {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl fmt::Debug for RawFrame<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("y_stride", &self.planes[0].row_stride)
            .field("uv_stride", &self.planes[1].row_stride)
            .field("uv_pixel_stride", &self.planes[1].pixel_stride)
            .field("pending_release", &self.release.is_some())
            .finish()
    }
}

/// 所有权版本的YUV420帧, 供合成摄像头与测试构造数据
#[derive(Debug, Clone)]
pub struct OwnedYuvFrame {
    pub width: u32,
    pub height: u32,
    pub y: Vec<u8>,
    pub u: Vec<u8>,
    pub v: Vec<u8>,
    pub y_row_stride: usize,
    pub uv_row_stride: usize,
    pub uv_pixel_stride: usize,
}

impl OwnedYuvFrame {
    /// 纯色帧, 行尾带 `padding` 字节填充
    pub fn solid(width: u32, height: u32, padding: usize, yuv: (u8, u8, u8)) -> Self {
        let (w, h) = (width as usize, height as usize);
        let (cw, ch) = ((w + 1) / 2, (h + 1) / 2);
        let y_row_stride = w + padding;
        let uv_row_stride = cw + padding;
        Self {
            width,
            height,
            y: vec![yuv.0; y_row_stride * h],
            u: vec![yuv.1; uv_row_stride * ch],
            v: vec![yuv.2; uv_row_stride * ch],
            y_row_stride,
            uv_row_stride,
            uv_pixel_stride: 1,
        }
    }

    pub fn set_luma(&mut self, x: usize, y: usize, value: u8) {
        self.y[y * self.y_row_stride + x] = value;
    }

    pub fn as_raw(&self) -> RawFrame<'_> {
        RawFrame::new(
            self.width,
            self.height,
            [
                YuvPlane::new(&self.y, self.y_row_stride, 1),
                YuvPlane::new(&self.u, self.uv_row_stride, self.uv_pixel_stride),
                YuvPlane::new(&self.v, self.uv_row_stride, self.uv_pixel_stride),
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_release_runs_once_explicit() {
        let count = Arc::new(AtomicUsize::new(0));
        let owned = OwnedYuvFrame::solid(4, 4, 0, (0, 128, 128));
        let c = count.clone();
        let raw = owned.as_raw().with_release(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        raw.release();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_release_runs_on_drop() {
        let count = Arc::new(AtomicUsize::new(0));
        let owned = OwnedYuvFrame::solid(4, 4, 2, (0, 128, 128));
        {
            let c = count.clone();
            let _raw = owned.as_raw().with_release(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_solid_frame_layout() {
        let owned = OwnedYuvFrame::solid(5, 3, 3, (10, 20, 30));
        assert_eq!(owned.y_row_stride, 8);
        assert_eq!(owned.uv_row_stride, 6);
        assert_eq!(owned.y.len(), 24);
        assert_eq!(owned.u.len(), 12);
    }
}
