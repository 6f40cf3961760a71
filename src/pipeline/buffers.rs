//! 帧缓冲池 (FrameBufferPool)
//!
//! 持有可复用的像素缓冲: 原始平面拷贝 → ARGB工作帧 → 正方形推理帧.
//! 仅在帧尺寸变化时重新分配.

use image::RgbaImage;

use crate::error::{PipelineError, Result};
use crate::input::frame::RawFrame;
use crate::utils::affine_transform::{self, AffineMatrix};
use crate::utils::yuv::{self, PlaneView, YuvLayout};

/// 打包像素帧: 每像素一个 0xAARRGGBB
#[derive(Debug, Clone, PartialEq)]
pub struct PackedFrame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u32>,
}

impl PackedFrame {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; (width * height) as usize],
        }
    }

    pub fn from_pixels(width: u32, height: u32, pixels: Vec<u32>) -> Result<Self> {
        let expected = (width * height) as usize;
        if pixels.len() != expected {
            return Err(PipelineError::BufferUnderrun {
                plane: "ARGB",
                required: expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn pixel(&self, x: u32, y: u32) -> u32 {
        self.pixels[(y * self.width + x) as usize]
    }
}

/// 推理帧: 固定 N×N, 既是检测输入也是叠加绘制的画布
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceFrame {
    image: RgbaImage,
}

impl InferenceFrame {
    pub fn new(size: u32) -> Self {
        Self {
            image: RgbaImage::new(size, size),
        }
    }

    /// 边长
    pub fn size(&self) -> u32 {
        self.image.width()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut RgbaImage {
        &mut self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }
}

/// 暂存的原始平面 (字节拷贝 + 步长)
#[derive(Debug, Default)]
struct StagedPlane {
    bytes: Vec<u8>,
    row_stride: usize,
    pixel_stride: usize,
}

impl StagedPlane {
    fn view(&self) -> PlaneView<'_> {
        PlaneView {
            data: &self.bytes,
            row_stride: self.row_stride,
            pixel_stride: self.pixel_stride,
        }
    }
}

pub struct FrameBufferPool {
    planes: [StagedPlane; 3],
    staged_size: Option<(u32, u32)>,
    packed: Option<PackedFrame>,
    inference: Option<InferenceFrame>,
    inference_size: u32,
    reallocations: u64,
}

impl FrameBufferPool {
    pub fn new(inference_size: u32) -> Self {
        Self {
            planes: Default::default(),
            staged_size: None,
            packed: None,
            inference: None,
            inference_size,
            reallocations: 0,
        }
    }

    pub fn inference_size(&self) -> u32 {
        self.inference_size
    }

    /// 工作帧重新分配次数 (ARGB + 推理帧)
    pub fn reallocations(&self) -> u64 {
        self.reallocations
    }

    pub fn packed(&self) -> Option<&PackedFrame> {
        self.packed.as_ref()
    }

    /// 拷贝原始帧的三个平面, 之后原始帧即可归还给采集层
    pub fn stage(&mut self, raw: &RawFrame<'_>) {
        for (staged, plane) in self.planes.iter_mut().zip(raw.planes()) {
            staged.bytes.clear();
            staged.bytes.extend_from_slice(plane.data);
            staged.row_stride = plane.row_stride;
            staged.pixel_stride = plane.pixel_stride;
        }
        self.staged_size = Some((raw.width(), raw.height()));
    }

    /// 暂存平面 → ARGB工作帧 (尺寸变化时重新分配)
    pub fn convert_staged(&mut self, swap_uv: bool) -> Result<&PackedFrame> {
        let (width, height) = self
            .staged_size
            .ok_or(PipelineError::ContextUnavailable("没有暂存的原始帧"))?;

        let reuse = matches!(&self.packed, Some(p) if p.width == width && p.height == height);
        if !reuse {
            tracing::debug!(width, height, "初始化工作帧尺寸");
            self.packed = Some(PackedFrame::new(width, height));
            self.reallocations += 1;
        }

        let [y, u, v] = &self.planes;
        let layout = YuvLayout {
            y: y.view(),
            u: u.view(),
            v: v.view(),
            width: width as usize,
            height: height as usize,
        };
        let packed = self
            .packed
            .as_mut()
            .ok_or(PipelineError::ContextUnavailable("工作帧未分配"))?;
        yuv::convert_into(&layout, swap_uv, &mut packed.pixels)?;
        Ok(packed)
    }

    /// 取出推理帧 (正在推理的帧不在池中)
    pub fn take_inference(&mut self) -> InferenceFrame {
        match self.inference.take() {
            Some(frame) if frame.size() == self.inference_size => frame,
            _ => {
                self.reallocations += 1;
                InferenceFrame::new(self.inference_size)
            }
        }
    }

    /// 推理结束后归还推理帧
    pub fn restore_inference(&mut self, frame: InferenceFrame) {
        if frame.size() == self.inference_size {
            self.inference = Some(frame);
        }
    }

    /// 工作帧 → 裁剪/旋转/缩放后的推理帧
    pub fn normalize(&mut self, matrix: &AffineMatrix) -> Result<InferenceFrame> {
        let mut frame = self.take_inference();
        let result = match &self.packed {
            Some(packed) => affine_transform::apply(matrix, packed, &mut frame),
            None => Err(PipelineError::ContextUnavailable("工作帧未分配")),
        };
        match result {
            Ok(()) => Ok(frame),
            Err(e) => {
                self.restore_inference(frame);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::frame::YuvPlane;

    fn gray_frame(y: &[u8], uv: &[u8], w: u32, h: u32) -> RawFrame<'static> {
        let y: &'static [u8] = Box::leak(y.to_vec().into_boxed_slice());
        let uv: &'static [u8] = Box::leak(uv.to_vec().into_boxed_slice());
        RawFrame::new(
            w,
            h,
            [
                YuvPlane::new(y, w as usize, 1),
                YuvPlane::new(uv, (w / 2) as usize, 1),
                YuvPlane::new(uv, (w / 2) as usize, 1),
            ],
        )
    }

    #[test]
    fn test_packed_reused_until_dimensions_change() {
        let mut pool = FrameBufferPool::new(8);

        let frame = gray_frame(&[10; 16], &[128; 4], 4, 4);
        pool.stage(&frame);
        pool.convert_staged(false).unwrap();
        assert_eq!(pool.reallocations(), 1);

        pool.stage(&frame);
        pool.convert_staged(false).unwrap();
        assert_eq!(pool.reallocations(), 1);

        let bigger = gray_frame(&[10; 32], &[128; 8], 8, 4);
        pool.stage(&bigger);
        let packed = pool.convert_staged(false).unwrap();
        assert_eq!((packed.width, packed.height), (8, 4));
        assert_eq!(pool.reallocations(), 2);
    }

    #[test]
    fn test_inference_frame_round_trip_through_pool() {
        let mut pool = FrameBufferPool::new(16);
        let frame = pool.take_inference();
        assert_eq!(frame.size(), 16);
        assert_eq!(pool.reallocations(), 1);

        pool.restore_inference(frame);
        let again = pool.take_inference();
        assert_eq!(again.size(), 16);
        assert_eq!(pool.reallocations(), 1);
    }

    #[test]
    fn test_convert_without_staging_fails() {
        let mut pool = FrameBufferPool::new(4);
        assert!(pool.convert_staged(false).is_err());
    }
}
