/// 检测结果叠加绘制 (DetectionOverlayRenderer)
///
/// 一个参数化的绘制函数, 两个调用点:
/// - 实时路径: 推理帧上直接绘制, 缩放比 1.0
/// - 静态图片: 大图先缩放到 512 宽, 再按缩放比绘制
pub mod overlay;

use fast_image_resize as fr;
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_hollow_circle_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use std::io;
use std::path::Path;

use crate::config::{PipelineConfig, MAX_DISPLAY_SIZE};
use crate::detection::Detection;
use crate::error::{PipelineError, Result};
use crate::pipeline::buffers::InferenceFrame;

pub use overlay::{
    HostCall, OverlayHost, OverlaySurface, RecordingHost, TouchEvent, WindowId, WindowLayout,
    WindowRegistry,
};

/// 叠加颜色: 人脸/实时路径为绿色, 行人为蓝色
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayColor {
    Face,
    Person,
}

impl OverlayColor {
    pub fn rgba(self) -> Rgba<u8> {
        match self {
            OverlayColor::Face => Rgba([0, 255, 0, 255]),
            OverlayColor::Person => Rgba([0, 0, 255, 255]),
        }
    }
}

/// 静态图片绘制结果
#[derive(Debug, Clone)]
pub struct AnnotatedImage {
    pub image: RgbaImage,
    pub resize_ratio: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct DetectionOverlayRenderer {
    stroke_width: u32,
    landmark_radius: i32,
    max_display_size: u32,
}

impl Default for DetectionOverlayRenderer {
    fn default() -> Self {
        Self {
            stroke_width: 2,
            landmark_radius: 2,
            max_display_size: MAX_DISPLAY_SIZE,
        }
    }
}

impl DetectionOverlayRenderer {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            stroke_width: config.stroke_width.max(1),
            landmark_radius: config.landmark_radius,
            max_display_size: config.static_max_size,
        }
    }

    /// 实时路径: 推理帧坐标即检测坐标
    pub fn render(&self, frame: &mut InferenceFrame, detections: &[Detection]) {
        self.render_scaled(frame.image_mut(), detections, 1.0, OverlayColor::Face);
    }

    /// 按缩放比绘制检测框与关键点; 越界坐标先裁剪到画布附近再交给绘制原语
    pub fn render_scaled(
        &self,
        canvas: &mut RgbaImage,
        detections: &[Detection],
        resize_ratio: f32,
        color: OverlayColor,
    ) {
        let color = color.rgba();
        for det in detections {
            let scale = |v: i32| (v as f32 * resize_ratio) as i32;
            let (l, t, r, b) = det.normalized();
            self.draw_box(canvas, (scale(l), scale(t), scale(r), scale(b)), color);

            tracing::debug!(landmarks = det.landmarks.len(), "绘制关键点");
            for point in &det.landmarks {
                let center = (scale(point.x), scale(point.y));
                if self.circle_visible(canvas, center) {
                    draw_hollow_circle_mut(canvas, center, self.landmark_radius, color);
                }
            }
        }
    }

    /// 外边缘落在给定坐标上 (右/下边含端点), 线宽向内扩展
    ///
    /// 画布外的边被收到画布外 `stroke` 像素处, 内缩后仍在画布外, 不会画出假边
    fn draw_box(&self, canvas: &mut RgbaImage, (l, t, r, b): (i32, i32, i32, i32), color: Rgba<u8>) {
        let (w, h) = (canvas.width() as i64, canvas.height() as i64);
        let stroke = self.stroke_width as i64;
        let (l, t, r, b) = (l as i64, t as i64, r as i64, b as i64);
        if r < 0 || b < 0 || l >= w || t >= h {
            return;
        }
        let (l, t) = (l.max(-stroke), t.max(-stroke));
        let (r, b) = (r.min(w + stroke), b.min(h + stroke));

        for inset in 0..stroke {
            let (l, t, r, b) = (l + inset, t + inset, r - inset, b - inset);
            if r < l || b < t {
                break;
            }
            let rect = Rect::at(l as i32, t as i32).of_size((r - l + 1) as u32, (b - t + 1) as u32);
            draw_hollow_rect_mut(canvas, rect, color);
        }
    }

    /// 圆与画布有交集时才绘制
    fn circle_visible(&self, canvas: &RgbaImage, (x, y): (i32, i32)) -> bool {
        let radius = self.landmark_radius.max(0) as i64;
        let (x, y) = (x as i64, y as i64);
        x + radius >= 0
            && y + radius >= 0
            && x - radius < canvas.width() as i64
            && y - radius < canvas.height() as i64
    }

    /// 静态图片路径: 加载 → (必要时)缩放 → 按比例绘制
    pub fn annotate_image(
        &self,
        path: impl AsRef<Path>,
        detections: &[Detection],
        color: OverlayColor,
    ) -> Result<AnnotatedImage> {
        let path = path.as_ref();
        let mut image = image::open(path)
            .map_err(|e| match e {
                image::ImageError::IoError(source) => PipelineError::Asset {
                    path: path.display().to_string(),
                    source,
                },
                other => PipelineError::Asset {
                    path: path.display().to_string(),
                    source: io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
                },
            })?
            .to_rgba8();
        let mut resize_ratio = 1.0;

        if let Some((new_w, new_h, ratio)) =
            compute_resize(image.width(), image.height(), self.max_display_size)
        {
            tracing::info!(
                from = %format!("{}x{}", image.width(), image.height()),
                to = %format!("{}x{}", new_w, new_h),
                ratio,
                "📐 缩放静态图片"
            );
            image = resize_bilinear(&image, new_w, new_h)?;
            resize_ratio = ratio;
        }

        self.render_scaled(&mut image, detections, resize_ratio, color);
        Ok(AnnotatedImage {
            image,
            resize_ratio,
        })
    }
}

/// 两边都超过 `max_size` 时: 宽缩到 `max_size`, 高 = round(max_size / 宽高比)
///
/// 返回 (新宽, 新高, 缩放比)
pub fn compute_resize(width: u32, height: u32, max_size: u32) -> Option<(u32, u32, f32)> {
    if width <= max_size || height <= max_size {
        return None;
    }
    let aspect = width as f32 / height as f32;
    let new_height = ((max_size as f32 / aspect).round() as u32).max(1);
    let ratio = max_size as f32 / width as f32;
    Some((max_size, new_height, ratio))
}

/// 双线性缩放 (fast_image_resize)
fn resize_bilinear(src: &RgbaImage, width: u32, height: u32) -> Result<RgbaImage> {
    let src_image = fr::images::Image::from_vec_u8(
        src.width(),
        src.height(),
        src.as_raw().clone(),
        fr::PixelType::U8x4,
    )
    .map_err(|e| PipelineError::Image(format!("源图像创建失败: {e}")))?;

    let mut dst_image = fr::images::Image::new(width, height, fr::PixelType::U8x4);
    let mut resizer = fr::Resizer::new();
    resizer
        .resize(
            &src_image,
            &mut dst_image,
            &fr::ResizeOptions::new()
                .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear)),
        )
        .map_err(|e| PipelineError::Image(format!("缩放失败: {e}")))?;

    RgbaImage::from_raw(width, height, dst_image.into_vec())
        .ok_or_else(|| PipelineError::Image("缩放结果尺寸不匹配".into()))
}
