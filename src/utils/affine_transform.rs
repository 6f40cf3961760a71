/// 仿射变换工具模块
/// 中心裁剪 → 缩放 → 绕中心旋转, 把任意尺寸的预览帧归一化为正方形推理帧
use crate::error::{PipelineError, Result};
use crate::pipeline::buffers::{InferenceFrame, PackedFrame};

/// 仿射变换矩阵 (2x3)
/// | a11 a12 b1 |
/// | a21 a22 b2 |
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineMatrix {
    pub a11: f32,
    pub a12: f32,
    pub b1: f32,
    pub a21: f32,
    pub a22: f32,
    pub b2: f32,
}

impl AffineMatrix {
    /// 创建单位仿射矩阵
    pub fn identity() -> Self {
        Self {
            a11: 1.0,
            a12: 0.0,
            b1: 0.0,
            a21: 0.0,
            a22: 1.0,
            b2: 0.0,
        }
    }

    /// 应用仿射变换到点 (x, y)
    pub fn transform_point(&self, x: f32, y: f32) -> (f32, f32) {
        let new_x = self.a11 * x + self.a12 * y + self.b1;
        let new_y = self.a21 * x + self.a22 * y + self.b2;
        (new_x, new_y)
    }

    /// 计算逆矩阵 (用于反向映射)
    pub fn inverse(&self) -> Option<Self> {
        let det = self.a11 * self.a22 - self.a12 * self.a21;
        if det.abs() < 1e-10 {
            return None; // 矩阵不可逆
        }

        let inv_det = 1.0 / det;
        Some(Self {
            a11: self.a22 * inv_det,
            a12: -self.a12 * inv_det,
            b1: (self.a12 * self.b2 - self.a22 * self.b1) * inv_det,
            a21: -self.a21 * inv_det,
            a22: self.a11 * inv_det,
            b2: (self.a21 * self.b1 - self.a11 * self.b2) * inv_det,
        })
    }

    /// 创建平移矩阵
    pub fn translation(dx: f32, dy: f32) -> Self {
        Self {
            b1: dx,
            b2: dy,
            ..Self::identity()
        }
    }

    /// 创建缩放矩阵
    pub fn scale(sx: f32, sy: f32) -> Self {
        Self {
            a11: sx,
            a22: sy,
            ..Self::identity()
        }
    }

    /// 创建直角旋转矩阵 (图像坐标系下顺时针, 0/90/180/270)
    ///
    /// 直角使用精确的整数 sin/cos, 避免 `cos(90°)` 的浮点残差
    pub fn cardinal_rotation(degrees: i32) -> Result<Self> {
        let (cos_a, sin_a) = match degrees {
            0 => (1.0, 0.0),
            90 => (0.0, 1.0),
            180 => (-1.0, 0.0),
            270 => (0.0, -1.0),
            other => return Err(PipelineError::UnsupportedRotation(other)),
        };
        Ok(Self {
            a11: cos_a,
            a12: -sin_a,
            b1: 0.0,
            a21: sin_a,
            a22: cos_a,
            b2: 0.0,
        })
    }

    /// 创建围绕中心点的直角旋转矩阵
    pub fn rotation_around_center(center_x: f32, center_y: f32, degrees: i32) -> Result<Self> {
        let t1 = Self::translation(-center_x, -center_y);
        let r = Self::cardinal_rotation(degrees)?;
        let t2 = Self::translation(center_x, center_y);
        Ok(t2.compose(&r.compose(&t1)))
    }

    /// 矩阵组合 (self * other), 先应用 other
    pub fn compose(&self, other: &Self) -> Self {
        Self {
            a11: self.a11 * other.a11 + self.a12 * other.a21,
            a12: self.a11 * other.a12 + self.a12 * other.a22,
            b1: self.a11 * other.b1 + self.a12 * other.b2 + self.b1,
            a21: self.a21 * other.a11 + self.a22 * other.a21,
            a22: self.a21 * other.a12 + self.a22 * other.a22,
            b2: self.a21 * other.b1 + self.a22 * other.b2 + self.b2,
        }
    }
}

/// 计算 源矩形 → 目标正方形 的变换
///
/// 1. 取源图中心的 `min(w, h)` 正方形
/// 2. 缩放到 `dst_size`
/// 3. `rotation_degrees != 0` 时绕目标中心旋转
pub fn compute_crop_rotate_scale(
    src_width: u32,
    src_height: u32,
    dst_size: u32,
    rotation_degrees: i32,
) -> Result<AffineMatrix> {
    // 先校验角度, 非法角度不产生任何矩阵
    let center = dst_size as f32 / 2.0;
    let rotation = AffineMatrix::rotation_around_center(center, center, rotation_degrees)?;
    if src_width == 0 || src_height == 0 || dst_size == 0 {
        return Err(PipelineError::NonInvertibleTransform);
    }

    let min_dim = src_width.min(src_height) as f32;
    let translate_x = -(0f32.max((src_width as f32 - min_dim) / 2.0));
    let translate_y = -(0f32.max((src_height as f32 - min_dim) / 2.0));
    let scale_factor = dst_size as f32 / min_dim;

    let crop = AffineMatrix::translation(translate_x, translate_y);
    let mut matrix = AffineMatrix::scale(scale_factor, scale_factor).compose(&crop);

    if rotation_degrees != 0 {
        matrix = rotation.compose(&matrix);
    }

    Ok(matrix)
}

/// 根据屏幕尺寸推断旋转: 竖屏 → 90°, 横屏 → 0°
pub fn device_rotation_hint(screen_width: u32, screen_height: u32) -> i32 {
    if screen_width < screen_height {
        90
    } else {
        0
    }
}

/// 按变换矩阵把ARGB工作帧重采样到推理帧
///
/// 以目标像素中心做反向映射, 最近邻取样; 落在源图外的像素为透明黑
pub fn apply(matrix: &AffineMatrix, src: &PackedFrame, dst: &mut InferenceFrame) -> Result<()> {
    let inv_matrix = matrix
        .inverse()
        .ok_or(PipelineError::NonInvertibleTransform)?;
    let (src_w, src_h) = (src.width as i64, src.height as i64);
    let size = dst.size();
    let raw: &mut [u8] = dst.image_mut();

    for dst_y in 0..size {
        for dst_x in 0..size {
            // 反向映射到源图像坐标
            let (sx, sy) = inv_matrix.transform_point(dst_x as f32 + 0.5, dst_y as f32 + 0.5);
            let ix = sx.floor() as i64;
            let iy = sy.floor() as i64;

            let argb = if ix >= 0 && ix < src_w && iy >= 0 && iy < src_h {
                src.pixels[(iy * src_w + ix) as usize]
            } else {
                0
            };

            let idx = ((dst_y * size + dst_x) * 4) as usize;
            raw[idx] = (argb >> 16) as u8;
            raw[idx + 1] = (argb >> 8) as u8;
            raw[idx + 2] = argb as u8;
            raw[idx + 3] = (argb >> 24) as u8;
        }
    }

    Ok(())
}

/// 推理帧 → ARGB工作帧 (用于逆变换或回读)
pub fn to_packed(frame: &InferenceFrame) -> PackedFrame {
    let size = frame.size();
    let pixels = frame
        .image()
        .pixels()
        .map(|p| {
            let [r, g, b, a] = p.0;
            (a as u32) << 24 | (r as u32) << 16 | (g as u32) << 8 | b as u32
        })
        .collect();
    PackedFrame {
        width: size,
        height: size,
        pixels,
    }
}
