/// YUV420 → ARGB 颜色转换
/// YUV420 to packed ARGB conversion
///
/// 纯函数, 无状态: 三个平面 + 步长元数据 → 每像素一个 0xAARRGGBB
use crate::error::{PipelineError, Result};

/// 单个颜色平面 (借用的字节 + 步长)
#[derive(Debug, Clone, Copy)]
pub struct PlaneView<'a> {
    pub data: &'a [u8],
    pub row_stride: usize,
    pub pixel_stride: usize,
}

/// 一帧YUV420的平面布局
#[derive(Debug, Clone, Copy)]
pub struct YuvLayout<'a> {
    pub y: PlaneView<'a>,
    pub u: PlaneView<'a>,
    pub v: PlaneView<'a>,
    pub width: usize,
    pub height: usize,
}

/// YUV420 → ARGB8888
///
/// # 参数
/// - `y_plane`, `u_plane`, `v_plane`: 平面数据 (可带行尾填充)
/// - `y_row_stride`: 亮度行步长
/// - `uv_row_stride`, `uv_pixel_stride`: 色度行步长与像素步长
/// - `swap_uv`: 交换U/V平面 (NV21类数据源)
#[allow(clippy::too_many_arguments)]
pub fn convert(
    y_plane: &[u8],
    u_plane: &[u8],
    v_plane: &[u8],
    y_row_stride: usize,
    uv_row_stride: usize,
    uv_pixel_stride: usize,
    width: usize,
    height: usize,
    swap_uv: bool,
) -> Result<Vec<u32>> {
    let layout = YuvLayout {
        y: PlaneView {
            data: y_plane,
            row_stride: y_row_stride,
            pixel_stride: 1,
        },
        u: PlaneView {
            data: u_plane,
            row_stride: uv_row_stride,
            pixel_stride: uv_pixel_stride,
        },
        v: PlaneView {
            data: v_plane,
            row_stride: uv_row_stride,
            pixel_stride: uv_pixel_stride,
        },
        width,
        height,
    };
    let mut out = vec![0u32; width * height];
    convert_into(&layout, swap_uv, &mut out)?;
    Ok(out)
}

/// 转换到调用方提供的缓冲区 (缓冲区复用)
///
/// `out` 长度必须为 `width * height`
pub fn convert_into(layout: &YuvLayout<'_>, swap_uv: bool, out: &mut [u32]) -> Result<()> {
    let (width, height) = (layout.width, layout.height);
    if out.len() != width * height {
        return Err(PipelineError::BufferUnderrun {
            plane: "ARGB",
            required: width * height,
            actual: out.len(),
        });
    }
    if width == 0 || height == 0 {
        return Ok(());
    }

    let (u, v) = if swap_uv {
        (layout.v, layout.u)
    } else {
        (layout.u, layout.v)
    };

    check_luma(&layout.y, width, height)?;
    check_chroma("U", &u, width, height)?;
    check_chroma("V", &v, width, height)?;

    let mut out_idx = 0;
    for y in 0..height {
        let y_row = y * layout.y.row_stride;
        let uv_row = (y >> 1) * u.row_stride;

        for x in 0..width {
            let uv_offset = uv_row + (x >> 1) * u.pixel_stride;
            let y_val = layout.y.data[y_row + x] as i32;
            let u_val = u.data[uv_offset] as i32 - 128;
            let v_val = v.data[uv_offset] as i32 - 128;

            out[out_idx] = yuv_to_argb(y_val, u_val, v_val);
            out_idx += 1;
        }
    }

    Ok(())
}

/// BT.601系数(乘以128以避免浮点)
#[inline]
fn yuv_to_argb(y: i32, u: i32, v: i32) -> u32 {
    let r = (y + ((v * 179) >> 7)).clamp(0, 255) as u32;
    let g = (y - ((u * 44) >> 7) - ((v * 91) >> 7)).clamp(0, 255) as u32;
    let b = (y + ((u * 227) >> 7)).clamp(0, 255) as u32;
    0xff00_0000 | (r << 16) | (g << 8) | b
}

fn check_luma(plane: &PlaneView<'_>, width: usize, height: usize) -> Result<()> {
    if plane.row_stride < width {
        return Err(PipelineError::InvalidStride {
            plane: "Y",
            row_stride: plane.row_stride,
            pixel_stride: 1,
            width,
        });
    }
    // 最后一行无需行尾填充
    let required = (height - 1) * plane.row_stride + width;
    if plane.data.len() < required {
        return Err(PipelineError::BufferUnderrun {
            plane: "Y",
            required,
            actual: plane.data.len(),
        });
    }
    Ok(())
}

fn check_chroma(
    name: &'static str,
    plane: &PlaneView<'_>,
    width: usize,
    height: usize,
) -> Result<()> {
    let chroma_width = (width + 1) / 2;
    if plane.pixel_stride == 0 || plane.row_stride < (chroma_width - 1) * plane.pixel_stride + 1
    {
        return Err(PipelineError::InvalidStride {
            plane: name,
            row_stride: plane.row_stride,
            pixel_stride: plane.pixel_stride,
            width,
        });
    }
    let required =
        ((height - 1) / 2) * plane.row_stride + (chroma_width - 1) * plane.pixel_stride + 1;
    if plane.data.len() < required {
        return Err(PipelineError::BufferUnderrun {
            plane: name,
            required,
            actual: plane.data.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unpack(p: u32) -> (u8, u8, u8, u8) {
        (
            (p >> 24) as u8,
            (p >> 16) as u8,
            (p >> 8) as u8,
            p as u8,
        )
    }

    #[test]
    fn test_neutral_chroma_is_gray() {
        let (w, h) = (4, 2);
        let y = vec![0u8, 64, 128, 255, 0, 64, 128, 255];
        let u = vec![128u8; 2];
        let v = vec![128u8; 2];
        let out = convert(&y, &u, &v, 4, 2, 1, w, h, false).unwrap();

        assert_eq!(out.len(), w * h);
        for (i, p) in out.iter().enumerate() {
            let (a, r, g, b) = unpack(*p);
            assert_eq!(a, 255);
            assert_eq!(r, y[i]);
            assert_eq!(g, y[i]);
            assert_eq!(b, y[i]);
        }
    }

    #[test]
    fn test_red_and_clamping() {
        // Y=76 U=85 V=255 ≈ 纯红
        let out = convert(&[76], &[85], &[255], 1, 1, 1, 1, 1, false).unwrap();
        let (_, r, g, b) = unpack(out[0]);
        assert!(r > 250, "r={r}");
        assert!(g < 10, "g={g}");
        assert!(b < 10, "b={b}");

        // 交换UV后变成偏蓝
        let out = convert(&[76], &[85], &[255], 1, 1, 1, 1, 1, true).unwrap();
        let (_, r, _, b) = unpack(out[0]);
        assert!(b > r);
    }

    #[test]
    fn test_padded_strides_and_interleaved_chroma() {
        // 6x4, 亮度行步长8, 色度像素步长2 (半交错UV)
        let (w, h) = (6usize, 4usize);
        let y_stride = 8;
        let uv_row_stride = 8;
        let mut y = vec![0xEEu8; y_stride * h];
        for row in 0..h {
            for col in 0..w {
                y[row * y_stride + col] = 100;
            }
        }
        // 填充字节用0xEE标记, 若被读到输出就不是100灰
        let uv_len = ((h - 1) / 2) * uv_row_stride + (w / 2 - 1) * 2 + 1;
        let u = vec![128u8; uv_len];
        let v = vec![128u8; uv_len];

        let out = convert(&y, &u, &v, y_stride, uv_row_stride, 2, w, h, false).unwrap();
        assert_eq!(out.len(), w * h);
        assert!(out.iter().all(|p| unpack(*p) == (255, 100, 100, 100)));
    }

    #[test]
    fn test_short_plane_is_underrun() {
        let (w, h) = (4, 4);
        let y = vec![0u8; 4 * 4 - 1];
        let u = vec![128u8; 4];
        let v = vec![128u8; 4];
        let err = convert(&y, &u, &v, 4, 2, 1, w, h, false).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::BufferUnderrun { plane: "Y", required: 16, actual: 15 }
        ));

        let y = vec![0u8; 16];
        let err = convert(&y, &u, &v[..3], 4, 2, 1, w, h, false).unwrap_err();
        assert!(matches!(err, PipelineError::BufferUnderrun { plane: "V", .. }));
    }

    #[test]
    fn test_stride_smaller_than_width_rejected() {
        let err = convert(&[0; 16], &[128; 4], &[128; 4], 3, 2, 1, 4, 4, false).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidStride { plane: "Y", .. }));
    }

    #[test]
    fn test_odd_dimensions() {
        let (w, h) = (3usize, 3usize);
        let y = vec![50u8; 9];
        let u = vec![128u8; 4];
        let v = vec![128u8; 4];
        let out = convert(&y, &u, &v, 3, 2, 1, w, h, false).unwrap();
        assert_eq!(out.len(), 9);
    }
}
