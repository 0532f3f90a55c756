use crate::error::{Result, SfsError};
use crate::tensor::Tensor;
use image::RgbImage;
use std::path::Path;

/// Which pipeline output a debug PNG shows.
///
/// Normals and albedo live in `[-1, 1]` and are mapped back to `[0, 1]`
/// before quantization; faces and shading are written as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpKind {
    Normal,
    Albedo,
    Face,
    Shading,
}

impl DumpKind {
    pub fn label(self) -> &'static str {
        match self {
            DumpKind::Normal => "normal",
            DumpKind::Albedo => "albedo",
            DumpKind::Face => "face",
            DumpKind::Shading => "shading",
        }
    }

    pub fn denormalize(self) -> bool {
        matches!(self, DumpKind::Normal | DumpKind::Albedo)
    }
}

/// Write one sample of a batched image tensor as a PNG.
///
/// `tensor` is NCHW with 1 or 3 channels; a single channel is replicated
/// across RGB. `mask`, when given, must match the spatial size and zeroes
/// background pixels before quantization. Values are clamped to `[0, 1]`
/// and quantized to 8 bits.
pub fn save_debug_image(
    tensor: &Tensor,
    sample: usize,
    mask: Option<&Tensor>,
    denormalize: bool,
    path: &Path,
) -> Result<()> {
    let t = tensor.borrow();
    if t.shape.len() != 4 {
        return Err(SfsError::InvalidParameter(format!(
            "image dump expects an NCHW tensor, got shape {:?}",
            t.shape
        )));
    }
    let (batch, channels, h, w) = (t.shape[0], t.shape[1], t.shape[2], t.shape[3]);
    if sample >= batch {
        return Err(SfsError::InvalidParameter(format!(
            "sample index {sample} out of range for batch of {batch}"
        )));
    }
    if channels != 1 && channels != 3 {
        return Err(SfsError::InvalidParameter(format!(
            "image dump expects 1 or 3 channels, got {channels}"
        )));
    }

    let mask_borrow = mask.map(|m| m.borrow());
    if let Some(ref m) = mask_borrow {
        let ms = &m.shape;
        if ms.len() != 4 || ms[2] != h || ms[3] != w {
            return Err(SfsError::ShapeMismatch {
                context: "image dump mask",
                expected: vec![batch, 1, h, w],
                actual: ms.clone(),
            });
        }
    }

    let plane = h * w;
    let mut img = RgbImage::new(w as u32, h as u32);
    for y in 0..h {
        for x in 0..w {
            let pix = y * w + x;
            let mut rgb = [0u8; 3];
            for c in 0..3 {
                let ch = if channels == 1 { 0 } else { c };
                let mut v = t.data[((sample * channels + ch) * h + y) * w + x];
                if denormalize {
                    v = (v + 1.0) / 2.0;
                }
                if let Some(ref m) = mask_borrow {
                    let mc = m.shape[1];
                    let m_sample = sample.min(m.shape[0] - 1);
                    let m_ch = if mc == 1 { 0 } else { c };
                    v *= m.data[(m_sample * mc + m_ch) * plane + pix];
                }
                rgb[c] = (v * 255.0).clamp(0.0, 255.0) as u8;
            }
            img.put_pixel(x as u32, y as u32, image::Rgb(rgb));
        }
    }

    img.save(path)
        .map_err(|e| SfsError::Io(std::io::Error::other(e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::RawTensor;

    #[test]
    fn test_dump_kind_denormalization_policy() {
        assert!(DumpKind::Normal.denormalize());
        assert!(DumpKind::Albedo.denormalize());
        assert!(!DumpKind::Face.denormalize());
        assert!(!DumpKind::Shading.denormalize());
    }

    #[test]
    fn test_save_debug_image_roundtrip() {
        let t = RawTensor::new(vec![0.0; 2 * 3 * 4 * 4], &[2, 3, 4, 4], false);
        let dir = std::env::temp_dir().join("sfsnet_img_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("dump.png");
        save_debug_image(&t, 1, None, false, &path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_save_debug_image_rejects_bad_sample() {
        let t = RawTensor::new(vec![0.0; 3 * 2 * 2], &[1, 3, 2, 2], false);
        let path = std::env::temp_dir().join("never_written.png");
        assert!(save_debug_image(&t, 5, None, false, &path).is_err());
    }
}
