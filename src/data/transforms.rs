use crate::data::{FaceDataset, SH_COEFFS};
use crate::tensor::{RawTensor, Tensor, TensorOps};
use rand::Rng;

/// Normalize data in-place: (x - mean) / std
pub fn normalize(data: &mut [f32], mean: f32, std: f32) {
    for x in data.iter_mut() {
        *x = (*x - mean) / std;
    }
}

/// Zero out background pixels, in-graph.
///
/// `mask` broadcasts against `x` per the usual rules, so a `[B, 1, H, W]`
/// mask covers all three channels of a `[B, 3, H, W]` image.
pub fn apply_mask(x: &Tensor, mask: &Tensor) -> Tensor {
    x.elem_mul(mask)
}

/// Map `[-1, 1]` back to `[0, 1]`, in-graph: (x + 1) / 2.
pub fn denormalize(x: &Tensor) -> Tensor {
    let one = RawTensor::constant(1.0, &[1]);
    let half = RawTensor::constant(0.5, &[1]);
    x.add(&one).elem_mul(&half)
}

/// Build a random dataset with the right shapes and value ranges.
///
/// Faces, normals and albedo are drawn from `[-1, 1]`; the mask is 1 on an
/// inset rectangle and 0 on a one-pixel border, so masking is observable.
pub fn synthetic_dataset(num_samples: usize, height: usize, width: usize) -> FaceDataset {
    let mut rng = rand::rng();
    let image_size = 3 * height * width;

    let mut signed = |n: usize| -> Vec<f32> {
        (0..n).map(|_| rng.random_range(-1.0f32..1.0)).collect()
    };
    let face = signed(num_samples * image_size);
    let normal = signed(num_samples * image_size);
    let albedo = signed(num_samples * image_size);

    let mut mask = vec![0.0f32; num_samples * height * width];
    for s in 0..num_samples {
        for y in 0..height {
            for x in 0..width {
                let inset = y > 0 && y + 1 < height && x > 0 && x + 1 < width;
                if inset {
                    mask[(s * height + y) * width + x] = 1.0;
                }
            }
        }
    }

    let sh: Vec<f32> = (0..num_samples * SH_COEFFS)
        .map(|_| rng.random_range(-0.5f32..0.5))
        .collect();

    FaceDataset::new(face, mask, normal, albedo, sh, height, width)
        .expect("synthetic buffers are sized consistently")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        let mut data = vec![0.0, 0.5, 1.0];
        normalize(&mut data, 0.5, 0.5);

        assert_eq!(data, vec![-1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_denormalize_endpoints() {
        let x = RawTensor::new(vec![-1.0, 0.0, 1.0], &[3], false);
        let y = denormalize(&x);
        assert_eq!(y.borrow().data, vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn test_apply_mask_zeroes_background() {
        let x = RawTensor::ones(&[1, 3, 2, 2]);
        let mask = RawTensor::new(vec![1.0, 0.0, 0.0, 1.0], &[1, 1, 2, 2], false);
        let masked = apply_mask(&x, &mask);
        let data = masked.borrow().data.clone();
        // same mask pattern repeated across all three channels
        assert_eq!(data, vec![1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_apply_mask_flows_gradients_through_foreground() {
        let x = RawTensor::new(vec![2.0, 3.0], &[1, 1, 1, 2], true);
        let mask = RawTensor::new(vec![1.0, 0.0], &[1, 1, 1, 2], false);
        let loss = apply_mask(&x, &mask).sum();
        loss.backward();
        assert_eq!(x.grad().unwrap(), vec![1.0, 0.0]);
    }

    #[test]
    fn test_synthetic_dataset_shapes_and_mask_border() {
        let ds = synthetic_dataset(2, 4, 4);
        assert_eq!(ds.len(), 2);

        let mut loader = crate::data::DataLoader::new(ds, 2, false);
        let batch = loader.next().unwrap();
        let mask = batch.mask.borrow();
        // top-left corner sits on the zeroed border, center is foreground
        assert_eq!(mask.data[0], 0.0);
        assert_eq!(mask.data[5], 1.0); // (y, x) = (1, 1)

        let face = batch.face.borrow();
        assert!(face.data.iter().all(|v| (-1.0..=1.0).contains(v)));
    }
}
