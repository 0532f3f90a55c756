use crate::error::{Result, SfsError};
use crate::tensor::{RawTensor, Tensor};

pub mod transforms;

pub use transforms::{apply_mask, denormalize, normalize};

/// One batch of supervised decomposition data, all NCHW except `sh`.
///
/// - `face`: normalized face crops, `[B, 3, H, W]`
/// - `mask`: foreground masks in `{0, 1}`, `[B, 1, H, W]`
/// - `normal`: ground-truth surface normals, `[B, 3, H, W]`
/// - `albedo`: ground-truth albedo, `[B, 3, H, W]`
/// - `sh`: spherical-harmonics lighting coefficients, `[B, 27]`
pub struct Batch {
    pub face: Tensor,
    pub mask: Tensor,
    pub normal: Tensor,
    pub albedo: Tensor,
    pub sh: Tensor,
}

impl Batch {
    pub fn batch_size(&self) -> usize {
        self.face.borrow().shape[0]
    }
}

/// In-memory dataset of face crops with ground-truth decomposition targets.
///
/// All five streams are stored as flat row-major buffers, one sample after
/// another, the same way the loader slices them back out.
pub struct FaceDataset {
    face: Vec<f32>,
    mask: Vec<f32>,
    normal: Vec<f32>,
    albedo: Vec<f32>,
    sh: Vec<f32>,
    height: usize,
    width: usize,
    num_samples: usize,
}

impl FaceDataset {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        face: Vec<f32>,
        mask: Vec<f32>,
        normal: Vec<f32>,
        albedo: Vec<f32>,
        sh: Vec<f32>,
        height: usize,
        width: usize,
    ) -> Result<Self> {
        let image_size = 3 * height * width;
        let mask_size = height * width;
        if image_size == 0 {
            return Err(SfsError::InvalidParameter(
                "dataset images must be non-empty".to_string(),
            ));
        }
        if face.len() % image_size != 0 {
            return Err(SfsError::InvalidParameter(format!(
                "face buffer of {} floats is not a whole number of {}x{} RGB images",
                face.len(),
                height,
                width
            )));
        }
        let num_samples = face.len() / image_size;

        let check = |name: &str, len: usize, per_sample: usize| -> Result<()> {
            if len != num_samples * per_sample {
                return Err(SfsError::InvalidParameter(format!(
                    "{name} buffer has {len} floats, expected {} for {num_samples} samples",
                    num_samples * per_sample
                )));
            }
            Ok(())
        };
        check("mask", mask.len(), mask_size)?;
        check("normal", normal.len(), image_size)?;
        check("albedo", albedo.len(), image_size)?;
        check("sh", sh.len(), SH_COEFFS)?;

        Ok(FaceDataset {
            face,
            mask,
            normal,
            albedo,
            sh,
            height,
            width,
            num_samples,
        })
    }

    pub fn len(&self) -> usize {
        self.num_samples
    }

    pub fn is_empty(&self) -> bool {
        self.num_samples == 0
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }
}

/// Number of lighting coefficients per sample: 9 second-order SH terms
/// for each of the three color channels.
pub const SH_COEFFS: usize = 27;

/// Batching iterator over a [`FaceDataset`].
///
/// Shuffles sample order on construction and on every `reset` when enabled.
/// The last batch may be smaller than `batch_size`.
pub struct DataLoader {
    dataset: FaceDataset,
    batch_size: usize,
    shuffle: bool,
    indices: Vec<usize>,
    current: usize,
}

impl DataLoader {
    pub fn new(dataset: FaceDataset, batch_size: usize, shuffle: bool) -> Self {
        let mut indices: Vec<usize> = (0..dataset.len()).collect();

        if shuffle {
            use rand::seq::SliceRandom;
            indices.shuffle(&mut rand::rng());
        }

        DataLoader {
            dataset,
            batch_size,
            shuffle,
            indices,
            current: 0,
        }
    }

    pub fn reset(&mut self) {
        self.current = 0;
        if self.shuffle {
            use rand::seq::SliceRandom;
            self.indices.shuffle(&mut rand::rng());
        }
    }

    /// Number of batches per full pass, counting a short final batch.
    pub fn num_batches(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }
}

impl Iterator for DataLoader {
    type Item = Batch;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current >= self.indices.len() {
            return None;
        }

        let end = (self.current + self.batch_size).min(self.indices.len());
        let batch_indices = &self.indices[self.current..end];
        let actual_batch = batch_indices.len();

        let (h, w) = (self.dataset.height, self.dataset.width);
        let image_size = 3 * h * w;
        let mask_size = h * w;

        let mut face = Vec::with_capacity(actual_batch * image_size);
        let mut mask = Vec::with_capacity(actual_batch * mask_size);
        let mut normal = Vec::with_capacity(actual_batch * image_size);
        let mut albedo = Vec::with_capacity(actual_batch * image_size);
        let mut sh = Vec::with_capacity(actual_batch * SH_COEFFS);

        for &idx in batch_indices {
            let img = idx * image_size;
            let msk = idx * mask_size;
            let l = idx * SH_COEFFS;
            face.extend_from_slice(&self.dataset.face[img..img + image_size]);
            mask.extend_from_slice(&self.dataset.mask[msk..msk + mask_size]);
            normal.extend_from_slice(&self.dataset.normal[img..img + image_size]);
            albedo.extend_from_slice(&self.dataset.albedo[img..img + image_size]);
            sh.extend_from_slice(&self.dataset.sh[l..l + SH_COEFFS]);
        }

        self.current = end;

        Some(Batch {
            face: RawTensor::new(face, &[actual_batch, 3, h, w], false),
            mask: RawTensor::new(mask, &[actual_batch, 1, h, w], false),
            normal: RawTensor::new(normal, &[actual_batch, 3, h, w], false),
            albedo: RawTensor::new(albedo, &[actual_batch, 3, h, w], false),
            sh: RawTensor::new(sh, &[actual_batch, SH_COEFFS], false),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use transforms::synthetic_dataset;

    #[test]
    fn test_dataset_rejects_mismatched_buffers() {
        let res = FaceDataset::new(
            vec![0.0; 3 * 4 * 4],
            vec![0.0; 4 * 4],
            vec![0.0; 3 * 4 * 4],
            vec![0.0; 3 * 4 * 4],
            vec![0.0; 5], // wrong: needs 27
            4,
            4,
        );
        assert!(res.is_err());
    }

    #[test]
    fn test_loader_batch_shapes() {
        let ds = synthetic_dataset(5, 8, 8);
        let mut loader = DataLoader::new(ds, 2, false);
        assert_eq!(loader.num_batches(), 3);

        let first = loader.next().unwrap();
        assert_eq!(first.face.borrow().shape, vec![2, 3, 8, 8]);
        assert_eq!(first.mask.borrow().shape, vec![2, 1, 8, 8]);
        assert_eq!(first.sh.borrow().shape, vec![2, 27]);

        // 2 + 2 + 1
        let second = loader.next().unwrap();
        assert_eq!(second.batch_size(), 2);
        let last = loader.next().unwrap();
        assert_eq!(last.batch_size(), 1);
        assert!(loader.next().is_none());
    }

    #[test]
    fn test_loader_reset_restarts_iteration() {
        let ds = synthetic_dataset(3, 4, 4);
        let mut loader = DataLoader::new(ds, 2, false);
        while loader.next().is_some() {}
        loader.reset();
        assert!(loader.next().is_some());
    }

    #[test]
    fn test_unshuffled_loader_preserves_order() {
        let ds = synthetic_dataset(4, 2, 2);
        let first_sample: Vec<f32> = ds.face[..3 * 2 * 2].to_vec();
        let mut loader = DataLoader::new(ds, 4, false);
        let batch = loader.next().unwrap();
        assert_eq!(&batch.face.borrow().data[..12], &first_sample[..]);
    }
}
