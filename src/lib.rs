//! Intrinsic face decomposition with a small autograd engine.
//!
//! The crate is split into two halves. The lower half is a tensor library
//! with reverse-mode automatic differentiation (`tensor`, `autograd`, `ops`)
//! and a torch-like module/optimizer layer on top (`nn`). The upper half is
//! the decomposition model itself: convolutional sub-networks that predict
//! surface normals, albedo and spherical-harmonics lighting from a masked
//! face image, a differentiable shading layer, and the training loop that
//! fits them jointly (`model`, `pipeline`, `loss`, `train`).

pub mod autograd;
pub mod data;
pub mod device;
pub mod error;
pub mod io;
pub mod loss;
pub mod model;
pub mod nn;
pub mod ops;
pub mod pipeline;
pub mod tensor;
pub mod train;
pub mod utils;

pub use autograd::{no_grad, GradFn};
pub use device::Device;
pub use error::{Result, SfsError};
pub use tensor::{RawTensor, Tensor, TensorOps};
