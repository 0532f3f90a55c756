pub mod activation;
pub mod conv;
pub mod linear;
pub mod sequential;

pub use activation::{ReLU, Tanh};
pub use conv::Conv2d;
pub use linear::Linear;
pub use sequential::Sequential;
