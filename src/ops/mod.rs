pub mod binary;
pub mod matmul;
pub mod movement;
pub mod reduce;
pub mod unary;

pub use binary::BinaryOp;
pub use movement::MovementOp;
pub use reduce::ReduceOp;
pub use unary::UnaryOp;
