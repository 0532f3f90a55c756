pub mod progress;

pub use progress::ProgressBar;
