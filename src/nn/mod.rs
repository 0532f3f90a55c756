use crate::device::Device;
use crate::io::StateDict;
use crate::tensor::Tensor;

pub mod layers;
pub mod optim;

pub use layers::{Conv2d, Linear, ReLU, Sequential, Tanh};
pub use optim::Adam;

pub trait Module {
    fn forward(&self, x: &Tensor) -> Tensor;
    fn parameters(&self) -> Vec<Tensor>;

    // State dict methods
    fn state_dict(&self) -> StateDict;
    fn load_state_dict(&mut self, state: &StateDict);

    fn zero_grad(&mut self) {
        for p in self.parameters() {
            p.borrow_mut().grad = None;
        }
    }

    /// Move all module parameters to a specific device.
    ///
    /// Only the CPU backend is implemented; this updates the device marker on
    /// each parameter so a future backend can hook in without changing
    /// callers.
    fn to_device(&mut self, device: Device) {
        for param in self.parameters() {
            param.borrow_mut().device = device;
        }
    }
}
