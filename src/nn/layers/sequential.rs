use crate::io::StateDict;
use crate::nn::Module;
use crate::tensor::Tensor;

/// Ordered chain of modules, applied left to right.
///
/// The decomposition networks are built as explicit structs, so this mostly
/// serves ad-hoc compositions in tooling and tests. State-dict keys are
/// prefixed with the layer index ("0.weight", "2.bias", ...).
pub struct Sequential {
    layers: Vec<Box<dyn Module>>,
}

impl Sequential {
    pub fn new(layers: Vec<Box<dyn Module>>) -> Self {
        Sequential { layers }
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl Module for Sequential {
    fn forward(&self, x: &Tensor) -> Tensor {
        self.layers
            .iter()
            .fold(x.clone(), |h, layer| layer.forward(&h))
    }

    fn parameters(&self) -> Vec<Tensor> {
        self.layers.iter().flat_map(|l| l.parameters()).collect()
    }

    fn state_dict(&self) -> StateDict {
        let mut state = StateDict::new();
        for (i, layer) in self.layers.iter().enumerate() {
            for (key, value) in layer.state_dict() {
                state.insert(format!("{i}.{key}"), value);
            }
        }
        state
    }

    fn load_state_dict(&mut self, state: &StateDict) {
        for (i, layer) in self.layers.iter_mut().enumerate() {
            let prefix = format!("{i}.");
            let sub_state: StateDict = state
                .iter()
                .filter_map(|(key, value)| {
                    key.strip_prefix(&prefix)
                        .filter(|rest| !rest.is_empty())
                        .map(|rest| (rest.to_string(), value.clone()))
                })
                .collect();
            if !sub_state.is_empty() {
                layer.load_state_dict(&sub_state);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::{Linear, ReLU};
    use crate::tensor::RawTensor;

    #[test]
    fn test_forward_composes_in_order() {
        let chain = Sequential::new(vec![Box::new(Linear::new(2, 2, false)), Box::new(ReLU)]);
        assert_eq!(chain.len(), 2);

        let x = RawTensor::new(vec![1.0, -1.0], &[1, 2], false);
        let y = chain.forward(&x);
        assert_eq!(y.borrow().shape, vec![1, 2]);
        assert!(y.borrow().data.iter().all(|v| *v >= 0.0));
    }

    #[test]
    fn test_state_dict_keys_carry_layer_index() {
        let chain = Sequential::new(vec![
            Box::new(Linear::new(2, 3, true)),
            Box::new(ReLU),
            Box::new(Linear::new(3, 1, true)),
        ]);
        let state = chain.state_dict();
        assert!(state.contains_key("0.weight"));
        assert!(state.contains_key("0.bias"));
        assert!(state.contains_key("2.weight"));
        assert!(!state.keys().any(|k| k.starts_with("1.")));
    }
}
