use ort::{
    operator::{
        io::{OperatorInput, OperatorOutput},
        kernel::{Kernel, KernelAttributes, KernelContext},
        Operator, OperatorDomain,
    },
    tensor::TensorElementType,
};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LayerError {
    #[error("Custom layer `{0}` is not registered")]
    Unknown(String),
    #[error("Failed to register custom layer `{name}`: {source}")]
    Registration { name: String, source: ort::Error },
}

/// Adds one custom operator to an operator domain.
pub type LayerRegistration = fn(OperatorDomain) -> ort::Result<OperatorDomain>;

/// Maps custom layer type names found in model artifacts to the operators
/// that implement them.
#[derive(Clone)]
pub struct LayerRegistry {
    layers: BTreeMap<String, LayerRegistration>,
}

impl LayerRegistry {
    pub fn empty() -> Self {
        Self {
            layers: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, name: &str, registration: LayerRegistration) -> &mut Self {
        self.layers.insert(name.to_string(), registration);
        self
    }

    /// Checks every requested name before any ONNX Runtime state is touched.
    pub fn resolve(&self, names: &[String]) -> Result<Vec<LayerRegistration>, LayerError> {
        names
            .iter()
            .map(|name| {
                self.layers
                    .get(name)
                    .copied()
                    .ok_or_else(|| LayerError::Unknown(name.clone()))
            })
            .collect()
    }

    /// Builds a fresh operator domain holding the requested layers, or `None`
    /// when the model needs no custom layers. Each session needs its own domain.
    pub fn build_domain(
        &self,
        domain: &str,
        names: &[String],
    ) -> Result<Option<OperatorDomain>, LayerError> {
        let registrations = self.resolve(names)?;
        if registrations.is_empty() {
            return Ok(None);
        }

        let mut operator_domain =
            OperatorDomain::new(domain).map_err(|source| LayerError::Registration {
                name: domain.to_string(),
                source,
            })?;
        for (name, registration) in names.iter().zip(registrations) {
            operator_domain =
                registration(operator_domain).map_err(|source| LayerError::Registration {
                    name: name.clone(),
                    source,
                })?;
        }

        Ok(Some(operator_domain))
    }
}

impl Default for LayerRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(LayerScale::NAME, |domain| domain.add(LayerScale));
        registry
    }
}

/// Per-channel scaling: `y = x * gamma`, with `gamma` broadcast along the
/// last axis of `x`.
pub struct LayerScale;

impl LayerScale {
    pub const NAME: &'static str = "LayerScale";
}

impl Operator for LayerScale {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn inputs(&self) -> Vec<OperatorInput> {
        vec![
            OperatorInput::required(TensorElementType::Float32),
            OperatorInput::required(TensorElementType::Float32),
        ]
    }

    fn outputs(&self) -> Vec<OperatorOutput> {
        vec![OperatorOutput::required(TensorElementType::Float32)]
    }

    fn create_kernel(&self, _: &KernelAttributes) -> ort::Result<Box<dyn Kernel>> {
        Ok(Box::new(LayerScaleKernel))
    }
}

struct LayerScaleKernel;

impl Kernel for LayerScaleKernel {
    fn compute(&mut self, ctx: &KernelContext) -> ort::Result<()> {
        let x = ctx
            .input(0)?
            .ok_or_else(|| ort::Error::new("LayerScale: missing input `x`"))?;
        let gamma = ctx
            .input(1)?
            .ok_or_else(|| ort::Error::new("LayerScale: missing input `gamma`"))?;
        let (x_shape, x) = x.try_extract_tensor::<f32>()?;
        let (_, gamma) = gamma.try_extract_tensor::<f32>()?;

        let mut y = ctx
            .output(0, x_shape.to_vec())?
            .ok_or_else(|| ort::Error::new("LayerScale: missing output"))?;
        let (_, y) = y.try_extract_tensor_mut::<f32>()?;

        scale_last_axis(x, gamma, y).map_err(ort::Error::new)
    }
}

fn scale_last_axis(x: &[f32], gamma: &[f32], y: &mut [f32]) -> Result<(), String> {
    if gamma.is_empty() || x.len() % gamma.len() != 0 {
        return Err(format!(
            "LayerScale: gamma of length {} does not broadcast over input of length {}",
            gamma.len(),
            x.len()
        ));
    }
    if y.len() != x.len() {
        return Err(format!(
            "LayerScale: output length {} differs from input length {}",
            y.len(),
            x.len()
        ));
    }

    for (out_row, in_row) in y.chunks_mut(gamma.len()).zip(x.chunks(gamma.len())) {
        for ((out, input), scale) in out_row.iter_mut().zip(in_row).zip(gamma) {
            *out = input * scale;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_knows_layer_scale() {
        let registry = LayerRegistry::default();

        assert_eq!(registry.layers.keys().collect::<Vec<_>>(), vec!["LayerScale"]);
        assert_eq!(
            registry.resolve(&["LayerScale".to_string()]).unwrap().len(),
            1
        );
    }

    #[test]
    fn test_resolve_unknown_layer_fails() {
        let registry = LayerRegistry::default();
        let names = vec!["LayerScale".to_string(), "StochasticDepth".to_string()];

        match registry.resolve(&names) {
            Err(LayerError::Unknown(name)) => assert_eq!(name, "StochasticDepth"),
            other => panic!("expected unknown layer error, got {:?}", other.map(|r| r.len())),
        }
    }

    #[test]
    fn test_build_domain_without_layers_is_none() {
        let registry = LayerRegistry::empty();

        assert!(registry.build_domain("ai.test", &[]).unwrap().is_none());
    }

    #[test]
    fn test_scale_last_axis_broadcasts() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let gamma = [10.0, 0.5, -1.0];
        let mut y = [0.0; 6];

        scale_last_axis(&x, &gamma, &mut y).unwrap();

        assert_eq!(y, [10.0, 1.0, -3.0, 40.0, 2.5, -6.0]);
    }

    #[test]
    fn test_scale_last_axis_rejects_mismatched_gamma() {
        let x = [1.0; 5];
        let mut y = [0.0; 5];

        assert!(scale_last_axis(&x, &[1.0, 2.0], &mut y).is_err());
        assert!(scale_last_axis(&x, &[], &mut y).is_err());
    }
}
