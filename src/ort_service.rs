use crate::{
    config::{ModelConfig, Validatable},
    layers::{LayerError, LayerRegistry},
    model_service::{InferenceError, ModelService},
};
use ndarray::Array4;
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelLoadError {
    #[error("ONNX Runtime error: {0}")]
    Ort(#[from] ort::Error),
    #[error(transparent)]
    Layer(#[from] LayerError),
}

#[derive(Clone)]
pub struct OrtModelService {
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
}

impl OrtModelService {
    pub fn new(
        model_config: &ModelConfig,
        registry: &LayerRegistry,
    ) -> Result<Self, ModelLoadError> {
        // Fail on unknown layers before any session is built.
        registry.resolve(&model_config.custom_layers)?;

        let num_instances = model_config.num_instances.max(1);
        let sessions = (0..num_instances)
            .map(|_| -> Result<Arc<Mutex<Session>>, ModelLoadError> {
                let mut builder = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?;
                if let Some(domain) = registry
                    .build_domain(&model_config.custom_op_domain, &model_config.custom_layers)?
                {
                    builder = builder.with_operators(domain)?;
                }
                let session = builder.commit_from_file(model_config.get_path())?;
                Ok(Arc::new(Mutex::new(session)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        tracing::info!(
            "Created {} ONNX sessions from {:?} with custom layers {:?}",
            num_instances,
            model_config.get_path(),
            model_config.custom_layers
        );

        Ok(Self {
            counter: Arc::new(AtomicUsize::new(0)),
            sessions: Arc::new(sessions),
        })
    }
}

impl ModelService for OrtModelService {
    fn instances(&self) -> usize {
        self.sessions.len()
    }

    fn scores(&self, input: &Array4<f32>) -> Result<Vec<f32>, InferenceError> {
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % self.sessions.len();
        let mut session = self.sessions[index]
            .lock()
            .map_err(|e| InferenceError::SessionPoisoned(e.to_string()))?;

        tracing::debug!("Handling request with session {}", index);
        let owned_buffer;
        let input_view = if input.view().is_standard_layout() {
            input.view()
        } else {
            owned_buffer = input.as_standard_layout().into_owned();
            owned_buffer.view()
        };

        let tensor_ref = TensorRef::from_array_view(input_view)
            .map_err(|e| InferenceError::Input(e.to_string()))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| InferenceError::Run(e.to_string()))?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| InferenceError::Output(e.to_string()))?;

        // Scores of the first (and only) batch element.
        let width = shape.last().copied().unwrap_or(0).max(0) as usize;
        Ok(data.iter().take(width).copied().collect())
    }
}
