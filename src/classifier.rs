use crate::{
    labels::LabelTable,
    model_service::{InferenceError, ModelService},
    preprocess::{self, PreprocessError, INPUT_CHANNELS, INPUT_HEIGHT, INPUT_WIDTH},
};
use ndarray::Array4;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PredictError {
    #[error("Malformed request: {message}")]
    MalformedRequest { status: u16, message: String },
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error("Model returned no comparable score")]
    NoValidScore,
    #[error("Predicted class index {index} is outside the label table ({len} labels)")]
    LabelOutOfRange { index: usize, len: usize },
    #[error("Prediction worker failed: {0}")]
    Worker(String),
}

impl PredictError {
    /// Errors caused by the request itself rather than by the deployment.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            PredictError::MalformedRequest { .. } | PredictError::Preprocess(_)
        )
    }
}

#[derive(Error, Debug)]
pub enum StartupError {
    #[error("Label table is empty")]
    EmptyLabels,
    #[error("Model validation pass failed: {0}")]
    Inference(#[from] InferenceError),
    #[error("Model outputs {outputs} scores but the label table has {labels} entries")]
    OutputWidthMismatch { outputs: usize, labels: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub class: String,
}

/// Index of the largest score; ties go to the lowest index. NaN scores are
/// skipped, so an empty or all-NaN vector has no argmax.
pub fn argmax(scores: &[f32]) -> Option<usize> {
    scores
        .iter()
        .enumerate()
        .filter(|(_, score)| !score.is_nan())
        .fold(None, |best: Option<(usize, f32)>, (index, &score)| match best {
            Some((_, best_score)) if score <= best_score => best,
            _ => Some((index, score)),
        })
        .map(|(index, _)| index)
}

/// Model plus the labels its outputs index into.
pub struct Classifier<M: ModelService> {
    model_service: M,
    labels: LabelTable,
}

impl<M: ModelService> Classifier<M> {
    /// Runs one forward pass per model instance on a blank input and refuses
    /// to build the classifier unless every output width equals the label count.
    pub fn new(model_service: M, labels: LabelTable) -> Result<Self, StartupError> {
        if labels.is_empty() {
            return Err(StartupError::EmptyLabels);
        }

        let blank = Array4::zeros((
            1,
            INPUT_HEIGHT as usize,
            INPUT_WIDTH as usize,
            INPUT_CHANNELS,
        ));
        for _ in 0..model_service.instances().max(1) {
            let outputs = model_service.scores(&blank)?.len();
            if outputs != labels.len() {
                return Err(StartupError::OutputWidthMismatch {
                    outputs,
                    labels: labels.len(),
                });
            }
        }
        tracing::info!(
            "Warmed {} model instances, output width matches {} labels",
            model_service.instances(),
            labels.len()
        );

        Ok(Self {
            model_service,
            labels,
        })
    }

    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    pub fn classify_base64(&self, encoded: &str) -> Result<Prediction, PredictError> {
        let input = preprocess::preprocess(encoded)?;
        self.classify_tensor(&input)
    }

    pub fn classify_tensor(&self, input: &Array4<f32>) -> Result<Prediction, PredictError> {
        let scores = self.model_service.scores(input)?;
        let index = argmax(&scores).ok_or(PredictError::NoValidScore)?;
        let class = self
            .labels
            .get(index)
            .ok_or(PredictError::LabelOutOfRange {
                index,
                len: self.labels.len(),
            })?
            .to_string();

        tracing::debug!("Predicted class {} ({}) with score {}", class, index, scores[index]);

        Ok(Prediction { class })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::preprocess::encode_png;
    use image::{DynamicImage, ImageBuffer, Rgb};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns fixed scores, or scores derived from the mean pixel when none
    /// are given.
    pub struct MockModelService {
        pub scores: Option<Vec<f32>>,
        pub width: usize,
        pub instances: usize,
        pub calls: AtomicUsize,
    }

    impl MockModelService {
        pub fn fixed(scores: Vec<f32>) -> Self {
            Self {
                width: scores.len(),
                scores: Some(scores),
                instances: 1,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn brightness(width: usize) -> Self {
            Self {
                scores: None,
                width,
                instances: 1,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl ModelService for MockModelService {
        fn instances(&self) -> usize {
            self.instances
        }

        fn scores(&self, input: &Array4<f32>) -> Result<Vec<f32>, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(scores) = &self.scores {
                return Ok(scores.clone());
            }
            let mean = input.mean().unwrap_or(0.0);
            let winner = ((mean * self.width as f32) as usize).min(self.width - 1);
            Ok((0..self.width)
                .map(|i| if i == winner { 1.0 } else { 0.0 })
                .collect())
        }
    }

    pub struct FailingModelService;

    impl ModelService for FailingModelService {
        fn scores(&self, _input: &Array4<f32>) -> Result<Vec<f32>, InferenceError> {
            Err(InferenceError::Run("input shape mismatch".to_string()))
        }
    }

    pub fn labels(names: &[&str]) -> LabelTable {
        LabelTable::new(names.iter().map(|s| s.to_string()).collect())
    }

    fn solid_png(value: u8) -> String {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(50, 40, Rgb([value; 3]));
        encode_png(&DynamicImage::ImageRgb8(img))
    }

    #[test]
    fn test_argmax() {
        assert_eq!(argmax(&[0.1, 0.7, 0.2]), Some(1));
        assert_eq!(argmax(&[0.5, 0.9, 0.9, 0.1]), Some(1));
        assert_eq!(argmax(&[0.0, 0.0, 0.0]), Some(0));
        assert_eq!(argmax(&[-3.0, -1.0, -2.0]), Some(1));
        assert_eq!(argmax(&[f32::NAN, 0.2, 0.1]), Some(1));
        assert_eq!(argmax(&[0.3, f32::NAN, 0.1]), Some(0));
        assert_eq!(argmax(&[f32::NAN; 3]), None);
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn test_all_nan_scores_are_server_error() {
        let classifier = Classifier {
            model_service: MockModelService::fixed(vec![f32::NAN; 3]),
            labels: labels(&["cat", "dog", "fish"]),
        };

        let err = classifier.classify_base64(&solid_png(0)).unwrap_err();

        assert!(matches!(err, PredictError::NoValidScore));
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_new_warms_every_instance() {
        let mut model_service = MockModelService::fixed(vec![0.2, 0.8]);
        model_service.instances = 3;

        let classifier = Classifier::new(model_service, labels(&["cat", "dog"])).unwrap();

        assert_eq!(classifier.model_service.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_new_rejects_empty_label_table() {
        let result = Classifier::new(MockModelService::fixed(vec![]), labels(&[]));

        assert!(matches!(result, Err(StartupError::EmptyLabels)));
    }

    #[test]
    fn test_scores_map_to_label() {
        let classifier = Classifier::new(
            MockModelService::fixed(vec![0.1, 0.7, 0.2]),
            labels(&["cat", "dog", "fish"]),
        )
        .unwrap();

        let prediction = classifier.classify_base64(&solid_png(10)).unwrap();

        assert_eq!(
            prediction,
            Prediction {
                class: "dog".to_string()
            }
        );
    }

    #[test]
    fn test_classification_is_deterministic() {
        let table = labels(&["dark", "dim", "bright", "white"]);
        let classifier = Classifier::new(MockModelService::brightness(4), table.clone()).unwrap();
        let encoded = solid_png(200);

        let first = classifier.classify_base64(&encoded).unwrap();
        for _ in 0..5 {
            assert_eq!(classifier.classify_base64(&encoded).unwrap(), first);
        }
        assert!(table.as_slice().contains(&first.class));
    }

    #[test]
    fn test_all_zero_image_yields_a_label() {
        let table = labels(&["a", "b", "c"]);
        let classifier = Classifier::new(MockModelService::brightness(3), table.clone()).unwrap();

        let prediction = classifier.classify_base64(&solid_png(0)).unwrap();

        assert_eq!(prediction.class, "a");
    }

    #[test]
    fn test_new_rejects_output_width_mismatch() {
        let result = Classifier::new(
            MockModelService::fixed(vec![0.1, 0.9]),
            labels(&["cat", "dog", "fish"]),
        );

        assert!(matches!(
            result,
            Err(StartupError::OutputWidthMismatch {
                outputs: 2,
                labels: 3
            })
        ));
    }

    #[test]
    fn test_new_propagates_inference_failure() {
        let result = Classifier::new(FailingModelService, labels(&["cat"]));

        assert!(matches!(result, Err(StartupError::Inference(_))));
    }

    #[test]
    fn test_index_outside_label_table_is_server_error() {
        let classifier = Classifier {
            model_service: MockModelService::fixed(vec![0.0, 0.0, 1.0]),
            labels: labels(&["cat", "dog"]),
        };

        let err = classifier.classify_base64(&solid_png(0)).unwrap_err();

        assert!(matches!(
            err,
            PredictError::LabelOutOfRange { index: 2, len: 2 }
        ));
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_malformed_input_is_client_error() {
        let model_service = MockModelService::fixed(vec![1.0]);
        let classifier = Classifier::new(model_service, labels(&["only"])).unwrap();

        let err = classifier.classify_base64("not-base64!!").unwrap_err();
        assert!(err.is_client_error());

        // Validation pass only; rejected input never reaches the model.
        assert_eq!(classifier.model_service.calls.load(Ordering::SeqCst), 1);

        assert!(classifier.classify_base64(&solid_png(1)).is_ok());
    }
}
