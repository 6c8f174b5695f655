use crate::{
    config::ModelConfig,
    detection::RawDetection,
    labels::ClassLabels,
    model_service::{ModelError, ModelService},
    processing::{letterbox, post::num_classes, PostProcessor},
};
use image::{DynamicImage, Rgb, RgbImage};
use ndarray::{Array, ArrayD, ArrayViewD, Ix4, IxDyn};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::{
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

/// Commits the global ONNX Runtime environment, registering TensorRT first
/// when the feature is enabled.
fn init_environment() -> anyhow::Result<()> {
    let builder = ort::init().with_name("yolo_detection");

    #[cfg(feature = "tensorrt")]
    let builder = {
        use ort::execution_providers::TensorRTExecutionProvider;
        builder.with_execution_providers([TensorRTExecutionProvider::default()
            .with_engine_cache(true)
            .build()])
    };

    builder.commit()?;
    Ok(())
}

#[derive(Clone)]
pub struct OrtModelService {
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
    input_size: u32,
    post_processor: PostProcessor,
    labels: Arc<ClassLabels>,
}

impl OrtModelService {
    pub fn new(
        model_config: &ModelConfig,
        model_path: &Path,
        labels: ClassLabels,
    ) -> anyhow::Result<Self> {
        init_environment()?;

        let num_instances = model_config.num_instances.max(1);
        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(model_path)?;
                Ok(Arc::new(Mutex::new(session)))
            })
            .collect::<Result<Vec<_>, ort::Error>>()?;

        tracing::info!(
            "Created {} ONNX sessions from {:?}",
            num_instances,
            model_path
        );

        let service = Self {
            sessions: Arc::new(sessions),
            counter: Arc::new(AtomicUsize::new(0)),
            input_size: model_config.input_size,
            post_processor: PostProcessor {
                layout: model_config.output_layout,
                conf_threshold: model_config.conf_threshold,
                iou_threshold: model_config.iou_threshold,
                max_detections: model_config.max_detections,
            },
            labels: Arc::new(labels),
        };
        service.warmup()?;

        Ok(service)
    }

    /// Runs one forward pass on a blank frame and checks the output against
    /// the class table.
    fn warmup(&self) -> anyhow::Result<()> {
        let blank = RgbImage::from_pixel(self.input_size, self.input_size, Rgb([114, 114, 114]));
        let (input, _) = letterbox(&DynamicImage::ImageRgb8(blank), self.input_size);
        let output = self.run_inference(&input)?;

        let classes = num_classes(self.post_processor.layout, output.shape())?;
        if classes != self.labels.len() {
            anyhow::bail!(
                "model predicts {} classes but {} labels are configured",
                classes,
                self.labels.len()
            );
        }
        tracing::info!(
            "Model output {:?} matches {} class labels",
            output.shape(),
            classes
        );

        Ok(())
    }

    pub fn run_inference(&self, input: &Array<f32, Ix4>) -> Result<ArrayD<f32>, ModelError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let session_arc = &self.sessions[index];
        let mut session = session_arc
            .lock()
            .map_err(|e| ModelError::Poisoned(e.to_string()))?;

        tracing::debug!("Handling request with session {}", index);
        let owned_buffer;
        let input_view = if input.view().is_standard_layout() {
            input.view()
        } else {
            owned_buffer = input.as_standard_layout().into_owned();
            owned_buffer.view()
        };

        let tensor_ref =
            TensorRef::from_array_view(input_view).map_err(|e| ModelError::Tensor(e.to_string()))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| ModelError::Inference(e.to_string()))?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::Inference(format!("failed to extract tensor: {}", e)))?;

        let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
        let array = ArrayViewD::from_shape(IxDyn(&dims), data)
            .map_err(|e| ModelError::OutputShape(e.to_string()))?
            .to_owned();

        Ok(array)
    }
}

impl ModelService for OrtModelService {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<RawDetection>, ModelError> {
        let (input, geometry) = letterbox(image, self.input_size);
        let output = self.run_inference(&input)?;
        self.post_processor.process(&output.view(), &geometry)
    }

    fn class_labels(&self) -> &ClassLabels {
        &self.labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_environment() {
        assert!(init_environment().is_ok());
    }

    #[test]
    fn test_missing_model_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let model_config: ModelConfig = config::Config::builder()
            .add_source(config::File::from_str(
                "onnx_file: absent.onnx\nmodel_dir: .\nnum_instances: 1",
                config::FileFormat::Yaml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        let result = OrtModelService::new(
            &model_config,
            &dir.path().join("absent.onnx"),
            ClassLabels::new(vec!["person".into()]),
        );
        assert!(result.is_err());
    }
}
