use crate::{detection::RawDetection, labels::ClassLabels};
use image::DynamicImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("session mutex poisoned: {0}")]
    Poisoned(String),
    #[error("failed to build input tensor: {0}")]
    Tensor(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("unexpected model output shape: {0}")]
    OutputShape(String),
}

/// A loaded, ready-to-run detector shared across requests.
///
/// `detect` is a blocking forward pass; callers on an async runtime should
/// move it onto a blocking thread.
pub trait ModelService: Send + Sync + 'static {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<RawDetection>, ModelError>;

    fn class_labels(&self) -> &ClassLabels;
}
