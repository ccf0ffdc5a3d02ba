use super::{InferenceBackend, InferenceOutput};
use crate::config::OnnxConfig;
use anyhow::Context;
use ndarray::{Array, IxDyn};
use ort::{
    session::{Session, builder::GraphOptimizationLevel},
    value::TensorRef,
};
use std::path::Path;

pub struct OrtBackend {
    session: Session,
    input_name: String,
    logits_output: String,
    boxes_output: String,
}

impl OrtBackend {
    /// Load a DETR-style ONNX model from a local file, typically a prefetched
    /// artifact.
    pub fn load_model(path: &Path, config: &OnnxConfig) -> anyhow::Result<Self> {
        // Initialize ORT environment (idempotent)
        let _ = ort::init().commit();

        let mut builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(config.intra_threads)?;

        if config.use_cuda {
            tracing::info!("Initializing ONNX Runtime with CUDA execution provider");
            // Falls back to CPU when CUDA is unavailable
            builder = builder.with_execution_providers([
                ort::execution_providers::CUDAExecutionProvider::default()
                    .with_device_id(0)
                    .build(),
            ])?;
        } else {
            tracing::info!("Initializing ONNX Runtime with CPU execution provider");
        }

        let session = builder
            .commit_from_file(path)
            .with_context(|| format!("Failed to load model from {}", path.display()))?;

        tracing::info!(path = %path.display(), "Model loaded");
        Ok(Self {
            session,
            input_name: config.input_name.clone(),
            logits_output: config.logits_output.clone(),
            boxes_output: config.boxes_output.clone(),
        })
    }
}

impl InferenceBackend for OrtBackend {
    fn infer(&mut self, images: &Array<f32, IxDyn>) -> anyhow::Result<InferenceOutput> {
        let outputs = self.session.run(ort::inputs![
            self.input_name.as_str() => TensorRef::from_array_view(images.view())?
        ])?;

        let logits = outputs[self.logits_output.as_str()].try_extract_array::<f32>()?;
        let boxes = outputs[self.boxes_output.as_str()].try_extract_array::<f32>()?;

        Ok(InferenceOutput {
            logits: logits.into_owned(),
            boxes: boxes.into_owned(),
        })
    }
}
