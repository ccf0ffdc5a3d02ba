use ndarray::{Array, IxDyn};

#[cfg(feature = "ort-backend")]
pub mod ort;

pub trait InferenceBackend {
    /// Run the detector on a `[1, 3, H, W]` normalized image tensor
    fn infer(&mut self, images: &Array<f32, IxDyn>) -> anyhow::Result<InferenceOutput>;
}

impl<B: InferenceBackend + ?Sized> InferenceBackend for Box<B> {
    fn infer(&mut self, images: &Array<f32, IxDyn>) -> anyhow::Result<InferenceOutput> {
        (**self).infer(images)
    }
}

pub struct InferenceOutput {
    pub logits: ndarray::ArrayD<f32>, // [1, queries, classes + 1] class logits, last is "no object"
    pub boxes: ndarray::ArrayD<f32>,  // [1, queries, 4] cxcywh (normalized 0-1)
}
