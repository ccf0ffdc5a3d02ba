use crate::config::CropRegion;
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub label: usize,
    pub confidence: f32,
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl Detection {
    pub fn center(&self) -> (i32, i32) {
        (
            ((self.x1 + self.x2) as f32 / 2.0) as i32,
            ((self.y1 + self.y2) as f32 / 2.0) as i32,
        )
    }
}

pub struct PostProcessor {
    pub confidence_threshold: f32,
    pub crop: CropRegion,
}

impl PostProcessor {
    pub fn new(confidence_threshold: f32, crop: CropRegion) -> Self {
        Self {
            confidence_threshold,
            crop,
        }
    }

    /// Parse detections from DETR output into full-frame pixel boxes.
    #[tracing::instrument(skip(self, logits, boxes))]
    pub fn parse_detections(
        &self,
        logits: &ndarray::ArrayViewD<f32>, // [1, Q, C + 1] - class logits, last is "no object"
        boxes: &ndarray::ArrayViewD<f32>,  // [1, Q, 4] - boxes in cxcywh format (normalized 0-1)
    ) -> anyhow::Result<Vec<Detection>> {
        if logits.ndim() != 3 || boxes.ndim() != 3 {
            anyhow::bail!(
                "Unexpected output rank: logits {:?}, boxes {:?}",
                logits.shape(),
                boxes.shape()
            );
        }

        let num_queries = logits.shape()[1];
        let num_classes = logits.shape()[2];
        if boxes.shape()[1] != num_queries || boxes.shape()[2] != 4 {
            anyhow::bail!(
                "Boxes {:?} do not match logits {:?}",
                boxes.shape(),
                logits.shape()
            );
        }
        if num_classes < 2 {
            anyhow::bail!("Logits need at least one class besides \"no object\"");
        }

        let mut detections = Vec::new();
        let mut probs = vec![0.0f32; num_classes];

        for i in 0..num_queries {
            for (c, p) in probs.iter_mut().enumerate() {
                *p = logits[[0, i, c]];
            }
            softmax(&mut probs);

            // Argmax over real classes only; the last one is "no object"
            let (label, confidence) = probs[..num_classes - 1]
                .iter()
                .copied()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |best, (c, p)| {
                    if p > best.1 { (c, p) } else { best }
                });

            if confidence < self.confidence_threshold {
                continue;
            }

            let (x1_norm, y1_norm, x2_norm, y2_norm) = cxcywh_to_xyxy(
                boxes[[0, i, 0]],
                boxes[[0, i, 1]],
                boxes[[0, i, 2]],
                boxes[[0, i, 3]],
            );

            // Scale to the crop, then shift back into frame coordinates
            let crop_w = self.crop.width as f32;
            let crop_h = self.crop.height as f32;
            let offset_x = self.crop.x as f32;
            let offset_y = self.crop.y as f32;

            detections.push(Detection {
                label,
                confidence,
                x1: (x1_norm * crop_w + offset_x) as i32,
                y1: (y1_norm * crop_h + offset_y) as i32,
                x2: (x2_norm * crop_w + offset_x) as i32,
                y2: (y2_norm * crop_h + offset_y) as i32,
            });
        }

        Ok(detections)
    }
}

/// Flatten detections into the `dec_{i}_*` keys stored and published per frame.
pub fn obj_box(detections: &[Detection]) -> Map<String, Value> {
    let mut map = Map::new();
    for (i, det) in detections.iter().enumerate() {
        let (cx, cy) = det.center();
        map.insert(format!("dec_{i}_label"), det.label.into());
        map.insert(format!("dec_{i}_x1"), det.x1.into());
        map.insert(format!("dec_{i}_y1"), det.y1.into());
        map.insert(format!("dec_{i}_x2"), det.x2.into());
        map.insert(format!("dec_{i}_y2"), det.y2.into());
        map.insert(format!("dec_{i}_cx"), cx.into());
        map.insert(format!("dec_{i}_cy"), cy.into());
    }
    map
}

/// In-place softmax, shifted by the max for numerical stability
#[inline]
fn softmax(values: &mut [f32]) {
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0;
    for v in values.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    for v in values.iter_mut() {
        *v /= sum;
    }
}

/// Convert bounding box from center-width-height format to corner format
#[inline]
fn cxcywh_to_xyxy(cx: f32, cy: f32, w: f32, h: f32) -> (f32, f32, f32, f32) {
    let x1 = cx - w / 2.0;
    let y1 = cy - h / 2.0;
    let x2 = cx + w / 2.0;
    let y2 = cy + h / 2.0;
    (x1, y1, x2, y2)
}
