use crate::schema::MessageSchema;
use anyhow::Context;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Camera frame as published on the frames collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameMessage {
    pub device_id: String,
    pub name: String,
    /// Seconds since the Unix epoch
    pub timestamp: f64,
    pub width: u32,
    pub height: u32,
    /// Base64-encoded JPEG
    pub img: String,
}

impl FrameMessage {
    /// Coerce `payload` through `schema`, then read the frame fields out of it.
    pub fn from_payload(schema: &MessageSchema, payload: &Value) -> anyhow::Result<Self> {
        let coerced = schema.coerce(payload)?;
        serde_json::from_value(Value::Object(coerced)).context("Payload is not a frame message")
    }

    pub fn decode_image(&self) -> anyhow::Result<RgbImage> {
        let bytes = STANDARD
            .decode(self.img.trim())
            .context("Frame image is not valid base64")?;

        let image = image::load_from_memory(&bytes)
            .with_context(|| format!("Failed to decode image of frame {}", self.name))?
            .to_rgb8();

        if image.width() != self.width || image.height() != self.height {
            tracing::debug!(
                name = %self.name,
                declared = %format!("{}x{}", self.width, self.height),
                decoded = %format!("{}x{}", image.width(), image.height()),
                "Frame size differs from its header"
            );
        }

        Ok(image)
    }
}
