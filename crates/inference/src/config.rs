use crate::logging::DEFAULT_RESULT_MAX_LEN;
use artifact::{ArtifactRef, CacheConfig};
use common::{env_opt, env_or, env_parse};
use std::path::PathBuf;

pub use common::Environment;

/// Region of the camera frame the model looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for CropRegion {
    fn default() -> Self {
        Self {
            x: 320,
            y: 120,
            width: 640,
            height: 480,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OnnxConfig {
    pub input_name: String,
    pub logits_output: String,
    pub boxes_output: String,
    pub intra_threads: usize,
    pub use_cuda: bool,
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub topic: String,
    pub client_id: String,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub environment: Environment,
    pub cache: CacheConfig,
    pub model: ArtifactRef,
    pub frame_schema: ArtifactRef,
    pub frame_schema_symbol: String,
    pub confidence_threshold: f32,
    pub crop: CropRegion,
    /// Frames from other devices are ignored; `None` accepts every device
    pub device_filter: Option<String>,
    pub frames_collection: String,
    pub images_collection: String,
    pub results_collection: String,
    pub document_store_dir: PathBuf,
    pub image_store_url: String,
    pub onnx: OnnxConfig,
    pub mqtt: MqttConfig,
    pub log_result_max_len: usize,
    pub otel_endpoint: Option<String>,
}

impl WorkerConfig {
    /// Load configuration from environment variables with sensible defaults
    pub fn from_env() -> anyhow::Result<Self> {
        let environment = Environment::from_env();

        let model = ArtifactRef::new(
            env_or("MODEL_ARTIFACT_KEY", "models/ball_detr.onnx"),
            env_opt("MODEL_ARTIFACT_VERSION"),
        );

        let frame_schema = ArtifactRef::new(
            env_or("FRAME_SCHEMA_KEY", "schemas/img_process_models.json"),
            env_opt("FRAME_SCHEMA_VERSION"),
        );
        let frame_schema_symbol = env_or("FRAME_SCHEMA_SYMBOL", "Imgdata");

        let confidence_threshold = env_parse("CONFIDENCE_THRESHOLD", 0.7f32);
        if !(0.0..=1.0).contains(&confidence_threshold) {
            anyhow::bail!("CONFIDENCE_THRESHOLD must be within [0, 1], got {confidence_threshold}");
        }

        let defaults = CropRegion::default();
        let crop = CropRegion {
            x: env_parse("CROP_X", defaults.x),
            y: env_parse("CROP_Y", defaults.y),
            width: env_parse("CROP_WIDTH", defaults.width),
            height: env_parse("CROP_HEIGHT", defaults.height),
        };
        if crop.width == 0 || crop.height == 0 {
            anyhow::bail!("Crop region must not be empty: {crop:?}");
        }

        let device_filter = match std::env::var("DEVICE_FILTER") {
            Ok(value) => Some(value.trim().to_string()).filter(|v| !v.is_empty()),
            Err(_) => Some("cam2".to_string()),
        };

        let onnx = OnnxConfig {
            input_name: env_or("ONNX_INPUT_NAME", "images"),
            logits_output: env_or("ONNX_LOGITS_OUTPUT", "pred_logits"),
            boxes_output: env_or("ONNX_BOXES_OUTPUT", "pred_boxes"),
            intra_threads: env_parse("ONNX_INTRA_THREADS", 8),
            use_cuda: env_parse("ONNX_USE_CUDA", true),
        };

        let mqtt = MqttConfig {
            broker_host: env_or("MQTT_BROKER_HOST", "mosquitto"),
            broker_port: env_parse("MQTT_BROKER_PORT", 1883),
            topic: env_or("MQTT_TOPIC", "ImageResult"),
            client_id: env_or("MQTT_CLIENT_ID", "detection-worker"),
        };

        Ok(Self {
            environment,
            cache: CacheConfig::from_env(),
            model,
            frame_schema,
            frame_schema_symbol,
            confidence_threshold,
            crop,
            device_filter,
            frames_collection: env_or("FRAMES_COLLECTION", "frames"),
            images_collection: env_or("IMAGES_COLLECTION", "images"),
            results_collection: env_or("RESULTS_COLLECTION", "img_process"),
            document_store_dir: PathBuf::from(env_or("DOCUMENT_STORE_DIR", "./tmp/documents")),
            image_store_url: env_or("IMAGE_STORE_URL", "./tmp/images"),
            onnx,
            mqtt,
            log_result_max_len: env_parse("LOG_RESULT_MAX_LEN", DEFAULT_RESULT_MAX_LEN),
            otel_endpoint: env_opt("OTEL_ENDPOINT"),
        })
    }
}
