use artifact::{SymbolCache, TypedSymbolLoader, open_store};
use common::TelemetryGuard;
use inference::{
    ImagesEventHandler, MessageSchema, WorkerConfig, WorkerService,
    logging::setup_logging,
    sink::{FileDocumentStore, MqttPublisher},
};
use std::sync::Arc;

#[cfg(feature = "ort-backend")]
use inference::backend::ort::OrtBackend as Backend;

#[cfg(not(feature = "ort-backend"))]
compile_error!("The detection worker needs the 'ort-backend' feature");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = WorkerConfig::from_env()?;

    let telemetry = config
        .otel_endpoint
        .as_ref()
        .map(|endpoint| TelemetryGuard::init("detection-worker", endpoint, config.environment))
        .transpose()?;

    if telemetry.is_none() {
        setup_logging(&config);
    }

    tracing::info!(
        config = ?config,
        "Loaded configuration"
    );

    let schemas = Arc::new(SymbolCache::from_config(
        &config.cache,
        TypedSymbolLoader::<MessageSchema>::new(),
    )?);

    // Fail fast on missing artifacts rather than on the first frame
    let model_path = schemas.prefetch(&config.model)?;
    schemas.get(&config.frame_schema, &config.frame_schema_symbol)?;

    tracing::info!(model = %config.model, path = %model_path.display(), "Loading inference model");
    let backend = Backend::load_model(&model_path, &config.onnx)?;
    tracing::info!("Model loaded successfully");

    let images = ImagesEventHandler::new(
        config.images_collection.clone(),
        open_store(&config.image_store_url, config.cache.fetch_timeout)?,
    );
    let documents = FileDocumentStore::open(config.document_store_dir.clone())?;
    let publisher = MqttPublisher::new(&config.mqtt)?;

    let mut service = WorkerService::new(
        &config,
        backend,
        schemas,
        images,
        Box::new(documents),
        Box::new(publisher),
    );

    let summary = service.run(std::io::stdin().lock())?;
    tracing::info!(summary = ?summary, "Worker stopped");
    Ok(())
}
