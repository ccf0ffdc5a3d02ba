use crate::{
    backend::{InferenceBackend, InferenceOutput},
    config::WorkerConfig,
    events::{ChangeEvent, ImageAction, ImagesEventHandler, OperationType},
    frame::FrameMessage,
    logging::log_call,
    postprocessing::{PostProcessor, obj_box},
    preprocessing::PreProcessor,
    schema::MessageSchema,
    sink::{DocumentStore, MessagePublisher},
};
use anyhow::Context;
use artifact::{ArtifactRef, RemoteStore, SymbolCache, TypedSymbolLoader};
use chrono::{DateTime, Utc};
use common::span;
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram},
};
use serde::Serialize;
use serde_json::{Map, Value};
use std::io::BufRead;
use std::sync::Arc;
use std::time::Instant;

pub type SchemaCache<S> = SymbolCache<S, TypedSymbolLoader<MessageSchema>>;

const UPDATED_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const EVENT_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FrameOutcome {
    Skipped { device_id: Option<String> },
    NoDetections { name: String },
    Detected { name: String, detections: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventOutcome {
    Frame(FrameOutcome),
    Image(ImageAction),
    Ignored,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub handled: u64,
    pub ignored: u64,
    pub failed: u64,
}

struct Metrics {
    events: Counter<u64>,
    failures: Counter<u64>,
    artifact_failures: Counter<u64>,
    detections: Counter<u64>,
    inference_duration: Histogram<f64>,
}

fn init_metrics(meter_name: &'static str) -> Metrics {
    let meter = global::meter(meter_name);
    let latency_buckets = [
        0.005, 0.01, 0.02, 0.03, 0.05, 0.075, 0.1, 0.15, 0.2, 0.3, 0.5, 1.0, 2.0,
    ];
    Metrics {
        events: meter
            .u64_counter("worker_events_total")
            .with_description("Change events handled, by collection")
            .build(),
        failures: meter
            .u64_counter("worker_event_failures_total")
            .with_description("Change events that failed and were skipped")
            .build(),
        artifact_failures: meter
            .u64_counter("worker_artifact_failures_total")
            .with_description("Failed artifact or symbol loads")
            .build(),
        detections: meter
            .u64_counter("inference_detections_total")
            .with_description("Total detections produced")
            .build(),
        inference_duration: meter
            .f64_histogram("inference_duration_seconds")
            .with_description("Time to process a single frame (decode + preprocess + infer + postprocess)")
            .with_unit("s")
            .with_boundaries(latency_buckets.to_vec())
            .build(),
    }
}

pub struct WorkerService<B, S, I> {
    backend: B,
    preprocessor: PreProcessor,
    postprocessor: PostProcessor,
    schemas: Arc<SchemaCache<S>>,
    frame_schema: ArtifactRef,
    frame_schema_symbol: String,
    device_filter: Option<String>,
    frames_collection: String,
    results_collection: String,
    images: ImagesEventHandler<I>,
    documents: Box<dyn DocumentStore>,
    publisher: Box<dyn MessagePublisher>,
    result_max_len: usize,
    metrics: Metrics,
}

impl<B, S, I> WorkerService<B, S, I>
where
    B: InferenceBackend,
    S: RemoteStore,
    I: RemoteStore,
{
    pub fn new(
        config: &WorkerConfig,
        backend: B,
        schemas: Arc<SchemaCache<S>>,
        images: ImagesEventHandler<I>,
        documents: Box<dyn DocumentStore>,
        publisher: Box<dyn MessagePublisher>,
    ) -> Self {
        Self {
            backend,
            preprocessor: PreProcessor::new(config.crop),
            postprocessor: PostProcessor::new(config.confidence_threshold, config.crop),
            schemas,
            frame_schema: config.frame_schema.clone(),
            frame_schema_symbol: config.frame_schema_symbol.clone(),
            device_filter: config.device_filter.clone(),
            frames_collection: config.frames_collection.clone(),
            results_collection: config.results_collection.clone(),
            images,
            documents,
            publisher,
            result_max_len: config.log_result_max_len,
            metrics: init_metrics("detection-worker"),
        }
    }

    /// Handle newline-delimited change events until `input` is exhausted.
    ///
    /// A failing event is logged and skipped; only a failing reader stops the loop.
    pub fn run<R: BufRead>(&mut self, input: R) -> anyhow::Result<RunSummary> {
        tracing::info!(
            frames = %self.frames_collection,
            images = %self.images.collection(),
            "Worker consuming change events"
        );

        let mut summary = RunSummary::default();

        for (line_number, line) in input.lines().enumerate() {
            let line = line.context("Failed to read change event stream")?;
            if line.trim().is_empty() {
                continue;
            }

            let event = match ChangeEvent::parse(&line) {
                Ok(event) => event,
                Err(e) => {
                    summary.failed += 1;
                    self.metrics.failures.add(1, &[]);
                    tracing::warn!(line = line_number + 1, error = %e, "Skipping malformed event");
                    continue;
                }
            };

            match self.handle_event(&event) {
                Ok(EventOutcome::Ignored) => summary.ignored += 1,
                Ok(_) => summary.handled += 1,
                Err(e) => {
                    summary.failed += 1;
                    self.metrics
                        .failures
                        .add(1, &[KeyValue::new("collection", event.collection.clone())]);
                    tracing::error!(
                        collection = %event.collection,
                        error = %format!("{e:#}"),
                        "Event failed, skipping"
                    );
                }
            }
        }

        tracing::info!(
            handled = summary.handled,
            ignored = summary.ignored,
            failed = summary.failed,
            "Change event stream ended"
        );
        Ok(summary)
    }

    pub fn handle_event(&mut self, event: &ChangeEvent) -> anyhow::Result<EventOutcome> {
        let max_len = self.result_max_len;

        if event.collection == self.frames_collection {
            if event.operation_type != OperationType::Insert {
                return Ok(EventOutcome::Ignored);
            }
            let document = event
                .full_document
                .as_ref()
                .context("Frame insert event carries no full_document")?;

            self.metrics
                .events
                .add(1, &[KeyValue::new("collection", "frames")]);
            return log_call("process_frame", max_len, || self.process_frame(document))
                .map(EventOutcome::Frame);
        }

        if event.collection == self.images.collection() {
            self.metrics
                .events
                .add(1, &[KeyValue::new("collection", "images")]);
            return log_call("process_images_event", max_len, || self.images.process(event))
                .map(EventOutcome::Image)
                .map_err(anyhow::Error::from);
        }

        Ok(EventOutcome::Ignored)
    }

    pub fn process_frame(&mut self, payload: &Value) -> anyhow::Result<FrameOutcome> {
        let device_id = payload.get("device_id").and_then(Value::as_str);
        if let Some(wanted) = &self.device_filter
            && device_id != Some(wanted.as_str())
        {
            return Ok(FrameOutcome::Skipped {
                device_id: device_id.map(str::to_string),
            });
        }

        let schema = self
            .schemas
            .get(&self.frame_schema, &self.frame_schema_symbol)
            .inspect_err(|_| self.metrics.artifact_failures.add(1, &[]))
            .with_context(|| format!("Frame schema {} unavailable", self.frame_schema))?;

        let frame = FrameMessage::from_payload(&schema, payload)?;

        let _span = tracing::info_span!("process_frame", name = %frame.name).entered();

        let start = Instant::now();
        let image = frame.decode_image()?;
        let input = self.preprocessor.preprocess_frame(&image)?;

        let InferenceOutput { logits, boxes } = {
            let _s = span!("model_inference");
            self.backend.infer(&input)?
        };

        let detections = self
            .postprocessor
            .parse_detections(&logits.view(), &boxes.view())?;

        self.metrics
            .inference_duration
            .record(start.elapsed().as_secs_f64(), &[]);
        self.metrics.detections.add(detections.len() as u64, &[]);

        if detections.is_empty() {
            return Ok(FrameOutcome::NoDetections { name: frame.name });
        }

        let obj_box = obj_box(&detections);
        self.store_result(&frame, &obj_box)?;
        self.publish_result(&frame, obj_box)?;

        Ok(FrameOutcome::Detected {
            name: frame.name,
            detections: detections.len(),
        })
    }

    fn store_result(&self, frame: &FrameMessage, obj_box: &Map<String, Value>) -> anyhow::Result<()> {
        let mut fields = Map::new();
        fields.insert("name".to_string(), Value::from(frame.name.as_str()));
        fields.insert("result.obj_box".to_string(), Value::Object(obj_box.clone()));
        fields.insert(
            "updated_datetime".to_string(),
            Value::from(Utc::now().format(UPDATED_FORMAT).to_string()),
        );

        self.documents
            .upsert(&self.results_collection, &frame.name, &fields)
            .with_context(|| format!("Failed to store result of {}", frame.name))
    }

    fn publish_result(&self, frame: &FrameMessage, obj_box: Map<String, Value>) -> anyhow::Result<()> {
        let mut payload = Map::new();
        payload.insert("name".to_string(), Value::from(frame.name.as_str()));
        payload.insert(
            "event_datetime_str".to_string(),
            Value::from(event_datetime(frame.timestamp)?),
        );
        payload.extend(obj_box);

        self.publisher
            .publish(&Value::Object(payload))
            .with_context(|| format!("Failed to publish result of {}", frame.name))
    }
}

/// UTC rendering of an epoch-seconds timestamp, to the second.
fn event_datetime(timestamp: f64) -> anyhow::Result<String> {
    let seconds = timestamp.floor();
    let nanos = ((timestamp - seconds) * 1e9) as u32;
    let datetime = DateTime::<Utc>::from_timestamp(seconds as i64, nanos)
        .with_context(|| format!("Timestamp {timestamp} is out of range"))?;
    Ok(datetime.format(EVENT_FORMAT).to_string())
}
