use artifact::{
    ArtifactCache, ArtifactRef, FsVersionedStore, LocalCacheDirectory, RemoteStore, SymbolCache,
    TypedSymbolLoader,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::{ImageFormat, Rgb, RgbImage};
use inference::{
    CropRegion, ImagesEventHandler, InferenceBackend, InferenceOutput, RunSummary, WorkerConfig,
    WorkerService,
    sink::{DocumentStore, FileDocumentStore, MemoryPublisher},
};
use ndarray::{Array, IxDyn};
use serde_json::{Value, json};
use std::io::Cursor;
use std::sync::Arc;
use tempfile::{TempDir, tempdir};

const SCHEMA_KEY: &str = "schemas/img_process_models.json";

/// Detects one object in the top-left quarter of every crop
struct QuarterBackend;

impl InferenceBackend for QuarterBackend {
    fn infer(&mut self, _images: &Array<f32, IxDyn>) -> anyhow::Result<InferenceOutput> {
        Ok(InferenceOutput {
            logits: Array::from_shape_vec(IxDyn(&[1, 2, 3]), vec![7.0, 0.0, 0.0, 0.0, 0.0, 9.0])?,
            boxes: Array::from_shape_vec(
                IxDyn(&[1, 2, 4]),
                vec![0.25, 0.25, 0.5, 0.5, 0.5, 0.5, 1.0, 1.0],
            )?,
        })
    }
}

struct Deployment {
    dir: TempDir,
    artifacts: FsVersionedStore,
    images: Arc<FsVersionedStore>,
    publisher: Arc<MemoryPublisher>,
}

impl Deployment {
    fn new() -> Self {
        let dir = tempdir().unwrap();
        let artifacts = FsVersionedStore::open(dir.path().join("artifacts")).unwrap();
        let images = Arc::new(FsVersionedStore::open(dir.path().join("images")).unwrap());
        Self {
            dir,
            artifacts,
            images,
            publisher: Arc::new(MemoryPublisher::new()),
        }
    }

    fn publish_schema(&self, fields: Value) -> String {
        let document = json!({ "Imgdata": fields });
        self.artifacts
            .publish(SCHEMA_KEY, &serde_json::to_vec(&document).unwrap())
            .unwrap()
    }

    fn documents(&self) -> FileDocumentStore {
        FileDocumentStore::open(self.dir.path().join("documents")).unwrap()
    }

    fn worker(
        &self,
        frame_schema: ArtifactRef,
    ) -> WorkerService<QuarterBackend, FsVersionedStore, Arc<FsVersionedStore>> {
        let mut config = WorkerConfig::from_env().unwrap();
        config.crop = CropRegion {
            x: 8,
            y: 4,
            width: 16,
            height: 8,
        };
        config.device_filter = Some("cam2".to_string());
        config.frame_schema = frame_schema;

        let local = LocalCacheDirectory::open(self.dir.path().join("cache")).unwrap();
        let store = FsVersionedStore::open(self.artifacts.root()).unwrap();
        let schemas = Arc::new(SymbolCache::new(
            ArtifactCache::new(store, local),
            TypedSymbolLoader::new(),
        ));

        WorkerService::new(
            &config,
            QuarterBackend,
            schemas,
            ImagesEventHandler::new("images", self.images.clone()),
            Box::new(self.documents()),
            Box::new(self.publisher.clone()),
        )
    }
}

fn base_fields() -> Value {
    json!({
        "device_id": "str",
        "name": "str",
        "timestamp": "float",
        "width": "int",
        "height": "int",
        "img": "str"
    })
}

fn frame_event(device_id: &str, name: &str) -> String {
    let image = RgbImage::from_pixel(32, 16, Rgb([40, 200, 40]));
    let mut png = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .unwrap();

    json!({
        "collection": "frames",
        "operation_type": "insert",
        "document_key": {"_id": name},
        "full_document": {
            "device_id": device_id,
            "name": name,
            "timestamp": 1700000000.0,
            "width": "32",
            "height": "16",
            "img": STANDARD.encode(png),
        }
    })
    .to_string()
}

/// Frames flow from change events to a stored result and a published message
#[test]
fn test_frames_become_results_and_messages() {
    let deployment = Deployment::new();
    deployment.publish_schema(base_fields());
    let mut worker = deployment.worker(ArtifactRef::latest(SCHEMA_KEY));

    let input = [
        frame_event("cam2", "frame-a"),
        frame_event("cam1", "frame-b"),
        frame_event("cam2", "frame-c"),
    ]
    .join("\n");

    let summary = worker.run(input.as_bytes()).unwrap();
    assert_eq!(
        summary,
        RunSummary {
            handled: 3,
            ignored: 0,
            failed: 0
        }
    );

    let documents = deployment.documents();
    let stored = documents.get("img_process", "frame-a").unwrap().unwrap();
    // Query 0 only: (0..0.5, 0..0.5) of a 16x8 crop at (8, 4)
    let obj_box = &stored["result"]["obj_box"];
    assert_eq!(obj_box["dec_0_x1"], 8);
    assert_eq!(obj_box["dec_0_y1"], 4);
    assert_eq!(obj_box["dec_0_x2"], 16);
    assert_eq!(obj_box["dec_0_y2"], 8);
    assert!(obj_box.get("dec_1_x1").is_none(), "\"No object\" query must be dropped");

    assert!(documents.get("img_process", "frame-b").unwrap().is_none());

    let messages = deployment.publisher.messages();
    let names: Vec<_> = messages.iter().map(|m| m["name"].clone()).collect();
    assert_eq!(names, vec![json!("frame-a"), json!("frame-c")]);
    assert_eq!(messages[0]["event_datetime_str"], "2023-11-14T22:13:20Z");
    assert_eq!(messages[0]["dec_0_cx"], 12);
}

/// A pinned schema keeps serving after the latest version changes shape
#[test]
fn test_pinned_schema_survives_new_versions() {
    let deployment = Deployment::new();
    let v1 = deployment.publish_schema(base_fields());

    let mut stricter = base_fields();
    stricter["exposure_ms"] = json!("float");
    deployment.publish_schema(stricter);

    let mut pinned = deployment.worker(ArtifactRef::pinned(SCHEMA_KEY, v1));
    let summary = pinned.run(frame_event("cam2", "frame-a").as_bytes()).unwrap();
    assert_eq!(summary.failed, 0);

    let mut latest = deployment.worker(ArtifactRef::latest(SCHEMA_KEY));
    let summary = latest.run(frame_event("cam2", "frame-b").as_bytes()).unwrap();
    assert_eq!(summary.failed, 1, "Latest schema requires exposure_ms");
}

/// Deleting an image document deletes the stored image, once
#[test]
fn test_image_deletes_reach_the_image_store() {
    let deployment = Deployment::new();
    deployment.publish_schema(base_fields());
    deployment
        .images
        .publish("2023/11/14/frame-a.jpg", b"jpeg")
        .unwrap();
    let mut worker = deployment.worker(ArtifactRef::latest(SCHEMA_KEY));

    let delete = json!({
        "collection": "images",
        "operation_type": "delete",
        "before_doc": {"img_path": "2023/11/14/frame-a.jpg"},
    })
    .to_string();
    let input = [delete.clone(), delete].join("\n");

    let summary = worker.run(input.as_bytes()).unwrap();

    assert_eq!(summary.handled, 2);
    assert_eq!(summary.failed, 0);
    assert!(deployment.images.head("2023/11/14/frame-a.jpg").is_err());
}

/// A missing schema fails frames without stopping the stream
#[test]
fn test_missing_schema_fails_frames_only() {
    let deployment = Deployment::new();
    let mut worker = deployment.worker(ArtifactRef::latest(SCHEMA_KEY));

    let input = [
        frame_event("cam2", "frame-a"),
        json!({"collection": "images", "operation_type": "insert"}).to_string(),
    ]
    .join("\n");

    let summary = worker.run(input.as_bytes()).unwrap();

    assert_eq!(
        summary,
        RunSummary {
            handled: 1,
            ignored: 0,
            failed: 1
        }
    );
    assert!(deployment.publisher.messages().is_empty());
}
