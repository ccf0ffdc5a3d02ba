use artifact::{ArtifactError, RemoteStore};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Insert,
    Update,
    Delete,
    Replace,
    #[serde(other)]
    Other,
}

/// One change-stream event from the document database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub collection: String,
    pub operation_type: OperationType,
    #[serde(default)]
    pub document_key: Option<Value>,
    #[serde(default)]
    pub full_document: Option<Value>,
    #[serde(default)]
    pub before_doc: Option<Value>,
}

impl ChangeEvent {
    pub fn parse(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }
}

/// What handling an images event amounted to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ImageAction {
    Ignored,
    Deleted { img_path: String },
    AlreadyAbsent { img_path: String },
}

/// Keeps the image object store in step with the images collection.
///
/// Deleting an image document deletes the stored image it points to; the
/// other operations need no action.
pub struct ImagesEventHandler<S> {
    collection: String,
    store: S,
}

impl<S: RemoteStore> ImagesEventHandler<S> {
    pub fn new(collection: impl Into<String>, store: S) -> Self {
        Self {
            collection: collection.into(),
            store,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn process(&self, event: &ChangeEvent) -> Result<ImageAction, ArtifactError> {
        if event.collection != self.collection {
            return Ok(ImageAction::Ignored);
        }

        tracing::info!(
            collection = %event.collection,
            operation = ?event.operation_type,
            document_key = ?event.document_key,
            "Received event"
        );

        match event.operation_type {
            OperationType::Delete => self.process_delete(event),
            _ => Ok(ImageAction::Ignored),
        }
    }

    fn process_delete(&self, event: &ChangeEvent) -> Result<ImageAction, ArtifactError> {
        let Some(img_path) = event
            .before_doc
            .as_ref()
            .and_then(|doc| doc.get("img_path"))
            .and_then(Value::as_str)
            .filter(|path| !path.is_empty())
        else {
            return Ok(ImageAction::Ignored);
        };

        match self.store.delete(img_path) {
            Ok(()) => {
                tracing::info!(img_path, "Deleted stored image");
                Ok(ImageAction::Deleted {
                    img_path: img_path.to_string(),
                })
            }
            Err(ArtifactError::ArtifactNotFound { .. }) => {
                tracing::info!(img_path, "Stored image already gone");
                Ok(ImageAction::AlreadyAbsent {
                    img_path: img_path.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use artifact::MemoryStore;
    use std::sync::Arc;

    fn handler() -> (Arc<MemoryStore>, ImagesEventHandler<Arc<MemoryStore>>) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), ImagesEventHandler::new("images", store))
    }

    #[test]
    fn test_parse_event() {
        let event = ChangeEvent::parse(
            r#"{"collection": "images", "operation_type": "drop", "document_key": {"_id": "1"}}"#,
        )
        .unwrap();

        assert_eq!(event.operation_type, OperationType::Other);
        assert!(event.full_document.is_none());
    }

    #[test]
    fn test_delete_removes_stored_image() {
        let (store, handler) = handler();
        store.put("2024/05/01/frame-1.jpg", b"jpeg".to_vec());

        let event = ChangeEvent::parse(
            r#"{"collection": "images", "operation_type": "delete",
                "before_doc": {"img_path": "2024/05/01/frame-1.jpg"}}"#,
        )
        .unwrap();

        assert_eq!(
            handler.process(&event).unwrap(),
            ImageAction::Deleted {
                img_path: "2024/05/01/frame-1.jpg".to_string()
            }
        );
        assert!(store.head("2024/05/01/frame-1.jpg").is_err());

        assert_eq!(
            handler.process(&event).unwrap(),
            ImageAction::AlreadyAbsent {
                img_path: "2024/05/01/frame-1.jpg".to_string()
            }
        );
    }

    #[test]
    fn test_other_operations_and_collections_are_ignored() {
        let (store, handler) = handler();
        store.put("a.jpg", b"jpeg".to_vec());

        for raw in [
            r#"{"collection": "frames", "operation_type": "delete", "before_doc": {"img_path": "a.jpg"}}"#,
            r#"{"collection": "images", "operation_type": "insert", "full_document": {"img_path": "a.jpg"}}"#,
            r#"{"collection": "images", "operation_type": "delete"}"#,
            r#"{"collection": "images", "operation_type": "delete", "before_doc": {"img_path": ""}}"#,
        ] {
            let event = ChangeEvent::parse(raw).unwrap();
            assert_eq!(handler.process(&event).unwrap(), ImageAction::Ignored, "{raw}");
        }

        assert!(store.head("a.jpg").is_ok());
    }
}
