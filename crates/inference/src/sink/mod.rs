//! Where detection results go: a document store and a message stream

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod document;
pub mod mqtt;

pub use document::FileDocumentStore;
pub use mqtt::MqttPublisher;

pub trait DocumentStore: Send + Sync {
    /// Set `fields` on the document `key` of `collection`, creating it if needed.
    ///
    /// Dotted field names (`result.obj_box`) address nested objects.
    fn upsert(&self, collection: &str, key: &str, fields: &Map<String, Value>) -> anyhow::Result<()>;

    fn get(&self, collection: &str, key: &str) -> anyhow::Result<Option<Value>>;
}

pub trait MessagePublisher: Send + Sync {
    fn publish(&self, payload: &Value) -> anyhow::Result<()>;
}

/// Apply `fields` to `document`, creating intermediate objects for dotted names.
pub fn apply_fields(document: &mut Map<String, Value>, fields: &Map<String, Value>) {
    for (name, value) in fields {
        let mut target = &mut *document;
        let mut parts = name.split('.').peekable();
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                target.insert(part.to_string(), value.clone());
                break;
            }
            let slot = target
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            let Value::Object(next) = slot else { break };
            target = next;
        }
    }
}

#[derive(Default)]
pub struct MemoryDocumentStore {
    documents: Mutex<HashMap<(String, String), Map<String, Value>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn documents(&self) -> MutexGuard<'_, HashMap<(String, String), Map<String, Value>>> {
        self.documents.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn upsert(&self, collection: &str, key: &str, fields: &Map<String, Value>) -> anyhow::Result<()> {
        let mut documents = self.documents();
        let document = documents
            .entry((collection.to_string(), key.to_string()))
            .or_default();
        apply_fields(document, fields);
        Ok(())
    }

    fn get(&self, collection: &str, key: &str) -> anyhow::Result<Option<Value>> {
        Ok(self
            .documents()
            .get(&(collection.to_string(), key.to_string()))
            .cloned()
            .map(Value::Object))
    }
}

#[derive(Default)]
pub struct MemoryPublisher {
    messages: Mutex<Vec<Value>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<Value> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl MessagePublisher for MemoryPublisher {
    fn publish(&self, payload: &Value) -> anyhow::Result<()> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(payload.clone());
        Ok(())
    }
}

impl<T: DocumentStore + ?Sized> DocumentStore for std::sync::Arc<T> {
    fn upsert(&self, collection: &str, key: &str, fields: &Map<String, Value>) -> anyhow::Result<()> {
        (**self).upsert(collection, key, fields)
    }

    fn get(&self, collection: &str, key: &str) -> anyhow::Result<Option<Value>> {
        (**self).get(collection, key)
    }
}

impl<T: MessagePublisher + ?Sized> MessagePublisher for std::sync::Arc<T> {
    fn publish(&self, payload: &Value) -> anyhow::Result<()> {
        (**self).publish(payload)
    }
}
