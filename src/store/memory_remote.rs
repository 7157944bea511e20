//! In-memory remote store for tests, with failure injection.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::remote::{
    Collection, Document, Filter, FilterOp, OrderBy, RemoteError, RemoteStore, Snapshot, WriteOp,
    MAX_BATCH_OPS,
};

#[derive(Default)]
pub struct MemoryRemoteStore {
    docs: RwLock<HashMap<Collection, BTreeMap<String, Document>>>,
    failure: RwLock<Option<RemoteError>>,
    calls: AtomicUsize,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every subsequent call fails with `error` until cleared with `None`.
    pub async fn set_failure(&self, error: Option<RemoteError>) {
        *self.failure.write().await = error;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(AtomicOrdering::SeqCst)
    }

    pub async fn count(&self, collection: Collection) -> usize {
        self.docs
            .read()
            .await
            .get(&collection)
            .map(|c| c.len())
            .unwrap_or(0)
    }

    pub async fn document(&self, collection: Collection, id: &str) -> Option<Document> {
        self.docs
            .read()
            .await
            .get(&collection)
            .and_then(|c| c.get(id).cloned())
    }

    pub async fn seed(&self, collection: Collection, id: &str, doc: Document) {
        self.docs
            .write()
            .await
            .entry(collection)
            .or_default()
            .insert(id.to_string(), doc);
    }

    async fn check(&self) -> Result<(), RemoteError> {
        self.calls.fetch_add(1, AtomicOrdering::SeqCst);
        match self.failure.read().await.as_ref() {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

fn not_found(collection: Collection, id: &str) -> RemoteError {
    RemoteError::Status {
        status: 404,
        message: format!("No document {}/{}", collection.as_str(), id),
    }
}

fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(b),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

fn matches(doc: &Document, filter: &Filter) -> bool {
    let field = doc.get(&filter.field);
    match filter.op {
        FilterOp::Eq => field == Some(&filter.value),
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn create(
        &self,
        collection: Collection,
        doc: Document,
        id: Option<&str>,
    ) -> Result<String, RemoteError> {
        self.check().await?;
        let id = id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        self.seed(collection, &id, doc).await;
        Ok(id)
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        fields: Document,
    ) -> Result<(), RemoteError> {
        self.check().await?;
        let mut docs = self.docs.write().await;
        let doc = docs
            .get_mut(&collection)
            .and_then(|c| c.get_mut(id))
            .ok_or_else(|| not_found(collection, id))?;
        for (key, value) in fields {
            if value.is_null() {
                doc.remove(&key);
            } else {
                doc.insert(key, value);
            }
        }
        Ok(())
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), RemoteError> {
        self.check().await?;
        let mut docs = self.docs.write().await;
        docs.get_mut(&collection)
            .and_then(|c| c.remove(id))
            .map(|_| ())
            .ok_or_else(|| not_found(collection, id))
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Document>, RemoteError> {
        self.check().await?;
        Ok(self.document(collection, id).await)
    }

    async fn query(
        &self,
        collection: Collection,
        filters: &[Filter],
        order_by: &[OrderBy],
    ) -> Result<Vec<Snapshot>, RemoteError> {
        self.check().await?;
        let docs = self.docs.read().await;
        let mut found: Vec<Snapshot> = docs
            .get(&collection)
            .map(|c| {
                c.iter()
                    .filter(|(_, doc)| filters.iter().all(|f| matches(doc, f)))
                    .map(|(id, doc)| Snapshot {
                        id: id.clone(),
                        data: doc.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        found.sort_by(|a, b| {
            order_by
                .iter()
                .map(|o| {
                    let ord = compare(a.data.get(&o.field), b.data.get(&o.field));
                    if o.descending {
                        ord.reverse()
                    } else {
                        ord
                    }
                })
                .find(|ord| *ord != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
        Ok(found)
    }

    async fn batch_write(&self, ops: Vec<WriteOp>) -> Result<(), RemoteError> {
        self.check().await?;
        if ops.len() > MAX_BATCH_OPS {
            return Err(RemoteError::BatchTooLarge(ops.len()));
        }
        let mut docs = self.docs.write().await;
        for op in ops {
            match op {
                WriteOp::Set {
                    collection,
                    id,
                    doc,
                } => {
                    docs.entry(collection).or_default().insert(id, doc);
                }
                WriteOp::Delete { collection, id } => {
                    if let Some(c) = docs.get_mut(&collection) {
                        c.remove(&id);
                    }
                }
            }
        }
        Ok(())
    }
}
