use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;

use super::remote::{
    Collection, Document, Filter, OrderBy, RemoteError, RemoteStore, Snapshot, WriteOp,
    MAX_BATCH_OPS,
};

/// REST client for the hosted document store.
pub struct HttpRemoteStore {
    client: Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    documents: Vec<QueryDocument>,
}

#[derive(Debug, Deserialize)]
struct QueryDocument {
    id: String,
    data: Document,
}

impl HttpRemoteStore {
    pub fn new(
        base_url: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn collection_url(&self, collection: Collection) -> String {
        format!("{}/v1/{}", self.base_url, collection.as_str())
    }

    fn document_url(&self, collection: Collection, id: &str) -> String {
        format!("{}/{}", self.collection_url(collection), id)
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, RemoteError> {
        let response = self.authorized(req).send().await?;
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        Err(RemoteError::Status { status, message })
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn create(
        &self,
        collection: Collection,
        doc: Document,
        id: Option<&str>,
    ) -> Result<String, RemoteError> {
        match id {
            Some(id) => {
                self.send(self.client.put(self.document_url(collection, id)).json(&doc))
                    .await?;
                Ok(id.to_string())
            }
            None => {
                let response = self
                    .send(self.client.post(self.collection_url(collection)).json(&doc))
                    .await?;
                let created: CreatedResponse = response.json().await?;
                Ok(created.id)
            }
        }
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        fields: Document,
    ) -> Result<(), RemoteError> {
        self.send(self.client.patch(self.document_url(collection, id)).json(&fields))
            .await?;
        Ok(())
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), RemoteError> {
        self.send(self.client.delete(self.document_url(collection, id)))
            .await?;
        Ok(())
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Document>, RemoteError> {
        let response = self
            .authorized(self.client.get(self.document_url(collection, id)))
            .send()
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.json().await?)),
            status => {
                let message = response.text().await.unwrap_or_default();
                Err(RemoteError::Status {
                    status: status.as_u16(),
                    message,
                })
            }
        }
    }

    async fn query(
        &self,
        collection: Collection,
        filters: &[Filter],
        order_by: &[OrderBy],
    ) -> Result<Vec<Snapshot>, RemoteError> {
        let url = format!("{}:query", self.collection_url(collection));
        let body = json!({ "filters": filters, "orderBy": order_by });
        let response = self.send(self.client.post(url).json(&body)).await?;
        let result: QueryResponse = response.json().await?;
        Ok(result
            .documents
            .into_iter()
            .map(|d| Snapshot {
                id: d.id,
                data: d.data,
            })
            .collect())
    }

    async fn batch_write(&self, ops: Vec<WriteOp>) -> Result<(), RemoteError> {
        if ops.len() > MAX_BATCH_OPS {
            return Err(RemoteError::BatchTooLarge(ops.len()));
        }
        let url = format!("{}/v1:batchWrite", self.base_url);
        self.send(self.client.post(url).json(&json!({ "ops": ops })))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store(server: &MockServer) -> HttpRemoteStore {
        HttpRemoteStore::new(&server.uri(), Some("secret".into()), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_get_missing_document_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/todos/abc"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let found = store(&server).get(Collection::Todos, "abc").await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_error_body_reaches_quota_detection() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/goals/g1"))
            .respond_with(
                ResponseTemplate::new(400).set_body_string("RESOURCE_EXHAUSTED: Quota exceeded."),
            )
            .mount(&server)
            .await;

        let err = store(&server)
            .create(Collection::Goals, Document::new(), Some("g1"))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Status { status: 400, .. }));
        assert!(err.is_quota_exceeded());
    }

    #[tokio::test]
    async fn test_query_decodes_documents() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/todos:query"))
            .and(body_partial_json(json!({
                "filters": [{ "field": "userId", "op": "eq", "value": "u1" }],
                "orderBy": [{ "field": "scheduledDate", "descending": false }],
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "documents": [
                    { "id": "t1", "data": { "title": "Stretch", "isCompleted": false } },
                    { "id": "t2", "data": { "title": "Read" } },
                ]
            })))
            .mount(&server)
            .await;

        let found = store(&server)
            .query(
                Collection::Todos,
                &[Filter::eq("userId", "u1")],
                &[OrderBy::asc("scheduledDate")],
            )
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].id, "t1");
        assert_eq!(found[0].data["title"], Value::from("Stretch"));
        assert_eq!(found[1].id, "t2");
    }

    #[tokio::test]
    async fn test_oversized_batch_is_rejected_before_sending() {
        let server = MockServer::start().await;
        let ops = (0..=MAX_BATCH_OPS)
            .map(|i| WriteOp::Delete {
                collection: Collection::Todos,
                id: i.to_string(),
            })
            .collect();

        let err = store(&server).batch_write(ops).await.unwrap_err();
        assert!(matches!(err, RemoteError::BatchTooLarge(n) if n == MAX_BATCH_OPS + 1));
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}

