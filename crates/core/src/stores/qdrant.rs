use crate::traits::VectorStore;
use crate::{Chunk, CollectionSpec, CorpusPosition, IndexedVector, RetrievalResult, StoreError};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::time::Duration;
use url::Url;

const SCROLL_PAGE: usize = 256;

pub struct QdrantStore {
    endpoint: Url,
    client: Client,
}

impl QdrantStore {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, StoreError> {
        let endpoint = Url::parse(endpoint.trim_end_matches('/'))?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { endpoint, client })
    }

    fn url(&self, collection: &str, suffix: &str) -> String {
        format!(
            "{}/collections/{}{}",
            self.endpoint.as_str().trim_end_matches('/'),
            collection,
            suffix
        )
    }

    async fn scroll_page(
        &self,
        collection: &str,
        limit: usize,
        offset: Option<&Value>,
    ) -> Result<Option<Value>, StoreError> {
        let body = json!({
            "limit": limit,
            "offset": offset.cloned().unwrap_or(Value::Null),
            "with_payload": true,
            "with_vector": false,
        });

        let response = self
            .client
            .post(self.url(collection, "/points/scroll"))
            .json(&body)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let parsed: Value = ensure_success(response).await?.json().await?;
        Ok(Some(parsed))
    }
}

/// Qdrant point ids must be integers or UUIDs; derive a stable integer from the chunk id.
pub fn point_id(chunk_id: &str) -> u64 {
    let digest = Sha256::digest(chunk_id.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

fn payload_for(vector: &IndexedVector, embedding_model: &str) -> Value {
    let chunk = &vector.chunk;
    json!({
        "chunk_id": chunk.chunk_id,
        "text": chunk.text,
        "source_filename": chunk.source_filename,
        "source_page": chunk.source_page,
        "ordinal": chunk.ordinal,
        "corpus_position": chunk.corpus_position.as_str(),
        "embedding_model": embedding_model,
    })
}

fn chunk_from_payload(payload: &Value) -> Option<Chunk> {
    Some(Chunk {
        chunk_id: payload.get("chunk_id")?.as_str()?.to_string(),
        text: payload.get("text")?.as_str()?.to_string(),
        source_filename: payload.get("source_filename")?.as_str()?.to_string(),
        source_page: u32::try_from(payload.get("source_page")?.as_u64()?).ok()?,
        ordinal: payload.get("ordinal")?.as_u64()?,
        corpus_position: payload
            .get("corpus_position")
            .and_then(Value::as_str)
            .map(CorpusPosition::parse)
            .unwrap_or_default(),
    })
}

async fn ensure_success(response: Response) -> Result<Response, StoreError> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::BackendResponse {
        backend: "qdrant".to_string(),
        details: format!("{status}: {body}"),
    })
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn ensure_collection(
        &self,
        collection: &str,
        spec: &CollectionSpec,
    ) -> Result<(), StoreError> {
        if let Some(existing) = self.describe(collection).await? {
            if existing.dimensions != spec.dimensions {
                return Err(StoreError::Request(format!(
                    "collection {collection} has vector size {} but {} was requested",
                    existing.dimensions, spec.dimensions
                )));
            }
            return Ok(());
        }

        let response = self
            .client
            .put(self.url(collection, ""))
            .json(&json!({
                "vectors": {
                    "size": spec.dimensions,
                    "distance": "Cosine",
                }
            }))
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn describe(&self, collection: &str) -> Result<Option<CollectionSpec>, StoreError> {
        let response = self.client.get(self.url(collection, "")).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let parsed: Value = ensure_success(response).await?.json().await?;
        let dimensions = parsed
            .pointer("/result/config/params/vectors/size")
            .and_then(Value::as_u64)
            .ok_or_else(|| StoreError::BackendResponse {
                backend: "qdrant".to_string(),
                details: format!("collection {collection} has no single unnamed vector config"),
            })? as usize;

        let embedding_model = self
            .scroll_page(collection, 1, None)
            .await?
            .and_then(|page| {
                page.pointer("/result/points/0/payload/embedding_model")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            });

        Ok(Some(CollectionSpec {
            dimensions,
            embedding_model,
        }))
    }

    async fn upsert(
        &self,
        collection: &str,
        spec: &CollectionSpec,
        vectors: &[IndexedVector],
    ) -> Result<(), StoreError> {
        let embedding_model = spec.embedding_model.as_deref().unwrap_or_default();
        let points = vectors
            .iter()
            .map(|vector| {
                if vector.embedding.len() != spec.dimensions {
                    return Err(StoreError::Request(format!(
                        "embedding dimension {} != {}",
                        vector.embedding.len(),
                        spec.dimensions
                    )));
                }

                Ok(json!({
                    "id": point_id(&vector.chunk_id),
                    "vector": vector.embedding,
                    "payload": payload_for(vector, embedding_model),
                }))
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        if points.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .put(self.url(collection, "/points?wait=true"))
            .json(&json!({ "points": points }))
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn update_chunks(&self, collection: &str, chunks: &[Chunk]) -> Result<(), StoreError> {
        if chunks.is_empty() {
            return Ok(());
        }

        let operations: Vec<Value> = chunks
            .iter()
            .map(|chunk| {
                json!({
                    "set_payload": {
                        "payload": {
                            "ordinal": chunk.ordinal,
                            "corpus_position": chunk.corpus_position.as_str(),
                        },
                        "points": [point_id(&chunk.chunk_id)],
                    }
                })
            })
            .collect();

        let response = self
            .client
            .post(self.url(collection, "/points/batch?wait=true"))
            .json(&json!({ "operations": operations }))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        ensure_success(response).await?;
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievalResult>, StoreError> {
        let response = self
            .client
            .post(self.url(collection, "/points/search"))
            .json(&json!({
                "vector": embedding,
                "limit": k,
                "with_payload": true,
            }))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }

        let parsed: Value = ensure_success(response).await?.json().await?;
        let hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let Some(chunk) = hit.get("payload").and_then(chunk_from_payload) else {
                return Err(StoreError::BackendResponse {
                    backend: "qdrant".to_string(),
                    details: format!("search hit without chunk payload: {hit}"),
                });
            };
            let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0);
            results.push(RetrievalResult {
                chunk,
                relevance_score: score as f32,
            });
        }

        results.sort_by(|left, right| {
            right
                .relevance_score
                .total_cmp(&left.relevance_score)
                .then(left.chunk.ordinal.cmp(&right.chunk.ordinal))
        });
        Ok(results)
    }

    async fn count(&self, collection: &str) -> Result<usize, StoreError> {
        let response = self
            .client
            .post(self.url(collection, "/points/count"))
            .json(&json!({ "exact": true }))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(0);
        }

        let parsed: Value = ensure_success(response).await?.json().await?;
        Ok(parsed
            .pointer("/result/count")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize)
    }

    async fn load_chunks(&self, collection: &str) -> Result<Vec<Chunk>, StoreError> {
        let mut chunks = Vec::new();
        let mut offset: Option<Value> = None;

        loop {
            let Some(page) = self
                .scroll_page(collection, SCROLL_PAGE, offset.as_ref())
                .await?
            else {
                break;
            };

            let points = page
                .pointer("/result/points")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            chunks.extend(
                points
                    .iter()
                    .filter_map(|point| point.get("payload").and_then(chunk_from_payload)),
            );

            match page.pointer("/result/next_page_offset") {
                Some(next) if !next.is_null() => offset = Some(next.clone()),
                _ => break,
            }
        }

        chunks.sort_by_key(|chunk| chunk.ordinal);
        Ok(chunks)
    }

    async fn delete_points(
        &self,
        collection: &str,
        chunk_ids: &[String],
    ) -> Result<(), StoreError> {
        if chunk_ids.is_empty() {
            return Ok(());
        }

        let ids: Vec<u64> = chunk_ids.iter().map(|id| point_id(id)).collect();
        let response = self
            .client
            .post(self.url(collection, "/points/delete?wait=true"))
            .json(&json!({ "points": ids }))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        ensure_success(response).await?;
        Ok(())
    }

    async fn delete_collection(&self, collection: &str) -> Result<(), StoreError> {
        let response = self.client.delete(self.url(collection, "")).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        ensure_success(response).await?;
        Ok(())
    }
}
