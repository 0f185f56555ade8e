use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use sentiment_api::{
    NewSentimentRecord, PipelineError, RecordId, RecordQuery, RecordStore, SentimentRecord,
    SortOrder, StoreTransaction,
};

pub const DEFAULT_ENDPOINT: &str = "https://datastore.googleapis.com";

// ═══════════════════════════════════════════════════════════════
//  Config
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct DatastoreConfig {
    /// Base URL: production endpoint or `http://<emulator-host>`.
    pub endpoint: String,
    pub project_id: String,
    /// Entity kind the records are stored under.
    pub kind: String,
    /// Bearer token. None for the emulator.
    pub access_token: Option<String>,
    pub timeout: Duration,
}

// ═══════════════════════════════════════════════════════════════
//  Wire types
// ═══════════════════════════════════════════════════════════════

#[derive(Deserialize)]
struct BeginTransactionResponse {
    transaction: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitResponse {
    #[serde(default)]
    mutation_results: Vec<MutationResult>,
}

#[derive(Deserialize)]
struct MutationResult {
    key: Option<Key>,
}

#[derive(Deserialize)]
struct Key {
    #[serde(default)]
    path: Vec<PathElement>,
}

#[derive(Deserialize)]
struct PathElement {
    id: Option<String>,
    name: Option<String>,
}

impl Key {
    fn record_id(&self) -> Option<RecordId> {
        let last = self.path.last()?;
        last.id.as_ref().or(last.name.as_ref()).map(RecordId::new)
    }
}

#[derive(Deserialize)]
struct RunQueryResponse {
    batch: Option<QueryResultBatch>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResultBatch {
    #[serde(default)]
    entity_results: Vec<EntityResult>,
}

#[derive(Deserialize)]
struct EntityResult {
    entity: Entity,
}

#[derive(Deserialize)]
struct Entity {
    key: Key,
    #[serde(default)]
    properties: serde_json::Map<String, Value>,
}

/// Entity body for an insert mutation with an incomplete key.
fn entity_json(project_id: &str, kind: &str, record: &NewSentimentRecord) -> Value {
    let mut properties = json!({
        "created": {
            "timestampValue": record.created_at.to_rfc3339_opts(SecondsFormat::Micros, true)
        },
        "text": { "stringValue": record.text, "excludeFromIndexes": true },
        "score": { "doubleValue": record.score.value() },
    });
    if let Some(magnitude) = record.score.magnitude() {
        properties["weight"] = json!({ "doubleValue": magnitude });
    }
    json!({
        "key": {
            "partitionId": { "projectId": project_id },
            "path": [{ "kind": kind }],
        },
        "properties": properties,
    })
}

fn double_property(properties: &serde_json::Map<String, Value>, name: &str) -> Option<f64> {
    let value = properties.get(name)?;
    value
        .get("doubleValue")
        .and_then(Value::as_f64)
        // int64 values travel as strings
        .or_else(|| value.get("integerValue")?.as_str()?.parse::<f64>().ok())
}

fn entity_to_record(entity: Entity) -> Result<SentimentRecord, PipelineError> {
    let id = entity
        .key
        .record_id()
        .ok_or_else(|| PipelineError::store_read_failed("entity key has no id"))?;
    let props = &entity.properties;

    let created = props
        .get("created")
        .and_then(|v| v.get("timestampValue"))
        .and_then(Value::as_str)
        .ok_or_else(|| PipelineError::store_read_failed(format!("entity {id}: missing created")))?;
    let created_at = DateTime::parse_from_rfc3339(created)
        .map_err(|e| PipelineError::store_read_failed(format!("entity {id}: created: {e}")))?
        .with_timezone(&Utc);
    let text = props
        .get("text")
        .and_then(|v| v.get("stringValue"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let score = double_property(props, "score")
        .ok_or_else(|| PipelineError::store_read_failed(format!("entity {id}: missing score")))?;
    let magnitude =
        double_property(props, "weight").or_else(|| double_property(props, "magnitude"));

    Ok(SentimentRecord {
        id,
        created_at,
        text,
        score: score as f32,
        magnitude: magnitude.map(|m| m as f32),
    })
}

// ═══════════════════════════════════════════════════════════════
//  Client
// ═══════════════════════════════════════════════════════════════

#[derive(Clone)]
struct Client {
    http: reqwest::Client,
    base: String,
    access_token: Option<String>,
}

impl Client {
    fn url(&self, method: &str) -> String {
        format!("{}:{method}", self.base)
    }

    async fn call(&self, method: &str, body: &Value) -> Result<reqwest::Response, String> {
        let mut request = self.http.post(self.url(method)).json(body);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(|e| format!("{method}: {e}"))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(format!("{method} returned {status}: {}", detail.trim()));
        }
        Ok(response)
    }

    async fn rollback(&self, transaction: &str) -> Result<(), String> {
        self.call("rollback", &json!({ "transaction": transaction }))
            .await
            .map(|_| ())
    }
}

// ═══════════════════════════════════════════════════════════════
//  DatastoreStore
// ═══════════════════════════════════════════════════════════════

/// Managed document store over its REST API. Works the same against the
/// local emulator (plain http, no credentials).
pub struct DatastoreStore {
    client: Client,
    project_id: String,
    kind: String,
}

impl DatastoreStore {
    pub fn new(config: DatastoreConfig) -> Result<Self, PipelineError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PipelineError::store_write_failed(format!("build http client: {e}")))?;
        let base = format!(
            "{}/v1/projects/{}",
            config.endpoint.trim_end_matches('/'),
            config.project_id
        );
        Ok(Self {
            client: Client {
                http,
                base,
                access_token: config.access_token,
            },
            project_id: config.project_id,
            kind: config.kind,
        })
    }
}

impl RecordStore for DatastoreStore {
    fn name(&self) -> &'static str {
        "datastore"
    }

    fn begin(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn StoreTransaction>, PipelineError>> + Send + '_>>
    {
        Box::pin(async move {
            let response = self
                .client
                .call("beginTransaction", &json!({ "transactionOptions": { "readWrite": {} } }))
                .await
                .map_err(PipelineError::store_write_failed)?;
            let begun: BeginTransactionResponse = response
                .json()
                .await
                .map_err(|e| {
                    PipelineError::store_write_failed(format!("beginTransaction body: {e}"))
                })?;
            tracing::debug!(transaction = %begun.transaction, "datastore transaction opened");
            Ok(Box::new(DatastoreTransaction {
                client: self.client.clone(),
                project_id: self.project_id.clone(),
                kind: self.kind.clone(),
                transaction: begun.transaction,
                staged: Vec::new(),
                finished: false,
            }) as Box<dyn StoreTransaction>)
        })
    }

    fn list(
        &self,
        query: &RecordQuery,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SentimentRecord>, PipelineError>> + Send + '_>> {
        let direction = match query.order {
            SortOrder::Asc => "ASCENDING",
            SortOrder::Desc => "DESCENDING",
        };
        let mut gql = json!({
            "kind": [{ "name": self.kind }],
            "order": [{ "property": { "name": "created" }, "direction": direction }],
        });
        if let Some(limit) = query.limit {
            gql["limit"] = json!(i32::try_from(limit).unwrap_or(i32::MAX));
        }
        let body = json!({
            "partitionId": { "projectId": self.project_id },
            "query": gql,
        });
        Box::pin(async move {
            let response = self
                .client
                .call("runQuery", &body)
                .await
                .map_err(PipelineError::store_read_failed)?;
            let parsed: RunQueryResponse = response
                .json()
                .await
                .map_err(|e| PipelineError::store_read_failed(format!("runQuery body: {e}")))?;
            parsed
                .batch
                .map(|b| b.entity_results)
                .unwrap_or_default()
                .into_iter()
                .map(|r| entity_to_record(r.entity))
                .collect()
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  DatastoreTransaction
// ═══════════════════════════════════════════════════════════════

/// Open server-side transaction plus locally staged inserts.
///
/// Unless a commit succeeded or an explicit rollback ran, dropping it sends
/// a rollback from a background task. That covers failed commits and
/// invocations cancelled mid-flight.
struct DatastoreTransaction {
    client: Client,
    project_id: String,
    kind: String,
    transaction: String,
    staged: Vec<NewSentimentRecord>,
    finished: bool,
}

impl DatastoreTransaction {
    async fn do_commit(&mut self) -> Result<Vec<SentimentRecord>, PipelineError> {
        let staged = std::mem::take(&mut self.staged);
        let mutations: Vec<Value> = staged
            .iter()
            .map(|r| json!({ "insert": entity_json(&self.project_id, &self.kind, r) }))
            .collect();
        let body = json!({
            "mode": "TRANSACTIONAL",
            "transaction": self.transaction,
            "mutations": mutations,
        });

        let response = self
            .client
            .call("commit", &body)
            .await
            .map_err(PipelineError::store_write_failed)?;
        // Committed server-side from here on, whatever happens to the body.
        self.finished = true;

        let parsed: CommitResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::store_write_failed(format!("commit body: {e}")))?;
        if parsed.mutation_results.len() != staged.len() {
            return Err(PipelineError::store_write_failed(format!(
                "commit returned {} results for {} inserts",
                parsed.mutation_results.len(),
                staged.len()
            )));
        }

        staged
            .into_iter()
            .zip(parsed.mutation_results)
            .map(|(record, result)| {
                let id = result
                    .key
                    .as_ref()
                    .and_then(Key::record_id)
                    .ok_or_else(|| {
                        PipelineError::store_write_failed("commit result has no key id")
                    })?;
                Ok(SentimentRecord::from_new(id, record))
            })
            .collect()
    }
}

impl StoreTransaction for DatastoreTransaction {
    fn insert(&mut self, record: NewSentimentRecord) -> Result<(), PipelineError> {
        self.staged.push(record);
        Ok(())
    }

    fn commit(
        mut self: Box<Self>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SentimentRecord>, PipelineError>> + Send>> {
        Box::pin(async move { self.do_commit().await })
    }

    fn rollback(
        mut self: Box<Self>,
    ) -> Pin<Box<dyn Future<Output = Result<(), PipelineError>> + Send>> {
        Box::pin(async move {
            self.finished = true;
            self.client
                .rollback(&self.transaction)
                .await
                .map_err(PipelineError::store_write_failed)
        })
    }
}

impl Drop for DatastoreTransaction {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(
                transaction = %self.transaction,
                "no runtime, leaving transaction to expire"
            );
            return;
        };
        let client = self.client.clone();
        let transaction = std::mem::take(&mut self.transaction);
        handle.spawn(async move {
            match client.rollback(&transaction).await {
                Ok(()) => tracing::info!(%transaction, "datastore transaction rolled back"),
                Err(e) => tracing::warn!(%transaction, error = %e, "datastore rollback failed"),
            }
        });
    }
}
