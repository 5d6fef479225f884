// crates/cmo-runtime/src/activity.rs
// ============================================================================
// Module: Activity Boundary
// Description: The concrete RECORD/REPLAY/LIVE ActivityClient implementation.
// Purpose: Let node functions call out to time, randomness, HTTP, transport,
//          MCP, a datastore, and blob storage through one seam whose
//          recorded history is what makes a run replayable.
// Dependencies: base64, cmo-core, rand, reqwest, serde_json, thiserror,
//               tracing
// ============================================================================

//! ## Overview
//! [`RuntimeActivityClient`] is constructed once per run and lives for the
//! run's whole lifetime; the executor calls [`RuntimeActivityClient::begin_step`]
//! before invoking each node so its per-step call counter resets while its
//! virtual clock and PRNG carry forward undisturbed. `now()` and `rand()`
//! never touch the checkpoint store: both are pure functions of the run's
//! seed and call order, so REPLAY reproduces them by recomputation rather
//! than lookup. Every other activity type is looked up by
//! `(traceId, stepIndex, activityType, requestHash)` in REPLAY mode and
//! persisted at that same key in RECORD mode.
//!
//! A call's `requestHash` folds in a per-step call-sequence number alongside
//! its logical request payload. Without this, two calls with identical
//! logical content at the same step — `rand(Some(6))` invoked twice, say —
//! would collide on the same idempotency key and the second call would
//! silently replay the first's answer instead of drawing a fresh one.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Instant;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use cmo_core::core::envelope::Envelope;
use cmo_core::core::hashing::DEFAULT_HASH_ALGORITHM;
use cmo_core::core::hashing::hash_canonical_json;
use cmo_core::core::identifiers::StepIndex;
use cmo_core::core::identifiers::Topic;
use cmo_core::core::identifiers::TraceId;
use cmo_core::core::run::ActivityPayload;
use cmo_core::core::run::ActivityRecord;
use cmo_core::core::run::ActivityType;
use cmo_core::core::run::ErrorDetail;
use cmo_core::core::time::Timestamp;
use cmo_core::core::time::VirtualClock;
use cmo_core::error::ActivityError;
use cmo_core::interfaces::ArtifactRef;
use cmo_core::interfaces::BlobStore;
use cmo_core::interfaces::CheckpointStore;
use cmo_core::interfaces::DatabaseClient;
use cmo_core::interfaces::DatabaseQuery;
use cmo_core::interfaces::DatabaseQueryResult;
use cmo_core::interfaces::HttpRequest;
use cmo_core::interfaces::HttpResponse;
use cmo_core::interfaces::McpClient;
use cmo_core::interfaces::McpRequest;
use cmo_core::interfaces::McpResponse;
use cmo_core::interfaces::PublishOptions;
use cmo_core::interfaces::Transport;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use serde_json::json;

use crate::rng::SplitMix64;
use crate::rng::bounded_next;

// ============================================================================
// SECTION: Mode
// ============================================================================

/// The replay posture a run's activity boundary operates under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityMode {
    /// Execute calls for real and persist request/response pairs.
    Record,
    /// Serve every recordable call from persisted records; missing records
    /// are fatal.
    Replay,
    /// Execute calls for real without persisting anything. Test-only
    /// opt-out of recording.
    Live,
}

// ============================================================================
// SECTION: Context
// ============================================================================

/// The set of concrete backends a [`RuntimeActivityClient`] dispatches real
/// calls to. Any backend left `None` causes the corresponding activity call
/// to fail with [`ActivityError::CallFailed`] rather than panicking.
pub struct ActivityContext {
    /// Checkpoint store used to persist and look up activity records.
    pub store: Arc<dyn CheckpointStore>,
    /// Blocking HTTP client used for `activity.httpRequest()`.
    pub http_client: Arc<reqwest::blocking::Client>,
    /// Transport used for `activity.sendA2A()`.
    pub transport: Option<Arc<dyn Transport>>,
    /// Topic `sendA2A` publishes to; the envelope carries its own
    /// recipients in `meta.to`, so one fixed topic is enough to route it
    /// through the log transport's consumer groups.
    pub a2a_topic: Topic,
    /// Client used for `activity.callMCP()`.
    pub mcp_client: Option<Arc<dyn McpClient>>,
    /// Client used for `activity.databaseQuery()`.
    pub database_client: Option<Arc<dyn DatabaseClient>>,
    /// Blob store used for `activity.readArtifact()`/`writeArtifact()`, and
    /// for spilling any oversized activity response.
    pub blob_store: Option<Arc<dyn BlobStore>>,
    /// Canonical-JSON size, in bytes, at or above which a response payload
    /// is spilled to `blob_store` rather than stored inline.
    pub replay_payload_size_threshold_bytes: usize,
}

// ============================================================================
// SECTION: Runtime Activity Client
// ============================================================================

/// The engine's [`ActivityClient`](cmo_core::interfaces::ActivityClient)
/// implementation, shared across every step of one run.
pub struct RuntimeActivityClient {
    mode: ActivityMode,
    trace_id: TraceId,
    step_index: StepIndex,
    call_index: u64,
    clock: VirtualClock,
    rng: SplitMix64,
    cancelled: Arc<AtomicBool>,
    context: Arc<ActivityContext>,
}

impl RuntimeActivityClient {
    /// Builds a client for one run, seeded at `clock_start` with
    /// `rng_seed`. Both are held fixed for the run's lifetime.
    #[must_use]
    pub fn new(
        mode: ActivityMode,
        trace_id: TraceId,
        clock_start: Timestamp,
        clock_increment_millis: i64,
        rng_seed: [u8; 8],
        cancelled: Arc<AtomicBool>,
        context: Arc<ActivityContext>,
    ) -> Self {
        Self {
            mode,
            trace_id,
            step_index: StepIndex::ZERO,
            call_index: 0,
            clock: VirtualClock::with_increment(clock_start, clock_increment_millis),
            rng: <SplitMix64 as rand::SeedableRng>::from_seed(rng_seed),
            cancelled,
            context,
        }
    }

    /// Builds a client for one node-invocation attempt from an explicit
    /// clock/PRNG cursor, rather than deriving both from a run-start seed.
    /// The executor uses this to give every retry attempt a fresh client
    /// while keeping the run's deterministic time/randomness stream
    /// continuous across attempts and steps.
    #[must_use]
    pub fn from_parts(
        mode: ActivityMode,
        trace_id: TraceId,
        step_index: StepIndex,
        clock: VirtualClock,
        rng: SplitMix64,
        cancelled: Arc<AtomicBool>,
        context: Arc<ActivityContext>,
    ) -> Self {
        Self {
            mode,
            trace_id,
            step_index,
            call_index: 0,
            clock,
            rng,
            cancelled,
            context,
        }
    }

    /// Advances the client to `step_index`, resetting the per-step call
    /// counter. Called by the executor before each node invocation.
    pub fn begin_step(&mut self, step_index: StepIndex) {
        self.step_index = step_index;
        self.call_index = 0;
    }

    /// The clock position this client has reached, for snapshotting before
    /// constructing the next attempt's client.
    #[must_use]
    pub fn clock_cursor(&self) -> Timestamp {
        self.clock.peek()
    }

    /// The PRNG position this client has reached, for snapshotting before
    /// constructing the next attempt's client.
    #[must_use]
    pub fn rng_cursor(&self) -> u64 {
        self.rng.raw_state()
    }

    fn next_call_index(&mut self) -> u64 {
        let index = self.call_index;
        self.call_index += 1;
        index
    }

    fn request_hash(&self, request: &Value) -> Result<String, ActivityError> {
        hash_canonical_json(DEFAULT_HASH_ALGORITHM, request)
            .map(|digest| digest.value)
            .map_err(|err| ActivityError::CallFailed(format!("failed to hash activity request: {err}")))
    }

    fn to_payload<T: Serialize>(&self, value: &T) -> Result<ActivityPayload, ActivityError> {
        let value = serde_json::to_value(value).map_err(|err| ActivityError::CallFailed(err.to_string()))?;
        let bytes = cmo_core::core::hashing::canonical_json_bytes(&value)
            .map_err(|err| ActivityError::CallFailed(format!("failed to canonicalize activity response: {err}")))?;
        if bytes.len() < self.context.replay_payload_size_threshold_bytes {
            return Ok(ActivityPayload::Inline(value));
        }
        let Some(blob_store) = &self.context.blob_store else {
            return Err(ActivityError::CallFailed(
                "activity response exceeds the inline size threshold but no blob store is configured".to_string(),
            ));
        };
        let reference = blob_store.write(bytes)?;
        Ok(ActivityPayload::Blob(reference))
    }

    fn from_payload<T: DeserializeOwned>(&self, payload: &ActivityPayload) -> Result<T, ActivityError> {
        match payload {
            ActivityPayload::Inline(value) => {
                serde_json::from_value(value.clone()).map_err(|err| ActivityError::CallFailed(err.to_string()))
            }
            ActivityPayload::Blob(reference) => {
                let Some(blob_store) = &self.context.blob_store else {
                    return Err(ActivityError::CallFailed("activity response is blob-backed but no blob store is configured".to_string()));
                };
                let bytes = blob_store.read(reference)?;
                serde_json::from_slice(&bytes).map_err(|err| ActivityError::CallFailed(err.to_string()))
            }
        }
    }

    /// Executes `activity_type` against `request`, dispatching to `live`
    /// when real work must happen (RECORD and LIVE modes) and otherwise
    /// serving the persisted record (REPLAY mode).
    fn perform<F, T>(&mut self, activity_type: ActivityType, request: Value, live: F) -> Result<T, ActivityError>
    where
        F: FnOnce(&mut Self) -> Result<T, ActivityError>,
        T: Serialize + DeserializeOwned,
    {
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(ActivityError::Cancelled);
        }
        let call_index = self.next_call_index();
        let request = annotate_call_index(request, call_index);
        let request_hash = self.request_hash(&request)?;

        match self.mode {
            ActivityMode::Replay => {
                let record = self
                    .context
                    .store
                    .get_activity(&self.trace_id, self.step_index, activity_type, &request_hash)
                    .map_err(|err| ActivityError::CallFailed(err.to_string()))?;
                let Some(record) = record else {
                    return Err(ActivityError::ReplayRecordMissing {
                        activity_type: format!("{activity_type:?}"),
                        request_hash,
                    });
                };
                if let Some(error) = record.error {
                    return Err(ActivityError::CallFailed(error.message));
                }
                self.from_payload(&record.response)
            }
            ActivityMode::Record => {
                // requestHash is the idempotency key across retries: a
                // retried attempt that already recorded a successful call
                // under this key must serve that record rather than firing
                // the side effect again.
                let existing = self
                    .context
                    .store
                    .get_activity(&self.trace_id, self.step_index, activity_type, &request_hash)
                    .map_err(|err| ActivityError::CallFailed(err.to_string()))?;
                if let Some(record) = existing {
                    if record.error.is_none() {
                        return self.from_payload(&record.response);
                    }
                }
                let started_at = self.clock.peek();
                let started = Instant::now();
                let outcome = live(&mut *self);
                let finished_at = self.clock.peek();
                let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                let (response, error) = match &outcome {
                    Ok(value) => (self.to_payload(value)?, None),
                    Err(err) => (ActivityPayload::Inline(Value::Null), Some(activity_error_detail(err))),
                };
                let record = ActivityRecord {
                    trace_id: self.trace_id.clone(),
                    step_index: self.step_index,
                    activity_type,
                    request_hash,
                    response,
                    started_at,
                    finished_at,
                    duration_ms,
                    error,
                };
                self.context
                    .store
                    .save_activity(&record)
                    .map_err(|err| ActivityError::CallFailed(err.to_string()))?;
                outcome
            }
            ActivityMode::Live => live(self),
        }
    }
}

fn annotate_call_index(mut request: Value, call_index: u64) -> Value {
    if let Value::Object(map) = &mut request {
        map.insert("callIndex".to_string(), json!(call_index));
        request
    } else {
        json!({ "request": request, "callIndex": call_index })
    }
}

fn activity_error_detail(error: &ActivityError) -> ErrorDetail {
    ErrorDetail {
        code: "ACTIVITY_FAILED".to_string(),
        message: error.to_string(),
        details: None,
    }
}

// ============================================================================
// SECTION: ActivityClient
// ============================================================================

impl cmo_core::interfaces::ActivityClient for RuntimeActivityClient {
    fn now(&mut self) -> Timestamp {
        // Pure function of the run's start time and call order: no record
        // lookup is needed to replay it, only to recompute it.
        self.clock.tick()
    }

    fn rand(&mut self, bound: Option<u64>) -> u64 {
        bounded_next(&mut self.rng, bound)
    }

    fn http_request(&mut self, request: HttpRequest) -> Result<HttpResponse, ActivityError> {
        let logged = json!({ "kind": "http", "request": &request });
        self.perform(ActivityType::Http, logged, move |client| client.do_http_request(&request))
    }

    fn send_a2a(&mut self, envelope: Envelope) -> Result<(), ActivityError> {
        let logged = json!({ "kind": "a2a", "envelope": &envelope });
        self.perform(ActivityType::A2a, logged, move |client| client.do_send_a2a(&envelope))
    }

    fn call_mcp(&mut self, request: McpRequest) -> Result<McpResponse, ActivityError> {
        let logged = json!({ "kind": "mcp", "request": &request });
        self.perform(ActivityType::Mcp, logged, move |client| client.do_call_mcp(&request))
    }

    fn database_query(&mut self, query: DatabaseQuery) -> Result<DatabaseQueryResult, ActivityError> {
        let logged = json!({ "kind": "db", "query": &query });
        self.perform(ActivityType::Db, logged, move |client| client.do_database_query(&query))
    }

    fn read_artifact(&mut self, reference: &ArtifactRef) -> Result<Vec<u8>, ActivityError> {
        let logged = json!({ "kind": "read_artifact", "reference": reference });
        let reference = reference.clone();
        let bytes: BytesAsBase64 =
            self.perform(ActivityType::ReadArtifact, logged, move |client| client.do_read_artifact(&reference).map(BytesAsBase64))?;
        Ok(bytes.0)
    }

    fn write_artifact(&mut self, bytes: Vec<u8>) -> Result<ArtifactRef, ActivityError> {
        let logged = json!({ "kind": "write_artifact", "bytesBase64": BASE64.encode(&bytes) });
        self.perform(ActivityType::WriteArtifact, logged, move |client| client.do_write_artifact(bytes))
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Wraps artifact bytes so they round-trip through [`ActivityPayload`] as a
/// base64 JSON string rather than a raw byte array.
struct BytesAsBase64(Vec<u8>);

impl Serialize for BytesAsBase64 {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(&self.0))
    }
}

impl<'de> serde::Deserialize<'de> for BytesAsBase64 {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let bytes = BASE64.decode(encoded.as_bytes()).map_err(serde::de::Error::custom)?;
        Ok(Self(bytes))
    }
}

// ============================================================================
// SECTION: Real call dispatch
// ============================================================================

impl RuntimeActivityClient {
    fn do_http_request(&self, request: &HttpRequest) -> Result<HttpResponse, ActivityError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|err| ActivityError::CallFailed(format!("invalid http method: {err}")))?;
        let mut builder = self.context.http_client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        let response = builder.send().map_err(|err| ActivityError::CallFailed(err.to_string()))?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_str().unwrap_or_default().to_string()))
            .collect();
        let text = response.text().map_err(|err| ActivityError::CallFailed(err.to_string()))?;
        let body = if text.is_empty() { None } else { serde_json::from_str(&text).ok() };
        Ok(HttpResponse { status, headers, body })
    }

    fn do_send_a2a(&self, envelope: &Envelope) -> Result<(), ActivityError> {
        let Some(transport) = &self.context.transport else {
            return Err(ActivityError::CallFailed("no transport configured for sendA2A".to_string()));
        };
        transport
            .publish(&self.context.a2a_topic, envelope, PublishOptions::default())
            .map(|_message_id| ())
            .map_err(|err| ActivityError::CallFailed(err.to_string()))
    }

    fn do_call_mcp(&self, request: &McpRequest) -> Result<McpResponse, ActivityError> {
        let Some(mcp_client) = &self.context.mcp_client else {
            return Err(ActivityError::CallFailed("no MCP client configured".to_string()));
        };
        mcp_client.call(request)
    }

    fn do_database_query(&self, query: &DatabaseQuery) -> Result<DatabaseQueryResult, ActivityError> {
        let Some(database_client) = &self.context.database_client else {
            return Err(ActivityError::CallFailed("no database client configured".to_string()));
        };
        database_client.query(query)
    }

    fn do_read_artifact(&self, reference: &ArtifactRef) -> Result<Vec<u8>, ActivityError> {
        let Some(blob_store) = &self.context.blob_store else {
            return Err(ActivityError::CallFailed("no blob store configured".to_string()));
        };
        blob_store.read(reference)
    }

    fn do_write_artifact(&self, bytes: Vec<u8>) -> Result<ArtifactRef, ActivityError> {
        let Some(blob_store) = &self.context.blob_store else {
            return Err(ActivityError::CallFailed("no blob store configured".to_string()));
        };
        blob_store.write(bytes)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "test-only assertions")]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use cmo_core::interfaces::ActivityClient;
    use cmo_store_sqlite::SqliteCheckpointStore;

    use super::*;

    struct InMemoryBlobStore {
        blobs: Mutex<BTreeMap<String, Vec<u8>>>,
    }

    impl InMemoryBlobStore {
        fn new() -> Self {
            Self {
                blobs: Mutex::new(BTreeMap::new()),
            }
        }
    }

    impl BlobStore for InMemoryBlobStore {
        fn read(&self, reference: &ArtifactRef) -> Result<Vec<u8>, ActivityError> {
            self.blobs
                .lock()
                .unwrap()
                .get(&reference.handle)
                .cloned()
                .ok_or_else(|| ActivityError::CallFailed("unknown blob".to_string()))
        }

        fn write(&self, bytes: Vec<u8>) -> Result<ArtifactRef, ActivityError> {
            let mut blobs = self.blobs.lock().unwrap();
            let handle = format!("blob-{}", blobs.len());
            blobs.insert(handle.clone(), bytes);
            Ok(ArtifactRef { handle })
        }
    }

    fn context(threshold: usize) -> Arc<ActivityContext> {
        Arc::new(ActivityContext {
            store: Arc::new(SqliteCheckpointStore::open_in_memory().unwrap()),
            http_client: Arc::new(reqwest::blocking::Client::new()),
            transport: None,
            a2a_topic: Topic::new("a2a"),
            mcp_client: None,
            database_client: None,
            blob_store: Some(Arc::new(InMemoryBlobStore::new())),
            replay_payload_size_threshold_bytes: threshold,
        })
    }

    fn client(mode: ActivityMode, context: Arc<ActivityContext>) -> RuntimeActivityClient {
        RuntimeActivityClient::new(
            mode,
            TraceId::new("trace-1"),
            Timestamp::UnixMillis(0),
            1,
            crate::rng::seed_from_bytes(b"trace-1"),
            Arc::new(AtomicBool::new(false)),
            context,
        )
    }

    #[test]
    fn now_advances_strictly_and_is_reproducible_from_the_same_seed() {
        let context = context(1024);
        let mut a = client(ActivityMode::Live, Arc::clone(&context));
        let mut b = client(ActivityMode::Live, context);
        for _ in 0..5 {
            assert_eq!(a.now(), b.now());
        }
    }

    #[test]
    fn rand_does_not_collide_across_repeated_calls_in_one_step() {
        let context = context(1024);
        let mut rac = client(ActivityMode::Live, context);
        let first = rac.rand(Some(1_000_000));
        let second = rac.rand(Some(1_000_000));
        assert_ne!(first, second);
    }

    #[test]
    fn record_then_replay_reproduces_write_artifact() {
        let context = context(1024);
        let store = Arc::clone(&context.store);
        let mut recorder = client(ActivityMode::Record, Arc::clone(&context));
        recorder.begin_step(StepIndex::ZERO);
        let reference = recorder.write_artifact(b"hello".to_vec()).unwrap();

        let mut replayer = RuntimeActivityClient::new(
            ActivityMode::Replay,
            TraceId::new("trace-1"),
            Timestamp::UnixMillis(0),
            1,
            crate::rng::seed_from_bytes(b"trace-1"),
            Arc::new(AtomicBool::new(false)),
            Arc::new(ActivityContext {
                store,
                http_client: Arc::new(reqwest::blocking::Client::new()),
                transport: None,
                a2a_topic: Topic::new("a2a"),
                mcp_client: None,
                database_client: context.database_client.clone(),
                blob_store: context.blob_store.clone(),
                replay_payload_size_threshold_bytes: context.replay_payload_size_threshold_bytes,
            }),
        );
        replayer.begin_step(StepIndex::ZERO);
        let replayed = replayer.write_artifact(b"hello".to_vec()).unwrap();
        assert_eq!(reference, replayed);
    }

    #[test]
    fn replay_missing_record_is_an_error() {
        let context = context(1024);
        let mut replayer = client(ActivityMode::Replay, context);
        replayer.begin_step(StepIndex::ZERO);
        let err = replayer.write_artifact(b"anything".to_vec()).unwrap_err();
        assert!(matches!(err, ActivityError::ReplayRecordMissing { .. }));
    }

    #[test]
    fn oversized_response_spills_to_blob_store() {
        let context = context(4);
        let mut recorder = client(ActivityMode::Record, context);
        recorder.begin_step(StepIndex::ZERO);
        let reference = recorder.write_artifact(b"bytes".to_vec()).unwrap();
        assert!(!reference.handle.is_empty());
    }

    #[test]
    fn cancelled_client_refuses_further_calls() {
        let context = context(1024);
        let cancelled = Arc::new(AtomicBool::new(true));
        let mut rac = RuntimeActivityClient::new(
            ActivityMode::Live,
            TraceId::new("trace-1"),
            Timestamp::UnixMillis(0),
            1,
            crate::rng::seed_from_bytes(b"trace-1"),
            cancelled,
            context,
        );
        assert!(rac.is_cancelled());
        let err = rac.write_artifact(b"x".to_vec()).unwrap_err();
        assert!(matches!(err, ActivityError::Cancelled));
    }
}
