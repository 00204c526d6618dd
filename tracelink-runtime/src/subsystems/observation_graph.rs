//! Observation graph: maps workflow lifecycle events onto traces and
//! observations
//!
//! This subsystem is responsible for:
//! - Opening a trace plus root span for every graph start
//! - Nesting node observations under their parent node, or the root span
//! - Classifying nodes as spans or generations and closing them with timing,
//!   status and usage metadata
//! - Forwarding every record to the sink, logging and swallowing failures
//!
//! The state lock is never held across a sink call. Id mappings are recorded
//! in the same critical section that checks for duplicates, then the record is
//! built from that snapshot and delivered with the lock released.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use tracelink_core::{
    classify, Attributes, Classification, EventType, ExternalEvent, GenerationDetails,
    HookConfig, HttpSink, Observation, Sink, SinkRecord, Trace, TracelinkConfig, Usage,
};

use super::hooks::TraceHook;
use super::media_processor::MediaProcessor;

pub const SDK_NAME: &str = "tracelink-rust/langgraph";
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Usage reported for generations whose events carry none.
pub const ESTIMATED_USAGE: Usage = Usage {
    input: 100,
    output: 200,
    total: 300,
};

#[derive(Debug, Clone)]
struct TraceEntry {
    trace_id: Uuid,
    root_id: Uuid,
    metadata: Attributes,
    open: bool,
}

#[derive(Debug, Clone)]
struct ObservationEntry {
    observation_id: Uuid,
    trace_id: Uuid,
    name: String,
    is_generation: bool,
    ended: bool,
}

#[derive(Debug, Default)]
struct GraphState {
    traces: HashMap<String, TraceEntry>,
    observations: HashMap<String, ObservationEntry>,
    parents: HashMap<Uuid, Option<Uuid>>,
    initial_input: Option<Value>,
}

impl GraphState {
    /// `(trace id, parent observation id)` for a new node.
    ///
    /// A declared parent that is a known graph or node wins. Otherwise the
    /// node lands under the root span of the only open trace, or nowhere when
    /// zero or several traces are open.
    fn resolve_parent(&self, parent_id: Option<&str>) -> Option<(Uuid, Uuid)> {
        if let Some(parent_id) = parent_id {
            if let Some(trace) = self.traces.get(parent_id) {
                return Some((trace.trace_id, trace.root_id));
            }
            if let Some(node) = self.observations.get(parent_id) {
                return Some((node.trace_id, node.observation_id));
            }
        }

        let mut open = self.traces.values().filter(|trace| trace.open);
        match (open.next(), open.next()) {
            (Some(trace), None) => Some((trace.trace_id, trace.root_id)),
            _ => None,
        }
    }
}

pub struct ObservationGraph {
    sink: Option<Arc<dyn Sink>>,
    config: HookConfig,
    media: Option<MediaProcessor>,
    state: RwLock<GraphState>,
}

impl ObservationGraph {
    pub fn new(sink: Arc<dyn Sink>, config: HookConfig) -> Self {
        Self {
            sink: Some(sink),
            config,
            media: None,
            state: RwLock::new(GraphState::default()),
        }
    }

    /// A hook that accepts every call and does nothing.
    pub fn disabled(config: HookConfig) -> Self {
        Self {
            sink: None,
            config,
            media: None,
            state: RwLock::new(GraphState::default()),
        }
    }

    /// HTTP-backed hook when credentials are configured, disabled otherwise.
    pub fn from_config(config: &TracelinkConfig) -> Self {
        if config.sink.credentials().is_none() {
            tracing::info!("Sink credentials not configured, tracing disabled");
            return Self::disabled(config.hook.clone());
        }

        match HttpSink::new(&config.sink) {
            Ok(sink) => Self::new(Arc::new(sink), config.hook.clone()),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to create sink, tracing disabled");
                Self::disabled(config.hook.clone())
            }
        }
    }

    pub fn builder() -> ObservationGraphBuilder {
        ObservationGraphBuilder::default()
    }

    /// Route data URIs in payloads through `processor`.
    pub fn with_media(mut self, processor: MediaProcessor) -> Self {
        self.media = Some(processor);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    pub fn config(&self) -> &HookConfig {
        &self.config
    }

    fn read_state(&self) -> RwLockReadGuard<'_, GraphState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, GraphState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Input attached to the next trace that opens.
    pub fn set_initial_input(&self, input: Value) {
        if !self.is_enabled() {
            return;
        }
        self.write_state().initial_input = Some(input);
    }

    pub async fn flush(&self) {
        let Some(sink) = &self.sink else {
            return;
        };
        if let Err(e) = sink.flush().await {
            tracing::warn!(sink = sink.name(), error = %e, "Failed to flush sink");
        }
    }

    // ------------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------------

    pub fn trace_id(&self, graph_id: &str) -> Option<Uuid> {
        self.read_state().traces.get(graph_id).map(|t| t.trace_id)
    }

    pub fn root_observation_id(&self, graph_id: &str) -> Option<Uuid> {
        self.read_state().traces.get(graph_id).map(|t| t.root_id)
    }

    pub fn observation_id(&self, node_id: &str) -> Option<Uuid> {
        self.read_state()
            .observations
            .get(node_id)
            .map(|o| o.observation_id)
    }

    /// Parent of an observation; `Some(None)` for a root span.
    pub fn parent_of(&self, observation_id: Uuid) -> Option<Option<Uuid>> {
        self.read_state().parents.get(&observation_id).copied()
    }

    pub fn is_trace_open(&self, graph_id: &str) -> bool {
        self.read_state()
            .traces
            .get(graph_id)
            .is_some_and(|t| t.open)
    }

    pub fn is_observation_ended(&self, node_id: &str) -> bool {
        self.read_state()
            .observations
            .get(node_id)
            .is_some_and(|o| o.ended)
    }

    // ------------------------------------------------------------------------
    // Event handlers
    // ------------------------------------------------------------------------

    async fn handle_graph_start(&self, event: &ExternalEvent) {
        let trace_id = Uuid::new_v4();
        let root_id = Uuid::new_v4();

        let mut metadata = self.config.default_metadata.clone();
        metadata.extend(event.metadata.clone());
        metadata.insert("graph_span_id".to_string(), json!(event.id));
        metadata.insert("sdk".to_string(), json!(SDK_NAME));
        metadata.insert("sdk_version".to_string(), json!(SDK_VERSION));

        let initial_input = {
            let mut state = self.write_state();
            if state.traces.contains_key(&event.id) {
                tracing::debug!(graph_id = %event.id, "Duplicate graph start ignored");
                return;
            }
            state.traces.insert(
                event.id.clone(),
                TraceEntry {
                    trace_id,
                    root_id,
                    metadata: metadata.clone(),
                    open: true,
                },
            );
            state.parents.insert(root_id, None);
            state.initial_input.clone()
        };

        let input = initial_input
            .or_else(|| payload(event.state.clone()))
            .map(|value| self.process_media(value, trace_id, None));

        let user_id = self
            .config
            .user_id
            .clone()
            .or_else(|| string_field(&metadata, "user_id"));
        let session_id = self
            .config
            .session_id
            .clone()
            .or_else(|| string_field(&metadata, "session_id"))
            .unwrap_or_else(|| format!("graph_{trace_id}"));

        let trace = Trace {
            id: trace_id,
            name: Some(self.config.trace_name.clone()),
            timestamp: Some(event.start_time),
            user_id,
            session_id: Some(session_id),
            input: input.clone(),
            output: None,
            metadata,
            tags: self.config.tags.clone(),
        };
        self.deliver(SinkRecord::TraceCreate(trace)).await;

        let mut root = Observation::span(root_id, trace_id);
        root.name = Some(self.config.trace_name.clone());
        root.start_time = Some(event.start_time);
        root.input = input;
        root.metadata = Attributes::from_iter([
            ("graph_span_id".to_string(), json!(event.id)),
            ("sdk".to_string(), json!(SDK_NAME)),
            ("sdk_version".to_string(), json!(SDK_VERSION)),
        ]);
        self.deliver(SinkRecord::ObservationCreate(root)).await;

        tracing::debug!(graph_id = %event.id, trace_id = %trace_id, "Trace opened");
    }

    async fn handle_graph_end(&self, event: &ExternalEvent) {
        let entry = {
            let mut state = self.write_state();
            let Some(entry) = state.traces.get_mut(&event.id) else {
                tracing::debug!(graph_id = %event.id, "Graph end without start ignored");
                return;
            };
            entry.metadata.extend(end_metadata(event));
            entry.open = false;
            entry.clone()
        };

        let end_time = event.effective_end_time();
        let output = payload(event.state.clone())
            .map(|value| self.process_media(value, entry.trace_id, Some(entry.root_id)));

        let trace = Trace {
            id: entry.trace_id,
            output: output.clone(),
            metadata: entry.metadata,
            ..Trace::default()
        };
        self.deliver(SinkRecord::TraceUpdate(trace)).await;

        let mut root = Observation::span(entry.root_id, entry.trace_id);
        root.name = Some(self.config.trace_name.clone());
        root.end_time = Some(end_time);
        root.output = output;
        self.deliver(SinkRecord::ObservationUpdate(root)).await;

        tracing::debug!(graph_id = %event.id, trace_id = %entry.trace_id, "Trace closed");

        if self.config.auto_flush {
            self.flush().await;
        }
    }

    async fn handle_node_start(&self, event: &ExternalEvent) {
        let classification = classify(&event.node_name, &event.metadata);
        let (name, is_generation) = match classification {
            Classification::Span => (event.node_name.clone(), false),
            Classification::Generation { .. } => (format!("{}_generation", event.node_name), true),
        };
        let observation_id = Uuid::new_v4();

        let (trace_id, parent_id) = {
            let mut state = self.write_state();
            if state.observations.contains_key(&event.id) {
                tracing::debug!(node_id = %event.id, "Duplicate node start ignored");
                return;
            }
            let Some((trace_id, parent_id)) = state.resolve_parent(event.parent_id.as_deref())
            else {
                tracing::warn!(
                    node_id = %event.id,
                    node = %event.node_name,
                    "No trace to attach node to, dropped"
                );
                return;
            };
            state.observations.insert(
                event.id.clone(),
                ObservationEntry {
                    observation_id,
                    trace_id,
                    name: name.clone(),
                    is_generation,
                    ended: false,
                },
            );
            state.parents.insert(observation_id, Some(parent_id));
            (trace_id, parent_id)
        };

        let mut observation = match classification {
            Classification::Span => Observation::span(observation_id, trace_id),
            Classification::Generation { model, parameters } => Observation::generation(
                observation_id,
                trace_id,
                GenerationDetails {
                    model: Some(model),
                    model_parameters: parameters,
                    usage: None,
                },
            ),
        };
        observation.parent_observation_id = Some(parent_id);
        observation.name = Some(name);
        observation.start_time = Some(event.start_time);
        observation.input = payload(event.state.clone())
            .map(|value| self.process_media(value, trace_id, Some(observation_id)));
        observation.metadata = Attributes::from_iter([
            ("node_name".to_string(), json!(event.node_name)),
            ("graph_span_id".to_string(), json!(event.id)),
        ]);

        self.deliver(SinkRecord::ObservationCreate(observation)).await;
    }

    async fn handle_node_end(&self, event: &ExternalEvent) {
        let (entry, parent_id) = {
            let mut guard = self.write_state();
            let state = &mut *guard;
            let Some(entry) = state.observations.get_mut(&event.id) else {
                tracing::debug!(node_id = %event.id, "Node end without start ignored");
                return;
            };
            entry.ended = true;
            let parent_id = state.parents.get(&entry.observation_id).copied().flatten();
            (entry.clone(), parent_id)
        };

        let mut metadata = end_metadata(event);
        metadata.insert("node_name".to_string(), json!(event.node_name));

        let mut observation = if entry.is_generation {
            let usage = match reported_usage(&event.metadata) {
                Some(usage) => Some(usage),
                None if self.config.estimate_missing_usage => {
                    metadata.insert("usage_estimated".to_string(), json!(true));
                    Some(ESTIMATED_USAGE)
                }
                None => None,
            };
            Observation::generation(
                entry.observation_id,
                entry.trace_id,
                GenerationDetails {
                    usage,
                    ..GenerationDetails::default()
                },
            )
        } else {
            Observation::span(entry.observation_id, entry.trace_id)
        };
        observation.parent_observation_id = parent_id;
        observation.name = Some(entry.name);
        observation.end_time = Some(event.effective_end_time());
        observation.output = payload(event.state.clone()).map(|value| {
            self.process_media(value, entry.trace_id, Some(entry.observation_id))
        });
        observation.metadata = metadata;

        self.deliver(SinkRecord::ObservationUpdate(observation)).await;
    }

    fn process_media(&self, value: Value, trace_id: Uuid, observation_id: Option<Uuid>) -> Value {
        match &self.media {
            Some(processor) => processor.process(value, trace_id, observation_id),
            None => value,
        }
    }

    async fn deliver(&self, record: SinkRecord) {
        let Some(sink) = &self.sink else {
            return;
        };
        let kind = record.ingestion_type();
        if let Err(e) = sink.send(record).await {
            tracing::warn!(sink = sink.name(), record = kind, error = %e, "Failed to deliver record");
        }
    }
}

#[async_trait]
impl TraceHook for ObservationGraph {
    async fn on_event(&self, event: &ExternalEvent) {
        if !self.is_enabled() {
            return;
        }

        match event.event_type {
            EventType::GraphStart => self.handle_graph_start(event).await,
            EventType::GraphEnd => self.handle_graph_end(event).await,
            EventType::NodeStart => self.handle_node_start(event).await,
            EventType::NodeEnd | EventType::NodeError => self.handle_node_end(event).await,
            EventType::EdgeTraversal => {}
        }
    }
}

/// `duration_ms`, `status` and `error` for a closing event.
fn end_metadata(event: &ExternalEvent) -> Attributes {
    let failed = event.error.is_some() || event.event_type == EventType::NodeError;
    let mut metadata = Attributes::new();
    metadata.insert("duration_ms".to_string(), json!(event.duration_millis()));
    metadata.insert(
        "status".to_string(),
        json!(if failed { "error" } else { "completed" }),
    );
    if failed {
        let error = event.error.as_deref().unwrap_or("node error");
        metadata.insert("error".to_string(), json!(error));
    }
    metadata
}

/// Usage from `metadata.usage.{input,output}`, if the event reported any.
fn reported_usage(metadata: &Attributes) -> Option<Usage> {
    let usage = metadata.get("usage")?.as_object()?;
    let count = |key: &str| usage.get(key).and_then(Value::as_u64).unwrap_or(0);
    Some(Usage::new(count("input"), count("output")))
}

fn string_field(metadata: &Attributes, key: &str) -> Option<String> {
    metadata.get(key).and_then(Value::as_str).map(str::to_string)
}

fn payload(value: Value) -> Option<Value> {
    (!value.is_null()).then_some(value)
}

// ============================================================================
// Builder
// ============================================================================

#[derive(Default)]
pub struct ObservationGraphBuilder {
    config: HookConfig,
    sink: Option<Arc<dyn Sink>>,
    media: Option<MediaProcessor>,
}

impl ObservationGraphBuilder {
    pub fn config(mut self, config: HookConfig) -> Self {
        self.config = config;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn media(mut self, processor: MediaProcessor) -> Self {
        self.media = Some(processor);
        self
    }

    pub fn trace_name(mut self, name: impl Into<String>) -> Self {
        self.config.trace_name = name.into();
        self
    }

    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.config.session_id = Some(session_id.into());
        self
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.config.user_id = Some(user_id.into());
        self
    }

    pub fn tags(mut self, tags: Vec<String>) -> Self {
        self.config.tags = tags;
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.default_metadata.insert(key.into(), value);
        self
    }

    pub fn auto_flush(mut self, auto_flush: bool) -> Self {
        self.config.auto_flush = auto_flush;
        self
    }

    pub fn estimate_missing_usage(mut self, estimate: bool) -> Self {
        self.config.estimate_missing_usage = estimate;
        self
    }

    /// Without a sink the hook is built disabled.
    pub fn build(self) -> ObservationGraph {
        let graph = match self.sink {
            Some(sink) => ObservationGraph::new(sink, self.config),
            None => ObservationGraph::disabled(self.config),
        };
        match self.media {
            Some(processor) => graph.with_media(processor),
            None => graph,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
