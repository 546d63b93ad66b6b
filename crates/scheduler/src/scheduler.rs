//! The [`Scheduler`]: traverses an IR's node tree, resolving inputs,
//! invoking tools, branching, fanning out, looping, and surfacing
//! suspension requests.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use loomflow_core::{ExecutionId, NodeId};
use loomflow_error::{EngineError, ExecutionError};
use loomflow_ir::{Graph, Ir, Node, NodeConfig};
use loomflow_registry::Registry;
use loomflow_state::StateStore;
use parking_lot::RwLock;
use serde_json::Value as Json;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::events::{Event, EventBus};
use crate::resolver::InputResolver;
use crate::retry::{with_retry, RetryPolicy};
use crate::suspend::{ExecutionPosition, SuspensionContext, SuspensionRecord};

/// What a node (or a whole flow) produced.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The node ran to completion with this output.
    Completed(Json),
    /// A tool node requested suspension; execution stops here.
    Suspended(SuspensionContext, ExecutionPosition),
}

/// What a flow run produced, once the scheduler returns control to the
/// caller. Building the [`crate::suspend::SuspensionKey`] and actually
/// persisting the record is the host facade's job — the scheduler
/// only knows how to capture the frontier, not where to put it.
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    /// The flow completed; this is its final output.
    Completed(Json),
    /// The flow paused; this record has everything needed to resume it.
    Suspended(Box<SuspensionRecord>),
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Default safety ceiling for `while` loops lacking an explicit
/// `config.loop_limit`.
const DEFAULT_LOOP_LIMIT: usize = 10_000;

/// Executes a built [`Ir`] against a registry and variable store,
/// streaming progress as [`Event`]s.
///
/// Cheap to clone: every field is reference-counted or otherwise shared, so
/// cloning a [`Scheduler`] to move into a spawned task shares the same
/// registry, event bus, variable store, and node-output map as the
/// original.
#[derive(Clone)]
pub struct Scheduler {
    execution_id: ExecutionId,
    registry: Arc<Registry>,
    events: EventBus,
    state: Arc<RwLock<StateStore>>,
    outputs: Arc<DashMap<NodeId, Json>>,
    tools_executed: Arc<RwLock<Vec<(String, NodeId)>>>,
    cancel: CancellationToken,
    concurrency: Arc<Semaphore>,
    default_retry: RetryPolicy,
}

impl Scheduler {
    /// Build a scheduler for `execution_id` over a fresh variable store and
    /// node-output map, bounding global tool concurrency to
    /// `max_concurrent_nodes`. One scheduler instance drives exactly one
    /// execution.
    #[must_use]
    pub fn new(registry: Arc<Registry>, max_concurrent_nodes: usize, execution_id: ExecutionId) -> Self {
        Self {
            execution_id,
            registry,
            events: EventBus::default(),
            state: Arc::new(RwLock::new(StateStore::new())),
            outputs: Arc::new(DashMap::new()),
            tools_executed: Arc::new(RwLock::new(Vec::new())),
            cancel: CancellationToken::new(),
            concurrency: Arc::new(Semaphore::new(max_concurrent_nodes.max(1))),
            default_retry: RetryPolicy::none(),
        }
    }

    /// Resume a scheduler over an already-populated state/output snapshot
    /// (resume rehydration), continuing the same execution id.
    #[must_use]
    pub fn resume(
        registry: Arc<Registry>,
        max_concurrent_nodes: usize,
        execution_id: ExecutionId,
        state: StateStore,
        outputs: HashMap<NodeId, Json>,
    ) -> Self {
        let scheduler = Self::new(registry, max_concurrent_nodes, execution_id);
        *scheduler.state.write() = state;
        for (id, output) in outputs {
            scheduler.outputs.insert(id, output);
        }
        scheduler
    }

    /// This scheduler's execution id.
    #[must_use]
    pub fn execution_id(&self) -> ExecutionId {
        self.execution_id
    }

    /// Subscribe to this execution's event stream.
    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// The token cancelling this scheduler's in-flight work signals.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Push an event onto this execution's bus from outside the run loop.
    /// The only caller today is the host facade, once it has turned a
    /// [`SuspensionRecord`](crate::suspend::SuspensionRecord) into a
    /// durably stored key and can finally emit `FlowSuspended` — something
    /// `run` itself cannot do, since the key does not exist until after
    /// `run` has already returned it.
    pub fn emit_event(&self, event: Event) {
        self.events.emit(event);
    }

    /// A snapshot of the variable store, for persistence.
    #[must_use]
    pub fn state_snapshot(&self) -> loomflow_state::StateSnapshot {
        self.state.read().snapshot()
    }

    /// Read a variable from this execution's live store (state get).
    #[must_use]
    pub fn state_get(&self, name: &str) -> Option<Json> {
        self.state.read().get(name).cloned()
    }

    /// Write a variable into this execution's live store (state set).
    pub fn state_set(&self, name: impl Into<String>, value: Json) {
        self.state.write().set(name, value);
    }

    /// Replace this execution's live store with a previously captured
    /// snapshot (state restore).
    pub fn state_restore(&self, snapshot: loomflow_state::StateSnapshot) {
        self.state.write().restore(snapshot);
    }

    /// Every node output recorded so far.
    #[must_use]
    pub fn outputs_snapshot(&self) -> HashMap<NodeId, Json> {
        self.outputs.iter().map(|e| (e.key().clone(), e.value().clone())).collect()
    }

    /// Seed the output of the node that suspended with the externally
    /// supplied resume value, applying the same state writes `run_tool`
    /// would have made had it completed normally. Call this before `run`
    /// on a resumed scheduler so the top-of-`run_node` cache check picks
    /// it up instead of re-invoking the tool.
    pub fn seed_resumed_output(&self, ir: &Ir, node_id: &NodeId, output: Json) {
        if let Some(Node::Tool { tool_id, output_var, .. }) = ir.graph.get(node_id) {
            if let Some(var) = output_var {
                self.state.write().set(var.clone(), output.clone());
            }
            self.state.write().set(tool_id.clone(), output.clone());
        }
        self.outputs.insert(node_id.clone(), output);
    }

    /// Run `ir` from its entry point. `input` seeds the variable store
    /// under the reserved name `"input"`, so nodes can reference it as
    /// `Value::Variable { name: "input", .. }`.
    #[tracing::instrument(skip(self, ir, input), fields(execution_id = %self.execution_id, entry = %ir.graph.entry_point))]
    pub async fn run(&self, ir: &Ir, input: Json) -> Result<ExecutionOutcome, EngineError> {
        let execution_id = self.execution_id;
        tracing::info!("flow started");
        self.events.emit(Event::FlowStart { execution_id });
        self.state.write().set("input", input);

        let graph = Arc::new(ir.graph.clone());
        let entry = graph.entry_point.clone();

        match self.run_node(&graph, &entry).await {
            Ok(Outcome::Completed(output)) => {
                tracing::info!("flow completed");
                self.events.emit(Event::FlowComplete { execution_id, output: output.clone() });
                Ok(ExecutionOutcome::Completed(output))
            }
            Ok(Outcome::Suspended(context, position)) => {
                tracing::info!(node_id = %position.node_id, "flow suspended");
                let record = SuspensionRecord {
                    execution_id,
                    step_id: position.node_id.clone(),
                    execution_position: position,
                    variables: self.state_snapshot(),
                    per_node_output: self.outputs_snapshot(),
                    metadata: None,
                    captured_at: chrono::Utc::now(),
                    suspension_context: context,
                };
                Ok(ExecutionOutcome::Suspended(Box::new(record)))
            }
            Err(error) => {
                tracing::warn!(code = error.code().as_str(), error = %error, "flow failed");
                self.events.emit(Event::FlowError { execution_id, code: error.code().as_str(), message: error.to_string() });
                Err(error)
            }
        }
    }

    /// Request cancellation; in-flight tool effects and pending timers
    /// observe it on their next scheduling point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    fn resolver<'a>(&'a self) -> InputResolver<'a> {
        InputResolver::new(&self.state, &self.registry, &self.outputs, &self.tools_executed)
    }

    fn run_node<'a>(&'a self, graph: &'a Arc<Graph>, node_id: &'a NodeId) -> BoxFuture<'a, Result<Outcome, EngineError>> {
        Box::pin(async move {
            if self.cancel.is_cancelled() {
                return Err(ExecutionError::Cancelled.into());
            }
            // On a resumed execution, nodes that completed before suspension
            // are already in `outputs`; replay short-circuits them instead
            // of re-invoking their tools.
            if let Some(cached) = self.outputs.get(node_id) {
                return Ok(Outcome::Completed(cached.clone()));
            }
            let Some(node) = graph.get(node_id) else {
                return Err(ExecutionError::Failed {
                    node_id: node_id.clone(),
                    node_type: "unknown".into(),
                    message: "node id not found in graph".into(),
                }
                .into());
            };

            self.events.emit(Event::NodeStart { execution_id: self.execution_id, node_id: node_id.clone() });

            let result = match node {
                Node::Tool { id, tool_id, inputs, output_var, config } => {
                    self.run_tool(graph, id, tool_id, inputs, output_var.as_deref(), config.as_ref()).await
                }
                Node::Conditional { id, condition, then_branch, else_branch, .. } => {
                    match self.resolver().evaluate_condition(condition, id) {
                        Ok(take_then) => {
                            let (branch, selected_branch) = if take_then {
                                (then_branch.as_slice(), "then")
                            } else {
                                (else_branch.as_deref().unwrap_or(&[]), "else")
                            };
                            match self.run_sequence(graph, branch).await {
                                Ok(Outcome::Completed(_)) => {
                                    let output = serde_json::json!({
                                        "condition": take_then,
                                        "selectedBranch": selected_branch,
                                    });
                                    self.outputs.insert(id.clone(), output.clone());
                                    Ok(Outcome::Completed(output))
                                }
                                Ok(suspended @ Outcome::Suspended(..)) => Ok(suspended),
                                Err(error) => Err(error),
                            }
                        }
                        Err(error) => Err(error),
                    }
                }
                Node::Sequence { steps, .. } => self.run_sequence(graph, steps).await,
                Node::Parallel { id, branches, join_strategy, output_var, config } => {
                    self.run_parallel(graph, id, branches, *join_strategy, output_var.as_deref(), config.as_ref()).await
                }
                Node::Loop { id, loop_type, collection, condition, iterator_var, body, accumulator, output_var, config } => {
                    self.run_loop(
                        graph,
                        id,
                        *loop_type,
                        collection.as_ref(),
                        condition.as_ref(),
                        iterator_var.as_deref(),
                        body,
                        accumulator.as_ref(),
                        output_var.as_deref(),
                        config.as_ref(),
                    )
                    .await
                }
            };

            match &result {
                Ok(Outcome::Completed(output)) => {
                    self.events.emit(Event::NodeComplete {
                        execution_id: self.execution_id,
                        node_id: node_id.clone(),
                        output: output.clone(),
                    });
                }
                Err(error) => {
                    self.events.emit(Event::NodeError {
                        execution_id: self.execution_id,
                        node_id: node_id.clone(),
                        code: error.code().as_str(),
                        message: error.to_string(),
                    });
                }
                Ok(Outcome::Suspended(..)) => {}
            }
            result
        })
    }

    async fn run_tool(
        &self,
        _graph: &Arc<Graph>,
        id: &NodeId,
        tool_id: &str,
        inputs: &indexmap::IndexMap<String, loomflow_ir::Value>,
        output_var: Option<&str>,
        config: Option<&NodeConfig>,
    ) -> Result<Outcome, EngineError> {
        let config = config.cloned().unwrap_or_default();
        let input = self.resolver().resolve_all(inputs, id, tool_id)?;
        let policy = RetryPolicy {
            max_attempts: config.retries.unwrap_or(0) as usize + 1,
            base_delay: Duration::from_millis(config.retry_delay_ms.unwrap_or(100)),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        };
        let timeout = config.timeout_ms.map(Duration::from_millis);

        self.events.emit(Event::ToolStart { execution_id: self.execution_id, node_id: id.clone(), tool_id: tool_id.to_owned() });

        let _permit = self.concurrency.acquire().await.expect("semaphore is never closed");
        let registry = Arc::clone(&self.registry);
        let outcome = with_retry(&policy, || {
            let registry = Arc::clone(&registry);
            let input = input.clone();
            let id = id.clone();
            async move {
                let invocation = registry.invoke(tool_id, input);
                match timeout {
                    Some(duration) => match tokio::time::timeout(duration, invocation).await {
                        Ok(result) => result.map_err(|e| to_execution_error(&id, e)),
                        Err(_) => Err(ExecutionError::Timeout { node_id: id.clone(), timeout_ms: duration.as_millis() as u64 }),
                    },
                    None => invocation.await.map_err(|e| to_execution_error(&id, e)),
                }
            }
        })
        .await;

        match outcome {
            Ok(output) => {
                if let Some(context) = suspend_signal(&output, tool_id, &config) {
                    return Ok(Outcome::Suspended(context, ExecutionPosition { node_id: id.clone(), kind: "tool".into() }));
                }
                if let Some(var) = output_var {
                    self.state.write().set(var.to_owned(), output.clone());
                }
                self.state.write().set(tool_id.to_owned(), output.clone());
                self.outputs.insert(id.clone(), output.clone());
                self.tools_executed.write().push((tool_id.to_owned(), id.clone()));
                self.events.emit(Event::ToolOutput { execution_id: self.execution_id, node_id: id.clone(), output: output.clone() });
                Ok(Outcome::Completed(output))
            }
            Err(error) => {
                tracing::warn!(node_id = %id, tool_id, error = %error, "tool invocation failed");
                self.events.emit(Event::ToolError { execution_id: self.execution_id, node_id: id.clone(), message: error.to_string() });
                Err(error.into())
            }
        }
    }

    async fn run_sequence(&self, graph: &Arc<Graph>, steps: &[NodeId]) -> Result<Outcome, EngineError> {
        let mut last = Json::Null;
        for step in steps {
            match self.run_node(graph, step).await? {
                Outcome::Completed(output) => last = output,
                suspended @ Outcome::Suspended(..) => return Ok(suspended),
            }
        }
        Ok(Outcome::Completed(last))
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_parallel(
        &self,
        graph: &Arc<Graph>,
        id: &NodeId,
        branches: &[Vec<NodeId>],
        join_strategy: loomflow_ir::JoinStrategy,
        output_var: Option<&str>,
        config: Option<&NodeConfig>,
    ) -> Result<Outcome, EngineError> {
        use loomflow_ir::JoinStrategy;

        let limit = config.and_then(|c| c.concurrency).unwrap_or_else(|| branches.len().max(1));
        let branch_semaphore = Arc::new(Semaphore::new(limit));
        let cancel_siblings = CancellationToken::new();

        let mut join_set: JoinSet<(usize, Result<Outcome, EngineError>)> = JoinSet::new();
        for (index, branch) in branches.iter().enumerate() {
            let scheduler = self.clone();
            let graph = Arc::clone(graph);
            let branch = branch.clone();
            let semaphore = Arc::clone(&branch_semaphore);
            let cancel_siblings = cancel_siblings.clone();
            let cancellable = matches!(join_strategy, JoinStrategy::Race | JoinStrategy::All);
            join_set.spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore is never closed");
                let result = tokio::select! {
                    biased;
                    _ = cancel_siblings.cancelled(), if cancellable => Err(ExecutionError::Cancelled.into()),
                    result = scheduler.run_sequence(&graph, &branch) => result,
                };
                (index, result)
            });
        }

        let mut results: Vec<Option<Result<Outcome, EngineError>>> = (0..branches.len()).map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            let (index, result) = joined.expect("branch task panicked");
            let failed = result.is_err();
            let succeeded = result.is_ok();
            results[index] = Some(result);
            match join_strategy {
                JoinStrategy::Race if succeeded => {
                    cancel_siblings.cancel();
                    join_set.abort_all();
                    break;
                }
                JoinStrategy::All if failed => {
                    cancel_siblings.cancel();
                    join_set.abort_all();
                    break;
                }
                _ => {}
            }
        }

        let combined = match join_strategy {
            JoinStrategy::All => {
                let mut outputs = Vec::with_capacity(results.len());
                for slot in results {
                    match slot {
                        Some(Ok(Outcome::Completed(output))) => outputs.push(output),
                        Some(Ok(Outcome::Suspended(context, position))) => return Ok(Outcome::Suspended(context, position)),
                        Some(Err(error)) => return Err(error),
                        None => {}
                    }
                }
                Json::Array(outputs)
            }
            JoinStrategy::Race => {
                let mut first_error = None;
                let mut winner = None;
                for slot in results {
                    match slot {
                        Some(Ok(Outcome::Completed(output))) => {
                            winner = Some(output);
                            break;
                        }
                        Some(Ok(suspended @ Outcome::Suspended(..))) => return Ok(suspended),
                        Some(Err(error)) => {
                            if first_error.is_none() {
                                first_error = Some(error);
                            }
                        }
                        None => {}
                    }
                }
                match winner {
                    Some(output) => output,
                    None => {
                        return Err(first_error.unwrap_or_else(|| {
                            EngineError::from(ExecutionError::Failed {
                                node_id: id.clone(),
                                node_type: "parallel".into(),
                                message: "every branch failed".into(),
                            })
                        }));
                    }
                }
            }
            JoinStrategy::Settled => Json::Array(
                results
                    .into_iter()
                    .map(|slot| match slot {
                        Some(Ok(Outcome::Completed(output))) => serde_json::json!({"status": "fulfilled", "value": output}),
                        Some(Ok(Outcome::Suspended(..))) => serde_json::json!({"status": "suspended"}),
                        Some(Err(error)) => serde_json::json!({"status": "rejected", "reason": error.to_string()}),
                        None => serde_json::json!({"status": "rejected", "reason": "branch never completed"}),
                    })
                    .collect(),
            ),
        };

        if let Some(var) = output_var {
            self.state.write().set(var.to_owned(), combined.clone());
        }
        self.outputs.insert(id.clone(), combined.clone());
        Ok(Outcome::Completed(combined))
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_loop(
        &self,
        graph: &Arc<Graph>,
        id: &NodeId,
        loop_type: loomflow_ir::LoopType,
        collection: Option<&loomflow_ir::Value>,
        condition: Option<&loomflow_ir::Condition>,
        iterator_var: Option<&str>,
        body: &[NodeId],
        accumulator: Option<&loomflow_ir::Value>,
        output_var: Option<&str>,
        config: Option<&NodeConfig>,
    ) -> Result<Outcome, EngineError> {
        use loomflow_ir::LoopType;

        let limit = config.and_then(|c| c.loop_limit).unwrap_or(DEFAULT_LOOP_LIMIT);
        let parallel = config.and_then(|c| c.parallel).unwrap_or(false);

        let result = match loop_type {
            LoopType::While => {
                let condition = condition.ok_or_else(|| missing_field(id, "condition"))?;
                let mut last = Json::Null;
                let mut iterations = 0usize;
                loop {
                    if !self.resolver().evaluate_condition(condition, id)? {
                        break;
                    }
                    if iterations >= limit {
                        return Err(ExecutionError::LoopLimit { node_id: id.clone(), limit }.into());
                    }
                    match self.run_sequence(graph, body).await? {
                        Outcome::Completed(output) => last = output,
                        suspended @ Outcome::Suspended(..) => return Ok(suspended),
                    }
                    iterations += 1;
                }
                last
            }
            LoopType::For => {
                let items = self.resolve_collection(collection, id)?;
                for item in items {
                    self.state.write().push_scope();
                    if let Some(var) = iterator_var {
                        self.state.write().set(var.to_owned(), item);
                    }
                    let step = self.run_sequence(graph, body).await;
                    self.state.write().pop_scope().map_err(|e| ExecutionError::Failed {
                        node_id: id.clone(),
                        node_type: "loop".into(),
                        message: e.to_string(),
                    })?;
                    if let Outcome::Suspended(context, position) = step? {
                        return Ok(Outcome::Suspended(context, position));
                    }
                }
                Json::Null
            }
            LoopType::Map => {
                let items = self.resolve_collection(collection, id)?;
                if parallel {
                    let limit = config.and_then(|c| c.concurrency).unwrap_or(items.len().max(1));
                    let semaphore = Arc::new(Semaphore::new(limit));
                    let mut join_set: JoinSet<(usize, Result<Outcome, EngineError>)> = JoinSet::new();
                    for (index, item) in items.into_iter().enumerate() {
                        let scheduler = self.clone();
                        let graph = Arc::clone(graph);
                        let body = body.to_vec();
                        let iterator_var = iterator_var.map(str::to_owned);
                        let semaphore = Arc::clone(&semaphore);
                        join_set.spawn(async move {
                            let _permit = semaphore.acquire().await.expect("semaphore is never closed");
                            scheduler.state.write().push_scope();
                            if let Some(var) = &iterator_var {
                                scheduler.state.write().set(var.clone(), item);
                            }
                            let result = scheduler.run_sequence(&graph, &body).await;
                            let _ = scheduler.state.write().pop_scope();
                            (index, result)
                        });
                    }
                    let mut mapped: Vec<Option<Json>> = (0..join_set.len()).map(|_| None).collect();
                    while let Some(joined) = join_set.join_next().await {
                        let (index, result) = joined.expect("map iteration panicked");
                        match result? {
                            Outcome::Completed(output) => mapped[index] = Some(output),
                            Outcome::Suspended(context, position) => return Ok(Outcome::Suspended(context, position)),
                        }
                    }
                    Json::Array(mapped.into_iter().map(|v| v.unwrap_or(Json::Null)).collect())
                } else {
                    let mut mapped = Vec::new();
                    for item in items {
                        self.state.write().push_scope();
                        if let Some(var) = iterator_var {
                            self.state.write().set(var.to_owned(), item);
                        }
                        let step = self.run_sequence(graph, body).await;
                        let _ = self.state.write().pop_scope();
                        match step? {
                            Outcome::Completed(output) => mapped.push(output),
                            Outcome::Suspended(context, position) => return Ok(Outcome::Suspended(context, position)),
                        }
                    }
                    Json::Array(mapped)
                }
            }
            LoopType::Filter => {
                let items = self.resolve_collection(collection, id)?;
                let mut kept = Vec::new();
                for item in items {
                    self.state.write().push_scope();
                    if let Some(var) = iterator_var {
                        self.state.write().set(var.to_owned(), item.clone());
                    }
                    let step = self.run_sequence(graph, body).await;
                    let _ = self.state.write().pop_scope();
                    match step? {
                        Outcome::Completed(output) => {
                            if truthy(&output) {
                                kept.push(item);
                            }
                        }
                        Outcome::Suspended(context, position) => return Ok(Outcome::Suspended(context, position)),
                    }
                }
                Json::Array(kept)
            }
            LoopType::Reduce => {
                let items = self.resolve_collection(collection, id)?;
                let mut acc = match accumulator {
                    Some(value) => self.resolver().resolve(value, id)?,
                    None => Json::Null,
                };
                for item in items {
                    self.state.write().push_scope();
                    self.state.write().set("accumulator", acc.clone());
                    if let Some(var) = iterator_var {
                        self.state.write().set(var.to_owned(), item);
                    }
                    let step = self.run_sequence(graph, body).await;
                    let _ = self.state.write().pop_scope();
                    match step? {
                        Outcome::Completed(output) => acc = output,
                        Outcome::Suspended(context, position) => return Ok(Outcome::Suspended(context, position)),
                    }
                }
                acc
            }
        };

        if let Some(var) = output_var {
            self.state.write().set(var.to_owned(), result.clone());
        }
        self.outputs.insert(id.clone(), result.clone());
        Ok(Outcome::Completed(result))
    }

    fn resolve_collection(&self, collection: Option<&loomflow_ir::Value>, id: &NodeId) -> Result<Vec<Json>, EngineError> {
        let value = collection.ok_or_else(|| missing_field(id, "collection"))?;
        let resolved = self.resolver().resolve(value, id)?;
        match resolved {
            Json::Array(items) => Ok(items),
            other => Err(ExecutionError::Failed {
                node_id: id.clone(),
                node_type: "loop".into(),
                message: format!("collection resolved to non-array value {other}"),
            }
            .into()),
        }
    }
}

fn missing_field(node_id: &NodeId, field: &str) -> EngineError {
    ExecutionError::Failed { node_id: node_id.clone(), node_type: "loop".into(), message: format!("missing required field '{field}'") }.into()
}

fn to_execution_error(node_id: &NodeId, error: EngineError) -> ExecutionError {
    ExecutionError::Failed { node_id: node_id.clone(), node_type: "tool".into(), message: error.to_string() }
}

/// A tool's output is a suspension signal, not a normal result, when it is
/// an object carrying `"suspend": true`.
fn suspend_signal(output: &Json, tool_id: &str, config: &NodeConfig) -> Option<SuspensionContext> {
    let object = output.as_object()?;
    if object.get("suspend")?.as_bool()? {
        Some(SuspensionContext {
            tool_id: tool_id.to_owned(),
            timeout_ms: config.timeout_ms,
            awaiting_input_schema: object.get("inputSchema").cloned(),
            default_value: object.get("defaultValue").cloned(),
            metadata: object.get("message").cloned(),
        })
    } else {
        None
    }
}

fn truthy(value: &Json) -> bool {
    match value {
        Json::Bool(b) => *b,
        Json::Null => false,
        Json::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Json::String(s) => !s.is_empty(),
        Json::Array(a) => !a.is_empty(),
        Json::Object(o) => !o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use loomflow_ir::{Condition, IrBuilder, PermissiveToolCatalog, ToolCatalog, Value};
    use loomflow_registry::{Tool, ToolMetadata};

    struct Echo(ToolMetadata);
    #[async_trait]
    impl Tool for Echo {
        fn metadata(&self) -> &ToolMetadata {
            &self.0
        }
        async fn execute(&self, input: Json) -> Result<Json, String> {
            Ok(input)
        }
    }

    struct SuspendingTool(ToolMetadata);
    #[async_trait]
    impl Tool for SuspendingTool {
        fn metadata(&self) -> &ToolMetadata {
            &self.0
        }
        async fn execute(&self, _input: Json) -> Result<Json, String> {
            Ok(serde_json::json!({"suspend": true, "inputSchema": {"choice": "string"}}))
        }
    }

    fn registry_with(tool: impl Tool + 'static) -> Arc<Registry> {
        let registry = Registry::new();
        registry.register_tool(Arc::new(tool)).unwrap();
        Arc::new(registry)
    }

    #[tokio::test]
    async fn runs_a_single_tool_node_to_completion() {
        let registry = registry_with(Echo(ToolMetadata::new("echo", "Echo", "")));
        let mut builder = IrBuilder::new();
        let inputs: indexmap::IndexMap<String, Value> = [("value".to_string(), Value::literal(42))].into_iter().collect();
        let tool = builder.add_tool("echo", inputs, None, None);
        builder.set_entry_point(tool);
        let (ir, _) = builder.build(&*registry, chrono::Utc::now()).unwrap();

        let scheduler = Scheduler::new(registry, 4, ExecutionId::v4());
        let outcome = scheduler.run(&ir, Json::Null).await.unwrap();
        match outcome {
            ExecutionOutcome::Completed(output) => assert_eq!(output, serde_json::json!({"value": 42})),
            ExecutionOutcome::Suspended(_) => panic!("expected completion"),
        }
    }

    #[tokio::test]
    async fn tool_requesting_suspension_pauses_the_flow() {
        let registry = registry_with(SuspendingTool(ToolMetadata::new("ask", "Ask", "")));
        let mut builder = IrBuilder::new();
        let tool = builder.add_tool("ask", indexmap::IndexMap::new(), None, None);
        builder.set_entry_point(tool);
        let (ir, _) = builder.build(&*registry, chrono::Utc::now()).unwrap();

        let scheduler = Scheduler::new(registry, 4, ExecutionId::v4());
        let outcome = scheduler.run(&ir, Json::Null).await.unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Suspended(_)));
    }

    #[tokio::test]
    async fn sequence_threads_state_between_tool_nodes() {
        let registry = registry_with(Echo(ToolMetadata::new("echo", "Echo", "")));
        let mut builder = IrBuilder::new();
        let first_inputs: indexmap::IndexMap<String, Value> = [("value".to_string(), Value::literal(1))].into_iter().collect();
        let first = builder.add_tool("echo", first_inputs, Some("first".into()), None);
        let second_inputs: indexmap::IndexMap<String, Value> =
            [("value".to_string(), Value::variable_path("first", "value"))].into_iter().collect();
        let second = builder.add_tool("echo", second_inputs, None, None);
        let seq = builder.add_sequence(vec![first, second], None);
        builder.set_entry_point(seq);
        let (ir, _) = builder.build(&*registry, chrono::Utc::now()).unwrap();

        let scheduler = Scheduler::new(registry, 4, ExecutionId::v4());
        let outcome = scheduler.run(&ir, Json::Null).await.unwrap();
        match outcome {
            ExecutionOutcome::Completed(output) => assert_eq!(output, serde_json::json!({"value": 1})),
            ExecutionOutcome::Suspended(_) => panic!("expected completion"),
        }
    }

    #[test]
    fn permissive_catalog_accepts_any_tool_for_builder_tests() {
        assert!(PermissiveToolCatalog.contains_tool("anything"));
    }

    #[tokio::test]
    async fn tool_completion_also_sets_state_under_its_tool_id() {
        let registry = registry_with(Echo(ToolMetadata::new("echo", "Echo", "")));
        let mut builder = IrBuilder::new();
        let inputs: indexmap::IndexMap<String, Value> = [("value".to_string(), Value::literal(7))].into_iter().collect();
        let tool = builder.add_tool("echo", inputs, None, None);
        builder.set_entry_point(tool);
        let (ir, _) = builder.build(&*registry, chrono::Utc::now()).unwrap();

        let scheduler = Scheduler::new(registry, 4, ExecutionId::v4());
        scheduler.run(&ir, Json::Null).await.unwrap();
        assert_eq!(scheduler.state.read().get("echo"), Some(&serde_json::json!({"value": 7})));
    }

    #[tokio::test]
    async fn seeded_resumed_output_short_circuits_the_tool_on_replay() {
        let registry = registry_with(SuspendingTool(ToolMetadata::new("ask", "Ask", "")));
        let mut builder = IrBuilder::new();
        let tool = builder.add_tool("ask", indexmap::IndexMap::new(), Some("answer".into()), None);
        builder.set_entry_point(tool);
        let (ir, _) = builder.build(&*registry, chrono::Utc::now()).unwrap();

        let execution_id = ExecutionId::v4();
        let scheduler = Scheduler::new(Arc::clone(&registry), 4, execution_id);
        let outcome = scheduler.run(&ir, Json::Null).await.unwrap();
        let ExecutionOutcome::Suspended(record) = outcome else { panic!("expected suspension") };

        let resumed = Scheduler::resume(registry, 4, execution_id, StateStore::new(), HashMap::new());
        resumed.seed_resumed_output(&ir, &record.step_id, serde_json::json!("yes"));
        let outcome = resumed.run(&ir, Json::Null).await.unwrap();
        match outcome {
            ExecutionOutcome::Completed(output) => assert_eq!(output, serde_json::json!("yes")),
            ExecutionOutcome::Suspended(_) => panic!("expected completion on replay"),
        }
        assert_eq!(resumed.state.read().get("answer"), Some(&serde_json::json!("yes")));
    }

    struct RenamingJoin;
    impl loomflow_registry::Join for RenamingJoin {
        fn producer_tool_id(&self) -> &str {
            "producer"
        }
        fn consumer_tool_id(&self) -> &str {
            "consumer"
        }
        fn decode(&self, producer_output: &Json) -> Result<Json, EngineError> {
            let body = producer_output.get("body").cloned().unwrap_or(Json::Null);
            Ok(serde_json::json!({ "text": body }))
        }
        fn encode(&self, consumer_input: &Json) -> Result<Json, EngineError> {
            let text = consumer_input.get("text").cloned().unwrap_or(Json::Null);
            Ok(serde_json::json!({ "body": text }))
        }
    }

    struct Consumer(ToolMetadata);
    #[async_trait]
    impl Tool for Consumer {
        fn metadata(&self) -> &ToolMetadata {
            &self.0
        }
        async fn execute(&self, input: Json) -> Result<Json, String> {
            Ok(input)
        }
    }

    #[tokio::test]
    async fn tool_with_no_inputs_resolves_via_registered_join() {
        let registry = Registry::new();
        registry.register_tool(Arc::new(Echo(ToolMetadata::new("producer", "Producer", "")))).unwrap();
        registry.register_tool(Arc::new(Consumer(ToolMetadata::new("consumer", "Consumer", "")))).unwrap();
        registry.register_join(Arc::new(RenamingJoin));
        let registry = Arc::new(registry);

        let mut builder = IrBuilder::new();
        let producer_inputs: indexmap::IndexMap<String, Value> =
            [("body".to_string(), Value::literal("hello"))].into_iter().collect();
        let producer = builder.add_tool("producer", producer_inputs, None, None);
        let consumer = builder.add_tool("consumer", indexmap::IndexMap::new(), None, None);
        let seq = builder.add_sequence(vec![producer, consumer], None);
        builder.set_entry_point(seq);
        let (ir, _) = builder.build(&*registry, chrono::Utc::now()).unwrap();

        let scheduler = Scheduler::new(registry, 4, ExecutionId::v4());
        let outcome = scheduler.run(&ir, Json::Null).await.unwrap();
        match outcome {
            ExecutionOutcome::Completed(output) => assert_eq!(output, serde_json::json!({"text": "hello"})),
            ExecutionOutcome::Suspended(_) => panic!("expected completion"),
        }
    }

    #[tokio::test]
    async fn conditional_node_records_condition_and_selected_branch() {
        let registry = registry_with(Echo(ToolMetadata::new("echo", "Echo", "")));
        let mut builder = IrBuilder::new();
        let then_inputs: indexmap::IndexMap<String, Value> = [("value".to_string(), Value::literal("then"))].into_iter().collect();
        let then_tool = builder.add_tool("echo", then_inputs, None, None);
        let conditional = builder.add_conditional(Condition::literal(true), vec![then_tool], None, None);
        builder.set_entry_point(conditional.clone());
        let (ir, _) = builder.build(&*registry, chrono::Utc::now()).unwrap();

        let scheduler = Scheduler::new(registry, 4, ExecutionId::v4());
        let outcome = scheduler.run(&ir, Json::Null).await.unwrap();
        match outcome {
            ExecutionOutcome::Completed(output) => {
                assert_eq!(output, serde_json::json!({"condition": true, "selectedBranch": "then"}));
            }
            ExecutionOutcome::Suspended(_) => panic!("expected completion"),
        }
        assert_eq!(scheduler.outputs.get(&conditional).map(|entry| entry.value().clone()), Some(serde_json::json!({"condition": true, "selectedBranch": "then"})));
    }

    struct FailingTool(ToolMetadata, String);
    #[async_trait]
    impl Tool for FailingTool {
        fn metadata(&self) -> &ToolMetadata {
            &self.0
        }
        async fn execute(&self, _input: Json) -> Result<Json, String> {
            Err(self.1.clone())
        }
    }

    struct SlowTool(ToolMetadata, Arc<std::sync::atomic::AtomicUsize>);
    #[async_trait]
    impl Tool for SlowTool {
        fn metadata(&self) -> &ToolMetadata {
            &self.0
        }
        async fn execute(&self, _input: Json) -> Result<Json, String> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            self.1.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(Json::Null)
        }
    }

    #[tokio::test]
    async fn all_strategy_cancels_still_running_siblings_on_first_failure() {
        let completed = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let registry = Registry::new();
        registry.register_tool(Arc::new(FailingTool(ToolMetadata::new("fails", "Fails", ""), "boom".into()))).unwrap();
        registry.register_tool(Arc::new(SlowTool(ToolMetadata::new("slow", "Slow", ""), Arc::clone(&completed)))).unwrap();
        let registry = Arc::new(registry);

        let mut builder = IrBuilder::new();
        let failing = builder.add_tool("fails", indexmap::IndexMap::new(), None, None);
        let slow = builder.add_tool("slow", indexmap::IndexMap::new(), None, None);
        let parallel = builder.add_parallel(vec![vec![failing], vec![slow]], loomflow_ir::JoinStrategy::All, None, None);
        builder.set_entry_point(parallel);
        let (ir, _) = builder.build(&*registry, chrono::Utc::now()).unwrap();

        let scheduler = Scheduler::new(registry, 4, ExecutionId::v4());
        let result = scheduler.run(&ir, Json::Null).await;
        assert!(result.is_err());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(completed.load(std::sync::atomic::Ordering::SeqCst), 0, "sibling branch should have been cancelled, not run to completion");
    }

    #[tokio::test]
    async fn race_all_fail_returns_the_first_observed_error() {
        let registry = Registry::new();
        registry.register_tool(Arc::new(FailingTool(ToolMetadata::new("a", "A", ""), "error-a".into()))).unwrap();
        registry.register_tool(Arc::new(FailingTool(ToolMetadata::new("b", "B", ""), "error-b".into()))).unwrap();
        let registry = Arc::new(registry);

        let mut builder = IrBuilder::new();
        let a = builder.add_tool("a", indexmap::IndexMap::new(), None, None);
        let b = builder.add_tool("b", indexmap::IndexMap::new(), None, None);
        let parallel = builder.add_parallel(vec![vec![a], vec![b]], loomflow_ir::JoinStrategy::Race, None, None);
        builder.set_entry_point(parallel);
        let (ir, _) = builder.build(&*registry, chrono::Utc::now()).unwrap();

        let scheduler = Scheduler::new(registry, 4, ExecutionId::v4());
        let error = scheduler.run(&ir, Json::Null).await.unwrap_err();
        assert!(error.to_string().contains("error-a"), "expected the first branch's error, got: {error}");
    }
}
