//! [`Engine`]: the public facade wiring the registry, scheduler,
//! and persistence layer together behind a single API surface.
//!
//! Everything here composes crates that each know how to do one thing —
//! this module owns none of the hard logic itself, only how the pieces
//! are assembled and tracked across a flow's lifetime. The shape mirrors
//! how a host program is expected to use this engine: build or compile a
//! flow once, then run/stream/resume it any number of times.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use dashmap::DashMap;
use loomflow_core::{ExecutionId, NodeId};
use loomflow_error::{EncryptionError, EngineError, ExecutionError};
use loomflow_ir::{Ir, IrBuilder};
use loomflow_persistence::{CleanupCriteria, KeySource, Keyring, Persistence, StoredRecord};
use loomflow_registry::{Registry, Tool, ToolMetadata};
use loomflow_scheduler::{Event, ExecutionOutcome, Scheduler, SuspensionContext};
use loomflow_state::StateSnapshot;
use serde_json::Value as Json;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::EngineConfig;
use crate::stats::EngineStats;

/// What a run, stream, or resume produced.
#[derive(Debug, Clone)]
pub enum FlowOutcome {
    /// The flow ran to completion.
    Completed(Json),
    /// The flow paused; `suspension_key` is what a caller passes back to
    /// [`Engine::resume`].
    Suspended { suspension_key: String, context: SuspensionContext },
}

/// A running flow observed through its event stream, returned by
/// [`Engine::run_stream`]. Drop the receiver to stop listening; the
/// underlying execution keeps running regardless.
pub struct FlowStream {
    pub execution_id: ExecutionId,
    pub events: broadcast::Receiver<Event>,
    pub result: JoinHandle<Result<FlowOutcome, EngineError>>,
}

/// The workflow orchestration engine: a tool registry, a persistence
/// pipeline, and the executions currently in flight, all behind one
/// handle a host program can clone and share freely (every field is
/// itself reference-counted).
#[derive(Clone)]
pub struct Engine {
    registry: Arc<Registry>,
    persistence: Arc<Persistence>,
    config: EngineConfig,
    executions: Arc<DashMap<ExecutionId, Arc<Scheduler>>>,
    started_at: Arc<Instant>,
}

impl Engine {
    /// Assemble an engine from its components. Building the registry and
    /// persistence pipeline is left to the caller (pluggable
    /// backend and its tool registration happen before this point).
    #[must_use]
    pub fn new(registry: Arc<Registry>, persistence: Arc<Persistence>, config: EngineConfig) -> Self {
        Self {
            registry,
            persistence,
            config,
            executions: Arc::new(DashMap::new()),
            started_at: Arc::new(Instant::now()),
        }
    }

    /// This engine's configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ---- tool register/unregister/list ----

    pub fn register_tool(&self, tool: Arc<dyn Tool>) -> Result<(), EngineError> {
        self.registry.register_tool(tool)
    }

    pub fn unregister_tool(&self, tool_id: &str) -> Option<Arc<dyn Tool>> {
        self.registry.unregister_tool(tool_id)
    }

    #[must_use]
    pub fn list_tools(&self) -> Vec<ToolMetadata> {
        self.registry.list_tools()
    }

    // ---- flow build / validate ----

    /// Decode a flow-definition JSON document into a validated
    /// [`Ir`], checking every `Tool` node's `tool_id` against this
    /// engine's registry.
    pub fn compile_flow(&self, raw: &Json) -> Result<(Ir, Vec<String>), EngineError> {
        loomflow_ir::compile(raw, self.registry.as_ref(), Utc::now())
    }

    /// Finish an in-process [`IrBuilder`], validating against this
    /// engine's registry.
    pub fn build_flow(&self, builder: IrBuilder) -> Result<(Ir, Vec<String>), EngineError> {
        builder.build(self.registry.as_ref(), Utc::now())
    }

    /// Re-run structural validation against this engine's current
    /// registry contents (a flow compiled against one registry state may
    /// no longer validate after tools are unregistered).
    pub fn validate_flow(&self, ir: &Ir) -> Result<Vec<String>, EngineError> {
        ir.graph.validate(self.registry.as_ref()).map_err(Into::into)
    }

    // ---- flow run (collect / stream), resume, cancel ----

    /// Run `ir` to completion or suspension, blocking until either
    /// happens. Use [`Self::run_stream`] to observe progress events as
    /// they occur instead of only the terminal result.
    pub async fn run(&self, ir: &Ir, input: Json) -> Result<FlowOutcome, EngineError> {
        let execution_id = ExecutionId::v4();
        let scheduler = Arc::new(Scheduler::new(Arc::clone(&self.registry), self.config.execution.concurrency, execution_id));
        self.executions.insert(execution_id, Arc::clone(&scheduler));
        let outcome = scheduler.run(ir, input).await;
        let result = self.finish(execution_id, &scheduler, outcome).await;
        self.executions.remove(&execution_id);
        result
    }

    /// Run `ir` in a spawned task, returning immediately with its event
    /// stream and a handle to its terminal result.
    pub fn run_stream(&self, ir: Ir, input: Json) -> FlowStream {
        let execution_id = ExecutionId::v4();
        let scheduler = Arc::new(Scheduler::new(Arc::clone(&self.registry), self.config.execution.concurrency, execution_id));
        let events = scheduler.subscribe();
        self.executions.insert(execution_id, Arc::clone(&scheduler));

        let engine = self.clone();
        let result = tokio::spawn(async move {
            let outcome = scheduler.run(&ir, input).await;
            let result = engine.finish(execution_id, &scheduler, outcome).await;
            engine.executions.remove(&execution_id);
            result
        });

        FlowStream { execution_id, events, result }
    }

    /// Turn a [`Scheduler`] result into the engine-level [`FlowOutcome`],
    /// persisting the suspension record (and the `FlowSuspended` event
    /// the scheduler itself cannot emit, since only the facade knows the
    /// key once the record is durably stored).
    async fn finish(&self, execution_id: ExecutionId, scheduler: &Scheduler, outcome: Result<ExecutionOutcome, EngineError>) -> Result<FlowOutcome, EngineError> {
        match outcome? {
            ExecutionOutcome::Completed(output) => Ok(FlowOutcome::Completed(output)),
            ExecutionOutcome::Suspended(record) => {
                let context = record.suspension_context.clone();
                let key = self.persistence.suspend(&record).await?;
                scheduler.emit_event(Event::FlowSuspended { execution_id, suspension_key: key.as_str().to_owned() });
                Ok(FlowOutcome::Suspended { suspension_key: key.as_str().to_owned(), context })
            }
        }
    }

    /// Resume a previously suspended execution: reconstitute its state
    /// from `raw_key`, seed the suspended node's output with
    /// `resume_value`, and continue running `ir` from its entry point
    /// (already-completed nodes short-circuit via the scheduler's
    /// memoization rather than re-running).
    pub async fn resume(&self, raw_key: &str, resume_value: Json, ir: &Ir) -> Result<FlowOutcome, EngineError> {
        let record = self.persistence.resume(raw_key).await?;
        let mut state = loomflow_state::StateStore::new();
        state.restore(record.variables);
        let original_input = state.get("input").cloned().unwrap_or(Json::Null);

        let scheduler = Arc::new(Scheduler::resume(
            Arc::clone(&self.registry),
            self.config.execution.concurrency,
            record.execution_id,
            state,
            record.per_node_output,
        ));
        scheduler.seed_resumed_output(ir, &record.step_id, resume_value);

        self.executions.insert(record.execution_id, Arc::clone(&scheduler));
        let outcome = scheduler.run(ir, original_input).await;
        let outcome = self.finish(record.execution_id, &scheduler, outcome).await;
        self.executions.remove(&record.execution_id);
        if outcome.is_ok() {
            if let Err(error) = self.persistence.delete(raw_key).await {
                // Secondary failure during cleanup must not fail the
                // primary resume.
                tracing::warn!(key = raw_key, error = %error, "failed to delete resumed suspension record");
            }
        }
        outcome
    }

    /// Request cancellation of a currently-running (not suspended, not
    /// finished) execution.
    pub fn cancel(&self, execution_id: ExecutionId) -> Result<(), EngineError> {
        let scheduler = self
            .executions
            .get(&execution_id)
            .ok_or_else(|| ExecutionError::Failed { node_id: NodeId::from("-"), node_type: "execution".into(), message: format!("execution '{execution_id}' is not running") })?;
        scheduler.cancel();
        Ok(())
    }

    // ---- list suspended / cleanup suspended ----

    pub async fn list_suspended(&self, offset: Option<usize>, limit: Option<usize>) -> Result<Vec<StoredRecord>, EngineError> {
        self.persistence.list_suspended(offset, limit).await
    }

    pub async fn cleanup_suspended(&self, criteria: CleanupCriteria) -> Result<usize, EngineError> {
        self.persistence.cleanup_suspended(criteria).await
    }

    // ---- get stats ----

    #[must_use]
    pub fn get_stats(&self) -> EngineStats {
        EngineStats {
            running_executions: self.executions.len(),
            registered_tools: self.registry.list_tools().len(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
        }
    }

    // ---- state get/set/snapshot/restore ----
    //
    // These act on a currently-running execution's live variable store;
    // once an execution completes or suspends it is no longer tracked
    // and these return "not running" like `cancel` does.

    pub fn state_get(&self, execution_id: ExecutionId, name: &str) -> Result<Option<Json>, EngineError> {
        Ok(self.require_running(execution_id)?.state_get(name))
    }

    pub fn state_set(&self, execution_id: ExecutionId, name: impl Into<String>, value: Json) -> Result<(), EngineError> {
        self.require_running(execution_id)?.state_set(name, value);
        Ok(())
    }

    pub fn state_snapshot(&self, execution_id: ExecutionId) -> Result<StateSnapshot, EngineError> {
        Ok(self.require_running(execution_id)?.state_snapshot())
    }

    pub fn state_restore(&self, execution_id: ExecutionId, snapshot: StateSnapshot) -> Result<(), EngineError> {
        self.require_running(execution_id)?.state_restore(snapshot);
        Ok(())
    }

    fn require_running(&self, execution_id: ExecutionId) -> Result<Arc<Scheduler>, EngineError> {
        self.executions
            .get(&execution_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| ExecutionError::Failed { node_id: NodeId::from("-"), node_type: "execution".into(), message: format!("execution '{execution_id}' is not running") }.into())
    }
}

/// Read `ENCRYPTION_KEY` (base64-encoded 32 bytes) and build a
/// single-version [`Keyring`] from it, if present and well-formed.
pub fn keyring_from_env() -> Result<Option<Keyring>, EngineError> {
    let Ok(encoded) = std::env::var("ENCRYPTION_KEY") else {
        return Ok(None);
    };
    let decoded = BASE64.decode(encoded.as_bytes()).map_err(|e| EncryptionError(format!("ENCRYPTION_KEY is not valid base64: {e}")))?;
    let key: [u8; 32] = decoded.try_into().map_err(|v: Vec<u8>| EncryptionError(format!("ENCRYPTION_KEY must decode to 32 bytes, got {}", v.len())))?;
    Ok(Some(Keyring::single(&KeySource::Raw(key))))
}
