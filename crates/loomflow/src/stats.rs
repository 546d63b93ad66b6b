//! Point-in-time counters exposed through [`crate::engine::Engine::get_stats`].

/// A snapshot of engine-wide counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStats {
    /// Executions currently running (not suspended, not finished).
    pub running_executions: usize,
    /// Tools currently registered.
    pub registered_tools: usize,
    /// Seconds since this engine instance was constructed.
    pub uptime_seconds: u64,
}
