//! Capability for the action-dispatch script backend.
//!
//! The shell owns the actual HTTP POST and the per-attempt timeout; the
//! core hands it a sealed envelope and gets back a `ScriptResult`. Retry
//! scheduling stays in the core (see `transport`), so from the shell's
//! point of view every request is a single attempt.

use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::transport::{ScriptAction, ScriptEnvelope, ScriptResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScriptRequest {
    pub envelope: ScriptEnvelope,
    pub timeout_ms: u64,
    pub request_id: String,
}

impl ScriptRequest {
    #[must_use]
    pub fn new(action: ScriptAction, data: serde_json::Value, timeout_ms: u64) -> Self {
        Self {
            envelope: ScriptEnvelope::new(action, data),
            timeout_ms,
            request_id: Uuid::new_v4().to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ScriptOperation {
    Execute(ScriptRequest),
}

impl Operation for ScriptOperation {
    type Output = ScriptResult;
}

pub struct Script<E> {
    context: CapabilityContext<ScriptOperation, E>,
}

impl<Ev> Capability<Ev> for Script<Ev> {
    type Operation = ScriptOperation;
    type MappedSelf<MappedEv> = Script<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static,
    {
        Script::new(self.context.map_event(f))
    }
}

impl<E> Script<E> {
    pub fn new(context: CapabilityContext<ScriptOperation, E>) -> Self {
        Self { context }
    }
}

impl<E> Script<E>
where
    E: Send + 'static,
{
    /// One attempt against the backend; the callback fires with the
    /// shell-reported outcome.
    pub fn execute<F>(&self, request: ScriptRequest, callback: F)
    where
        F: FnOnce(ScriptResult) -> E + Send + 'static,
    {
        let ctx = self.context.clone();
        self.context.spawn(async move {
            let result = ctx
                .request_from_shell(ScriptOperation::Execute(request))
                .await;
            ctx.update_app(callback(result));
        });
    }
}
