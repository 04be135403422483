//! Capabilities and the registry that resolves them.
//!
//! A capability is the domain behavior behind a step: it receives a read-only
//! snapshot of the mission, phase and step and returns a
//! [`CapabilityResult`]. Status transitions, logging, progress and events
//! belong to the engine; capabilities never see the store or the bus.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use mission_core::{CapabilityId, MissionDefinition, MissionRun, PhaseRun, StepRun, StepStatus};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Snapshot handed to a capability.
#[derive(Debug, Clone)]
pub struct CapabilityContext {
    pub mission: MissionRun,
    pub phase: PhaseRun,
    pub step: StepRun,
}

impl CapabilityContext {
    pub fn objective(&self) -> &str {
        &self.mission.definition.objective
    }

    pub fn input(&self) -> Option<&serde_json::Value> {
        self.step.definition.input.as_ref()
    }

    /// Boolean flag from the step input, false when absent.
    pub fn input_flag(&self, key: &str) -> bool {
        self.input()
            .and_then(|input| input.get(key))
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }
}

/// What a capability reports back to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct CapabilityResult {
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "typescript", ts(type = "unknown"))]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub require_approval: bool,
}

impl CapabilityResult {
    fn with_status(status: StepStatus) -> Self {
        Self {
            status,
            logs: Vec::new(),
            output: None,
            error_message: None,
            require_approval: false,
        }
    }

    pub fn completed() -> Self {
        Self::with_status(StepStatus::Completed)
    }

    pub fn failed(message: impl Into<String>) -> Self {
        let mut result = Self::with_status(StepStatus::Failed);
        result.error_message = Some(message.into());
        result
    }

    pub fn waiting_human() -> Self {
        Self::with_status(StepStatus::WaitingHuman)
    }

    pub fn skipped() -> Self {
        Self::with_status(StepStatus::Skipped)
    }

    pub fn with_output(mut self, output: serde_json::Value) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_log(mut self, line: impl Into<String>) -> Self {
        self.logs.push(line.into());
        self
    }

    pub fn requiring_approval(mut self) -> Self {
        self.require_approval = true;
        self
    }
}

#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("{0}")]
    Failed(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl CapabilityError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Behavior bound to an agent id and action.
#[async_trait]
pub trait Capability: Send + Sync {
    fn id(&self) -> CapabilityId;

    async fn execute(
        &self,
        ctx: &CapabilityContext,
    ) -> Result<CapabilityResult, CapabilityError>;
}

/// Capability backed by an async closure. See [`from_fn`].
pub struct FnCapability<F> {
    id: CapabilityId,
    handler: F,
}

/// Wrap an async closure as a capability.
///
/// ```ignore
/// let cap = from_fn(CapabilityId::new("kai", "noop"), |_ctx| async {
///     Ok(CapabilityResult::completed())
/// });
/// engine.register_capability(Arc::new(cap));
/// ```
pub fn from_fn<F, Fut>(id: CapabilityId, handler: F) -> FnCapability<F>
where
    F: Fn(CapabilityContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<CapabilityResult, CapabilityError>> + Send + 'static,
{
    FnCapability { id, handler }
}

#[async_trait]
impl<F, Fut> Capability for FnCapability<F>
where
    F: Fn(CapabilityContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<CapabilityResult, CapabilityError>> + Send + 'static,
{
    fn id(&self) -> CapabilityId {
        self.id.clone()
    }

    async fn execute(
        &self,
        ctx: &CapabilityContext,
    ) -> Result<CapabilityResult, CapabilityError> {
        (self.handler)(ctx.clone()).await
    }
}

/// Handlers keyed by `"<agentId>.<action>"`.
#[derive(Default)]
pub struct CapabilityRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn Capability>>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability, replacing any earlier one with the same key.
    /// Returns the replaced capability.
    pub fn register(&self, capability: Arc<dyn Capability>) -> Option<Arc<dyn Capability>> {
        let key = capability.id().to_string();
        let previous = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone(), capability);

        if previous.is_some() {
            warn!(capability = %key, "Capability replaced by a later registration");
        } else {
            debug!(capability = %key, "Capability registered");
        }
        previous
    }

    pub fn resolve(&self, key: &str) -> Option<Arc<dyn Capability>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn contains(&self, id: &CapabilityId) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id.to_string())
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Capabilities a definition references that are not registered.
    pub fn missing(&self, definition: &MissionDefinition) -> Vec<CapabilityId> {
        definition
            .capability_ids()
            .into_iter()
            .filter(|id| !self.contains(id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("capabilities", &self.keys())
            .finish()
    }
}
