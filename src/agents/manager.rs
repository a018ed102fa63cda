//! Lazy agent construction and uniform streaming invocation.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use futures::{Stream, StreamExt};

use crate::agent::CancelToken;
use crate::ai::StreamingClient;
use crate::tools::ToolInvoker;

use super::builtin::{
    builtin_descriptors, Agent, ExecutorAgent, PlannerAgent, ReviewerAgent,
};
use super::descriptor::{AgentDescriptor, AgentTask};

/// Dependencies injected into agent constructors.
pub struct AgentDeps {
    pub provider: Arc<dyn StreamingClient>,
    pub invoker: Arc<ToolInvoker>,
    pub model: String,
}

/// Lazily constructs agents from descriptors and exposes one uniform
/// streaming invocation method.  Construction failures are reported once
/// and cached.
pub struct AgentManager {
    deps: AgentDeps,
    descriptors: Vec<AgentDescriptor>,
    cache: Mutex<HashMap<String, Arc<dyn Agent>>>,
    failed: Mutex<HashMap<String, String>>,
}

impl AgentManager {
    pub fn new(deps: AgentDeps) -> Self {
        Self {
            deps,
            descriptors: builtin_descriptors(),
            cache: Mutex::new(HashMap::new()),
            failed: Mutex::new(HashMap::new()),
        }
    }

    pub fn descriptors(&self) -> &[AgentDescriptor] {
        &self.descriptors
    }

    pub fn descriptor(&self, name: &str) -> Option<&AgentDescriptor> {
        self.descriptors.iter().find(|d| d.name == name)
    }

    /// Fetch or construct an agent.  A constructor failure is cached so it
    /// is only diagnosed once per session.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Agent>, String> {
        if let Ok(cache) = self.cache.lock() {
            if let Some(agent) = cache.get(name) {
                return Ok(Arc::clone(agent));
            }
        }
        if let Ok(failed) = self.failed.lock() {
            if let Some(error) = failed.get(name) {
                return Err(error.clone());
            }
        }

        let constructed = self.construct(name);
        match constructed {
            Ok(agent) => {
                if let Ok(mut cache) = self.cache.lock() {
                    cache.insert(name.to_string(), Arc::clone(&agent));
                }
                Ok(agent)
            }
            Err(error) => {
                tracing::error!("agent '{name}' failed to construct: {error}");
                if let Ok(mut failed) = self.failed.lock() {
                    failed.insert(name.to_string(), error.clone());
                }
                Err(error)
            }
        }
    }

    fn construct(&self, name: &str) -> Result<Arc<dyn Agent>, String> {
        let descriptor = self
            .descriptor(name)
            .ok_or_else(|| format!("unknown agent '{name}'"))?
            .clone();
        let agent: Arc<dyn Agent> = match descriptor.constructor.as_str() {
            "reviewer" => Arc::new(ReviewerAgent::new(
                descriptor,
                Arc::clone(&self.deps.provider),
                self.deps.model.clone(),
            )),
            "planner" => Arc::new(PlannerAgent::new(
                descriptor,
                Arc::clone(&self.deps.provider),
                self.deps.model.clone(),
            )),
            "executor" => Arc::new(ExecutorAgent::new(
                descriptor,
                Arc::clone(&self.deps.provider),
                Arc::clone(&self.deps.invoker),
                self.deps.model.clone(),
            )),
            other => {
                return Err(format!("no constructor registered for '{other}'"));
            }
        };
        Ok(agent)
    }

    /// Construct a planner directly (used by plan gating).
    pub fn planner(&self) -> Result<Arc<PlannerAgent>, String> {
        let descriptor = self
            .descriptor("planner")
            .ok_or("planner descriptor missing")?
            .clone();
        Ok(Arc::new(PlannerAgent::new(
            descriptor,
            Arc::clone(&self.deps.provider),
            self.deps.model.clone(),
        )))
    }

    /// Invoke an agent and normalize its chunks to display strings.
    pub async fn invoke(
        &self,
        name: &str,
        task: AgentTask,
        cancel: CancelToken,
    ) -> Result<Pin<Box<dyn Stream<Item = String> + Send>>, String> {
        let agent = self.get(name)?;
        let chunks = agent.stream(task, cancel).await;
        let rendered = chunks.filter_map(|chunk| async move {
            let text = chunk.render();
            (!text.is_empty()).then_some(text)
        });
        Ok(Box::pin(rendered))
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
