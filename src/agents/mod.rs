//! Agents: descriptors, intent routing, lazy management, and the
//! normalized chunk taxonomy.

pub mod builtin;
pub mod chunk;
pub mod descriptor;
pub mod manager;
pub mod router;

pub use builtin::{builtin_descriptors, Agent, ChunkStream, ExecutorAgent, PlannerAgent, ReviewerAgent};
pub use chunk::StreamingChunk;
pub use descriptor::{permits, AgentDescriptor, AgentResponse, AgentTask, Capability};
pub use manager::{AgentDeps, AgentManager};
pub use router::{builtin_table, AgentPatterns, IntentRouter, RouteDecision};
