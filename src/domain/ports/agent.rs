//! Agent execution and persona lookup ports.
//!
//! The LLM-backed agent executor lives outside this crate; the scheduler only
//! needs to hand it a command and read back the final text.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::AgentCommand;

/// Runs one agent command to completion and returns the final response text.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn run(&self, command: AgentCommand) -> DomainResult<String>;
}

/// A stored persona; only the system prompt is consumed here.
#[derive(Debug, Clone)]
pub struct Persona {
    pub id: String,
    pub system_prompt: String,
}

/// Persona lookup for AGENT jobs.
#[async_trait]
pub trait PersonaStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> DomainResult<Option<Persona>>;

    /// The platform-wide default persona, if one is configured.
    async fn default_persona(&self) -> DomainResult<Option<Persona>>;
}
