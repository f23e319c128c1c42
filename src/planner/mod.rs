//! Planner — given Feedback, iteration memory, and schema, emits the next
//! [`Action`].
//!
//! Two implementations share one [`Planner`] trait seam: [`LlmPlanner`]
//! calls out to a real [`LlmClient`]; [`RuleBasedPlanner`] is a
//! deterministic "mode switch" used in tests and CI so the whole agent loop
//! runs without a live LLM.

pub mod action;
pub mod parse;
pub mod prompt;

use crate::error::{AgentError, Result};
use action::Action;
use async_trait::async_trait;
use prompt::PlannerContext;
use tracing::{debug, warn};

/// Extended-reasoning budget in opaque tokens. Orthogonal to correctness;
/// does not change the response schema.
pub const DEFAULT_REASONING_TOKENS: u32 = 8_000;

/// A black-box text-in/JSON-out LLM collaborator. Any implementation
/// honouring this contract satisfies the Planner.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send `prompt` to the model and return its raw text response.
    /// `reasoning_tokens` is passed through as an opaque hint only.
    async fn complete(&self, prompt: &str, reasoning_tokens: u32) -> Result<String>;
}

/// An HTTP-backed [`LlmClient`] speaking a simple `{prompt, max_tokens}` ->
/// `{text}` JSON protocol against an external LLM service.
pub struct HttpLlmClient {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpLlmClient {
    /// Build a client targeting `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, prompt: &str, reasoning_tokens: u32) -> Result<String> {
        #[derive(serde::Serialize)]
        struct Request<'a> {
            prompt: &'a str,
            max_tokens: u32,
        }
        #[derive(serde::Deserialize)]
        struct Response {
            text: String,
        }

        let response = self
            .client
            .post(&self.endpoint)
            .json(&Request {
                prompt,
                max_tokens: reasoning_tokens,
            })
            .send()
            .await
            .map_err(|e| AgentError::Planner(format!("LLM request failed: {e}")))?;

        let parsed: Response = response
            .json()
            .await
            .map_err(|e| AgentError::Planner(format!("LLM response decode failed: {e}")))?;

        Ok(parsed.text)
    }
}

/// Emits the next Action given the current planning context.
#[async_trait]
pub trait Planner: Send + Sync {
    /// Produce the next Action for `ctx`.
    async fn plan(&self, ctx: &PlannerContext<'_>) -> Result<Action>;
}

/// LLM-backed Planner: builds the structured prompt, calls `client`, then
/// parses the response with the three-tier strategy.
pub struct LlmPlanner<C: LlmClient> {
    client: C,
    reasoning_tokens: u32,
}

impl<C: LlmClient> LlmPlanner<C> {
    /// Build a planner around `client` with the default reasoning budget.
    pub fn new(client: C) -> Self {
        Self {
            client,
            reasoning_tokens: DEFAULT_REASONING_TOKENS,
        }
    }

    /// Build a planner with an explicit reasoning-token budget.
    pub fn with_reasoning_tokens(client: C, reasoning_tokens: u32) -> Self {
        Self {
            client,
            reasoning_tokens,
        }
    }
}

#[async_trait]
impl<C: LlmClient> Planner for LlmPlanner<C> {
    async fn plan(&self, ctx: &PlannerContext<'_>) -> Result<Action> {
        let message = prompt::build(ctx);
        debug!(prompt_len = message.len(), "calling planner LLM");
        let response = self.client.complete(&message, self.reasoning_tokens).await?;
        let action = parse::parse_response(&response);
        if matches!(action, Action::Failed { .. }) {
            warn!("planner response could not be parsed into a usable action");
        }
        Ok(action)
    }
}

/// Deterministic Planner: maps Feedback straight onto an Action without any
/// LLM call, so the agent loop is hermetic in tests. Follows the same
/// learning directives as the LLM-backed planner.
#[derive(Debug, Clone, Default)]
pub struct RuleBasedPlanner;

#[async_trait]
impl Planner for RuleBasedPlanner {
    async fn plan(&self, ctx: &PlannerContext<'_>) -> Result<Action> {
        use crate::translator::Status;

        if ctx.feedback.status == Status::Pass {
            return Ok(Action::Done {
                rationale: ctx.feedback.reason.clone(),
            });
        }

        if ctx.feedback.status == Status::Error
            && ctx.feedback.reason.to_lowercase().contains("syntax")
        {
            return Ok(Action::RewriteQuery {
                new_sql: ctx.current_sql.join("; "),
                rationale: "repairing syntax error reported by EXPLAIN".to_string(),
                confidence: 0.5,
            });
        }

        let suggestion = ctx.feedback.suggestion.trim();

        if suggestion == "no action" {
            return Ok(Action::Failed {
                rationale: "no productive action remains".to_string(),
            });
        }

        let action = if let Some(table) = suggestion.strip_prefix("RUN_ANALYZE ") {
            Action::RunAnalyze {
                table: table.trim().to_string(),
                rationale: ctx.feedback.reason.clone(),
                confidence: 0.7,
            }
        } else if suggestion.to_uppercase().starts_with("CREATE INDEX") {
            Action::CreateIndex {
                ddl: suggestion.to_string(),
                rationale: ctx.feedback.reason.clone(),
                confidence: 0.9,
            }
        } else {
            Action::Failed {
                rationale: format!("no productive action remains for suggestion '{suggestion}'"),
            }
        };

        if ctx.memory.was_unproductive(&action.summarize()) {
            return Ok(Action::Failed {
                rationale: "previously tried this action without improvement".to_string(),
            });
        }

        Ok(action)
    }
}
