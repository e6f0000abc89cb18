//! Mock LLM client for testing.
//!
//! Replies are served from a script in order. Once the script runs out the
//! fallback reply is repeated, or an error is returned if there is none.
//! Every prompt is recorded for inspection.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::error::{MendError, Result};
use crate::llm::types::Message;
use crate::llm::LlmClient;

#[derive(Debug, Clone)]
enum Scripted {
    Reply(String),
    Failure(String),
}

/// Scripted LLM client.
#[derive(Debug, Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<Scripted>>,
    fallback: Option<String>,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a reply.
    pub fn with_reply(self, reply: impl Into<String>) -> Self {
        self.push(Scripted::Reply(reply.into()));
        self
    }

    /// Queues a reply wrapped in a fenced `sql` block.
    pub fn with_sql(self, sql: &str) -> Self {
        self.with_reply(format!("```sql\n{sql}\n```"))
    }

    /// Queues a transport failure.
    pub fn with_failure(self, message: impl Into<String>) -> Self {
        self.push(Scripted::Failure(message.into()));
        self
    }

    /// Reply used once the script is exhausted.
    pub fn with_fallback(mut self, reply: impl Into<String>) -> Self {
        self.fallback = Some(reply.into());
        self
    }

    fn push(&self, scripted: Scripted) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(scripted);
        }
    }

    /// Prompts received so far, one entry per call.
    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    /// Number of calls received so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|calls| calls.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String> {
        self.calls
            .lock()
            .map_err(|_| MendError::internal("mock call log poisoned"))?
            .push(messages.to_vec());

        let next = self
            .script
            .lock()
            .map_err(|_| MendError::internal("mock script poisoned"))?
            .pop_front();

        match next {
            Some(Scripted::Reply(reply)) => Ok(reply),
            Some(Scripted::Failure(message)) => Err(MendError::llm(message)),
            None => self
                .fallback
                .clone()
                .ok_or_else(|| MendError::llm("Mock LLM script exhausted")),
        }
    }
}
