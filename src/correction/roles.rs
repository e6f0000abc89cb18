//! The three LLM roles: Generator, Repairer and Reviewer.
//!
//! Each role builds its prompt, calls the shared client once and parses the
//! reply. None of them loops or keeps state between calls.

use std::sync::Arc;
use tracing::debug;

use crate::db::{QueryResult, Schema};
use crate::error::Result;
use crate::llm::{
    build_generation_messages, build_repair_messages, build_review_messages, parse_llm_response,
    prompt_chars, CandidateKind, LlmClient, RepairContext, REVIEW_PREVIEW_ROWS,
};
use crate::memory::ErrorMemoryRecord;

/// What a Generator or Repairer reply yielded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Proposal {
    /// Code to validate and execute.
    Candidate(CandidateKind, String),
    /// The reply held no usable code; carries the reply text.
    NoCandidate(String),
}

impl Proposal {
    fn from_reply(reply: &str) -> Self {
        let parsed = parse_llm_response(reply);
        match parsed.code {
            Some((kind, code)) => Self::Candidate(kind, code),
            None => Self::NoCandidate(parsed.text),
        }
    }
}

/// Produces the first candidate for a question.
#[derive(Clone)]
pub struct Generator {
    llm: Arc<dyn LlmClient>,
}

impl Generator {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn propose(
        &self,
        schema: &Schema,
        dialect: &str,
        context_names: &[String],
        question: &str,
    ) -> Result<Proposal> {
        let messages = build_generation_messages(schema, dialect, context_names, question);
        debug!(prompt_chars = prompt_chars(&messages), "Generator prompt built");

        let reply = self.llm.complete(&messages).await?;
        Ok(Proposal::from_reply(&reply))
    }
}

/// Rewrites a failed candidate using the error and memory hints.
#[derive(Clone)]
pub struct Repairer {
    llm: Arc<dyn LlmClient>,
}

impl Repairer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn repair(
        &self,
        schema: &Schema,
        dialect: &str,
        context_names: &[String],
        context: &RepairContext<'_>,
        hints: &[ErrorMemoryRecord],
    ) -> Result<Proposal> {
        let messages = build_repair_messages(schema, dialect, context_names, context, hints);
        debug!(
            prompt_chars = prompt_chars(&messages),
            hints = hints.len(),
            "Repairer prompt built"
        );

        let reply = self.llm.complete(&messages).await?;
        Ok(Proposal::from_reply(&reply))
    }
}

/// The Reviewer's opinion of a successful result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewVerdict {
    Approve,
    Reject(String),
}

/// Judges whether a successful result answers the question.
#[derive(Clone)]
pub struct Reviewer {
    llm: Arc<dyn LlmClient>,
}

impl Reviewer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn review(
        &self,
        question: &str,
        sql: &str,
        rows: &QueryResult,
    ) -> Result<ReviewVerdict> {
        let preview = rows.preview(REVIEW_PREVIEW_ROWS);
        let messages = build_review_messages(question, sql, &preview);
        debug!(prompt_chars = prompt_chars(&messages), "Reviewer prompt built");

        let reply = self.llm.complete(&messages).await?;
        Ok(parse_review(&reply))
    }
}

/// Anything that does not open with REJECT counts as approval.
fn parse_review(reply: &str) -> ReviewVerdict {
    let trimmed = reply.trim();
    let upper = trimmed.to_ascii_uppercase();
    if !upper.starts_with("REJECT") {
        return ReviewVerdict::Approve;
    }

    let reason = trimmed["REJECT".len()..]
        .trim_start_matches(|c: char| c == ':' || c.is_whitespace())
        .trim();
    if reason.is_empty() {
        ReviewVerdict::Reject("result does not answer the question".to_string())
    } else {
        ReviewVerdict::Reject(reason.to_string())
    }
}
