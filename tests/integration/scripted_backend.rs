//! Scripted backend for integration testing.
//!
//! Provides a deterministic `ChatBackend` that answers from a script,
//! counts calls, tracks peak concurrency and can be slowed down per batch,
//! all in-memory with no network.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ctr_studio::llm::{ChatBackend, ChatMessage};

/// How the backend answers a batch of `n` profiles.
#[derive(Debug, Clone)]
pub enum Reply {
    /// `[1,0,1,0,...]` with exactly `n` entries.
    Alternating,
    /// `n` copies of one decision.
    All(u8),
    /// 1 for each listed person whose age is odd. Ties every decision to
    /// its profile, so misordered batches are detectable.
    AgeParity,
    /// Fixed raw text regardless of batch size.
    Raw(String),
    /// Transport failure.
    Fail(String),
}

pub struct ScriptedBackend {
    default_reply: Reply,
    /// Per-call overrides, consumed in call order.
    queued: Mutex<Vec<Reply>>,
    /// Extra latency for a call, by call index.
    delay: Box<dyn Fn(usize) -> Duration + Send + Sync>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new(default_reply: Reply) -> Self {
        Self {
            default_reply,
            queued: Mutex::new(Vec::new()),
            delay: Box::new(|_| Duration::ZERO),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Replies for the first calls, in order; later calls use the default.
    pub fn with_queue(self, replies: Vec<Reply>) -> Self {
        *self.queued.lock().unwrap() = replies.into_iter().rev().collect();
        self
    }

    pub fn with_delay(mut self, delay: impl Fn(usize) -> Duration + Send + Sync + 'static) -> Self {
        self.delay = Box::new(delay);
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

/// Number of people the prompt asks about, read from its `PEOPLE (n):` header.
pub fn people_in_prompt(prompt: &str) -> usize {
    prompt
        .split("PEOPLE (")
        .nth(1)
        .and_then(|rest| rest.split(')').next())
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

fn render(reply: &Reply, prompt: &str) -> Result<String> {
    let n = people_in_prompt(prompt);
    let values: Vec<String> = match reply {
        Reply::Alternating => (0..n).map(|i| ((i + 1) % 2).to_string()).collect(),
        Reply::All(v) => vec![v.to_string(); n],
        Reply::AgeParity => ages_in_prompt(prompt).iter().map(|a| (a % 2).to_string()).collect(),
        Reply::Raw(text) => return Ok(text.clone()),
        Reply::Fail(msg) => return Err(anyhow!(msg.clone())),
    };
    Ok(format!("[{}]", values.join(",")))
}

/// Ages of the numbered people in a prompt, in listed order.
pub fn ages_in_prompt(prompt: &str) -> Vec<u32> {
    prompt
        .lines()
        .filter(|line| line.contains(". gender="))
        .filter_map(|line| {
            let rest = line.split(", age=").nth(1)?;
            rest.split(',').next()?.trim().parse().ok()
        })
        .collect()
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn complete(&self, _model: &str, messages: &[ChatMessage]) -> Result<String> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        let prompt = messages.last().map(|m| m.content.clone()).unwrap_or_default();
        let reply = self
            .queued
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| self.default_reply.clone());
        self.prompts.lock().unwrap().push(prompt.clone());

        let delay = (self.delay)(index);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        render(&reply, &prompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_people_in_prompt() {
        assert_eq!(people_in_prompt("AD TEXT: x\nPEOPLE (17):\n1. ..."), 17);
        assert_eq!(people_in_prompt("no header"), 0);
    }

    #[test]
    fn test_ages_in_prompt() {
        let prompt = "PEOPLE (2):\n1. gender=male, age=41, region=X\n2. gender=female, age=28, region=Y\n";
        assert_eq!(ages_in_prompt(prompt), vec![41, 28]);
        assert_eq!(render(&Reply::AgeParity, prompt).unwrap(), "[1,0]");
    }

    #[tokio::test]
    async fn test_queue_then_default() {
        let backend = ScriptedBackend::new(Reply::All(0))
            .with_queue(vec![Reply::Raw("hello".into()), Reply::Fail("boom".into())]);
        let msgs = vec![ChatMessage::user("PEOPLE (3):")];
        assert_eq!(backend.complete("m", &msgs).await.unwrap(), "hello");
        assert!(backend.complete("m", &msgs).await.is_err());
        assert_eq!(backend.complete("m", &msgs).await.unwrap(), "[0,0,0]");
        assert_eq!(backend.calls(), 3);
    }
}
