//! Scripted upstream transport for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

use super::{Payload, UpstreamError, UpstreamTransport};

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum Step {
    Reply(Result<Payload, UpstreamError>),
    /// Sleep before replying, to exercise timeouts
    Stall(Duration, Result<Payload, UpstreamError>),
}

/// Replays scripted replies in order, repeating the last one forever, and
/// records when each call started.
pub struct ScriptedTransport {
    steps: Mutex<VecDeque<Step>>,
    last: Mutex<Option<Step>>,
    calls: Mutex<Vec<(Instant, String)>>,
}

impl ScriptedTransport {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            last: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn always(reply: Result<Payload, UpstreamError>) -> Self {
        Self::new(vec![Step::Reply(reply)])
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().iter().map(|(at, _)| *at).collect()
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(_, e)| e.clone()).collect()
    }

    fn next_step(&self) -> Step {
        let mut steps = self.steps.lock();
        let mut last = self.last.lock();
        if let Some(step) = steps.pop_front() {
            *last = Some(step.clone());
            step
        } else {
            last.clone()
                .unwrap_or(Step::Reply(Err(UpstreamError::Network("no script".into()))))
        }
    }
}

#[async_trait]
impl UpstreamTransport for ScriptedTransport {
    async fn send(
        &self,
        endpoint: &str,
        _params: &BTreeMap<String, String>,
    ) -> Result<Payload, UpstreamError> {
        self.calls.lock().push((Instant::now(), endpoint.to_string()));
        match self.next_step() {
            Step::Reply(reply) => reply,
            Step::Stall(delay, reply) => {
                tokio::time::sleep(delay).await;
                reply
            }
        }
    }
}
