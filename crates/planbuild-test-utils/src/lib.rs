//! Testing utilities for planbuild workspace
//!
//! Shared fixtures and an instrumented edit service.

#![allow(missing_docs)]

use chrono::{DateTime, TimeZone, Utc};
use futures::StreamExt;
use parking_lot::Mutex;
use planbuild_core::{
    ActiveBuild, Auth, ComputeError, EditChunk, EditRequest, EditService, EditStream, PlanId,
    PlanKey, Replacement, StreamMessage,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};
use tokio_util::sync::CancellationToken;

pub fn plan_key() -> PlanKey {
    PlanKey::new(PlanId::new(), "main")
}

pub fn auth() -> Auth {
    Auth::new("org-1", "user-1")
}

pub fn build(path: &str, description: &str, content: &str) -> ActiveBuild {
    ActiveBuild::new(path, description, content).with_convo_message("msg-1")
}

/// 2024-01-01 at `hour`:00 UTC
pub fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap()
}

/// Drain everything currently buffered on a stream receiver
pub fn drain(rx: &mut broadcast::Receiver<StreamMessage>) -> Vec<StreamMessage> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(msg);
    }
    out
}

/// Paths of `finished=true` messages, in arrival order
pub fn finished_paths(messages: &[StreamMessage]) -> Vec<String> {
    messages
        .iter()
        .filter(|m| m.is_finished())
        .map(|m| m.path().to_owned())
        .collect()
}

/// Start messages (`finished=false`, zero tokens) in `messages`
pub fn starts(messages: &[StreamMessage]) -> usize {
    messages.iter().filter(|m| is_start(m)).count()
}

/// Highest number of builds open at once for `path`
///
/// A build is open from its start message until its `finished=true` or
/// `BuildFailed` message, so the count spans the whole pipeline run rather
/// than only the edit service call.
pub fn max_in_flight_for(messages: &[StreamMessage], path: &str) -> usize {
    let scoped: Vec<_> = messages.iter().filter(|m| m.path() == path).cloned().collect();
    max_in_flight(&scoped)
}

/// Highest number of builds open at once across all paths
pub fn max_in_flight(messages: &[StreamMessage]) -> usize {
    let mut open = 0usize;
    let mut max = 0;
    for msg in messages {
        if is_start(msg) {
            open += 1;
            max = max.max(open);
        } else if msg.is_finished() || matches!(msg, StreamMessage::BuildFailed { .. }) {
            open = open.saturating_sub(1);
        }
    }
    max
}

fn is_start(msg: &StreamMessage) -> bool {
    matches!(msg, StreamMessage::BuildInfo(info) if !info.finished && info.num_tokens == 0)
}

/// Line appended to a file by [`GatedEditService`] for `description`
pub fn edit_marker(description: &str) -> String {
    format!("// edit: {description}\n")
}

#[derive(Debug, Default)]
struct CallLog {
    active_by_path: HashMap<String, usize>,
    max_by_path: HashMap<String, usize>,
    active: usize,
    max_active: usize,
    requests: Vec<EditRequest>,
}

/// Edit service that records concurrency and can be held per path
///
/// Every edit appends [`edit_marker`] of its description to the baseline,
/// so the final file content lists the applied edits in order.
#[derive(Debug, Default)]
pub struct GatedEditService {
    log: Mutex<CallLog>,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    fail_start: Mutex<HashSet<String>>,
    fail_stream: Mutex<HashSet<String>>,
    delay: Duration,
}

impl GatedEditService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Block calls for `path` until released
    pub fn hold(&self, path: &str) {
        self.gates
            .lock()
            .insert(path.to_owned(), Arc::new(Semaphore::new(0)));
    }

    /// Let `n` held calls for `path` through
    pub fn release(&self, path: &str, n: usize) {
        if let Some(gate) = self.gates.lock().get(path) {
            gate.add_permits(n);
        }
    }

    /// Fail to start edits with this description
    pub fn fail_start(&self, description: &str) {
        self.fail_start.lock().insert(description.to_owned());
    }

    /// Fail mid-stream for edits with this description
    pub fn fail_stream(&self, description: &str) {
        self.fail_stream.lock().insert(description.to_owned());
    }

    pub fn max_concurrent(&self) -> usize {
        self.log.lock().max_active
    }

    pub fn max_concurrent_for(&self, path: &str) -> usize {
        self.log.lock().max_by_path.get(path).copied().unwrap_or(0)
    }

    pub fn requests(&self) -> Vec<EditRequest> {
        self.log.lock().requests.clone()
    }

    /// Descriptions requested for `path`, in call order
    pub fn descriptions_for(&self, path: &str) -> Vec<String> {
        self.log
            .lock()
            .requests
            .iter()
            .filter(|r| r.path == path)
            .map(|r| r.description.clone())
            .collect()
    }

    pub fn calls(&self) -> usize {
        self.log.lock().requests.len()
    }

    fn enter(&self, request: &EditRequest) {
        let mut log = self.log.lock();
        log.requests.push(request.clone());
        log.active += 1;
        log.max_active = log.max_active.max(log.active);
        let active = {
            let n = log.active_by_path.entry(request.path.clone()).or_default();
            *n += 1;
            *n
        };
        let max = log.max_by_path.entry(request.path.clone()).or_default();
        *max = (*max).max(active);
    }

    fn exit(&self, path: &str) {
        let mut log = self.log.lock();
        log.active -= 1;
        if let Some(n) = log.active_by_path.get_mut(path) {
            *n -= 1;
        }
    }
}

#[async_trait::async_trait]
impl EditService for GatedEditService {
    async fn start_streaming_edit(
        &self,
        cancel: CancellationToken,
        request: EditRequest,
    ) -> Result<EditStream, ComputeError> {
        self.enter(&request);
        let path = request.path.clone();

        let gate = self.gates.lock().get(&path).cloned();
        if let Some(gate) = gate {
            tokio::select! {
                () = cancel.cancelled() => {
                    self.exit(&path);
                    return Err(ComputeError::Cancelled);
                }
                permit = gate.acquire() => {
                    if let Ok(permit) = permit {
                        permit.forget();
                    }
                }
            }
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.exit(&path);

        if self.fail_start.lock().contains(&request.description) {
            return Err(ComputeError::StartFailed(format!(
                "injected start failure: {}",
                request.description
            )));
        }

        let replacement = Replacement::new(
            request.baseline.clone(),
            format!("{}{}", request.baseline, edit_marker(&request.description)),
        );
        let payload = serde_json::json!({ "replacements": [replacement] }).to_string();
        let mid = (0..=payload.len() / 2)
            .rev()
            .find(|&i| payload.is_char_boundary(i))
            .unwrap_or(0);
        let (head, tail) = payload.split_at(mid);

        let mut chunks = vec![Ok(EditChunk::Delta(head.to_owned()))];
        if self.fail_stream.lock().contains(&request.description) {
            chunks.push(Err(ComputeError::Stream("injected stream failure".into())));
        } else {
            chunks.push(Ok(EditChunk::Delta(tail.to_owned())));
        }
        Ok(futures::stream::iter(chunks).boxed())
    }
}
