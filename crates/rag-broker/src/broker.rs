// SPDX-License-Identifier: MIT OR Apache-2.0
//! The work-callback broker: a `run_id`-keyed map of ring buffers and
//! subscriber queues, guarded by a single mutex, the way the source
//! workspace's event bus guards its broadcast channel.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use rag_core::callback::CallbackPolicy;
use rag_core::state::State;
use rag_core::trace::Event;

use crate::summarize::summarize;

/// Default ring buffer capacity per run.
pub const DEFAULT_RING_CAPACITY: usize = 600;
/// How long a closed run's state lingers before `sweep` drops it.
pub const DEFAULT_TTL_MINUTES: i64 = 20;

struct RunState {
    policy: CallbackPolicy,
    ring: VecDeque<Value>,
    subscribers: Vec<UnboundedSender<Value>>,
    closed: bool,
    close_reason: Option<String>,
    last_emit_utc: DateTime<Utc>,
    total_emitted: u64,
    dropped_subscribers: u64,
}

/// Snapshot of a run's broker-side statistics, surfaced alongside the SSE
/// stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerStats {
    /// Total summaries appended to this run's ring since it opened.
    pub total_emitted: u64,
    /// Subscribers currently attached to this run.
    pub active_subscribers: usize,
    /// Subscriber queues that were pruned because their receiver was dropped.
    pub dropped_subscribers: u64,
}

/// What a new stream subscription sees: a live receiver plus the ring
/// snapshot and close state at the moment it attached.
pub struct StreamHandle {
    /// Receives every summary emitted after this call, in order.
    pub receiver: UnboundedReceiver<Value>,
    /// Everything already in the ring when this subscription was opened.
    pub snapshot: Vec<Value>,
    /// Whether the run was already closed.
    pub closed: bool,
    /// The close reason, if the run was already closed.
    pub reason: Option<String>,
}

/// Per-run ring buffer, subscriber fan-out, and TTL sweep for work
/// callbacks.
pub struct Broker {
    runs: Mutex<HashMap<String, RunState>>,
    ring_capacity: usize,
    ttl: Duration,
}

impl Broker {
    /// A broker with the default 600-entry ring and 20-minute TTL.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_RING_CAPACITY, Duration::minutes(DEFAULT_TTL_MINUTES))
    }

    /// A broker with explicit ring capacity and closed-run TTL.
    #[must_use]
    pub fn with_limits(ring_capacity: usize, ttl: Duration) -> Self {
        Self { runs: Mutex::new(HashMap::new()), ring_capacity, ttl }
    }

    /// Register a new run with its resolved policy. Re-opening an id that
    /// already exists resets it, discarding any prior ring and subscribers.
    pub fn open_run(&self, run_id: impl Into<String>, policy: CallbackPolicy, now: DateTime<Utc>) {
        let run_id = run_id.into();
        let mut runs = self.runs.lock().expect("broker mutex poisoned");
        runs.insert(
            run_id,
            RunState {
                policy,
                ring: VecDeque::new(),
                subscribers: Vec::new(),
                closed: false,
                close_reason: None,
                last_emit_utc: now,
                total_emitted: 0,
                dropped_subscribers: 0,
            },
        );
    }

    /// Summarize `event` under the run's policy and fan it out. Returns
    /// `None` if the run is unknown, already closed, or the policy filters
    /// the event out.
    pub fn emit(&self, run_id: &str, event: &Event, state: &State, now: DateTime<Utc>) -> Option<Value> {
        let mut runs = self.runs.lock().expect("broker mutex poisoned");
        let run = runs.get_mut(run_id)?;
        if run.closed {
            return None;
        }
        let summary = summarize(&run.policy, event, state)?;
        push_capped(&mut run.ring, summary.clone(), self.ring_capacity);
        run.total_emitted += 1;
        run.last_emit_utc = now;
        fan_out(run, &summary);
        Some(summary)
    }

    /// Mark a run closed and deliver a terminal `{"type":"done","reason":…}`
    /// frame to every live subscriber. The done frame is not stored in the
    /// ring; a subscriber attaching after closure gets it synthesized from
    /// `StreamHandle::{closed,reason}` instead.
    pub fn close_run(&self, run_id: &str, reason: impl Into<String>, now: DateTime<Utc>) {
        let mut runs = self.runs.lock().expect("broker mutex poisoned");
        let Some(run) = runs.get_mut(run_id) else { return };
        if run.closed {
            return;
        }
        let reason = reason.into();
        let done = json!({ "type": "done", "reason": reason });
        fan_out(run, &done);
        run.closed = true;
        run.close_reason = Some(reason);
        run.last_emit_utc = now;
        debug!(target: "rag.broker", run_id, "run closed");
    }

    /// Attach a new subscriber and return the ring snapshot plus close
    /// state at attach time. `None` if `run_id` is unknown.
    pub fn open_stream(&self, run_id: &str) -> Option<StreamHandle> {
        let mut runs = self.runs.lock().expect("broker mutex poisoned");
        let run = runs.get_mut(run_id)?;
        let (tx, rx) = mpsc::unbounded_channel();
        if !run.closed {
            run.subscribers.push(tx);
        }
        Some(StreamHandle {
            receiver: rx,
            snapshot: run.ring.iter().cloned().collect(),
            closed: run.closed,
            reason: run.close_reason.clone(),
        })
    }

    /// Drop closed runs whose last emission is older than the TTL. Returns
    /// the number of runs removed.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut runs = self.runs.lock().expect("broker mutex poisoned");
        let before = runs.len();
        runs.retain(|_, run| !(run.closed && now - run.last_emit_utc > self.ttl));
        before - runs.len()
    }

    /// A point-in-time statistics snapshot for `run_id`, or `None` if
    /// unknown.
    #[must_use]
    pub fn stats(&self, run_id: &str) -> Option<BrokerStats> {
        let runs = self.runs.lock().expect("broker mutex poisoned");
        runs.get(run_id).map(|run| BrokerStats {
            total_emitted: run.total_emitted,
            active_subscribers: run.subscribers.len(),
            dropped_subscribers: run.dropped_subscribers,
        })
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

fn push_capped(ring: &mut VecDeque<Value>, value: Value, capacity: usize) {
    ring.push_back(value);
    while ring.len() > capacity {
        ring.pop_front();
    }
}

fn fan_out(run: &mut RunState, value: &Value) {
    let before = run.subscribers.len();
    run.subscribers.retain(|tx| tx.send(value.clone()).is_ok());
    run.dropped_subscribers += (before - run.subscribers.len()) as u64;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rag_core::callback::StageVisibility;
    use rag_core::trace::StepTraceEvent;

    fn shown_policy() -> CallbackPolicy {
        CallbackPolicy {
            enabled: true,
            include_documents: false,
            router_visibility: StageVisibility::Show,
            retrieval_visibility: StageVisibility::Show,
            model_call_visibility: StageVisibility::Show,
        }
    }

    fn call_model_event() -> Event {
        Event::Step(StepTraceEvent {
            ts_utc: Utc::now(),
            step_id: "answer".into(),
            action: "call_model".into(),
            next_default: None,
            next_resolved: None,
            action_class: "CallModel".into(),
            action_id: "call_model".into(),
            input: Value::Null,
            output: Value::Null,
            error: None,
            state_after: Value::Null,
        })
    }

    #[test]
    fn emit_before_open_run_is_a_no_op() {
        let broker = Broker::new();
        let state = State::new("q", "s", "c");
        let now = Utc::now();
        assert!(broker.emit("missing", &call_model_event(), &state, now).is_none());
    }

    #[test]
    fn emit_appends_to_ring_and_stats() {
        let broker = Broker::new();
        let now = Utc::now();
        broker.open_run("r1", shown_policy(), now);
        let state = State::new("q", "s", "c");

        assert!(broker.emit("r1", &call_model_event(), &state, now).is_some());
        let stats = broker.stats("r1").unwrap();
        assert_eq!(stats.total_emitted, 1);
    }

    #[test]
    fn emit_after_close_is_a_no_op() {
        let broker = Broker::new();
        let now = Utc::now();
        broker.open_run("r1", shown_policy(), now);
        broker.close_run("r1", "done", now);
        let state = State::new("q", "s", "c");
        assert!(broker.emit("r1", &call_model_event(), &state, now).is_none());
    }

    #[test]
    fn open_stream_returns_ring_snapshot() {
        let broker = Broker::new();
        let now = Utc::now();
        broker.open_run("r1", shown_policy(), now);
        let state = State::new("q", "s", "c");
        broker.emit("r1", &call_model_event(), &state, now);

        let handle = broker.open_stream("r1").unwrap();
        assert_eq!(handle.snapshot.len(), 1);
        assert!(!handle.closed);
    }

    #[tokio::test]
    async fn subscriber_receives_live_events_after_attaching() {
        let broker = Broker::new();
        let now = Utc::now();
        broker.open_run("r1", shown_policy(), now);
        let mut handle = broker.open_stream("r1").unwrap();
        assert!(handle.snapshot.is_empty());

        let state = State::new("q", "s", "c");
        broker.emit("r1", &call_model_event(), &state, now);

        let received = handle.receiver.recv().await.unwrap();
        assert_eq!(received["action"], "call_model");
    }

    #[tokio::test]
    async fn close_run_delivers_a_terminal_done_frame() {
        let broker = Broker::new();
        let now = Utc::now();
        broker.open_run("r1", shown_policy(), now);
        let mut handle = broker.open_stream("r1").unwrap();

        broker.close_run("r1", "run_complete", now);
        let done = handle.receiver.recv().await.unwrap();
        assert_eq!(done["type"], "done");
        assert_eq!(done["reason"], "run_complete");

        let reopened = broker.open_stream("r1").unwrap();
        assert!(reopened.closed);
        assert_eq!(reopened.reason.as_deref(), Some("run_complete"));
        assert!(reopened.snapshot.is_empty(), "done frame is synthesized by the caller, not stored in the ring");
    }

    #[test]
    fn ring_buffer_is_capped() {
        let broker = Broker::with_limits(3, Duration::minutes(20));
        let now = Utc::now();
        broker.open_run("r1", shown_policy(), now);
        let state = State::new("q", "s", "c");
        for _ in 0..5 {
            broker.emit("r1", &call_model_event(), &state, now);
        }
        let handle = broker.open_stream("r1").unwrap();
        assert_eq!(handle.snapshot.len(), 3);
    }

    #[test]
    fn sweep_removes_stale_closed_runs_only() {
        let broker = Broker::with_limits(DEFAULT_RING_CAPACITY, Duration::minutes(20));
        let t0 = Utc::now();
        broker.open_run("closed-stale", shown_policy(), t0);
        broker.close_run("closed-stale", "done", t0);
        broker.open_run("closed-fresh", shown_policy(), t0);
        broker.open_run("still-open", shown_policy(), t0);

        let t1 = t0 + Duration::minutes(30);
        broker.close_run("closed-fresh", "done", t1);

        let removed = broker.sweep(t1);
        assert_eq!(removed, 1);
        assert!(broker.stats("closed-stale").is_none());
        assert!(broker.stats("closed-fresh").is_some());
        assert!(broker.stats("still-open").is_some());
    }
}
