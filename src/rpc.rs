//! Manager RPC surface: `Connect`, `Check`, `Poll`.
//!
//! The transport (whatever wire protocol actually carries these messages
//! to the manager process) is out of scope; this module defines the
//! request/response shapes and a trait any transport would implement,
//! plus an in-memory mock used by tests and a stub that always reports
//! "not connected" for exercising failure paths.

use serde::{Deserialize, Serialize};

use crate::calltable::CallSet;
use crate::error::{Error, Result};
use crate::program::Program;
use crate::signal::Signal;
use crate::stats::ActivityCounts;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectRequest {
    pub name: String,
    pub arch: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectResponse {
    pub manager_enabled_calls: CallSet,
    pub initial_corpus: Vec<Program>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRequest {
    pub host_supported_calls: CallSet,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResponse {
    pub accepted: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollRequest {
    pub new_signal: Signal,
    pub new_corpus: Vec<Program>,
    pub exec_total: u64,
    pub want_candidates: usize,
    pub activity_counts: ActivityCounts,
    pub executor_restarts: u64,
}

/// A manager-supplied, already-vetted input: executed and triaged
/// elsewhere, handed over for this worker to fold straight into its
/// corpus and signal sets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Input {
    pub program: Program,
    pub signal: Signal,
    pub cover: Signal,
    pub call_index: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PollResponse {
    pub candidates: Vec<Program>,
    pub new_inputs: Vec<Input>,
    pub max_signal_delta: Signal,
}

/// What a worker needs from its manager connection, independent of
/// transport.
pub trait ManagerClient: Send + Sync {
    fn connect(&self, req: ConnectRequest) -> Result<ConnectResponse>;
    fn check(&self, req: CheckRequest) -> Result<CheckResponse>;
    fn poll(&self, req: PollRequest) -> Result<PollResponse>;
}

/// Deterministic in-process manager used by tests and by the bundled demo
/// binary's `--test` mode.
pub struct MockManagerClient {
    enabled_calls: CallSet,
    initial_corpus: Vec<Program>,
    accept_check: bool,
    candidates_to_hand_out: std::sync::Mutex<Vec<Program>>,
    inputs_to_hand_out: std::sync::Mutex<Vec<Input>>,
}

impl MockManagerClient {
    #[must_use]
    pub fn new(enabled_calls: CallSet) -> Self {
        MockManagerClient {
            enabled_calls,
            initial_corpus: Vec::new(),
            accept_check: true,
            candidates_to_hand_out: std::sync::Mutex::new(Vec::new()),
            inputs_to_hand_out: std::sync::Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_initial_corpus(mut self, corpus: Vec<Program>) -> Self {
        self.initial_corpus = corpus;
        self
    }

    #[must_use]
    pub fn rejecting_check(mut self, reject: bool) -> Self {
        self.accept_check = !reject;
        self
    }

    pub fn queue_candidate(&self, program: Program) {
        self.candidates_to_hand_out
            .lock()
            .expect("mock candidate queue poisoned")
            .push(program);
    }

    pub fn queue_input(&self, input: Input) {
        self.inputs_to_hand_out
            .lock()
            .expect("mock input queue poisoned")
            .push(input);
    }
}

impl ManagerClient for MockManagerClient {
    fn connect(&self, _req: ConnectRequest) -> Result<ConnectResponse> {
        Ok(ConnectResponse {
            manager_enabled_calls: self.enabled_calls.clone(),
            initial_corpus: self.initial_corpus.clone(),
        })
    }

    fn check(&self, _req: CheckRequest) -> Result<CheckResponse> {
        if self.accept_check {
            Ok(CheckResponse { accepted: true, reason: None })
        } else {
            Ok(CheckResponse {
                accepted: false,
                reason: Some("host call set diverges from manager expectations".into()),
            })
        }
    }

    fn poll(&self, req: PollRequest) -> Result<PollResponse> {
        let mut queued = self.candidates_to_hand_out.lock().expect("mock candidate queue poisoned");
        let take = req.want_candidates.min(queued.len());
        let candidates = queued.drain(..take).collect();
        let new_inputs = self
            .inputs_to_hand_out
            .lock()
            .expect("mock input queue poisoned")
            .drain(..)
            .collect();
        Ok(PollResponse { candidates, new_inputs, max_signal_delta: Signal::new() })
    }
}

/// Always reports the manager as unreachable; used to exercise the
/// reconnect/backoff path without a real transport.
pub struct UnreachableManagerClient;

impl ManagerClient for UnreachableManagerClient {
    fn connect(&self, _req: ConnectRequest) -> Result<ConnectResponse> {
        Err(Error::rpc("manager connection refused"))
    }

    fn check(&self, _req: CheckRequest) -> Result<CheckResponse> {
        Err(Error::rpc("manager connection refused"))
    }

    fn poll(&self, _req: PollRequest) -> Result<PollResponse> {
        Err(Error::rpc("manager connection refused"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_connect_returns_configured_corpus_and_calls() {
        let calls = CallSet::from_names(["read", "write"]);
        let corpus = vec![Program::from_bytes(&[1]).unwrap()];
        let client = MockManagerClient::new(calls.clone()).with_initial_corpus(corpus.clone());
        let resp = client
            .connect(ConnectRequest { name: "w0".into(), arch: "amd64".into() })
            .unwrap();
        assert_eq!(resp.manager_enabled_calls, calls);
        assert_eq!(resp.initial_corpus, corpus);
    }

    #[test]
    fn mock_check_can_be_made_to_reject() {
        let client = MockManagerClient::new(CallSet::default()).rejecting_check(true);
        let resp = client.check(CheckRequest { host_supported_calls: CallSet::default() }).unwrap();
        assert!(!resp.accepted);
        assert!(resp.reason.is_some());
    }

    #[test]
    fn mock_poll_hands_out_at_most_want_candidates() {
        let client = MockManagerClient::new(CallSet::default());
        client.queue_candidate(Program::from_bytes(&[1]).unwrap());
        client.queue_candidate(Program::from_bytes(&[2]).unwrap());
        let resp = client
            .poll(PollRequest {
                new_signal: Signal::new(),
                new_corpus: vec![],
                exec_total: 0,
                want_candidates: 1,
                activity_counts: crate::stats::ActivityCounts::default(),
                executor_restarts: 0,
            })
            .unwrap();
        assert_eq!(resp.candidates.len(), 1);
    }

    #[test]
    fn mock_poll_hands_out_every_queued_input() {
        let client = MockManagerClient::new(CallSet::default());
        client.queue_input(Input {
            program: Program::from_bytes(&[3]).unwrap(),
            signal: Signal::from_tokens([1]),
            cover: Signal::new(),
            call_index: 0,
        });
        let resp = client
            .poll(PollRequest {
                new_signal: Signal::new(),
                new_corpus: vec![],
                exec_total: 0,
                want_candidates: 0,
                activity_counts: crate::stats::ActivityCounts::default(),
                executor_restarts: 0,
            })
            .unwrap();
        assert_eq!(resp.new_inputs.len(), 1);
    }

    #[test]
    fn unreachable_client_fails_every_call() {
        let client = UnreachableManagerClient;
        assert!(client.connect(ConnectRequest { name: "w0".into(), arch: "amd64".into() }).is_err());
        assert!(client.check(CheckRequest { host_supported_calls: CallSet::default() }).is_err());
    }
}
