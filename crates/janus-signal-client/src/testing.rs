//! Fakes shared by the unit tests.

use std::sync::Arc;

use janus_signal_protocol::{IceCandidate, Jsep};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::MediaError;
use crate::media::MediaEngine;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaCall {
    CreateLocal,
    ApplyRemote(Jsep),
    AddCandidate(IceCandidate),
    EndOfCandidates,
    Close,
}

/// Media engine recording every call; clones share the log.
#[derive(Clone, Default)]
pub struct FakeMedia {
    calls: Arc<Mutex<Vec<MediaCall>>>,
    refuse_offer: bool,
    refuse_answer: bool,
    refuse_candidates: bool,
}

impl FakeMedia {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refusing_offer() -> Self {
        Self {
            refuse_offer: true,
            ..Self::default()
        }
    }

    pub fn refusing_answer() -> Self {
        Self {
            refuse_answer: true,
            ..Self::default()
        }
    }

    pub fn refusing_candidates() -> Self {
        Self {
            refuse_candidates: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<MediaCall> {
        self.calls.lock().clone()
    }
}

impl MediaEngine for FakeMedia {
    fn create_local_description(&mut self) -> Result<(), MediaError> {
        self.calls.lock().push(MediaCall::CreateLocal);
        if self.refuse_offer {
            return Err(MediaError::new("no capture device"));
        }
        Ok(())
    }

    fn apply_remote_description(&mut self, jsep: &Jsep) -> Result<(), MediaError> {
        self.calls.lock().push(MediaCall::ApplyRemote(jsep.clone()));
        if self.refuse_answer {
            return Err(MediaError::new("bad answer"));
        }
        Ok(())
    }

    fn add_remote_candidate(&mut self, candidate: &IceCandidate) -> Result<(), MediaError> {
        self.calls
            .lock()
            .push(MediaCall::AddCandidate(candidate.clone()));
        if self.refuse_candidates {
            return Err(MediaError::new("unknown mid"));
        }
        Ok(())
    }

    fn end_of_remote_candidates(&mut self) -> Result<(), MediaError> {
        self.calls.lock().push(MediaCall::EndOfCandidates);
        if self.refuse_candidates {
            return Err(MediaError::new("ice agent gone"));
        }
        Ok(())
    }

    fn close(&mut self) {
        self.calls.lock().push(MediaCall::Close);
    }
}

/// Drains every frame written so far, parsed as JSON.
pub fn drain_sent(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<Value> {
    let mut sent = Vec::new();
    while let Ok(text) = rx.try_recv() {
        sent.push(serde_json::from_str(&text).unwrap());
    }
    sent
}

/// Deterministic transaction ids: `prefix0`, `prefix1`, ...
pub fn sequential_ids(prefix: &'static str) -> impl FnMut() -> String + Send + 'static {
    let mut next = 0u32;
    move || {
        let id = format!("{}{}", prefix, next);
        next += 1;
        id
    }
}
