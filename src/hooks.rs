//! Before-request and after-response hook chains.
//!
//! Hooks run in registration order. The first hook that returns an error
//! stops its chain: a failing before-request hook aborts the call before any
//! network I/O, a failing after-response hook replaces the response's error.

use crate::{BoxError, Error, Request, Response};
use std::fmt;
use std::sync::Arc;

/// A callback run before a request is sent. It may edit the request.
pub type BeforeRequestHook = Arc<dyn Fn(&mut Request) -> Result<(), BoxError> + Send + Sync>;

/// A callback run after a response has been received.
pub type AfterResponseHook = Arc<dyn Fn(&mut Response) -> Result<(), BoxError> + Send + Sync>;

/// Which hook chain an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    /// The before-request chain.
    BeforeRequest,
    /// The after-response chain.
    AfterResponse,
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookPhase::BeforeRequest => f.write_str("before-request"),
            HookPhase::AfterResponse => f.write_str("after-response"),
        }
    }
}

#[derive(Clone, Default)]
pub(crate) struct Hooks {
    before_request: Vec<BeforeRequestHook>,
    after_response: Vec<AfterResponseHook>,
}

impl Hooks {
    pub(crate) fn push_before(&mut self, hook: BeforeRequestHook) {
        self.before_request.push(hook);
    }

    pub(crate) fn push_after(&mut self, hook: AfterResponseHook) {
        self.after_response.push(hook);
    }

    pub(crate) fn run_before(&self, request: &mut Request) -> Result<(), Error> {
        for (index, hook) in self.before_request.iter().enumerate() {
            hook(request).map_err(|source| Error::hook(HookPhase::BeforeRequest, index, source))?;
        }
        Ok(())
    }

    pub(crate) fn run_after(&self, response: &mut Response) {
        for (index, hook) in self.after_response.iter().enumerate() {
            if let Err(source) = hook(response) {
                tracing::warn!(error = %source, index = index, "After-response hook failed");
                response.set_error(Error::hook(HookPhase::AfterResponse, index, source));
                break;
            }
        }
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("before_request", &self.before_request.len())
            .field("after_response", &self.after_response.len())
            .finish()
    }
}
