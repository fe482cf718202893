//! Request lifecycle hooks.
//!
//! Handlers and the relay report what happens to a request through a
//! `RelayObserver` instead of logging inline. The default observer writes to
//! `tracing`.

use crate::error::RelayError;
use tracing::{error, info};

/// Which inbound route a request came through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Chat,
    StreamChat,
    Status,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Chat => "/chat",
            Route::StreamChat => "/stream_chat",
            Route::Status => "/status",
        }
    }
}

/// Observer invoked at fixed points of each request.
pub trait RelayObserver: Send + Sync {
    /// A request arrived. `message` is the raw user message, possibly empty.
    fn request_received(&self, route: Route, message: &str);

    /// A generation request is about to be sent to the daemon.
    fn daemon_call_started(&self, route: Route, url: &str, model: &str);

    /// The request finished successfully. `chars` is the length of the
    /// generated text (for streams, the sum of all forwarded tokens).
    fn response_produced(&self, route: Route, chars: usize);

    /// The request finished with an error.
    fn error_produced(&self, route: Route, err: &RelayError);
}

/// Default observer: structured log lines through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl RelayObserver for TracingObserver {
    fn request_received(&self, route: Route, message: &str) {
        info!(route = route.as_str(), chars = message.chars().count(), "Request received");
    }

    fn daemon_call_started(&self, route: Route, url: &str, model: &str) {
        info!(route = route.as_str(), url, model, "Calling daemon");
    }

    fn response_produced(&self, route: Route, chars: usize) {
        info!(route = route.as_str(), chars, "Response produced");
    }

    fn error_produced(&self, route: Route, err: &RelayError) {
        error!(route = route.as_str(), "Request failed: {}", err);
    }
}
