//! In-process fakes for exercising the pipeline without network access.

use crate::client::RemoteService;
use crate::types::ServiceFailure;
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

type Responder<Req, Resp> = Box<dyn Fn(usize, &Req) -> Result<Resp, ServiceFailure> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct RecordedCall<Req> {
    pub at: Instant,
    pub request: Req,
}

/// A `RemoteService` answering from a closure of `(attempt index, request)`.
pub struct ScriptedService<Req, Resp> {
    name: String,
    responder: Responder<Req, Resp>,
    calls: Mutex<Vec<RecordedCall<Req>>>,
    latency: Duration,
}

impl<Req: Clone, Resp> ScriptedService<Req, Resp> {
    pub fn new<F>(name: impl Into<String>, responder: F) -> Self
    where
        F: Fn(usize, &Req) -> Result<Resp, ServiceFailure> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
            latency: Duration::ZERO,
        }
    }

    /// Delay every response by `latency`, measured on the tokio clock.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall<Req>> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn requests(&self) -> Vec<Req> {
        self.calls().into_iter().map(|call| call.request).collect()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls().into_iter().map(|call| call.at).collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

#[async_trait]
impl<Req, Resp> RemoteService for ScriptedService<Req, Resp>
where
    Req: Clone + Send + Sync + 'static,
    Resp: Send + 'static,
{
    type Request = Req;
    type Response = Resp;

    fn service_name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, request: &Req) -> Result<Resp, ServiceFailure> {
        let index = {
            let mut calls = self
                .calls
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            calls.push(RecordedCall {
                at: Instant::now(),
                request: request.clone(),
            });
            calls.len() - 1
        };
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        (self.responder)(index, request)
    }
}
