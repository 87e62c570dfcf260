//! In-crate fakes for the transport port.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::time::{sleep, Instant};

use crate::{
    domain::{BotIdentity, ChatId, FileRef, MessageId, MessageRef, UserId},
    transport::{Call, Connector, Issuer, OutboundRequest, Reply, Transport},
    Error, Result,
};

type Responder = dyn Fn(usize, &Call) -> Result<Reply> + Send + Sync;

/// Scriptable transport. `respond` gets the 0-based call index and the call.
pub(crate) struct FakeTransport {
    respond: Box<Responder>,
    latency: Duration,
    calls: Mutex<Vec<(Instant, Call)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    closed: AtomicBool,
}

impl FakeTransport {
    pub(crate) fn new(
        respond: impl Fn(usize, &Call) -> Result<Reply> + Send + Sync + 'static,
    ) -> Self {
        Self {
            respond: Box::new(respond),
            latency: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Answers every call the way a healthy platform would.
    pub(crate) fn ok() -> Self {
        Self::new(|_, call| Ok(default_reply(call)))
    }

    pub(crate) fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub(crate) fn calls(&self) -> Vec<(Instant, Call)> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub(crate) fn count_of(&self, name: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, c)| c.name() == name)
            .count()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn invoke(&self, call: Call) -> Result<Reply> {
        let n = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((Instant::now(), call.clone()));
            calls.len() - 1
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        (self.respond)(n, &call)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub(crate) fn default_reply(call: &Call) -> Reply {
    match call {
        Call::AuthorizeBot { .. } => Reply::Authorized(identity()),
        Call::GetUpdates { .. } => Reply::Updates(Vec::new()),
        Call::SendText { chat_id, .. } | Call::SendDocument { chat_id, .. } => {
            Reply::Sent(MessageRef {
                chat_id: *chat_id,
                message_id: MessageId(1),
            })
        }
        Call::Upload { artifact } => Reply::Uploaded(FileRef::Staged(artifact.clone())),
        Call::AnswerCallback { .. } => Reply::Done,
    }
}

pub(crate) fn identity() -> BotIdentity {
    BotIdentity {
        id: UserId(4242),
        username: "siahe_test_bot".to_string(),
    }
}

pub(crate) fn request() -> OutboundRequest {
    send_text(0)
}

pub(crate) fn send_text(n: i64) -> OutboundRequest {
    OutboundRequest::new(
        Issuer::Handler,
        Call::SendText {
            chat_id: ChatId(1),
            text: format!("message {n}"),
        },
    )
}

/// Connector handing out one shared fake transport, or failing.
pub(crate) struct FakeConnector {
    pub(crate) transport: Option<Arc<FakeTransport>>,
    pub(crate) connects: AtomicUsize,
}

impl FakeConnector {
    pub(crate) fn new(transport: Arc<FakeTransport>) -> Self {
        Self {
            transport: Some(transport),
            connects: AtomicUsize::new(0),
        }
    }

    pub(crate) fn unreachable() -> Self {
        Self {
            transport: None,
            connects: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self) -> Result<Arc<dyn Transport>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        match &self.transport {
            Some(t) => Ok(t.clone()),
            None => Err(Error::Connect("host unreachable".to_string())),
        }
    }
}
