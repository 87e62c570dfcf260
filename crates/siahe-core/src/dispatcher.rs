//! Routing of inbound updates to registered handlers.

use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{task::JoinSet, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::{
    domain::BotIdentity,
    middleware::suspend,
    session::Client,
    update::{Update, UpdateKind},
    Error, Result,
};

const POLL_RETRY_DELAY: Duration = Duration::from_secs(3);

/// What a handler gets besides the update itself.
#[derive(Clone)]
pub struct Context {
    pub client: Client,
    pub me: BotIdentity,
    pub scope: CancellationToken,
}

/// Business logic entry point. Failures are logged by the dispatcher and do
/// not affect other handlers.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: &Context, update: &Update) -> Result<()>;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Context, Update) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn handle(&self, ctx: &Context, update: &Update) -> Result<()> {
        (self)(ctx.clone(), update.clone()).await
    }
}

/// Collects registrations before the session starts.
#[derive(Default)]
pub struct DispatcherBuilder {
    handlers: HashMap<UpdateKind, Vec<Arc<dyn Handler>>>,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, kind: UpdateKind, handler: impl Handler + 'static) -> Self {
        self.handlers
            .entry(kind)
            .or_default()
            .push(Arc::new(handler));
        self
    }

    pub fn on_new_message(self, handler: impl Handler + 'static) -> Self {
        self.on(UpdateKind::NewMessage, handler)
    }

    pub fn on_callback_query(self, handler: impl Handler + 'static) -> Self {
        self.on(UpdateKind::CallbackQuery, handler)
    }

    /// Freeze the registrations. The table is read-only from here on.
    pub fn build(self) -> Arc<Dispatcher> {
        Arc::new(Dispatcher {
            handlers: self.handlers,
        })
    }
}

pub struct Dispatcher {
    handlers: HashMap<UpdateKind, Vec<Arc<dyn Handler>>>,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    pub fn handler_count(&self, kind: UpdateKind) -> usize {
        self.handlers.get(&kind).map_or(0, |h| h.len())
    }

    /// Run every handler registered for the update's kind, in registration
    /// order. Returns how many were invoked.
    pub async fn dispatch(&self, ctx: &Context, update: &Update) -> usize {
        let kind = update.kind();
        let Some(handlers) = self.handlers.get(&kind) else {
            debug!(%kind, update_id = update.id, "no handlers registered");
            return 0;
        };

        for (idx, handler) in handlers.iter().enumerate() {
            if let Err(e) = handler.handle(ctx, update).await {
                error!(%kind, update_id = update.id, handler = idx, error = %e, "handler failed");
            }
        }
        handlers.len()
    }

    /// Long-poll updates through the session's outbound path and dispatch
    /// each one on its own task, so a slow handler never holds back intake.
    ///
    /// Returns `Ok(())` once the session scope is cancelled. Poll failures
    /// are logged and retried, except authorization loss.
    pub async fn run_polling(self: Arc<Self>, ctx: Context, poll_timeout: Duration) -> Result<()> {
        let mut offset = 0i64;
        let mut in_flight = JoinSet::new();

        loop {
            let updates = match ctx.client.get_updates(offset, poll_timeout).await {
                Ok(updates) => updates,
                Err(Error::Cancelled) => return Ok(()),
                Err(e @ (Error::Unauthorized | Error::Auth(_))) => return Err(e),
                Err(e) => {
                    warn!(error = %e, "failed to fetch updates");
                    if suspend(&ctx.scope, sleep(POLL_RETRY_DELAY)).await.is_err() {
                        return Ok(());
                    }
                    continue;
                }
            };

            for update in updates {
                offset = offset.max(update.id + 1);
                let dispatcher = self.clone();
                let ctx = ctx.clone();
                in_flight.spawn(async move {
                    dispatcher.dispatch(&ctx, &update).await;
                });
            }

            // Reap finished handler tasks.
            while in_flight.try_join_next().is_some() {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };
    use tokio::sync::Notify;

    use crate::{
        domain::{ChatId, MessageId, UserId},
        middleware::{ChainConfig, MiddlewareChain},
        testkit::{identity, FakeTransport},
        transport::{Call, Reply},
        update::{CallbackQuery, Event, Message},
    };

    fn ctx_over(transport: Arc<FakeTransport>, scope: CancellationToken) -> Context {
        let chain = MiddlewareChain::standard(
            transport,
            ChainConfig {
                rate_interval: Duration::ZERO,
                rate_burst: 1,
                flood_max_retries: 0,
            },
            scope.clone(),
        );
        Context {
            client: Client::new(Arc::new(chain)),
            me: identity(),
            scope,
        }
    }

    fn ctx() -> Context {
        ctx_over(Arc::new(FakeTransport::ok()), CancellationToken::new())
    }

    fn message(id: i64, text: &str) -> Update {
        Update {
            id,
            event: Event::NewMessage(Message {
                chat_id: ChatId(10),
                message_id: MessageId(id as i32),
                user_id: Some(UserId(3)),
                username: Some("alice".to_string()),
                text: Some(text.to_string()),
            }),
        }
    }

    fn callback(id: i64) -> Update {
        Update {
            id,
            event: Event::CallbackQuery(CallbackQuery {
                id: format!("cb-{id}"),
                user_id: UserId(3),
                username: None,
                data: Some("ok".to_string()),
                message: None,
            }),
        }
    }

    fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> impl Handler {
        let log = log.clone();
        move |_ctx: Context, update: Update| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(format!("{tag}:{}", update.id));
                Ok::<(), Error>(())
            }
        }
    }

    #[tokio::test]
    async fn handlers_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let d = Dispatcher::builder()
            .on_new_message(recorder(&log, "a"))
            .on_new_message(recorder(&log, "b"))
            .on_callback_query(recorder(&log, "cb"))
            .on_new_message(recorder(&log, "c"))
            .build();

        assert_eq!(d.dispatch(&ctx(), &message(1, "hi")).await, 3);
        assert_eq!(*log.lock().unwrap(), vec!["a:1", "b:1", "c:1"]);
    }

    #[tokio::test]
    async fn unregistered_kind_is_a_no_op() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let d = Dispatcher::builder()
            .on_new_message(recorder(&log, "msg"))
            .build();

        assert_eq!(d.dispatch(&ctx(), &callback(5)).await, 0);
        assert_eq!(
            d.dispatch(&ctx(), &Update { id: 6, event: Event::Other }).await,
            0
        );
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failing_handler_does_not_stop_its_siblings() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let d = Dispatcher::builder()
            .on_new_message(|_ctx: Context, _u: Update| async move {
                Err::<(), _>(Error::External("handler exploded".to_string()))
            })
            .on_new_message(recorder(&log, "after"))
            .build();

        assert_eq!(d.dispatch(&ctx(), &message(1, "x")).await, 2);
        assert_eq!(d.dispatch(&ctx(), &message(2, "y")).await, 2);
        assert_eq!(*log.lock().unwrap(), vec!["after:1", "after:2"]);
    }

    #[tokio::test]
    async fn handlers_send_through_the_session_client() {
        let transport = Arc::new(FakeTransport::ok());
        let d = Dispatcher::builder()
            .on_new_message(|ctx: Context, u: Update| async move {
                let Some(msg) = u.message() else {
                    return Ok::<(), Error>(());
                };
                ctx.client
                    .send_text(crate::transport::Issuer::Handler, msg.chat_id, "pong")
                    .await?;
                Ok::<(), Error>(())
            })
            .build();

        d.dispatch(
            &ctx_over(transport.clone(), CancellationToken::new()),
            &message(1, "/ping"),
        )
        .await;
        assert_eq!(transport.count_of("send_text"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn polling_keeps_dispatching_while_a_handler_is_blocked() {
        let first_poll = AtomicUsize::new(0);
        let transport = Arc::new(FakeTransport::new(move |_, call| match call {
            Call::GetUpdates { offset, .. } => {
                if first_poll.fetch_add(1, Ordering::SeqCst) == 0 {
                    assert_eq!(*offset, 0);
                    Ok(Reply::Updates(vec![message(1, "slow"), message(2, "fast")]))
                } else {
                    assert_eq!(*offset, 3);
                    Ok(Reply::Updates(Vec::new()))
                }
            }
            other => Ok(crate::testkit::default_reply(other)),
        }).with_latency(Duration::from_millis(50)));

        let release = Arc::new(Notify::new());
        let fast_done = Arc::new(Notify::new());
        let d = {
            let release = release.clone();
            let fast_done = fast_done.clone();
            Dispatcher::builder()
                .on_new_message(move |_ctx: Context, u: Update| {
                    let release = release.clone();
                    let fast_done = fast_done.clone();
                    async move {
                        if u.id == 1 {
                            release.notified().await;
                        } else {
                            fast_done.notify_one();
                        }
                        Ok::<(), Error>(())
                    }
                })
                .build()
        };

        let scope = CancellationToken::new();
        let ctx = ctx_over(transport.clone(), scope.clone());
        let polling = tokio::spawn(d.run_polling(ctx, Duration::from_secs(10)));

        // Update 2 is handled although update 1's handler never finishes.
        fast_done.notified().await;
        scope.cancel();
        polling.await.unwrap().unwrap();
        release.notify_one();
    }

    #[tokio::test(start_paused = true)]
    async fn polling_survives_transient_errors() {
        let transport = Arc::new(FakeTransport::new(|n, call| match call {
            Call::GetUpdates { .. } if n == 0 => Err(Error::External("502".to_string())),
            Call::GetUpdates { .. } if n == 1 => Ok(Reply::Updates(vec![message(7, "hi")])),
            other => Ok(crate::testkit::default_reply(other)),
        }).with_latency(Duration::from_millis(50)));

        let seen = Arc::new(Notify::new());
        let d = {
            let seen = seen.clone();
            Dispatcher::builder()
                .on_new_message(move |_ctx: Context, _u: Update| {
                    let seen = seen.clone();
                    async move {
                        seen.notify_one();
                        Ok::<(), Error>(())
                    }
                })
                .build()
        };

        let scope = CancellationToken::new();
        let polling = tokio::spawn(
            d.run_polling(ctx_over(transport.clone(), scope.clone()), Duration::from_secs(10)),
        );

        seen.notified().await;
        scope.cancel();
        polling.await.unwrap().unwrap();
        assert!(transport.count_of("get_updates") >= 2);
    }

    #[tokio::test]
    async fn polling_stops_on_lost_authorization() {
        let transport = Arc::new(FakeTransport::new(|_, _| Err(Error::Unauthorized)));
        let d = Dispatcher::builder().build();

        let err = d
            .run_polling(
                ctx_over(transport, CancellationToken::new()),
                Duration::from_secs(10),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized));
    }
}
