//! Connection supervision and bot authorization.
//!
//! The [`Supervisor`] owns the connection for the lifetime of one scope: it
//! connects, hands the caller a [`Session`] whose outbound path is the
//! standard middleware chain, and tears everything down on every exit path.

use std::{
    future::Future,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    domain::{Artifact, BotIdentity, BotToken, ChatId, FileRef, MessageRef, UserId},
    middleware::{ChainConfig, MiddlewareChain},
    transport::{Call, Connector, Issuer, OutboundRequest, Reply, Transport},
    update::Update,
    Error, Result,
};

/// Typed front for the middleware chain. Cheap to clone.
#[derive(Clone)]
pub struct Client {
    chain: Arc<MiddlewareChain>,
}

impl Client {
    pub fn new(chain: Arc<MiddlewareChain>) -> Self {
        Self { chain }
    }

    pub async fn invoke(&self, req: OutboundRequest) -> Result<Reply> {
        self.chain.invoke(req).await
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.chain.stage_names()
    }

    pub async fn send_text(&self, issuer: Issuer, chat_id: ChatId, text: &str) -> Result<MessageRef> {
        let call = Call::SendText {
            chat_id,
            text: text.to_string(),
        };
        match self.invoke(OutboundRequest::new(issuer, call)).await? {
            Reply::Sent(msg) => Ok(msg),
            _ => Err(Error::UnexpectedReply("send_text")),
        }
    }

    pub async fn upload(&self, issuer: Issuer, artifact: Artifact) -> Result<FileRef> {
        match self
            .invoke(OutboundRequest::new(issuer, Call::Upload { artifact }))
            .await?
        {
            Reply::Uploaded(file) => Ok(file),
            _ => Err(Error::UnexpectedReply("upload")),
        }
    }

    pub async fn send_document(
        &self,
        issuer: Issuer,
        chat_id: ChatId,
        file: FileRef,
        caption: Option<String>,
    ) -> Result<MessageRef> {
        let call = Call::SendDocument {
            chat_id,
            file,
            caption,
        };
        match self.invoke(OutboundRequest::new(issuer, call)).await? {
            Reply::Sent(msg) => Ok(msg),
            _ => Err(Error::UnexpectedReply("send_document")),
        }
    }

    pub async fn answer_callback(
        &self,
        issuer: Issuer,
        callback_id: &str,
        text: Option<&str>,
    ) -> Result<()> {
        let call = Call::AnswerCallback {
            callback_id: callback_id.to_string(),
            text: text.map(|t| t.to_string()),
        };
        match self.invoke(OutboundRequest::new(issuer, call)).await? {
            Reply::Done => Ok(()),
            _ => Err(Error::UnexpectedReply("answer_callback")),
        }
    }

    pub async fn get_updates(&self, offset: i64, timeout: Duration) -> Result<Vec<Update>> {
        let call = Call::GetUpdates { offset, timeout };
        match self
            .invoke(OutboundRequest::new(Issuer::Dispatcher, call))
            .await?
        {
            Reply::Updates(updates) => Ok(updates),
            _ => Err(Error::UnexpectedReply("get_updates")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Authenticated(BotIdentity),
}

/// The authorized, live connection state.
pub struct Session {
    client: Client,
    scope: CancellationToken,
    store: Option<FileSessionStore>,
    auth_attempted: AtomicBool,
    auth: Mutex<AuthState>,
}

impl Session {
    pub fn new(client: Client, scope: CancellationToken) -> Self {
        Self {
            client,
            scope,
            store: None,
            auth_attempted: AtomicBool::new(false),
            auth: Mutex::new(AuthState::Unauthenticated),
        }
    }

    pub fn with_store(mut self, store: FileSessionStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    /// Cancelled when the session ends. Long-running work should stop on it.
    pub fn scope(&self) -> CancellationToken {
        self.scope.clone()
    }

    pub fn auth_state(&self) -> AuthState {
        self.auth.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Authorize as a bot. Exactly one attempt per session.
    ///
    /// Any failure is `Error::Auth` and leaves the session unusable; a second
    /// call never reaches the transport.
    pub async fn authorize_bot(&self, token: &BotToken) -> Result<BotIdentity> {
        if self.auth_attempted.swap(true, Ordering::SeqCst) {
            return Err(Error::Auth(
                "authorization already attempted for this session".to_string(),
            ));
        }

        let req = OutboundRequest::new(
            Issuer::Authenticator,
            Call::AuthorizeBot {
                token: token.clone(),
            },
        );
        let identity = match self.client.invoke(req).await {
            Ok(Reply::Authorized(identity)) => identity,
            Ok(_) => return Err(Error::Auth("unexpected reply to authorize_bot".to_string())),
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                error!(error = %e, "unable to authorize");
                return Err(Error::Auth(e.to_string()));
            }
        };

        *self.auth.lock().unwrap_or_else(|e| e.into_inner()) =
            AuthState::Authenticated(identity.clone());
        info!(bot_id = identity.id.0, username = %identity.username, "authorized");

        if let Some(store) = &self.store {
            self.remember(store, &identity);
        }

        Ok(identity)
    }

    fn remember(&self, store: &FileSessionStore, identity: &BotIdentity) {
        match store.load() {
            Ok(Some(prev)) if prev.bot_id != identity.id => {
                warn!(
                    previous = prev.bot_id.0,
                    current = identity.id.0,
                    "bot identity changed since last session"
                );
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "ignoring unreadable session file"),
        }

        let record = SessionRecord {
            bot_id: identity.id,
            username: identity.username.clone(),
            authorized_at: Utc::now(),
        };
        if let Err(e) = store.save(&record) {
            warn!(error = %e, path = %store.path().display(), "failed to persist session");
        }
    }
}

/// What the bot remembers about its last authorized session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionRecord {
    pub bot_id: UserId,
    pub username: String,
    pub authorized_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<SessionRecord>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&self.path)?;
        Ok(Some(serde_json::from_str(&text)?))
    }

    pub fn save(&self, record: &SessionRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(record)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

/// Owns the connection lifecycle: connect, run a scope, tear down.
pub struct Supervisor {
    connector: Arc<dyn Connector>,
    chain: ChainConfig,
    store: Option<FileSessionStore>,
}

impl Supervisor {
    pub fn new(connector: Arc<dyn Connector>, chain: ChainConfig) -> Self {
        Self {
            connector,
            chain,
            store: None,
        }
    }

    pub fn with_store(mut self, store: FileSessionStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Connect, then run `body` with a live session until it returns or
    /// `shutdown` fires.
    ///
    /// Connect failure is returned as `Error::Connect` without retrying. The
    /// connection is closed and the session scope cancelled on every exit
    /// path, including when this future is dropped.
    pub async fn run<F, Fut, T>(&self, shutdown: &CancellationToken, body: F) -> Result<T>
    where
        F: FnOnce(Arc<Session>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let transport = match self.connector.connect().await {
            Ok(t) => t,
            Err(e @ Error::Connect(_)) => return Err(e),
            Err(e) => return Err(Error::Connect(e.to_string())),
        };
        info!("connected");

        let scope = shutdown.child_token();
        let _teardown = Teardown {
            transport: transport.clone(),
            scope: scope.clone(),
        };

        let chain = MiddlewareChain::standard(transport, self.chain, scope.clone());
        let mut session = Session::new(Client::new(Arc::new(chain)), scope.clone());
        if let Some(store) = &self.store {
            session = session.with_store(store.clone());
        }

        tokio::select! {
            res = body(Arc::new(session)) => res,
            _ = scope.cancelled() => Err(Error::Cancelled),
        }
    }
}

/// Drop guard: ends the session scope and closes the transport.
struct Teardown {
    transport: Arc<dyn Transport>,
    scope: CancellationToken,
}

impl Drop for Teardown {
    fn drop(&mut self) {
        self.scope.cancel();
        self.transport.close();
        info!("disconnected");
    }
}
