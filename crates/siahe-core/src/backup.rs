//! Periodic database backup.
//!
//! Every tick reads the snapshot source, uploads it through the session's
//! outbound path and sends the document to the backup chat. Ticks never
//! overlap: a tick that finds the job busy is skipped.

use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use chrono::Local;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    config::Config,
    domain::{Artifact, ChatId, MessageRef},
    session::Client,
    transport::Issuer,
    Error, Result,
};

/// Read-only view of the persisted data. Mutated elsewhere.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    fn describe(&self) -> String;

    async fn read(&self) -> Result<Vec<u8>>;
}

/// The SQLite file on disk.
pub struct FileSnapshot {
    path: PathBuf,
}

impl FileSnapshot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SnapshotSource for FileSnapshot {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn read(&self) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(&self.path).await?)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackupState {
    Idle,
    Uploading,
    Delivering,
}

#[derive(Clone, Debug)]
pub enum BackupOutcome {
    Delivered(MessageRef),
    Failed,
    /// The session ended mid-tick.
    Interrupted,
    /// Another tick was still running.
    Skipped,
}

pub struct BackupJob {
    source: Arc<dyn SnapshotSource>,
    destination: ChatId,
    file_name: String,
    mime: String,
    interval: Duration,
    state: Mutex<BackupState>,
}

impl BackupJob {
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        destination: ChatId,
        file_name: impl Into<String>,
        mime: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            destination,
            file_name: file_name.into(),
            mime: mime.into(),
            interval,
            state: Mutex::new(BackupState::Idle),
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(
            Arc::new(FileSnapshot::new(cfg.sqlite_path.clone())),
            cfg.backup_chat,
            cfg.backup_file_name.clone(),
            cfg.backup_mime.clone(),
            cfg.backup_interval,
        )
    }

    pub fn state(&self) -> BackupState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Tick immediately, then every `interval`, until `scope` is cancelled.
    ///
    /// Ticks that fall due while one is running are dropped, not queued.
    pub async fn run(self: Arc<Self>, client: Client, scope: CancellationToken) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            source = %self.source.describe(),
            chat = self.destination.0,
            every = ?self.interval,
            "backup job started"
        );
        loop {
            tokio::select! {
                biased;
                _ = scope.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.tick(&client).await;
        }
        info!("backup job stopped");
    }

    /// One backup attempt. Never fails the caller: errors are logged and the
    /// job returns to idle for the next tick.
    pub async fn tick(&self, client: &Client) -> BackupOutcome {
        let Some(run) = self.try_begin() else {
            info!("backup already in progress, skipping tick");
            return BackupOutcome::Skipped;
        };

        match self.upload_and_deliver(client, &run).await {
            Ok(msg) => {
                info!(
                    chat = msg.chat_id.0,
                    message_id = msg.message_id.0,
                    "backup delivered"
                );
                BackupOutcome::Delivered(msg)
            }
            Err(Error::Cancelled) => {
                warn!("backup interrupted by shutdown");
                BackupOutcome::Interrupted
            }
            Err(e) => {
                error!(error = %e, source = %self.source.describe(), "backup failed");
                BackupOutcome::Failed
            }
        }
    }

    async fn upload_and_deliver(&self, client: &Client, run: &RunGuard<'_>) -> Result<MessageRef> {
        let bytes = self.source.read().await?;
        let artifact = Artifact {
            name: self.file_name.clone(),
            mime: self.mime.clone(),
            bytes: Arc::new(bytes),
        };
        let file = client.upload(Issuer::Backup, artifact).await?;

        run.advance(BackupState::Delivering);
        let caption = format!("Backup {}", Local::now().format("%Y-%m-%d %H:%M:%S"));
        client
            .send_document(Issuer::Backup, self.destination, file, Some(caption))
            .await
    }

    fn try_begin(&self) -> Option<RunGuard<'_>> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state != BackupState::Idle {
            return None;
        }
        *state = BackupState::Uploading;
        Some(RunGuard { state: &self.state })
    }
}

/// Holds the job out of `Idle` for one tick; always restores it.
struct RunGuard<'a> {
    state: &'a Mutex<BackupState>,
}

impl RunGuard<'_> {
    fn advance(&self, next: BackupState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = next;
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.advance(BackupState::Idle);
    }
}
