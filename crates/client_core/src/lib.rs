use std::{sync::Arc, time::Instant};

use futures::StreamExt;
use relay::{RelayClient, RelayError};
use shared::{
    domain::{Notice, RelayTarget, SelectedFile, StorageKey, TransferProgress, UploadState},
    error::UploadError,
};
use storage::{progress_channel, ObjectStore, StorageError, StoredObject, UploadOptions};
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, error, info, warn};

pub mod config;
pub mod gallery;
pub mod key;
pub mod picker;
pub mod settings;
pub mod transition;

pub use config::{
    resolve_relay_config, CachedConfigSource, ConfigError, ConfigSource, RelayConfig,
    RestConfigSource, StaticConfigSource,
};
pub use gallery::VideoGallery;
pub use picker::{FilePicker, PathFilePicker, PickOutcome};

use key::storage_key;
use transition::{transition, Effect, Input, Transition};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    StateChanged(UploadState),
    Notice(Notice),
    /// A new object landed in storage; cached listings are stale.
    ListingInvalidated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub key: StorageKey,
    pub path: String,
    pub relayed: bool,
}

pub struct UploadController {
    store: Arc<dyn ObjectStore>,
    relay: Arc<dyn RelayClient>,
    relay_config: RwLock<RelayConfig>,
    options: UploadOptions,
    inner: Mutex<ControllerState>,
    events: broadcast::Sender<ControllerEvent>,
}

struct ControllerState {
    state: UploadState,
    selected: Option<SelectedFile>,
}

impl UploadController {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        relay: Arc<dyn RelayClient>,
        relay_config: RelayConfig,
    ) -> Arc<Self> {
        Self::new_with_options(store, relay, relay_config, UploadOptions::default())
    }

    pub fn new_with_options(
        store: Arc<dyn ObjectStore>,
        relay: Arc<dyn RelayClient>,
        relay_config: RelayConfig,
        options: UploadOptions,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(1024);
        Arc::new(Self {
            store,
            relay,
            relay_config: RwLock::new(relay_config),
            options,
            inner: Mutex::new(ControllerState {
                state: UploadState::Idle,
                selected: None,
            }),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    pub async fn state(&self) -> UploadState {
        self.inner.lock().await.state.clone()
    }

    pub async fn selected_file(&self) -> Option<SelectedFile> {
        self.inner.lock().await.selected.clone()
    }

    pub async fn relay_config(&self) -> RelayConfig {
        self.relay_config.read().await.clone()
    }

    pub async fn set_relay_config(&self, config: RelayConfig) {
        *self.relay_config.write().await = config;
    }

    /// Resolves `source` and installs the result, `Unavailable` on failure.
    pub async fn load_relay_config(&self, source: &dyn ConfigSource) -> RelayConfig {
        let config = resolve_relay_config(source).await;
        self.set_relay_config(config.clone()).await;
        config
    }

    pub async fn select_file(&self, candidate: SelectedFile) -> Result<(), UploadError> {
        let mut inner = self.inner.lock().await;
        let step = transition(
            &inner.state,
            &Input::FileChosen {
                name: candidate.name.clone(),
                mime_type: candidate.mime_type.clone(),
            },
        );
        self.apply(&mut inner, step, Some(candidate))
    }

    /// Returns `Ok(false)` when the picker was dismissed.
    pub async fn choose_file(&self, picker: &dyn FilePicker) -> Result<bool, UploadError> {
        match picker.request().await {
            Ok(PickOutcome::Picked(file)) => self.select_file(file).await.map(|()| true),
            Ok(PickOutcome::Cancelled) => {
                debug!("file selection cancelled");
                Ok(false)
            }
            Err(err) => {
                let mut inner = self.inner.lock().await;
                let step = transition(
                    &inner.state,
                    &Input::FileUnreadable {
                        reason: format!("{err:#}"),
                    },
                );
                self.apply(&mut inner, step, None).map(|()| false)
            }
        }
    }

    pub async fn reset(&self) -> Result<(), UploadError> {
        let mut inner = self.inner.lock().await;
        let step = transition(&inner.state, &Input::Reset);
        self.apply(&mut inner, step, None)
    }

    /// Stores the selected file and, when the relay is enabled, forwards it.
    ///
    /// The relay only runs after storage succeeded. Either way the selection
    /// is consumed; the terminal state stays visible until the next
    /// selection or `reset()`.
    pub async fn upload(&self) -> Result<UploadReceipt, UploadError> {
        let relay_config = self.relay_config.read().await.clone();
        let file = {
            let mut inner = self.inner.lock().await;
            let selected = inner.selected.clone();
            let step = transition(
                &inner.state,
                &Input::UploadRequested {
                    has_file: selected.is_some(),
                    relay: relay_config.readiness(),
                },
            );
            self.apply(&mut inner, step, None)?;
            selected.ok_or(UploadError::NoFileSelected)?
        };

        let target = relay_config.target();
        let started = Instant::now();
        let outcome = self.transfer(&file, target).await;
        let relayed = target.is_some();

        {
            let mut inner = self.inner.lock().await;
            let step = transition(
                &inner.state,
                &Input::Finished {
                    outcome: outcome.as_ref().map(|_| ()).map_err(|err| err.clone()),
                    relayed,
                },
            );
            self.apply(&mut inner, step, None)?;
        }

        let stored = outcome?;
        info!(
            key = %stored.key,
            relayed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "upload finished"
        );
        Ok(UploadReceipt {
            key: stored.key,
            path: stored.path,
            relayed,
        })
    }

    async fn transfer(
        &self,
        file: &SelectedFile,
        target: Option<&RelayTarget>,
    ) -> Result<StoredObject, UploadError> {
        let key = storage_key(file);
        info!(
            %key,
            name = %file.name,
            size_bytes = file.size_bytes,
            relay = target.is_some(),
            "starting upload"
        );

        let (progress_tx, mut progress_rx) = progress_channel();
        let stored = {
            let upload = self
                .store
                .upload_object(&key, file, &self.options, progress_tx);
            tokio::pin!(upload);
            loop {
                tokio::select! {
                    result = &mut upload => break result,
                    Some(update) = progress_rx.next() => self.record_progress(update).await,
                }
            }
        };
        for update in progress_rx.drain_ready() {
            self.record_progress(update).await;
        }

        let stored = stored.map_err(|err| {
            error!(%key, error = %err, "storage upload failed");
            storage_failure(err)
        })?;

        if let Some(target) = target {
            if let Err(err) = self.relay.relay(target, file).await {
                warn!(
                    key = %stored.key,
                    path = %stored.path,
                    error = %err,
                    "relay failed; stored object left in place"
                );
                return Err(relay_failure(err));
            }
            info!(key = %stored.key, server_url = %target.server_url, "video relayed");
        }

        Ok(stored)
    }

    async fn record_progress(&self, update: TransferProgress) {
        let mut inner = self.inner.lock().await;
        let step = transition(&inner.state, &Input::Progress(update));
        if step.state != inner.state {
            debug!(
                bytes = update.bytes_transferred,
                total = update.total_bytes,
                percent = step.state.progress(),
                "upload progress"
            );
        }
        let _ = self.apply(&mut inner, step, None);
    }

    fn apply(
        &self,
        inner: &mut ControllerState,
        step: Transition,
        candidate: Option<SelectedFile>,
    ) -> Result<(), UploadError> {
        if step.state != inner.state {
            inner.state = step.state.clone();
            let _ = self.events.send(ControllerEvent::StateChanged(step.state));
        }
        if let Some(notice) = step.notice {
            debug!(level = ?notice.level, title = %notice.title, "notice");
            let _ = self.events.send(ControllerEvent::Notice(notice));
        }
        match step.effect {
            Effect::None | Effect::BeginUpload => Ok(()),
            Effect::Reject(err) => Err(err),
            Effect::StoreSelection => {
                inner.selected = candidate;
                Ok(())
            }
            Effect::ClearSelection { invalidate_listing } => {
                inner.selected = None;
                if invalidate_listing {
                    let _ = self.events.send(ControllerEvent::ListingInvalidated);
                }
                Ok(())
            }
        }
    }
}

fn storage_failure(err: StorageError) -> UploadError {
    match err {
        StorageError::InvalidConfig(message) => UploadError::UnknownError(message),
        other => UploadError::StorageUploadFailed(other.to_string()),
    }
}

fn relay_failure(err: RelayError) -> UploadError {
    match err {
        RelayError::Status { .. } | RelayError::Rejected(_) | RelayError::InvalidEndpoint(_) => {
            UploadError::RelayFailed(err.to_string())
        }
        RelayError::Transport(_) | RelayError::Decode(_) => {
            UploadError::UnknownError(err.to_string())
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
