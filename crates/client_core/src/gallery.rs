//! Cached listing of previously uploaded videos.

use std::sync::Arc;

use shared::{
    domain::RemoteObjectRecord,
    protocol::{ListObjectsRequest, ListedObject},
};
use storage::{ObjectStore, StorageError};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::ControllerEvent;

pub struct VideoGallery {
    store: Arc<dyn ObjectStore>,
    request: ListObjectsRequest,
    cache: Mutex<Option<Vec<RemoteObjectRecord>>>,
}

impl VideoGallery {
    pub fn new(store: Arc<dyn ObjectStore>) -> Arc<Self> {
        Self::with_request(store, ListObjectsRequest::default())
    }

    pub fn with_request(store: Arc<dyn ObjectStore>, request: ListObjectsRequest) -> Arc<Self> {
        Arc::new(Self {
            store,
            request,
            cache: Mutex::new(None),
        })
    }

    /// Cached listing, fetched on first use or after an invalidation.
    pub async fn videos(&self) -> Result<Vec<RemoteObjectRecord>, StorageError> {
        let mut cache = self.cache.lock().await;
        if let Some(records) = cache.as_ref() {
            return Ok(records.clone());
        }
        let records = self.fetch().await?;
        *cache = Some(records.clone());
        Ok(records)
    }

    pub async fn refresh(&self) -> Result<Vec<RemoteObjectRecord>, StorageError> {
        self.invalidate().await;
        self.videos().await
    }

    pub async fn invalidate(&self) {
        if self.cache.lock().await.take().is_some() {
            debug!("video listing invalidated");
        }
    }

    pub async fn handle_event(&self, event: &ControllerEvent) {
        if matches!(event, ControllerEvent::ListingInvalidated) {
            self.invalidate().await;
        }
    }

    /// Drops the cached listing whenever the controller reports a completed upload.
    pub fn spawn_invalidation_listener(
        self: &Arc<Self>,
        mut events: broadcast::Receiver<ControllerEvent>,
    ) -> JoinHandle<()> {
        let gallery = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => gallery.handle_event(&event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "gallery listener lagged; invalidating listing");
                        gallery.invalidate().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    async fn fetch(&self) -> Result<Vec<RemoteObjectRecord>, StorageError> {
        let listed = self.store.list_objects(&self.request).await?;
        let records: Vec<_> = listed
            .into_iter()
            .filter(|object| object.id.is_some())
            .map(|object| self.record(object))
            .collect();
        debug!(count = records.len(), "video listing fetched");
        Ok(records)
    }

    fn record(&self, object: ListedObject) -> RemoteObjectRecord {
        let (size_bytes, mime_type) = match object.metadata {
            Some(meta) => (meta.size, meta.mimetype),
            None => (None, None),
        };
        RemoteObjectRecord {
            public_url: self.store.public_url(&object.name),
            name: object.name,
            size_bytes,
            mime_type,
            created_at: object.created_at,
            updated_at: object.updated_at,
        }
    }
}

#[cfg(test)]
#[path = "tests/gallery_tests.rs"]
mod tests;
