use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::anyhow;
use async_trait::async_trait;
use shared::{
    domain::NoticeLevel,
    error::ErrorCategory,
    protocol::{ListObjectsRequest, ListedObject},
};
use storage::ProgressSender;
use tokio::sync::Notify;

use super::*;

struct TestStore {
    calls: AtomicUsize,
    keys: Mutex<Vec<StorageKey>>,
    fail_with: Option<String>,
    /// Fractions of the file reported as progress, in order.
    progress_steps: Vec<u64>,
    gate: Option<Arc<Notify>>,
}

impl TestStore {
    fn ok() -> Arc<Self> {
        Arc::new(Self::build(None, vec![25, 50, 100], None))
    }

    fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self::build(Some(message.into()), vec![40], None))
    }

    fn with_progress(steps: Vec<u64>) -> Arc<Self> {
        Arc::new(Self::build(None, steps, None))
    }

    fn gated(gate: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self::build(None, vec![100], Some(gate)))
    }

    fn build(
        fail_with: Option<String>,
        progress_steps: Vec<u64>,
        gate: Option<Arc<Notify>>,
    ) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            keys: Mutex::new(Vec::new()),
            fail_with,
            progress_steps,
            gate,
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for TestStore {
    async fn upload_object(
        &self,
        key: &StorageKey,
        file: &SelectedFile,
        _options: &UploadOptions,
        progress: ProgressSender,
    ) -> Result<StoredObject, StorageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.keys.lock().await.push(key.clone());
        let total = file.size_bytes;
        let _ = progress.send(TransferProgress::new(0, total));
        for percent in &self.progress_steps {
            let _ = progress.send(TransferProgress::new(total * percent / 100, total));
            tokio::task::yield_now().await;
        }
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(message) = &self.fail_with {
            return Err(StorageError::Backend {
                status: 500,
                message: message.clone(),
            });
        }
        Ok(StoredObject {
            key: key.clone(),
            path: format!("videos/{key}"),
        })
    }

    async fn list_objects(
        &self,
        _request: &ListObjectsRequest,
    ) -> Result<Vec<ListedObject>, StorageError> {
        Ok(Vec::new())
    }

    fn public_url(&self, name: &str) -> String {
        format!("http://127.0.0.1/storage/v1/object/public/videos/{name}")
    }
}

struct TestRelay {
    calls: AtomicUsize,
    reject_with: Option<String>,
}

impl TestRelay {
    fn ok() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            reject_with: None,
        })
    }

    fn rejecting(message: &str) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            reject_with: Some(message.into()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RelayClient for TestRelay {
    async fn relay(&self, _target: &RelayTarget, _file: &SelectedFile) -> Result<(), RelayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.reject_with {
            Some(message) => Err(RelayError::Rejected(message.clone())),
            None => Ok(()),
        }
    }
}

struct ScriptedPicker(Option<Result<SelectedFile, String>>);

#[async_trait]
impl FilePicker for ScriptedPicker {
    async fn request(&self) -> anyhow::Result<PickOutcome> {
        match &self.0 {
            None => Ok(PickOutcome::Cancelled),
            Some(Ok(file)) => Ok(PickOutcome::Picked(file.clone())),
            Some(Err(message)) => Err(anyhow!(message.clone())),
        }
    }
}

fn ready_relay() -> RelayConfig {
    RelayConfig::Ready(RelayTarget {
        api_id: "12345".into(),
        api_hash: "0123abcd".into(),
        server_url: "relay.example.com".into(),
    })
}

fn video() -> SelectedFile {
    SelectedFile::new("clip.mp4", "video/mp4", vec![7u8; 1000])
}

fn drain(rx: &mut broadcast::Receiver<ControllerEvent>) -> Vec<ControllerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn notices(events: &[ControllerEvent]) -> Vec<Notice> {
    events
        .iter()
        .filter_map(|event| match event {
            ControllerEvent::Notice(notice) => Some(notice.clone()),
            _ => None,
        })
        .collect()
}

fn uploading_progress(events: &[ControllerEvent]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|event| match event {
            ControllerEvent::StateChanged(UploadState::Uploading { progress }) => Some(*progress),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn non_video_selection_changes_nothing_and_notifies() {
    let controller = UploadController::new(TestStore::ok(), TestRelay::ok(), RelayConfig::Disabled);
    let mut rx = controller.subscribe_events();

    for mime in ["image/png", "text/plain", "application/octet-stream", ""] {
        let err = controller
            .select_file(SelectedFile::new("file", mime, vec![1]))
            .await
            .expect_err("must be rejected");
        assert!(matches!(err, UploadError::InvalidFileType { .. }));
        assert_eq!(err.category(), ErrorCategory::Validation);
    }

    assert_eq!(controller.state().await, UploadState::Idle);
    assert_eq!(controller.selected_file().await, None);
    let events = drain(&mut rx);
    assert_eq!(notices(&events).len(), 4);
    assert!(notices(&events)
        .iter()
        .all(|notice| notice.level == NoticeLevel::Error));
    assert!(!events
        .iter()
        .any(|event| matches!(event, ControllerEvent::StateChanged(_))));
}

#[tokio::test]
async fn non_video_selection_keeps_previous_choice() {
    let controller = UploadController::new(TestStore::ok(), TestRelay::ok(), RelayConfig::Disabled);
    controller.select_file(video()).await.expect("select");

    let _ = controller
        .select_file(SelectedFile::new("cover.png", "image/png", vec![1]))
        .await;

    assert_eq!(controller.state().await, UploadState::Selected);
    assert_eq!(controller.selected_file().await, Some(video()));
}

#[tokio::test]
async fn video_selection_moves_to_selected_exactly_once() {
    let controller = UploadController::new(TestStore::ok(), TestRelay::ok(), RelayConfig::Disabled);
    let mut rx = controller.subscribe_events();

    controller.select_file(video()).await.expect("select");

    assert_eq!(controller.selected_file().await, Some(video()));
    let events = drain(&mut rx);
    let transitions: Vec<_> = events
        .iter()
        .filter(|event| matches!(event, ControllerEvent::StateChanged(_)))
        .collect();
    assert_eq!(
        transitions,
        vec![&ControllerEvent::StateChanged(UploadState::Selected)]
    );
    let confirmation = &notices(&events)[0];
    assert_eq!(confirmation.level, NoticeLevel::Info);
    assert!(confirmation.description.contains("clip.mp4"));
}

#[tokio::test]
async fn upload_without_selection_never_touches_the_network() {
    let store = TestStore::ok();
    let relay = TestRelay::ok();
    let controller = UploadController::new(store.clone(), relay.clone(), ready_relay());
    let mut rx = controller.subscribe_events();

    let err = controller.upload().await.expect_err("nothing selected");

    assert_eq!(err, UploadError::NoFileSelected);
    assert_eq!(store.calls(), 0);
    assert_eq!(relay.calls(), 0);
    assert_eq!(controller.state().await, UploadState::Idle);
    assert_eq!(notices(&drain(&mut rx)).len(), 1);
}

#[tokio::test]
async fn second_upload_in_flight_is_rejected() {
    let store = TestStore::ok();
    let controller = UploadController::new(store.clone(), TestRelay::ok(), RelayConfig::Disabled);
    controller.select_file(video()).await.expect("select");

    let (first, second) = tokio::join!(controller.upload(), controller.upload());

    let outcomes = [first, second];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes
        .iter()
        .any(|r| matches!(r, Err(UploadError::NoFileSelected))));
    assert_eq!(store.calls(), 1);
    assert_eq!(controller.state().await, UploadState::Succeeded);
}

#[tokio::test]
async fn selection_is_refused_while_uploading() {
    let gate = Arc::new(Notify::new());
    let store = TestStore::gated(gate.clone());
    let controller = UploadController::new(store.clone(), TestRelay::ok(), RelayConfig::Disabled);
    controller.select_file(video()).await.expect("select");

    let running = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move { controller.upload().await })
    };
    while !controller.state().await.is_uploading() {
        tokio::task::yield_now().await;
    }

    let err = controller
        .select_file(SelectedFile::new("other.mp4", "video/mp4", vec![1]))
        .await
        .expect_err("busy");
    assert_eq!(err, UploadError::UploadInProgress);
    assert_eq!(
        controller.reset().await,
        Err(UploadError::UploadInProgress)
    );

    gate.notify_one();
    running.await.expect("join").expect("upload");
    assert_eq!(controller.state().await, UploadState::Succeeded);
    assert_eq!(store.calls(), 1);
}

#[tokio::test]
async fn success_without_relay_stores_once_and_clears_selection() {
    let store = TestStore::ok();
    let relay = TestRelay::ok();
    let controller = UploadController::new(store.clone(), relay.clone(), RelayConfig::Disabled);
    let mut rx = controller.subscribe_events();
    controller.select_file(video()).await.expect("select");

    let receipt = controller.upload().await.expect("upload");

    assert_eq!(controller.state().await, UploadState::Succeeded);
    assert_eq!(controller.selected_file().await, None);
    assert_eq!(store.calls(), 1);
    assert_eq!(relay.calls(), 0);
    assert!(!receipt.relayed);
    assert!(receipt.key.as_str().ends_with(".mp4"));
    assert_ne!(receipt.key.as_str(), "clip.mp4");
    assert_eq!(store.keys.lock().await.clone(), vec![receipt.key.clone()]);
    assert_eq!(receipt.path, format!("videos/{}", receipt.key));

    let events = drain(&mut rx);
    assert!(events.contains(&ControllerEvent::ListingInvalidated));
    let last_notice = notices(&events).pop().expect("success notice");
    assert_eq!(last_notice.level, NoticeLevel::Success);
}

#[tokio::test]
async fn success_with_relay_forwards_after_storage() {
    let store = TestStore::ok();
    let relay = TestRelay::ok();
    let controller = UploadController::new(store.clone(), relay.clone(), ready_relay());
    let mut rx = controller.subscribe_events();
    controller.select_file(video()).await.expect("select");

    let receipt = controller.upload().await.expect("upload");

    assert!(receipt.relayed);
    assert_eq!(store.calls(), 1);
    assert_eq!(relay.calls(), 1);
    let success = notices(&drain(&mut rx)).pop().expect("notice");
    assert!(success.description.contains("relayed"));
}

#[tokio::test]
async fn relay_rejection_fails_with_backend_text_and_clears_selection() {
    let store = TestStore::ok();
    let relay = TestRelay::rejecting("FLOOD_WAIT_30");
    let controller = UploadController::new(store.clone(), relay.clone(), ready_relay());
    let mut rx = controller.subscribe_events();
    controller.select_file(video()).await.expect("select");

    let err = controller.upload().await.expect_err("relay rejected");

    assert_eq!(err, UploadError::RelayFailed("FLOOD_WAIT_30".into()));
    assert!(matches!(
        controller.state().await,
        UploadState::Failed { ref reason } if reason.contains("FLOOD_WAIT_30")
    ));
    assert_eq!(controller.selected_file().await, None);
    assert_eq!(store.calls(), 1);
    assert_eq!(relay.calls(), 1);

    let events = drain(&mut rx);
    let failure = notices(&events).pop().expect("failure notice");
    assert_eq!(failure.level, NoticeLevel::Error);
    assert!(failure.description.contains("FLOOD_WAIT_30"));
    assert!(!events.contains(&ControllerEvent::ListingInvalidated));
}

#[tokio::test]
async fn storage_failure_never_reaches_the_relay() {
    let store = TestStore::failing("bucket not found");
    let relay = TestRelay::ok();
    let controller = UploadController::new(store.clone(), relay.clone(), ready_relay());
    controller.select_file(video()).await.expect("select");

    let err = controller.upload().await.expect_err("storage failed");

    assert!(matches!(err, UploadError::StorageUploadFailed(ref m) if m.contains("bucket not found")));
    assert!(matches!(controller.state().await, UploadState::Failed { .. }));
    assert_eq!(controller.selected_file().await, None);
    assert_eq!(store.calls(), 1);
    assert_eq!(relay.calls(), 0);
}

#[tokio::test]
async fn unresolved_relay_config_blocks_before_any_call() {
    for config in [
        RelayConfig::NotLoaded,
        RelayConfig::Unavailable("HTTP 406".into()),
    ] {
        let store = TestStore::ok();
        let relay = TestRelay::ok();
        let controller = UploadController::new(store.clone(), relay.clone(), config);
        controller.select_file(video()).await.expect("select");

        let err = controller.upload().await.expect_err("config missing");

        assert!(matches!(err, UploadError::ConfigurationUnavailable(_)));
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert_eq!(controller.state().await, UploadState::Selected);
        assert_eq!(controller.selected_file().await, Some(video()));
        assert_eq!(store.calls(), 0);
        assert_eq!(relay.calls(), 0);
    }
}

#[tokio::test]
async fn loading_relay_config_unblocks_uploads() {
    let relay = TestRelay::ok();
    let controller = UploadController::new(TestStore::ok(), relay.clone(), RelayConfig::NotLoaded);
    controller.select_file(video()).await.expect("select");
    assert!(controller.upload().await.is_err());

    let source = StaticConfigSource::new(RelayTarget {
        api_id: "12345".into(),
        api_hash: "0123abcd".into(),
        server_url: "relay.example.com".into(),
    });
    let config = controller.load_relay_config(&source).await;
    assert_eq!(config, ready_relay());

    controller.upload().await.expect("upload");
    assert_eq!(relay.calls(), 1);
}

#[tokio::test]
async fn progress_is_monotonic_and_restarts_at_zero() {
    let store = TestStore::with_progress(vec![60, 30, 90, 100]);
    let controller = UploadController::new(store, TestRelay::ok(), RelayConfig::Disabled);
    let mut rx = controller.subscribe_events();

    for _ in 0..2 {
        controller.select_file(video()).await.expect("select");
        controller.upload().await.expect("upload");

        let progress = uploading_progress(&drain(&mut rx));
        assert_eq!(progress.first(), Some(&0));
        assert!(
            progress.windows(2).all(|pair| pair[0] <= pair[1]),
            "progress went backwards: {progress:?}"
        );
        assert_eq!(progress.last(), Some(&100));
        assert_eq!(controller.state().await.progress(), 0);
    }
}

#[tokio::test]
async fn terminal_state_holds_until_reset_or_new_selection() {
    let controller = UploadController::new(TestStore::ok(), TestRelay::ok(), RelayConfig::Disabled);
    controller.select_file(video()).await.expect("select");
    controller.upload().await.expect("upload");
    assert_eq!(controller.state().await, UploadState::Succeeded);

    controller.reset().await.expect("reset");
    assert_eq!(controller.state().await, UploadState::Idle);

    let failing = UploadController::new(
        TestStore::failing("boom"),
        TestRelay::ok(),
        RelayConfig::Disabled,
    );
    failing.select_file(video()).await.expect("select");
    let _ = failing.upload().await;
    failing.select_file(video()).await.expect("reselect");
    assert_eq!(failing.state().await, UploadState::Selected);
}

#[tokio::test]
async fn choose_file_handles_cancel_pick_and_read_errors() {
    let controller = UploadController::new(TestStore::ok(), TestRelay::ok(), RelayConfig::Disabled);

    let picked = controller
        .choose_file(&ScriptedPicker(None))
        .await
        .expect("cancel");
    assert!(!picked);
    assert_eq!(controller.state().await, UploadState::Idle);

    let picked = controller
        .choose_file(&ScriptedPicker(Some(Ok(video()))))
        .await
        .expect("pick");
    assert!(picked);
    assert_eq!(controller.state().await, UploadState::Selected);

    let err = controller
        .choose_file(&ScriptedPicker(Some(Err("permission denied".into()))))
        .await
        .expect_err("unreadable");
    assert!(matches!(err, UploadError::UnknownError(ref m) if m.contains("permission denied")));
    assert_eq!(controller.selected_file().await, Some(video()));
}

#[test]
fn relay_errors_map_by_cause() {
    assert_eq!(
        relay_failure(RelayError::Rejected("FILE_PARTS_INVALID".into())),
        UploadError::RelayFailed("FILE_PARTS_INVALID".into())
    );
    assert!(matches!(
        relay_failure(RelayError::Status {
            status: 502,
            message: "bad gateway".into()
        }),
        UploadError::RelayFailed(_)
    ));
    assert!(matches!(
        relay_failure(RelayError::Decode("expected value".into())),
        UploadError::UnknownError(_)
    ));
}

#[test]
fn storage_errors_map_by_cause() {
    let conflict = storage_failure(StorageError::ObjectConflict {
        key: StorageKey("abc.mp4".into()),
        message: "The resource already exists".into(),
    });
    assert!(matches!(conflict, UploadError::StorageUploadFailed(ref m) if m.contains("already exists")));
    assert!(matches!(
        storage_failure(StorageError::InvalidConfig("bucket name is empty".into())),
        UploadError::UnknownError(_)
    ));
}
