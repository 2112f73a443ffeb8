//! Pure upload lifecycle transitions: `(state, input) -> (state, notice, effect)`.
//!
//! Nothing here touches the network or the event channel; the controller
//! applies the returned effect and dispatches the notice.

use shared::{
    domain::{Notice, TransferProgress, UploadState, VIDEO_MIME_PREFIX},
    error::UploadError,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayReadiness {
    Disabled,
    Ready,
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    FileChosen {
        name: String,
        mime_type: String,
    },
    FileUnreadable {
        reason: String,
    },
    UploadRequested {
        has_file: bool,
        relay: RelayReadiness,
    },
    Progress(TransferProgress),
    Finished {
        outcome: Result<(), UploadError>,
        relayed: bool,
    },
    Reset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    None,
    Reject(UploadError),
    StoreSelection,
    BeginUpload,
    ClearSelection { invalidate_listing: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub state: UploadState,
    pub notice: Option<Notice>,
    pub effect: Effect,
}

impl Transition {
    fn stay(state: &UploadState) -> Self {
        Self {
            state: state.clone(),
            notice: None,
            effect: Effect::None,
        }
    }

    fn reject(state: &UploadState, error: UploadError, notify: bool) -> Self {
        let notice = notify.then(|| Notice::error(error.title(), error.to_string()));
        Self {
            state: state.clone(),
            notice,
            effect: Effect::Reject(error),
        }
    }
}

pub fn transition(state: &UploadState, input: &Input) -> Transition {
    match input {
        Input::FileChosen { name, mime_type } => {
            if state.is_uploading() {
                return Transition::reject(state, UploadError::UploadInProgress, true);
            }
            if !mime_type.starts_with(VIDEO_MIME_PREFIX) {
                return Transition::reject(
                    state,
                    UploadError::InvalidFileType {
                        mime_type: mime_type.clone(),
                    },
                    true,
                );
            }
            Transition {
                state: UploadState::Selected,
                notice: Some(Notice::info("Video selected", format!("Selected: {name}"))),
                effect: Effect::StoreSelection,
            }
        }
        Input::FileUnreadable { reason } => Transition::reject(
            state,
            UploadError::UnknownError(format!("could not read the chosen file: {reason}")),
            true,
        ),
        Input::UploadRequested { has_file, relay } => {
            // A second request while a transfer is running is dropped silently.
            if state.is_uploading() {
                return Transition::reject(state, UploadError::NoFileSelected, false);
            }
            if !has_file || *state != UploadState::Selected {
                return Transition::reject(state, UploadError::NoFileSelected, true);
            }
            if let RelayReadiness::Unavailable(reason) = relay {
                return Transition::reject(
                    state,
                    UploadError::ConfigurationUnavailable(reason.clone()),
                    true,
                );
            }
            Transition {
                state: UploadState::Uploading { progress: 0 },
                notice: None,
                effect: Effect::BeginUpload,
            }
        }
        Input::Progress(update) => match state {
            UploadState::Uploading { progress } => {
                let next = update.percent().max(*progress);
                Transition::stay(&UploadState::Uploading { progress: next })
            }
            _ => Transition::stay(state),
        },
        Input::Finished { outcome, relayed } => {
            if !state.is_uploading() {
                return Transition::stay(state);
            }
            match outcome {
                Ok(()) => {
                    let description = if *relayed {
                        "Video uploaded and relayed successfully!"
                    } else {
                        "Video uploaded successfully!"
                    };
                    Transition {
                        state: UploadState::Succeeded,
                        notice: Some(Notice::success("Success", description)),
                        effect: Effect::ClearSelection {
                            invalidate_listing: true,
                        },
                    }
                }
                Err(error) => Transition {
                    state: UploadState::Failed {
                        reason: error.to_string(),
                    },
                    notice: Some(Notice::error(
                        error.title(),
                        format!("Failed to upload video: {error}"),
                    )),
                    effect: Effect::ClearSelection {
                        invalidate_listing: false,
                    },
                },
            }
        }
        Input::Reset => {
            if state.is_uploading() {
                return Transition::reject(state, UploadError::UploadInProgress, false);
            }
            Transition {
                state: UploadState::Idle,
                notice: None,
                effect: Effect::ClearSelection {
                    invalidate_listing: false,
                },
            }
        }
    }
}
