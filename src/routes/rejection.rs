use serde::Serialize;
use warp::reject;

use crate::errors::BackendError;

/// Pairs a failed operation's context with the error it produced, so the
/// recovery handler can render both.
#[derive(Debug)]
pub struct Rejection {
    pub(crate) context: Context,
    pub(crate) error: BackendError,
}

impl Rejection {
    pub fn new(context: Context, error: BackendError) -> Self {
        Rejection { context, error }
    }

    pub fn flatten(&self) -> FlattenedRejection {
        FlattenedRejection {
            context: self.context.clone(),
            message: format!("{}", self.error),
        }
    }
}

impl reject::Reject for Rejection {}

/// The client-facing shape of a rejection.
#[derive(Debug, Serialize)]
pub struct FlattenedRejection {
    #[serde(flatten)]
    pub(crate) context: Context,
    pub(crate) message: String,
}

/// Which operation a rejection arose from.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "context", rename_all = "snake_case")]
pub enum Context {
    Audio { gid: String },
    CreateTask,
    RawAudio { gid: String },
    RequestTask { user_id: String },
    SubmitAnnotation { request: String },
    Upload,
}

impl Context {
    pub fn audio(gid: String) -> Context {
        Context::Audio { gid }
    }

    pub fn create_task() -> Context {
        Context::CreateTask
    }

    pub fn raw_audio(gid: String) -> Context {
        Context::RawAudio { gid }
    }

    pub fn request_task(user_id: String) -> Context {
        Context::RequestTask { user_id }
    }

    pub fn submit_annotation(request: String) -> Context {
        Context::SubmitAnnotation { request }
    }

    pub fn upload() -> Context {
        Context::Upload
    }
}
