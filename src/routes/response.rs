use serde::Serialize;

use crate::models::AudioClip;
use crate::tasks::TaskAssignment;

/// The body shapes of successful responses.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum SuccessResponse {
    Assignment(TaskAssignment),
    Audio {
        uri: String,
        url: String,
        #[serde(flatten)]
        clip: AudioClip,
    },
    Submission {
        uri: String,
    },
    TaskCreated {
        uri: String,
    },
    Taxonomy {
        key: String,
        terms: Vec<String>,
    },
    Upload {
        uri: String,
        key: String,
    },
}
