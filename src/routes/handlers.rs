use std::path::Path;
use std::time::{Duration, Instant};

use log::debug;
use serde::Deserialize;
use warp::{
    filters::multipart::FormData,
    http::StatusCode,
    reject,
    reply::{json, with_header, with_status, Reply},
};

use crate::environment::Environment;
use crate::errors::BackendError;
use crate::ids;
use crate::io::parse_upload;
use crate::models::{AudioClip, Entity};
use crate::routes::{
    rejection::{Context, Rejection},
    response::SuccessResponse,
};
use crate::tasks::{self, NewTask};
use crate::uri::Uri;

const SERVER_TIMING_HEADER: &str = "server-timing";
type RouteResult = Result<Box<dyn Reply>, reject::Rejection>;

macro_rules! timed {
    ($($expression:stmt);+) => {
        let start = Instant::now();

        let result = { $($expression)+ };

        Ok(Box::new(with_header(
            result,
            SERVER_TIMING_HEADER,
            format_server_timing(start.elapsed()),
        )) as Box<dyn Reply>)
    };
}

/// The body of a task-request call.
#[derive(Debug, Deserialize)]
pub struct TaskRequestBody {
    user_id: String,
}

/// The body of an annotation submission.
#[derive(Debug, Deserialize)]
pub struct SubmissionBody {
    request_uri: Uri,
    user_id: String,
    response: serde_json::Value,
}

pub async fn upload(environment: Environment, content: FormData) -> RouteResult {
    timed! {
        let Environment {
            logger, db, store, ..
        } = environment.clone();

        let error_handler = |e: BackendError| Rejection::new(Context::upload(), e);

        debug!(logger, "Parsing submission...");
        let upload = parse_upload(content).await.map_err(error_handler)?;

        let gid = ids::gid(&upload.audio).to_string();
        let file_ext = upload
            .file_name
            .as_deref()
            .and_then(file_extension)
            .unwrap_or_default();

        let clip = AudioClip::new(file_ext, None);
        let key = clip.storage_key(&gid);
        let uri = Uri::new(AudioClip::KIND, &gid).map_err(error_handler)?;

        debug!(logger, "Saving audio to store..."; "key" => key.clone(), "bytes" => upload.audio.len());
        store
            .upload(&key, mime::APPLICATION_OCTET_STREAM.as_ref(), upload.audio)
            .await
            .map_err(error_handler)?;

        debug!(logger, "Writing record to database..."; "uri" => uri.to_string());
        let flat = clip.to_flat().map_err(error_handler)?;
        db.put(&uri, flat).await.map_err(error_handler)?;

        let location = store.get_url(&key).map_err(error_handler)?;
        let response = SuccessResponse::Upload {
            uri: uri.to_string(),
            key,
        };

        with_header(
            with_status(json(&response), StatusCode::CREATED),
            "location",
            location.as_str(),
        )
    }
}

pub async fn audio(environment: Environment, gid: String) -> RouteResult {
    timed! {
        let error_handler = |e: BackendError| Rejection::new(Context::audio(gid.clone()), e);

        let uri = Uri::new(AudioClip::KIND, gid.clone()).map_err(&error_handler)?;
        debug!(environment.logger, "Retrieving audio record..."; "uri" => uri.to_string());

        let option = environment.db.get(&uri).await.map_err(&error_handler)?;

        match option {
            Some(flat) => {
                let clip = AudioClip::from_flat(&flat).map_err(&error_handler)?;
                let url = environment
                    .store
                    .get_url(&clip.storage_key(uri.gid()))
                    .map_err(&error_handler)?;

                with_status(
                    json(&SuccessResponse::Audio {
                        uri: uri.to_string(),
                        url: url.to_string(),
                        clip,
                    }),
                    StatusCode::OK,
                )
            }
            None => with_status(json(&()), StatusCode::NOT_FOUND),
        }
    }
}

pub async fn raw_audio(environment: Environment, gid: String) -> RouteResult {
    timed! {
        let error_handler = |e: BackendError| Rejection::new(Context::raw_audio(gid.clone()), e);

        let uri = Uri::new(AudioClip::KIND, gid.clone()).map_err(&error_handler)?;
        debug!(environment.logger, "Serving raw audio..."; "uri" => uri.to_string());

        let clip = match environment.db.get(&uri).await.map_err(&error_handler)? {
            Some(flat) => Some(AudioClip::from_flat(&flat).map_err(&error_handler)?),
            None => None,
        };

        let data = match &clip {
            Some(clip) => environment
                .store
                .download(&clip.storage_key(uri.gid()))
                .await
                .map_err(&error_handler)?,
            None => None,
        };

        let reply: Box<dyn Reply> = match data {
            Some(bytes) => Box::new(
                warp::http::Response::builder()
                    .header("content-type", mime::APPLICATION_OCTET_STREAM.as_ref())
                    .body(bytes)
                    .expect("construct raw audio response"),
            ),
            None => Box::new(with_status(json(&()), StatusCode::NOT_FOUND)),
        };

        reply
    }
}

pub async fn taxonomy(environment: Environment, key: String) -> RouteResult {
    timed! {
        debug!(environment.logger, "Resolving taxonomy..."; "key" => key.clone());
        let terms = environment.taxonomy.get(&key).await;

        json(&SuccessResponse::Taxonomy { key, terms })
    }
}

pub async fn create_task(environment: Environment, new_task: NewTask) -> RouteResult {
    timed! {
        let error_handler = |e: BackendError| Rejection::new(Context::create_task(), e);

        debug!(environment.logger, "Creating task..."; "audio_uri" => new_task.audio_uri.to_string());
        let uri = tasks::create_task(environment.db.as_ref(), new_task)
            .await
            .map_err(error_handler)?;

        with_status(
            json(&SuccessResponse::TaskCreated {
                uri: uri.to_string(),
            }),
            StatusCode::CREATED,
        )
    }
}

pub async fn request_task(environment: Environment, body: TaskRequestBody) -> RouteResult {
    timed! {
        let error_handler =
            |e: BackendError| Rejection::new(Context::request_task(body.user_id.clone()), e);

        debug!(environment.logger, "Assigning task..."; "user_id" => body.user_id.clone());
        let assignment = tasks::request_task(
            environment.db.as_ref(),
            environment.store.as_ref(),
            &environment.taxonomy,
            &environment.config,
            &body.user_id,
        )
        .await
        .map_err(&error_handler)?;

        match assignment {
            Some(assignment) => {
                with_status(json(&SuccessResponse::Assignment(assignment)), StatusCode::OK)
            }
            None => with_status(json(&()), StatusCode::NOT_FOUND),
        }
    }
}

pub async fn submit_annotation(environment: Environment, body: SubmissionBody) -> RouteResult {
    timed! {
        let error_handler = |e: BackendError| {
            Rejection::new(Context::submit_annotation(body.request_uri.to_string()), e)
        };

        debug!(environment.logger, "Validating submission..."; "request_uri" => body.request_uri.to_string(), "user_id" => body.user_id.clone());
        let receipt = tasks::submit_annotation(
            environment.db.as_ref(),
            &environment.config,
            &body.request_uri,
            &body.user_id,
            body.response.clone(),
        )
        .await
        .map_err(&error_handler)?;

        with_status(
            json(&SuccessResponse::Submission {
                uri: receipt.annotation_uri.to_string(),
            }),
            StatusCode::CREATED,
        )
    }
}

fn file_extension(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|extension| extension.to_str())
        .map(|extension| format!(".{}", extension))
}

fn format_server_timing(elapsed: Duration) -> String {
    format!("handler;dur={}", elapsed.as_secs_f64() * 1000.0)
}
