use std::sync::Arc;

use log::{error, Logger};
use warp::http::StatusCode;
use warp::reject;
use warp::reply::{json, with_status, Json, WithStatus};

use crate::errors::{BackendError, RejectReason};

mod handlers;
mod rejection;
mod response;

pub use internal::*;

/// The maximum form data size to accept. This should be enforced by
/// the HTTP gateway, so on the Rust side it’s set to an unreasonably
/// large number.
const MAX_CONTENT_LENGTH: u64 = 2 * 1024 * 1024 * 1024;

pub async fn format_rejection(
    logger: Arc<Logger>,
    rej: reject::Rejection,
) -> Result<WithStatus<Json>, reject::Rejection> {
    if let Some(r) = rej.find::<rejection::Rejection>() {
        let e = &r.error;
        error!(logger, "Backend error"; "context" => ?r.context, "error" => ?r.error, "status" => %status_code_for(e), "message" => %r.error);
        let flattened = r.flatten();

        return Ok(with_status(json(&flattened), status_code_for(e)));
    }

    Err(rej)
}

fn status_code_for(e: &BackendError) -> StatusCode {
    use BackendError::*;

    match e {
        MalformedUri { .. } | MalformedFormSubmission | PartsMissing => StatusCode::BAD_REQUEST,
        ReadOnly => StatusCode::FORBIDDEN,
        Rejected { reason } => status_code_for_rejection(*reason),
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn status_code_for_rejection(reason: RejectReason) -> StatusCode {
    match reason {
        RejectReason::NotFound => StatusCode::NOT_FOUND,
        RejectReason::WrongUser => StatusCode::FORBIDDEN,
        RejectReason::Expired => StatusCode::GONE,
        RejectReason::AttemptsExceeded => StatusCode::TOO_MANY_REQUESTS,
        RejectReason::AlreadyComplete => StatusCode::CONFLICT,
    }
}

mod internal {
    use warp::filters::multipart::form;
    use warp::filters::BoxedFilter;
    use warp::path::end;
    use warp::Filter;
    use warp::Reply;
    use warp::{body, get as g, path as p, path::param as par, post};

    use super::{handlers, MAX_CONTENT_LENGTH};
    use crate::environment::Environment;

    type Route = BoxedFilter<(Box<dyn Reply>,)>;

    macro_rules! route_filter {
    ($route_variable:ident; $first:expr) => (let $route_variable = $route_variable.and($first););
    ($route_variable:ident; $first:expr, $($rest:expr),+) => (
        let $route_variable = $route_variable.and($first);
        route_filter!($route_variable; $($rest),+);
    )
}

    macro_rules! route {
    ($name:ident => $handler:ident, $route_variable:ident; $($filters:expr),+) => (
        pub fn $name(environment: Environment) -> Route {
            let $route_variable = warp::any()
                .map(move || environment.clone())
                .and(p("api"));

            route_filter!($route_variable; $($filters),+);

            $route_variable.and_then(handlers::$handler)
                .boxed()
        }
    );
}

    route!(make_upload_route => upload, rt; p("audio"), end(), post(), form().max_length(MAX_CONTENT_LENGTH));
    route!(make_audio_route => audio, rt; p("audio"), par::<String>(), end(), g());
    route!(make_raw_audio_route => raw_audio, rt; p!("audio" / String / "raw"), end(), g());
    route!(make_taxonomy_route => taxonomy, rt; p("taxonomy"), par::<String>(), end(), g());
    route!(make_create_task_route => create_task, rt; p("task"), end(), post(), body::json());
    route!(make_request_task_route => request_task, rt; p!("task" / "request"), end(), post(), body::json());
    route!(make_submit_route => submit_annotation, rt; p("annotation"), end(), post(), body::json());
}
