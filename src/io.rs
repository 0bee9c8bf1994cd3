use std::io;

use bytes::{Buf, Bytes};
use futures::stream::StreamExt;
use futures::TryStreamExt;
use warp::multipart::{FormData, Part};

use crate::errors::BackendError;

/// One parsed upload submission.
pub struct Upload {
    /// The raw audio bytes.
    pub audio: Vec<u8>,

    /// The client-supplied file name, if any.
    pub file_name: Option<String>,
}

/// Pulls the `audio` part out of a multipart submission.
pub async fn parse_upload(content: FormData) -> Result<Upload, BackendError> {
    let parts: Vec<Part> = content
        .try_collect()
        .await
        .map_err(|_| BackendError::MalformedFormSubmission)?;

    for part in parts {
        if part.name() == "audio" {
            let file_name = part.filename().map(str::to_owned);
            let audio = part_as_vec(part)
                .await
                .map_err(|_| BackendError::MalformedFormSubmission)?;

            return Ok(Upload { audio, file_name });
        }
    }

    Err(BackendError::PartsMissing)
}

/// Collects chunks of [`Part`].
pub async fn part_as_vec(raw: Part) -> Result<Vec<u8>, ()> {
    let vec_of_results = part_as_stream(raw).collect::<Vec<_>>().await;

    let vec_of_vecs = vec_of_results
        .into_iter()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| ())?;

    Ok(vec_of_vecs.concat())
}

/// Collects raw data from [`Part`].
pub fn part_as_stream(raw: Part) -> impl futures::Stream<Item = Result<Bytes, io::Error>> {
    raw.stream().map(|r| {
        r.map(|mut x| x.copy_to_bytes(x.remaining()))
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "could not retrieve chunk"))
    })
}
