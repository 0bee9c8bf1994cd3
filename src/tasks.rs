use std::cmp::Reverse;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use url::Url;

use crate::db::{Db, Query, QueryItem};
use crate::environment::Config;
use crate::errors::{BackendError, RejectReason};
use crate::models::{
    entity_uri, AnnotationResponse, AudioClip, Entity, Feedback, Task, TaskPayload, TaskRequest,
    Visualization,
};
use crate::store::Store;
use crate::taxonomy::TaxonomyCache;
use crate::uri::Uri;

/// Everything needed to create one task.
#[derive(Clone, Debug, Deserialize)]
pub struct NewTask {
    pub audio_uri: Uri,
    pub source: String,
    pub taxonomy: String,
    pub feedback: Feedback,
    pub visualization: Visualization,
}

/// What an annotator receives in exchange for a task request.
#[derive(Clone, Debug, Serialize)]
pub struct TaskAssignment {
    pub request_uri: Uri,

    pub task_uri: Uri,

    /// Where to fetch the audio to annotate.
    pub audio_url: Url,

    /// When the claim lapses.
    #[serde(with = "time::serde::timestamp")]
    pub expires: OffsetDateTime,

    pub payload: TaskPayload,

    /// The resolved terms of the payload's taxonomy.
    pub terms: Vec<String>,
}

/// The durable outcome of an accepted submission.
#[derive(Clone, Debug)]
pub struct SubmissionReceipt {
    pub annotation_uri: Uri,
    pub annotation: AnnotationResponse,
}

/// Builds and persists a task over already-uploaded audio, returning its
/// URI. Whether `audio_uri` actually resolves is the caller's concern.
pub async fn create_task(db: &dyn Db, new_task: NewTask) -> Result<Uri, BackendError> {
    let payload = TaskPayload::new(new_task.taxonomy, new_task.feedback, new_task.visualization);
    let task = Task::new(new_task.audio_uri, new_task.source, payload);

    let uri = entity_uri(&task)?;
    db.put(&uri, task.to_flat()?).await?;

    Ok(uri)
}

/// Issues a claim on the most pressing open task: highest `priority`
/// first, ties broken by earliest `created`, then by URI order. Returns
/// `None` when no tasks are stored.
pub async fn request_task(
    db: &dyn Db,
    store: &dyn Store,
    taxonomy: &TaxonomyCache,
    config: &Config,
    user_id: &str,
) -> Result<Option<TaskAssignment>, BackendError> {
    let candidates = db
        .query(Query {
            kind: Some(Task::KIND.to_owned()),
            keys_only: false,
        })
        .await?;

    let mut selected: Option<(Uri, Task)> = None;
    for item in candidates {
        if let QueryItem::Record(uri, flat) = item {
            let task = Task::from_flat(&flat)?;

            let replaces = match &selected {
                None => true,
                Some((held_uri, held)) => {
                    (Reverse(task.priority()), task.created(), &uri)
                        < (Reverse(held.priority()), held.created(), held_uri)
                }
            };

            if replaces {
                selected = Some((uri, task));
            }
        }
    }

    let (task_uri, task) = match selected {
        Some(selected) => selected,
        None => return Ok(None),
    };

    let request = TaskRequest::new(user_id, task_uri.clone(), config.request_ttl);
    let request_uri = entity_uri(&request)?;
    db.put(&request_uri, request.to_flat()?).await?;

    let audio_key = match db.get(task.audio_uri()).await? {
        Some(flat) => AudioClip::from_flat(&flat)?.storage_key(task.audio_uri().gid()),
        None => task.audio_uri().gid().to_owned(),
    };
    let audio_url = store.get_url(&audio_key)?;
    let terms = taxonomy.get(task.payload().taxonomy()).await;

    Ok(Some(TaskAssignment {
        request_uri,
        task_uri,
        audio_url,
        expires: request.expires(),
        payload: task.payload().clone(),
        terms,
    }))
}

/// Validates one annotation submission against its originating request
/// and persists the accepted response. Every violated invariant surfaces
/// as a structured rejection; accepted submissions mark the request
/// complete so it cannot be replayed.
pub async fn submit_annotation(
    db: &dyn Db,
    config: &Config,
    request_uri: &Uri,
    user_id: &str,
    response: Value,
) -> Result<SubmissionReceipt, BackendError> {
    let reject = |reason| Err(BackendError::Rejected { reason });

    let flat = match db.get(request_uri).await? {
        Some(flat) => flat,
        None => return reject(RejectReason::NotFound),
    };
    let mut request = TaskRequest::from_flat(&flat)?;

    if request.user_id() != user_id {
        return reject(RejectReason::WrongUser);
    }
    if request.is_complete() {
        return reject(RejectReason::AlreadyComplete);
    }

    let now = OffsetDateTime::now_utc();
    if now >= request.expires() {
        return reject(RejectReason::Expired);
    }
    if request.attempts().len() >= config.max_submission_attempts {
        return reject(RejectReason::AttemptsExceeded);
    }

    // the attempt counts even if persisting the annotation fails below
    request.record_attempt(now);
    db.put(request_uri, request.to_flat()?).await?;

    let annotation =
        AnnotationResponse::new(user_id, request.task_uri().clone(), request_uri.clone(), response);
    let annotation_uri = entity_uri(&annotation)?;
    db.put(&annotation_uri, annotation.to_flat()?).await?;

    request.mark_complete();
    db.put(request_uri, request.to_flat()?).await?;

    Ok(SubmissionReceipt {
        annotation_uri,
        annotation,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::Duration;

    use super::{create_task, request_task, submit_annotation, NewTask};
    use crate::db::{Db, LocalDb};
    use crate::environment::Config;
    use crate::errors::{BackendError, RejectReason};
    use crate::models::{Entity, Feedback, Task, TaskRequest, Visualization};
    use crate::store::mock::MockStore;
    use crate::taxonomy::TaxonomyCache;
    use crate::uri::Uri;

    fn config() -> Config {
        Config::new(Duration::seconds(900), 3)
    }

    fn taxonomy() -> TaxonomyCache {
        let cache = TaxonomyCache::new(url::Url::parse("http://127.0.0.1:9/taxonomies/").unwrap());
        cache.prime("instrument_taxonomy_v0", vec!["piano".to_owned(), "cello".to_owned()]);

        cache
    }

    fn new_task(gid: &str) -> NewTask {
        NewTask {
            audio_uri: Uri::new("audio", gid).unwrap(),
            source: "uploader".to_owned(),
            taxonomy: "instrument_taxonomy_v0".to_owned(),
            feedback: Feedback::None,
            visualization: Visualization::Waveform,
        }
    }

    #[tokio::test]
    async fn create_task_persists_a_fresh_task() {
        let db = LocalDb::in_memory();

        let uri = create_task(&db, new_task("abc")).await.unwrap();
        assert_eq!(uri.kind(), "task");

        let task = Task::from_flat(&db.get(&uri).await.unwrap().unwrap()).unwrap();
        assert_eq!(task.audio_uri().to_string(), "audio:abc");
        assert_eq!(task.priority(), 0);
        assert_eq!(task.serve_count(), 0);
        assert_eq!(task.answer_count(), 0);
    }

    #[tokio::test]
    async fn request_task_with_no_tasks_returns_none() {
        let db = LocalDb::in_memory();
        let store = MockStore::new();
        let taxonomy = taxonomy();

        let assignment = request_task(&db, &store, &taxonomy, &config(), "user-a")
            .await
            .unwrap();

        assert!(assignment.is_none());
    }

    #[tokio::test]
    async fn request_task_issues_a_usable_claim() {
        let db = LocalDb::in_memory();
        let store = MockStore::new();
        let taxonomy = taxonomy();

        let task_uri = create_task(&db, new_task("abc")).await.unwrap();

        let assignment = request_task(&db, &store, &taxonomy, &config(), "user-a")
            .await
            .unwrap()
            .expect("a task should be assigned");

        assert_eq!(assignment.task_uri, task_uri);
        assert_eq!(assignment.terms, vec!["piano".to_owned(), "cello".to_owned()]);
        assert_eq!(assignment.request_uri.kind(), "request");

        let request =
            TaskRequest::from_flat(&db.get(&assignment.request_uri).await.unwrap().unwrap())
                .unwrap();
        assert_eq!(request.user_id(), "user-a");
        assert!(request.expires() > request.created());
        assert!(request.attempts().is_empty());
        assert!(!request.is_complete());
    }

    #[tokio::test]
    async fn request_task_prefers_priority_then_age() {
        let db = LocalDb::in_memory();
        let store = MockStore::new();
        let taxonomy = taxonomy();

        let low_uri = create_task(&db, new_task("low")).await.unwrap();

        // promote a second task above the first
        let urgent_uri = create_task(&db, new_task("urgent")).await.unwrap();
        let mut urgent = Task::from_flat(&db.get(&urgent_uri).await.unwrap().unwrap()).unwrap();
        urgent.priority = 5;
        db.put(&urgent_uri, urgent.to_flat().unwrap()).await.unwrap();

        let assignment = request_task(&db, &store, &taxonomy, &config(), "user-a")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(assignment.task_uri, urgent_uri);

        // equal priorities fall back to the earlier task
        let mut urgent = Task::from_flat(&db.get(&urgent_uri).await.unwrap().unwrap()).unwrap();
        urgent.priority = 0;
        urgent.created = urgent.created + Duration::seconds(60);
        db.put(&urgent_uri, urgent.to_flat().unwrap()).await.unwrap();

        let mut low = Task::from_flat(&db.get(&low_uri).await.unwrap().unwrap()).unwrap();
        low.created = low.created - Duration::seconds(60);
        db.put(&low_uri, low.to_flat().unwrap()).await.unwrap();

        let assignment = request_task(&db, &store, &taxonomy, &config(), "user-a")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(assignment.task_uri, low_uri);
    }

    async fn issue_request(db: &LocalDb, ttl: Duration, user_id: &str) -> Uri {
        let task_uri = create_task(db, new_task("abc")).await.unwrap();

        let request = TaskRequest::new(user_id, task_uri, ttl);
        let request_uri = crate::models::entity_uri(&request).unwrap();
        db.put(&request_uri, request.to_flat().unwrap()).await.unwrap();

        request_uri
    }

    fn assert_rejected(result: Result<super::SubmissionReceipt, BackendError>, expected: RejectReason) {
        match result {
            Err(BackendError::Rejected { reason }) => assert_eq!(reason, expected),
            other => panic!("expected rejection {:?}, got {:?}", expected, other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn submission_completes_the_request() {
        let db = LocalDb::in_memory();
        let request_uri = issue_request(&db, Duration::seconds(900), "user-a").await;

        let receipt = submit_annotation(&db, &config(), &request_uri, "user-a", json!({"tags": ["piano"]}))
            .await
            .unwrap();

        assert_eq!(receipt.annotation_uri.kind(), "annotation");
        assert_eq!(receipt.annotation.user_id(), "user-a");

        // the annotation is durable and the request is spent
        assert!(db.get(&receipt.annotation_uri).await.unwrap().is_some());
        let request = TaskRequest::from_flat(&db.get(&request_uri).await.unwrap().unwrap()).unwrap();
        assert!(request.is_complete());
        assert_eq!(request.attempts().len(), 1);
    }

    #[tokio::test]
    async fn submission_to_a_missing_request_is_rejected() {
        let db = LocalDb::in_memory();
        let request_uri = Uri::new("request", "nope").unwrap();

        let result = submit_annotation(&db, &config(), &request_uri, "user-a", json!({})).await;
        assert_rejected(result, RejectReason::NotFound);
    }

    #[tokio::test]
    async fn submission_by_the_wrong_user_is_rejected() {
        let db = LocalDb::in_memory();
        let request_uri = issue_request(&db, Duration::seconds(900), "user-a").await;

        let result = submit_annotation(&db, &config(), &request_uri, "user-b", json!({})).await;
        assert_rejected(result, RejectReason::WrongUser);

        // the attempt was not recorded
        let request = TaskRequest::from_flat(&db.get(&request_uri).await.unwrap().unwrap()).unwrap();
        assert!(request.attempts().is_empty());
    }

    #[tokio::test]
    async fn submission_after_expiry_is_rejected() {
        let db = LocalDb::in_memory();
        let request_uri = issue_request(&db, Duration::seconds(-60), "user-a").await;

        let result = submit_annotation(&db, &config(), &request_uri, "user-a", json!({})).await;
        assert_rejected(result, RejectReason::Expired);
    }

    #[tokio::test]
    async fn second_submission_is_rejected_as_complete() {
        let db = LocalDb::in_memory();
        let request_uri = issue_request(&db, Duration::seconds(900), "user-a").await;

        submit_annotation(&db, &config(), &request_uri, "user-a", json!({"take": 1}))
            .await
            .unwrap();

        let result = submit_annotation(&db, &config(), &request_uri, "user-a", json!({"take": 2})).await;
        assert_rejected(result, RejectReason::AlreadyComplete);
    }

    #[tokio::test]
    async fn exhausted_requests_are_rejected() {
        let db = LocalDb::in_memory();
        let request_uri = issue_request(&db, Duration::seconds(900), "user-a").await;

        let mut request = TaskRequest::from_flat(&db.get(&request_uri).await.unwrap().unwrap()).unwrap();
        for _ in 0..3 {
            request.record_attempt(time::OffsetDateTime::now_utc());
        }
        db.put(&request_uri, request.to_flat().unwrap()).await.unwrap();

        let result = submit_annotation(&db, &config(), &request_uri, "user-a", json!({})).await;
        assert_rejected(result, RejectReason::AttemptsExceeded);
    }
}
