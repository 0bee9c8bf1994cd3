use std::cmp;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use url::Url;

use crate::config::StorageConfig;
use crate::errors::BackendError;

/// The binary-object contract every storage backend satisfies. There is
/// deliberately no delete or list: nothing in the workflow ever removes
/// binary content.
pub trait Store: Send + Sync {
    /// Saves `raw` under `key`. Overwriting is silent and complete.
    fn upload(
        &self,
        key: &str,
        content_type: &str,
        raw: Vec<u8>,
    ) -> BoxFuture<Result<(), BackendError>>;

    /// Returns the bytes stored under `key`. A missing object is a value
    /// outcome, never an error.
    fn download(&self, key: &str) -> BoxFuture<Result<Option<Vec<u8>>, BackendError>>;

    /// The public URL for the object under `key`.
    fn get_url(&self, key: &str) -> Result<Url, BackendError>;
}

/// Bounds for the managed backend's retry loop: delays double from
/// `initial_delay` up to `max_delay`, and no retry starts once `window`
/// has elapsed.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub window: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            window: Duration::from_secs(60),
        }
    }
}

/// Builds the configured storage client. The backend is selected here,
/// at startup, never at call time.
pub fn from_config(config: &StorageConfig) -> Result<Arc<dyn Store>, BackendError> {
    match config {
        StorageConfig::Local { root, base_url } => {
            Ok(Arc::new(LocalStore::new(root.clone(), base_url.clone())))
        }
        StorageConfig::S3(s3) => Ok(Arc::new(S3Store::from_config(s3)?)),
        StorageConfig::Platform { s3, retry } => Ok(Arc::new(PlatformStore::new(
            S3Store::from_config(s3)?,
            retry.clone(),
        ))),
    }
}

/// Runs `operation` under `policy`, sleeping between attempts. Only
/// transient failures are retried; everything else surfaces immediately.
pub(crate) async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, BackendError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    let started = Instant::now();
    let mut delay = policy.initial_delay;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_transient() && started.elapsed() + delay < policy.window => {
                tokio::time::sleep(delay).await;
                delay = cmp::min(delay * 2, policy.max_delay);
            }
            Err(error) => return Err(error),
        }
    }
}

pub use self::local::LocalStore;
pub use self::platform::PlatformStore;
pub use self::s3::S3Store;

#[cfg(test)]
pub(crate) mod mock;

mod local {
    use std::fs;
    use std::io::ErrorKind;
    use std::path::PathBuf;

    use futures::future::BoxFuture;
    use futures::FutureExt;
    use url::Url;

    use super::Store;
    use crate::errors::BackendError;

    /// A store that lays out one file per key inside a root directory,
    /// created lazily on first upload.
    pub struct LocalStore {
        root: PathBuf,
        base_url: Url,
    }

    impl LocalStore {
        pub fn new(root: PathBuf, base_url: Url) -> Self {
            LocalStore { root, base_url }
        }
    }

    impl Store for LocalStore {
        fn upload(
            &self,
            key: &str,
            _content_type: &str,
            raw: Vec<u8>,
        ) -> BoxFuture<Result<(), BackendError>> {
            let root = self.root.clone();
            let path = self.root.join(key);

            async move {
                fs::create_dir_all(&root).map_err(|source| BackendError::Io { source })?;
                fs::write(&path, &raw).map_err(|source| BackendError::Io { source })?;

                Ok(())
            }
            .boxed()
        }

        fn download(&self, key: &str) -> BoxFuture<Result<Option<Vec<u8>>, BackendError>> {
            let path = self.root.join(key);

            async move {
                match fs::read(&path) {
                    Ok(data) => Ok(Some(data)),
                    Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
                    Err(source) => Err(BackendError::Io { source }),
                }
            }
            .boxed()
        }

        fn get_url(&self, key: &str) -> Result<Url, BackendError> {
            self.base_url
                .join(key)
                .map_err(|source| BackendError::FailedToGenerateUrl {
                    key: key.to_owned(),
                    source,
                })
        }
    }
}

mod s3 {
    use std::sync::Arc;

    use futures::future::BoxFuture;
    use futures::FutureExt;
    use rusoto_core::request::HttpClient;
    use rusoto_core::RusotoError;
    use rusoto_credential::StaticProvider;
    use rusoto_s3::{
        GetObjectError, GetObjectRequest, PutObjectRequest, S3Client, StreamingBody, S3,
    };
    use tokio::io::AsyncReadExt;
    use url::Url;

    use super::Store;
    use crate::config::S3Config;
    use crate::errors::BackendError;

    /// A store that saves its data to S3.
    pub struct S3Store {
        client: Arc<S3Client>,
        acl: String,
        bucket: String,
        base_url: Url,
    }

    impl S3Store {
        /// Creates a new instance.
        pub fn new(client: Arc<S3Client>, acl: String, bucket: String, base_url: Url) -> Self {
            Self {
                client,
                acl,
                bucket,
                base_url,
            }
        }

        pub fn from_config(config: &S3Config) -> Result<Self, BackendError> {
            let http =
                HttpClient::new().map_err(|source| BackendError::HttpClient { source })?;

            let client = Arc::new(S3Client::new_with(
                http,
                StaticProvider::new_minimal(
                    config.access_key.clone(),
                    config.secret_access_key.clone(),
                ),
                config.region.clone(),
            ));

            Ok(S3Store::new(
                client,
                config.acl.clone(),
                config.bucket.clone(),
                config.base_url.clone(),
            ))
        }
    }

    impl Store for S3Store {
        fn upload(
            &self,
            key: &str,
            content_type: &str,
            raw: Vec<u8>,
        ) -> BoxFuture<Result<(), BackendError>> {
            upload(self, key.to_owned(), content_type.to_owned(), raw).boxed()
        }

        fn download(&self, key: &str) -> BoxFuture<Result<Option<Vec<u8>>, BackendError>> {
            download(self, key.to_owned()).boxed()
        }

        fn get_url(&self, key: &str) -> Result<Url, BackendError> {
            self.base_url
                .join(key)
                .map_err(|source| BackendError::FailedToGenerateUrl {
                    key: key.to_owned(),
                    source,
                })
        }
    }

    async fn upload(
        store: &S3Store,
        key: String,
        content_type: String,
        raw: Vec<u8>,
    ) -> Result<(), BackendError> {
        use std::convert::TryFrom;

        let len = i64::try_from(raw.len()).expect("raw data length must be within range of i64");

        let request = PutObjectRequest {
            acl: Some(store.acl.clone()),
            body: Some(StreamingBody::from(raw)),
            bucket: store.bucket.clone(),
            content_length: Some(len),
            content_type: Some(content_type),
            key,
            ..Default::default()
        };

        let result = store.client.put_object(request).await;

        match result {
            Ok(_) => Ok(()),
            Err(source) => Err(BackendError::UploadFailed { source }),
        }
    }

    async fn download(store: &S3Store, key: String) -> Result<Option<Vec<u8>>, BackendError> {
        let request = GetObjectRequest {
            bucket: store.bucket.clone(),
            key,
            ..Default::default()
        };

        match store.client.get_object(request).await {
            Ok(output) => {
                let mut data = Vec::new();

                if let Some(body) = output.body {
                    body.into_async_read()
                        .read_to_end(&mut data)
                        .await
                        .map_err(|source| BackendError::Io { source })?;
                }

                Ok(Some(data))
            }
            Err(RusotoError::Service(GetObjectError::NoSuchKey(_))) => Ok(None),
            // some S3-compatible services return a bare 404 instead
            Err(RusotoError::Unknown(ref response)) if response.status.as_u16() == 404 => Ok(None),
            Err(source) => Err(BackendError::DownloadFailed { source }),
        }
    }
}

mod platform {
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use url::Url;

    use super::{with_retry, RetryPolicy, S3Store, Store};
    use crate::errors::BackendError;

    /// A store for a managed platform whose object-storage surface is
    /// failure-prone under large payloads: an S3-compatible client with
    /// bounded exponential backoff around each read and write.
    pub struct PlatformStore {
        inner: S3Store,
        retry: RetryPolicy,
    }

    impl PlatformStore {
        pub fn new(inner: S3Store, retry: RetryPolicy) -> Self {
            PlatformStore { inner, retry }
        }
    }

    impl Store for PlatformStore {
        fn upload(
            &self,
            key: &str,
            content_type: &str,
            raw: Vec<u8>,
        ) -> BoxFuture<Result<(), BackendError>> {
            let key = key.to_owned();
            let content_type = content_type.to_owned();

            async move {
                with_retry(&self.retry, || {
                    self.inner.upload(&key, &content_type, raw.clone())
                })
                .await
            }
            .boxed()
        }

        fn download(&self, key: &str) -> BoxFuture<Result<Option<Vec<u8>>, BackendError>> {
            let key = key.to_owned();

            async move { with_retry(&self.retry, || self.inner.download(&key)).await }.boxed()
        }

        fn get_url(&self, key: &str) -> Result<Url, BackendError> {
            self.inner.get_url(key)
        }
    }
}
