use std::collections::HashMap;
use std::sync::RwLock;

use futures::future::BoxFuture;
use futures::FutureExt;
use url::Url;

use crate::errors::BackendError;
use crate::store::Store;

/// An in-memory store for tests.
pub(crate) struct MockStore {
    pub(crate) map: RwLock<HashMap<String, Vec<u8>>>,
    base_url: Url,
}

impl MockStore {
    pub fn new() -> Self {
        MockStore {
            map: RwLock::new(HashMap::new()),
            base_url: Url::parse("http://store.test/").unwrap(),
        }
    }
}

impl Store for MockStore {
    fn upload(
        &self,
        key: &str,
        _content_type: &str,
        raw: Vec<u8>,
    ) -> BoxFuture<Result<(), BackendError>> {
        self.map.write().unwrap().insert(key.to_owned(), raw);

        async move { Ok(()) }.boxed()
    }

    fn download(&self, key: &str) -> BoxFuture<Result<Option<Vec<u8>>, BackendError>> {
        let data = self.map.read().unwrap().get(key).cloned();

        async move { Ok(data) }.boxed()
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
