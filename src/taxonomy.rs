use std::collections::HashMap;
use std::sync::Mutex;

use serde::Deserialize;
use url::Url;

use crate::errors::BackendError;

/// The slice of a namespace schema the annotator needs: the closed set
/// of allowed terms.
#[derive(Debug, Deserialize)]
struct Namespace {
    value: ValueSpec,
}

#[derive(Debug, Deserialize)]
struct ValueSpec {
    #[serde(rename = "enum")]
    terms: Vec<String>,
}

/// Memoized controlled-vocabulary documents, keyed by taxonomy name.
/// Each key is fetched at most once for the lifetime of the cache;
/// failed fetches return an empty term list and are retried on the next
/// call rather than cached.
pub struct TaxonomyCache {
    base_url: Url,
    client: reqwest::Client,
    terms: Mutex<HashMap<String, Vec<String>>>,
}

impl TaxonomyCache {
    pub fn new(base_url: Url) -> Self {
        TaxonomyCache {
            base_url,
            client: reqwest::Client::new(),
            terms: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the terms for `key`, fetching and memoizing on first use.
    pub async fn get(&self, key: &str) -> Vec<String> {
        if let Some(terms) = self.terms.lock().expect("taxonomy lock poisoned").get(key) {
            return terms.clone();
        }

        match self.fetch(key).await {
            Ok(terms) => {
                self.terms
                    .lock()
                    .expect("taxonomy lock poisoned")
                    .insert(key.to_owned(), terms.clone());

                terms
            }
            Err(_) => Vec::new(),
        }
    }

    /// Seeds the cache without a fetch, for warm starts and tests.
    pub fn prime(&self, key: impl Into<String>, terms: Vec<String>) {
        self.terms
            .lock()
            .expect("taxonomy lock poisoned")
            .insert(key.into(), terms);
    }

    async fn fetch(&self, key: &str) -> Result<Vec<String>, BackendError> {
        let url = self
            .base_url
            .join(&format!("{}.json", key))
            .map_err(|source| BackendError::FailedToGenerateUrl {
                key: key.to_owned(),
                source,
            })?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|source| BackendError::TaxonomyFetchFailed { source })?;

        let schema: HashMap<String, Namespace> = response
            .json()
            .await
            .map_err(|source| BackendError::TaxonomyFetchFailed { source })?;

        // documents hold a single namespace
        Ok(schema
            .into_iter()
            .map(|(_, namespace)| namespace.value.terms)
            .next()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use url::Url;

    use super::TaxonomyCache;

    fn unreachable_cache() -> TaxonomyCache {
        // nothing listens here, so every fetch fails fast
        TaxonomyCache::new(Url::parse("http://127.0.0.1:9/taxonomies/").unwrap())
    }

    #[tokio::test]
    async fn primed_terms_are_returned_without_a_fetch() {
        let cache = unreachable_cache();
        cache.prime("instrument_taxonomy_v0", vec!["piano".to_owned(), "cello".to_owned()]);

        let terms = cache.get("instrument_taxonomy_v0").await;
        assert_eq!(terms, vec!["piano".to_owned(), "cello".to_owned()]);
    }

    #[tokio::test]
    async fn failed_fetches_yield_empty_terms() {
        let cache = unreachable_cache();

        assert!(cache.get("instrument_taxonomy_v0").await.is_empty());
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let cache = unreachable_cache();

        assert!(cache.get("instrument_taxonomy_v0").await.is_empty());

        // the failure left no entry behind, so a later success lands
        cache.prime("instrument_taxonomy_v0", vec!["piano".to_owned()]);
        assert_eq!(cache.get("instrument_taxonomy_v0").await, vec!["piano".to_owned()]);
    }
}
