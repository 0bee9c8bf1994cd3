use std::sync::Arc;

use log::Logger;
use time::Duration;

use crate::config::get_variable_or;
use crate::db::Db;
use crate::store::Store;
use crate::taxonomy::TaxonomyCache;

/// Everything a request handler needs, bundled for cheap cloning.
#[derive(Clone)]
pub struct Environment {
    pub logger: Arc<Logger>,
    pub db: Arc<dyn Db>,
    pub store: Arc<dyn Store>,
    pub taxonomy: Arc<TaxonomyCache>,
    pub config: Config,
}

impl Environment {
    pub fn new(
        logger: Arc<Logger>,
        db: Arc<dyn Db>,
        store: Arc<dyn Store>,
        taxonomy: Arc<TaxonomyCache>,
        config: Config,
    ) -> Self {
        Self {
            logger,
            db,
            store,
            taxonomy,
            config,
        }
    }
}

/// Workflow tunables.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// How long a freshly issued task request stays usable.
    pub(crate) request_ttl: Duration,

    /// How many submission attempts a request allows before it is
    /// exhausted.
    pub(crate) max_submission_attempts: usize,
}

impl Config {
    pub fn new(request_ttl: Duration, max_submission_attempts: usize) -> Self {
        Self {
            request_ttl,
            max_submission_attempts,
        }
    }

    pub fn from_env() -> Self {
        let ttl_seconds: i64 = get_variable_or("CMS_REQUEST_TTL_SECONDS", "900")
            .parse()
            .unwrap_or_else(|_| panic!("parse CMS_REQUEST_TTL_SECONDS as i64"));
        let max_submission_attempts: usize = get_variable_or("CMS_MAX_SUBMISSION_ATTEMPTS", "3")
            .parse()
            .unwrap_or_else(|_| panic!("parse CMS_MAX_SUBMISSION_ATTEMPTS as usize"));

        Self::new(Duration::seconds(ttl_seconds), max_submission_attempts)
    }
}
