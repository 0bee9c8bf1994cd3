use std::env;
use std::path::PathBuf;
use std::time::Duration;

use rusoto_core::Region;
use url::Url;

use crate::db::Mode;
use crate::store::RetryPolicy;

/// Returns the value of the named environment variable if it exists or panics.
pub fn get_variable(name: &str) -> String {
    env::var(name).unwrap_or_else(|_| panic!("must define {} environment variable", name))
}

/// Returns the value of the named environment variable, or `default`.
pub fn get_variable_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_owned())
}

/// Selects and parameterizes the database backend. Built once at
/// startup and handed to [`crate::db::from_config`].
#[derive(Clone, Debug)]
pub enum DatabaseConfig {
    Local {
        filepath: Option<PathBuf>,
        mode: Mode,
        atomic: bool,
    },
    DynamoDb {
        region: Region,
        access_key: String,
        secret_access_key: String,
    },
}

impl DatabaseConfig {
    /// Reads `CMS_DATABASE_BACKEND` (`local` or `dynamodb`) and the
    /// backend-specific variables. Panics on missing or malformed
    /// values, like the rest of startup.
    pub fn from_env() -> Self {
        match get_variable("CMS_DATABASE_BACKEND").as_str() {
            "local" => {
                let filepath = env::var("CMS_DATABASE_PATH")
                    .ok()
                    .filter(|p| !p.is_empty())
                    .map(PathBuf::from);
                let mode: Mode = get_variable_or("CMS_DATABASE_MODE", "a")
                    .parse()
                    .unwrap_or_else(|e: String| panic!("{}", e));
                let atomic = get_variable_or("CMS_DATABASE_ATOMIC", "1") == "1";

                DatabaseConfig::Local {
                    filepath,
                    mode,
                    atomic,
                }
            }
            "dynamodb" => DatabaseConfig::DynamoDb {
                region: region_from_env("CMS_DYNAMODB_REGION_NAME", "CMS_DYNAMODB_ENDPOINT"),
                access_key: get_variable("CMS_DYNAMODB_ACCESS_KEY"),
                secret_access_key: get_variable("CMS_DYNAMODB_SECRET_ACCESS_KEY"),
            },
            other => panic!("unrecognized database backend `{}`", other),
        }
    }
}

/// Parameters shared by the S3-compatible storage backends.
#[derive(Clone, Debug)]
pub struct S3Config {
    pub access_key: String,
    pub secret_access_key: String,
    pub region: Region,
    pub bucket: String,
    pub acl: String,
    pub base_url: Url,
}

impl S3Config {
    pub fn from_env() -> Self {
        S3Config {
            access_key: get_variable("CMS_S3_ACCESS_KEY"),
            secret_access_key: get_variable("CMS_S3_SECRET_ACCESS_KEY"),
            region: region_from_env("CMS_S3_REGION_NAME", "CMS_S3_ENDPOINT"),
            bucket: get_variable("CMS_S3_BUCKET_NAME"),
            acl: get_variable_or("CMS_S3_ACL", "public-read"),
            base_url: parse_url(get_variable("CMS_S3_BASE_URL")),
        }
    }
}

/// Selects and parameterizes the binary storage backend. Built once at
/// startup and handed to [`crate::store::from_config`].
#[derive(Clone, Debug)]
pub enum StorageConfig {
    Local {
        root: PathBuf,
        base_url: Url,
    },
    S3(S3Config),

    /// An S3-compatible managed platform whose storage surface is
    /// failure-prone for large payloads; reads and writes get bounded
    /// retry.
    Platform {
        s3: S3Config,
        retry: RetryPolicy,
    },
}

impl StorageConfig {
    /// Reads `CMS_STORAGE_BACKEND` (`local`, `s3` or `platform`) and the
    /// backend-specific variables.
    pub fn from_env() -> Self {
        match get_variable("CMS_STORAGE_BACKEND").as_str() {
            "local" => StorageConfig::Local {
                root: PathBuf::from(get_variable("CMS_STORAGE_ROOT")),
                base_url: parse_url(get_variable("CMS_STORAGE_BASE_URL")),
            },
            "s3" => StorageConfig::S3(S3Config::from_env()),
            "platform" => StorageConfig::Platform {
                s3: S3Config::from_env(),
                retry: retry_from_env(),
            },
            other => panic!("unrecognized storage backend `{}`", other),
        }
    }
}

fn retry_from_env() -> RetryPolicy {
    let defaults = RetryPolicy::default();

    RetryPolicy {
        initial_delay: millis_variable("CMS_STORAGE_RETRY_INITIAL_MS", defaults.initial_delay),
        max_delay: millis_variable("CMS_STORAGE_RETRY_MAX_DELAY_MS", defaults.max_delay),
        window: millis_variable("CMS_STORAGE_RETRY_WINDOW_MS", defaults.window),
    }
}

fn millis_variable(name: &str, default: Duration) -> Duration {
    match env::var(name) {
        Ok(value) => Duration::from_millis(
            value
                .parse()
                .unwrap_or_else(|_| panic!("parse {} as milliseconds", name)),
        ),
        Err(_) => default,
    }
}

fn region_from_env(name_variable: &str, endpoint_variable: &str) -> Region {
    let name = get_variable(name_variable);

    match env::var(endpoint_variable) {
        Ok(endpoint) => Region::Custom { name, endpoint },
        Err(_) => name
            .parse()
            .unwrap_or_else(|_| panic!("parse {} as region", name_variable)),
    }
}

fn parse_url(value: String) -> Url {
    Url::parse(&value).unwrap_or_else(|_| panic!("parse {} as URL", value))
}
