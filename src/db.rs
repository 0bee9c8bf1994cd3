use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::config::DatabaseConfig;
use crate::errors::BackendError;
use crate::record::Record;
use crate::uri::Uri;

/// Filter for [`Db::query`].
#[derive(Clone, Debug, Default)]
pub struct Query {
    /// Restrict results to one URI kind.
    pub kind: Option<String>,

    /// Yield bare URIs instead of resolving full records. Purely an
    /// optimization knob; results cover the same entries either way.
    pub keys_only: bool,
}

/// One result of a [`Db::query`] call.
#[derive(Clone, Debug)]
pub enum QueryItem {
    Key(Uri),
    Record(Uri, Record),
}

impl QueryItem {
    pub fn uri(&self) -> &Uri {
        match self {
            QueryItem::Key(uri) => uri,
            QueryItem::Record(uri, _) => uri,
        }
    }

    pub fn into_uri(self) -> Uri {
        match self {
            QueryItem::Key(uri) => uri,
            QueryItem::Record(uri, _) => uri,
        }
    }
}

/// The key-value contract every database backend satisfies. Records are
/// stored flattened (see [`crate::record`]) under their URI.
pub trait Db: Send + Sync {
    /// Returns the record stored under `uri`. A missing record is a
    /// value outcome, never an error.
    fn get(&self, uri: &Uri) -> BoxFuture<Result<Option<Record>, BackendError>>;

    /// Upserts `record` under `uri`. Overwriting is silent and complete;
    /// there is no versioning and no partial update.
    fn put(&self, uri: &Uri, record: Record) -> BoxFuture<Result<(), BackendError>>;

    /// Removes the record under `uri`. Deleting a missing record is a
    /// no-op.
    fn delete(&self, uri: &Uri) -> BoxFuture<Result<(), BackendError>>;

    /// Runs `query` and collects its results. Ordering is unspecified.
    fn query(&self, query: Query) -> BoxFuture<Result<Vec<QueryItem>, BackendError>>;

    /// Enumerates stored URIs, optionally restricted to one kind.
    fn uris(&self, kind: Option<&str>) -> BoxFuture<Result<Vec<Uri>, BackendError>> {
        let future = self.query(Query {
            kind: kind.map(str::to_owned),
            keys_only: true,
        });

        async move {
            Ok(future
                .await?
                .into_iter()
                .map(QueryItem::into_uri)
                .collect())
        }
        .boxed()
    }
}

/// Builds the configured database client. The backend is selected here,
/// at startup, never at call time.
pub fn from_config(config: &DatabaseConfig) -> Result<Arc<dyn Db>, BackendError> {
    match config {
        DatabaseConfig::Local {
            filepath,
            mode,
            atomic,
        } => Ok(Arc::new(LocalDb::open(filepath.clone(), *mode, *atomic)?)),
        DatabaseConfig::DynamoDb {
            region,
            access_key,
            secret_access_key,
        } => Ok(Arc::new(DynamoDb::new(
            region.clone(),
            access_key.clone(),
            secret_access_key.clone(),
        ))),
    }
}

pub use self::dynamo::DynamoDb;
pub use self::local::{LocalDb, Mode};

mod local {
    use std::collections::HashMap;
    use std::fs::File;
    use std::io::ErrorKind;
    use std::path::PathBuf;
    use std::str::FromStr;
    use std::sync::Mutex;

    use futures::future::BoxFuture;
    use futures::FutureExt;

    use super::{Db, Query, QueryItem};
    use crate::errors::BackendError;
    use crate::record::Record;
    use crate::uri::Uri;

    /// Access mode for a local database file.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub enum Mode {
        /// Load once; every mutation is refused.
        Read,

        /// Start from an empty collection, replacing any existing file.
        Write,

        /// Load the existing collection and allow further mutation.
        Append,
    }

    impl FromStr for Mode {
        type Err = String;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            match s {
                "r" | "read" => Ok(Mode::Read),
                "w" | "write" => Ok(Mode::Write),
                "a" | "append" => Ok(Mode::Append),
                other => Err(format!("unrecognized database mode `{}`", other)),
            }
        }
    }

    /// A database held in memory and persisted to a single JSON file:
    /// top-level keys are URI strings, values flattened records. One lock
    /// guards every read-modify-write-flush sequence. With `atomic` set,
    /// each mutation synchronously rewrites the whole file, trading write
    /// latency for durability against abrupt termination.
    pub struct LocalDb {
        collection: Mutex<HashMap<String, Record>>,
        filepath: Option<PathBuf>,
        mode: Mode,
        atomic: bool,
    }

    impl LocalDb {
        /// Opens a database file. A missing file in `Read`/`Append` mode
        /// degrades to an empty collection rather than failing.
        pub fn open(
            filepath: Option<PathBuf>,
            mode: Mode,
            atomic: bool,
        ) -> Result<Self, BackendError> {
            let mut collection = HashMap::new();

            if mode != Mode::Write {
                if let Some(path) = &filepath {
                    match File::open(path) {
                        Ok(file) => {
                            collection = serde_json::from_reader(file)
                                .map_err(|source| BackendError::Json { source })?;
                        }
                        Err(e) if e.kind() == ErrorKind::NotFound => {}
                        Err(source) => return Err(BackendError::Io { source }),
                    }
                }
            }

            Ok(LocalDb {
                collection: Mutex::new(collection),
                filepath,
                mode,
                atomic,
            })
        }

        /// A database without a backing file, for tests and tools.
        pub fn in_memory() -> Self {
            LocalDb {
                collection: Mutex::new(HashMap::new()),
                filepath: None,
                mode: Mode::Write,
                atomic: false,
            }
        }

        /// Rewrites the backing file from the in-memory collection. A
        /// no-op without a filepath or in read-only mode. All-or-nothing:
        /// failures propagate and no partial-write recovery is attempted.
        pub fn flush(&self) -> Result<(), BackendError> {
            let collection = self.collection.lock().expect("database lock poisoned");

            self.flush_locked(&collection)
        }

        fn flush_locked(&self, collection: &HashMap<String, Record>) -> Result<(), BackendError> {
            if self.mode == Mode::Read {
                return Ok(());
            }

            if let Some(path) = &self.filepath {
                let file = File::create(path).map_err(|source| BackendError::Io { source })?;
                serde_json::to_writer(file, collection)
                    .map_err(|source| BackendError::Json { source })?;
            }

            Ok(())
        }

        fn mutate<F>(&self, apply: F) -> Result<(), BackendError>
        where
            F: FnOnce(&mut HashMap<String, Record>),
        {
            if self.mode == Mode::Read {
                return Err(BackendError::ReadOnly);
            }

            let mut collection = self.collection.lock().expect("database lock poisoned");
            apply(&mut collection);

            if self.atomic {
                self.flush_locked(&collection)?;
            }

            Ok(())
        }

        fn query_sync(&self, query: &Query) -> Result<Vec<QueryItem>, BackendError> {
            let collection = self.collection.lock().expect("database lock poisoned");
            let mut items = Vec::new();

            for (key, record) in collection.iter() {
                let uri: Uri = key.parse()?;

                if let Some(kind) = &query.kind {
                    if uri.kind() != kind {
                        continue;
                    }
                }

                items.push(if query.keys_only {
                    QueryItem::Key(uri)
                } else {
                    QueryItem::Record(uri, record.clone())
                });
            }

            Ok(items)
        }
    }

    impl Drop for LocalDb {
        fn drop(&mut self) {
            // last-chance flush for non-atomic databases
            if let Ok(collection) = self.collection.lock() {
                let _ = self.flush_locked(&collection);
            }
        }
    }

    impl Db for LocalDb {
        fn get(&self, uri: &Uri) -> BoxFuture<Result<Option<Record>, BackendError>> {
            let record = self
                .collection
                .lock()
                .expect("database lock poisoned")
                .get(&uri.to_string())
                .cloned();

            async move { Ok(record) }.boxed()
        }

        fn put(&self, uri: &Uri, record: Record) -> BoxFuture<Result<(), BackendError>> {
            let key = uri.to_string();
            let result = self.mutate(|collection| {
                collection.insert(key, record);
            });

            async move { result }.boxed()
        }

        fn delete(&self, uri: &Uri) -> BoxFuture<Result<(), BackendError>> {
            let key = uri.to_string();
            let result = self.mutate(|collection| {
                collection.remove(&key);
            });

            async move { result }.boxed()
        }

        fn query(&self, query: Query) -> BoxFuture<Result<Vec<QueryItem>, BackendError>> {
            let result = self.query_sync(&query);

            async move { result }.boxed()
        }
    }
}

mod dynamo {
    use std::collections::HashMap;

    use futures::future::BoxFuture;
    use futures::FutureExt;
    use rusoto_core::request::HttpClient;
    use rusoto_core::Region;
    use rusoto_credential::StaticProvider;
    use rusoto_dynamodb::DynamoDb as _;
    use rusoto_dynamodb::{
        AttributeValue, DeleteItemInput, DynamoDbClient, GetItemInput, ListTablesInput,
        PutItemInput, ScanInput,
    };
    use serde_json::Value;

    use super::{Db, Query, QueryItem};
    use crate::errors::BackendError;
    use crate::record::Record;
    use crate::uri::Uri;

    /// The attribute holding each item's partition key.
    const KEY_ATTRIBUTE: &str = "gid";

    /// A database client over DynamoDB: each URI kind maps to a table,
    /// each gid to the partition key within it. Calls build whole items
    /// fresh (no partial update) and construct a new client every time
    /// (no connection caching). Failures surface immediately; no retry.
    pub struct DynamoDb {
        region: Region,
        credentials: StaticProvider,
    }

    impl DynamoDb {
        pub fn new(region: Region, access_key: String, secret_access_key: String) -> Self {
            DynamoDb {
                region,
                credentials: StaticProvider::new_minimal(access_key, secret_access_key),
            }
        }

        fn client(&self) -> Result<DynamoDbClient, BackendError> {
            let http = HttpClient::new().map_err(|source| BackendError::HttpClient { source })?;

            Ok(DynamoDbClient::new_with(
                http,
                self.credentials.clone(),
                self.region.clone(),
            ))
        }
    }

    impl Db for DynamoDb {
        fn get(&self, uri: &Uri) -> BoxFuture<Result<Option<Record>, BackendError>> {
            get(self, uri.clone()).boxed()
        }

        fn put(&self, uri: &Uri, record: Record) -> BoxFuture<Result<(), BackendError>> {
            put(self, uri.clone(), record).boxed()
        }

        fn delete(&self, uri: &Uri) -> BoxFuture<Result<(), BackendError>> {
            delete(self, uri.clone()).boxed()
        }

        fn query(&self, query: Query) -> BoxFuture<Result<Vec<QueryItem>, BackendError>> {
            run_query(self, query).boxed()
        }
    }

    async fn get(db: &DynamoDb, uri: Uri) -> Result<Option<Record>, BackendError> {
        let client = db.client()?;

        let input = GetItemInput {
            table_name: uri.kind().to_owned(),
            key: item_key(uri.gid()),
            ..Default::default()
        };

        let output = client
            .get_item(input)
            .await
            .map_err(|source| BackendError::DbGetFailed { source })?;

        output.item.map(from_item).transpose()
    }

    async fn put(db: &DynamoDb, uri: Uri, record: Record) -> Result<(), BackendError> {
        let client = db.client()?;

        let mut item = item_key(uri.gid());
        for (field, value) in &record {
            if field == KEY_ATTRIBUTE {
                continue;
            }
            item.insert(field.clone(), to_attribute(field, value)?);
        }

        let input = PutItemInput {
            table_name: uri.kind().to_owned(),
            item,
            ..Default::default()
        };

        client
            .put_item(input)
            .await
            .map_err(|source| BackendError::DbPutFailed { source })?;

        Ok(())
    }

    async fn delete(db: &DynamoDb, uri: Uri) -> Result<(), BackendError> {
        let client = db.client()?;

        let input = DeleteItemInput {
            table_name: uri.kind().to_owned(),
            key: item_key(uri.gid()),
            ..Default::default()
        };

        client
            .delete_item(input)
            .await
            .map_err(|source| BackendError::DbDeleteFailed { source })?;

        Ok(())
    }

    async fn run_query(db: &DynamoDb, query: Query) -> Result<Vec<QueryItem>, BackendError> {
        let tables = match &query.kind {
            Some(kind) => vec![kind.clone()],
            None => list_tables(db).await?,
        };

        let mut items = Vec::new();
        for table in tables {
            scan_table(db, &table, query.keys_only, &mut items).await?;
        }

        Ok(items)
    }

    async fn list_tables(db: &DynamoDb) -> Result<Vec<String>, BackendError> {
        let client = db.client()?;
        let mut tables = Vec::new();
        let mut start = None;

        loop {
            let input = ListTablesInput {
                exclusive_start_table_name: start.clone(),
                ..Default::default()
            };

            let output = client
                .list_tables(input)
                .await
                .map_err(|source| BackendError::DbListFailed { source })?;

            tables.extend(output.table_names.unwrap_or_default());

            start = output.last_evaluated_table_name;
            if start.is_none() {
                break;
            }
        }

        Ok(tables)
    }

    async fn scan_table(
        db: &DynamoDb,
        table: &str,
        keys_only: bool,
        items: &mut Vec<QueryItem>,
    ) -> Result<(), BackendError> {
        let client = db.client()?;
        let mut start: Option<HashMap<String, AttributeValue>> = None;

        loop {
            let input = ScanInput {
                table_name: table.to_owned(),
                projection_expression: if keys_only {
                    Some(KEY_ATTRIBUTE.to_owned())
                } else {
                    None
                },
                exclusive_start_key: start.clone(),
                ..Default::default()
            };

            let output = client
                .scan(input)
                .await
                .map_err(|source| BackendError::DbScanFailed { source })?;

            for item in output.items.unwrap_or_default() {
                let gid = match item.get(KEY_ATTRIBUTE).and_then(|a| a.s.clone()) {
                    Some(gid) => gid,
                    None => continue,
                };
                let uri = Uri::new(table, gid)?;

                items.push(if keys_only {
                    QueryItem::Key(uri)
                } else {
                    QueryItem::Record(uri, from_item(item)?)
                });
            }

            start = output.last_evaluated_key;
            if start.is_none() {
                break;
            }
        }

        Ok(())
    }

    fn item_key(gid: &str) -> HashMap<String, AttributeValue> {
        let mut key = HashMap::new();
        key.insert(
            KEY_ATTRIBUTE.to_owned(),
            AttributeValue {
                s: Some(gid.to_owned()),
                ..Default::default()
            },
        );

        key
    }

    fn from_item(mut item: HashMap<String, AttributeValue>) -> Result<Record, BackendError> {
        item.remove(KEY_ATTRIBUTE);

        let mut record = Record::new();
        for (field, attribute) in item {
            let value = from_attribute(&field, attribute)?;
            record.insert(field, value);
        }

        Ok(record)
    }

    fn to_attribute(field: &str, value: &Value) -> Result<AttributeValue, BackendError> {
        let mut attribute = AttributeValue::default();

        match value {
            Value::String(s) => attribute.s = Some(s.clone()),
            Value::Number(n) => attribute.n = Some(n.to_string()),
            Value::Bool(b) => attribute.bool = Some(*b),
            Value::Null => attribute.null = Some(true),
            _ => {
                return Err(BackendError::UnstorableField {
                    field: field.to_owned(),
                })
            }
        }

        Ok(attribute)
    }

    fn from_attribute(field: &str, attribute: AttributeValue) -> Result<Value, BackendError> {
        let unstorable = || BackendError::UnstorableField {
            field: field.to_owned(),
        };

        if let Some(s) = attribute.s {
            Ok(Value::String(s))
        } else if let Some(n) = attribute.n {
            let value: Value = serde_json::from_str(&n).map_err(|_| unstorable())?;
            match value {
                Value::Number(_) => Ok(value),
                _ => Err(unstorable()),
            }
        } else if let Some(b) = attribute.bool {
            Ok(Value::Bool(b))
        } else if attribute.null.unwrap_or(false) {
            Ok(Value::Null)
        } else {
            Err(unstorable())
        }
    }
}
