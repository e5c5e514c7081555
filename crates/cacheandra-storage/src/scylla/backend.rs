use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use scylla::batch::{Batch, BatchType};
use scylla::frame::value::Counter;
use scylla::prepared_statement::PreparedStatement;
use scylla::statement::Consistency;
use scylla::transport::ExecutionProfile;
use scylla::transport::errors::{DbError, NewSessionError, QueryError};
use scylla::{Session, SessionBuilder};

use cacheandra_core::{DurableTier, DurableTierError};

use super::config::ScyllaConfig;

/// Durable-tier driver over a Cassandra-compatible wide-column store.
///
/// Two column families under one keyspace: the blob family holds a `val`
/// column with per-row TTL, the counter family a native `count` counter.
/// Writes go at consistency ONE, reads at QUORUM. Every statement is
/// prepared once at construction; if the session or any preparation fails
/// the tier never comes up and the coordinator runs without it.
pub struct ScyllaTier {
    session: Session,
    blob_get: PreparedStatement,
    blob_insert: PreparedStatement,
    blob_remove: PreparedStatement,
    blob_multiget: PreparedStatement,
    counter_get: PreparedStatement,
    counter_multiget: PreparedStatement,
    counter_add: PreparedStatement,
    counter_remove: PreparedStatement,
    truncate_blob: String,
    truncate_counter: String,
}

impl ScyllaTier {
    /// Connect and prepare every statement.
    pub async fn connect(config: &ScyllaConfig) -> Result<Self, DurableTierError> {
        let profile = ExecutionProfile::builder()
            .request_timeout(Some(config.request_timeout))
            .build();
        let session = SessionBuilder::new()
            .known_nodes(&config.nodes)
            .connection_timeout(config.connect_timeout)
            .default_execution_profile_handle(profile.into_handle())
            .build()
            .await
            .map_err(classify_session)?;

        let blob = format!("{}.{}", config.keyspace, config.column_family);
        let counter = format!("{}.{}", config.keyspace, config.counter_family());

        let blob_get = prepare_read(
            &session,
            format!("SELECT val FROM {blob} WHERE key = ?"),
        )
        .await?;
        let blob_multiget = prepare_read(
            &session,
            format!("SELECT key, val FROM {blob} WHERE key IN ?"),
        )
        .await?;
        let blob_insert = prepare_write(
            &session,
            format!("INSERT INTO {blob} (key, val) VALUES (?, ?) USING TTL ?"),
        )
        .await?;
        let blob_remove =
            prepare_write(&session, format!("DELETE FROM {blob} WHERE key = ?")).await?;

        let counter_get = prepare_read(
            &session,
            format!("SELECT count FROM {counter} WHERE key = ?"),
        )
        .await?;
        let counter_multiget = prepare_read(
            &session,
            format!("SELECT key, count FROM {counter} WHERE key IN ?"),
        )
        .await?;
        let counter_add = prepare_write(
            &session,
            format!("UPDATE {counter} SET count = count + ? WHERE key = ?"),
        )
        .await?;
        let counter_remove =
            prepare_write(&session, format!("DELETE FROM {counter} WHERE key = ?")).await?;

        Ok(Self {
            session,
            blob_get,
            blob_insert,
            blob_remove,
            blob_multiget,
            counter_get,
            counter_multiget,
            counter_add,
            counter_remove,
            truncate_blob: format!("TRUNCATE {blob}"),
            truncate_counter: format!("TRUNCATE {counter}"),
        })
    }
}

async fn prepare_read(
    session: &Session,
    statement: String,
) -> Result<PreparedStatement, DurableTierError> {
    let mut prepared = session.prepare(statement).await.map_err(classify)?;
    prepared.set_consistency(Consistency::Quorum);
    Ok(prepared)
}

async fn prepare_write(
    session: &Session,
    statement: String,
) -> Result<PreparedStatement, DurableTierError> {
    let mut prepared = session.prepare(statement).await.map_err(classify)?;
    prepared.set_consistency(Consistency::One);
    Ok(prepared)
}

#[async_trait]
impl DurableTier for ScyllaTier {
    async fn blob_get(&self, key: &str) -> Result<Option<Vec<u8>>, DurableTierError> {
        let result = self
            .session
            .execute_unpaged(&self.blob_get, (key,))
            .await
            .map_err(classify)?;
        let row = result
            .maybe_first_row_typed::<(Vec<u8>,)>()
            .map_err(|e| DurableTierError::Fatal(e.to_string()))?;
        Ok(row.map(|(val,)| val))
    }

    async fn blob_insert(
        &self,
        key: &str,
        value: &[u8],
        timeout: Option<Duration>,
    ) -> Result<(), DurableTierError> {
        self.session
            .execute_unpaged(&self.blob_insert, (key, value.to_vec(), ttl_of(timeout)))
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn blob_remove(&self, key: &str) -> Result<(), DurableTierError> {
        self.session
            .execute_unpaged(&self.blob_remove, (key,))
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn blob_multiget(
        &self,
        keys: &[String],
    ) -> Result<HashMap<String, Vec<u8>>, DurableTierError> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let result = self
            .session
            .execute_unpaged(&self.blob_multiget, (keys.to_vec(),))
            .await
            .map_err(classify)?;
        let mut found = HashMap::new();
        for row in result
            .rows_typed::<(String, Vec<u8>)>()
            .map_err(|e| DurableTierError::Fatal(e.to_string()))?
        {
            let (key, val) = row.map_err(|e| DurableTierError::Fatal(e.to_string()))?;
            found.insert(key, val);
        }
        Ok(found)
    }

    async fn blob_batch_insert(
        &self,
        entries: &[(String, Vec<u8>)],
        timeout: Option<Duration>,
    ) -> Result<(), DurableTierError> {
        if entries.is_empty() {
            return Ok(());
        }
        let ttl = ttl_of(timeout);
        let mut batch = Batch::new(BatchType::Unlogged);
        let mut values = Vec::with_capacity(entries.len());
        for (key, val) in entries {
            batch.append_statement(self.blob_insert.clone());
            values.push((key.clone(), val.clone(), ttl));
        }
        batch.set_consistency(Consistency::One);
        self.session.batch(&batch, values).await.map_err(classify)?;
        Ok(())
    }

    async fn blob_batch_remove(&self, keys: &[String]) -> Result<(), DurableTierError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut batch = Batch::new(BatchType::Unlogged);
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            batch.append_statement(self.blob_remove.clone());
            values.push((key.clone(),));
        }
        batch.set_consistency(Consistency::One);
        self.session.batch(&batch, values).await.map_err(classify)?;
        Ok(())
    }

    async fn counter_get(&self, key: &str) -> Result<Option<i64>, DurableTierError> {
        let result = self
            .session
            .execute_unpaged(&self.counter_get, (key,))
            .await
            .map_err(classify)?;
        let row = result
            .maybe_first_row_typed::<(Counter,)>()
            .map_err(|e| DurableTierError::Fatal(e.to_string()))?;
        Ok(row.map(|(count,)| count.0))
    }

    async fn counter_multiget(
        &self,
        keys: &[String],
    ) -> Result<HashMap<String, i64>, DurableTierError> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let result = self
            .session
            .execute_unpaged(&self.counter_multiget, (keys.to_vec(),))
            .await
            .map_err(classify)?;
        let mut found = HashMap::new();
        for row in result
            .rows_typed::<(String, Counter)>()
            .map_err(|e| DurableTierError::Fatal(e.to_string()))?
        {
            let (key, count) = row.map_err(|e| DurableTierError::Fatal(e.to_string()))?;
            found.insert(key, count.0);
        }
        Ok(found)
    }

    async fn counter_add(&self, key: &str, delta: i64) -> Result<(), DurableTierError> {
        self.session
            .execute_unpaged(&self.counter_add, (Counter(delta), key))
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn counter_remove(&self, key: &str) -> Result<(), DurableTierError> {
        self.session
            .execute_unpaged(&self.counter_remove, (key,))
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn truncate_all(&self) -> Result<(), DurableTierError> {
        self.session
            .query_unpaged(self.truncate_blob.as_str(), ())
            .await
            .map_err(classify)?;
        self.session
            .query_unpaged(self.truncate_counter.as_str(), ())
            .await
            .map_err(classify)?;
        Ok(())
    }
}

/// Maps an operation timeout to a CQL row TTL. Zero tells the server "no
/// TTL"; sub-second timeouts round up to one second.
fn ttl_of(timeout: Option<Duration>) -> i32 {
    match timeout {
        None => 0,
        Some(t) if t.is_zero() => 0,
        Some(t) if t.as_secs() == 0 => 1,
        Some(t) => t.as_secs().min(i32::MAX as u64) as i32,
    }
}

/// Maps driver errors into the coordinator's taxonomy: request-shaped
/// problems (auth, schema, malformed CQL) are fatal, everything reachable
/// by waiting is transient.
fn classify(err: QueryError) -> DurableTierError {
    match err {
        QueryError::DbError(ref db, ref msg) => match db {
            DbError::AuthenticationError
            | DbError::Unauthorized
            | DbError::SyntaxError
            | DbError::Invalid
            | DbError::ConfigError
            | DbError::AlreadyExists { .. }
            | DbError::Unprepared { .. } => DurableTierError::Fatal(format!("{db}: {msg}")),
            _ => DurableTierError::Transient(format!("{db}: {msg}")),
        },
        QueryError::BadQuery(bad) => DurableTierError::Fatal(bad.to_string()),
        other => DurableTierError::Transient(other.to_string()),
    }
}

fn classify_session(err: NewSessionError) -> DurableTierError {
    DurableTierError::Transient(err.to_string())
}
