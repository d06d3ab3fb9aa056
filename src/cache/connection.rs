//! Cache connection management.
//!
//! [`CacheConnectionManager`] owns the `redis::Client` for one key/value store
//! and runs command pipelines against a shared multiplexed connection.
//!
//! Lifecycle: uninitialized → connected (`connect`) → disconnected
//! (`disconnect`). `connect` performs no network I/O; the multiplexed
//! connection is established on first use.

use crate::error::{DbError, DbResult};
use crate::models::CacheSettings;
use crate::retry::RetryPolicy;
use redis::aio::{ConnectionLike, ConnectionManager, ConnectionManagerConfig};
use redis::{Client, FromRedisValue, Pipeline, Value};
use secrecy::ExposeSecret;
use std::any::type_name;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::OnceCell;
use tracing::{debug, error, info};
use url::Url;

/// Log a redis failure and translate it into an operation failure.
pub(crate) fn redis_error(operation: &str, err: redis::RedisError) -> DbError {
    error!(operation, "Cache operation failed");
    debug!(operation, error = %err, "Cache driver error");
    DbError::operation_failed(operation)
}

/// Handle to a connected cache store. Cheap to clone; every clone shares the
/// same multiplexed connection.
#[derive(Clone)]
pub struct CacheOperation {
    client: Client,
    connection: Arc<OnceCell<ConnectionManager>>,
    display_name: Arc<str>,
}

impl std::fmt::Debug for CacheOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheOperation")
            .field("display_name", &self.display_name)
            .field("established", &self.connection.initialized())
            .finish_non_exhaustive()
    }
}

impl CacheOperation {
    /// The multiplexed connection, established on first call.
    pub async fn connection(&self) -> DbResult<ConnectionManager> {
        self.connection
            .get_or_try_init(|| async {
                // Retries are driven by RetryPolicy, not by the connection manager.
                let config = ConnectionManagerConfig::new().set_number_of_retries(1);
                let manager = ConnectionManager::new_with_config(self.client.clone(), config)
                    .await
                    .map_err(|e| redis_error("open cache connection", e))?;
                info!(display_name = %self.display_name, "Cache connection established");
                Ok::<_, DbError>(manager)
            })
            .await
            .cloned()
    }
}

/// Owns the client for one key/value store.
#[derive(Debug)]
pub struct CacheConnectionManager {
    display_name: Arc<str>,
    settings: CacheSettings,
    retry: RetryPolicy,
    operation: RwLock<Option<CacheOperation>>,
}

impl CacheConnectionManager {
    pub fn new(display_name: impl Into<String>, settings: CacheSettings) -> Self {
        Self {
            display_name: Arc::from(display_name.into()),
            settings,
            retry: RetryPolicy::default(),
            operation: RwLock::new(None),
        }
    }

    /// Use `retry` for pipelines instead of the default policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Build the client from host, port and password. Replaces any previous
    /// client.
    pub fn connect(&self) -> DbResult<()> {
        let url = self.connection_url()?;
        let client = Client::open(url.as_str()).map_err(|e| {
            debug!(error = %e, "Cache client rejected connection info");
            DbError::invalid_input(format!(
                "The {} cache connection settings are invalid",
                self.display_name
            ))
        })?;

        let operation = CacheOperation {
            client,
            connection: Arc::new(OnceCell::new()),
            display_name: Arc::clone(&self.display_name),
        };
        *self
            .operation
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(operation);

        info!(
            display_name = %self.display_name,
            decode_responses = self.settings.decode_responses,
            "Cache client configured"
        );
        Ok(())
    }

    /// Handle to the connected store.
    pub fn operation(&self) -> DbResult<CacheOperation> {
        self.operation
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| DbError::unavailable(format!("The {} cache", self.display_name)))
    }

    pub fn is_connected(&self) -> bool {
        self.operation
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Drop the client and the multiplexed connection. Handles already given
    /// out keep working until they are dropped.
    pub async fn disconnect(&self) {
        let operation = self
            .operation
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match operation {
            Some(_) => info!(display_name = %self.display_name, "Cache disconnected"),
            None => debug!(display_name = %self.display_name, "Cache was not connected"),
        }
    }

    /// Run a pipeline and decode every reply as `T`.
    ///
    /// `ops` stages the commands on a fresh pipeline and is called again on
    /// every attempt. With `is_transaction` the batch runs inside MULTI/EXEC.
    pub async fn pipeline<T, F>(&self, ops: F, is_transaction: bool) -> DbResult<Vec<T>>
    where
        T: FromRedisValue,
        F: Fn(&mut Pipeline),
    {
        self.pipeline_with(|| self.live_connection(), ops, is_transaction)
            .await
    }

    /// Run a pipeline and decode only its first reply.
    pub async fn pipeline_first<T, F>(&self, ops: F, is_transaction: bool) -> DbResult<T>
    where
        T: FromRedisValue,
        F: Fn(&mut Pipeline),
    {
        self.pipeline_first_with(|| self.live_connection(), ops, is_transaction)
            .await
    }

    async fn live_connection(&self) -> DbResult<ConnectionManager> {
        self.operation()?.connection().await
    }

    /// [`pipeline`](Self::pipeline) over connections produced by `connect`,
    /// one per attempt.
    pub(crate) async fn pipeline_with<T, C, G, Fut, F>(
        &self,
        connect: G,
        ops: F,
        is_transaction: bool,
    ) -> DbResult<Vec<T>>
    where
        T: FromRedisValue,
        C: ConnectionLike,
        G: FnMut() -> Fut,
        Fut: Future<Output = DbResult<C>>,
        F: Fn(&mut Pipeline),
    {
        let values = self.run_with_retry(connect, &ops, is_transaction).await?;
        values
            .into_iter()
            .map(|value| self.decode::<T>(value))
            .collect()
    }

    pub(crate) async fn pipeline_first_with<T, C, G, Fut, F>(
        &self,
        connect: G,
        ops: F,
        is_transaction: bool,
    ) -> DbResult<T>
    where
        T: FromRedisValue,
        C: ConnectionLike,
        G: FnMut() -> Fut,
        Fut: Future<Output = DbResult<C>>,
        F: Fn(&mut Pipeline),
    {
        let values = self.run_with_retry(connect, &ops, is_transaction).await?;
        match values.into_iter().next() {
            Some(value) => self.decode(value),
            None => {
                error!(display_name = %self.display_name, "Cache pipeline returned no results");
                Err(DbError::operation_failed("cache pipeline returned no results"))
            }
        }
    }

    async fn run_with_retry<C, G, Fut, F>(
        &self,
        mut connect: G,
        ops: &F,
        is_transaction: bool,
    ) -> DbResult<Vec<Value>>
    where
        C: ConnectionLike,
        G: FnMut() -> Fut,
        Fut: Future<Output = DbResult<C>>,
        F: Fn(&mut Pipeline),
    {
        self.retry
            .execute("cache pipeline", || {
                let connecting = connect();
                async move {
                    let mut conn = connecting.await?;
                    run_pipeline(&mut conn, ops, is_transaction).await
                }
            })
            .await
    }

    fn decode<T: FromRedisValue>(&self, value: Value) -> DbResult<T> {
        let value = if self.settings.decode_responses {
            decode_response(value)
        } else {
            value
        };
        T::from_redis_value(&value).map_err(|e| {
            debug!(expected = type_name::<T>(), error = %e, "Cache reply decode failed");
            DbError::type_mismatch(type_name::<T>(), e.to_string())
        })
    }

    fn connection_url(&self) -> DbResult<Url> {
        let settings = &self.settings;
        let port: u16 = settings.port.expose_secret().trim().parse().map_err(|_| {
            DbError::invalid_input(format!(
                "The {} cache port is not a valid port number",
                self.display_name
            ))
        })?;

        let invalid_host = || {
            DbError::invalid_input(format!("The {} cache host is invalid", self.display_name))
        };
        let mut url = Url::parse("redis://localhost").map_err(|_| invalid_host())?;
        url.set_host(Some(settings.host.expose_secret()))
            .map_err(|_| invalid_host())?;
        url.set_port(Some(port)).map_err(|_| invalid_host())?;

        let password = settings.password.expose_secret();
        if !password.is_empty() {
            url.set_password(Some(password))
                .map_err(|_| invalid_host())?;
        }
        Ok(url)
    }
}

/// Stage `ops` on a fresh pipeline and send it over `conn`.
async fn run_pipeline<C, F>(conn: &mut C, ops: &F, is_transaction: bool) -> DbResult<Vec<Value>>
where
    C: ConnectionLike,
    F: Fn(&mut Pipeline),
{
    let mut pipe = redis::pipe();
    if is_transaction {
        pipe.atomic();
    }
    ops(&mut pipe);

    pipe.query_async::<Vec<Value>>(conn)
        .await
        .map_err(|e| redis_error("cache pipeline", e))
}

/// Turn UTF-8 bulk replies into strings, recursing into aggregates.
pub(crate) fn decode_response(value: Value) -> Value {
    match value {
        Value::BulkString(bytes) => match String::from_utf8(bytes) {
            Ok(text) => Value::SimpleString(text),
            Err(e) => Value::BulkString(e.into_bytes()),
        },
        Value::Array(items) => Value::Array(items.into_iter().map(decode_response).collect()),
        Value::Set(items) => Value::Set(items.into_iter().map(decode_response).collect()),
        Value::Map(entries) => Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (decode_response(k), decode_response(v)))
                .collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::capture::capture_logs;
    use redis::{Cmd, ErrorKind, RedisFuture, RedisResult};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Connection that answers pipelines from a script and records how many
    /// replies each batch asked for.
    #[derive(Clone, Default)]
    struct ScriptedConnection {
        replies: Arc<Mutex<VecDeque<RedisResult<Vec<Value>>>>>,
        batches: Arc<Mutex<Vec<usize>>>,
    }

    impl ScriptedConnection {
        fn new(replies: Vec<RedisResult<Vec<Value>>>) -> Self {
            Self {
                replies: Arc::new(Mutex::new(replies.into())),
                batches: Arc::default(),
            }
        }

        fn batches(&self) -> Vec<usize> {
            self.batches.lock().unwrap().clone()
        }
    }

    impl ConnectionLike for ScriptedConnection {
        fn req_packed_command<'a>(&'a mut self, _cmd: &'a Cmd) -> RedisFuture<'a, Value> {
            let reply: RedisResult<Value> =
                Err((ErrorKind::ClientError, "single commands are not scripted").into());
            Box::pin(async move { reply })
        }

        fn req_packed_commands<'a>(
            &'a mut self,
            _cmd: &'a Pipeline,
            _offset: usize,
            count: usize,
        ) -> RedisFuture<'a, Vec<Value>> {
            self.batches.lock().unwrap().push(count);
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err((ErrorKind::ClientError, "script exhausted").into()));
            Box::pin(async move { reply })
        }

        fn get_db(&self) -> i64 {
            0
        }
    }

    fn scripted(
        conn: &ScriptedConnection,
    ) -> impl FnMut() -> std::future::Ready<DbResult<ScriptedConnection>> + '_ {
        move || std::future::ready(Ok(conn.clone()))
    }

    fn three_sets(pipe: &mut Pipeline) {
        pipe.cmd("SET").arg("a").arg(1);
        pipe.cmd("SET").arg("b").arg(2);
        pipe.cmd("SET").arg("c").arg(3);
    }

    fn scripted_manager() -> CacheConnectionManager {
        manager("localhost", "6379", "").with_retry(RetryPolicy::new(3, Duration::ZERO))
    }

    fn manager(host: &str, port: &str, password: &str) -> CacheConnectionManager {
        CacheConnectionManager::new("sessions", CacheSettings::new(host, port, password))
    }

    #[test]
    fn test_operation_before_connect_is_unavailable() {
        let manager = manager("localhost", "6379", "");
        assert!(!manager.is_connected());
        let err = manager.operation().unwrap_err();
        assert!(matches!(err, DbError::Unavailable { .. }));
        assert!(err.to_string().contains("sessions"));
    }

    #[test]
    fn test_connect_rejects_invalid_port() {
        let manager = manager("localhost", "not-a-port", "");
        let err = manager.connect().unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { .. }));
        assert!(!manager.is_connected());
    }

    #[test]
    fn test_connection_url_encodes_password() {
        let manager = manager("cache.internal", "6380", "p@ss:word");
        let url = manager.connection_url().unwrap();
        assert_eq!(url.host_str(), Some("cache.internal"));
        assert_eq!(url.port(), Some(6380));
        assert_eq!(url.password(), Some("p%40ss%3Aword"));
    }

    #[test]
    fn test_connect_is_offline_and_replaceable() {
        let manager = manager("127.0.0.1", "1", "");
        manager.connect().unwrap();
        manager.connect().unwrap();
        assert!(manager.is_connected());
        assert!(manager.operation().is_ok());
    }

    #[test]
    fn test_decode_response_normalizes_utf8_bulk_strings() {
        let value = Value::Array(vec![
            Value::BulkString(b"hello".to_vec()),
            Value::BulkString(vec![0xff, 0xfe]),
            Value::Int(3),
        ]);
        assert_eq!(
            decode_response(value),
            Value::Array(vec![
                Value::SimpleString("hello".to_string()),
                Value::BulkString(vec![0xff, 0xfe]),
                Value::Int(3),
            ])
        );
    }

    #[test]
    fn test_decode_type_mismatch() {
        let manager = manager("localhost", "6379", "");
        let err = manager
            .decode::<i64>(Value::BulkString(b"not a number".to_vec()))
            .unwrap_err();
        assert!(matches!(err, DbError::TypeMismatch { .. }));

        let text: String = manager.decode(Value::BulkString(b"ok".to_vec())).unwrap();
        assert_eq!(text, "ok");
    }

    #[tokio::test]
    async fn test_disconnect_makes_operation_unavailable() {
        let manager = manager("127.0.0.1", "1", "");
        manager.connect().unwrap();
        manager.disconnect().await;
        assert!(matches!(
            manager.operation(),
            Err(DbError::Unavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_pipeline_returns_every_reply_in_order() {
        let conn = ScriptedConnection::new(vec![Ok(vec![Value::Okay, Value::Okay, Value::Okay])]);
        let manager = scripted_manager();

        let replies: Vec<String> = manager
            .pipeline_with(scripted(&conn), three_sets, false)
            .await
            .unwrap();
        assert_eq!(replies, vec!["OK", "OK", "OK"]);
        assert_eq!(conn.batches(), vec![3]);
    }

    #[tokio::test]
    async fn test_pipeline_first_returns_only_first_reply() {
        let conn = ScriptedConnection::new(vec![Ok(vec![
            Value::BulkString(b"first".to_vec()),
            Value::Int(2),
            Value::Int(3),
        ])]);
        let manager = scripted_manager();

        let first: String = manager
            .pipeline_first_with(scripted(&conn), three_sets, false)
            .await
            .unwrap();
        assert_eq!(first, "first");
    }

    #[tokio::test]
    async fn test_failed_attempt_restages_fresh_pipeline() {
        let conn = ScriptedConnection::new(vec![
            Err((ErrorKind::IoError, "connection reset").into()),
            Ok(vec![Value::Okay, Value::Okay, Value::Okay]),
        ]);
        let manager = scripted_manager();

        let replies: Vec<String> = manager
            .pipeline_with(scripted(&conn), three_sets, false)
            .await
            .unwrap();
        assert_eq!(replies.len(), 3);
        // Each attempt sent exactly the three staged commands.
        assert_eq!(conn.batches(), vec![3, 3]);
    }

    #[tokio::test]
    async fn test_pipeline_gives_up_after_max_attempts() {
        let conn = ScriptedConnection::new(vec![
            Err((ErrorKind::IoError, "connection reset").into()),
            Err((ErrorKind::IoError, "connection reset").into()),
            Err((ErrorKind::IoError, "connection reset").into()),
            Ok(vec![Value::Okay, Value::Okay, Value::Okay]),
        ]);
        let manager = scripted_manager();

        let result = manager
            .pipeline_with::<String, _, _, _, _>(scripted(&conn), three_sets, false)
            .await;
        assert!(matches!(result, Err(DbError::OperationFailed { .. })));
        assert_eq!(conn.batches(), vec![3, 3, 3]);
    }

    #[tokio::test]
    async fn test_transaction_reads_exec_reply() {
        // MULTI/EXEC: only the EXEC reply is read back, holding every result.
        let conn = ScriptedConnection::new(vec![Ok(vec![Value::Array(vec![
            Value::Int(1),
            Value::Int(5),
            Value::Int(1),
        ])])]);
        let manager = scripted_manager();

        let counts: Vec<i64> = manager
            .pipeline_with(scripted(&conn), three_sets, true)
            .await
            .unwrap();
        assert_eq!(counts, vec![1, 5, 1]);
        assert_eq!(conn.batches(), vec![1]);
    }

    #[tokio::test]
    async fn test_empty_pipeline_first_is_operation_failed() {
        let conn = ScriptedConnection::default();
        let manager = scripted_manager();

        let result = manager
            .pipeline_first_with::<String, _, _, _, _>(scripted(&conn), |_| {}, false)
            .await;
        assert!(matches!(result, Err(DbError::OperationFailed { .. })));
        // An empty pipeline never reaches the connection.
        assert!(conn.batches().is_empty());
    }

    #[tokio::test]
    async fn test_failed_connect_is_retried() {
        let conn = ScriptedConnection::new(vec![Ok(vec![Value::Okay])]);
        let manager = scripted_manager();
        let mut connects = 0;

        let reply: String = manager
            .pipeline_first_with(
                || {
                    connects += 1;
                    let result = if connects == 1 {
                        Err(DbError::operation_failed("open cache connection"))
                    } else {
                        Ok(conn.clone())
                    };
                    std::future::ready(result)
                },
                |pipe| {
                    pipe.cmd("PING");
                },
                false,
            )
            .await
            .unwrap();
        assert_eq!(reply, "OK");
        assert_eq!(connects, 2);
    }

    #[test]
    fn test_redis_error_logs_short_message_and_debug_cause() {
        let (logs, _guard) = capture_logs();
        let err = redis_error(
            "cache pipeline",
            (ErrorKind::IoError, "reset by cache.internal").into(),
        );
        assert!(matches!(err, DbError::OperationFailed { .. }));

        let output = logs.contents();
        let error_line = output
            .lines()
            .find(|line| line.contains("ERROR"))
            .expect("no error event");
        assert!(error_line.contains("Cache operation failed"));
        assert!(!error_line.contains("cache.internal"));
        assert!(
            output
                .lines()
                .any(|line| line.contains("DEBUG") && line.contains("cache.internal"))
        );
    }
}
