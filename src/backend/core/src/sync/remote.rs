//! Redis-backed synchronization store shared by every replica.
//!
//! Plain operations map onto single Redis commands. `set_greater_than` runs
//! as a server-side Lua script so that read, compare and write are one
//! indivisible step no matter how many clients race on the same key.

use crate::error::{ApexError, ErrorCode, Result};
use crate::telemetry::logging::redact_url;
use async_trait::async_trait;
use metrics::counter;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

use super::SyncStore;

const SET_GREATER_THAN_LUA: &str = include_str!("set_greater_than.lua");

/// Configuration for the Redis store.
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Redis connection URL
    pub url: String,

    /// Prefix applied to every key, separated by `:`
    pub namespace: String,

    /// Connection timeout
    pub connect_timeout: Duration,

    /// Per-command timeout
    pub command_timeout: Duration,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            namespace: "apex-sched".to_string(),
            connect_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(2),
        }
    }
}

impl RedisStoreConfig {
    /// Create a config for the given URL and namespace.
    pub fn new(url: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }
}

/// Redis synchronization store.
pub struct RedisStore {
    conn: ConnectionManager,
    script: redis::Script,
    config: RedisStoreConfig,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("url", &redact_url(&self.config.url))
            .field("namespace", &self.config.namespace)
            .finish()
    }
}

impl RedisStore {
    /// Connect to Redis and verify the connection with `PING`.
    pub async fn connect(config: RedisStoreConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str()).map_err(|e| {
            ApexError::with_internal(
                ErrorCode::StoreConnectionFailed,
                "Failed to create Redis client",
                e.to_string(),
            )
        })?;

        let mut conn = tokio::time::timeout(config.connect_timeout, ConnectionManager::new(client))
            .await?
            .map_err(|e| {
                ApexError::with_internal(
                    ErrorCode::StoreConnectionFailed,
                    "Failed to connect to Redis",
                    e.to_string(),
                )
            })?;

        let _: String = tokio::time::timeout(
            config.command_timeout,
            redis::cmd("PING").query_async(&mut conn),
        )
        .await?
        .map_err(|e| {
            ApexError::with_internal(
                ErrorCode::StoreConnectionFailed,
                "Redis ping failed",
                e.to_string(),
            )
        })?;

        info!(
            url = %redact_url(&config.url),
            namespace = %config.namespace,
            "Redis synchronization store connected"
        );

        Ok(Self {
            conn,
            script: redis::Script::new(SET_GREATER_THAN_LUA),
            config,
        })
    }

    /// Get the store configuration.
    pub fn config(&self) -> &RedisStoreConfig {
        &self.config
    }

    fn full_key(&self, key: &str) -> String {
        namespaced_key(&self.config.namespace, key)
    }

    /// Run one command against Redis, bounded by the command timeout.
    async fn timed<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        Ok(tokio::time::timeout(self.config.command_timeout, fut).await??)
    }

    fn record(op: &'static str, result: &'static str) {
        counter!(
            "apex_sched_store_ops_total",
            "backend" => "redis",
            "op" => op,
            "result" => result,
        )
        .increment(1);
    }
}

/// Build the key stored in Redis for a logical key.
pub(crate) fn namespaced_key(namespace: &str, key: &str) -> String {
    if namespace.is_empty() {
        key.to_string()
    } else {
        format!("{}:{}", namespace, key)
    }
}

#[async_trait]
impl SyncStore for RedisStore {
    async fn set(&self, key: &str, value: i64) -> Result<()> {
        let mut conn = self.conn.clone();
        let full_key = self.full_key(key);

        self.timed(conn.set::<_, _, ()>(&full_key, value)).await?;
        Self::record("set", "ok");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<i64>> {
        let mut conn = self.conn.clone();
        let full_key = self.full_key(key);

        let raw: Option<String> = self.timed(conn.get(&full_key)).await?;
        match raw {
            Some(raw) => {
                let value = raw.trim().parse::<i64>().map_err(|e| {
                    ApexError::with_internal(
                        ErrorCode::InvalidStoredValue,
                        format!("Stored value for '{}' is not an integer", key),
                        e.to_string(),
                    )
                    .with_source(e)
                })?;
                Self::record("get", "hit");
                Ok(Some(value))
            }
            None => {
                Self::record("get", "miss");
                Ok(None)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let full_key = self.full_key(key);

        let deleted: i64 = self.timed(conn.del(&full_key)).await?;
        Self::record("delete", if deleted > 0 { "deleted" } else { "absent" });
        Ok(deleted > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let full_key = self.full_key(key);

        let exists: bool = self.timed(conn.exists(&full_key)).await?;
        Ok(exists)
    }

    async fn set_greater_than(&self, key: &str, value: i64) -> Result<bool> {
        let mut conn = self.conn.clone();
        let full_key = self.full_key(key);

        let mut invocation = self.script.key(&full_key);
        invocation.arg(value);

        let stored: i64 = match self.timed(invocation.invoke_async(&mut conn)).await {
            Ok(stored) => stored,
            Err(e) => {
                Self::record("set_greater_than", "error");
                return Err(e);
            }
        };

        let won = stored == 1;
        debug!(key = %full_key, value, won, "set_greater_than evaluated");
        Self::record("set_greater_than", if won { "won" } else { "lost" });
        Ok(won)
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespaced_key() {
        assert_eq!(
            namespaced_key("deploy-a", "clock:job1:* * * * * *"),
            "deploy-a:clock:job1:* * * * * *"
        );
        assert_eq!(namespaced_key("", "clock:job1"), "clock:job1");
    }

    #[test]
    fn test_redis_store_config_default() {
        let config = RedisStoreConfig::default();
        assert_eq!(config.url, "redis://127.0.0.1:6379");
        assert_eq!(config.namespace, "apex-sched");
        assert_eq!(config.command_timeout, Duration::from_secs(2));
    }

    mod script {
        //! Runs the Lua script in an embedded Lua 5.1 interpreter, the
        //! version Redis embeds, with `redis.call` served from a map.

        use crate::sync::remote::SET_GREATER_THAN_LUA;
        use mlua::{Lua, Table, Value};
        use std::cell::RefCell;
        use std::collections::HashMap;
        use std::rc::Rc;

        type Keyspace = Rc<RefCell<HashMap<String, String>>>;

        const KEY: &str = "ns:clock:job1:* * * * * *";

        fn keyspace() -> Keyspace {
            Rc::new(RefCell::new(HashMap::new()))
        }

        /// Evaluate the script; `Err` carries an error reply's message.
        fn eval(data: &Keyspace, arg: &str) -> std::result::Result<bool, String> {
            let lua = Lua::new();
            let globals = lua.globals();
            globals.set("KEYS", vec![KEY.to_string()]).unwrap();
            globals.set("ARGV", vec![arg.to_string()]).unwrap();
            lua.load("redis = { error_reply = function(msg) return { err = msg } end }")
                .exec()
                .unwrap();

            let backing = data.clone();
            let call = lua
                .create_function(
                    move |_, (cmd, key, value): (String, String, Option<String>)| {
                        let mut backing = backing.borrow_mut();
                        match cmd.as_str() {
                            "GET" => Ok(backing.get(&key).cloned()),
                            "SET" => {
                                backing.insert(key, value.unwrap_or_default());
                                Ok(Some("OK".to_string()))
                            }
                            other => Err(mlua::Error::RuntimeError(format!(
                                "unexpected command {}",
                                other
                            ))),
                        }
                    },
                )
                .unwrap();
            let redis: Table = globals.get("redis").unwrap();
            redis.set("call", call).unwrap();

            let result = match lua.load(SET_GREATER_THAN_LUA).eval::<Value>().unwrap() {
                Value::Table(reply) => Err(reply.get::<_, String>("err").unwrap()),
                other => Ok(lua.unpack::<i64>(other).unwrap() == 1),
            };
            result
        }

        fn stored(data: &Keyspace) -> Option<String> {
            data.borrow().get(KEY).cloned()
        }

        #[test]
        fn test_absent_key_wins() {
            let data = keyspace();
            assert_eq!(eval(&data, "1000"), Ok(true));
            assert_eq!(stored(&data).as_deref(), Some("1000"));
        }

        #[test]
        fn test_equal_and_smaller_lose() {
            let data = keyspace();
            assert_eq!(eval(&data, "1000"), Ok(true));
            assert_eq!(eval(&data, "1000"), Ok(false));
            assert_eq!(eval(&data, "999"), Ok(false));
            assert_eq!(stored(&data).as_deref(), Some("1000"));

            assert_eq!(eval(&data, "1001"), Ok(true));
            assert_eq!(stored(&data).as_deref(), Some("1001"));
        }

        #[test]
        fn test_negative_values_order() {
            let data = keyspace();
            assert_eq!(eval(&data, "-20"), Ok(true));
            assert_eq!(eval(&data, "-100"), Ok(false));
            assert_eq!(eval(&data, "-3"), Ok(true));
            assert_eq!(eval(&data, "0"), Ok(true));
            assert_eq!(eval(&data, "-1"), Ok(false));
        }

        #[test]
        fn test_exact_above_double_precision() {
            // 2^53 and 2^53 + 1 are the same double.
            let data = keyspace();
            assert_eq!(eval(&data, "9007199254740992"), Ok(true));
            assert_eq!(eval(&data, "9007199254740993"), Ok(true));
            assert_eq!(eval(&data, "9007199254740993"), Ok(false));
            assert_eq!(eval(&data, &i64::MAX.to_string()), Ok(true));
            assert_eq!(eval(&data, &(i64::MAX - 1).to_string()), Ok(false));
            assert_eq!(stored(&data), Some(i64::MAX.to_string()));
        }

        #[test]
        fn test_i64_min_then_max() {
            let data = keyspace();
            assert_eq!(eval(&data, &i64::MIN.to_string()), Ok(true));
            assert_eq!(eval(&data, &(i64::MIN + 1).to_string()), Ok(true));
            assert_eq!(eval(&data, &i64::MAX.to_string()), Ok(true));
        }

        #[test]
        fn test_corrupt_stored_value_is_error_and_untouched() {
            let data = keyspace();
            data.borrow_mut().insert(KEY.to_string(), "not-a-number".to_string());

            let err = eval(&data, "1000").unwrap_err();
            assert!(err.contains("stored value is not an integer"));
            assert_eq!(stored(&data).as_deref(), Some("not-a-number"));
        }

        #[test]
        fn test_stored_value_with_leading_zeros() {
            let data = keyspace();
            data.borrow_mut().insert(KEY.to_string(), "0042".to_string());
            assert_eq!(eval(&data, "42"), Ok(false));
            assert_eq!(eval(&data, "43"), Ok(true));
        }
    }
}
