use std::sync::LazyLock;

use async_trait::async_trait;
use redis::aio::{ConnectionLike, MultiplexedConnection};
use redis::{AsyncCommands, Client as RedisClient, RedisResult, Script};

/// 计数存储
///
/// 所有计数都是实时读写，本地不做缓存或批量合并。
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// 键不存在时先以 0 创建并设置过期时间，然后自增，返回自增后的值
    async fn increment(&self, key: &str, expiry_secs: i64) -> RedisResult<i64>;

    /// 与 `increment` 相同，但自增后超过 `limit` 时在同一原子操作内回退，
    /// 返回是否放行及最终计数
    async fn increment_within(
        &self,
        key: &str,
        limit: i64,
        expiry_secs: i64,
    ) -> RedisResult<(bool, i64)>;

    /// 读取当前计数，键不存在返回 0
    async fn read(&self, key: &str) -> RedisResult<i64>;

    /// 剩余过期秒数，键不存在或没有过期时间时为 `None`
    async fn ttl(&self, key: &str) -> RedisResult<Option<i64>>;

    /// 删除计数器，键不存在时同样成功
    async fn delete(&self, key: &str) -> RedisResult<()>;

    fn backend(&self) -> &'static str;
}

// SETNX 建键、INCR 自增，键上没有过期时间时才 EXPIRE，整个窗口只设置一次；
// 中途出错或键在两次调用之间过期都不会留下永不过期的计数器。
// ARGV[2] 为上限，负数表示不比较。
static INCREMENT_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
        redis.call('SETNX', KEYS[1], 0)
        local count = redis.call('INCR', KEYS[1])
        if redis.call('TTL', KEYS[1]) == -1 then
            redis.call('EXPIRE', KEYS[1], ARGV[1])
        end
        local limit = tonumber(ARGV[2])
        if limit >= 0 and count > limit then
            return {0, redis.call('DECR', KEYS[1])}
        end
        return {1, count}
        "#,
    )
});

const UNCAPPED: i64 = -1;

/// 基于 Redis 的计数存储
///
/// 持有一个可复用的多路复用连接，克隆开销很小。
#[derive(Clone)]
pub struct RedisCounterStore<C = MultiplexedConnection> {
    conn: C,
}

impl RedisCounterStore {
    pub async fn connect(redis: &RedisClient) -> RedisResult<Self> {
        let conn = redis.get_multiplexed_async_connection().await?;
        Ok(Self::new(conn))
    }
}

impl<C> RedisCounterStore<C>
where
    C: ConnectionLike + Clone + Send + Sync,
{
    pub fn new(conn: C) -> Self {
        Self { conn }
    }

    async fn run_increment(
        &self,
        key: &str,
        limit: i64,
        expiry_secs: i64,
    ) -> RedisResult<(bool, i64)> {
        let mut conn = self.conn.clone();
        let (allowed, count): (i64, i64) = INCREMENT_SCRIPT
            .key(key)
            .arg(expiry_secs)
            .arg(limit)
            .invoke_async(&mut conn)
            .await?;
        Ok((allowed == 1, count))
    }
}

#[async_trait]
impl<C> CounterStore for RedisCounterStore<C>
where
    C: ConnectionLike + Clone + Send + Sync,
{
    async fn increment(&self, key: &str, expiry_secs: i64) -> RedisResult<i64> {
        let (_, count) = self.run_increment(key, UNCAPPED, expiry_secs).await?;
        tracing::debug!("Counter {} incremented to {}", key, count);
        Ok(count)
    }

    async fn increment_within(
        &self,
        key: &str,
        limit: i64,
        expiry_secs: i64,
    ) -> RedisResult<(bool, i64)> {
        self.run_increment(key, limit.max(0), expiry_secs).await
    }

    async fn read(&self, key: &str) -> RedisResult<i64> {
        let mut conn = self.conn.clone();
        let count: Option<i64> = conn.get(key).await?;
        Ok(count.unwrap_or(0))
    }

    async fn ttl(&self, key: &str) -> RedisResult<Option<i64>> {
        let mut conn = self.conn.clone();
        // -2 表示键不存在，-1 表示没有过期时间
        let ttl: i64 = conn.ttl(key).await?;
        Ok((ttl >= 0).then_some(ttl))
    }

    async fn delete(&self, key: &str) -> RedisResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(key).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use redis::{Arg, Cmd, Pipeline, RedisFuture, Value};

    use super::*;

    /// 记录发出的命令并按顺序返回预设回复
    #[derive(Clone, Default)]
    struct ScriptedConnection {
        sent: Arc<Mutex<Vec<Vec<String>>>>,
        replies: Arc<Mutex<VecDeque<Value>>>,
    }

    impl ScriptedConnection {
        fn replying(replies: Vec<Value>) -> Self {
            Self {
                sent: Arc::default(),
                replies: Arc::new(Mutex::new(replies.into())),
            }
        }

        fn sent(&self) -> Vec<Vec<String>> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl ConnectionLike for ScriptedConnection {
        fn req_packed_command<'a>(&'a mut self, cmd: &'a Cmd) -> RedisFuture<'a, Value> {
            let args = cmd
                .args_iter()
                .map(|arg| match arg {
                    Arg::Simple(bytes) => String::from_utf8_lossy(bytes).into_owned(),
                    Arg::Cursor => "<cursor>".to_string(),
                })
                .collect();
            self.sent.lock().unwrap().push(args);
            let reply = self.replies.lock().unwrap().pop_front().unwrap_or(Value::Nil);
            Box::pin(async move { Ok(reply) })
        }

        fn req_packed_commands<'a>(
            &'a mut self,
            _pipeline: &'a Pipeline,
            _offset: usize,
            _count: usize,
        ) -> RedisFuture<'a, Vec<Value>> {
            Box::pin(async { Ok(Vec::new()) })
        }

        fn get_db(&self) -> i64 {
            0
        }
    }

    const KEY: &str = "user:u-1:org:org-1:rule:chat";

    #[tokio::test]
    async fn increment_runs_one_script_without_cap() {
        let conn = ScriptedConnection::replying(vec![Value::Array(vec![
            Value::Int(1),
            Value::Int(1),
        ])]);
        let store = RedisCounterStore::new(conn.clone());

        assert_eq!(store.increment(KEY, 3600).await.unwrap(), 1);

        let sent = conn.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0][0], "EVALSHA");
        assert_eq!(sent[0][1], INCREMENT_SCRIPT.get_hash());
        assert_eq!(sent[0][2..], ["1", KEY, "3600", "-1"]);
    }

    #[tokio::test]
    async fn capped_increment_passes_limit_and_reports_denial() {
        let conn = ScriptedConnection::replying(vec![Value::Array(vec![
            Value::Int(0),
            Value::Int(2),
        ])]);
        let store = RedisCounterStore::new(conn.clone());

        let result = store.increment_within(KEY, 2, 60).await.unwrap();
        assert_eq!(result, (false, 2));
        assert_eq!(conn.sent()[0][2..], ["1", KEY, "60", "2"]);
    }

    #[tokio::test]
    async fn read_treats_missing_key_as_zero() {
        let conn = ScriptedConnection::replying(vec![
            Value::Nil,
            Value::BulkString(b"5".to_vec()),
        ]);
        let store = RedisCounterStore::new(conn.clone());

        assert_eq!(store.read(KEY).await.unwrap(), 0);
        assert_eq!(store.read(KEY).await.unwrap(), 5);
        assert_eq!(conn.sent(), vec![vec!["GET", KEY], vec!["GET", KEY]]);
    }

    #[tokio::test]
    async fn ttl_hides_missing_and_persistent_keys() {
        let conn = ScriptedConnection::replying(vec![
            Value::Int(-2),
            Value::Int(-1),
            Value::Int(42),
        ]);
        let store = RedisCounterStore::new(conn.clone());

        assert_eq!(store.ttl(KEY).await.unwrap(), None);
        assert_eq!(store.ttl(KEY).await.unwrap(), None);
        assert_eq!(store.ttl(KEY).await.unwrap(), Some(42));
        assert_eq!(conn.sent()[0], vec!["TTL", KEY]);
    }

    #[tokio::test]
    async fn delete_issues_del() {
        let conn = ScriptedConnection::replying(vec![Value::Int(0)]);
        let store = RedisCounterStore::new(conn.clone());

        store.delete(KEY).await.unwrap();
        assert_eq!(conn.sent(), vec![vec!["DEL", KEY]]);
    }
}
