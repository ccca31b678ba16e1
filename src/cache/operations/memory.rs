use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use redis::RedisResult;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::counter::CounterStore;

#[derive(Debug)]
struct Entry {
    count: i64,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// 进程内计数存储，用于单机运行和测试
///
/// 与 Redis 后端语义一致：过期时间只在键没有过期时间时设置，自增不会刷新。
/// 过期的键在被访问时惰性移除，其余的由 `spawn_sweeper` 定期清理。
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// 只检查本次访问的键，已过期则先移除
    fn with_entry<T>(
        &self,
        key: &str,
        f: impl FnOnce(&mut HashMap<String, Entry>, Instant) -> T,
    ) -> T {
        let now = Instant::now();
        let mut entries = self.lock();
        if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
            entries.remove(key);
        }
        f(&mut entries, now)
    }

    fn bump(&self, key: &str, limit: Option<i64>, expiry_secs: i64) -> (bool, i64) {
        self.with_entry(key, |entries, now| {
            let entry = entries.entry(key.to_string()).or_insert(Entry {
                count: 0,
                expires_at: None,
            });
            entry.count += 1;
            if entry.expires_at.is_none() {
                entry.expires_at = Some(now + Duration::from_secs(expiry_secs.max(0) as u64));
            }
            match limit {
                Some(limit) if entry.count > limit => {
                    entry.count -= 1;
                    (false, entry.count)
                }
                _ => (true, entry.count),
            }
        })
    }

    /// 清理所有已过期的键，返回清理数量
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    /// 启动后台清理任务，按 `period` 周期调用 `purge_expired`
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                interval.tick().await;
                let purged = store.purge_expired();
                if purged > 0 {
                    tracing::debug!("Purged {} expired counters", purged);
                }
            }
        })
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str, expiry_secs: i64) -> RedisResult<i64> {
        Ok(self.bump(key, None, expiry_secs).1)
    }

    async fn increment_within(
        &self,
        key: &str,
        limit: i64,
        expiry_secs: i64,
    ) -> RedisResult<(bool, i64)> {
        Ok(self.bump(key, Some(limit.max(0)), expiry_secs))
    }

    async fn read(&self, key: &str) -> RedisResult<i64> {
        Ok(self.with_entry(key, |entries, _| {
            entries.get(key).map_or(0, |entry| entry.count)
        }))
    }

    async fn ttl(&self, key: &str) -> RedisResult<Option<i64>> {
        Ok(self.with_entry(key, |entries, now| {
            // 与 Redis TTL 一样按毫秒四舍五入到秒
            entries
                .get(key)
                .and_then(|entry| entry.expires_at)
                .map(|at| ((at.saturating_duration_since(now).as_millis() + 500) / 1000) as i64)
        }))
    }

    async fn delete(&self, key: &str) -> RedisResult<()> {
        self.lock().remove(key);
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
