use std::sync::Arc;

use crate::cache::{CachedCounter, CounterKey, CounterStore};
use crate::error::QuotaError;

/// 计数判定方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GateStrategy {
    /// 先读后增。并发请求可能同时读到未超限的值，窗口内短暂多放行几次，
    /// 换取被拒绝的请求不写存储。
    #[default]
    Loose,
    /// 自增与比较在存储端一次完成，超限时同一操作内回退，保证放行次数不超过上限。
    Strict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateOutcome {
    pub allowed: bool,
    pub count: i64,
}

/// 配额闸门：只有放行时才消耗一次配额
#[derive(Clone)]
pub struct QuotaGate {
    store: Arc<dyn CounterStore>,
    strategy: GateStrategy,
}

impl QuotaGate {
    pub fn new(store: Arc<dyn CounterStore>, strategy: GateStrategy) -> Self {
        Self { store, strategy }
    }

    pub fn strategy(&self) -> GateStrategy {
        self.strategy
    }

    /// `expiry` 只在需要写入时求值，返回本窗口的剩余秒数
    pub async fn check<F>(
        &self,
        key: &CounterKey,
        limit: i64,
        expiry: F,
    ) -> Result<GateOutcome, QuotaError>
    where
        F: FnOnce() -> i64 + Send,
    {
        let key = key.to_string();
        match self.strategy {
            GateStrategy::Loose => {
                let current = self.store.read(&key).await?;
                if current >= limit {
                    tracing::info!("Counter {} reached limit {} ({})", key, limit, current);
                    return Ok(GateOutcome {
                        allowed: false,
                        count: current,
                    });
                }
                let count = self.store.increment(&key, expiry()).await?;
                tracing::debug!("Counter {} incremented to {}", key, count);
                Ok(GateOutcome {
                    allowed: true,
                    count,
                })
            }
            GateStrategy::Strict => {
                let (allowed, count) = self
                    .store
                    .increment_within(&key, limit, expiry())
                    .await?;
                if allowed {
                    tracing::debug!("Counter {} incremented to {}", key, count);
                } else {
                    tracing::info!("Counter {} reached limit {} ({})", key, limit, count);
                }
                Ok(GateOutcome { allowed, count })
            }
        }
    }

    pub async fn usage(
        &self,
        key: &CounterKey,
        tier: Option<&str>,
    ) -> Result<CachedCounter, QuotaError> {
        let key = key.to_string();
        let count = self.store.read(&key).await?;
        let ttl_secs = self.store.ttl(&key).await?;
        Ok(CachedCounter {
            key,
            count,
            tier: tier.map(str::to_string),
            ttl_secs,
        })
    }

    pub async fn reset(&self, key: &CounterKey) -> Result<String, QuotaError> {
        let key = key.to_string();
        self.store.delete(&key).await?;
        tracing::info!("Counter {} reset", key);
        Ok(key)
    }
}
