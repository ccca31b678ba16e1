use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use alfred::{
    AppState, build_router,
    cache::{CounterStore, MemoryCounterStore, RedisCounterStore},
    config::{Config, StoreBackend},
};
#[cfg(debug_assertions)]
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 加载配置
    let config = Config::from_env().expect("Failed to load configuration");

    // 设置计数存储，连接由这里持有，策略只引用
    let store: Arc<dyn CounterStore> = match config.store_backend {
        StoreBackend::Redis => {
            let redis_url = config.redis_url.clone().unwrap_or_default();
            let redis_client =
                redis::Client::open(redis_url).expect("Failed to create Redis client");
            let store = RedisCounterStore::connect(&redis_client)
                .await
                .expect("Failed to connect to Redis");
            Arc::new(store)
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-process counter store, counts are not shared");
            let store = Arc::new(MemoryCounterStore::new());
            store.spawn_sweeper(Duration::from_secs(60));
            store as Arc<dyn CounterStore>
        }
    };
    tracing::info!(
        "Counter store: {}, counting strategy: {:?}",
        store.backend(),
        config.quota_strategy
    );

    let state = AppState::new(config.clone(), store);
    let router = build_router(state);

    // 根据编译模式决定是否添加CORS
    #[cfg(debug_assertions)]
    let router = {
        tracing::debug!("Adding CORS layer for development mode");
        router.layer(CorsLayer::permissive())
    };

    let addr = SocketAddr::new(
        config.server_host.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid server_host, falling back to dual-stack default");
            IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
        }),
        config.server_port,
    );
    tracing::info!("Server listening on {}", addr);
    axum::serve(
        tokio::net::TcpListener::bind(&addr)
            .await
            .expect("Failed to bind"),
        router,
    )
    .await
    .expect("Failed to start server");
}
