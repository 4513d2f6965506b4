//! Shared harness for engine integration tests.

#![allow(dead_code)]

use bujo_sync_engine::{
    AppLifecycle, DebugPolicy, MemoryStore, MockTransport, NetworkMonitor, RetryConfig,
    StaticAuth, SyncConfig, SyncEngine, SyncEnvironment,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// One client device talking to a shared remote.
pub struct Device {
    pub engine: SyncEngine<MemoryStore, MockTransport>,
    pub auth: Arc<StaticAuth>,
    pub network: NetworkMonitor,
    pub lifecycle: AppLifecycle,
    pub policy: Arc<DebugPolicy>,
}

impl Device {
    /// A signed-in, online device.
    pub fn new(remote: Arc<MockTransport>) -> Self {
        Self::with_config(remote, SyncConfig::new(Uuid::new_v4()))
    }

    /// A device with a custom configuration.
    pub fn with_config(remote: Arc<MockTransport>, config: SyncConfig) -> Self {
        bujo_sync_testkit::tracing::init_test_tracing();
        let auth = Arc::new(StaticAuth::signed_in(Uuid::new_v4(), "token"));
        let network = NetworkMonitor::new(true);
        let lifecycle = AppLifecycle::new();
        let policy = Arc::new(DebugPolicy::new());
        let env = SyncEnvironment::new(auth.clone())
            .with_network(network.clone())
            .with_lifecycle(lifecycle.clone())
            .with_policy(policy.clone());
        let engine = SyncEngine::new(config, Arc::new(MemoryStore::new()), remote, env);
        Self {
            engine,
            auth,
            network,
            lifecycle,
            policy,
        }
    }

    pub fn store(&self) -> &MemoryStore {
        self.engine.store()
    }

    pub fn remote(&self) -> &MockTransport {
        self.engine.transport()
    }
}

/// A fresh remote.
pub fn remote() -> Arc<MockTransport> {
    Arc::new(MockTransport::new())
}

/// Retry settings with a small cap, for exercising the ceiling.
pub fn capped_retry() -> RetryConfig {
    RetryConfig::new(Duration::from_secs(2), Duration::from_secs(10))
}

/// Polls `condition` until it holds, failing the test after five seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

/// Awaits `future`, failing the test after five seconds.
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("timed out")
}
