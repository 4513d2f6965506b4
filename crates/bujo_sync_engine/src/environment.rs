//! Collaborators the engine observes: authentication, connectivity and
//! application lifecycle.

use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

use crate::policy::{NoopPolicy, SyncPolicy};

/// Source of the signed-in identity.
pub trait AuthProvider: Send + Sync {
    /// Id of the signed-in user.
    fn current_user_id(&self) -> Option<Uuid>;

    /// Returns true if a user is signed in.
    fn is_signed_in(&self) -> bool {
        self.current_user_id().is_some()
    }

    /// Bearer token for remote requests.
    fn access_token(&self) -> Option<String>;
}

#[derive(Debug, Default)]
struct Session {
    user_id: Option<Uuid>,
    access_token: Option<String>,
}

/// An [`AuthProvider`] whose session is set by the host application.
#[derive(Debug, Default)]
pub struct StaticAuth {
    session: RwLock<Session>,
}

impl StaticAuth {
    /// Creates a provider with nobody signed in.
    pub fn signed_out() -> Self {
        Self::default()
    }

    /// Creates a provider with `user_id` signed in.
    pub fn signed_in(user_id: Uuid, access_token: impl Into<String>) -> Self {
        let auth = Self::default();
        auth.sign_in(user_id, access_token);
        auth
    }

    /// Starts a session.
    pub fn sign_in(&self, user_id: Uuid, access_token: impl Into<String>) {
        let mut session = self.session.write();
        session.user_id = Some(user_id);
        session.access_token = Some(access_token.into());
    }

    /// Ends the session.
    pub fn sign_out(&self) {
        *self.session.write() = Session::default();
    }
}

impl AuthProvider for StaticAuth {
    fn current_user_id(&self) -> Option<Uuid> {
        self.session.read().user_id
    }

    fn access_token(&self) -> Option<String> {
        self.session.read().access_token.clone()
    }
}

/// Connectivity signal fed by the platform's reachability monitor.
#[derive(Debug, Clone)]
pub struct NetworkMonitor {
    sender: Arc<watch::Sender<bool>>,
}

impl NetworkMonitor {
    /// Creates a monitor with the given initial connectivity.
    pub fn new(connected: bool) -> Self {
        let (sender, _) = watch::channel(connected);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Current connectivity.
    pub fn is_connected(&self) -> bool {
        *self.sender.borrow()
    }

    /// Publishes a connectivity change. Repeating the current value is a
    /// no-op for observers.
    pub fn set_connected(&self, connected: bool) {
        self.sender.send_if_modified(|current| {
            let changed = *current != connected;
            *current = connected;
            changed
        });
    }

    /// A receiver for connectivity changes.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Application lifecycle transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The app came to the foreground.
    Foreground,
    /// The app moved to the background.
    Background,
}

/// Broadcasts application lifecycle events.
#[derive(Debug, Clone)]
pub struct AppLifecycle {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl AppLifecycle {
    /// Creates a lifecycle channel.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(16);
        Self { sender }
    }

    /// Publishes an event. Nobody listening is not an error.
    pub fn notify(&self, event: LifecycleEvent) {
        let _ = self.sender.send(event);
    }

    /// Shorthand for `notify(LifecycleEvent::Foreground)`.
    pub fn enter_foreground(&self) {
        self.notify(LifecycleEvent::Foreground);
    }

    /// A receiver for lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }
}

impl Default for AppLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything the engine needs from its host.
#[derive(Clone)]
pub struct SyncEnvironment {
    /// Signed-in identity.
    pub auth: Arc<dyn AuthProvider>,
    /// Connectivity signal.
    pub network: NetworkMonitor,
    /// Lifecycle signal.
    pub lifecycle: AppLifecycle,
    /// Debug and test hooks.
    pub policy: Arc<dyn SyncPolicy>,
}

impl SyncEnvironment {
    /// Creates an environment that is online with the no-op policy.
    pub fn new(auth: Arc<dyn AuthProvider>) -> Self {
        Self {
            auth,
            network: NetworkMonitor::default(),
            lifecycle: AppLifecycle::default(),
            policy: Arc::new(NoopPolicy),
        }
    }

    /// Replaces the network monitor.
    pub fn with_network(mut self, network: NetworkMonitor) -> Self {
        self.network = network;
        self
    }

    /// Replaces the lifecycle channel.
    pub fn with_lifecycle(mut self, lifecycle: AppLifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    /// Replaces the policy.
    pub fn with_policy(mut self, policy: Arc<dyn SyncPolicy>) -> Self {
        self.policy = policy;
        self
    }
}

impl std::fmt::Debug for SyncEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEnvironment")
            .field("signed_in", &self.auth.is_signed_in())
            .field("connected", &self.network.is_connected())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_auth_session() {
        let auth = StaticAuth::signed_out();
        assert!(!auth.is_signed_in());

        let user = Uuid::new_v4();
        auth.sign_in(user, "token");
        assert_eq!(auth.current_user_id(), Some(user));
        assert_eq!(auth.access_token().as_deref(), Some("token"));

        auth.sign_out();
        assert!(auth.current_user_id().is_none());
        assert!(auth.access_token().is_none());
    }

    #[test]
    fn network_monitor_only_notifies_changes() {
        let network = NetworkMonitor::new(true);
        let mut rx = network.subscribe();

        network.set_connected(true);
        assert!(!rx.has_changed().unwrap());

        network.set_connected(false);
        assert!(rx.has_changed().unwrap());
        assert!(!*rx.borrow_and_update());
        assert!(!network.is_connected());
    }

    #[tokio::test]
    async fn lifecycle_reaches_subscribers() {
        let lifecycle = AppLifecycle::new();
        let mut rx = lifecycle.subscribe();

        lifecycle.enter_foreground();
        assert_eq!(rx.recv().await.unwrap(), LifecycleEvent::Foreground);
    }
}
