//! Network reachability as seen by the sync engine.

use std::{future::Future, sync::Arc};

use tokio::sync::watch;

pub trait Connectivity: Send + Sync {
  fn is_online(&self) -> bool;

  /// Resolves once the network is reachable.
  fn wait_online(&self) -> impl Future<Output = ()> + Send + '_;
}

/// For environments without a reachability signal.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOnline;

impl Connectivity for AlwaysOnline {
  fn is_online(&self) -> bool { true }

  async fn wait_online(&self) {}
}

/// Reachability fed by the host platform through [`Self::set_online`].
/// Clones share the same state.
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
  tx: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
  pub fn new(online: bool) -> Self { Self { tx: Arc::new(watch::Sender::new(online)) } }

  pub fn set_online(&self, online: bool) { self.tx.send_replace(online); }
}

impl Connectivity for ConnectivityMonitor {
  fn is_online(&self) -> bool { *self.tx.borrow() }

  async fn wait_online(&self) {
    let mut rx = self.tx.subscribe();
    // The sender lives as long as `self`, so this cannot fail.
    let _ = rx.wait_for(|online| *online).await;
  }
}
