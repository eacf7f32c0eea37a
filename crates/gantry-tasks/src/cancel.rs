//! Cooperative cancellation
//!
//! A [`CancelToken`] is cancelled either directly or through any of its
//! ancestors. Parallel groups hand their children a child token, so a failing
//! child cancels its siblings without cancelling the rest of the run, while
//! cancelling the root token (OS signal) reaches everything below it.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

/// Shared, hierarchical cancellation signal
#[derive(Debug, Clone)]
pub struct CancelToken {
    node: Arc<Node>,
}

#[derive(Debug)]
struct Node {
    tx: watch::Sender<bool>,
    parent: Option<Arc<Node>>,
}

impl CancelToken {
    /// Create a new root token
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            node: Arc::new(Node { tx, parent: None }),
        }
    }

    /// Create a token that is cancelled when this one is, but can also be
    /// cancelled on its own
    pub fn child(&self) -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            node: Arc::new(Node {
                tx,
                parent: Some(self.node.clone()),
            }),
        }
    }

    /// Cancel this token and every token derived from it
    pub fn cancel(&self) {
        self.node.tx.send_replace(true);
    }

    /// Whether this token or any ancestor has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.chain().any(|node| *node.tx.borrow())
    }

    /// Wait until this token or any ancestor is cancelled
    pub async fn cancelled(&self) {
        let mut receivers: Vec<watch::Receiver<bool>> =
            self.chain().map(|node| node.tx.subscribe()).collect();

        let waits = receivers.iter_mut().map(|rx| {
            Box::pin(async move {
                // The sender lives in a node this token keeps alive, so the
                // channel cannot close while we wait.
                let _ = rx.wait_for(|cancelled| *cancelled).await;
            })
        });
        futures::future::select_all(waits).await;
    }

    fn chain(&self) -> impl Iterator<Item = &Node> {
        std::iter::successors(Some(self.node.as_ref()), |node| node.parent.as_deref())
    }

    /// Cancel this token when the process receives SIGINT or SIGTERM
    /// (Ctrl-C on platforms without SIGTERM).
    ///
    /// The listener stops once the token is cancelled by other means.
    pub fn bind_os_signals(&self) -> tokio::task::JoinHandle<()> {
        let token = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                res = tokio::signal::ctrl_c() => {
                    if let Err(e) = res {
                        warn!(error = %e, "failed to listen for Ctrl-C");
                        return;
                    }
                    info!("received interrupt, cancelling run");
                }
                _ = wait_for_sigterm() => {
                    info!("received SIGTERM, cancelling run");
                }
                _ = token.cancelled() => return,
            }
            token.cancel();
        })
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!(error = %e, "failed to listen for SIGTERM");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await
}
