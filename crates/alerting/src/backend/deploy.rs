//! Tracks whether Alertmanager is deployed in the cluster.
//!
//! Every syncer and watcher reads the flag at the start of a pass and does
//! nothing while it is false. Only [`run_deployment_probe`] writes it.
//! Becoming deployed also requests a full config sync, since no policy
//! change may follow to trigger one.

use crate::store::ConfigStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Clone, Default, Debug)]
pub struct DeploymentFlag {
    deployed: Arc<AtomicBool>,
    resync: Arc<Notify>,
}

impl DeploymentFlag {
    pub fn new(deployed: bool) -> Self {
        Self {
            deployed: Arc::new(AtomicBool::new(deployed)),
            resync: Arc::default(),
        }
    }

    pub fn is_deployed(&self) -> bool {
        self.deployed.load(Ordering::Acquire)
    }

    /// Returns the previous value. Going from not deployed to deployed
    /// requests a resync.
    pub fn set(&self, deployed: bool) -> bool {
        let previous = self.deployed.swap(deployed, Ordering::AcqRel);
        if deployed && !previous {
            self.request_resync();
        }
        previous
    }

    /// Ask the config syncer for a full pass. Requests made while nobody
    /// waits are kept until the next [`Self::resync_requested`].
    pub fn request_resync(&self) {
        self.resync.notify_one();
    }

    /// Resolves once a resync has been requested.
    pub async fn resync_requested(&self) {
        self.resync.notified().await;
    }
}

/// Flip the flag according to the presence of the Alertmanager config secret,
/// which the deployer creates together with the Alertmanager instance. A
/// secret without `config.yml` (a redeploy) requests a resync as well.
pub async fn run_deployment_probe(
    store: Arc<dyn ConfigStore>,
    flag: DeploymentFlag,
    interval: Duration,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        match store.config_exists().await {
            Ok(deployed) => {
                let previous = flag.set(deployed);
                if previous != deployed {
                    info!(deployed, "Alertmanager deployment state changed");
                } else if deployed {
                    match store.current_config().await {
                        Ok(None) => {
                            info!("Alertmanager config secret is empty, requesting resync");
                            flag.request_resync();
                        }
                        Ok(Some(_)) => {}
                        Err(e) => warn!(error = %e, "Failed to read Alertmanager config"),
                    }
                }
            }
            Err(e) => warn!(error = %e, "Failed to probe Alertmanager deployment"),
        }
    }
    info!("Deployment probe stopped");
}
