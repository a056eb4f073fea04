//! Wires the stores, syncers and watchers together and runs the
//! `AlertGroup`, `AlertRule` and `Notifier` controllers.
//!
//! Every change to one of the three kinds triggers a full config sync.
//! Deleting a group first deletes its rules.

use crate::backend::deploy::run_deployment_probe;
use crate::backend::{AlertmanagerClient, DeliveryBackend, DeploymentFlag};
use crate::compiler::RuleCompiler;
use crate::config::AlertingConfig;
use crate::crds::{AlertGroup, AlertRule, Notifier};
use crate::precan;
use crate::rule_ids::RuleIdRegistry;
use crate::store::{
    ClusterResources, ConfigStore, KubeClusterResources, KubeConfigStore, KubePolicyStore,
    PolicyStore,
};
use crate::syncer::{ConfigSyncer, StateSyncer};
use crate::types::{Error, Result};
use crate::watcher::{
    run_event_watcher, run_periodic, NodeWatcher, PodWatcher, SystemComponentWatcher,
    WatcherContext, WorkloadWatcher,
};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Event;
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::finalizer::{finalizer, Event as FinalizerEvent};
use kube::runtime::watcher::Config;
use kube::{Api, Client, ResourceExt};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn, Instrument};

pub const GROUP_FINALIZER: &str = "alerting.platform/group-rules";

/// Shared state of the three controllers.
pub struct Context {
    pub client: Client,
    pub cluster_name: String,
    pub policies: Arc<dyn PolicyStore>,
    pub syncer: Arc<ConfigSyncer>,
    pub requeue: Duration,
}

impl Context {
    pub fn new(
        client: Client,
        cluster_name: impl Into<String>,
        policies: Arc<dyn PolicyStore>,
        syncer: Arc<ConfigSyncer>,
        requeue: Duration,
    ) -> Self {
        Self {
            client,
            cluster_name: cluster_name.into(),
            policies,
            syncer,
            requeue,
        }
    }

    /// Sync and decide when to look again. A pass skipped because
    /// Alertmanager is missing is retried after the requeue interval.
    async fn sync(&self) -> Result<Action> {
        let report = self.syncer.sync().await?;
        if report.skipped {
            return Ok(Action::requeue(self.requeue));
        }
        if report.writes() > 0 {
            info!(?report, "Alerting config synced");
        }
        Ok(Action::await_change())
    }
}

#[instrument(skip(ctx), fields(group = %group.name_any()))]
pub async fn reconcile_group(group: Arc<AlertGroup>, ctx: Arc<Context>) -> Result<Action> {
    if group.spec.cluster_name != ctx.cluster_name {
        return Ok(Action::await_change());
    }
    let namespace = group.namespace().ok_or(Error::MissingObjectKey)?;
    let groups: Api<AlertGroup> = Api::namespaced(ctx.client.clone(), &namespace);

    finalizer(&groups, GROUP_FINALIZER, group, |event| async {
        match event {
            FinalizerEvent::Apply(_) => apply_group(&ctx).await,
            FinalizerEvent::Cleanup(group) => cleanup_group(group, &ctx).await,
        }
    })
    .await
    .map_err(|e| match e {
        kube::runtime::finalizer::Error::ApplyFailed(err)
        | kube::runtime::finalizer::Error::CleanupFailed(err) => err,
        kube::runtime::finalizer::Error::AddFinalizer(e)
        | kube::runtime::finalizer::Error::RemoveFinalizer(e) => Error::Kube(e),
        kube::runtime::finalizer::Error::UnnamedObject => Error::MissingObjectKey,
        kube::runtime::finalizer::Error::InvalidFinalizer => {
            Error::Finalizer(format!("invalid finalizer name {GROUP_FINALIZER}"))
        }
    })
}

async fn apply_group(ctx: &Context) -> Result<Action> {
    ctx.sync().await
}

async fn cleanup_group(group: Arc<AlertGroup>, ctx: &Context) -> Result<Action> {
    let group_id = group.group_id();
    let deleted = ctx.policies.delete_group_rules(&group_id).await?;
    info!(group_id = %group_id, deleted, "Deleted rules of removed AlertGroup");
    ctx.sync().await?;
    Ok(Action::await_change())
}

#[instrument(skip(ctx), fields(rule = %rule.name_any()))]
pub async fn reconcile_rule(rule: Arc<AlertRule>, ctx: Arc<Context>) -> Result<Action> {
    if rule.spec.cluster_name != ctx.cluster_name {
        return Ok(Action::await_change());
    }
    ctx.sync().await
}

#[instrument(skip(ctx), fields(notifier = %notifier.name_any()))]
pub async fn reconcile_notifier(notifier: Arc<Notifier>, ctx: Arc<Context>) -> Result<Action> {
    if notifier.spec.cluster_name != ctx.cluster_name {
        return Ok(Action::await_change());
    }
    ctx.sync().await
}

/// Failed syncs are retried after the configured requeue interval.
pub fn error_policy<K: kube::Resource>(obj: Arc<K>, err: &Error, ctx: Arc<Context>) -> Action {
    warn!(
        error = %err,
        object = %obj.name_any(),
        requeue_secs = ctx.requeue.as_secs(),
        "Alerting reconciliation failed, requeueing"
    );
    Action::requeue(ctx.requeue)
}

async fn run_controller<K, F, Fut>(
    api: Api<K>,
    reconcile: F,
    ctx: Arc<Context>,
    token: CancellationToken,
) where
    K: kube::Resource<DynamicType = ()>
        + Clone
        + Debug
        + serde::de::DeserializeOwned
        + Send
        + Sync
        + 'static,
    F: FnMut(Arc<K>, Arc<Context>) -> Fut,
    Fut: std::future::Future<Output = Result<Action>> + Send + 'static,
{
    let kind = K::kind(&()).to_string();
    info!(kind = %kind, "Starting controller");
    Controller::new(api, Config::default().any_semantic())
        .with_config(controller::Config::default().debounce(Duration::from_secs(1)))
        .graceful_shutdown_on(token.cancelled_owned())
        .run(reconcile, error_policy, ctx)
        .for_each(|result| {
            let span = tracing::info_span!("alerting_reconciliation_result", kind = %kind);
            async move {
                match result {
                    Ok((object, _)) => debug!(object = %object.name, "Reconciliation successful"),
                    Err(e) => error!(error = %e, "Reconciliation error"),
                }
            }
            .instrument(span)
        })
        .await;
    info!(kind = %kind, "Controller stopped");
}

/// Start every alerting task for one cluster and wait until `token` is
/// cancelled and all of them have stopped. `deployed` is driven by the
/// deployment probe started here.
#[instrument(skip_all, fields(cluster = %config.cluster.name))]
pub async fn run(
    client: Client,
    config: AlertingConfig,
    deployed: DeploymentFlag,
    token: CancellationToken,
) -> Result<()> {
    let cluster_name = config.cluster.name.clone();
    let rule_ids = RuleIdRegistry::new();

    let policies: Arc<dyn PolicyStore> =
        Arc::new(KubePolicyStore::new(client.clone(), cluster_name.clone()));
    let configs: Arc<dyn ConfigStore> = Arc::new(KubeConfigStore::new(
        client.clone(),
        config.alertmanager.namespace.clone(),
        config.alertmanager.secret_name.clone(),
    ));
    let resources: Arc<dyn ClusterResources> = Arc::new(KubeClusterResources::new(
        client.clone(),
        config.monitoring.project_label.clone(),
    ));
    let backend: Arc<dyn DeliveryBackend> = Arc::new(AlertmanagerClient::from_settings(
        client.clone(),
        &config.alertmanager,
    )?);

    if config.precan.enabled {
        precan::install(policies.as_ref(), &cluster_name).await;
    }

    let compiler = RuleCompiler::new(
        cluster_name.clone(),
        config.monitoring.namespace.clone(),
        rule_ids.clone(),
    );
    let config_syncer = Arc::new(ConfigSyncer::new(
        policies.clone(),
        configs.clone(),
        resources.clone(),
        compiler,
        rule_ids.clone(),
        deployed.clone(),
        config.monitoring.namespace.clone(),
    ));
    let ctx = Arc::new(Context::new(
        client.clone(),
        cluster_name.clone(),
        policies.clone(),
        config_syncer.clone(),
        config.intervals.requeue(),
    ));
    let watcher_ctx = Arc::new(WatcherContext {
        policies: policies.clone(),
        resources,
        backend: backend.clone(),
        rule_ids: rule_ids.clone(),
        deployed: deployed.clone(),
        cluster_display_name: config.cluster.display_name().to_string(),
    });
    let state_syncer = StateSyncer::new(policies, backend, rule_ids, deployed.clone());

    let watch_interval = config.intervals.watcher();
    let mut tasks: Vec<JoinHandle<()>> = vec![
        tokio::spawn(run_deployment_probe(
            configs,
            deployed,
            config.intervals.deploy_probe(),
            token.clone(),
        )),
        tokio::spawn({
            let token = token.clone();
            async move { config_syncer.run_resync(token).await }
        }),
        tokio::spawn(state_syncer.run(config.intervals.state_sync(), token.clone())),
        tokio::spawn(run_periodic(
            PodWatcher::new(),
            watcher_ctx.clone(),
            watch_interval,
            token.clone(),
        )),
        tokio::spawn(run_periodic(
            WorkloadWatcher::new(),
            watcher_ctx.clone(),
            watch_interval,
            token.clone(),
        )),
        tokio::spawn(run_periodic(
            SystemComponentWatcher::new(),
            watcher_ctx.clone(),
            watch_interval,
            token.clone(),
        )),
        tokio::spawn(run_periodic(
            NodeWatcher::new(),
            watcher_ctx.clone(),
            watch_interval,
            token.clone(),
        )),
        tokio::spawn(run_event_watcher(
            Api::<Event>::all(client.clone()),
            watcher_ctx,
            token.clone(),
        )),
    ];

    tasks.push(tokio::spawn(run_controller(
        Api::<AlertGroup>::all(client.clone()),
        reconcile_group,
        ctx.clone(),
        token.clone(),
    )));
    tasks.push(tokio::spawn(run_controller(
        Api::<AlertRule>::all(client.clone()),
        reconcile_rule,
        ctx.clone(),
        token.clone(),
    )));
    tasks.push(tokio::spawn(run_controller(
        Api::<Notifier>::all(client),
        reconcile_notifier,
        ctx,
        token.clone(),
    )));

    info!(tasks = tasks.len(), "Alerting controller started");
    token.cancelled().await;

    for task in tasks {
        if let Err(e) = task.await {
            error!(error = %e, "Alerting task panicked or was aborted");
        }
    }
    info!("Alerting controller stopped");
    Ok(())
}
