//! Tick driver: runs unread reconciliation, auto-trigger scheduling, trigger
//! queue processing, fallback-run reconciliation, and session staleness
//! reconciliation once per interval, for the workspace this process serves.

use crate::adapters::callback::CallbackSink;
use crate::adapters::launcher::RuntimeLauncher;
use crate::adapters::pty::PtyAdapter;
use crate::config::Config;
use crate::ids::WorkspaceId;
use crate::store::Stores;
use crate::worker::auto_trigger_scheduler::AutoTriggerScheduler;
use crate::worker::callback::CallbackWorker;
use crate::worker::fallback_executor::FallbackExecutor;
use crate::worker::fallback_reconciler::FallbackReconciler;
use crate::worker::runtime_executor::RuntimeExecutor;
use crate::worker::trigger_processor::TriggerProcessor;
use crate::worker::unread_reconciler::UnreadReconciler;
use std::sync::Arc;

pub struct Supervisor {
    stores: Stores,
    config: Arc<Config>,
    workspace_id: WorkspaceId,
    unread_reconciler: UnreadReconciler,
    auto_trigger_scheduler: AutoTriggerScheduler,
    trigger_processor: TriggerProcessor,
    fallback_reconciler: FallbackReconciler,
}

impl Supervisor {
    pub fn new(
        stores: Stores,
        config: Arc<Config>,
        pty: Arc<dyn PtyAdapter>,
        launcher: Arc<dyn RuntimeLauncher>,
        callback_sink: Option<Arc<dyn CallbackSink>>,
    ) -> Self {
        let workspace_id = WorkspaceId::from(config.workspace_id.clone());
        let runtime_executor = Arc::new(RuntimeExecutor::new(pty));
        let fallback_executor = Arc::new(FallbackExecutor::new(stores.clone(), launcher));
        let callback_worker = Arc::new(CallbackWorker::new(stores.clone(), callback_sink, config.clone()));

        Self {
            unread_reconciler: UnreadReconciler::new(stores.clone(), config.clone()),
            auto_trigger_scheduler: AutoTriggerScheduler::new(stores.clone(), config.clone()),
            trigger_processor: TriggerProcessor::new(stores.clone(), config.clone(), runtime_executor, fallback_executor, callback_worker),
            fallback_reconciler: FallbackReconciler::new(stores.clone(), config.grace_ms, config.orphan_grace_ms),
            stores,
            config,
            workspace_id,
        }
    }

    /// One full pass of the tick cycle. Errors from any stage are logged
    /// and swallowed so one bad step doesn't stall the others.
    pub async fn tick(&self) {
        match self.unread_reconciler.scan(&self.workspace_id).await {
            Ok(candidates) => match self.auto_trigger_scheduler.schedule(&self.workspace_id, candidates).await {
                Ok(report) => tracing::debug!(?report, "auto-trigger scheduling pass complete"),
                Err(e) => tracing::error!(error = %e, "auto-trigger scheduling failed"),
            },
            Err(e) => tracing::error!(error = %e, "unread reconciliation scan failed"),
        }

        match self.trigger_processor.tick(&self.workspace_id).await {
            Ok(report) => tracing::debug!(?report, "trigger queue processing pass complete"),
            Err(e) => tracing::error!(error = %e, "trigger queue processing failed"),
        }

        match self.fallback_reconciler.tick(&self.workspace_id).await {
            Ok(report) => tracing::debug!(?report, "fallback run reconciliation pass complete"),
            Err(e) => tracing::error!(error = %e, "fallback run reconciliation failed"),
        }

        if let Err(e) = self.reconcile_stale_sessions().await {
            tracing::error!(error = %e, "session staleness reconciliation failed");
        }
    }

    async fn reconcile_stale_sessions(&self) -> anyhow::Result<()> {
        let now = chrono::Utc::now();
        let sessions = self.stores.sessions.list_sessions(&self.workspace_id).await?;
        for session in sessions {
            self.stores
                .sessions
                .mark_offline_if_stale(&session.agent_id, &self.workspace_id, now, self.config.session_stale_after_hours)
                .await?;
        }
        Ok(())
    }

    /// Runs `tick` on a fixed interval until the process is asked to shut
    /// down. Intended to be spawned as its own task alongside the HTTP
    /// server.
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(std::time::Duration::from_millis(self.config.supervisor_tick_interval_ms));
        loop {
            interval.tick().await;
            self.tick().await;
        }
    }
}
