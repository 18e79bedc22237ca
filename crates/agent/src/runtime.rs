use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};
use tracing::info;

use outreach_core::config::Config;
use outreach_core::paths::Paths;
use outreach_core::session::{BrowserSession, DetachedSession};
use outreach_core::Result;
use outreach_control::ControlPlaneClient;
use outreach_heal::{HealManager, HealRequest, SealboxSealer};
use outreach_queue::{InteractionQueue, Job};
use outreach_transport::{
    CommandHandler, CommandRouter, OutboundSink, ProgressReporter, TransportClient,
};

use crate::handlers::{
    HandlerDeps, ScrapeProfilesHandler, SendConnectionRequestsHandler, SendMessageHandler,
};
use crate::health;

/// Wires the queue, control-plane client, heal manager, transport, and
/// command router into one daemon.
pub struct AgentRuntime {
    config: Config,
    queue: InteractionQueue,
    control: Arc<ControlPlaneClient>,
    heal: Arc<HealManager>,
    transport: Arc<TransportClient>,
    session: Arc<dyn BrowserSession>,
}

impl AgentRuntime {
    pub fn new(config: Config, paths: Paths) -> Result<Self> {
        paths.ensure_dirs()?;
        let sealer = Arc::new(SealboxSealer::load_or_generate(&paths)?);
        let heal = Arc::new(HealManager::new(paths, sealer));
        let control = Arc::new(ControlPlaneClient::new(&config.control_plane));
        let queue = InteractionQueue::new(config.queue.clone());
        let transport = TransportClient::new(config.transport.clone());
        Ok(Self {
            config,
            queue,
            control,
            heal,
            transport,
            session: Arc::new(DetachedSession),
        })
    }

    /// Attach the automation engine. Without this, every job fails with a
    /// session error (and, being unrecoverable, heals).
    pub fn with_session(mut self, session: Arc<dyn BrowserSession>) -> Self {
        self.session = session;
        self
    }

    pub fn queue(&self) -> &InteractionQueue {
        &self.queue
    }

    fn deps(&self) -> HandlerDeps {
        HandlerDeps {
            queue: self.queue.clone(),
            control: self.control.clone(),
            heal: self.heal.clone(),
            session: self.session.clone(),
        }
    }

    fn build_router(&self, sink: Arc<dyn OutboundSink>) -> CommandRouter {
        let deps = self.deps();
        let mut router = CommandRouter::new(sink);
        router.register(
            "scrape-profiles",
            Arc::new(ScrapeProfilesHandler::new(deps.clone())),
        );
        router.register(
            "send-message",
            Arc::new(SendMessageHandler::new(deps.clone())),
        );
        router.register(
            "send-connection-requests",
            Arc::new(SendConnectionRequestsHandler::new(deps)),
        );
        router
    }

    /// Spawn every service loop. The returned sender broadcasts shutdown to
    /// all of them; dropping it without sending also stops the loops.
    pub async fn start(&self) -> Result<broadcast::Sender<()>> {
        // Warm the rate-limit cache; a dead control plane only costs one
        // degraded call here.
        self.control.sync_rate_limits().await;

        let (shutdown_tx, _) = broadcast::channel(8);
        let (inbound_tx, inbound_rx) = mpsc::channel(64);

        tokio::spawn(
            self.transport
                .clone()
                .run_loop(inbound_tx, shutdown_tx.subscribe()),
        );

        let sink: Arc<dyn OutboundSink> = self.transport.clone();
        let router = Arc::new(self.build_router(sink));
        tokio::spawn(router.run_loop(inbound_rx, shutdown_tx.subscribe()));

        tokio::spawn(self.queue.clone().run_sweeper(shutdown_tx.subscribe()));

        let listener = health::bind(&self.config.health).await?;
        tokio::spawn(health::serve(
            listener,
            self.queue.clone(),
            self.control.clone(),
            shutdown_tx.subscribe(),
        ));

        info!("Agent runtime started");
        Ok(shutdown_tx)
    }

    /// Successor-process entry point: re-dispatch a consumed heal record as
    /// a fresh job, with the heal attempt counted.
    pub async fn resume(&self, record: HealRequest) -> Result<Value> {
        let recursion = record.common().recursion_count + 1;
        info!(
            phase = record.heal_phase(),
            recursion_count = recursion,
            "Resuming healed job"
        );

        let deps = self.deps();
        let command_id = Job::new_id("resume");
        let sink: Arc<dyn OutboundSink> = self.transport.clone();
        let progress = ProgressReporter::new(command_id, sink);

        match record {
            HealRequest::Search(r) => {
                let payload = json!({
                    "companyName": r.company_name,
                    "companyRole": r.company_role,
                    "location": r.location,
                    "resumeIndex": r.resume_index,
                    "pageCount": r.page_count,
                    "lastPartialLinksFile": r.last_partial_links_file,
                    "searchName": r.common.search_name,
                    "searchPassword": r.common.search_password,
                    "jwtToken": r.common.jwt_token,
                    "recursionCount": recursion,
                });
                ScrapeProfilesHandler::new(deps).execute(payload, progress).await
            }
            HealRequest::ProfileInit(r) => {
                let payload = json!({
                    "healPhase": "profile-init",
                    "currentProcessingList": r.current_processing_list,
                    "currentIndex": r.current_index,
                    "batchSize": r.batch_size,
                    "totalConnections": r.total_connections,
                    "searchName": r.common.search_name,
                    "searchPassword": r.common.search_password,
                    "jwtToken": r.common.jwt_token,
                    "recursionCount": recursion,
                });
                SendConnectionRequestsHandler::new(deps)
                    .execute(payload, progress)
                    .await
            }
        }
    }

    pub fn heal_manager(&self) -> Arc<HealManager> {
        self.heal.clone()
    }
}
