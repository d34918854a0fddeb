//! Gateway assembly
//!
//! Wires configuration, schedulers, pools, endpoints and the controller
//! together.

use std::sync::Arc;
use std::sync::atomic::AtomicU32;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::clock::{ClockRef, WallClock};
use crate::config::{ConfigError, GatewayConfig};
use crate::connection::PortManager;
use crate::controller::MgcpController;
use crate::endpoint::{Endpoint, EndpointEnv};
use crate::error::Result;
use crate::media::{ResourcesPool, ResourcesPoolBuilder};
use crate::message::MgcpCommand;
use crate::naming::{NamingError, NamingTree};
use crate::notify::CallAgentLink;
use crate::provider::MgcpProvider;
use crate::scheduler::{Scheduler, TaskHandle, spawn_driver};
use crate::tx::ActionEnv;

type MediaSetup = Box<dyn FnOnce(ResourcesPoolBuilder) -> ResourcesPoolBuilder>;

pub struct MediaGatewayBuilder {
    config: GatewayConfig,
    provider: Option<Arc<dyn MgcpProvider>>,
    clock: Option<ClockRef>,
    media: Option<MediaSetup>,
}

impl MediaGatewayBuilder {
    pub fn provider(mut self, provider: Arc<dyn MgcpProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Clock for both schedulers; wall clock by default
    pub fn clock(mut self, clock: ClockRef) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Register the media plane's resource factories
    pub fn media<F>(mut self, setup: F) -> Self
    where
        F: FnOnce(ResourcesPoolBuilder) -> ResourcesPoolBuilder + 'static,
    {
        self.media = Some(Box::new(setup));
        self
    }

    pub fn build(self) -> Result<MediaGateway> {
        let config = self.config;
        config.validate()?;
        let provider = self
            .provider
            .ok_or_else(|| ConfigError::Invalid("no MGCP provider configured".to_string()))?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(WallClock::new()));

        let control = Scheduler::new("control", clock.clone());
        let media = Scheduler::new("media", clock);
        let ports = Arc::new(PortManager::new(config.media.rtp_port_min, config.media.rtp_port_max));

        let mut pools = ResourcesPool::builder(config.pools, ports, config.bind_address.clone());
        if let Some(setup) = self.media {
            pools = setup(pools);
        }
        let resources = Arc::new(pools.build());

        let transactions = Arc::new(AtomicU32::new(1));
        let env = Arc::new(EndpointEnv {
            control: control.clone(),
            media: media.clone(),
            resources: resources.clone(),
            settings: config.media,
            agent: Some(CallAgentLink::new(config.domain.clone(), provider.clone(), transactions.clone())),
        });

        let naming = Arc::new(NamingTree::new());
        let mut endpoints = Vec::new();
        for group in &config.endpoints {
            for name in group.names() {
                let endpoint = Endpoint::new(name.clone(), group.profile, env.clone());
                endpoint.start();
                naming.register(&name, endpoint.clone())?;
                endpoints.push(endpoint);
            }
        }

        let action_env = Arc::new(ActionEnv {
            domain: config.domain.clone(),
            naming: naming.clone(),
            provider,
            control: control.clone(),
            signals: config.signals,
            notify_transactions: transactions,
        });
        let controller = MgcpController::new(action_env, config.transactions);

        info!(domain = %config.domain, endpoints = endpoints.len(), "media gateway assembled");
        Ok(MediaGateway { config, control, media, resources, naming, endpoints, controller })
    }
}

/// A fully assembled media gateway control plane
pub struct MediaGateway {
    config: GatewayConfig,
    control: Scheduler,
    media: Scheduler,
    resources: Arc<ResourcesPool>,
    naming: Arc<NamingTree<Endpoint>>,
    endpoints: Vec<Arc<Endpoint>>,
    controller: MgcpController,
}

impl MediaGateway {
    pub fn builder(config: GatewayConfig) -> MediaGatewayBuilder {
        MediaGatewayBuilder { config, provider: None, clock: None, media: None }
    }

    /// Feed an inbound command
    pub fn process(&self, command: MgcpCommand) -> Option<TaskHandle> {
        self.controller.process(command)
    }

    pub fn endpoint(&self, name: &str) -> std::result::Result<Arc<Endpoint>, NamingError> {
        self.naming.find_one(name)
    }

    pub fn endpoints(&self) -> &[Arc<Endpoint>] {
        &self.endpoints
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn control_scheduler(&self) -> &Scheduler {
        &self.control
    }

    pub fn media_scheduler(&self) -> &Scheduler {
        &self.media
    }

    pub fn resources(&self) -> &Arc<ResourcesPool> {
        &self.resources
    }

    pub fn naming(&self) -> &Arc<NamingTree<Endpoint>> {
        &self.naming
    }

    pub fn in_flight(&self) -> usize {
        self.controller.in_flight()
    }

    /// Run one tick of each scheduler, media first
    pub fn tick(&self) {
        self.media.tick();
        self.control.tick();
    }

    /// Drive both schedulers on the tokio runtime until `token` is cancelled
    pub fn spawn_drivers(&self, token: CancellationToken) -> Vec<JoinHandle<()>> {
        let settings = self.config.scheduler;
        vec![
            spawn_driver(self.media.clone(), Duration::from_millis(settings.media_tick_ms), token.child_token()),
            spawn_driver(self.control.clone(), Duration::from_millis(settings.control_tick_ms), token.child_token()),
        ]
    }

    /// Stop every endpoint, releasing connections, signals and media
    pub fn shutdown(&self) {
        for endpoint in &self.endpoints {
            endpoint.stop();
        }
        info!(domain = %self.config.domain, "media gateway stopped");
    }
}
