//! Shared pools of connections and media resources

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use super::{DtmfDetector, DtmfGenerator, Player, Recorder, ResourceError};
use crate::config::{PoolLimit, PoolSettings};
use crate::connection::{Connection, ConnectionId, PortManager};
use crate::pool::{PoolError, PoolStats, ResourcePool};

type Factory<T> = Box<dyn Fn() -> T + Send + Sync>;

/// Counters for every pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourcesStats {
    pub connections: PoolStats,
    pub players: PoolStats,
    pub recorders: PoolStats,
    pub detectors: PoolStats,
    pub generators: PoolStats,
}

/// Every pool the gateway draws from
pub struct ResourcesPool {
    connections: ResourcePool<Connection>,
    players: Option<ResourcePool<Box<dyn Player>>>,
    recorders: Option<ResourcePool<Box<dyn Recorder>>>,
    detectors: Option<ResourcePool<Box<dyn DtmfDetector>>>,
    generators: Option<ResourcePool<Box<dyn DtmfGenerator>>>,
}

impl fmt::Debug for ResourcesPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourcesPool").field("stats", &self.stats()).finish()
    }
}

fn acquire_from<T: crate::pool::Poolable>(
    pool: &Option<ResourcePool<T>>,
    kind: &str,
) -> Result<T, ResourceError> {
    match pool {
        Some(pool) => pool
            .acquire()
            .map_err(|e: PoolError| ResourceError::unavailable(kind, e.to_string())),
        None => Err(ResourceError::unavailable(kind, "no factory configured")),
    }
}

fn stats_of<T: crate::pool::Poolable>(pool: &Option<ResourcePool<T>>) -> PoolStats {
    pool.as_ref().map(ResourcePool::stats).unwrap_or_default()
}

impl ResourcesPool {
    pub fn builder(settings: PoolSettings, ports: Arc<PortManager>, address: impl Into<String>) -> ResourcesPoolBuilder {
        ResourcesPoolBuilder {
            settings,
            ports,
            address: address.into(),
            players: None,
            recorders: None,
            detectors: None,
            generators: None,
        }
    }

    pub fn acquire_connection(&self) -> Result<Connection, PoolError> {
        self.connections.acquire()
    }

    pub fn release_connection(&self, connection: Connection) {
        self.connections.release(connection);
    }

    pub fn acquire_player(&self) -> Result<Box<dyn Player>, ResourceError> {
        acquire_from(&self.players, "player")
    }

    pub fn release_player(&self, player: Box<dyn Player>) {
        if let Some(pool) = &self.players {
            pool.release(player);
        }
    }

    pub fn acquire_recorder(&self) -> Result<Box<dyn Recorder>, ResourceError> {
        acquire_from(&self.recorders, "recorder")
    }

    pub fn release_recorder(&self, recorder: Box<dyn Recorder>) {
        if let Some(pool) = &self.recorders {
            pool.release(recorder);
        }
    }

    pub fn acquire_detector(&self) -> Result<Box<dyn DtmfDetector>, ResourceError> {
        acquire_from(&self.detectors, "dtmf-detector")
    }

    pub fn release_detector(&self, detector: Box<dyn DtmfDetector>) {
        if let Some(pool) = &self.detectors {
            pool.release(detector);
        }
    }

    pub fn acquire_generator(&self) -> Result<Box<dyn DtmfGenerator>, ResourceError> {
        acquire_from(&self.generators, "dtmf-generator")
    }

    pub fn release_generator(&self, generator: Box<dyn DtmfGenerator>) {
        if let Some(pool) = &self.generators {
            pool.release(generator);
        }
    }

    pub fn stats(&self) -> ResourcesStats {
        ResourcesStats {
            connections: self.connections.stats(),
            players: stats_of(&self.players),
            recorders: stats_of(&self.recorders),
            detectors: stats_of(&self.detectors),
            generators: stats_of(&self.generators),
        }
    }
}

/// Collects the media plane's factories before the pools are populated
pub struct ResourcesPoolBuilder {
    settings: PoolSettings,
    ports: Arc<PortManager>,
    address: String,
    players: Option<Factory<Box<dyn Player>>>,
    recorders: Option<Factory<Box<dyn Recorder>>>,
    detectors: Option<Factory<Box<dyn DtmfDetector>>>,
    generators: Option<Factory<Box<dyn DtmfGenerator>>>,
}

impl ResourcesPoolBuilder {
    pub fn players<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Player> + Send + Sync + 'static,
    {
        self.players = Some(Box::new(factory));
        self
    }

    pub fn recorders<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Recorder> + Send + Sync + 'static,
    {
        self.recorders = Some(Box::new(factory));
        self
    }

    pub fn detectors<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn DtmfDetector> + Send + Sync + 'static,
    {
        self.detectors = Some(Box::new(factory));
        self
    }

    pub fn generators<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn DtmfGenerator> + Send + Sync + 'static,
    {
        self.generators = Some(Box::new(factory));
        self
    }

    pub fn build(self) -> ResourcesPool {
        fn pool<T: crate::pool::Poolable + 'static>(
            name: &str,
            limit: PoolLimit,
            factory: Option<Factory<T>>,
        ) -> Option<ResourcePool<T>> {
            factory.map(|factory| ResourcePool::new(name, limit.initial, limit.max, move || factory()))
        }

        let ports = self.ports;
        let address = self.address;
        let next_id = AtomicU32::new(1);
        let connections = ResourcePool::new(
            "connections",
            self.settings.connections.initial,
            self.settings.connections.max,
            move || {
                let id = ConnectionId(next_id.fetch_add(1, Ordering::Relaxed));
                Connection::new(id, ports.clone(), address.clone())
            },
        );

        ResourcesPool {
            connections,
            players: pool("players", self.settings.players, self.players),
            recorders: pool("recorders", self.settings.recorders, self.recorders),
            detectors: pool("dtmf-detectors", self.settings.detectors, self.detectors),
            generators: pool("dtmf-generators", self.settings.generators, self.generators),
        }
    }
}
