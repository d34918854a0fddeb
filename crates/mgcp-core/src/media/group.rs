//! Per-endpoint view of the shared media resource pools

use std::fmt;
use std::sync::Arc;

use tracing::trace;

use super::{DtmfDetector, DtmfGenerator, Player, Recorder, ResourceError, ResourcesPool};

/// Kinds of media resource an endpoint may borrow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Player,
    Recorder,
    DtmfDetector,
    DtmfGenerator,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Player => "player",
            ResourceKind::Recorder => "recorder",
            ResourceKind::DtmfDetector => "dtmf-detector",
            ResourceKind::DtmfGenerator => "dtmf-generator",
        };
        f.write_str(name)
    }
}

/// Lazily borrows media resources for one endpoint and returns them on release
pub struct MediaGroup {
    endpoint: String,
    resources: Arc<ResourcesPool>,
    allowed: &'static [ResourceKind],
    player: Option<Box<dyn Player>>,
    recorder: Option<Box<dyn Recorder>>,
    detector: Option<Box<dyn DtmfDetector>>,
    generator: Option<Box<dyn DtmfGenerator>>,
}

impl fmt::Debug for MediaGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaGroup")
            .field("endpoint", &self.endpoint)
            .field("borrowed", &self.borrowed())
            .finish()
    }
}

impl MediaGroup {
    pub fn new(
        endpoint: impl Into<String>,
        resources: Arc<ResourcesPool>,
        allowed: &'static [ResourceKind],
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            resources,
            allowed,
            player: None,
            recorder: None,
            detector: None,
            generator: None,
        }
    }

    fn check(&self, kind: ResourceKind) -> Result<(), ResourceError> {
        if self.allowed.contains(&kind) {
            Ok(())
        } else {
            Err(ResourceError::not_supported(kind.to_string()))
        }
    }

    /// Resource kinds currently on loan
    pub fn borrowed(&self) -> Vec<ResourceKind> {
        let mut kinds = Vec::new();
        if self.player.is_some() {
            kinds.push(ResourceKind::Player);
        }
        if self.recorder.is_some() {
            kinds.push(ResourceKind::Recorder);
        }
        if self.detector.is_some() {
            kinds.push(ResourceKind::DtmfDetector);
        }
        if self.generator.is_some() {
            kinds.push(ResourceKind::DtmfGenerator);
        }
        kinds
    }

    pub fn player(&mut self) -> Result<&mut dyn Player, ResourceError> {
        self.check(ResourceKind::Player)?;
        let player = match self.player.take() {
            Some(player) => player,
            None => {
                trace!(endpoint = %self.endpoint, "borrowing player");
                self.resources.acquire_player()?
            }
        };
        Ok(&mut **self.player.insert(player))
    }

    pub fn recorder(&mut self) -> Result<&mut dyn Recorder, ResourceError> {
        self.check(ResourceKind::Recorder)?;
        let recorder = match self.recorder.take() {
            Some(recorder) => recorder,
            None => {
                trace!(endpoint = %self.endpoint, "borrowing recorder");
                self.resources.acquire_recorder()?
            }
        };
        Ok(&mut **self.recorder.insert(recorder))
    }

    pub fn detector(&mut self) -> Result<&mut dyn DtmfDetector, ResourceError> {
        self.check(ResourceKind::DtmfDetector)?;
        let detector = match self.detector.take() {
            Some(detector) => detector,
            None => {
                trace!(endpoint = %self.endpoint, "borrowing dtmf detector");
                self.resources.acquire_detector()?
            }
        };
        Ok(&mut **self.detector.insert(detector))
    }

    pub fn generator(&mut self) -> Result<&mut dyn DtmfGenerator, ResourceError> {
        self.check(ResourceKind::DtmfGenerator)?;
        let generator = match self.generator.take() {
            Some(generator) => generator,
            None => {
                trace!(endpoint = %self.endpoint, "borrowing dtmf generator");
                self.resources.acquire_generator()?
            }
        };
        Ok(&mut **self.generator.insert(generator))
    }

    pub fn release_player(&mut self) {
        if let Some(mut player) = self.player.take() {
            player.remove_listener();
            player.deactivate();
            self.resources.release_player(player);
        }
    }

    pub fn release_recorder(&mut self) {
        if let Some(mut recorder) = self.recorder.take() {
            recorder.remove_listener();
            recorder.deactivate();
            self.resources.release_recorder(recorder);
        }
    }

    pub fn release_detector(&mut self) {
        if let Some(mut detector) = self.detector.take() {
            detector.remove_listener();
            detector.deactivate();
            self.resources.release_detector(detector);
        }
    }

    pub fn release_generator(&mut self) {
        if let Some(mut generator) = self.generator.take() {
            generator.deactivate();
            self.resources.release_generator(generator);
        }
    }

    pub fn release(&mut self, kind: ResourceKind) {
        match kind {
            ResourceKind::Player => self.release_player(),
            ResourceKind::Recorder => self.release_recorder(),
            ResourceKind::DtmfDetector => self.release_detector(),
            ResourceKind::DtmfGenerator => self.release_generator(),
        }
    }

    /// Return everything on loan to the pools
    pub fn release_all(&mut self) {
        if !self.borrowed().is_empty() {
            trace!(endpoint = %self.endpoint, "releasing media group");
        }
        self.release_player();
        self.release_recorder();
        self.release_detector();
        self.release_generator();
    }
}

impl Drop for MediaGroup {
    fn drop(&mut self) {
        self.release_all();
    }
}
