//! # MGCP-Core: Media Gateway Control Plane
//!
//! This crate implements the control plane of an MGCP media gateway. It
//! turns parsed call-agent commands into connection, endpoint and media
//! signal operations and answers every command with exactly one response.
//!
//! ## Architecture
//!
//! - **Scheduler**: cooperative, strict-priority task queues driven by a
//!   monotonic [`Clock`](clock::Clock), with [`TaskChain`](scheduler::TaskChain)s
//!   for multi-step work. Control and media mixing run on separate instances.
//! - **Transactions**: one singleton [`Action`](tx::Action) per command verb,
//!   each a task chain with an optional rollback chain.
//! - **Endpoints**: named termination points owning their connections and a
//!   mixer or splitter topology, resolved through a copy-on-write naming tree
//!   with `*` and `$` wildcards.
//! - **Connections**: a `CLOSED -> HALF_OPEN -> OPEN` state machine with SDP
//!   offer/answer, recycled through resource pools.
//! - **Signals**: the play-record IVR state machine driving pooled players,
//!   recorders and DTMF detectors supplied by the media plane.
//!
//! Wire encoding and the media plane itself live outside this crate; see
//! [`provider::MgcpProvider`] and the traits in [`media`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rvoip_mgcp_core::{GatewayConfig, MediaGateway, MgcpCommand, Parameter, Verb};
//! use rvoip_mgcp_core::provider::ChannelProvider;
//!
//! # async fn run() -> rvoip_mgcp_core::Result<()> {
//! let (provider, mut responses) = ChannelProvider::new();
//! let gateway = MediaGateway::builder(GatewayConfig::default())
//!     .provider(Arc::new(provider))
//!     .build()?;
//! let _drivers = gateway.spawn_drivers(tokio_util::sync::CancellationToken::new());
//!
//! gateway.process(
//!     MgcpCommand::new(Verb::CreateConnection, 1, "rvoip/ann/$")
//!         .with_param(Parameter::CallId, "1A")
//!         .with_param(Parameter::Mode, "sendrecv"),
//! );
//! let response = responses.recv().await;
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod connection;
pub mod controller;
pub mod endpoint;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod media;
pub mod message;
pub mod naming;
pub mod notify;
pub mod pool;
pub mod provider;
pub mod scheduler;
pub mod signal;
pub mod tx;

// Re-export commonly used types
pub use clock::{Clock, ClockRef, ManualClock, WallClock};
pub use config::GatewayConfig;
pub use connection::{CallId, Connection, ConnectionId, ConnectionMode, ConnectionState, ConnectionType};
pub use controller::MgcpController;
pub use endpoint::{Endpoint, EndpointProfile, EndpointState};
pub use error::{Error, Result};
pub use gateway::{MediaGateway, MediaGatewayBuilder};
pub use logging::{LoggingConfig, setup_logging};
pub use message::{MgcpCommand, MgcpResponse, NotifyMessage, Parameter, ResponseCode, Verb};
pub use naming::NamingTree;
pub use scheduler::{Queue, Scheduler};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
