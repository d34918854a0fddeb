//! Chain steps for each command
//!
//! Every action runs `LocateEndpoint`, its own operation step, then
//! `BuildResponse`. Steps return `Err` to abort the chain; the action then
//! rolls back and answers with the error's response code.

mod aucx;
mod crcx;
mod dlcx;
mod epcf;
mod mdcx;
mod ntfy;
mod rqnt;

use tracing::trace;

use crate::connection::{CallId, ConnectionId, ConnectionMode};
use crate::message::{Parameter, ResponseCode};
use crate::scheduler::{ChainStep, StepOutcome};

use super::{CommandError, TxContext};

pub use aucx::AuditConnection;
pub use crcx::{CreateConnection, DeleteCreated};
pub use dlcx::DeleteConnection;
pub use epcf::ConfigureEndpoint;
pub use mdcx::ModifyConnection;
pub use ntfy::Notify;
pub use rqnt::RequestNotification;

/// Upper bound on endpoints a single `*` lookup may return
const LOOKUP_LIMIT: usize = 256;

fn parse_call_id(value: &str) -> Result<CallId, CommandError> {
    value.parse().map_err(|e: String| CommandError::new(ResponseCode::IncorrectCallId, e))
}

fn parse_connection_id(value: &str) -> Result<ConnectionId, CommandError> {
    value.parse().map_err(|_| {
        CommandError::new(ResponseCode::IncorrectConnectionId, format!("Invalid connection id '{}'", value))
    })
}

fn parse_mode(value: &str) -> Result<ConnectionMode, CommandError> {
    value
        .parse()
        .map_err(|_| CommandError::new(ResponseCode::UnsupportedMode, format!("Unsupported mode '{}'", value)))
}

fn has_wildcard(name: &str, wildcard: &str) -> bool {
    let local = name.split('@').next().unwrap_or(name);
    local.split('/').any(|part| part == wildcard)
}

/// Resolve the command's endpoint name through the naming tree
pub struct LocateEndpoint {
    allow_all: bool,
}

impl LocateEndpoint {
    /// Exactly one endpoint; `$` allowed, `*` rejected
    pub fn single() -> Self {
        Self { allow_all: false }
    }

    /// Any number of endpoints; `*` allowed
    pub fn all() -> Self {
        Self { allow_all: true }
    }
}

impl ChainStep<TxContext, CommandError> for LocateEndpoint {
    fn name(&self) -> &'static str {
        "locate-endpoint"
    }

    fn perform(&self, ctx: &mut TxContext) -> Result<StepOutcome, CommandError> {
        let name = ctx.command.endpoint.clone();
        if !self.allow_all && has_wildcard(&name, "*") {
            return Err(CommandError::protocol(format!("Wildcard not allowed in '{}'", name)));
        }

        if self.allow_all && has_wildcard(&name, "*") {
            let mut out = vec![None; LOOKUP_LIMIT];
            let count = ctx.env.naming.find(&name, &mut out)?;
            out.truncate(count);
            ctx.endpoints = out.into_iter().flatten().collect();
        } else {
            ctx.endpoints = vec![ctx.env.naming.find_one(&name)?];
        }
        trace!(endpoint = %name, matches = ctx.endpoints.len(), "endpoint located");
        Ok(StepOutcome::Continue)
    }
}

/// Finish the response: name the specific endpoint when a wildcard was used
pub struct BuildResponse;

impl ChainStep<TxContext, CommandError> for BuildResponse {
    fn name(&self) -> &'static str {
        "build-response"
    }

    fn perform(&self, ctx: &mut TxContext) -> Result<StepOutcome, CommandError> {
        let wildcarded = has_wildcard(&ctx.command.endpoint, "$");
        if wildcarded && !ctx.response.params.contains_key(&Parameter::SpecificEndpointId) {
            if let Some(endpoint) = ctx.endpoints.first() {
                let name = ctx.env.qualified(endpoint.name());
                ctx.response.params.insert(Parameter::SpecificEndpointId, name);
            }
        }
        Ok(StepOutcome::Continue)
    }
}
