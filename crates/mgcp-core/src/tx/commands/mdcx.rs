use tracing::debug;

use crate::connection::ConnectionState;
use crate::message::{Parameter, ResponseCode};
use crate::scheduler::{ChainStep, StepOutcome};
use crate::tx::{CommandError, TxContext};

use super::{parse_call_id, parse_connection_id, parse_mode};

/// MDCX: complete or renegotiate a connection and change its mode
pub struct ModifyConnection;

impl ChainStep<TxContext, CommandError> for ModifyConnection {
    fn name(&self) -> &'static str {
        "modify-connection"
    }

    fn perform(&self, ctx: &mut TxContext) -> Result<StepOutcome, CommandError> {
        let call_id = parse_call_id(ctx.required(Parameter::CallId)?)?;
        let id = parse_connection_id(ctx.required(Parameter::ConnectionId)?)?;
        let mode = ctx.optional(Parameter::Mode).map(parse_mode).transpose()?;
        let endpoint = ctx.endpoint()?;

        let info = endpoint.connection(id).ok_or_else(|| {
            CommandError::new(ResponseCode::IncorrectConnectionId, format!("Connection {} not found", id))
        })?;
        if info.call_id.as_ref() != Some(&call_id) {
            return Err(CommandError::new(
                ResponseCode::IncorrectCallId,
                format!("Connection {} does not belong to call {}", id, call_id),
            ));
        }

        if let Some(remote) = ctx.command.sdp.clone() {
            if info.state == ConnectionState::Open {
                let local = endpoint.renegotiate(id, &remote)?;
                ctx.response.sdp = Some(local.to_string());
            } else if let Some(answer) = endpoint.open(id, &remote)? {
                ctx.response.sdp = Some(answer.to_string());
            }
        }

        if let Some(mode) = mode {
            let old = endpoint.set_mode(id, mode)?;
            debug!(endpoint = endpoint.name(), connection = %id, %old, new = %mode, "mode changed");
        }
        Ok(StepOutcome::Continue)
    }
}
