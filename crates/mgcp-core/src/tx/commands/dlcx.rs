use tracing::debug;

use crate::message::{MgcpResponse, Parameter, ResponseCode};
use crate::scheduler::{ChainStep, StepOutcome};
use crate::tx::{CommandError, TxContext};

use super::{parse_call_id, parse_connection_id};

/// DLCX in its three forms: a single connection (`C` + `I`), every
/// connection of a call (`C`), or every connection on the endpoints (neither)
pub struct DeleteConnection;

impl ChainStep<TxContext, CommandError> for DeleteConnection {
    fn name(&self) -> &'static str {
        "delete-connection"
    }

    fn perform(&self, ctx: &mut TxContext) -> Result<StepOutcome, CommandError> {
        let call_id = ctx.optional(Parameter::CallId).map(parse_call_id).transpose()?;
        let id = ctx.optional(Parameter::ConnectionId).map(parse_connection_id).transpose()?;
        let mut response = MgcpResponse::new(ResponseCode::ConnectionDeleted, ctx.transaction.id());

        match (call_id, id) {
            (None, Some(_)) => return Err(CommandError::protocol("Missing call identifier")),
            (None, None) => {
                let deleted: usize = ctx.endpoints.iter().map(|endpoint| endpoint.delete_all().len()).sum();
                debug!(endpoint = %ctx.command.endpoint, deleted, "all connections deleted");
            }
            (Some(call_id), None) => {
                let deleted: usize = ctx
                    .endpoints
                    .iter()
                    .map(|endpoint| endpoint.delete_call(&call_id).len())
                    .sum();
                if deleted == 0 {
                    return Err(CommandError::new(
                        ResponseCode::IncorrectCallId,
                        format!("No connections for call {}", call_id),
                    ));
                }
                debug!(endpoint = %ctx.command.endpoint, call = %call_id, deleted, "call deleted");
            }
            (Some(call_id), Some(id)) => {
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
                let stats = endpoint.delete_connection(id)?;
                response = response.with_param(Parameter::ConnectionParameters, stats.to_string());
            }
        }

        ctx.response = response;
        Ok(StepOutcome::Continue)
    }
}
