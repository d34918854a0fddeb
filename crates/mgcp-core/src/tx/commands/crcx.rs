use std::sync::Arc;

use tracing::{debug, trace};

use crate::connection::{CallId, ConnectionMode, ConnectionType};
use crate::endpoint::Endpoint;
use crate::message::Parameter;
use crate::scheduler::{ChainStep, StepOutcome};
use crate::tx::{CommandError, TxContext};

use super::{parse_call_id, parse_mode};

/// CRCX: create an RTP connection, or a joined pair of local connections
/// when a second endpoint is named
pub struct CreateConnection;

impl CreateConnection {
    fn create_rtp(
        ctx: &mut TxContext,
        endpoint: Arc<Endpoint>,
        call_id: CallId,
        mode: ConnectionMode,
    ) -> Result<(), CommandError> {
        let id = endpoint.create_connection(ConnectionType::Rtp, Some(call_id))?;
        ctx.created.push((endpoint.clone(), id));

        let local = match ctx.command.sdp.clone() {
            Some(remote) => endpoint
                .open(id, &remote)?
                .ok_or_else(|| CommandError::transient("No answer produced"))?,
            None => endpoint.half_open(id)?,
        };
        endpoint.set_mode(id, mode)?;

        ctx.response.params.insert(Parameter::ConnectionId, id.to_string());
        ctx.response.sdp = Some(local.to_string());
        debug!(endpoint = endpoint.name(), connection = %id, %mode, "rtp connection created");
        Ok(())
    }

    fn create_local_pair(
        ctx: &mut TxContext,
        endpoint: Arc<Endpoint>,
        second: &str,
        call_id: CallId,
        mode: ConnectionMode,
    ) -> Result<(), CommandError> {
        let other = ctx.env.naming.find_one(second)?;
        if Arc::ptr_eq(&endpoint, &other) {
            return Err(CommandError::protocol("Cannot join an endpoint to itself"));
        }

        let first_id = endpoint.create_connection(ConnectionType::Local, Some(call_id.clone()))?;
        ctx.created.push((endpoint.clone(), first_id));
        let second_id = other.create_connection(ConnectionType::Local, Some(call_id))?;
        ctx.created.push((other.clone(), second_id));

        Endpoint::join_local(&endpoint, first_id, &other, second_id)?;
        endpoint.set_mode(first_id, mode)?;
        other.set_mode(second_id, ConnectionMode::SendRecv)?;

        let params = &mut ctx.response.params;
        params.insert(Parameter::ConnectionId, first_id.to_string());
        params.insert(Parameter::SecondConnectionId, second_id.to_string());
        params.insert(Parameter::SpecificEndpointId, ctx.env.qualified(endpoint.name()));
        params.insert(Parameter::SecondEndpointId, ctx.env.qualified(other.name()));
        debug!(
            endpoint = endpoint.name(),
            peer = other.name(),
            connection = %first_id,
            peer_connection = %second_id,
            "local connections joined"
        );
        Ok(())
    }
}

impl ChainStep<TxContext, CommandError> for CreateConnection {
    fn name(&self) -> &'static str {
        "create-connection"
    }

    fn perform(&self, ctx: &mut TxContext) -> Result<StepOutcome, CommandError> {
        let call_id = parse_call_id(ctx.required(Parameter::CallId)?)?;
        let mode = parse_mode(ctx.required(Parameter::Mode)?)?;
        let endpoint = ctx.endpoint()?;

        let second = ctx.optional(Parameter::SecondEndpointId).map(str::to_string);
        match second {
            Some(second) => Self::create_local_pair(ctx, endpoint, &second, call_id, mode)?,
            None => Self::create_rtp(ctx, endpoint, call_id, mode)?,
        }
        Ok(StepOutcome::Continue)
    }
}

/// CRCX rollback: delete whatever the failed run created
pub struct DeleteCreated;

impl ChainStep<TxContext, CommandError> for DeleteCreated {
    fn name(&self) -> &'static str {
        "delete-created"
    }

    fn perform(&self, ctx: &mut TxContext) -> Result<StepOutcome, CommandError> {
        for (endpoint, id) in ctx.created.drain(..).rev() {
            // Deleting one side of a local pair removes the other too
            if let Err(e) = endpoint.delete_connection(id) {
                trace!(endpoint = endpoint.name(), connection = %id, "rollback skip: {}", e);
            }
        }
        Ok(StepOutcome::Continue)
    }
}
