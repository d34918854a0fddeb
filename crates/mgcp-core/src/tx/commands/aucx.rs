use crate::message::{Parameter, ResponseCode};
use crate::scheduler::{ChainStep, StepOutcome};
use crate::tx::{CommandError, TxContext};

use super::parse_connection_id;

const DEFAULT_REQUESTED_INFO: &str = "C,M,P";

/// AUCX: report what `F` asks for about one connection
pub struct AuditConnection;

impl ChainStep<TxContext, CommandError> for AuditConnection {
    fn name(&self) -> &'static str {
        "audit-connection"
    }

    fn perform(&self, ctx: &mut TxContext) -> Result<StepOutcome, CommandError> {
        let id = parse_connection_id(ctx.required(Parameter::ConnectionId)?)?;
        let requested = ctx
            .optional(Parameter::RequestedInfo)
            .unwrap_or(DEFAULT_REQUESTED_INFO)
            .to_string();
        let endpoint = ctx.endpoint()?;
        let info = endpoint.connection(id).ok_or_else(|| {
            CommandError::new(ResponseCode::IncorrectConnectionId, format!("Connection {} not found", id))
        })?;

        let mut descriptors = Vec::new();
        for item in requested.split(',').map(str::trim).filter(|item| !item.is_empty()) {
            match item.to_ascii_uppercase().as_str() {
                "C" => {
                    if let Some(call_id) = &info.call_id {
                        ctx.response.params.insert(Parameter::CallId, call_id.to_string());
                    }
                }
                "M" => {
                    ctx.response.params.insert(Parameter::Mode, info.mode.to_string());
                }
                "P" => {
                    ctx.response.params.insert(Parameter::ConnectionParameters, info.stats.to_string());
                }
                "LC" => descriptors.extend(info.local_sdp.clone()),
                "RC" => descriptors.extend(info.remote_sdp.clone()),
                other => {
                    return Err(CommandError::protocol(format!("Unsupported requested info '{}'", other)));
                }
            }
        }

        if !descriptors.is_empty() {
            ctx.response.sdp = Some(descriptors.join("\n"));
        }
        Ok(StepOutcome::Continue)
    }
}
