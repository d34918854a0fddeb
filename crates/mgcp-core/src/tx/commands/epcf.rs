use tracing::debug;

use crate::config::Encoding;
use crate::message::Parameter;
use crate::scheduler::{ChainStep, StepOutcome};
use crate::tx::{CommandError, TxContext};

/// EPCF: pick the encoding law from `B: e:mu` or `B: e:A`
pub struct ConfigureEndpoint;

fn parse_bearer(value: &str) -> Result<Encoding, CommandError> {
    let law = value
        .split(',')
        .filter_map(|item| item.trim().strip_prefix("e:"))
        .next()
        .ok_or_else(|| CommandError::protocol(format!("No encoding in bearer information '{}'", value)))?;
    match law.trim() {
        "mu" => Ok(Encoding::Pcmu),
        "A" => Ok(Encoding::Pcma),
        other => Err(CommandError::protocol(format!("Unknown encoding law '{}'", other))),
    }
}

impl ChainStep<TxContext, CommandError> for ConfigureEndpoint {
    fn name(&self) -> &'static str {
        "configure-endpoint"
    }

    fn perform(&self, ctx: &mut TxContext) -> Result<StepOutcome, CommandError> {
        let encoding = parse_bearer(ctx.required(Parameter::BearerInformation)?)?;
        for endpoint in &ctx.endpoints {
            endpoint.configure(encoding);
            debug!(endpoint = endpoint.name(), ?encoding, "endpoint configured");
        }
        Ok(StepOutcome::Continue)
    }
}
