use tracing::info;

use crate::message::Parameter;
use crate::scheduler::{ChainStep, StepOutcome};
use crate::tx::{CommandError, TxContext};

/// NTFY, and DLCX carrying a reason code: acknowledged without changing
/// any endpoint state
pub struct Notify;

impl ChainStep<TxContext, CommandError> for Notify {
    fn name(&self) -> &'static str {
        "notify"
    }

    fn perform(&self, ctx: &mut TxContext) -> Result<StepOutcome, CommandError> {
        info!(
            endpoint = %ctx.command.endpoint,
            verb = %ctx.command.verb,
            observed = ctx.optional(Parameter::ObservedEvents).unwrap_or(""),
            reason = ctx.optional(Parameter::ReasonCode).unwrap_or(""),
            "notification acknowledged"
        );
        Ok(StepOutcome::Continue)
    }
}
