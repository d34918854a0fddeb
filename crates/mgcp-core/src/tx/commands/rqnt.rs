use std::sync::Arc;

use tracing::debug;

use crate::message::Parameter;
use crate::notify::{EndpointNotifier, NotificationRequest};
use crate::scheduler::{ChainStep, StepOutcome};
use crate::signal::{SignalContext, create_signal, parse_signal_request};
use crate::tx::{CommandError, TxContext};

/// RQNT: store the notification request and start or stop the requested
/// signal
pub struct RequestNotification;

impl ChainStep<TxContext, CommandError> for RequestNotification {
    fn name(&self) -> &'static str {
        "request-notification"
    }

    fn perform(&self, ctx: &mut TxContext) -> Result<StepOutcome, CommandError> {
        let request = NotificationRequest::new(ctx.required(Parameter::RequestId)?)
            .with_notified_entity(ctx.optional(Parameter::NotifiedEntity).map(str::to_string))
            .with_requested_events(ctx.optional(Parameter::RequestedEvents).unwrap_or(""));
        let signal_request = parse_signal_request(ctx.optional(Parameter::SignalRequests).unwrap_or(""))?;
        let endpoint = ctx.endpoint()?;

        let Some(signal_request) = signal_request else {
            endpoint.set_notification_request(Some(request.clone()));
            endpoint.cancel_signal();
            debug!(endpoint = endpoint.name(), request = %request.request_id, "signals stopped");
            return Ok(StepOutcome::Continue);
        };

        let sink = EndpointNotifier::new(
            ctx.env.qualified(endpoint.name()),
            request.clone(),
            ctx.env.provider.clone(),
            ctx.env.notify_transactions.clone(),
        );
        let signal = create_signal(
            &signal_request,
            SignalContext {
                endpoint: endpoint.name().to_string(),
                media: endpoint.media_group(),
                scheduler: ctx.env.control.clone(),
                sink: Arc::new(sink),
                settings: ctx.env.signals,
            },
        )?;

        // Nothing on the endpoint changes until the signal is built
        endpoint.set_notification_request(Some(request));
        endpoint.set_signal(signal.clone());
        signal.execute()?;
        debug!(endpoint = endpoint.name(), signal = signal.name(), "signal started");
        Ok(StepOutcome::Continue)
    }
}
