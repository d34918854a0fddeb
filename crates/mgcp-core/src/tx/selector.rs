use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::message::{MgcpCommand, Parameter, Verb};
use crate::scheduler::{ChainStep, Queue};

use super::action::{Action, CommandChain};
use super::commands::{
    AuditConnection, BuildResponse, ConfigureEndpoint, CreateConnection, DeleteConnection, DeleteCreated,
    LocateEndpoint, ModifyConnection, Notify, RequestNotification,
};
use super::{CommandError, TxContext};

type Step = Arc<dyn ChainStep<TxContext, CommandError>>;

/// locate endpoint -> perform -> build response
fn command_chain(name: &'static str, locate: LocateEndpoint, operation: Step, deadline: Duration) -> CommandChain {
    let steps: Vec<Step> = vec![Arc::new(locate), operation, Arc::new(BuildResponse)];
    CommandChain::new(name, Queue::Management, steps).with_deadline(deadline)
}

/// Immutable verb to action table, built once
pub struct ActionSelector {
    actions: HashMap<Verb, Arc<Action>>,
}

impl ActionSelector {
    pub fn new(deadline: Duration) -> Self {
        let mut actions = HashMap::new();
        actions.insert(
            Verb::CreateConnection,
            Action::new("crcx", command_chain("crcx", LocateEndpoint::single(), Arc::new(CreateConnection), deadline))
                .with_rollback(CommandChain::new(
                    "crcx-rollback",
                    Queue::Management,
                    vec![Arc::new(DeleteCreated) as Step],
                )),
        );
        actions.insert(
            Verb::ModifyConnection,
            Action::new("mdcx", command_chain("mdcx", LocateEndpoint::single(), Arc::new(ModifyConnection), deadline)),
        );
        actions.insert(
            Verb::DeleteConnection,
            Action::new("dlcx", command_chain("dlcx", LocateEndpoint::all(), Arc::new(DeleteConnection), deadline)),
        );
        actions.insert(
            Verb::NotificationRequest,
            Action::new("rqnt", command_chain("rqnt", LocateEndpoint::single(), Arc::new(RequestNotification), deadline)),
        );
        actions.insert(Verb::Notify, Action::new("ntfy", command_chain("ntfy", LocateEndpoint::all(), Arc::new(Notify), deadline)));
        actions.insert(
            Verb::EndpointConfiguration,
            Action::new("epcf", command_chain("epcf", LocateEndpoint::all(), Arc::new(ConfigureEndpoint), deadline)),
        );
        actions.insert(
            Verb::AuditConnection,
            Action::new("aucx", command_chain("aucx", LocateEndpoint::single(), Arc::new(AuditConnection), deadline)),
        );

        Self { actions: actions.into_iter().map(|(verb, action)| (verb, Arc::new(action))).collect() }
    }

    /// The action for `command`. A DLCX carrying a reason code is a
    /// gateway-side teardown notice and is handled as NTFY.
    pub fn select(&self, command: &MgcpCommand) -> Option<Arc<Action>> {
        let verb = match command.verb {
            Verb::DeleteConnection if command.has_param(Parameter::ReasonCode) => Verb::Notify,
            verb => verb,
        };
        self.actions.get(&verb).cloned()
    }
}
