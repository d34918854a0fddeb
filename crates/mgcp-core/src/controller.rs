//! Inbound command entry point

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::TransactionSettings;
use crate::message::{MgcpCommand, MgcpResponse, ResponseCode};
use crate::scheduler::TaskHandle;
use crate::tx::{ActionEnv, ActionSelector, TransactionManager, TxContext};

/// Opens a transaction for each command and starts the bound action
pub struct MgcpController {
    env: Arc<ActionEnv>,
    selector: ActionSelector,
    transactions: TransactionManager,
}

impl MgcpController {
    pub fn new(env: Arc<ActionEnv>, settings: TransactionSettings) -> Self {
        Self {
            selector: ActionSelector::new(Duration::from_millis(settings.chain_deadline_ms)),
            transactions: TransactionManager::new(env.provider.clone()),
            env,
        }
    }

    /// Handle one inbound command. The action runs on the control
    /// scheduler; its handle is returned. Commands with no bound action are
    /// answered with 504 immediately. A command whose transaction id is
    /// still in flight is a retransmission and is dropped.
    pub fn process(&self, command: MgcpCommand) -> Option<TaskHandle> {
        let Some(transaction) = self.transactions.begin(&command) else {
            warn!(transaction = command.transaction_id, verb = %command.verb, "transaction already in flight, dropping retransmission");
            return None;
        };

        match self.selector.select(&command) {
            Some(action) => {
                debug!(transaction = transaction.id(), verb = %command.verb, endpoint = %command.endpoint, "command received");
                let ctx = TxContext::new(transaction, command, self.env.clone());
                Some(action.start(&self.env.control, ctx))
            }
            None => {
                debug!(transaction = transaction.id(), verb = %command.verb, "no action bound");
                transaction.respond(MgcpResponse::new(ResponseCode::UnknownCommand, transaction.id()));
                None
            }
        }
    }

    /// Transactions still waiting for their response
    pub fn in_flight(&self) -> usize {
        self.transactions.in_flight()
    }
}
