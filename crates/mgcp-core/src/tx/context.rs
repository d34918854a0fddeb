use std::sync::Arc;
use std::sync::atomic::AtomicU32;

use crate::config::SignalSettings;
use crate::connection::ConnectionId;
use crate::endpoint::Endpoint;
use crate::message::{MgcpCommand, MgcpResponse, Parameter, ResponseCode};
use crate::naming::NamingTree;
use crate::provider::MgcpProvider;
use crate::scheduler::Scheduler;

use super::{CommandError, Transaction};

/// Collaborators shared by every action
pub struct ActionEnv {
    pub domain: String,
    pub naming: Arc<NamingTree<Endpoint>>,
    pub provider: Arc<dyn MgcpProvider>,
    pub control: Scheduler,
    pub signals: SignalSettings,
    /// Transaction ids for gateway-initiated NTFY
    pub notify_transactions: Arc<AtomicU32>,
}

impl ActionEnv {
    /// `name@domain`
    pub fn qualified(&self, name: &str) -> String {
        if self.domain.is_empty() {
            name.to_string()
        } else {
            format!("{}@{}", name, self.domain)
        }
    }
}

/// Per-invocation state carried through an action's chain
pub struct TxContext {
    pub transaction: Transaction,
    pub command: MgcpCommand,
    pub env: Arc<ActionEnv>,
    /// Endpoints the command resolved to; the first is the primary target
    pub endpoints: Vec<Arc<Endpoint>>,
    /// Connections created so far, undone by a rollback
    pub created: Vec<(Arc<Endpoint>, ConnectionId)>,
    pub response: MgcpResponse,
    pub last_error: Option<CommandError>,
}

impl TxContext {
    pub fn new(transaction: Transaction, command: MgcpCommand, env: Arc<ActionEnv>) -> Self {
        let response = MgcpResponse::new(ResponseCode::TransactionExecuted, command.transaction_id);
        Self {
            transaction,
            command,
            env,
            endpoints: Vec::new(),
            created: Vec::new(),
            response,
            last_error: None,
        }
    }

    pub fn endpoint(&self) -> Result<Arc<Endpoint>, CommandError> {
        self.endpoints
            .first()
            .cloned()
            .ok_or_else(|| CommandError::new(ResponseCode::EndpointUnknown, "No endpoint resolved"))
    }

    pub fn required(&self, parameter: Parameter) -> Result<&str, CommandError> {
        self.command
            .param(parameter)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| CommandError::missing(parameter.code()))
    }

    pub fn optional(&self, parameter: Parameter) -> Option<&str> {
        self.command.param(parameter).filter(|value| !value.is_empty())
    }
}
