use std::sync::Arc;

use tracing::{debug, warn};

use crate::scheduler::{ChainFailure, ChainListener, Scheduler, TaskChain, TaskHandle};

use super::{CommandError, TxContext};

pub type CommandChain = TaskChain<TxContext, CommandError>;

/// The reusable handler bound to one command verb
///
/// Holds no per-invocation state; everything a run needs travels in its
/// [`TxContext`].
pub struct Action {
    name: &'static str,
    chain: CommandChain,
    rollback: Option<CommandChain>,
}

impl Action {
    pub fn new(name: &'static str, chain: CommandChain) -> Self {
        Self { name, chain, rollback: None }
    }

    pub fn with_rollback(mut self, rollback: CommandChain) -> Self {
        self.rollback = Some(rollback);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn has_rollback(&self) -> bool {
        self.rollback.is_some()
    }

    /// Bind the transaction carried by `ctx` and run the primary chain
    pub fn start(self: &Arc<Self>, scheduler: &Scheduler, ctx: TxContext) -> TaskHandle {
        debug!(action = self.name, transaction = ctx.transaction.id(), "starting action");
        let listener = ActionListener { action: self.clone(), scheduler: scheduler.clone() };
        self.chain.start(scheduler, ctx, Box::new(listener))
    }

    fn rollback(&self, scheduler: &Scheduler, ctx: TxContext) {
        match &self.rollback {
            Some(chain) => {
                debug!(action = self.name, transaction = ctx.transaction.id(), "rolling back");
                chain.start(scheduler, ctx, Box::new(RollbackListener));
            }
            None => respond_with_error(ctx),
        }
    }
}

fn respond_with_error(ctx: TxContext) {
    let error = ctx
        .last_error
        .unwrap_or_else(|| CommandError::transient("Transaction failed"));
    ctx.transaction.respond(error.response(ctx.transaction.id()));
}

struct ActionListener {
    action: Arc<Action>,
    scheduler: Scheduler,
}

impl ChainListener<TxContext, CommandError> for ActionListener {
    fn on_complete(self: Box<Self>, ctx: TxContext) {
        ctx.transaction.respond(ctx.response);
    }

    fn on_exception(self: Box<Self>, mut ctx: TxContext, failure: ChainFailure<CommandError>) {
        let error = CommandError::from(failure);
        debug!(action = self.action.name, transaction = ctx.transaction.id(), %error, "action failed");
        ctx.last_error = Some(error);
        self.action.rollback(&self.scheduler, ctx);
    }
}

/// Finalizes a transaction after its rollback chain ran
struct RollbackListener;

impl ChainListener<TxContext, CommandError> for RollbackListener {
    fn on_complete(self: Box<Self>, ctx: TxContext) {
        respond_with_error(ctx);
    }

    fn on_exception(self: Box<Self>, ctx: TxContext, failure: ChainFailure<CommandError>) {
        warn!(transaction = ctx.transaction.id(), "Rollback failed: {}", failure);
        respond_with_error(ctx);
    }
}
