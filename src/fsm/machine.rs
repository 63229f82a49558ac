//! State machine bound to one table
//!
//! `transform` re-checks legality, then issues the conditional update.
//! Zero matched rows means another writer moved the state first; that is
//! surfaced as a persistence failure, never swallowed.

use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

use super::repository::{StateModel, StateRepository};
use super::{ActionTable, FsmAction, FsmState, TransitionRequest};
use crate::error::{PaymentError, Result, TransitionDenied};
use crate::store::{ColumnUpdate, Database, Filter, Session, TableSchema};

/// Run `f` inside one transaction: commit on `Ok`, roll back on `Err`.
///
/// The closure receives the transaction-scoped session; repositories rebound
/// to it (`with_session`) commit or roll back together.
pub async fn run_in_transaction<T, F, Fut>(database: &dyn Database, f: F) -> Result<T>
where
    F: FnOnce(Arc<dyn Session>) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let tx = database.begin().await?;
    match f(tx.session()).await {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "Rollback failed");
            } else {
                warn!(error = %e, code = e.code(), "Transaction rolled back");
            }
            Err(e)
        }
    }
}

pub struct StateMachine<S, A> {
    actions: Arc<ActionTable<S, A>>,
    repository: StateRepository<S>,
    database: Arc<dyn Database>,
    /// Bound to an explicit transaction session
    bound: bool,
}

impl<S, A> Clone for StateMachine<S, A> {
    fn clone(&self) -> Self {
        Self {
            actions: self.actions.clone(),
            repository: self.repository.clone(),
            database: self.database.clone(),
            bound: self.bound,
        }
    }
}

impl<S: FsmState, A: FsmAction> StateMachine<S, A> {
    /// Machine over `table` using autocommit sessions of `database`
    pub fn new(
        actions: Arc<ActionTable<S, A>>,
        table: Arc<TableSchema>,
        database: Arc<dyn Database>,
    ) -> Self {
        let repository = StateRepository::new(table, database.session());
        Self {
            actions,
            repository,
            database,
            bound: false,
        }
    }

    /// Same machine, bound to a transaction-scoped session
    pub fn with_session(&self, session: Arc<dyn Session>) -> Self {
        Self {
            actions: self.actions.clone(),
            repository: self.repository.with_session(session),
            database: self.database.clone(),
            bound: true,
        }
    }

    pub fn is_bound(&self) -> bool {
        self.bound
    }

    pub fn session(&self) -> Arc<dyn Session> {
        self.repository.session().clone()
    }

    pub fn table(&self) -> &TableSchema {
        self.repository.table()
    }

    pub fn actions(&self) -> &ActionTable<S, A> {
        &self.actions
    }

    pub fn can_perform(&self, current: S, action: A) -> bool {
        self.actions.can(current, action)
    }

    pub fn available_actions(&self, current: S) -> Vec<A> {
        self.actions.available(current)
    }

    /// Destination of `action` from `current`, or `StateTransitionDenied`
    pub fn check(&self, identity: &str, current: S, action: A) -> Result<S> {
        match self.actions.find(action) {
            Some(a) if a.src.contains(&current) => Ok(a.dst),
            _ => Err(PaymentError::StateTransitionDenied(Box::new(
                TransitionDenied {
                    entity: self.table().name.to_string(),
                    identity: identity.to_string(),
                    current_state: current.as_str().to_string(),
                    action: action.as_str().to_string(),
                    available_actions: self
                        .available_actions(current)
                        .iter()
                        .map(|a| a.as_str().to_string())
                        .collect(),
                },
            ))),
        }
    }

    /// Apply `action` to `identity`, expected to be in `current`.
    ///
    /// `updates` are written in the same statement as the new state.
    pub async fn transform(
        &self,
        action: A,
        current: S,
        identity: &str,
        updates: Vec<ColumnUpdate>,
    ) -> Result<()> {
        let entity = self.table().name;
        let dst = match self.check(identity, current, action) {
            Ok(dst) => dst,
            Err(e) => {
                warn!(entity, identity = %identity, action = %action, from = %current, "Transition denied");
                return Err(e);
            }
        };

        let req = TransitionRequest {
            action,
            identity: identity.to_string(),
            from: current,
            to: dst,
            updates,
        };
        let rows = self.repository.change_state(&req).await?;
        if rows == 0 {
            warn!(entity, identity = %identity, action = %action, from = %current, "Lost state update race");
            return Err(PaymentError::Persistence(format!(
                "{} {}: no row in state ({}) to {}",
                entity, identity, current, action
            )));
        }

        info!(entity, identity = %identity, action = %action, from = %current, to = %dst, "State transition applied");
        Ok(())
    }

    /// Load the current state, then `transform`. Returns the state it moved from.
    ///
    /// Two round trips; the conditional update re-validates the precondition.
    pub async fn transform_by_identity(
        &self,
        action: A,
        identity: &str,
        updates: Vec<ColumnUpdate>,
    ) -> Result<S> {
        let current = self
            .repository
            .get_state(identity)
            .await?
            .ok_or_else(|| PaymentError::NotFound {
                entity: self.table().name,
                identity: identity.to_string(),
            })?;
        self.transform(action, current, identity, updates).await?;
        Ok(current)
    }

    /// Hold `identity` in `current` for the rest of the bound transaction.
    ///
    /// Writers that decide from other rows of the same entity (an order's
    /// records) lock the parent first so their reads and writes serialize.
    pub async fn lock(&self, identity: &str, current: S) -> Result<()> {
        let rows = self.repository.hold_state(identity, current).await?;
        if rows == 0 {
            let entity = self.table().name;
            warn!(entity, identity = %identity, state = %current, "Lost lock race");
            return Err(PaymentError::Persistence(format!(
                "{} {}: no row in state ({}) to lock",
                entity, identity, current
            )));
        }
        Ok(())
    }

    pub async fn get_state(&self, identity: &str) -> Result<Option<S>> {
        self.repository.get_state(identity).await
    }

    pub async fn get_all(&self, filter: &Filter) -> Result<Vec<StateModel<S>>> {
        self.repository.get_all(filter).await
    }

    /// Run `f` with a transaction-bound machine.
    ///
    /// An already bound machine joins the enclosing transaction instead of
    /// opening a nested one.
    pub async fn run_in_transaction<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce(StateMachine<S, A>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if self.bound {
            return f(self.clone()).await;
        }
        run_in_transaction(self.database.as_ref(), |session| {
            f(self.with_session(session))
        })
        .await
    }
}
