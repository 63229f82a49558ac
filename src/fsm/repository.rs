//! State Repository adapter
//!
//! Maps an entity's identity and state columns onto the generic
//! [`Session`] calls the state machine needs.

use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

use super::{FsmAction, FsmState, TransitionRequest};
use crate::error::{PaymentError, Result};
use crate::store::{ColumnUpdate, Filter, Row, Session, StoreError, TableSchema};

/// Identity + state pair of one stored entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateModel<S> {
    pub identity: String,
    pub state: S,
}

pub struct StateRepository<S> {
    table: Arc<TableSchema>,
    session: Arc<dyn Session>,
    _state: PhantomData<fn() -> S>,
}

impl<S> Clone for StateRepository<S> {
    fn clone(&self) -> Self {
        Self {
            table: self.table.clone(),
            session: self.session.clone(),
            _state: PhantomData,
        }
    }
}

impl<S: FsmState> StateRepository<S> {
    pub fn new(table: Arc<TableSchema>, session: Arc<dyn Session>) -> Self {
        Self {
            table,
            session,
            _state: PhantomData,
        }
    }

    /// Same table, rebound to another session (e.g. an open transaction)
    pub fn with_session(&self, session: Arc<dyn Session>) -> Self {
        Self {
            table: self.table.clone(),
            session,
            _state: PhantomData,
        }
    }

    pub fn table(&self) -> &TableSchema {
        &self.table
    }

    pub fn session(&self) -> &Arc<dyn Session> {
        &self.session
    }

    fn parse_state(&self, row: &Row) -> std::result::Result<StateModel<S>, StoreError> {
        let corrupt = |detail: String| StoreError::Corrupt {
            table: self.table.name.to_string(),
            detail,
        };
        let identity = row
            .text(self.table.identity)
            .ok_or_else(|| corrupt(format!("missing identity '{}'", self.table.identity)))?;
        let raw = row
            .text(self.table.state)
            .ok_or_else(|| corrupt(format!("missing state of {}", identity)))?;
        let state =
            S::parse(raw).ok_or_else(|| corrupt(format!("unknown state '{}' of {}", raw, identity)))?;
        Ok(StateModel {
            identity: identity.to_string(),
            state,
        })
    }

    /// Current state by identity; `None` when no row exists
    pub async fn get_state(&self, identity: &str) -> Result<Option<S>> {
        let filter = Filter::new().eq(self.table.identity, identity);
        let row = self.session.select_first(&self.table, &filter).await?;
        debug!(table = self.table.name, identity = %identity, found = row.is_some(), "Loaded state");
        match row {
            Some(row) => Ok(Some(self.parse_state(&row)?.state)),
            None => Ok(None),
        }
    }

    /// Identity + state of every row matching `filter`
    pub async fn get_all(&self, filter: &Filter) -> Result<Vec<StateModel<S>>> {
        if filter.is_empty() {
            return Err(PaymentError::validation(format!(
                "refusing to load every row of {} without a filter",
                self.table.name
            )));
        }
        let rows = self.session.select(&self.table, filter).await?;
        let models = rows
            .iter()
            .map(|row| self.parse_state(row))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(models)
    }

    /// Conditional update; returns the number of matched rows
    pub async fn change_state<A: FsmAction>(&self, req: &TransitionRequest<S, A>) -> Result<u64> {
        if let Some(u) = req.updates.iter().find(|u| {
            u.field == self.table.identity
                || u.field == self.table.state
                || self.table.immutable.contains(&u.field)
        }) {
            return Err(PaymentError::validation(format!(
                "extra update may not set '{}' of {}",
                u.field, self.table.name
            )));
        }

        let mut updates = Vec::with_capacity(req.updates.len() + 1);
        updates.push(ColumnUpdate::new(self.table.state, req.to.as_str()));
        updates.extend(req.updates.iter().cloned());

        let filter = Filter::new()
            .eq(self.table.identity, req.identity.as_str())
            .eq(self.table.state, req.from.as_str());

        Ok(self.session.update(&self.table, &updates, &filter).await?)
    }

    /// Same-state conditional update. Inside a transaction it holds the row
    /// until commit; returns the number of matched rows.
    pub async fn hold_state(&self, identity: &str, state: S) -> Result<u64> {
        let updates = [ColumnUpdate::new(self.table.state, state.as_str())];
        let filter = Filter::new()
            .eq(self.table.identity, identity)
            .eq(self.table.state, state.as_str());
        Ok(self.session.update(&self.table, &updates, &filter).await?)
    }
}
