//! Generic Finite State Machine
//!
//! A declarative action table gates every status mutation of a stored
//! entity. Legal transitions are persisted with a conditional update, so the
//! stored state is the only concurrency control:
//!
//! ```text
//! UPDATE <table> SET state = <dst>, <extra..>
//!  WHERE <identity> = ? AND state = <current>
//! ```
//!
//! # Idempotence
//!
//! Every action lists its own destination among its legal sources
//! (`close` is legal from `pending` AND from `closed`), so a replayed
//! external event is a no-op success instead of an error.

pub mod machine;
pub mod repository;

use std::fmt;

pub use machine::{StateMachine, run_in_transaction};
pub use repository::{StateModel, StateRepository};

use crate::store::ColumnUpdate;

/// A persisted state value
pub trait FsmState: Copy + Eq + fmt::Debug + fmt::Display + Send + Sync + 'static {
    /// Stored representation
    fn as_str(&self) -> &'static str;

    fn parse(s: &str) -> Option<Self>;
}

/// A named transition request
pub trait FsmAction: Copy + Eq + fmt::Debug + fmt::Display + Send + Sync + 'static {
    fn as_str(&self) -> &'static str;
}

/// One row of an action table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action<S, A> {
    pub name: A,
    pub src: Vec<S>,
    pub dst: S,
}

impl<S: FsmState, A: FsmAction> Action<S, A> {
    pub fn new(name: A, src: &[S], dst: S) -> Self {
        Self {
            name,
            src: src.to_vec(),
            dst,
        }
    }
}

/// Declarative action table: action name -> legal sources -> destination
#[derive(Debug, Clone)]
pub struct ActionTable<S, A> {
    actions: Vec<Action<S, A>>,
}

impl<S: FsmState, A: FsmAction> ActionTable<S, A> {
    pub fn new(actions: Vec<Action<S, A>>) -> Self {
        Self { actions }
    }

    pub fn actions(&self) -> &[Action<S, A>] {
        &self.actions
    }

    pub fn find(&self, action: A) -> Option<&Action<S, A>> {
        self.actions.iter().find(|a| a.name == action)
    }

    /// Pure predicate, never errors
    pub fn can(&self, current: S, action: A) -> bool {
        self.find(action).is_some_and(|a| a.src.contains(&current))
    }

    /// Actions legal from `current`, in table order
    pub fn available(&self, current: S) -> Vec<A> {
        self.actions
            .iter()
            .filter(|a| a.src.contains(&current))
            .map(|a| a.name)
            .collect()
    }

    /// Every destination is also a legal source of the same action
    pub fn is_idempotent(&self) -> bool {
        self.actions.iter().all(|a| a.src.contains(&a.dst))
    }
}

/// Typed transition value object handed to the state repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRequest<S, A> {
    pub action: A,
    pub identity: String,
    /// Expected persisted state, re-checked by the WHERE clause
    pub from: S,
    pub to: S,
    /// Extra columns written together with the state
    pub updates: Vec<ColumnUpdate>,
}

#[cfg(test)]
pub(crate) mod testing {
    //! A small light-switch machine shared by the fsm tests.

    use super::*;
    use crate::store::{ColumnSchema, ColumnType, TableSchema};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Lamp {
        Off,
        On,
        Broken,
    }

    impl fmt::Display for Lamp {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(FsmState::as_str(self))
        }
    }

    impl FsmState for Lamp {
        fn as_str(&self) -> &'static str {
            match self {
                Lamp::Off => "off",
                Lamp::On => "on",
                Lamp::Broken => "broken",
            }
        }

        fn parse(s: &str) -> Option<Self> {
            match s {
                "off" => Some(Lamp::Off),
                "on" => Some(Lamp::On),
                "broken" => Some(Lamp::Broken),
                _ => None,
            }
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Switch {
        TurnOn,
        TurnOff,
        Break,
    }

    impl fmt::Display for Switch {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(FsmAction::as_str(self))
        }
    }

    impl FsmAction for Switch {
        fn as_str(&self) -> &'static str {
            match self {
                Switch::TurnOn => "turn_on",
                Switch::TurnOff => "turn_off",
                Switch::Break => "break",
            }
        }
    }

    pub fn lamp_actions() -> ActionTable<Lamp, Switch> {
        ActionTable::new(vec![
            Action::new(Switch::TurnOn, &[Lamp::Off, Lamp::On], Lamp::On),
            Action::new(Switch::TurnOff, &[Lamp::On, Lamp::Off], Lamp::Off),
            Action::new(Switch::Break, &[Lamp::Off, Lamp::On, Lamp::Broken], Lamp::Broken),
        ])
    }

    pub fn lamp_table() -> TableSchema {
        TableSchema {
            name: "lamp",
            comment: "lamps",
            primary_key: "Fid",
            columns: vec![
                ColumnSchema::new("lampId", "Flamp_id", ColumnType::Text),
                ColumnSchema::new("state", "Fstate", ColumnType::Text),
                ColumnSchema::new("room", "Froom", ColumnType::Text),
                ColumnSchema::new("watts", "Fwatts", ColumnType::BigInt),
                ColumnSchema::new("switchedAt", "Fswitched_at", ColumnType::Timestamp),
            ],
            identity: "lampId",
            state: "state",
            indexes: vec!["room"],
            immutable: vec!["watts"],
        }
    }
}
