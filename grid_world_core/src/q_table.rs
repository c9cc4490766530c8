//! Level-scoped tabular action values.

use std::{collections::BTreeMap, fmt};

use rand::{Rng, seq::IndexedRandom};
use serde::{Deserialize, Serialize};

use crate::{Action, StateIndex};

/// Values of the four actions in one state, in canonical action order.
pub type ActionValues = [f64; Action::COUNT];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QTableError {
    #[error("State {state} is outside a table of {num_states} states")]
    StateOutOfRange { state: StateIndex, num_states: usize },
    #[error("Table for level '{level}' has {actual} rows, expected {expected}")]
    ShapeMismatch {
        level: LevelKey,
        expected: usize,
        actual: usize,
    },
}

/// Identifies a Q-table partition.
///
/// Every episode starts on the ground level; a positive reward moves the agent
/// to the level named after the state where it was earned.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LevelKey(String);

impl LevelKey {
    pub const GROUND: &'static str = "ground";

    pub fn ground() -> Self {
        LevelKey(Self::GROUND.to_string())
    }

    pub fn from_state(state: StateIndex) -> Self {
        LevelKey(state.to_string())
    }

    pub fn is_ground(&self) -> bool {
        self.0 == Self::GROUND
    }
}

impl fmt::Display for LevelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A dense `[num_states][4]` value table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QTable {
    rows: Vec<ActionValues>,
}

impl QTable {
    pub fn zeros(num_states: usize) -> Self {
        QTable {
            rows: vec![[0.0; Action::COUNT]; num_states],
        }
    }

    pub fn num_states(&self) -> usize {
        self.rows.len()
    }

    pub fn row(&self, state: StateIndex) -> Result<&ActionValues, QTableError> {
        self.rows.get(state).ok_or(QTableError::StateOutOfRange {
            state,
            num_states: self.rows.len(),
        })
    }

    pub fn row_mut(&mut self, state: StateIndex) -> Result<&mut ActionValues, QTableError> {
        let num_states = self.rows.len();
        self.rows
            .get_mut(state)
            .ok_or(QTableError::StateOutOfRange { state, num_states })
    }

    pub fn rows(&self) -> &[ActionValues] {
        &self.rows
    }
}

/// All level tables of one agent, created lazily and never reinitialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelTables {
    num_states: usize,
    tables: BTreeMap<LevelKey, QTable>,
}

impl LevelTables {
    /// Creates the set with an all-zero ground table.
    pub fn new(num_states: usize) -> Self {
        let mut tables = LevelTables {
            num_states,
            tables: BTreeMap::new(),
        };
        tables.get_or_insert(&LevelKey::ground());
        tables
    }

    pub fn num_states(&self) -> usize {
        self.num_states
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn contains(&self, level: &LevelKey) -> bool {
        self.tables.contains_key(level)
    }

    pub fn get(&self, level: &LevelKey) -> Option<&QTable> {
        self.tables.get(level)
    }

    /// Returns the level's table, inserting a zero table if it does not exist yet.
    pub fn get_or_insert(&mut self, level: &LevelKey) -> &mut QTable {
        let num_states = self.num_states;
        self.tables
            .entry(level.clone())
            .or_insert_with(|| QTable::zeros(num_states))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LevelKey, &QTable)> {
        self.tables.iter()
    }

    /// Checks that every table has `num_states` rows.
    pub fn validate(&self) -> Result<(), QTableError> {
        for (level, table) in &self.tables {
            if table.num_states() != self.num_states {
                return Err(QTableError::ShapeMismatch {
                    level: level.clone(),
                    expected: self.num_states,
                    actual: table.num_states(),
                });
            }
        }
        Ok(())
    }
}

pub fn max_value(row: &ActionValues) -> f64 {
    row.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

/// First action index reaching the row maximum.
pub fn argmax_first(row: &ActionValues) -> usize {
    let best = max_value(row);
    row.iter().position(|v| *v == best).unwrap_or(0)
}

/// An action index reaching the row maximum, chosen uniformly among ties.
pub fn argmax_random<R: Rng + ?Sized>(row: &ActionValues, rng: &mut R) -> usize {
    let best = max_value(row);
    let ties: Vec<usize> = (0..row.len()).filter(|i| row[*i] == best).collect();
    ties.choose(rng).copied().unwrap_or(0)
}
