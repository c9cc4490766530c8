use serde::{Deserialize, Serialize};

pub mod agent;
pub mod checkpoint;
pub mod config;
pub mod environment;
pub mod map;
pub mod protocol;
pub mod q_table;

/// Linear cell index (`x + y * size_x`). Doubles as the agent's state identifier.
pub type StateIndex = usize;

/// Represents a 2D coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub x: usize,
    pub y: usize,
}

impl Position {
    pub fn new(x: usize, y: usize) -> Self {
        Position { x, y }
    }
}

/// The four moves understood by the environment, in canonical order.
///
/// The discriminant is the column index used by Q-tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    Up = 0,
    Down = 1,
    Left = 2,
    Right = 3,
}

impl Action {
    pub const COUNT: usize = 4;
    pub const ALL: [Action; Action::COUNT] = [Action::Up, Action::Down, Action::Left, Action::Right];

    /// Unit move delta as `(dx, dy)`; y grows downwards.
    pub fn delta(self) -> (isize, isize) {
        match self {
            Action::Up => (0, -1),
            Action::Down => (0, 1),
            Action::Left => (-1, 0),
            Action::Right => (1, 0),
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Action> {
        Action::ALL.get(index).copied()
    }

    /// Wire token for this action.
    pub fn as_token(self) -> &'static str {
        match self {
            Action::Up => "UP",
            Action::Down => "DOWN",
            Action::Left => "LEFT",
            Action::Right => "RIGHT",
        }
    }

    /// Parses a wire token. Anything that is not exactly a direction yields `None`.
    pub fn from_token(token: &str) -> Option<Action> {
        match token.trim() {
            "UP" => Some(Action::Up),
            "DOWN" => Some(Action::Down),
            "LEFT" => Some(Action::Left),
            "RIGHT" => Some(Action::Right),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_parse_to_actions() {
        for action in Action::ALL {
            assert_eq!(Action::from_token(action.as_token()), Some(action));
        }
        assert_eq!(Action::from_token("RIGHT\n"), Some(Action::Right));
        assert_eq!(Action::from_token(" "), None);
        assert_eq!(Action::from_token("up"), None);
        assert_eq!(Action::from_token("KEY_UP"), None);
    }

    #[test]
    fn canonical_order_matches_indices() {
        for (i, action) in Action::ALL.iter().enumerate() {
            assert_eq!(action.index(), i);
            assert_eq!(Action::from_index(i), Some(*action));
        }
        assert_eq!(Action::from_index(4), None);
    }
}
