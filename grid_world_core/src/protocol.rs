//! Wire format shared by the session server and the agent.
//!
//! Both directions are newline-delimited: a snapshot is one line of compact
//! JSON, a command is one line holding its token. Two snapshots sent back to
//! back (episode reset) therefore stay separable.

use serde::{Deserialize, Serialize};

use crate::{Action, StateIndex};

/// Token an agent sends to end its own session.
pub const QUIT_TOKEN: &str = "q";
/// Token for a deliberate no-op step.
pub const NOOP_TOKEN: &str = " ";

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed snapshot: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid size field '{0}', expected '<W>x<H>'")]
    BadSize(String),
    #[error("Snapshot has {actual} cells, size requires {expected}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("Character position {position} outside a grid of {cells} cells")]
    CharacterOutOfRange { position: StateIndex, cells: usize },
}

/// The world as sent downstream after every step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// `"<W>x<H>"`.
    pub size: String,
    /// Row-major cell glyphs, `W * H` entries.
    pub positions: Vec<String>,
    pub reward: f64,
    pub end: bool,
    pub current_character_position: StateIndex,
}

impl Snapshot {
    /// Parses the `size` field into `(width, height)`.
    pub fn dimensions(&self) -> Result<(usize, usize), ProtocolError> {
        let bad = || ProtocolError::BadSize(self.size.clone());
        let (w, h) = self.size.split_once('x').ok_or_else(bad)?;
        let width = w.trim().parse::<usize>().map_err(|_| bad())?;
        let height = h.trim().parse::<usize>().map_err(|_| bad())?;
        Ok((width, height))
    }

    pub fn num_states(&self) -> Result<usize, ProtocolError> {
        let (width, height) = self.dimensions()?;
        width
            .checked_mul(height)
            .ok_or_else(|| ProtocolError::BadSize(self.size.clone()))
    }

    /// Checks that the cell count and the character position agree with `size`.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        let cells = self.num_states()?;
        if self.positions.len() != cells {
            return Err(ProtocolError::LengthMismatch {
                expected: cells,
                actual: self.positions.len(),
            });
        }
        if self.current_character_position >= cells {
            return Err(ProtocolError::CharacterOutOfRange {
                position: self.current_character_position,
                cells,
            });
        }
        Ok(())
    }

    /// Encodes the snapshot as one newline-terminated line.
    pub fn to_line(&self) -> Result<String, ProtocolError> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    /// Decodes and validates one received line.
    pub fn from_line(line: &str) -> Result<Self, ProtocolError> {
        let snapshot: Snapshot = serde_json::from_str(line.trim_end())?;
        snapshot.validate()?;
        Ok(snapshot)
    }
}

/// An upstream command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Move(Action),
    Noop,
    Quit,
}

impl Command {
    /// Parses a received token. Anything unrecognized is a no-op.
    pub fn parse(token: &str) -> Command {
        let token = token.trim();
        if token == QUIT_TOKEN {
            return Command::Quit;
        }
        match Action::from_token(token) {
            Some(action) => Command::Move(action),
            None => Command::Noop,
        }
    }

    pub fn token(&self) -> &'static str {
        match self {
            Command::Move(action) => action.as_token(),
            Command::Noop => NOOP_TOKEN,
            Command::Quit => QUIT_TOKEN,
        }
    }

    pub fn to_line(&self) -> String {
        format!("{}\n", self.token())
    }
}

impl From<Option<Action>> for Command {
    fn from(action: Option<Action>) -> Self {
        action.map_or(Command::Noop, Command::Move)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> Snapshot {
        Snapshot {
            size: "3x2".to_string(),
            positions: vec![" ", "W", " ", "X", " ", " "]
                .into_iter()
                .map(String::from)
                .collect(),
            reward: -1.0,
            end: false,
            current_character_position: 1,
        }
    }

    #[test]
    fn snapshot_line_matches_wire_layout() {
        let line = snapshot().to_line().unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["size"], "3x2");
        assert_eq!(value["positions"].as_array().unwrap().len(), 6);
        assert_eq!(value["end"], false);
        assert_eq!(value["current_character_position"], 1);
        assert_eq!(Snapshot::from_line(&line).unwrap(), snapshot());
    }

    #[test]
    fn back_to_back_snapshots_stay_separable() {
        let mut ended = snapshot();
        ended.end = true;
        let stream = format!("{}{}", ended.to_line().unwrap(), snapshot().to_line().unwrap());
        let decoded: Vec<Snapshot> = stream
            .lines()
            .map(|line| Snapshot::from_line(line).unwrap())
            .collect();
        assert_eq!(decoded.len(), 2);
        assert!(decoded[0].end);
        assert!(!decoded[1].end);
    }

    #[test]
    fn rejects_inconsistent_snapshots() {
        let mut bad = snapshot();
        bad.positions.pop();
        assert!(matches!(
            bad.validate(),
            Err(ProtocolError::LengthMismatch {
                expected: 6,
                actual: 5
            })
        ));

        let mut bad = snapshot();
        bad.current_character_position = 6;
        assert!(matches!(
            bad.validate(),
            Err(ProtocolError::CharacterOutOfRange { .. })
        ));

        let mut bad = snapshot();
        bad.size = "3by2".to_string();
        assert!(matches!(bad.dimensions(), Err(ProtocolError::BadSize(_))));

        assert!(matches!(
            Snapshot::from_line("{\"size\": \"3x2\""),
            Err(ProtocolError::Json(_))
        ));
    }

    #[test]
    fn commands_parse_from_tokens() {
        assert_eq!(Command::parse("DOWN\n"), Command::Move(Action::Down));
        assert_eq!(Command::parse(" "), Command::Noop);
        assert_eq!(Command::parse(""), Command::Noop);
        assert_eq!(Command::parse("q"), Command::Quit);
        assert_eq!(Command::parse("sideways"), Command::Noop);
        assert_eq!(Command::from(None).to_line(), " \n");
        assert_eq!(Command::from(Some(Action::Left)).to_line(), "LEFT\n");
    }
}
