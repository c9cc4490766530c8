//! Persisting level tables.
//!
//! A checkpoint is a pair of files sharing a prefix: a bincode dump that can be
//! loaded back for replay, and a text rendering meant for people. Writes are
//! plain synchronous file writes; a crash mid-write can leave a truncated file.

use std::{
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
};

use crate::{
    Action,
    q_table::{LevelTables, QTableError, argmax_first},
};

/// Prefix of the periodic training checkpoint.
pub const TARGET_PREFIX: &str = "target";
/// Prefix of the checkpoint written after an evaluation run.
pub const EVAL_PREFIX: &str = "eval";

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("Checkpoint I/O failed for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to encode tables: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("Failed to decode tables: {0}")]
    Decode(#[from] bincode::error::DecodeError),
    #[error("Loaded tables are inconsistent: {0}")]
    Shape(#[from] QTableError),
}

/// Files written by one checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointPaths {
    pub binary: PathBuf,
    pub text: PathBuf,
}

impl CheckpointPaths {
    pub fn new(dir: &Path, prefix: &str) -> Self {
        CheckpointPaths {
            binary: dir.join(format!("{prefix}_q_tables.bin")),
            text: dir.join(format!("{prefix}_q_tables.txt")),
        }
    }
}

/// Writes checkpoints into a directory.
#[derive(Debug, Clone)]
pub struct Checkpointer {
    dir: PathBuf,
    /// Grid width, used to lay out the text rendering.
    width: usize,
}

impl Checkpointer {
    pub fn new(dir: impl Into<PathBuf>, width: usize) -> Self {
        Checkpointer {
            dir: dir.into(),
            width: width.max(1),
        }
    }

    pub fn save(&self, prefix: &str, tables: &LevelTables) -> Result<CheckpointPaths, CheckpointError> {
        fs::create_dir_all(&self.dir).map_err(|source| io_error(&self.dir, source))?;
        let paths = CheckpointPaths::new(&self.dir, prefix);

        let bytes = bincode::serde::encode_to_vec(tables, bincode::config::standard())?;
        fs::write(&paths.binary, bytes).map_err(|source| io_error(&paths.binary, source))?;

        let text = render_text(tables, self.width);
        fs::write(&paths.text, text).map_err(|source| io_error(&paths.text, source))?;

        Ok(paths)
    }
}

/// Reads a binary table dump.
pub fn load_tables(path: impl AsRef<Path>) -> Result<LevelTables, CheckpointError> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|source| io_error(path, source))?;
    let (tables, _): (LevelTables, usize) =
        bincode::serde::decode_from_slice(&bytes, bincode::config::standard())?;
    tables.validate()?;
    Ok(tables)
}

fn io_error(path: &Path, source: std::io::Error) -> CheckpointError {
    CheckpointError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn arrow(action: Action) -> char {
    match action {
        Action::Up => '^',
        Action::Down => 'v',
        Action::Left => '<',
        Action::Right => '>',
    }
}

/// Renders every level as a greedy-policy grid followed by its raw values.
///
/// Unvisited states (all-zero rows) are shown as `.`.
pub fn render_text(tables: &LevelTables, width: usize) -> String {
    let width = width.max(1);
    let mut out = String::new();
    for (level, table) in tables.iter() {
        let _ = writeln!(out, "level {level} ({} states)", table.num_states());
        for chunk in table.rows().chunks(width) {
            let line: String = chunk
                .iter()
                .map(|row| {
                    if row.iter().all(|v| *v == 0.0) {
                        '.'
                    } else {
                        Action::from_index(argmax_first(row)).map_or('?', arrow)
                    }
                })
                .collect();
            let _ = writeln!(out, "  {line}");
        }
        for (state, row) in table.rows().iter().enumerate() {
            let _ = writeln!(
                out,
                "  {state:>5}: [{:>10.4}, {:>10.4}, {:>10.4}, {:>10.4}]",
                row[0], row[1], row[2], row[3]
            );
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::q_table::LevelKey;

    fn tables() -> LevelTables {
        let mut tables = LevelTables::new(6);
        tables.get_or_insert(&LevelKey::ground()).row_mut(1).unwrap()[3] = 2.5;
        tables
            .get_or_insert(&LevelKey::from_state(4))
            .row_mut(0)
            .unwrap()[0] = -0.75;
        tables
    }

    #[test]
    fn save_then_load_restores_tables() {
        let dir = tempfile::tempdir().unwrap();
        let checkpointer = Checkpointer::new(dir.path().join("ckpt"), 3);
        let paths = checkpointer.save(TARGET_PREFIX, &tables()).unwrap();
        assert!(paths.binary.ends_with("target_q_tables.bin"));
        assert!(paths.text.exists());

        let loaded = load_tables(&paths.binary).unwrap();
        assert_eq!(loaded, tables());
    }

    #[test]
    fn text_rendering_shows_policy_and_values() {
        let text = render_text(&tables(), 3);
        assert!(text.contains("level 4 (6 states)"));
        assert!(text.contains("level ground (6 states)"));
        assert!(text.contains("  .>.\n"));
        assert!(text.contains("2.5000"));
    }

    #[test]
    fn loading_missing_or_corrupt_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_tables(dir.path().join("missing.bin")),
            Err(CheckpointError::Io { .. })
        ));
        let corrupt = dir.path().join("corrupt.bin");
        fs::write(&corrupt, [0xff, 0xff, 0xff]).unwrap();
        assert!(load_tables(&corrupt).is_err());
    }
}
