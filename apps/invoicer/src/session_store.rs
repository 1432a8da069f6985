use std::{fs, io::ErrorKind, path::Path};

use anyhow::Context;
use shared::domain::Session;

/// Reads a saved session. A missing file means signed out.
pub fn load_session(path: &Path) -> anyhow::Result<Option<Session>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read '{}'", path.display()))
        }
    };
    let session = serde_json::from_str(&raw)
        .with_context(|| format!("corrupt session file '{}'", path.display()))?;
    Ok(Some(session))
}

pub fn save_session(path: &Path, session: &Session) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| {
            format!("failed to create session directory '{}'", parent.display())
        })?;
    }
    let raw = serde_json::to_string_pretty(session)?;
    fs::write(path, raw).with_context(|| format!("failed to write '{}'", path.display()))
}

pub fn clear_session(path: &Path) -> anyhow::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("failed to remove '{}'", path.display())),
    }
}

#[cfg(test)]
#[path = "tests/session_store_tests.rs"]
mod tests;
