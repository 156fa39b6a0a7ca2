//! Shared SQLite bootstrap helpers.
//!
//! Grounded on `SqliteJobStore::open` (Symbiont's `crates/runtime`): WAL
//! journal mode plus a generous busy timeout so concurrent callers queuing
//! up at the store boundary (spec §5, "Shared resources") don't spuriously
//! fail under load.

use std::path::Path;

use crate::error::{SubstrateError, SubstrateResult};

/// Minimum busy-wait timeout mandated by spec §6: "opened with a busy-wait
/// timeout of at least 30 seconds to tolerate contention under load."
pub const BUSY_TIMEOUT_MS: u32 = 30_000;

/// Open (creating parent directories and the file if needed) a SQLite
/// connection configured per spec §5/§6.
pub fn open_connection(path: &Path) -> SubstrateResult<rusqlite::Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SubstrateError::storage(format!(
                    "failed to create directory {}: {e}",
                    parent.display()
                )))?;
        }
    }

    let conn = rusqlite::Connection::open(path)?;
    configure(&conn)?;
    Ok(conn)
}

/// Open an in-memory connection (tests only).
pub fn open_in_memory() -> SubstrateResult<rusqlite::Connection> {
    let conn = rusqlite::Connection::open_in_memory()?;
    configure(&conn)?;
    Ok(conn)
}

fn configure(conn: &rusqlite::Connection) -> SubstrateResult<()> {
    conn.pragma_update(None, "journal_mode", "WAL").ok();
    conn.busy_timeout(std::time::Duration::from_millis(BUSY_TIMEOUT_MS as u64))?;
    Ok(())
}

/// Resolve `$HOME/<segments...>`, used for the default DB/data-dir paths
/// named in spec §6's Persistence layout table.
pub fn home_relative(segments: &[&str]) -> std::path::PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
    segments.iter().fold(home, |p, seg| p.join(seg))
}
