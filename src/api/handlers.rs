//! Route handlers and path grammars

use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{Path, State};
use tracing::debug;

use crate::api::state::AppState;
use crate::error::{LogError, LogResult};

/// POST /add: sequence one entry, respond with its assigned index
pub async fn add_entry(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<String, LogError> {
    let start = Instant::now();
    let result = state.pool.add(body.to_vec()).await;
    state.latency.record(start.elapsed());
    let index = result?;
    Ok(format!("{}\n", index))
}

/// GET /checkpoint: latest signed checkpoint bytes
pub async fn get_checkpoint(State(state): State<Arc<AppState>>) -> Result<Vec<u8>, LogError> {
    state.store.read_checkpoint()
}

/// GET /tile/{path}: tile in its textual wire form
pub async fn get_tile(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
) -> Result<Vec<u8>, LogError> {
    let (level, index, partial) = parse_tile_path(&path)?;
    debug!(level, index, partial, "serving tile");
    Ok(state.store.get_tile(level, index)?.to_text())
}

/// GET /seq/{path}: raw entry bundle bytes
pub async fn get_entry_bundle(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
) -> Result<Vec<u8>, LogError> {
    let index = parse_seq_path(&path)?;
    debug!(index, "serving entry bundle");
    state.store.get_entry_bundle(index)
}

/// Parse `level/aa/bb/cc/dd[.p]` where every component is hex and the
/// optional `.p` suffix on the last component names a partial tile size.
/// The four index components concatenate into one hex index.
pub fn parse_tile_path(path: &str) -> LogResult<(u64, u64, u64)> {
    let parts: Vec<&str> = path.split('/').collect();
    if parts.len() != 5 {
        return Err(LogError::InvalidArgument(format!(
            "malformed tile path: {:?}",
            path
        )));
    }
    let level = parse_hex(parts[0], "level")?;

    let mut last = parts[4];
    let mut partial = 0;
    if let Some((head, tail)) = last.split_once('.') {
        if tail.contains('.') {
            return Err(LogError::InvalidArgument(format!(
                "malformed tile path component: {:?}",
                parts[4]
            )));
        }
        partial = parse_hex(tail, "partial size")?;
        last = head;
    }

    let index_str = [parts[1], parts[2], parts[3], last].concat();
    let index = parse_hex(&index_str, "index")?;
    Ok((level, index, partial))
}

/// Parse `aa/bb/cc/dd/rest`: four two-character hex groups and a final
/// group, concatenated into one hex bundle index.
pub fn parse_seq_path(path: &str) -> LogResult<u64> {
    let parts: Vec<&str> = path.split('/').collect();
    if parts.len() != 5 || parts[..4].iter().any(|p| p.len() != 2) || parts[4].is_empty() {
        return Err(LogError::InvalidArgument(format!(
            "malformed seq path: {:?}",
            path
        )));
    }
    parse_hex(&parts.concat(), "index")
}

fn parse_hex(s: &str, what: &str) -> LogResult<u64> {
    u64::from_str_radix(s, 16)
        .map_err(|_| LogError::InvalidArgument(format!("malformed {}: {:?}", what, s)))
}
