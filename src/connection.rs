//! Per-connection client state. Database selection is engine-global
//! (`select` moves the one shared `current_index`), so there is no
//! per-client `db_index` or transaction/pub-sub bookkeeping to carry here;
//! an id is kept for logging.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
pub struct ClientState {
    pub id: u64,
}

impl ClientState {
    pub fn new() -> Self {
        ClientState {
            id: NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed),
        }
    }
}

impl Default for ClientState {
    fn default() -> Self {
        Self::new()
    }
}
