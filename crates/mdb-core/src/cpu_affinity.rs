//! CPU affinity for dedicated bridge threads.
//!
//! The executor pump drains native callbacks on a thread the application
//! controls; pinning that thread keeps callback latency stable. Wraps the
//! `core_affinity` crate.

use tracing::{info, warn};

/// Pin the calling thread to `core_id`.
///
/// Returns `false` when the core does not exist or the OS refuses.
pub fn pin_current_thread(core_id: usize) -> bool {
    let cores = core_affinity::get_core_ids().unwrap_or_default();
    let Some(core) = cores.get(core_id) else {
        warn!(
            "CPU core {core_id} not available ({} cores detected)",
            cores.len()
        );
        return false;
    };
    let pinned = core_affinity::set_for_current(*core);
    if pinned {
        info!("pinned thread to CPU core {core_id}");
    } else {
        warn!("OS rejected pinning to CPU core {core_id}");
    }
    pinned
}

/// Pin the calling thread when a core is configured; negative ids mean "unpinned".
pub fn pin_if_configured(core_id: Option<i32>) -> bool {
    match core_id {
        Some(id) if id >= 0 => pin_current_thread(id as usize),
        _ => false,
    }
}
