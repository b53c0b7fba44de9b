//! Traffic counter accumulation and quota evaluation.
//!
//! Counters are stored in GiB rounded to 4 decimal places. `total_*` is
//! the session total (since the control-plane's own counters last reset);
//! `cumu_*` holds everything folded in from prior resets. The fold is a
//! pure function so it can be retried without double-counting.

use warden_store::peer::round4;

pub const GIB: f64 = 1_073_741_824.0;

/// Convert a live byte counter to the GiB storage unit.
pub fn bytes_to_gib(bytes: u64) -> f64 {
    round4(bytes as f64 / GIB)
}

/// Session and cumulative counters for one peer, in GiB.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SessionCounters {
    pub total_receive: f64,
    pub total_sent: f64,
    pub cumu_receive: f64,
    pub cumu_sent: f64,
}

/// Fold live counters into the stored counters.
///
/// A live value below the stored session total means the control-plane
/// counters restarted (interface went down and up): the previous session
/// totals are folded into the cumulative counters before the live values
/// are taken over. Cumulative counters never decrease.
pub fn fold_counters(
    stored: &SessionCounters,
    live_receive_gib: f64,
    live_sent_gib: f64,
) -> SessionCounters {
    let reset = live_sent_gib < stored.total_sent || live_receive_gib < stored.total_receive;

    if reset {
        SessionCounters {
            total_receive: round4(live_receive_gib),
            total_sent: round4(live_sent_gib),
            cumu_receive: round4(stored.cumu_receive + stored.total_receive),
            cumu_sent: round4(stored.cumu_sent + stored.total_sent),
        }
    } else {
        SessionCounters {
            total_receive: round4(live_receive_gib),
            total_sent: round4(live_sent_gib),
            cumu_receive: round4(stored.cumu_receive),
            cumu_sent: round4(stored.cumu_sent),
        }
    }
}

/// Whether a peer remains eligible to stay attached.
///
/// The bandwidth cap is compared against the session sent total, not the
/// cumulative one: a counter reset opens a fresh quota window. This
/// mirrors the historical behavior and is locked in by test below.
pub fn evaluate_quota(
    ends_at: Option<i64>,
    bandwidth_bytes: i64,
    total_sent_gib: f64,
    now: i64,
) -> bool {
    let time_ok = ends_at.map_or(true, |t| now < t);
    let bandwidth_ok = bandwidth_bytes == 0 || bandwidth_bytes as f64 >= total_sent_gib * GIB;
    time_ok && bandwidth_ok
}
