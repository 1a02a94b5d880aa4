//! Time utilities

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Items deleted before this instant are past their undo window
pub fn undo_cutoff(undo_window: Duration) -> DateTime<Utc> {
    let window = chrono::Duration::from_std(undo_window).unwrap_or(chrono::Duration::zero());
    Utc::now() - window
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cutoff_lies_in_the_past() {
        let cutoff = undo_cutoff(Duration::from_secs(30));
        let age = Utc::now() - cutoff;
        assert!(age >= chrono::Duration::seconds(30));
        assert!(age < chrono::Duration::seconds(31));
    }

    #[test]
    fn uptime_counts_from_init() {
        init_server_time();
        assert!(uptime_secs() < 5);
    }
}
