use std::time::{SystemTime, UNIX_EPOCH};

/// Current unix time, truncated to whole seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs()
}

/// Current unix time as the stringified form used in transaction headers.
pub fn unix_now_string() -> String {
    unix_now().to_string()
}
