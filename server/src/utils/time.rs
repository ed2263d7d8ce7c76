//! Time helpers

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_ms_is_recent() {
        // 2020-01-01 in ms; anything earlier means a broken clock source
        assert!(now_ms() > 1_577_836_800_000);
    }
}
