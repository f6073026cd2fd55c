// Once-per-interval gate over a continuously ticking feed

/// Gates an action against the minute bucket of observed tick timestamps:
/// the action fires at most once while the bucket is unchanged and re-arms
/// only after a timestamp whose bucket differs from the last fired one.
#[derive(Debug, Default)]
pub struct RedundancyGuard {
    last_fired: Option<String>,
}

impl RedundancyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Timestamps look like `2023-04-01 12:05:30`; the bucket is everything
    /// up to the minute.
    fn bucket(timestamp: &str) -> &str {
        match timestamp.rsplit_once(':') {
            Some((head, _)) => head,
            None => timestamp,
        }
    }

    /// True when the guarded action should run for this observation.
    pub fn should_fire(&mut self, timestamp: &str) -> bool {
        let bucket = Self::bucket(timestamp);
        if self.last_fired.as_deref() == Some(bucket) {
            return false;
        }
        self.last_fired = Some(bucket.to_string());
        true
    }
}
