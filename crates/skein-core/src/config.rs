#[derive(Clone, Debug)]
pub struct MessengerConfig {
    /// When set, historical events are reprojected without user-visible side
    /// effects: no outbound acknowledges, no notifications, no unread bumps.
    pub replay: bool,
    /// Poll cadence of the per-group stream workers. Zero disables the
    /// background workers; streams are then drained via `Messenger::pump`.
    pub poll_interval_ms: u64,
}

impl Default for MessengerConfig {
    fn default() -> Self {
        Self {
            replay: false,
            poll_interval_ms: 50,
        }
    }
}
