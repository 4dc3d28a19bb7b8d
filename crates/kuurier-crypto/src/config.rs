//! Enumerated configuration, threaded through `SessionManager` and
//! `ChannelSenderKeys` instead of scattering magic numbers across the
//! ratchet and sender-key engines.

/// Tunables for the Double Ratchet and Sender-Key engines. Construct once
/// per process (or per account) and share via `Arc<Config>`.
#[derive(Debug, Clone)]
pub struct Config {
    /// Per-receive skip cap: a single header claiming a skip larger than
    /// this fails with `TooManySkippedMessages`.
    pub max_skip: u32,
    /// Total skipped-key cache size across the session's lifetime.
    pub max_skipped: usize,
    /// Age after which a skipped key is evicted regardless of cache
    /// pressure.
    pub max_skipped_age_seconds: u64,
    /// Size of a freshly generated one-time pre-key batch.
    pub prekey_batch_size: u32,
    /// Refill threshold: when the local pool drops below this count, the
    /// caller should generate and publish a new batch.
    pub prekey_low_water: u32,
    /// Cadence for signed pre-key rotation.
    pub signed_prekey_rotation_days: u32,
    /// Maximum number of iterations retained in a sender's replay window.
    pub group_replay_window: usize,
    /// On overflow, the replay window is pruned to this many of the
    /// largest iteration values.
    pub group_replay_retain_on_overflow: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_skip: 1000,
            max_skipped: 2000,
            max_skipped_age_seconds: 86_400,
            prekey_batch_size: 100,
            prekey_low_water: 10,
            signed_prekey_rotation_days: 30,
            group_replay_window: 1000,
            group_replay_retain_on_overflow: 500,
        }
    }
}
