use std::time::Duration;

use crate::DEFAULT_BUCKET_SIZE;

/// Default timeout for a single request/response round trip.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
/// Dht Configurations
pub struct Config {
    /// Maximum number of peers per k-bucket.
    ///
    /// Defaults to [DEFAULT_BUCKET_SIZE]
    pub bucket_size: usize,
    /// One routing table shard per entry, each admitting peers up to that latency.
    ///
    /// Requests pick a shard with their cluster level, out of range levels use the last one.
    ///
    /// Defaults to `[1s, 1s, 1h]`
    pub cluster_latencies: Vec<Duration>,
    /// How many closer peers a node returns when it can't answer a query itself.
    ///
    /// Defaults to `4`
    pub closer_peer_count: usize,
    /// How many peers a value or provider record is sent to, and how many
    /// peers seed an iterative lookup.
    ///
    /// Defaults to `10`
    pub k_value: usize,
    /// Number of requests an iterative lookup keeps in flight.
    ///
    /// Defaults to `3`
    pub alpha: usize,
    /// Peers learned more than this many hops away from the seeds are not queried.
    ///
    /// Defaults to `20`
    pub max_hops: usize,
    /// Request timeout duration.
    ///
    /// Defaults to [DEFAULT_REQUEST_TIMEOUT]
    pub request_timeout: Duration,
    /// How often to ping a few peers near a random id, `None` to disable.
    ///
    /// Defaults to `Some(10s)`
    pub ping_interval: Option<Duration>,
    /// Timeout of each liveness ping.
    ///
    /// Defaults to `5s`
    pub ping_timeout: Duration,
    /// How many peers each liveness round pings.
    ///
    /// Defaults to `5`
    pub ping_count: usize,
    /// How long a provider record stays valid.
    ///
    /// Defaults to `24h`
    pub provider_ttl: Duration,
    /// How often expired provider records are swept.
    ///
    /// Defaults to `1h`
    pub provider_cleanup_interval: Duration,
    /// Maximum number of keys with provider records, least recently used are dropped first.
    ///
    /// Defaults to `2000`
    pub max_provider_keys: usize,
    /// Maximum number of providers remembered per key.
    ///
    /// Defaults to `500`
    pub max_providers_per_key: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bucket_size: DEFAULT_BUCKET_SIZE,
            cluster_latencies: vec![
                Duration::from_secs(1),
                Duration::from_secs(1),
                Duration::from_secs(60 * 60),
            ],
            closer_peer_count: 4,
            k_value: 10,
            alpha: 3,
            max_hops: 20,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            ping_interval: Some(Duration::from_secs(10)),
            ping_timeout: Duration::from_secs(5),
            ping_count: 5,
            provider_ttl: Duration::from_secs(24 * 60 * 60),
            provider_cleanup_interval: Duration::from_secs(60 * 60),
            max_provider_keys: 2000,
            max_providers_per_key: 500,
        }
    }
}
