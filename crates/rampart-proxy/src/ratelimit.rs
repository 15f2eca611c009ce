//! Per address-block token buckets for new connections and logins.

use crate::config::QuotaSettings;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use mini_moka::sync::Cache;
use nonzero_ext::nonzero;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

/// A bounded cache of token buckets keyed on the client's /24 (IPv4) or
/// /48 (IPv6) block. Least recently used blocks are evicted first.
pub struct AddrQuota {
    quota: Quota,
    buckets: Cache<IpAddr, Arc<DefaultDirectRateLimiter>>,
}

impl AddrQuota {
    pub fn new(ops: f64, burst: u32, max_entries: u64) -> Self {
        let period = if ops > 0.0 {
            Duration::from_secs_f64(1.0 / ops)
        } else {
            Duration::from_secs(u32::MAX as u64)
        };
        let burst = NonZeroU32::new(burst).unwrap_or(nonzero!(1u32));
        let quota = Quota::with_period(period)
            .unwrap_or_else(|| Quota::per_second(nonzero!(1u32)))
            .allow_burst(burst);
        Self {
            quota,
            buckets: Cache::builder().max_capacity(max_entries.max(1)).build(),
        }
    }

    /// `None` when the quota is disabled.
    pub fn from_settings(settings: &QuotaSettings) -> Option<Self> {
        settings
            .enabled
            .then(|| Self::new(settings.ops, settings.burst, settings.max_entries))
    }

    /// Take one token for `addr`; true when the block has none left.
    pub fn blocked(&self, addr: IpAddr) -> bool {
        let key = block_of(addr);
        let limiter = match self.buckets.get(&key) {
            Some(limiter) => limiter,
            None => {
                let limiter = Arc::new(RateLimiter::direct(self.quota));
                self.buckets.insert(key, limiter.clone());
                limiter
            }
        };
        limiter.check().is_err()
    }
}

fn block_of(addr: IpAddr) -> IpAddr {
    match addr {
        IpAddr::V4(v4) => {
            let [a, b, c, _] = v4.octets();
            IpAddr::V4(Ipv4Addr::new(a, b, c, 0))
        }
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => block_of(IpAddr::V4(v4)),
            None => {
                let s = v6.segments();
                IpAddr::V6(Ipv6Addr::new(s[0], s[1], s[2], 0, 0, 0, 0, 0))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_then_blocked() {
        let quota = AddrQuota::new(0.001, 3, 100);
        let ip: IpAddr = "192.0.2.10".parse().unwrap();
        assert!(!quota.blocked(ip));
        assert!(!quota.blocked(ip));
        assert!(!quota.blocked(ip));
        assert!(quota.blocked(ip));
    }

    #[test]
    fn test_same_block_shares_bucket() {
        let quota = AddrQuota::new(0.001, 1, 100);
        assert!(!quota.blocked("192.0.2.10".parse().unwrap()));
        assert!(quota.blocked("192.0.2.77".parse().unwrap()));
        assert!(!quota.blocked("192.0.3.10".parse().unwrap()));
    }

    #[test]
    fn test_ipv6_blocks() {
        assert_eq!(
            block_of("2001:db8:abcd:12::1".parse().unwrap()),
            "2001:db8:abcd::".parse::<IpAddr>().unwrap()
        );
        assert_eq!(
            block_of("::ffff:10.1.2.3".parse().unwrap()),
            "10.1.2.0".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn test_disabled_quota() {
        let settings = QuotaSettings {
            enabled: false,
            ops: 1.0,
            burst: 1,
            max_entries: 10,
        };
        assert!(AddrQuota::from_settings(&settings).is_none());
    }

    #[test]
    fn test_zero_burst_allows_one() {
        let quota = AddrQuota::new(0.001, 0, 10);
        let ip: IpAddr = "198.51.100.1".parse().unwrap();
        assert!(!quota.blocked(ip));
        assert!(quota.blocked(ip));
    }
}
