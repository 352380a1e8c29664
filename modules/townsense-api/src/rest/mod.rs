pub mod contact;
pub mod feedback;
pub mod images;
pub mod reports;

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

const RATE_WINDOW: Duration = Duration::from_secs(3600);

/// Check rate limit for an IP. Returns true if the request is allowed, false if rate-limited.
/// Prunes expired entries and records the new request if allowed.
pub fn check_rate_limit(entries: &mut Vec<Instant>, now: Instant, max_per_hour: usize) -> bool {
    let cutoff = now.checked_sub(RATE_WINDOW);
    entries.retain(|t| cutoff.map_or(true, |c| *t > c));
    if entries.len() >= max_per_hour {
        return false;
    }
    entries.push(now);
    true
}

/// Prune empty entries from the rate limiter map to prevent unbounded growth.
pub fn prune_empty_entries(limiter: &mut HashMap<IpAddr, Vec<Instant>>, now: Instant) {
    let cutoff = now.checked_sub(RATE_WINDOW);
    limiter.retain(|_, entries| {
        entries.retain(|t| cutoff.map_or(true, |c| *t > c));
        !entries.is_empty()
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_allows_exactly_at_limit() {
        let mut entries = Vec::new();
        let now = Instant::now();
        for _ in 0..10 {
            assert!(check_rate_limit(&mut entries, now, 10));
        }
        assert_eq!(entries.len(), 10);
    }

    #[test]
    fn rate_limit_rejects_over_limit() {
        let mut entries = Vec::new();
        let now = Instant::now();
        for _ in 0..10 {
            assert!(check_rate_limit(&mut entries, now, 10));
        }
        assert!(!check_rate_limit(&mut entries, now, 10));
        // Rejected requests are not recorded.
        assert_eq!(entries.len(), 10);
    }

    #[test]
    fn rate_limit_expires_old_entries() {
        let now = Instant::now() + Duration::from_secs(7200);
        let old = now - Duration::from_secs(3601);
        let mut entries = vec![old; 10];

        assert!(check_rate_limit(&mut entries, now, 10));
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn prune_drops_idle_ips() {
        let now = Instant::now() + Duration::from_secs(7200);
        let mut limiter = HashMap::new();
        limiter.insert(IpAddr::from([10, 0, 0, 1]), vec![now - Duration::from_secs(4000)]);
        limiter.insert(IpAddr::from([10, 0, 0, 2]), vec![now]);

        prune_empty_entries(&mut limiter, now);

        assert_eq!(limiter.len(), 1);
        assert!(limiter.contains_key(&IpAddr::from([10, 0, 0, 2])));
    }
}
