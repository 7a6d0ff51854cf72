//! Point-in-time pool statistics.

use serde::Serialize;

/// Snapshot of pool occupancy for logging and health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Configured creation limit.
    pub limit: usize,
    /// Handlers that can still be created.
    pub budget: usize,
    /// Handlers created so far. Never decreases.
    pub created: usize,
    /// Handlers currently holding a request.
    pub busy: usize,
    /// Created handlers waiting for work.
    pub idle: usize,
    /// Requests waiting for a handler.
    pub queued: usize,
}

impl PoolStats {
    /// True when a new request would have to wait: nothing idle and no budget left.
    pub fn is_saturated(&self) -> bool {
        self.idle == 0 && self.budget == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(created: usize, busy: usize, queued: usize) -> PoolStats {
        PoolStats {
            limit: 3,
            budget: 3 - created,
            created,
            busy,
            idle: created - busy,
            queued,
        }
    }

    #[test]
    fn fresh_pool_is_not_saturated() {
        let s = stats(0, 0, 0);
        assert_eq!(s.budget, 3);
        assert!(!s.is_saturated());
    }

    #[test]
    fn all_created_and_busy_is_saturated() {
        assert!(stats(3, 3, 1).is_saturated());
        assert!(!stats(3, 2, 0).is_saturated());
    }

    #[test]
    fn zero_limit_is_always_saturated() {
        let s = PoolStats {
            limit: 0,
            budget: 0,
            created: 0,
            busy: 0,
            idle: 0,
            queued: 2,
        };
        assert!(s.is_saturated());
    }

    #[test]
    fn serializes_all_counters() {
        insta::assert_json_snapshot!(stats(3, 2, 4), @r#"
        {
          "limit": 3,
          "budget": 0,
          "created": 3,
          "busy": 2,
          "idle": 1,
          "queued": 4
        }
        "#);
    }
}
