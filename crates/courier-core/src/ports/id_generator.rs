//! Job id 発行。
//!
//! Ids are ULIDs, so the `dlv-...` ids handed back by `enqueue_webhook`
//! sort by enqueue time. The millisecond part comes from the injected
//! `Clock`, the remaining 80 bits are random.

use ulid::Ulid;

use crate::domain::JobId;
use crate::ports::Clock;

pub trait IdGenerator: Send + Sync {
    fn next_job_id(&self) -> JobId;
}

pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn stamp(&self) -> u64 {
        // 1970 より前の時計は 0 に丸める
        u64::try_from(self.clock.now().timestamp_millis()).unwrap_or(0)
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn next_job_id(&self) -> JobId {
        JobId::from(Ulid::from_parts(self.stamp(), rand::random()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{Duration, TimeZone, Utc};
    use std::collections::HashSet;

    #[test]
    fn ids_do_not_collide() {
        let ids = UlidGenerator::new(SystemClock);
        let seen: HashSet<JobId> = (0..64).map(|_| ids.next_job_id()).collect();
        assert_eq!(seen.len(), 64);
    }

    #[test]
    fn id_carries_clock_time() {
        let at = Utc.with_ymd_and_hms(2025, 3, 14, 9, 30, 0).unwrap();
        let id = UlidGenerator::new(FixedClock::new(at)).next_job_id();
        assert_eq!(id.as_ulid().timestamp_ms(), at.timestamp_millis() as u64);
    }

    #[test]
    fn later_enqueue_sorts_after_earlier() {
        let at = Utc.with_ymd_and_hms(2025, 3, 14, 9, 30, 0).unwrap();
        let early = UlidGenerator::new(FixedClock::new(at)).next_job_id();
        let late = UlidGenerator::new(FixedClock::new(at + Duration::milliseconds(1))).next_job_id();
        assert!(early < late);
        assert!(early.to_string() < late.to_string());
    }

    #[test]
    fn pre_epoch_clock_does_not_panic() {
        let at = Utc.with_ymd_and_hms(1960, 1, 1, 0, 0, 0).unwrap();
        let id = UlidGenerator::new(FixedClock::new(at)).next_job_id();
        assert_eq!(id.as_ulid().timestamp_ms(), 0);
    }
}
