use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An absolute deadline, used by the lock table's `expiry` field and by the
/// queue's `sentTime`/redelivery bookkeeping.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Copy, Clone, Serialize, Deserialize)]
pub struct Expiry {
    pub timestamp_millis: i64,
}

impl Expiry {
    pub fn now() -> Self {
        Expiry {
            timestamp_millis: Utc::now().timestamp_millis(),
        }
    }

    pub fn from_now(duration: std::time::Duration) -> Self {
        let millis = duration.as_millis() as i64;
        Expiry {
            timestamp_millis: Utc::now().timestamp_millis() + millis,
        }
    }

    pub fn from_millis(timestamp_millis: i64) -> Self {
        Expiry { timestamp_millis }
    }

    pub fn is_past(&self) -> bool {
        self.timestamp_millis < Utc::now().timestamp_millis()
    }

    pub fn duration_left_millis(&self) -> i64 {
        self.timestamp_millis - Utc::now().timestamp_millis()
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp_millis(self.timestamp_millis)
    }
}

/// Seconds since the Unix epoch, as a float, used for message timestamps,
/// `sent_time`, and message-id hashing. Carries sub-millisecond precision
/// (matching the original's `time.time()`) so two fast publishes to the
/// same topic don't hash to the same point in time.
pub fn now_seconds() -> f64 {
    let now = Utc::now();
    now.timestamp() as f64 + now.timestamp_subsec_nanos() as f64 / 1_000_000_000.0
}

pub fn seconds_since(timestamp_secs: f64) -> f64 {
    now_seconds() - timestamp_secs
}
