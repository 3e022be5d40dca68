//! Compact 40-bit little-endian timestamps.
//!
//! Five bytes keep the layout identical on every platform and survive the
//! 32-bit `time_t` rollover.

use chrono::{DateTime, Utc};

pub const TIME_LEN: usize = 5;
const MAX_SECONDS: u64 = (1 << (8 * TIME_LEN)) - 1;

/// Seconds since the Unix epoch, limited to 40 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct PwsTime(u64);

impl PwsTime {
    /// Negative times clamp to the epoch, overly large ones to the 40-bit maximum.
    pub fn from_unix(seconds: i64) -> Self {
        Self((seconds.max(0) as u64).min(MAX_SECONDS))
    }

    pub fn now() -> Self {
        Self::from_unix(Utc::now().timestamp())
    }

    pub fn unix(&self) -> i64 {
        self.0 as i64
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.unix(), 0)
    }

    pub fn encode(&self) -> [u8; TIME_LEN] {
        let mut out = [0u8; TIME_LEN];
        out.copy_from_slice(&self.0.to_le_bytes()[..TIME_LEN]);
        out
    }

    /// Accepts the 4-byte legacy width as well. Bytes past the fifth are
    /// ignored, so oversized values truncate silently.
    pub fn decode(data: &[u8]) -> Self {
        let mut buf = [0u8; 8];
        let n = data.len().min(TIME_LEN);
        buf[..n].copy_from_slice(&data[..n]);
        Self(u64::from_le_bytes(buf))
    }
}

impl From<DateTime<Utc>> for PwsTime {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::from_unix(dt.timestamp())
    }
}

impl std::fmt::Display for PwsTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S UTC")),
            None => write!(f, "{}", self.0),
        }
    }
}
