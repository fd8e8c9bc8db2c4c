use core::time::Duration;

/// Seconds between 1601-01-01 and 1970-01-01
const EPOCH_DIFFERENCE_SECS: u64 = 11_644_473_600;

const TICKS_PER_SEC: u64 = 10_000_000;
const NANOS_PER_TICK: u64 = 100;

/// 100-nanosecond intervals, either since 1601-01-01 UTC (timestamps) or
/// as a plain amount (CPU times)
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Default)]
pub struct FileTime(u64);

impl FileTime {
    pub const ZERO: FileTime = FileTime(0);

    pub const fn from_ticks(ticks: u64) -> Self {
        FileTime(ticks)
    }

    pub const fn ticks(&self) -> u64 {
        self.0
    }

    /// Build a timestamp from a time elapsed since the Unix epoch
    pub const fn from_unix(since_epoch: Duration) -> Self {
        Self::from_duration(since_epoch).add(FileTime(EPOCH_DIFFERENCE_SECS * TICKS_PER_SEC))
    }

    /// Build an amount of time
    pub const fn from_duration(duration: Duration) -> Self {
        FileTime(duration.as_secs() * TICKS_PER_SEC + duration.subsec_nanos() as u64 / NANOS_PER_TICK)
    }

    pub const fn as_duration(&self) -> Duration {
        Duration::new(
            self.0 / TICKS_PER_SEC,
            ((self.0 % TICKS_PER_SEC) * NANOS_PER_TICK) as u32,
        )
    }

    /// Split into the (low, high) DWORD pair of the Win32 structure
    pub const fn to_parts(&self) -> (u32, u32) {
        (self.0 as u32, (self.0 >> 32) as u32)
    }

    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    const fn add(self, other: FileTime) -> FileTime {
        FileTime(self.0 + other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_epoch() {
        let epoch = FileTime::from_unix(Duration::ZERO);
        assert_eq!(epoch.ticks(), 116_444_736_000_000_000);
    }

    #[test]
    fn durations_keep_sub_second_precision() {
        let time = FileTime::from_duration(Duration::new(2, 500_000_300));

        assert_eq!(time.ticks(), 25_000_003);
        assert_eq!(time.as_duration(), Duration::new(2, 500_000_300));
    }
}
