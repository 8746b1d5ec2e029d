//! Per-device sliding window of RSSI samples.

use std::collections::VecDeque;

/// Default number of samples kept for the median.
pub const MAX_HISTORY: usize = 4;

/// Median returned for an empty window.
pub const EMPTY_MEDIAN: i32 = 0;

/// Bounded FIFO of the most recent RSSI samples for one device.
///
/// Samples are stored in arrival order; [`RssiHistory::median`] works on a
/// sorted copy and never reorders the window itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RssiHistory {
    samples: VecDeque<i32>,
    capacity: usize,
}

impl Default for RssiHistory {
    fn default() -> Self {
        Self::new(MAX_HISTORY)
    }
}

impl RssiHistory {
    /// Create an empty window holding at most `capacity` samples.
    ///
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Push a sample, evicting the oldest one if the window is full.
    pub fn append(&mut self, sample: i32) {
        self.samples.push_back(sample);
        if self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    /// Median of the current window.
    ///
    /// For an even number of samples this is the mean of the two middle
    /// values, truncated toward zero. An empty window yields [`EMPTY_MEDIAN`].
    pub fn median(&self) -> i32 {
        if self.samples.is_empty() {
            return EMPTY_MEDIAN;
        }

        let mut sorted: Vec<i32> = self.samples.iter().copied().collect();
        sorted.sort_unstable();

        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 1 {
            sorted[mid]
        } else {
            let sum = i64::from(sorted[mid - 1]) + i64::from(sorted[mid]);
            (sum / 2) as i32
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples in arrival order, oldest first.
    pub fn samples(&self) -> impl Iterator<Item = i32> + '_ {
        self.samples.iter().copied()
    }
}

/// Parse a `--history-size` value.
pub fn parse_window_size(src: &str) -> Result<usize, String> {
    let size: usize = src
        .trim()
        .parse()
        .map_err(|_| format!("invalid window size: {}", src))?;

    if size == 0 {
        return Err("window size must be at least 1".to_string());
    }

    Ok(size)
}
