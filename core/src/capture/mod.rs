//! Bus trace capture
//!
//! The monitor samples the bus in a tight loop and keeps only
//! transitions: a bounded buffer of [`DataSample`]s where adjacent
//! entries always differ in their raw word. The buffer renders to
//! three report formats (VCD, JSON, HTML); a JSON trace can be read
//! back to regenerate the other two offline.

pub mod html;
pub mod json;
pub mod vcd;

use crate::sample::DataSample;

/// Bounded, transition-only sample buffer
pub struct CaptureBuffer {
    samples: Vec<DataSample>,
    capacity: usize,
}

impl CaptureBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Rebuilds a buffer from previously captured samples (JSON import)
    pub fn from_samples(samples: Vec<DataSample>) -> Self {
        let capacity = samples.len();
        Self { samples, capacity }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// True when the capture loop should stop; keeps room for the
    /// terminal sample
    pub fn is_full(&self) -> bool {
        self.samples.len() + 2 >= self.capacity
    }

    /// Appends a sample unless it equals the previous one or the
    /// buffer is out of space. Returns whether the sample was kept.
    pub fn push(&mut self, sample: DataSample) -> bool {
        if self.samples.len() >= self.capacity {
            return false;
        }
        if self
            .samples
            .last()
            .is_some_and(|last| last.raw() == sample.raw())
        {
            return false;
        }
        self.samples.push(sample);
        true
    }

    /// Appends one final sample regardless of equality, so the last
    /// event has a bounded visible duration in the reports
    pub fn push_terminal(&mut self, sample: DataSample) {
        if self.samples.len() < self.capacity {
            self.samples.push(sample);
        }
    }

    pub fn samples(&self) -> &[DataSample] {
        &self.samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjacent_samples_always_differ() {
        let mut buf = CaptureBuffer::new(16);
        assert!(buf.push(DataSample::new(1, 0)));
        assert!(!buf.push(DataSample::new(1, 10)));
        assert!(buf.push(DataSample::new(2, 20)));
        assert!(!buf.push(DataSample::new(2, 30)));
        assert!(buf.push(DataSample::new(1, 40)));

        for pair in buf.samples().windows(2) {
            assert_ne!(pair[0].raw(), pair[1].raw());
        }
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn capacity_is_respected() {
        let mut buf = CaptureBuffer::new(4);
        for i in 0..10 {
            buf.push(DataSample::new(i, u64::from(i)));
        }
        assert_eq!(buf.len(), 4);
        assert!(buf.is_full());
    }

    #[test]
    fn terminal_duplicate_allowed() {
        let mut buf = CaptureBuffer::new(8);
        buf.push(DataSample::new(5, 0));
        buf.push_terminal(DataSample::new(5, 100));
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.samples()[1].timestamp(), 100);
    }

    #[test]
    fn full_leaves_terminal_room() {
        let mut buf = CaptureBuffer::new(4);
        buf.push(DataSample::new(1, 0));
        assert!(!buf.is_full());
        buf.push(DataSample::new(2, 1));
        assert!(buf.is_full());
        buf.push_terminal(DataSample::new(2, 2));
        assert_eq!(buf.len(), 3);
    }
}
