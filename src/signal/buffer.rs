use std::collections::VecDeque;

/// Fixed-capacity ring of samples.
///
/// `push` reports readiness exactly once per fill cycle: the push that makes
/// the buffer full returns `true`, later pushes evict the oldest sample and
/// return `false` until `clear` re-arms it.
#[derive(Debug, Clone)]
pub struct SignalBuffer {
    samples: VecDeque<f64>,
    capacity: usize,
    armed: bool,
}

impl SignalBuffer {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "signal buffer capacity must be non-zero");
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            armed: true,
        }
    }

    pub fn push(&mut self, sample: f64) -> bool {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);

        if self.armed && self.samples.len() == self.capacity {
            self.armed = false;
            return true;
        }
        false
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.armed = true;
    }

    /// Samples oldest first.
    pub fn snapshot(&self) -> Vec<f64> {
        self.samples.iter().copied().collect()
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

    pub fn fill_ratio(&self) -> f64 {
        self.samples.len() as f64 / self.capacity as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn n_minus_one_samples_never_ready() {
        let mut buffer = SignalBuffer::new(300);
        assert!((0..299).all(|i| !buffer.push(i as f64)));
        assert_eq!(buffer.len(), 299);
    }

    #[test]
    fn n_samples_ready_exactly_once() {
        let mut buffer = SignalBuffer::new(300);
        let ready = (0..300).filter(|&i| buffer.push(i as f64)).count();
        assert_eq!(ready, 1);
        assert_eq!(buffer.fill_ratio(), 1.0);

        // Overflowing does not fire again and never grows past capacity.
        assert!((0..500).all(|i| !buffer.push(i as f64)));
        assert_eq!(buffer.len(), 300);
        assert_eq!(buffer.snapshot()[0], 200.0);
    }

    #[test]
    fn clear_rearms_readiness() {
        let mut buffer = SignalBuffer::new(4);
        assert_eq!((0..4).filter(|_| buffer.push(1.0)).count(), 1);
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.fill_ratio(), 0.0);
        assert_eq!((0..4).filter(|_| buffer.push(1.0)).count(), 1);
    }
}
