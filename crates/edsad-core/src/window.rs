use crate::stream::Observation;
use std::collections::VecDeque;

/// Fixed-capacity FIFO of the most recent observations.
///
/// Keeps a parallel buffer of raw values so scorers can borrow a contiguous
/// `&[f64]` without copying observation metadata.
#[derive(Debug, Clone)]
pub struct WindowBuffer {
    capacity: usize,
    observations: VecDeque<Observation>,
    values: VecDeque<f64>,
    appended: u64,
}

impl WindowBuffer {
    /// `capacity` is clamped to at least one slot.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            observations: VecDeque::with_capacity(capacity),
            values: VecDeque::with_capacity(capacity),
            appended: 0,
        }
    }

    /// Push to the back, evicting the oldest element once full.
    /// Returns the evicted observation, if any.
    pub fn append(&mut self, observation: Observation) -> Option<Observation> {
        self.appended += 1;
        self.values.push_back(observation.value);
        self.observations.push_back(observation);
        if self.observations.len() > self.capacity {
            self.values.pop_front();
            return self.observations.pop_front();
        }
        None
    }

    /// Ordered read-only view of the buffered observations.
    pub fn snapshot(&self) -> impl ExactSizeIterator<Item = &Observation> + '_ {
        self.observations.iter()
    }

    /// Contiguous view of the buffered values, oldest first.
    ///
    /// Takes `&mut self` because the ring may need to be rotated in place;
    /// the contents and their order are unchanged.
    pub fn values(&mut self) -> &[f64] {
        self.values.make_contiguous()
    }

    pub fn is_ready(&self) -> bool {
        self.observations.len() == self.capacity
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total appends since creation (diagnostics only).
    pub fn appended(&self) -> u64 {
        self.appended
    }

    pub fn latest(&self) -> Option<&Observation> {
        self.observations.back()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(index: u64, value: f64) -> Observation {
        Observation::new(index, value)
    }

    #[test]
    fn test_append_evicts_oldest_once_full() {
        let mut window = WindowBuffer::new(3);
        for i in 0..3 {
            assert!(window.append(obs(i, i as f64)).is_none());
        }
        assert!(window.is_ready());

        let evicted = window.append(obs(3, 3.0));
        assert_eq!(evicted, Some(obs(0, 0.0)));
        assert_eq!(window.len(), 3);
        assert_eq!(window.values(), &[1.0, 2.0, 3.0]);
        assert_eq!(window.appended(), 4);
    }

    #[test]
    fn test_not_ready_until_full() {
        let mut window = WindowBuffer::new(4);
        window.append(obs(0, 1.0));
        window.append(obs(1, 1.0));
        assert!(!window.is_ready());
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn test_snapshot_independent_of_prior_evictions() {
        let tail: Vec<Observation> = (100..105).map(|i| obs(i, i as f64 * 0.5)).collect();

        let mut fresh = WindowBuffer::new(5);
        for o in &tail {
            fresh.append(*o);
        }

        let mut churned = WindowBuffer::new(5);
        for i in 0..37 {
            churned.append(obs(i, -(i as f64)));
        }
        for o in &tail {
            churned.append(*o);
        }

        let a: Vec<_> = fresh.snapshot().copied().collect();
        let b: Vec<_> = churned.snapshot().copied().collect();
        assert_eq!(a, b);
        assert_eq!(fresh.values(), churned.values());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut window = WindowBuffer::new(0);
        window.append(obs(0, 7.0));
        assert!(window.is_ready());
        assert_eq!(window.latest(), Some(&obs(0, 7.0)));
    }
}
