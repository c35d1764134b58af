use std::collections::VecDeque;

/// Number of samples kept by [`Window::default`]
const DEFAULT_CAPACITY: usize = 100;

/// Fixed-size buffer of the most recent samples; pushing into a full window
/// evicts the oldest one.
#[derive(Debug, Clone)]
pub struct Window<T> {
    samples: VecDeque<T>,
    capacity: usize,
}

impl<T> Window<T> {
    /// Create an empty window holding at most `capacity` samples
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Record a sample
    pub fn push(&mut self, sample: T) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Samples, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.samples.iter()
    }

    /// The most recent sample
    #[must_use]
    pub fn last(&self) -> Option<&T> {
        self.samples.back()
    }
}

impl<T: Ord + Copy> Window<T> {
    /// Samples in ascending order
    #[must_use]
    pub fn sorted(&self) -> Vec<T> {
        let mut sorted: Vec<T> = self.samples.iter().copied().collect();
        sorted.sort_unstable();
        sorted
    }
}

impl<T> Default for Window<T> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
