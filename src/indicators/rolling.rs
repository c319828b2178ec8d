use crate::models::Timestamped;
use std::collections::VecDeque;

/// Admission predicate: `(newest stored item, candidate) -> admit?`
pub type Admission<T> = Box<dyn Fn(Option<&T>, &T) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admit {
    /// New newest item. Oldest items were evicted if over capacity.
    Appended,
    /// Same timestamp as the newest item, which it replaced.
    Replaced,
    Rejected(RejectReason),
}

impl Admit {
    pub fn is_admitted(&self) -> bool {
        !matches!(self, Admit::Rejected(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Failed the window's admission predicate.
    Insignificant,
    /// Older than the newest stored item.
    OutOfOrder,
}

/// Bounded, time-ordered window with a pluggable admission rule.
///
/// Items are kept oldest-to-newest. Timestamps never go backwards: an older
/// item is rejected and an equal timestamp replaces the newest item. Once
/// over capacity the oldest items are dropped, O(1) amortized.
pub struct RollingWindow<T> {
    items: VecDeque<T>,
    capacity: usize,
    admission: Admission<T>,
}

impl<T: Timestamped + Clone> RollingWindow<T> {
    /// Window that admits every in-order item.
    pub fn new(capacity: usize) -> Self {
        Self::with_admission(capacity, Box::new(|_, _| true))
    }

    pub fn with_admission(capacity: usize, admission: Admission<T>) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity + 1),
            capacity,
            admission,
        }
    }

    pub fn push(&mut self, item: T) -> Admit {
        let newest = self.items.back();

        if let Some(last) = newest {
            if item.timestamp() < last.timestamp() {
                return Admit::Rejected(RejectReason::OutOfOrder);
            }
        }

        if !(self.admission)(newest, &item) {
            return Admit::Rejected(RejectReason::Insignificant);
        }

        if let Some(last) = self.items.back_mut() {
            if last.timestamp() == item.timestamp() {
                *last = item;
                return Admit::Replaced;
            }
        }

        self.items.push_back(item);
        while self.items.len() > self.capacity {
            self.items.pop_front();
        }

        Admit::Appended
    }

    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn oldest(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.items.iter()
    }

    /// The `n` newest items, oldest first.
    pub fn recent(&self, n: usize) -> Vec<T> {
        let skip = self.items.len().saturating_sub(n);
        self.items.iter().skip(skip).cloned().collect()
    }

    /// Project every item to a value, oldest first.
    pub fn values<F>(&self, f: F) -> Vec<f64>
    where
        F: Fn(&T) -> f64,
    {
        self.items.iter().map(f).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::trend::significant_change;
    use crate::models::OpenInterestSample;

    fn sample(ts: i64, value: f64) -> OpenInterestSample {
        OpenInterestSample {
            timestamp: ts,
            value,
        }
    }

    fn oi_window(capacity: usize) -> RollingWindow<OpenInterestSample> {
        RollingWindow::with_admission(
            capacity,
            Box::new(|last: Option<&OpenInterestSample>, new: &OpenInterestSample| {
                significant_change(new.value, last.map(|l| l.value), 0.00001)
            }),
        )
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut window = RollingWindow::new(50);
        for i in 0..51 {
            assert_eq!(window.push(sample(i, 100.0 + i as f64)), Admit::Appended);
        }

        assert_eq!(window.len(), 50);
        assert_eq!(window.oldest().unwrap().timestamp, 1);
        assert!(window.iter().all(|s| s.timestamp != 0));
        assert_eq!(window.latest().unwrap().timestamp, 50);
    }

    #[test]
    fn test_equal_timestamp_replaces() {
        let mut window = RollingWindow::new(5);
        window.push(sample(1, 10.0));
        assert_eq!(window.push(sample(1, 11.0)), Admit::Replaced);

        assert_eq!(window.len(), 1);
        assert_eq!(window.latest().unwrap().value, 11.0);
    }

    #[test]
    fn test_out_of_order_rejected() {
        let mut window = RollingWindow::new(5);
        window.push(sample(10, 10.0));
        assert_eq!(
            window.push(sample(9, 12.0)),
            Admit::Rejected(RejectReason::OutOfOrder)
        );
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn test_admission_predicate_gates_duplicates() {
        let mut window = oi_window(50);

        assert!(window.push(sample(1, 1000.0)).is_admitted());
        assert_eq!(
            window.push(sample(2, 1000.0)),
            Admit::Rejected(RejectReason::Insignificant)
        );
        assert_eq!(
            window.push(sample(3, 1000.001)),
            Admit::Rejected(RejectReason::Insignificant)
        );
        assert!(window.push(sample(4, 1000.5)).is_admitted());
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn test_every_admitted_sample_is_significant() {
        let mut window = oi_window(50);
        let inputs = [100.0, 100.0, 100.0005, 100.2, 100.2, 99.0, 99.0000001, 101.0];
        for (i, value) in inputs.iter().enumerate() {
            window.push(sample(i as i64, *value));
        }

        let values = window.values(|s| s.value);
        for pair in values.windows(2) {
            assert!(((pair[1] - pair[0]) / pair[0]).abs() > 0.00001);
        }
    }

    #[test]
    fn test_recent_returns_oldest_first() {
        let mut window = RollingWindow::new(10);
        for i in 0..6 {
            window.push(sample(i, i as f64));
        }

        let recent = window.recent(3);
        assert_eq!(
            recent.iter().map(|s| s.timestamp).collect::<Vec<_>>(),
            vec![3, 4, 5]
        );
        assert_eq!(window.recent(100).len(), 6);
    }
}
