//! Flush predicates.

use super::record::Record;

/// Decides when buffered records should be sealed and uploaded.
///
/// The pipeline calls `hit` for every record, flushes when any policy's
/// `should_flush` is true, then calls `reset` on all of them.
pub trait FlushPolicy: Send {
    /// Observes a persisted record.
    fn hit(&mut self, record: &Record);
    /// Returns true once a flush is due.
    fn should_flush(&self) -> bool;
    /// Starts counting afresh after a flush.
    fn reset(&mut self);
}

/// Flushes once `size` persisted records have accumulated.
#[derive(Debug, Clone)]
pub struct SizeFlushPolicy {
    size: usize,
    count: usize,
}

impl SizeFlushPolicy {
    /// Flushes every `size` records.
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            size: size.max(1),
            count: 0,
        }
    }
}

impl FlushPolicy for SizeFlushPolicy {
    fn hit(&mut self, record: &Record) {
        if !record.is_manual_flush() {
            self.count += 1;
        }
    }

    fn should_flush(&self) -> bool {
        self.count >= self.size
    }

    fn reset(&mut self) {
        self.count = 0;
    }
}

/// Flushes when the manual-flush marker goes through the pipeline.
#[derive(Debug, Clone, Default)]
pub struct ManualFlushPolicy {
    requested: bool,
}

impl FlushPolicy for ManualFlushPolicy {
    fn hit(&mut self, record: &Record) {
        if record.is_manual_flush() {
            self.requested = true;
        }
    }

    fn should_flush(&self) -> bool {
        self.requested
    }

    fn reset(&mut self) {
        self.requested = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_policy() {
        let mut policy = SizeFlushPolicy::new(2);
        policy.hit(&Record::apply("a", "t", "x"));
        assert!(!policy.should_flush());
        policy.hit(&Record::manual_flush("x"));
        assert!(!policy.should_flush());
        policy.hit(&Record::apply("b", "t", "x"));
        assert!(policy.should_flush());
        policy.reset();
        assert!(!policy.should_flush());
    }

    #[test]
    fn test_manual_policy() {
        let mut policy = ManualFlushPolicy::default();
        policy.hit(&Record::apply("a", "t", "x"));
        assert!(!policy.should_flush());
        policy.hit(&Record::manual_flush("x"));
        assert!(policy.should_flush());
        policy.reset();
        assert!(!policy.should_flush());
    }
}
