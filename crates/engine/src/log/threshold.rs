use crate::error::TooManyErrors;
use bulkload_types::ErrorBudget;
use std::sync::atomic::{AtomicU64, Ordering};

/// Running failure and item counters of a job, checked against its budget.
pub(crate) struct ErrorThreshold {
    budget: ErrorBudget,
    errors: AtomicU64,
    total_items: AtomicU64,
}

impl ErrorThreshold {
    pub fn new(budget: ErrorBudget) -> Self {
        Self {
            budget,
            errors: AtomicU64::new(0),
            total_items: AtomicU64::new(0),
        }
    }

    pub fn budget(&self) -> ErrorBudget {
        self.budget
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Acquire)
    }

    pub fn total_items(&self) -> u64 {
        self.total_items.load(Ordering::Acquire)
    }

    pub fn record_item(&self) {
        self.total_items.fetch_add(1, Ordering::AcqRel);
    }

    /// Counts `count` new failures and fails if the budget is now exceeded.
    pub fn record_errors(&self, count: u64) -> Result<(), TooManyErrors> {
        let errors = self.errors.fetch_add(count, Ordering::AcqRel) + count;
        let total_items = self.total_items();
        if self.exceeded(errors, total_items) {
            Err(TooManyErrors {
                budget: self.budget,
                errors,
                total_items,
            })
        } else {
            Ok(())
        }
    }

    fn exceeded(&self, errors: u64, total_items: u64) -> bool {
        match self.budget {
            ErrorBudget::Unlimited => false,
            ErrorBudget::Count { max } => errors > max,
            ErrorBudget::Ratio { ratio, min_sample } => {
                total_items > 0
                    && total_items >= min_sample
                    && errors as f64 / total_items as f64 > ratio
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::ErrorThreshold;
    use bulkload_types::ErrorBudget;

    #[test]
    fn count() {
        let threshold = ErrorThreshold::new(ErrorBudget::Count { max: 2 });
        assert!(threshold.record_errors(1).is_ok());
        assert!(threshold.record_errors(1).is_ok());
        let error = threshold.record_errors(1).unwrap_err();
        assert_eq!(error.errors, 3);
        assert_eq!(error.to_string(), "Too many errors, the maximum allowed is 2.");
    }

    #[test]
    fn zero_tolerates_nothing() {
        let threshold = ErrorThreshold::new(ErrorBudget::Count { max: 0 });
        assert!(threshold.record_errors(1).is_err());
    }

    #[test]
    fn ratio_waits_for_min_sample() {
        let threshold = ErrorThreshold::new(ErrorBudget::Ratio {
            ratio: 0.01,
            min_sample: 100,
        });
        for _ in 0..99 {
            threshold.record_item();
            assert!(threshold.record_errors(1).is_ok());
        }
        threshold.record_item();
        let error = threshold.record_errors(1).unwrap_err();
        assert_eq!((error.errors, error.total_items), (100, 100));
        assert_eq!(
            error.to_string(),
            "Too many errors, the maximum percentage allowed is 1.0%."
        );
    }

    #[test]
    fn ratio_below_limit() {
        let threshold = ErrorThreshold::new(ErrorBudget::Ratio {
            ratio: 0.01,
            min_sample: 100,
        });
        for _ in 0..302 {
            threshold.record_item();
        }
        assert!(threshold.record_errors(2).is_ok());
        assert_eq!(threshold.errors(), 2);
        assert_eq!(threshold.total_items(), 302);
    }

    #[test]
    fn unlimited() {
        let threshold = ErrorThreshold::new(ErrorBudget::Unlimited);
        assert!(threshold.record_errors(1_000_000).is_ok());
    }
}
