//! Generation of (reference time, lead time bucket) windows.

use crate::error::PipelineError;
use crate::models::{BoundaryPolicy, ExtractionConfig, Window};

use chrono::{DateTime, Duration, Utc};
use validator::Validate;

/// Produces the windows of an extraction, reference time major and lead time minor.
///
/// The sequence is lazy, finite and restartable: every call to [WindowGenerator::iter] starts
/// again from the first window.
#[derive(Clone, Debug)]
pub struct WindowGenerator {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    step: Duration,
    boundary: BoundaryPolicy,
    buckets: Vec<Duration>,
    tolerance: Duration,
}

impl WindowGenerator {
    /// Return a new WindowGenerator.
    ///
    /// # Arguments
    ///
    /// * `config`: Extraction configuration providing the step, buckets and boundary policy
    /// * `start`: First reference time
    /// * `end`: Last reference time, subject to the boundary policy
    pub fn new(
        config: &ExtractionConfig,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        if end < start {
            return Err(PipelineError::InvalidSpan { start, end });
        }
        let mut buckets = vec![];
        let mut bucket = config.lead_start;
        while bucket <= config.lead_end {
            buckets.push(bucket);
            bucket = bucket + config.lead_step;
        }
        Ok(WindowGenerator {
            start,
            end,
            step: config.step,
            boundary: config.boundary,
            buckets,
            tolerance: config.tolerance,
        })
    }

    /// Iterate over the reference times of the span.
    pub fn reference_times(&self) -> ReferenceTimes {
        ReferenceTimes {
            next: Some(self.start),
            end: self.end,
            step: self.step,
            boundary: self.boundary,
        }
    }

    /// The lead time buckets, ascending.
    pub fn lead_buckets(&self) -> &[Duration] {
        &self.buckets
    }

    /// Smallest lead time any window selects.
    pub fn lead_min(&self) -> Option<Duration> {
        self.buckets.first().map(|bucket| *bucket - self.tolerance)
    }

    /// Largest lead time any window selects.
    pub fn lead_max(&self) -> Option<Duration> {
        self.buckets.last().map(|bucket| *bucket + self.tolerance)
    }

    /// The windows at one reference time, in bucket order.
    pub fn windows_at(&self, reference_time: DateTime<Utc>) -> impl Iterator<Item = Window> + '_ {
        self.buckets
            .iter()
            .map(move |bucket| Window::new(reference_time, *bucket, self.tolerance))
    }

    /// All windows of the span.
    pub fn iter(&self) -> impl Iterator<Item = Window> + '_ {
        self.reference_times()
            .flat_map(move |reference_time| self.windows_at(reference_time))
    }

    /// Number of windows in the span.
    pub fn len(&self) -> usize {
        self.reference_times().count() * self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Iterator over the reference times of a span.
#[derive(Clone, Debug)]
pub struct ReferenceTimes {
    next: Option<DateTime<Utc>>,
    end: DateTime<Utc>,
    step: Duration,
    boundary: BoundaryPolicy,
}

impl Iterator for ReferenceTimes {
    type Item = DateTime<Utc>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        let emit = match self.boundary {
            BoundaryPolicy::Inclusive => current <= self.end,
            BoundaryPolicy::Exclusive => current < self.end,
            // One step past the end, but only if the previous time fell short of it.
            BoundaryPolicy::Overshoot => current <= self.end || current - self.step < self.end,
        };
        if !emit {
            self.next = None;
            return None;
        }
        self.next = current.checked_add_signed(self.step);
        Some(current)
    }
}
