//! Session Sampling

use std::collections::VecDeque;

use parking_lot::Mutex;
use rand::Rng;

use super::SampleDecision;
use crate::config::SampleRates;

/// Trait for session sampling strategies
pub trait SessionSampler: Send + Sync {
    /// Draw the decision for a newly created session
    fn decide(&self, rates: &SampleRates) -> SampleDecision;

    /// Get the strategy name
    fn name(&self) -> &'static str;
}

/// Independent random draws against each rate
pub struct RandomSampler;

impl SessionSampler for RandomSampler {
    fn decide(&self, rates: &SampleRates) -> SampleDecision {
        let mut rng = rand::thread_rng();
        decide_with(rates, rng.r#gen::<f64>(), rng.r#gen::<f64>())
    }

    fn name(&self) -> &'static str {
        "random"
    }
}

/// Decide from two uniform draws in `[0, 1)`.
///
/// A zero rate never samples, so both rates at zero always yields `None`.
pub fn decide_with(rates: &SampleRates, session_draw: f64, error_draw: f64) -> SampleDecision {
    if session_draw < rates.session_sample_rate {
        SampleDecision::Continuous
    } else if error_draw < rates.error_sample_rate {
        SampleDecision::Buffered
    } else {
        SampleDecision::None
    }
}

/// Predetermined decisions, consumed in order; the last one repeats
pub struct FixedSampler {
    decisions: Mutex<VecDeque<SampleDecision>>,
    last: Mutex<SampleDecision>,
}

impl FixedSampler {
    /// Always return `decision`
    pub fn always(decision: SampleDecision) -> Self {
        Self::sequence([decision])
    }

    /// Return `decisions` in order, then keep repeating the last one
    pub fn sequence(decisions: impl IntoIterator<Item = SampleDecision>) -> Self {
        let decisions: VecDeque<_> = decisions.into_iter().collect();
        let last = decisions.back().copied().unwrap_or(SampleDecision::None);
        Self {
            decisions: Mutex::new(decisions),
            last: Mutex::new(last),
        }
    }
}

impl SessionSampler for FixedSampler {
    fn decide(&self, _rates: &SampleRates) -> SampleDecision {
        match self.decisions.lock().pop_front() {
            Some(decision) => {
                *self.last.lock() = decision;
                decision
            }
            None => *self.last.lock(),
        }
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rates(session: f64, error: f64) -> SampleRates {
        SampleRates {
            session_sample_rate: session,
            error_sample_rate: error,
        }
    }

    #[test]
    fn test_zero_rates_never_sample() {
        let sampler = RandomSampler;
        for _ in 0..100 {
            assert_eq!(sampler.decide(&rates(0.0, 0.0)), SampleDecision::None);
        }
    }

    #[test]
    fn test_full_session_rate_wins() {
        let sampler = RandomSampler;
        for _ in 0..100 {
            assert_eq!(sampler.decide(&rates(1.0, 1.0)), SampleDecision::Continuous);
        }
    }

    #[test]
    fn test_error_rate_applies_after_session_miss() {
        assert_eq!(decide_with(&rates(0.5, 0.5), 0.7, 0.2), SampleDecision::Buffered);
        assert_eq!(decide_with(&rates(0.5, 0.5), 0.7, 0.9), SampleDecision::None);
        assert_eq!(decide_with(&rates(0.5, 0.0), 0.1, 0.0), SampleDecision::Continuous);
    }

    #[test]
    fn test_fixed_sequence_repeats_last() {
        let sampler = FixedSampler::sequence([SampleDecision::Buffered, SampleDecision::Continuous]);
        let r = rates(0.0, 0.0);
        assert_eq!(sampler.decide(&r), SampleDecision::Buffered);
        assert_eq!(sampler.decide(&r), SampleDecision::Continuous);
        assert_eq!(sampler.decide(&r), SampleDecision::Continuous);
        assert_eq!(sampler.name(), "fixed");
    }
}
