//! Batch counters and the impact estimate printed after a run.

use std::time::Duration;

use serde::Serialize;

use contactscout_shared::{ImpactConfig, MatchStatus, RetrievalResult};

/// Per-status counts for one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    pub total: usize,
    pub found: usize,
    /// Found with an address only.
    pub partial: usize,
    pub not_found: usize,
    pub invalid: usize,
    pub cancelled: usize,
    pub failed: usize,
}

impl BatchStats {
    pub fn record_result(&mut self, result: &RetrievalResult) {
        match result.status() {
            MatchStatus::Found if result.is_partial() => self.partial += 1,
            MatchStatus::Found => self.found += 1,
            MatchStatus::NotFound => self.not_found += 1,
        }
    }

    /// Records that reached a terminal state; cancelled ones are excluded.
    pub fn processed(&self) -> usize {
        self.found + self.partial + self.not_found + self.failed + self.invalid
    }

    /// Share of processed records with a full contact, as a percentage.
    pub fn success_rate(&self) -> f64 {
        match self.processed() {
            0 => 0.0,
            n => self.found as f64 / n as f64 * 100.0,
        }
    }
}

/// Manual effort the batch replaced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ImpactMetrics {
    pub hours_saved: f64,
    pub dollars_saved: f64,
}

impl ImpactMetrics {
    pub fn from_stats(stats: &BatchStats, impact: &ImpactConfig) -> Self {
        let hours_saved =
            stats.processed() as f64 * f64::from(impact.manual_minutes_per_record) / 60.0;
        Self {
            hours_saved,
            dollars_saved: hours_saved * f64::from(impact.hourly_rate_usd),
        }
    }
}

/// One record that ended without a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordFailure {
    pub record_id: String,
    pub reason: String,
}

/// Everything the scheduler knows once a batch ends.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub stats: BatchStats,
    pub failures: Vec<RecordFailure>,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
}

impl BatchReport {
    pub fn impact(&self, impact: &ImpactConfig) -> ImpactMetrics {
        ImpactMetrics::from_stats(&self.stats, impact)
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats() -> BatchStats {
        BatchStats {
            total: 12,
            found: 6,
            partial: 1,
            not_found: 2,
            invalid: 1,
            cancelled: 2,
            failed: 0,
        }
    }

    #[test]
    fn success_rate_ignores_cancelled() {
        let stats = stats();
        assert_eq!(stats.processed(), 10);
        assert!((stats.success_rate() - 60.0).abs() < f64::EPSILON);
        assert_eq!(BatchStats::default().success_rate(), 0.0);
    }

    #[test]
    fn impact_uses_processed_records() {
        let impact = ImpactMetrics::from_stats(
            &stats(),
            &ImpactConfig {
                manual_minutes_per_record: 15,
                hourly_rate_usd: 50,
            },
        );
        assert!((impact.hours_saved - 2.5).abs() < 1e-9);
        assert!((impact.dollars_saved - 125.0).abs() < 1e-9);
    }

    #[test]
    fn report_serializes_duration_as_seconds() {
        let report = BatchReport {
            stats: stats(),
            failures: vec![RecordFailure {
                record_id: "r-9".into(),
                reason: "provider unavailable: HTTP 401".into(),
            }],
            duration: Duration::from_millis(1_500),
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["duration"], 1.5);
        assert_eq!(json["stats"]["found"], 6);
        assert_eq!(json["failures"][0]["record_id"], "r-9");
    }
}
