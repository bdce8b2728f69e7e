//! Trajectory aggregation: dwell time, entries, distance and immobility.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::trajectory::Trajectory;
use crate::zone::{ZoneCategories, NOT_DETECTED};

pub const DEFAULT_BODY_LENGTH_PX: f64 = 80.0;
/// Body lengths per sample interval below which a step counts as immobile.
pub const DEFAULT_IMMOBILITY_FRACTION: f64 = 0.02;

#[derive(Clone, Debug)]
pub struct MetricsConfig {
    /// Samples per second actually recorded (frame rate / decimation stride).
    pub sampling_rate_hz: f64,
    pub body_length_px: f64,
    pub immobility_fraction: f64,
    pub categories: ZoneCategories,
}

impl MetricsConfig {
    pub fn new(sampling_rate_hz: f64) -> Result<Self, PipelineError> {
        if !sampling_rate_hz.is_finite() || sampling_rate_hz <= 0.0 {
            return Err(PipelineError::Config(format!(
                "sampling rate must be positive, got {sampling_rate_hz}"
            )));
        }
        Ok(Self {
            sampling_rate_hz,
            body_length_px: DEFAULT_BODY_LENGTH_PX,
            immobility_fraction: DEFAULT_IMMOBILITY_FRACTION,
            categories: ZoneCategories::default(),
        })
    }

    pub fn interval_s(&self) -> f64 {
        1.0 / self.sampling_rate_hz
    }

    /// Speed threshold in pixels per second.
    pub fn immobility_speed_px_s(&self) -> f64 {
        self.body_length_px * self.immobility_fraction * self.sampling_rate_hz
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Pixels, native resolution.
    pub total_distance: f64,
    /// Pixels per second.
    pub avg_speed: f64,
    /// Percentage of position steps below the immobility threshold.
    pub immobility_pct: f64,
    pub per_zone_seconds: BTreeMap<String, f64>,
    pub entries_count: u64,
    /// Sample count times the sample interval.
    pub total_time_s: f64,
    pub open_arm_seconds: f64,
    pub closed_arm_seconds: f64,
    /// Open-arm dwell as a percentage of total time.
    pub anxiety_index: f64,
    pub not_detected_pct: f64,
}

pub fn aggregate(trajectory: &Trajectory, config: &MetricsConfig) -> Metrics {
    let samples = trajectory.samples();
    let interval = config.interval_s();

    let mut per_zone_seconds: BTreeMap<String, f64> = BTreeMap::new();
    for sample in samples {
        *per_zone_seconds.entry(sample.zone.clone()).or_default() += interval;
    }

    let entries_count = samples
        .windows(2)
        .filter(|pair| pair[0].zone != pair[1].zone)
        .count() as u64;

    let threshold = config.immobility_speed_px_s();
    let mut total_distance = 0.0;
    let mut steps = 0u64;
    let mut immobile_steps = 0u64;
    for pair in samples.windows(2) {
        let (Some(a), Some(b)) = (pair[0].position, pair[1].position) else {
            continue;
        };
        let distance = a.distance(&b);
        total_distance += distance;
        let dt = pair[1].time_seconds - pair[0].time_seconds;
        let dt = if dt > 0.0 { dt } else { interval };
        steps += 1;
        if distance / dt < threshold {
            immobile_steps += 1;
        }
    }

    let total_time_s = samples.len() as f64 * interval;
    let seconds_where = |pred: &dyn Fn(&str) -> bool| -> f64 {
        per_zone_seconds
            .iter()
            .filter(|(zone, _)| pred(zone))
            .map(|(_, secs)| secs)
            .sum()
    };
    let open_arm_seconds = seconds_where(&|z| config.categories.is_open_arm(z));
    let closed_arm_seconds = seconds_where(&|z| config.categories.is_closed_arm(z));
    let not_detected_s = per_zone_seconds.get(NOT_DETECTED).copied().unwrap_or(0.0);

    Metrics {
        total_distance,
        avg_speed: ratio(total_distance, total_time_s),
        immobility_pct: 100.0 * ratio(immobile_steps as f64, steps as f64),
        entries_count,
        total_time_s,
        open_arm_seconds,
        closed_arm_seconds,
        anxiety_index: 100.0 * ratio(open_arm_seconds, total_time_s),
        not_detected_pct: 100.0 * ratio(not_detected_s, total_time_s),
        per_zone_seconds,
    }
}

fn ratio(num: f64, den: f64) -> f64 {
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}
