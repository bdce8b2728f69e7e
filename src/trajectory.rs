//! Per-frame samples and the recorder that classifies them.

use serde::{Deserialize, Serialize};

use crate::zone::{Point, ZoneSet};

/// One processed frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameSample {
    pub time_seconds: f64,
    pub position: Option<Point>,
    /// Zone name, `Outside` or `NotDetected`.
    pub zone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tail: Option<Point>,
}

/// Row handed to the reporting component.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrajectoryRow<'a> {
    pub time_seconds: f64,
    pub zone: &'a str,
    pub x: Option<f64>,
    pub y: Option<f64>,
}

/// Time-ordered samples for one run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    samples: Vec<FrameSample>,
}

impl Trajectory {
    pub fn samples(&self) -> &[FrameSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = TrajectoryRow<'_>> {
        self.samples.iter().map(|s| TrajectoryRow {
            time_seconds: s.time_seconds,
            zone: &s.zone,
            x: s.position.map(|p| p.x),
            y: s.position.map(|p| p.y),
        })
    }
}

impl FromIterator<FrameSample> for Trajectory {
    /// Collects as-is; callers are responsible for ordering.
    fn from_iter<I: IntoIterator<Item = FrameSample>>(iter: I) -> Self {
        Self {
            samples: iter.into_iter().collect(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordStatus {
    Recorded,
    /// The timestamp lies beyond the window end; nothing was appended.
    PastEnd,
}

/// Appends classified samples while keeping time non-decreasing.
pub struct Recorder {
    zones: ZoneSet,
    end_s: f64,
    samples: Vec<FrameSample>,
    regressions: u64,
}

impl Recorder {
    pub fn new(zones: ZoneSet, end_s: f64) -> Self {
        Self {
            zones,
            end_s,
            samples: Vec::new(),
            regressions: 0,
        }
    }

    pub fn is_past_end(&self, time_seconds: f64) -> bool {
        time_seconds > self.end_s
    }

    pub fn record(&mut self, time_seconds: f64, position: Option<Point>) -> RecordStatus {
        self.record_with_tail(time_seconds, position, None)
    }

    pub fn record_with_tail(
        &mut self,
        time_seconds: f64,
        position: Option<Point>,
        tail: Option<Point>,
    ) -> RecordStatus {
        if self.is_past_end(time_seconds) {
            return RecordStatus::PastEnd;
        }
        let mut time_seconds = time_seconds;
        let previous = self.samples.last().map(|s| s.time_seconds);
        if time_seconds.is_nan() || previous.is_some_and(|prev| time_seconds < prev) {
            let clamped = previous.unwrap_or(0.0);
            self.regressions += 1;
            log::warn!("timestamp regressed to {time_seconds:.4}s; clamping to {clamped:.4}s");
            time_seconds = clamped;
        }
        let zone = self.zones.classify(position.as_ref()).to_string();
        self.samples.push(FrameSample {
            time_seconds,
            position,
            zone,
            tail,
        });
        RecordStatus::Recorded
    }

    /// Number of samples whose timestamp had to be clamped.
    pub fn regressions(&self) -> u64 {
        self.regressions
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn finish(self) -> Trajectory {
        Trajectory {
            samples: self.samples,
        }
    }
}
