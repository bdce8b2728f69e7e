//! Maze regions and the point-in-zone classifier.
//!
//! All rectangles are expressed in the source video's native resolution.
//! Scaling from a display canvas happens before a `ZoneSet` is built; the
//! classifier never rescales.

use std::collections::HashSet;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Verdict for a detected point that lies in no configured zone.
pub const OUTSIDE: &str = "Outside";
/// Verdict for a frame with no usable detection.
pub const NOT_DETECTED: &str = "NotDetected";

pub const DEFAULT_OPEN_ARM_PATTERN: &str = r"(?i)open|abierto";
pub const DEFAULT_CLOSED_ARM_PATTERN: &str = r"(?i)closed|cerrado";

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Axis-aligned rectangle, top-left anchored.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    /// Inclusive on all four edges.
    pub fn contains(&self, p: &Point) -> bool {
        p.x >= self.x && p.x <= self.x + self.width && p.y >= self.y && p.y <= self.y + self.height
    }
}

/// A named region of interest.
///
/// Deserializes both the native `{name, x, y, width, height}` shape and the
/// region-drawing tool's `{"Nombre Zona", left, top, width, height}` output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    #[serde(alias = "Nombre Zona")]
    pub name: String,
    #[serde(alias = "left")]
    pub x: f64,
    #[serde(alias = "top")]
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Zone {
    pub fn new(name: impl Into<String>, x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            name: name.into(),
            x,
            y,
            width,
            height,
        }
    }

    pub fn rect(&self) -> Rect {
        Rect {
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
        }
    }
}

/// Ordered, validated zone configuration.
///
/// Order is significant: for overlapping zones the first match wins.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Zone>", into = "Vec<Zone>")]
pub struct ZoneSet {
    zones: Vec<Zone>,
}

impl ZoneSet {
    pub fn new(zones: Vec<Zone>) -> Result<Self, PipelineError> {
        let mut seen = HashSet::new();
        for zone in &zones {
            let name = zone.name.trim();
            if name.is_empty() {
                return Err(PipelineError::config("zone name must not be empty"));
            }
            if name == OUTSIDE || name == NOT_DETECTED {
                return Err(PipelineError::Config(format!(
                    "zone name '{name}' is reserved"
                )));
            }
            if !seen.insert(name.to_string()) {
                return Err(PipelineError::Config(format!(
                    "duplicate zone name '{name}'"
                )));
            }
            let coords = [zone.x, zone.y, zone.width, zone.height];
            if coords.iter().any(|v| !v.is_finite()) {
                return Err(PipelineError::Config(format!(
                    "zone '{name}' has non-finite coordinates"
                )));
            }
            if zone.width < 0.0 || zone.height < 0.0 {
                return Err(PipelineError::Config(format!(
                    "zone '{name}' has negative width or height"
                )));
            }
        }
        Ok(Self { zones })
    }

    /// Parse the JSON document written by the region-drawing step.
    pub fn from_json(raw: &str) -> Result<Self, PipelineError> {
        serde_json::from_str(raw).map_err(PipelineError::config)
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    /// First zone (in configuration order) containing the point.
    ///
    /// `None` input yields [`NOT_DETECTED`]; a point in no zone yields [`OUTSIDE`].
    pub fn classify(&self, point: Option<&Point>) -> &str {
        let Some(p) = point else {
            return NOT_DETECTED;
        };
        self.zones
            .iter()
            .find(|zone| zone.rect().contains(p))
            .map(|zone| zone.name.as_str())
            .unwrap_or(OUTSIDE)
    }
}

impl TryFrom<Vec<Zone>> for ZoneSet {
    type Error = PipelineError;

    fn try_from(zones: Vec<Zone>) -> Result<Self, Self::Error> {
        Self::new(zones)
    }
}

impl From<ZoneSet> for Vec<Zone> {
    fn from(set: ZoneSet) -> Self {
        set.zones
    }
}

/// Name-convention grouping of zones into open and closed arms.
#[derive(Clone, Debug)]
pub struct ZoneCategories {
    open: Regex,
    closed: Regex,
}

impl ZoneCategories {
    pub fn new(open_pattern: &str, closed_pattern: &str) -> Result<Self, PipelineError> {
        let open = Regex::new(open_pattern)
            .map_err(|e| PipelineError::Config(format!("invalid open-arm pattern: {e}")))?;
        let closed = Regex::new(closed_pattern)
            .map_err(|e| PipelineError::Config(format!("invalid closed-arm pattern: {e}")))?;
        Ok(Self { open, closed })
    }

    pub fn is_open_arm(&self, zone: &str) -> bool {
        !is_sentinel(zone) && self.open.is_match(zone)
    }

    pub fn is_closed_arm(&self, zone: &str) -> bool {
        !is_sentinel(zone) && self.closed.is_match(zone)
    }
}

impl Default for ZoneCategories {
    fn default() -> Self {
        Self::new(DEFAULT_OPEN_ARM_PATTERN, DEFAULT_CLOSED_ARM_PATTERN)
            .expect("built-in arm patterns compile")
    }
}

pub fn is_sentinel(zone: &str) -> bool {
    zone == OUTSIDE || zone == NOT_DETECTED
}
