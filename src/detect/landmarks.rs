//! Per-frame landmark tables written by the batch pose estimator.
//!
//! The table is CSV with three header rows: `scorer`, `bodyparts` and
//! `coords`, followed by one row per frame holding an index column and an
//! `x, y, likelihood` triple per body part.

use std::path::Path;

use anyhow::{anyhow, Context, Result};

use crate::zone::Point;

/// Landmark preferred as the subject's position proxy.
pub const PREFERRED_LANDMARK: &str = "snout";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Columns {
    x: usize,
    y: usize,
    likelihood: usize,
}

#[derive(Clone, Debug)]
pub struct LandmarkTable {
    bodyparts: Vec<String>,
    columns: Vec<Columns>,
    rows: Vec<Vec<f64>>,
}

impl LandmarkTable {
    pub fn read(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read landmark table {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid landmark table {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let mut lines = raw.lines().filter(|line| !line.trim().is_empty());
        let mut bodypart_row: Option<Vec<String>> = None;
        let coords_row = loop {
            let line = lines
                .next()
                .ok_or_else(|| anyhow!("missing 'coords' header row"))?;
            let cells = split_row(line);
            match cells.first().map(String::as_str) {
                Some("bodyparts") => bodypart_row = Some(cells),
                Some("coords") => break cells,
                _ => {}
            }
        };
        let bodypart_row = bodypart_row.ok_or_else(|| anyhow!("missing 'bodyparts' header row"))?;
        if bodypart_row.len() != coords_row.len() {
            return Err(anyhow!("header rows have different widths"));
        }

        let mut bodyparts: Vec<String> = Vec::new();
        let mut partial: Vec<[Option<usize>; 3]> = Vec::new();
        for (col, (part, coord)) in bodypart_row.iter().zip(&coords_row).enumerate().skip(1) {
            let slot = match coord.as_str() {
                "x" => 0,
                "y" => 1,
                "likelihood" => 2,
                _ => continue,
            };
            let idx = match bodyparts.iter().position(|p| p == part) {
                Some(idx) => idx,
                None => {
                    bodyparts.push(part.clone());
                    partial.push([None; 3]);
                    bodyparts.len() - 1
                }
            };
            partial[idx][slot] = Some(col);
        }
        let columns = bodyparts
            .iter()
            .zip(&partial)
            .map(|(part, cols)| match cols {
                [Some(x), Some(y), Some(likelihood)] => Ok(Columns {
                    x: *x,
                    y: *y,
                    likelihood: *likelihood,
                }),
                _ => Err(anyhow!("body part '{part}' lacks an x, y, likelihood triple")),
            })
            .collect::<Result<Vec<_>>>()?;
        if columns.is_empty() {
            return Err(anyhow!("landmark table lists no body parts"));
        }

        let width = coords_row.len();
        let rows = lines
            .enumerate()
            .map(|(i, line)| {
                let cells = split_row(line);
                if cells.len() != width {
                    return Err(anyhow!("row {i} has {} cells, expected {width}", cells.len()));
                }
                // Unparseable cells become NaN, i.e. "not detected".
                Ok(cells
                    .iter()
                    .map(|cell| cell.parse::<f64>().unwrap_or(f64::NAN))
                    .collect())
            })
            .collect::<Result<Vec<Vec<f64>>>>()?;

        Ok(Self {
            bodyparts,
            columns,
            rows,
        })
    }

    pub fn bodyparts(&self) -> &[String] {
        &self.bodyparts
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Landmark used as the position proxy.
    ///
    /// An explicitly requested landmark must exist. Otherwise `snout` is used
    /// when present, else the first body part.
    pub fn representative(&self, requested: Option<&str>) -> Result<&str> {
        if let Some(name) = requested {
            return self
                .bodyparts
                .iter()
                .find(|p| p.as_str() == name)
                .map(String::as_str)
                .ok_or_else(|| anyhow!("landmark '{name}' not present in table"));
        }
        let chosen = self
            .bodyparts
            .iter()
            .find(|p| p.as_str() == PREFERRED_LANDMARK)
            .or_else(|| self.bodyparts.first())
            .ok_or_else(|| anyhow!("landmark table lists no body parts"))?;
        Ok(chosen.as_str())
    }

    /// One entry per frame; `None` where the likelihood is below
    /// `min_likelihood` or any value is not finite.
    pub fn positions(&self, landmark: &str, min_likelihood: f32) -> Result<Vec<Option<Point>>> {
        let idx = self
            .bodyparts
            .iter()
            .position(|p| p == landmark)
            .ok_or_else(|| anyhow!("landmark '{landmark}' not present in table"))?;
        let cols = self.columns[idx];
        Ok(self
            .rows
            .iter()
            .map(|row| {
                let (x, y, p) = (row[cols.x], row[cols.y], row[cols.likelihood]);
                let usable = x.is_finite() && y.is_finite() && p.is_finite();
                (usable && p >= min_likelihood as f64).then(|| Point::new(x, y))
            })
            .collect())
    }
}

fn split_row(line: &str) -> Vec<String> {
    line.split(',').map(|cell| cell.trim().to_string()).collect()
}
