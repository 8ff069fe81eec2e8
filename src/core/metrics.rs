#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Snapshot returned by every tick and metrics call.
///
/// Bounding-box fields use `-1` when no pixel was active; the centroid is
/// `0.0` in that case.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct RegionMetrics {
    pub delivered_events: u64,
    pub total_slots: u64,
    pub total_synapses: u64,
    pub active_pixels: u64,
    pub centroid_row: f64,
    pub centroid_col: f64,
    pub bbox_row_min: i64,
    pub bbox_row_max: i64,
    pub bbox_col_min: i64,
    pub bbox_col_max: i64,
}

impl Default for RegionMetrics {
    fn default() -> Self {
        Self {
            delivered_events: 0,
            total_slots: 0,
            total_synapses: 0,
            active_pixels: 0,
            centroid_row: 0.0,
            centroid_col: 0.0,
            bbox_row_min: -1,
            bbox_row_max: -1,
            bbox_col_min: -1,
            bbox_col_max: -1,
        }
    }
}

impl RegionMetrics {
    /// Copy the spatial fields out of `stats`.
    pub fn with_spatial(mut self, stats: &SpatialStats) -> Self {
        self.active_pixels = stats.active_pixels;
        let (row, col) = stats.centroid();
        self.centroid_row = row;
        self.centroid_col = col;
        let (row_min, row_max, col_min, col_max) = stats.bbox();
        self.bbox_row_min = row_min;
        self.bbox_row_max = row_max;
        self.bbox_col_min = col_min;
        self.bbox_col_max = col_max;
        self
    }
}

/// Running active-pixel statistics over one or more 2D frames.
///
/// Partial stats merge in a fixed order, so a per-row split gives the same
/// answer for any number of workers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialStats {
    pub active_pixels: u64,
    pub amplitude_sum: f64,
    pub row_sum: f64,
    pub col_sum: f64,
    /// Unweighted coordinate sums, used when the amplitude sum is zero.
    pub row_count_sum: f64,
    pub col_count_sum: f64,
    row_min: usize,
    row_max: usize,
    col_min: usize,
    col_max: usize,
}

impl Default for SpatialStats {
    fn default() -> Self {
        Self {
            active_pixels: 0,
            amplitude_sum: 0.0,
            row_sum: 0.0,
            col_sum: 0.0,
            row_count_sum: 0.0,
            col_count_sum: 0.0,
            row_min: usize::MAX,
            row_max: 0,
            col_min: usize::MAX,
            col_max: 0,
        }
    }
}

impl SpatialStats {
    /// Record one cell; only `value > 0` counts as active.
    #[inline]
    pub fn observe(&mut self, row: usize, col: usize, value: f64) {
        if value.is_nan() || value <= 0.0 {
            return;
        }
        self.active_pixels += 1;
        self.amplitude_sum += value;
        self.row_sum += value * row as f64;
        self.col_sum += value * col as f64;
        self.row_count_sum += row as f64;
        self.col_count_sum += col as f64;
        self.row_min = self.row_min.min(row);
        self.row_max = self.row_max.max(row);
        self.col_min = self.col_min.min(col);
        self.col_max = self.col_max.max(col);
    }

    pub fn merge(mut self, other: &SpatialStats) -> Self {
        if other.active_pixels == 0 {
            return self;
        }
        self.active_pixels += other.active_pixels;
        self.amplitude_sum += other.amplitude_sum;
        self.row_sum += other.row_sum;
        self.col_sum += other.col_sum;
        self.row_count_sum += other.row_count_sum;
        self.col_count_sum += other.col_count_sum;
        self.row_min = self.row_min.min(other.row_min);
        self.row_max = self.row_max.max(other.row_max);
        self.col_min = self.col_min.min(other.col_min);
        self.col_max = self.col_max.max(other.col_max);
        self
    }

    /// Amplitude-weighted centroid, falling back to the plain mean when the
    /// amplitude sum is exactly zero.
    pub fn centroid(&self) -> (f64, f64) {
        if self.active_pixels == 0 {
            return (0.0, 0.0);
        }
        if self.amplitude_sum > 0.0 {
            (
                self.row_sum / self.amplitude_sum,
                self.col_sum / self.amplitude_sum,
            )
        } else {
            let n = self.active_pixels as f64;
            (self.row_count_sum / n, self.col_count_sum / n)
        }
    }

    /// `(row_min, row_max, col_min, col_max)`, all `-1` when nothing is active.
    pub fn bbox(&self) -> (i64, i64, i64, i64) {
        if self.active_pixels == 0 {
            return (-1, -1, -1, -1);
        }
        (
            self.row_min as i64,
            self.row_max as i64,
            self.col_min as i64,
            self.col_max as i64,
        )
    }
}

/// A borrowed 2D image in one of the accepted encodings.
#[derive(Debug, Clone, Copy)]
pub enum ImageRef<'a> {
    /// Row lists; short rows read as zero past their end.
    Rows(&'a [Vec<f64>]),
    /// A square image, `side = floor(sqrt(len))`.
    Flat(&'a [f64]),
    /// Row-major data with explicit dimensions; missing cells read as zero.
    Shaped {
        data: &'a [f64],
        height: usize,
        width: usize,
    },
}

impl<'a> ImageRef<'a> {
    /// Rows define the height; the first row defines the width.
    pub fn dims(&self) -> (usize, usize) {
        match *self {
            ImageRef::Rows(rows) => (rows.len(), rows.first().map_or(0, Vec::len)),
            ImageRef::Flat(data) => {
                let side = (data.len() as f64).sqrt().floor() as usize;
                (side, side)
            }
            ImageRef::Shaped { height, width, .. } => (height, width),
        }
    }

    pub fn value(&self, row: usize, col: usize) -> f64 {
        let (_, width) = self.dims();
        self.cell(row, col, width)
    }

    #[inline]
    fn cell(&self, row: usize, col: usize, width: usize) -> f64 {
        match *self {
            ImageRef::Rows(rows) => rows
                .get(row)
                .and_then(|r| r.get(col))
                .copied()
                .unwrap_or(0.0),
            ImageRef::Flat(data) | ImageRef::Shaped { data, .. } => {
                data.get(row * width + col).copied().unwrap_or(0.0)
            }
        }
    }

    pub fn stats(&self) -> SpatialStats {
        let (height, width) = self.dims();
        let mut stats = SpatialStats::default();
        for row in 0..height {
            for col in 0..width {
                stats.observe(row, col, self.cell(row, col, width));
            }
        }
        stats
    }
}

/// Stateless spatial summary of an image.
///
/// `delivered_events` is 1 when anything was active, `total_slots` is the
/// cell count and `total_synapses` is always 0 (no wiring context).
/// `prefer_output` is accepted for interface compatibility and does not
/// change the result.
pub fn spatial_metrics(image: ImageRef<'_>, prefer_output: bool) -> RegionMetrics {
    let _ = prefer_output;
    let (height, width) = image.dims();
    let stats = image.stats();
    RegionMetrics {
        delivered_events: u64::from(stats.active_pixels > 0),
        total_slots: (height * width) as u64,
        total_synapses: 0,
        ..RegionMetrics::default()
    }
    .with_spatial(&stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_active_pixel() {
        let rows = vec![vec![0.0, 1.0, 0.0], vec![0.0, 0.0, 0.0]];
        let m = spatial_metrics(ImageRef::Rows(&rows), false);
        assert_eq!(m.active_pixels, 1);
        assert_eq!(m.delivered_events, 1);
        assert_eq!(m.total_slots, 6);
        assert_eq!(m.total_synapses, 0);
        assert!(m.centroid_row.abs() < 1e-12);
        assert!((m.centroid_col - 1.0).abs() < 1e-12);
        assert_eq!((m.bbox_row_min, m.bbox_row_max), (0, 0));
        assert_eq!((m.bbox_col_min, m.bbox_col_max), (1, 1));
    }

    #[test]
    fn empty_image_uses_sentinels() {
        let rows = vec![vec![0.0; 4]; 3];
        let m = spatial_metrics(ImageRef::Rows(&rows), true);
        assert_eq!(m.active_pixels, 0);
        assert_eq!(m.delivered_events, 0);
        assert_eq!(m.total_slots, 12);
        assert_eq!(m.centroid_row, 0.0);
        assert_eq!(
            (m.bbox_row_min, m.bbox_row_max, m.bbox_col_min, m.bbox_col_max),
            (-1, -1, -1, -1)
        );
    }

    #[test]
    fn centroid_is_amplitude_weighted() {
        let data = [0.0, 0.0, 0.0, 3.0, 0.0, 0.0, 1.0, 0.0];
        let m = spatial_metrics(
            ImageRef::Shaped {
                data: &data,
                height: 2,
                width: 4,
            },
            false,
        );
        // (0,3) weight 3, (1,2) weight 1
        assert!((m.centroid_row - 0.25).abs() < 1e-12);
        assert!((m.centroid_col - 2.75).abs() < 1e-12);
        assert_eq!((m.bbox_col_min, m.bbox_col_max), (2, 3));
    }

    #[test]
    fn ragged_rows_read_missing_cells_as_zero() {
        let rows = vec![vec![0.0, 0.0, 2.0], vec![1.0]];
        let m = spatial_metrics(ImageRef::Rows(&rows), false);
        assert_eq!(m.total_slots, 6);
        assert_eq!(m.active_pixels, 2);
        assert_eq!((m.bbox_row_min, m.bbox_row_max), (0, 1));
    }

    #[test]
    fn flat_input_is_square() {
        let data = [0.0, 0.0, 0.0, 5.0, 9.0];
        let m = spatial_metrics(ImageRef::Flat(&data), false);
        assert_eq!(m.total_slots, 4);
        assert_eq!(m.active_pixels, 1, "trailing cell is outside the square");
        assert_eq!((m.bbox_row_min, m.bbox_col_min), (1, 1));
    }

    #[test]
    fn merge_matches_single_pass() {
        let rows = vec![vec![0.5, 0.0, 2.0], vec![0.0, 1.5, 0.0], vec![3.0, 0.0, 0.0]];
        let image = ImageRef::Rows(&rows);
        let whole = image.stats();

        let mut merged = SpatialStats::default();
        for (r, row) in rows.iter().enumerate() {
            let mut part = SpatialStats::default();
            for (c, v) in row.iter().enumerate() {
                part.observe(r, c, *v);
            }
            merged = merged.merge(&part);
        }
        assert_eq!(merged.active_pixels, whole.active_pixels);
        assert_eq!(merged.bbox(), whole.bbox());
        let (a, b) = (merged.centroid(), whole.centroid());
        assert!((a.0 - b.0).abs() < 1e-12 && (a.1 - b.1).abs() < 1e-12);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn serializes_with_camel_case_fields() {
        let json = serde_json::to_value(RegionMetrics::default()).unwrap();
        for key in [
            "deliveredEvents",
            "totalSlots",
            "totalSynapses",
            "activePixels",
            "centroidRow",
            "centroidCol",
            "bboxRowMin",
            "bboxRowMax",
            "bboxColMin",
            "bboxColMax",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert_eq!(json["bboxRowMin"], -1);
    }
}
