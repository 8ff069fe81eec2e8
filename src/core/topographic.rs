//! Window enumeration and distance-weighted receptive fields.
//!
//! [`enumerate_windows`] is the single source of truth for how windowed
//! wiring tiles a 2D source; the region's windowed connector and the pure
//! [`connect_layers_topographic`] helper both walk its output.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Sums at or below this are treated as zero when normalizing.
const NORMALIZE_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub enum Padding {
    /// One window per destination cell, clamped inside the source.
    #[default]
    Same,
    /// Windows at stride steps that fit entirely inside the source.
    Valid,
}

/// A source rectangle `[row_start, row_end) x [col_start, col_end)` and the
/// destination cell it projects to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub row_start: usize,
    pub row_end: usize,
    pub col_start: usize,
    pub col_end: usize,
    pub center_row: usize,
    pub center_col: usize,
}

impl Window {
    /// Covered source cells in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (self.row_start..self.row_end)
            .flat_map(move |row| (self.col_start..self.col_end).map(move |col| (row, col)))
    }
}

/// Kernel and stride of a windowed projection, in `(rows, cols)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSpec {
    pub kernel: (usize, usize),
    pub stride: (usize, usize),
    pub padding: Padding,
}

/// Tile a `src` grid with windows whose centers live in a `dst` grid.
///
/// * `Valid` slides from the top-left at stride steps while the window fits;
///   the center is `offset + kernel/2`, clamped into `dst`.
/// * `Same` visits every `dst` cell once (stride is ignored); the source
///   window starts at `dst - kernel/2`, clamped to `[0, src - kernel]`.
///
/// A zero kernel yields no windows; a zero stride is treated as one.
pub fn enumerate_windows(src: (usize, usize), dst: (usize, usize), spec: &WindowSpec) -> Vec<Window> {
    let (src_h, src_w) = src;
    let (dst_h, dst_w) = dst;
    let (k_h, k_w) = spec.kernel;
    let (s_h, s_w) = (spec.stride.0.max(1), spec.stride.1.max(1));
    if k_h == 0 || k_w == 0 || dst_h == 0 || dst_w == 0 {
        return Vec::new();
    }

    let mut windows = Vec::new();
    match spec.padding {
        Padding::Valid => {
            if k_h > src_h || k_w > src_w {
                return windows;
            }
            for row_start in (0..=src_h - k_h).step_by(s_h) {
                for col_start in (0..=src_w - k_w).step_by(s_w) {
                    windows.push(Window {
                        row_start,
                        row_end: row_start + k_h,
                        col_start,
                        col_end: col_start + k_w,
                        center_row: (row_start + k_h / 2).min(dst_h - 1),
                        center_col: (col_start + k_w / 2).min(dst_w - 1),
                    });
                }
            }
        }
        Padding::Same => {
            for dst_row in 0..dst_h {
                for dst_col in 0..dst_w {
                    let row_start = clamped_start(dst_row, k_h, src_h);
                    let col_start = clamped_start(dst_col, k_w, src_w);
                    windows.push(Window {
                        row_start,
                        row_end: src_h.min(row_start + k_h),
                        col_start,
                        col_end: src_w.min(col_start + k_w),
                        center_row: dst_row,
                        center_col: dst_col,
                    });
                }
            }
        }
    }
    windows
}

/// `max(0, min(extent - kernel, coord - kernel/2))`
fn clamped_start(coord: usize, kernel: usize, extent: usize) -> usize {
    coord
        .saturating_sub(kernel / 2)
        .min(extent.saturating_sub(kernel))
}

// ─────────────────────────────────────────────────────────────────────────
// Topographic weights
// ─────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub enum WeightMode {
    #[default]
    Gaussian,
    /// Difference of Gaussians: center minus scaled surround, floored at 0.
    #[cfg_attr(feature = "serde", serde(rename = "dog"))]
    DifferenceOfGaussians,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase", default))]
pub struct TopographicConfig {
    pub kernel_h: usize,
    pub kernel_w: usize,
    pub stride_h: usize,
    pub stride_w: usize,
    pub padding: Padding,
    pub feedback: bool,
    pub weight_mode: WeightMode,
    pub sigma_center: f64,
    pub sigma_surround: f64,
    pub surround_ratio: f64,
    /// Scale each center's incoming weights to sum to 1.
    pub normalize_incoming: bool,
}

impl Default for TopographicConfig {
    fn default() -> Self {
        Self {
            kernel_h: 7,
            kernel_w: 7,
            stride_h: 1,
            stride_w: 1,
            padding: Padding::Same,
            feedback: false,
            weight_mode: WeightMode::Gaussian,
            sigma_center: 2.0,
            sigma_surround: 4.0,
            surround_ratio: 0.5,
            normalize_incoming: true,
        }
    }
}

impl TopographicConfig {
    pub fn with_kernel(mut self, kernel_h: usize, kernel_w: usize) -> Self {
        self.kernel_h = kernel_h;
        self.kernel_w = kernel_w;
        self
    }

    pub fn with_stride(mut self, stride_h: usize, stride_w: usize) -> Self {
        self.stride_h = stride_h;
        self.stride_w = stride_w;
        self
    }

    pub fn with_padding(mut self, padding: Padding) -> Self {
        self.padding = padding;
        self
    }

    pub fn with_dog(mut self, sigma_surround: f64, surround_ratio: f64) -> Self {
        self.weight_mode = WeightMode::DifferenceOfGaussians;
        self.sigma_surround = sigma_surround;
        self.surround_ratio = surround_ratio;
        self
    }

    pub fn window_spec(&self) -> WindowSpec {
        WindowSpec {
            kernel: (self.kernel_h, self.kernel_w),
            stride: (self.stride_h, self.stride_w),
            padding: self.padding,
        }
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.kernel_h == 0 || self.kernel_w == 0 {
            return Err("kernel_h and kernel_w must be >= 1");
        }
        if self.stride_h == 0 || self.stride_w == 0 {
            return Err("stride_h and stride_w must be >= 1");
        }
        if self.sigma_center.is_nan() || self.sigma_center <= 0.0 {
            return Err("sigma_center must be > 0");
        }
        if self.weight_mode == WeightMode::DifferenceOfGaussians {
            if self.sigma_surround.is_nan() || self.sigma_surround <= self.sigma_center {
                return Err("sigma_surround must be > sigma_center for DoG mode");
            }
            if self.surround_ratio.is_nan() || self.surround_ratio < 0.0 {
                return Err("surround_ratio must be >= 0");
            }
        }
        Ok(())
    }

    fn weight_at(&self, distance_sq: f64) -> f64 {
        let center = gaussian(distance_sq, self.sigma_center);
        match self.weight_mode {
            WeightMode::Gaussian => center,
            WeightMode::DifferenceOfGaussians => {
                (center - self.surround_ratio * gaussian(distance_sq, self.sigma_surround)).max(0.0)
            }
        }
    }
}

#[inline]
fn gaussian(distance_sq: f64, sigma: f64) -> f64 {
    (-distance_sq / (2.0 * sigma * sigma)).exp()
}

/// Incoming weights for one destination center: `(source_row, source_col, weight)`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct CenterWeights {
    pub center_row: usize,
    pub center_col: usize,
    pub weights: Vec<(usize, usize, f64)>,
}

impl CenterWeights {
    pub fn total(&self) -> f64 {
        self.weights.iter().map(|&(_, _, w)| w).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct TopographicMap {
    pub unique_sources: usize,
    pub incoming_per_center: Vec<CenterWeights>,
}

/// Windowed receptive fields with distance-based weights.
///
/// Pure: depends only on the dimensions and `cfg`. Distances are measured
/// from each window's geometric center (`start + kernel/2`), so clamped
/// border windows are weighted like interior ones.
pub fn connect_layers_topographic(
    src_height: usize,
    src_width: usize,
    dst_height: usize,
    dst_width: usize,
    cfg: &TopographicConfig,
) -> TopographicMap {
    let windows = enumerate_windows(
        (src_height, src_width),
        (dst_height, dst_width),
        &cfg.window_spec(),
    );

    let mut covered = vec![false; src_height * src_width];
    for window in &windows {
        for (row, col) in window.cells() {
            covered[row * src_width + col] = true;
        }
    }
    let unique_sources = covered.iter().filter(|&&c| c).count();

    let incoming_per_center = windows
        .iter()
        .map(|window| {
            let mid_row = (window.row_start + cfg.kernel_h / 2) as f64;
            let mid_col = (window.col_start + cfg.kernel_w / 2) as f64;
            let mut weights: Vec<(usize, usize, f64)> = window
                .cells()
                .map(|(row, col)| {
                    let dr = row as f64 - mid_row;
                    let dc = col as f64 - mid_col;
                    (row, col, cfg.weight_at(dr * dr + dc * dc))
                })
                .collect();

            if cfg.normalize_incoming {
                let sum: f64 = weights.iter().map(|&(_, _, w)| w).sum();
                let denom = if sum > NORMALIZE_EPSILON { sum } else { 1.0 };
                for entry in &mut weights {
                    entry.2 /= denom;
                }
            }

            CenterWeights {
                center_row: window.center_row,
                center_col: window.center_col,
                weights,
            }
        })
        .collect();

    TopographicMap {
        unique_sources,
        incoming_per_center,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(kernel: usize, stride: usize, padding: Padding) -> WindowSpec {
        WindowSpec {
            kernel: (kernel, kernel),
            stride: (stride, stride),
            padding,
        }
    }

    #[test]
    fn valid_windows_fit_inside_the_source() {
        let windows = enumerate_windows((4, 4), (4, 4), &spec(2, 2, Padding::Valid));
        assert_eq!(windows.len(), 4);
        assert_eq!((windows[3].row_start, windows[3].col_start), (2, 2));
        assert_eq!((windows[0].center_row, windows[0].center_col), (1, 1));

        assert!(enumerate_windows((2, 2), (2, 2), &spec(3, 1, Padding::Valid)).is_empty());
    }

    #[test]
    fn same_windows_clamp_to_the_source() {
        let windows = enumerate_windows((5, 5), (5, 5), &spec(3, 3, Padding::Same));
        assert_eq!(windows.len(), 25);
        let corner = windows[0];
        assert_eq!((corner.row_start, corner.row_end), (0, 3));
        let last = windows[24];
        assert_eq!((last.row_start, last.row_end), (2, 5));
        assert_eq!((last.center_row, last.center_col), (4, 4));
    }

    #[test]
    fn degenerate_kernel_and_stride() {
        assert!(enumerate_windows((4, 4), (4, 4), &spec(0, 1, Padding::Valid)).is_empty());
        let windows = enumerate_windows((3, 3), (3, 3), &spec(1, 0, Padding::Valid));
        assert_eq!(windows.len(), 9, "zero stride behaves as one");
    }

    #[test]
    fn unique_sources_for_valid_stride_one() {
        let cfg = TopographicConfig::default()
            .with_kernel(3, 3)
            .with_stride(1, 1)
            .with_padding(Padding::Valid);
        let map = connect_layers_topographic(5, 5, 5, 5, &cfg);
        assert_eq!(map.unique_sources, 25);
        assert_eq!(map.incoming_per_center.len(), 9);
    }

    #[test]
    fn incoming_weights_are_normalized_per_center() {
        for cfg in [
            TopographicConfig::default().with_kernel(3, 3),
            TopographicConfig::default().with_kernel(5, 5).with_dog(4.0, 0.5),
        ] {
            assert!(cfg.validate().is_ok());
            let map = connect_layers_topographic(8, 8, 8, 8, &cfg);
            for center in &map.incoming_per_center {
                assert!((center.total() - 1.0).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn gaussian_peaks_at_the_window_center() {
        let cfg = TopographicConfig {
            normalize_incoming: false,
            ..TopographicConfig::default().with_kernel(3, 3).with_padding(Padding::Valid)
        };
        let map = connect_layers_topographic(3, 3, 3, 3, &cfg);
        let center = &map.incoming_per_center[0];
        let peak = center
            .weights
            .iter()
            .find(|&&(r, c, _)| (r, c) == (1, 1))
            .map(|&(_, _, w)| w);
        assert_eq!(peak, Some(1.0));
        assert!(center.weights.iter().all(|&(_, _, w)| w <= 1.0));
    }

    #[test]
    fn validation_rejects_bad_configs() {
        assert!(TopographicConfig::default().with_kernel(0, 3).validate().is_err());
        assert!(TopographicConfig::default().with_stride(1, 0).validate().is_err());
        let bad_dog = TopographicConfig::default().with_dog(1.0, 0.5);
        assert!(bad_dog.validate().is_err(), "surround must be wider than center");
    }
}
