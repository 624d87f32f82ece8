//! Composite grid geometry.
//!
//! Computes where every tile and axis label of a composite grid image goes.
//! Everything here is a pure function of the axis labels, the largest tile
//! size and the label font metrics; rasterising happens elsewhere.
//!
//! Canvas layout for X=[a,b], Y=[p,q], Y2=[u]:
//!
//! ```text
//! +------+--------+--------+
//! |      |   a    |   b    |   <- header row, text_height tall
//! | u    |        |        |   <- one label row per Y2 group
//! | p    |  a/p/u |  b/p/u |
//! | q    |  a/q/u |  b/q/u |
//! +------+--------+--------+
//!   text_width wide
//! ```

use serde::Serialize;

use crate::error::{GridError, GridResult};

/* --------------------------------------------------------------------------
   Named constants
   -------------------------------------------------------------------------- */

/// Most axes a composite image can lay out (X, Y, secondary Y).
pub const MAX_COMPOSITE_AXES: usize = 3;

/// Label font size before any multiplier.
pub const BASE_LABEL_PX: f32 = 16.0;

/// Text measured to size the label margins.
pub const REFERENCE_LABEL: &str = "ABCdefg Word Prefix";

/// Tiles larger than this on either edge double the label size.
pub const LARGE_TILE_EDGE: u32 = 800;

/// Line-height padding applied to the measured reference height.
const LINE_HEIGHT_FACTOR: f32 = 1.1;

/* --------------------------------------------------------------------------
   Types
   -------------------------------------------------------------------------- */

/// Measures text at a given pixel size.
pub trait LabelMeasure {
    /// Width and height of `text` laid out on one line at `px` pixels.
    fn measure(&self, text: &str, px: f32) -> (f32, f32);
}

/// An axis value as shown on the composite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AxisLabel {
    pub title: String,
    pub key: String,
}

impl AxisLabel {
    pub fn new(title: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            key: key.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelPlacement {
    pub text: String,
    pub rect: Rect,
    /// Font size in pixels after auto-fit.
    pub px: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TilePlacement {
    pub path_key: String,
    pub x: u32,
    pub y: u32,
}

/// Reference label metrics at the chosen multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LabelMetrics {
    pub multiplier: f32,
    pub text_width: u32,
    pub raw_text_height: u32,
    pub text_height: u32,
}

impl LabelMetrics {
    pub fn measure(measure: &dyn LabelMeasure, multiplier: f32) -> Self {
        let (w, h) = measure.measure(REFERENCE_LABEL, BASE_LABEL_PX * multiplier);
        let raw_text_height = (h * LINE_HEIGHT_FACTOR).ceil() as u32;
        Self {
            multiplier,
            text_width: w.ceil() as u32,
            raw_text_height,
            text_height: raw_text_height * 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompositeLayout {
    pub width: u32,
    pub height: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub metrics: LabelMetrics,
    pub labels: Vec<LabelPlacement>,
    pub tiles: Vec<TilePlacement>,
}

/* --------------------------------------------------------------------------
   Label sizing
   -------------------------------------------------------------------------- */

/// Label multiplier for tiles of the given maximum size.
pub fn label_scale_multiplier(max_width: u32, max_height: u32) -> f32 {
    if max_width > LARGE_TILE_EDGE || max_height > LARGE_TILE_EDGE {
        2.0
    } else {
        1.0
    }
}

/// Pick the font scale for a label measured at `measured_width` that must
/// fit a `width`x`height` box holding lines `raw_text_height` tall.
pub fn fit_label_scale(
    measured_width: f32,
    width: u32,
    height: u32,
    raw_text_height: u32,
    multiplier: f32,
) -> f32 {
    let lines = height as f32 / raw_text_height.max(1) as f32;
    let available = width as f32 * lines;
    if measured_width < available * 0.5 {
        2.0 * multiplier
    } else if measured_width > available * 2.0 {
        0.5 * multiplier
    } else if measured_width > available {
        0.75 * multiplier
    } else {
        multiplier
    }
}

/// Key of the output for an X/Y/Y2 combination.
pub fn composite_path_key(x: &str, y: Option<&str>, y2: Option<&str>) -> String {
    match (y, y2) {
        (Some(y), Some(y2)) => format!("{x}/{y}/{y2}"),
        (Some(y), None) => format!("{x}/{y}"),
        _ => x.to_string(),
    }
}

/* --------------------------------------------------------------------------
   Layout
   -------------------------------------------------------------------------- */

impl CompositeLayout {
    /// Lay out `axes` (X, then optional Y and Y2, active values only) for
    /// tiles up to `max_width`x`max_height`.
    pub fn compute(
        axes: &[Vec<AxisLabel>],
        max_width: u32,
        max_height: u32,
        measure: &dyn LabelMeasure,
    ) -> GridResult<Self> {
        if axes.len() > MAX_COMPOSITE_AXES {
            return Err(GridError::UnsupportedLayout {
                got: axes.len(),
                max: MAX_COMPOSITE_AXES,
            });
        }
        let Some(x_axis) = axes.first().filter(|a| !a.is_empty()) else {
            return Err(GridError::Configuration(
                "A composite grid image needs at least one axis".to_string(),
            ));
        };
        let optional = |i: usize| -> Vec<Option<&AxisLabel>> {
            match axes.get(i) {
                Some(labels) => labels.iter().map(Some).collect(),
                None => vec![None],
            }
        };
        let y_axis = optional(1);
        let y2_axis = optional(2);

        let multiplier = label_scale_multiplier(max_width, max_height);
        let metrics = LabelMetrics::measure(measure, multiplier);
        let tw = metrics.text_width;
        let th = metrics.text_height;

        let mut labels = Vec::new();
        let mut place_label = |text: &str, rect: Rect| {
            let (measured, _) = measure.measure(text, BASE_LABEL_PX * multiplier);
            let scale = fit_label_scale(
                measured,
                rect.width,
                rect.height,
                metrics.raw_text_height,
                multiplier,
            );
            labels.push(LabelPlacement {
                text: text.to_string(),
                rect,
                px: BASE_LABEL_PX * scale,
            });
        };

        for (xi, x) in x_axis.iter().enumerate() {
            place_label(
                &x.title,
                Rect {
                    x: xi as u32 * max_width + tw,
                    y: 0,
                    width: max_width,
                    height: th,
                },
            );
        }

        let mut tiles = Vec::new();
        let mut row_top = 0u32;
        for y2 in &y2_axis {
            if let Some(y2) = y2 {
                place_label(
                    &y2.title,
                    Rect {
                        x: 0,
                        y: row_top + th,
                        width: tw,
                        height: max_height,
                    },
                );
                row_top += th;
            }
            for y in &y_axis {
                if let Some(y) = y {
                    place_label(
                        &y.title,
                        Rect {
                            x: 0,
                            y: row_top + 2 * th,
                            width: tw,
                            height: max_height,
                        },
                    );
                }
                for (xi, x) in x_axis.iter().enumerate() {
                    tiles.push(TilePlacement {
                        path_key: composite_path_key(
                            &x.key,
                            y.map(|l| l.key.as_str()),
                            y2.map(|l| l.key.as_str()),
                        ),
                        x: xi as u32 * max_width + tw,
                        y: row_top + th,
                    });
                }
                row_top += max_height;
            }
        }

        Ok(Self {
            width: max_width * x_axis.len() as u32 + tw,
            height: th + row_top,
            tile_width: max_width,
            tile_height: max_height,
            metrics,
            labels,
            tiles,
        })
    }
}

/* --------------------------------------------------------------------------
   Tests
   -------------------------------------------------------------------------- */
