use serde::{Deserialize, Serialize};

use crate::axis::Axis;
use crate::params::ParamSet;

/// What a run produces once every cell has finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputType {
    /// One labeled image assembling every cell.
    #[default]
    #[serde(alias = "grid_image")]
    CompositeImage,
    /// A folder of per-cell images browsable as a page.
    WebPage,
}

impl OutputType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CompositeImage => "composite_image",
            Self::WebPage => "web_page",
        }
    }
}

/// Smallest image size observed across cells.
///
/// Starts at the base resolution and only ever narrows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GridSizing {
    pub min_width: u32,
    pub min_height: u32,
}

impl GridSizing {
    pub fn from_base(base: &ParamSet) -> Self {
        Self {
            min_width: base.image_width(),
            min_height: base.image_height(),
        }
    }

    pub fn narrow_width(&mut self, width: u32) {
        self.min_width = self.min_width.min(width);
    }

    pub fn narrow_height(&mut self, height: u32) {
        self.min_height = self.min_height.min(height);
    }
}

#[derive(Debug, Clone)]
pub struct Grid {
    pub axes: Vec<Axis>,
    pub initial_params: ParamSet,
    pub output_type: OutputType,
    /// Output file extension, e.g. `png`.
    pub format: String,
    pub publish_metadata: bool,
}

impl Grid {
    /// Number of cells the grid expands to.
    pub fn total_cells(&self) -> usize {
        self.axes.iter().map(Axis::active_len).product()
    }
}
