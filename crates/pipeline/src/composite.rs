//! Rasterising the composite grid image.

use std::collections::HashMap;
use std::sync::Arc;

use image::{imageops, DynamicImage, ImageFormat, Rgba, RgbaImage};

use gridgen_core::axis::Axis;
use gridgen_core::backend::GeneratedImage;
use gridgen_core::error::{GridError, GridResult};
use gridgen_core::layout::{AxisLabel, CompositeLayout};

use crate::font::LabelFont;

const BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 255]);

pub struct CompositeImageBuilder {
    font: Arc<dyn LabelFont>,
    format: ImageFormat,
}

impl CompositeImageBuilder {
    pub fn new(font: Arc<dyn LabelFont>, format: ImageFormat) -> Self {
        Self { font, format }
    }

    /// Lay out and draw the composite for `axes` from the cell images in
    /// `generated`, keyed by path key. Cells without an image stay blank.
    pub fn build(
        &self,
        axes: &[Axis],
        generated: &HashMap<String, GeneratedImage>,
    ) -> GridResult<(CompositeLayout, GeneratedImage)> {
        let labels: Vec<Vec<AxisLabel>> = axes
            .iter()
            .map(|axis| {
                axis.active_values()
                    .map(|v| AxisLabel::new(v.title.clone(), v.key.clone()))
                    .collect()
            })
            .collect();
        let max_width = generated.values().map(|i| i.width).max().unwrap_or(0);
        let max_height = generated.values().map(|i| i.height).max().unwrap_or(0);
        if max_width == 0 || max_height == 0 {
            return Err(GridError::Internal(
                "composite requested without any cell images".to_string(),
            ));
        }

        let layout = CompositeLayout::compute(&labels, max_width, max_height, self.font.as_ref())?;
        tracing::info!(
            width = layout.width,
            height = layout.height,
            "Will generate grid image of size {}x{}",
            layout.width,
            layout.height,
        );

        let mut canvas = RgbaImage::from_pixel(layout.width, layout.height, BACKGROUND);
        for tile in &layout.tiles {
            let Some(image) = generated.get(&tile.path_key) else {
                tracing::debug!(path_key = %tile.path_key, "No image for grid cell, leaving blank");
                continue;
            };
            let decoded = image
                .decode()
                .map_err(|e| GridError::Internal(format!("decode {}: {e}", tile.path_key)))?
                .to_rgba8();
            imageops::overlay(&mut canvas, &decoded, tile.x as i64, tile.y as i64);
        }
        for label in &layout.labels {
            self.font.draw(&mut canvas, &label.text, label.rect, label.px);
        }

        let flattened = DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(canvas).to_rgb8());
        let encoded = GeneratedImage::encode(&flattened, self.format)
            .map_err(|e| GridError::Internal(format!("encode composite: {e}")))?;
        Ok((layout, encoded))
    }
}
