//! Grid extension points.
//!
//! A run calls into an ordered [`HookPipeline`] at fixed stages:
//!
//! | Stage           | When                                                     |
//! |-----------------|----------------------------------------------------------|
//! | `on_cell_init`  | A cell has been created, before any assignment           |
//! | `on_param_add`  | Each axis assignment during merge; may consume it        |
//! | `on_apply`      | Execution time, after presets, before submission         |
//! | `on_pre_run`    | Once, before the first cell of a real run                |
//! | `on_pre_dry`    | Once, before the first cell of a dry run                 |
//! | `on_post_dry`   | Per cell of a dry run, with the final parameters         |

use std::sync::Arc;

use serde_json::Value;

use crate::error::{GridError, GridResult};
use crate::expander::Cell;
use crate::grid::{Grid, GridSizing};
use crate::params::{
    raw_value_text, ParamSet, PromptReplacement, PARAM_ASPECT_RATIO, PARAM_HEIGHT,
    PARAM_OUT_HEIGHT, PARAM_OUT_WIDTH, PARAM_PROMPT_REPLACE, PARAM_WIDTH,
};
use crate::resolution::{
    aspect_ratio_reference, fit_to_pixel_count, validate_dimension, validate_dimensions,
};

pub trait GridHooks: Send + Sync {
    fn on_cell_init(&self, _cell: &mut Cell) {}

    /// Returns `true` when the assignment was consumed and must not be set
    /// on the cell's parameters.
    fn on_param_add(
        &self,
        _cell: &mut Cell,
        _sizing: &mut GridSizing,
        _base: &ParamSet,
        _name: &str,
        _value: &Value,
    ) -> GridResult<bool> {
        Ok(false)
    }

    fn on_apply(&self, _cell: &Cell, _params: &mut ParamSet, _dry: bool) {}

    fn on_pre_run(&self, _grid: &Grid) {}

    fn on_pre_dry(&self, _grid: &Grid) {}

    fn on_post_dry(&self, _cell: &Cell, _params: &ParamSet) {}
}

/// Ordered set of hooks; every stage visits them in registration order.
#[derive(Clone, Default)]
pub struct HookPipeline {
    hooks: Vec<Arc<dyn GridHooks>>,
}

impl HookPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pipeline holding only [`BuiltinHooks`].
    pub fn builtin() -> Self {
        Self::new().with(Arc::new(BuiltinHooks))
    }

    pub fn with(mut self, hook: Arc<dyn GridHooks>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn on_cell_init(&self, cell: &mut Cell) {
        for hook in &self.hooks {
            hook.on_cell_init(cell);
        }
    }

    /// Stops at the first hook that consumes the assignment.
    pub fn on_param_add(
        &self,
        cell: &mut Cell,
        sizing: &mut GridSizing,
        base: &ParamSet,
        name: &str,
        value: &Value,
    ) -> GridResult<bool> {
        for hook in &self.hooks {
            if hook.on_param_add(cell, sizing, base, name, value)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn on_apply(&self, cell: &Cell, params: &mut ParamSet, dry: bool) {
        for hook in &self.hooks {
            hook.on_apply(cell, params, dry);
        }
    }

    pub fn on_pre_run(&self, grid: &Grid) {
        for hook in &self.hooks {
            hook.on_pre_run(grid);
        }
    }

    pub fn on_pre_dry(&self, grid: &Grid) {
        for hook in &self.hooks {
            hook.on_pre_dry(grid);
        }
    }

    pub fn on_post_dry(&self, cell: &Cell, params: &ParamSet) {
        for hook in &self.hooks {
            hook.on_post_dry(cell, params);
        }
    }
}

impl std::fmt::Debug for HookPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookPipeline")
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

/// Prompt replacement, size narrowing and aspect-ratio propagation.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinHooks;

impl GridHooks for BuiltinHooks {
    fn on_param_add(
        &self,
        cell: &mut Cell,
        sizing: &mut GridSizing,
        base: &ParamSet,
        name: &str,
        value: &Value,
    ) -> GridResult<bool> {
        let text = raw_value_text(value);
        match name {
            PARAM_PROMPT_REPLACE => {
                cell.replacements.push(PromptReplacement::parse(&text)?);
                return Ok(true);
            }
            PARAM_WIDTH | PARAM_OUT_WIDTH => sizing.narrow_width(parse_dimension(name, &text)?),
            PARAM_HEIGHT | PARAM_OUT_HEIGHT => sizing.narrow_height(parse_dimension(name, &text)?),
            PARAM_ASPECT_RATIO => {
                if let Some((w, h)) = aspect_ratio_reference(&text) {
                    let target = base.image_width() as u64 * base.image_height() as u64;
                    let (width, height) = fit_to_pixel_count(w, h, target);
                    validate_dimensions(width as i64, height as i64)?;
                    sizing.narrow_width(width);
                    sizing.narrow_height(height);
                    cell.params.set(PARAM_WIDTH, width);
                    cell.params.set(PARAM_HEIGHT, height);
                }
            }
            _ => {}
        }
        Ok(false)
    }

    fn on_apply(&self, cell: &Cell, params: &mut ParamSet, _dry: bool) {
        for replacement in &cell.replacements {
            replacement.apply(params);
        }
    }
}

fn parse_dimension(name: &str, text: &str) -> GridResult<u32> {
    let value = text.trim().parse::<i64>().map_err(|_| {
        GridError::Configuration(format!("Invalid value '{text}' for parameter '{name}'"))
    })?;
    validate_dimension(name, value)
}
