//! Cartesian expansion of a grid into ordered cells.
//!
//! Axis 0 (X) varies fastest and the last axis slowest, so a composite's
//! rows are generated one after another. Ordinals are 1-based. Skipped
//! values take no part in the product.

use serde_json::Value;

use crate::error::{GridError, GridResult};
use crate::grid::{Grid, GridSizing};
use crate::hooks::HookPipeline;
use crate::params::{ParamSet, PromptReplacement};

/// File stem used for the single cell of a grid without axes.
pub const BASE_CELL_STEM: &str = "base";

/// One point of the product and everything needed to run it.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub ordinal: usize,
    /// Axis value keys joined with `/` in axis order.
    pub path_key: String,
    /// Index of the chosen value within each axis's full value list.
    pub value_indices: Vec<usize>,
    pub params: ParamSet,
    /// Accumulated prompt replacements, applied at execution time.
    pub replacements: Vec<PromptReplacement>,
}

impl Cell {
    /// Path key usable as a file stem.
    pub fn file_stem(&self) -> &str {
        if self.path_key.is_empty() {
            BASE_CELL_STEM
        } else {
            &self.path_key
        }
    }
}

#[derive(Debug, Clone)]
pub struct CellPlan {
    pub cells: Vec<Cell>,
    pub sizing: GridSizing,
}

impl CellPlan {
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Expand `grid` into its ordered cells, running each parameter assignment
/// through the `on_param_add` stage of `hooks`.
pub fn expand(grid: &Grid, hooks: &HookPipeline) -> GridResult<CellPlan> {
    let active: Vec<Vec<usize>> = grid
        .axes
        .iter()
        .map(|axis| {
            let idx: Vec<usize> = axis
                .values
                .iter()
                .enumerate()
                .filter(|(_, v)| !v.skip)
                .map(|(i, _)| i)
                .collect();
            if idx.is_empty() {
                Err(GridError::Configuration(format!(
                    "Axis '{}' has no values to generate",
                    axis.title
                )))
            } else {
                Ok(idx)
            }
        })
        .collect::<GridResult<_>>()?;

    let total: usize = active.iter().map(Vec::len).product();
    let mut sizing = GridSizing::from_base(&grid.initial_params);
    let mut cells = Vec::with_capacity(total);

    for n in 0..total {
        let mut rem = n;
        let mut value_indices = Vec::with_capacity(active.len());
        for choices in &active {
            value_indices.push(choices[rem % choices.len()]);
            rem /= choices.len();
        }

        let path_key = grid
            .axes
            .iter()
            .zip(&value_indices)
            .map(|(axis, &i)| axis.values[i].key.as_str())
            .collect::<Vec<_>>()
            .join("/");

        let mut cell = Cell {
            ordinal: n + 1,
            path_key,
            value_indices,
            params: grid.initial_params.clone(),
            replacements: Vec::new(),
        };
        hooks.on_cell_init(&mut cell);

        let chosen = cell.value_indices.clone();
        for (axis, &i) in grid.axes.iter().zip(&chosen) {
            for (name, value) in axis.values[i].params.iter() {
                assign(hooks, &mut cell, &mut sizing, &grid.initial_params, name, value)?;
            }
        }
        cells.push(cell);
    }

    Ok(CellPlan { cells, sizing })
}

fn assign(
    hooks: &HookPipeline,
    cell: &mut Cell,
    sizing: &mut GridSizing,
    base: &ParamSet,
    name: &str,
    value: &Value,
) -> GridResult<()> {
    let consumed = hooks.on_param_add(cell, sizing, base, name, value)?;
    if !consumed {
        cell.params.set(name, value.clone());
    }
    Ok(())
}

/* --------------------------------------------------------------------------
   Tests
   -------------------------------------------------------------------------- */
