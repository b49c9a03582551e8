//! Cell storage implementation
//!
//! Sparse row-based storage. Unlike a pure value map, rows and blank cells
//! that were explicitly addressed stay allocated, so a caller that asks for
//! a coordinate gets the same slot back on every later request.

use std::collections::BTreeMap;

use super::CellValue;

/// Data held for a single cell
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CellData {
    /// The cell's value
    pub value: CellValue,
}

impl CellData {
    pub fn new(value: CellValue) -> Self {
        Self { value }
    }

    /// A blank cell slot
    pub fn blank() -> Self {
        Self::default()
    }

    pub fn is_blank(&self) -> bool {
        self.value.is_empty()
    }
}

/// Sparse row-based storage for worksheet cells
///
/// Structure: `BTreeMap<row_index, BTreeMap<col_index, CellData>>`. An
/// allocated row may hold no cells.
#[derive(Debug, Default)]
pub struct CellStorage {
    rows: BTreeMap<u32, BTreeMap<u16, CellData>>,
}

impl CellStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a cell
    pub fn get(&self, row: u32, col: u16) -> Option<&CellData> {
        self.rows.get(&row).and_then(|r| r.get(&col))
    }

    /// Get a mutable cell
    pub fn get_mut(&mut self, row: u32, col: u16) -> Option<&mut CellData> {
        self.rows.get_mut(&row).and_then(|r| r.get_mut(&col))
    }

    /// Whether a row has been allocated
    pub fn has_row(&self, row: u32) -> bool {
        self.rows.contains_key(&row)
    }

    /// Allocate an empty row if it does not exist yet.
    ///
    /// Returns `true` if the row was created.
    pub fn ensure_row(&mut self, row: u32) -> bool {
        if self.rows.contains_key(&row) {
            return false;
        }
        self.rows.insert(row, BTreeMap::new());
        true
    }

    /// Get a cell, creating the row and a blank cell when missing
    pub fn get_or_create(&mut self, row: u32, col: u16) -> &mut CellData {
        self.rows.entry(row).or_default().entry(col).or_default()
    }

    /// Set just the cell value, allocating the slot if needed
    pub fn set_value(&mut self, row: u32, col: u16, value: CellValue) {
        self.get_or_create(row, col).value = value;
    }

    /// Remove a cell. The row stays allocated.
    pub fn remove(&mut self, row: u32, col: u16) -> Option<CellData> {
        self.rows.get_mut(&row).and_then(|r| r.remove(&col))
    }

    /// Number of allocated cells, blank ones included
    pub fn cell_count(&self) -> usize {
        self.rows.values().map(BTreeMap::len).sum()
    }

    /// Number of allocated rows
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Get the bounds of allocated cells
    ///
    /// Returns (min_row, min_col, max_row, max_col) or None if no cell exists
    pub fn used_bounds(&self) -> Option<(u32, u16, u32, u16)> {
        let mut bounds: Option<(u32, u16, u32, u16)> = None;

        for (&row, cols) in &self.rows {
            let (Some(&first), Some(&last)) = (cols.keys().next(), cols.keys().next_back())
            else {
                continue;
            };
            bounds = Some(match bounds {
                None => (row, first, row, last),
                Some((min_row, min_col, _, max_col)) => {
                    (min_row, min_col.min(first), row, max_col.max(last))
                }
            });
        }

        bounds
    }

    /// Iterate over all cells in row order
    pub fn iter(&self) -> impl Iterator<Item = (u32, u16, &CellData)> {
        self.rows
            .iter()
            .flat_map(|(&row, cols)| cols.iter().map(move |(&col, data)| (row, col, data)))
    }

    /// Iterate over cells in a specific row
    pub fn iter_row(&self, row: u32) -> impl Iterator<Item = (u16, &CellData)> {
        self.rows
            .get(&row)
            .into_iter()
            .flat_map(|cols| cols.iter().map(|(&col, data)| (col, data)))
    }

    /// Iterate over allocated row indices
    pub fn row_indices(&self) -> impl Iterator<Item = u32> + '_ {
        self.rows.keys().copied()
    }
}
