// SPDX-License-Identifier: AGPL-3.0-or-later

//! Row storage for one archive.
//!
//! Every `(row, column)` coordinate is turned into a linear offset by
//! [`RowMatrix::offset`] and nowhere else; callers work with rows and
//! columns, never with strides.

use crate::error::{try_vec, ModifyError, Result};
use std::io::{self, Write};

/// Size of one stored sample.
pub const VALUE_LEN: usize = 8;

/// A `rows × columns` block of samples, row-major, column-minor.
#[derive(Debug, Clone, PartialEq)]
pub struct RowMatrix {
    rows: usize,
    columns: usize,
    values: Vec<f64>,
}

impl RowMatrix {
    /// Number of values a `rows × columns` block holds, if it fits in memory.
    pub fn value_count(rows: usize, columns: usize) -> Option<usize> {
        rows.checked_mul(columns)
    }

    /// Number of bytes a `rows × columns` block occupies on disk.
    pub fn byte_len(rows: usize, columns: usize) -> Option<usize> {
        Self::value_count(rows, columns)?.checked_mul(VALUE_LEN)
    }

    /// A block with every cell set to `value`.
    pub fn filled(rows: usize, columns: usize, value: f64) -> Result<Self> {
        let count = Self::value_count(rows, columns).ok_or_else(|| {
            ModifyError::InvalidFormat(format!("{rows} x {columns} archive is too large"))
        })?;
        let mut values = try_vec(count, "archive rows")?;
        values.resize(count, value);
        Ok(Self {
            rows,
            columns,
            values,
        })
    }

    /// Wraps row-major `values`; the length must be exactly `rows × columns`.
    pub fn from_values(rows: usize, columns: usize, values: Vec<f64>) -> Option<Self> {
        if Self::value_count(rows, columns)? != values.len() {
            return None;
        }
        Some(Self {
            rows,
            columns,
            values,
        })
    }

    /// Decodes little-endian samples; `bytes` must hold exactly one block.
    pub fn from_le_bytes(rows: usize, columns: usize, bytes: &[u8]) -> Result<Self> {
        let expected = Self::byte_len(rows, columns).ok_or_else(|| {
            ModifyError::InvalidFormat(format!("{rows} x {columns} archive is too large"))
        })?;
        if bytes.len() != expected {
            return Err(ModifyError::short_read("archive rows", expected, bytes.len()));
        }
        let mut values = try_vec(expected / VALUE_LEN, "archive rows")?;
        values.extend(bytes.chunks_exact(VALUE_LEN).map(|chunk| {
            let mut raw = [0u8; VALUE_LEN];
            raw.copy_from_slice(chunk);
            f64::from_le_bytes(raw)
        }));
        Ok(Self {
            rows,
            columns,
            values,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    fn offset(&self, row: usize, column: usize) -> Option<usize> {
        if row >= self.rows || column >= self.columns {
            return None;
        }
        Some(row * self.columns + column)
    }

    pub fn get(&self, row: usize, column: usize) -> Option<f64> {
        self.offset(row, column).map(|idx| self.values[idx])
    }

    /// All cells of `row`; panics if `row` is out of range.
    pub fn row(&self, row: usize) -> &[f64] {
        let start = self.row_start(row);
        &self.values[start..start + self.columns]
    }

    pub fn row_mut(&mut self, row: usize) -> &mut [f64] {
        let start = self.row_start(row);
        &mut self.values[start..start + self.columns]
    }

    fn row_start(&self, row: usize) -> usize {
        assert!(
            row < self.rows,
            "row {row} out of range for {} rows",
            self.rows
        );
        row * self.columns
    }

    /// The history of one column, oldest stored row first.
    pub fn column(&self, column: usize) -> impl Iterator<Item = f64> + '_ {
        (0..self.rows).filter_map(move |row| self.get(row, column))
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    /// Writes the block as little-endian samples, bit patterns untouched.
    pub fn write_le<W: Write + ?Sized>(&self, out: &mut W) -> io::Result<()> {
        let mut buf = Vec::with_capacity(self.columns * VALUE_LEN);
        for row in 0..self.rows {
            buf.clear();
            for value in self.row(row) {
                buf.extend_from_slice(&value.to_le_bytes());
            }
            out.write_all(&buf)?;
        }
        Ok(())
    }
}
