// SPDX-License-Identifier: AGPL-3.0-or-later

//! Row reorder and transcode.
//!
//! An archive is a circular buffer. Its write cursor names the most recently
//! written physical row, so the oldest row sits right after it:
//!
//! ```text
//! on disk      BBBBBBBBBBBBBBBBBBBBBAAAAAAAAAAA
//!              0               cur ^^ start   R
//!
//! linearized   AAAAAAAAAAABBBBBBBBBBBBBBBBBBBBB
//!              0          n                   R     n = R - start
//! ```
//!
//! The block is read as two sequential physical reads that land at their
//! chronological positions, then every row is re-emitted under the
//! destination column layout.

use crate::error::{try_vec, ModifyError, Result};
use crate::format::{read_full, RrdSchema, DNAN};
use crate::matrix::{RowMatrix, VALUE_LEN};
use crate::plan::{ColumnOp, ColumnPlan};
use std::io::Read;
use tracing::debug;

/// Where chronological order begins inside a wrapped archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrapPoint {
    /// Physical index of the oldest row.
    pub start: usize,
    /// Rows from `start` to the end of storage; they come first in time.
    pub head_rows: usize,
}

impl WrapPoint {
    /// `None` for an archive without rows.
    pub fn new(row_count: usize, cur_row: usize) -> Option<Self> {
        let start = cur_row.checked_add(1)?.checked_rem(row_count)?;
        Some(Self {
            start,
            head_rows: row_count - start,
        })
    }
}

/// Reads one archive's `rows × columns` block from `reader` and returns it
/// oldest row first.
pub fn read_chronological<R: Read + ?Sized>(
    reader: &mut R,
    archive: usize,
    rows: usize,
    columns: usize,
    cur_row: usize,
) -> Result<RowMatrix> {
    let wrap = WrapPoint::new(rows, cur_row)
        .ok_or_else(|| ModifyError::InvalidFormat(format!("archive {archive} has no rows")))?;
    let stride = columns
        .checked_mul(VALUE_LEN)
        .ok_or_else(|| ModifyError::InvalidFormat(format!("archive {archive} is too wide")))?;
    let total = RowMatrix::byte_len(rows, columns)
        .ok_or_else(|| ModifyError::InvalidFormat(format!("archive {archive} is too large")))?;

    let mut buf = try_vec(total, "archive read buffer")?;
    buf.resize(total, 0u8);
    let (front, back) = buf.split_at_mut(wrap.head_rows * stride);

    // Physical rows [0, start) are the newest; they land after the head.
    read_part(reader, back, archive, "rows before wrap point")?;
    // Physical rows [start, R) are the oldest; they go to the front.
    read_part(reader, front, archive, "rows from wrap point")?;

    RowMatrix::from_le_bytes(rows, columns, &buf)
}

fn read_part<R: Read + ?Sized>(
    reader: &mut R,
    part: &mut [u8],
    archive: usize,
    what: &str,
) -> Result<()> {
    let got = read_full(reader, part)?;
    if got != part.len() {
        return Err(ModifyError::short_read(
            format!("archive {archive} {what}"),
            part.len(),
            got,
        ));
    }
    Ok(())
}

/// Re-emits every row under the plan's column layout: kept values are copied
/// bit for bit, added columns get the "no data" sentinel.
pub fn transcode_rows(source: &RowMatrix, plan: &ColumnPlan) -> Result<RowMatrix> {
    if source.columns() != plan.source_columns() {
        return Err(ModifyError::InvalidFormat(format!(
            "row block has {} columns, plan expects {}",
            source.columns(),
            plan.source_columns()
        )));
    }
    let mut out = RowMatrix::filled(source.rows(), plan.output_columns(), DNAN)?;
    for row in 0..source.rows() {
        let src = source.row(row);
        let dst = out.row_mut(row);
        let mut slot = 0;
        for op in plan.ops() {
            match op {
                ColumnOp::Keep(i) => {
                    dst[slot] = src[*i];
                    slot += 1;
                }
                ColumnOp::Add(_) => {
                    dst[slot] = DNAN;
                    slot += 1;
                }
                ColumnOp::Drop(_) => {}
            }
        }
    }
    Ok(out)
}

/// Reads every archive of `schema` from `reader`, which must be positioned at
/// the start of the row storage, and returns the destination blocks in
/// archive order.
pub fn transcode_archives<R: Read + ?Sized>(
    reader: &mut R,
    schema: &RrdSchema,
    plan: &ColumnPlan,
) -> Result<Vec<RowMatrix>> {
    let mut out = try_vec(schema.rra_cnt(), "archive blocks")?;
    for archive in 0..schema.rra_cnt() {
        let rows = schema.rows(archive)?;
        let cur_row = usize::try_from(schema.rra_ptrs[archive].cur_row).map_err(|_| {
            ModifyError::InvalidFormat(format!("archive {archive} cursor out of range"))
        })?;
        let linear = read_chronological(reader, archive, rows, schema.ds_cnt(), cur_row)?;
        let block = transcode_rows(&linear, plan)?;
        debug!(
            archive,
            rows,
            cur_row,
            columns_in = linear.columns(),
            columns_out = block.columns(),
            "archive transcoded"
        );
        out.push(block);
    }
    Ok(out)
}
