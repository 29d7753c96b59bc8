// SPDX-License-Identifier: AGPL-3.0-or-later

//! Builds the destination schema from the source schema and a column plan.
//!
//! Archive definitions pass through untouched. Column definitions and
//! accumulation states follow the plan; consolidation states are shuffled
//! per archive, never across archives. Every write cursor is reset to row 0
//! because the destination rows are written oldest first.

use crate::error::{try_vec, ModifyError, Result};
use crate::format::{CdpPrep, DsDef, PdpPrep, RraDef, RraPtr, RrdSchema, StatHead};
use crate::plan::{ColumnOp, ColumnPlan};
use tracing::debug;

/// Write cursor given to every rebuilt archive.
pub const LINEARIZED_CURSOR: RraPtr = RraPtr { cur_row: 0 };

/// Destination column definitions and their accumulation states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSet {
    pub defs: Vec<DsDef>,
    pub prep: Vec<PdpPrep>,
}

/// Destination archive definitions, cursors and consolidation blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSet {
    pub defs: Vec<RraDef>,
    pub ptrs: Vec<RraPtr>,
    pub cdp_prep: Vec<CdpPrep>,
}

pub fn rebuild_schema(source: &RrdSchema, plan: &ColumnPlan) -> Result<RrdSchema> {
    check_plan(source, plan)?;
    let columns = rebuild_columns(source, plan)?;
    let archives = rebuild_archives(source, plan)?;
    Ok(RrdSchema {
        head: StatHead {
            pdp_step: source.head.pdp_step,
            par: source.head.par,
        },
        live: source.live,
        ds_defs: columns.defs,
        pdp_prep: columns.prep,
        rra_defs: archives.defs,
        rra_ptrs: archives.ptrs,
        cdp_prep: archives.cdp_prep,
    })
}

/// Kept columns are copied with their accumulation state; added columns
/// start with an unknown last value and as many unknown seconds as have
/// passed since the last step boundary.
pub fn rebuild_columns(source: &RrdSchema, plan: &ColumnPlan) -> Result<ColumnSet> {
    check_plan(source, plan)?;
    let step = i64::try_from(source.head.pdp_step)
        .ok()
        .filter(|&s| s > 0)
        .ok_or_else(|| {
            ModifyError::InvalidFormat(format!("step {} out of range", source.head.pdp_step))
        })?;
    let unknown_secs = source.live.last_up.rem_euclid(step) as u64;

    let mut defs = try_vec(plan.output_columns(), "column definitions")?;
    let mut prep = try_vec(plan.output_columns(), "accumulation states")?;
    for op in plan.ops() {
        match op {
            ColumnOp::Keep(i) => {
                defs.push(source.ds_defs[*i]);
                prep.push(source.pdp_prep[*i]);
            }
            ColumnOp::Add(spec) => {
                defs.push(spec.to_ds_def()?);
                prep.push(PdpPrep::unknown(unknown_secs));
            }
            ColumnOp::Drop(_) => {}
        }
    }
    Ok(ColumnSet { defs, prep })
}

pub fn rebuild_archives(source: &RrdSchema, plan: &ColumnPlan) -> Result<ArchiveSet> {
    check_plan(source, plan)?;
    let rra_cnt = source.rra_cnt();
    let cdp_cnt = rra_cnt
        .checked_mul(plan.output_columns())
        .ok_or_else(|| ModifyError::InvalidFormat("consolidation block too large".to_string()))?;

    let mut defs = try_vec(rra_cnt, "archive definitions")?;
    let mut ptrs = try_vec(rra_cnt, "write cursors")?;
    let mut cdp_prep = try_vec(cdp_cnt, "consolidation states")?;
    for archive in 0..rra_cnt {
        defs.push(source.rra_defs[archive]);
        ptrs.push(LINEARIZED_CURSOR);
        let block = source.cdp_block(archive);
        for op in plan.ops() {
            match op {
                ColumnOp::Keep(i) => cdp_prep.push(block[*i]),
                ColumnOp::Add(_) => cdp_prep.push(CdpPrep::EMPTY),
                ColumnOp::Drop(_) => {}
            }
        }
        debug!(
            archive,
            cf = %source.rra_defs[archive].cf.as_str(),
            rows = source.rra_defs[archive].row_cnt,
            "archive definition rebuilt"
        );
    }
    Ok(ArchiveSet {
        defs,
        ptrs,
        cdp_prep,
    })
}

fn check_plan(source: &RrdSchema, plan: &ColumnPlan) -> Result<()> {
    if plan.source_columns() != source.ds_cnt() {
        return Err(ModifyError::InvalidFormat(format!(
            "plan covers {} columns, database has {}",
            plan.source_columns(),
            source.ds_cnt()
        )));
    }
    Ok(())
}
