// SPDX-License-Identifier: AGPL-3.0-or-later

//! Column diff planning: what happens to every existing column and which
//! columns get appended.

use crate::dsdef::ColumnSpec;
use crate::error::{try_vec, ModifyError, Result};
use std::collections::HashSet;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnOp {
    /// Copy source column `i` into the next destination slot.
    Keep(usize),
    /// Skip source column `i`.
    Drop(usize),
    /// Append a new column whose history is all unknown.
    Add(ColumnSpec),
}

/// One entry per existing column, in source order, followed by one entry
/// per addition, in request order.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnPlan {
    ops: Vec<ColumnOp>,
    source_columns: usize,
    output_columns: usize,
}

impl ColumnPlan {
    /// Plans the change. Removal names that match nothing are ignored; every
    /// addition is parsed and must not collide with a surviving column or an
    /// earlier addition.
    pub fn build<N: AsRef<str>>(existing: &[N], remove: &[String], add: &[String]) -> Result<Self> {
        let mut ops = try_vec(existing.len() + add.len(), "column plan")?;
        let mut names: HashSet<&str> = HashSet::with_capacity(existing.len() + add.len());
        for (i, name) in existing.iter().enumerate() {
            let name = name.as_ref();
            if remove.iter().any(|r| r == name) {
                ops.push(ColumnOp::Drop(i));
            } else {
                names.insert(name);
                ops.push(ColumnOp::Keep(i));
            }
        }
        for unmatched in remove
            .iter()
            .filter(|r| !existing.iter().any(|n| n.as_ref() == r.as_str()))
        {
            debug!(name = %unmatched, "removal matches no column, ignored");
        }

        let mut added: Vec<ColumnSpec> = try_vec(add.len(), "column plan")?;
        for text in add {
            let spec = ColumnSpec::parse(text)?;
            if names.contains(spec.name.as_str()) || added.iter().any(|a| a.name == spec.name) {
                return Err(ModifyError::DuplicateColumnName(spec.name));
            }
            added.push(spec);
        }
        ops.extend(added.into_iter().map(ColumnOp::Add));

        let plan = Self::from_ops(ops, existing.len());
        debug!(
            kept = plan.kept(),
            dropped = plan.dropped(),
            added = plan.added(),
            "column plan ready"
        );
        Ok(plan)
    }

    fn from_ops(ops: Vec<ColumnOp>, source_columns: usize) -> Self {
        let output_columns = ops
            .iter()
            .filter(|op| !matches!(op, ColumnOp::Drop(_)))
            .count();
        Self {
            ops,
            source_columns,
            output_columns,
        }
    }

    pub fn ops(&self) -> &[ColumnOp] {
        &self.ops
    }

    pub fn source_columns(&self) -> usize {
        self.source_columns
    }

    pub fn output_columns(&self) -> usize {
        self.output_columns
    }

    pub fn kept(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, ColumnOp::Keep(_)))
            .count()
    }

    pub fn dropped(&self) -> usize {
        self.source_columns - self.kept()
    }

    pub fn added(&self) -> usize {
        self.output_columns - self.kept()
    }

    /// True when the plan keeps every column and adds none.
    pub fn is_identity(&self) -> bool {
        self.kept() == self.source_columns && self.added() == 0
    }

    /// Destination column names, in destination order.
    pub fn output_names<N: AsRef<str>>(&self, existing: &[N]) -> Vec<String> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                ColumnOp::Keep(i) => existing.get(*i).map(|n| n.as_ref().to_string()),
                ColumnOp::Add(spec) => Some(spec.name.clone()),
                ColumnOp::Drop(_) => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_keep_drop_add_order() {
        let existing = ["a", "b", "c"];
        let plan = ColumnPlan::build(
            &existing,
            &strings(&["b"]),
            &strings(&["DS:x:GAUGE:600:U:U", "DS:y:GAUGE:600:U:U"]),
        )
        .unwrap();
        assert_eq!(plan.ops().len(), 5);
        assert_eq!(plan.ops()[0], ColumnOp::Keep(0));
        assert_eq!(plan.ops()[1], ColumnOp::Drop(1));
        assert_eq!(plan.ops()[2], ColumnOp::Keep(2));
        assert!(matches!(&plan.ops()[3], ColumnOp::Add(s) if s.name == "x"));
        assert!(matches!(&plan.ops()[4], ColumnOp::Add(s) if s.name == "y"));
        assert_eq!(plan.output_columns(), 4);
        assert_eq!((plan.kept(), plan.dropped(), plan.added()), (2, 1, 2));
        assert_eq!(plan.output_names(&existing), vec!["a", "c", "x", "y"]);
    }

    #[test]
    fn test_unknown_removal_ignored() {
        let plan = ColumnPlan::build(&["a"], &strings(&["nope"]), &[]).unwrap();
        assert_eq!(plan.ops(), &[ColumnOp::Keep(0)]);
        assert!(plan.is_identity());
    }

    #[test]
    fn test_add_colliding_with_survivor_fails() {
        let err = ColumnPlan::build(&["in", "out"], &[], &strings(&["DS:out:GAUGE:600:U:U"]))
            .unwrap_err();
        assert!(matches!(err, ModifyError::DuplicateColumnName(n) if n == "out"));
    }

    #[test]
    fn test_add_reusing_dropped_name_allowed() {
        let plan = ColumnPlan::build(
            &["in", "out"],
            &strings(&["out"]),
            &strings(&["DS:out:COUNTER:600:U:U"]),
        )
        .unwrap();
        assert_eq!(plan.output_names(&["in", "out"]), vec!["in", "out"]);
        assert_eq!(plan.dropped(), 1);
        assert!(!plan.is_identity());
    }

    #[test]
    fn test_two_additions_with_same_name_fail() {
        let err = ColumnPlan::build(
            &["a"],
            &[],
            &strings(&["DS:x:GAUGE:600:U:U", "DS:x:GAUGE:300:U:U"]),
        )
        .unwrap_err();
        assert!(matches!(err, ModifyError::DuplicateColumnName(n) if n == "x"));
    }

    #[test]
    fn test_malformed_addition_fails() {
        let err = ColumnPlan::build(&["a"], &[], &strings(&["DS:x:GAUGE"])).unwrap_err();
        assert!(matches!(err, ModifyError::ParseError { .. }));
    }

    #[test]
    fn test_drop_everything() {
        let plan = ColumnPlan::build(&["a", "b"], &strings(&["a", "b"]), &[]).unwrap();
        assert_eq!(plan.output_columns(), 0);
        assert_eq!(plan.source_columns(), 2);
    }
}
