// SPDX-License-Identifier: AGPL-3.0-or-later

#![allow(dead_code)]

use rrdkit::format::{
    CdpPrep, DsDef, FixedStr, LiveHead, PdpPrep, RraDef, RraPtr, RrdSchema, StatHead, Unival,
    DS_MAX_VAL, DS_MIN_VAL, DS_MRHB_CNT, PAR_SLOTS, RRA_CDP_XFF_VAL,
};
use rrdkit::matrix::RowMatrix;
use rrdkit::Rrd;
use std::path::{Path, PathBuf};

/// Builds small databases for end-to-end tests.
pub struct Fixture {
    step: u64,
    last_up: i64,
    columns: Vec<String>,
    archives: Vec<(RraDef, u64, RowMatrix)>,
}

impl Fixture {
    pub fn new(columns: &[&str]) -> Self {
        Self {
            step: 300,
            last_up: 1_700_000_100,
            columns: columns.iter().map(|c| c.to_string()).collect(),
            archives: Vec::new(),
        }
    }

    /// Adds an archive with the given physical rows (row-major) and cursor.
    pub fn archive(mut self, cf: &str, rows: &[&[f64]], cur_row: u64) -> Self {
        let width = self.columns.len();
        let values: Vec<f64> = rows.iter().flat_map(|r| r.iter().copied()).collect();
        let block = RowMatrix::from_values(rows.len(), width, values).expect("row shape");
        let def = RraDef::new(cf, rows.len() as u64, 1, 0.5).expect("cf name");
        self.archives.push((def, cur_row, block));
        self
    }

    pub fn build(&self) -> Rrd {
        let ds_defs = self
            .columns
            .iter()
            .map(|name| {
                let mut par = [Unival::ZERO; PAR_SLOTS];
                par[DS_MRHB_CNT] = Unival::from_count(600);
                par[DS_MIN_VAL] = Unival::from_value(f64::NAN);
                par[DS_MAX_VAL] = Unival::from_value(f64::NAN);
                DsDef {
                    name: FixedStr::new(name).expect("name"),
                    dst: FixedStr::new("GAUGE").expect("type"),
                    par,
                }
            })
            .collect::<Vec<_>>();
        let pdp_prep = (0..self.columns.len())
            .map(|i| {
                let mut p = PdpPrep::unknown(i as u64);
                p.last_ds = FixedStr::new(&format!("{}", i + 1)).expect("last_ds");
                p
            })
            .collect();
        let cdp_prep = (0..self.archives.len() * self.columns.len())
            .map(|i| {
                let mut c = CdpPrep::EMPTY;
                c.scratch[RRA_CDP_XFF_VAL] = Unival::from_value(i as f64);
                c
            })
            .collect();
        let schema = RrdSchema {
            head: StatHead {
                pdp_step: self.step,
                par: [Unival::ZERO; PAR_SLOTS],
            },
            live: LiveHead {
                last_up: self.last_up,
                last_up_usec: 0,
            },
            ds_defs,
            pdp_prep,
            rra_defs: self.archives.iter().map(|a| a.0).collect(),
            rra_ptrs: self
                .archives
                .iter()
                .map(|a| RraPtr { cur_row: a.1 })
                .collect(),
            cdp_prep,
        };
        let blocks = self.archives.iter().map(|a| a.2.clone()).collect();
        Rrd::new(schema, blocks).expect("fixture database")
    }

    pub fn bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.build().write_to(&mut out).expect("encode");
        out
    }

    pub fn write(&self, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, self.bytes()).expect("write fixture");
        path
    }
}

/// Directory entries, sorted, for spotting stray temporary files.
pub fn entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .expect("read_dir")
        .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

pub fn bits(values: impl Iterator<Item = f64>) -> Vec<u64> {
    values.map(f64::to_bits).collect()
}
