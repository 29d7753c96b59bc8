// SPDX-License-Identifier: AGPL-3.0-or-later

//! Parsing of `DS:<name>:<type>:<heartbeat>:<min>:<max>` column definitions.

use crate::error::{ModifyError, Result};
use crate::format::{
    DsDef, FixedStr, Unival, DS_MAX_VAL, DS_MIN_VAL, DS_MRHB_CNT, DNAN, NAME_LEN, PAR_SLOTS,
};
use std::fmt;

pub const DS_PREFIX: &str = "DS:";

/// Longest name a column definition record can hold.
pub const MAX_NAME_LEN: usize = NAME_LEN - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceType {
    Gauge,
    Counter,
    Derive,
    Absolute,
    DCounter,
    DDerive,
    Compute,
}

impl SourceType {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "GAUGE" => Some(Self::Gauge),
            "COUNTER" => Some(Self::Counter),
            "DERIVE" => Some(Self::Derive),
            "ABSOLUTE" => Some(Self::Absolute),
            "DCOUNTER" => Some(Self::DCounter),
            "DDERIVE" => Some(Self::DDerive),
            "COMPUTE" => Some(Self::Compute),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gauge => "GAUGE",
            Self::Counter => "COUNTER",
            Self::Derive => "DERIVE",
            Self::Absolute => "ABSOLUTE",
            Self::DCounter => "DCOUNTER",
            Self::DDerive => "DDERIVE",
            Self::Compute => "COMPUTE",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated column addition.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub name: String,
    pub source_type: SourceType,
    /// Seconds without an update before the value becomes unknown.
    pub heartbeat: u64,
    /// `NaN` when unbounded.
    pub min: f64,
    pub max: f64,
}

impl ColumnSpec {
    /// Parses one definition; the `DS:` prefix is optional.
    pub fn parse(text: &str) -> Result<Self> {
        let err = |reason: &str| ModifyError::ParseError {
            definition: text.to_string(),
            reason: reason.to_string(),
        };
        let body = text.strip_prefix(DS_PREFIX).unwrap_or(text);
        let fields: Vec<&str> = body.split(':').collect();
        let name = fields[0];
        if !is_valid_name(name) {
            return Err(err(&format!(
                "name must be 1 to {MAX_NAME_LEN} characters of [A-Za-z0-9_]"
            )));
        }
        let type_name = fields
            .get(1)
            .ok_or_else(|| err("missing data source type"))?;
        let source_type = SourceType::from_name(type_name)
            .ok_or_else(|| err(&format!("unknown data source type '{type_name}'")))?;
        if source_type == SourceType::Compute {
            return Err(err("COMPUTE data sources cannot be added"));
        }
        if fields.len() != 5 {
            return Err(err("expected <name>:<type>:<heartbeat>:<min>:<max>"));
        }
        let heartbeat = fields[2]
            .parse::<u64>()
            .ok()
            .filter(|&hb| hb > 0)
            .ok_or_else(|| err(&format!("invalid heartbeat '{}'", fields[2])))?;
        let min = parse_limit(fields[3]).ok_or_else(|| err(&format!("invalid min '{}'", fields[3])))?;
        let max = parse_limit(fields[4]).ok_or_else(|| err(&format!("invalid max '{}'", fields[4])))?;
        if !min.is_nan() && !max.is_nan() && min >= max {
            return Err(err("min must be less than max"));
        }
        Ok(Self {
            name: name.to_string(),
            source_type,
            heartbeat,
            min,
            max,
        })
    }

    /// The on-disk definition record for this column.
    pub fn to_ds_def(&self) -> Result<DsDef> {
        let name = FixedStr::new(&self.name).ok_or_else(|| ModifyError::ParseError {
            definition: self.to_string(),
            reason: "name does not fit the definition record".to_string(),
        })?;
        let mut par = [Unival::ZERO; PAR_SLOTS];
        par[DS_MRHB_CNT] = Unival::from_count(self.heartbeat);
        par[DS_MIN_VAL] = Unival::from_value(self.min);
        par[DS_MAX_VAL] = Unival::from_value(self.max);
        Ok(DsDef {
            name,
            // Type names are at most 8 characters.
            dst: FixedStr::new(self.source_type.as_str()).unwrap_or_default(),
            par,
        })
    }
}

impl fmt::Display for ColumnSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{DS_PREFIX}{}:{}:{}:{}:{}",
            self.name,
            self.source_type,
            self.heartbeat,
            fmt_limit(self.min),
            fmt_limit(self.max)
        )
    }
}

pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

fn parse_limit(field: &str) -> Option<f64> {
    if field == "U" {
        return Some(DNAN);
    }
    field.parse::<f64>().ok().filter(|v| !v.is_nan())
}

fn fmt_limit(value: f64) -> String {
    if value.is_nan() {
        "U".to_string()
    } else {
        value.to_string()
    }
}
