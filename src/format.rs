// SPDX-License-Identifier: AGPL-3.0-or-later

//! Typed records of a version 3 round-robin database file.
//!
//! Layout, in file order (little-endian, 64-bit record packing):
//!
//! ```text
//! header            128 B
//! ds_def[ds]        120 B each
//! rra_def[rra]      120 B each
//! live_head          16 B
//! pdp_prep[ds]      112 B each
//! cdp_prep[rra*ds]   80 B each, archive-major
//! rra_ptr[rra]        8 B each
//! values            row_cnt*ds f64 per archive, physical row order
//! ```

use crate::error::{try_vec, ModifyError, Result};
use crate::matrix::RowMatrix;
use memmap2::{Mmap, MmapOptions};
use std::borrow::Cow;
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

pub const COOKIE: &[u8; 4] = b"RRD\0";
pub const SUPPORTED_VERSION: &str = "0003";
pub const FLOAT_COOKIE: f64 = 8.642135E130;

/// The "no data" sample. Its bit pattern is the canonical quiet NaN.
pub const DNAN: f64 = f64::NAN;

pub const NAME_LEN: usize = 20;
pub const LAST_DS_LEN: usize = 30;
pub const PAR_SLOTS: usize = 10;

/// Parameter slots of a column definition.
pub const DS_MRHB_CNT: usize = 0;
pub const DS_MIN_VAL: usize = 1;
pub const DS_MAX_VAL: usize = 2;

/// Scratch slots of an accumulation state.
pub const PDP_UNKN_SEC_CNT: usize = 0;
pub const PDP_VAL: usize = 1;

/// Parameter slot of an archive definition holding the x-files factor.
pub const RRA_CDP_XFF_VAL: usize = 0;

/// Last raw value text meaning "unknown".
pub const UNKNOWN_LAST_DS: &str = "U";

const STAT_HEAD_LEN: usize = 128;
const DS_DEF_LEN: usize = 120;
const RRA_DEF_LEN: usize = 120;
const LIVE_HEAD_LEN: usize = 16;
const PDP_PREP_LEN: usize = 112;
const CDP_PREP_LEN: usize = 80;
const RRA_PTR_LEN: usize = 8;

/// Upper bound on records reserved before any of them has been read.
const RESERVE_RECORDS: usize = 4096;

/// One opaque 8-byte parameter cell. Cells are copied bit for bit; the
/// accessors only interpret them.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Unival([u8; 8]);

impl Unival {
    pub const ZERO: Self = Self([0; 8]);

    pub fn from_count(count: u64) -> Self {
        Self(count.to_le_bytes())
    }

    pub fn from_value(value: f64) -> Self {
        Self(value.to_le_bytes())
    }

    pub fn count(self) -> u64 {
        u64::from_le_bytes(self.0)
    }

    pub fn value(self) -> f64 {
        f64::from_le_bytes(self.0)
    }
}

impl fmt::Debug for Unival {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unival({:#018x})", self.count())
    }
}

/// NUL-padded fixed-width text field. Bytes past the first NUL are kept so
/// copied records stay byte-identical.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FixedStr<const N: usize>([u8; N]);

impl<const N: usize> FixedStr<N> {
    /// `None` if `text` does not fit with its terminating NUL or contains NUL.
    pub fn new(text: &str) -> Option<Self> {
        let bytes = text.as_bytes();
        if bytes.len() >= N || bytes.contains(&0) {
            return None;
        }
        let mut buf = [0u8; N];
        buf[..bytes.len()].copy_from_slice(bytes);
        Some(Self(buf))
    }

    pub fn as_str(&self) -> Cow<'_, str> {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(N);
        String::from_utf8_lossy(&self.0[..end])
    }
}

impl<const N: usize> Default for FixedStr<N> {
    fn default() -> Self {
        Self([0; N])
    }
}

impl<const N: usize> fmt::Debug for FixedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

/// Static header. Column and archive counts are not stored here; they are
/// the lengths of the record lists in [`RrdSchema`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatHead {
    pub pdp_step: u64,
    pub par: [Unival; PAR_SLOTS],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DsDef {
    pub name: FixedStr<NAME_LEN>,
    pub dst: FixedStr<NAME_LEN>,
    pub par: [Unival; PAR_SLOTS],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RraDef {
    pub cf: FixedStr<NAME_LEN>,
    pub row_cnt: u64,
    pub pdp_cnt: u64,
    pub par: [Unival; PAR_SLOTS],
}

impl RraDef {
    /// An archive definition keeping `row_cnt` rows, each consolidating
    /// `pdp_cnt` primary data points.
    pub fn new(cf: &str, row_cnt: u64, pdp_cnt: u64, xff: f64) -> Option<Self> {
        let mut par = [Unival::ZERO; PAR_SLOTS];
        par[RRA_CDP_XFF_VAL] = Unival::from_value(xff);
        Some(Self {
            cf: FixedStr::new(cf)?,
            row_cnt,
            pdp_cnt,
            par,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LiveHead {
    pub last_up: i64,
    pub last_up_usec: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdpPrep {
    pub last_ds: FixedStr<LAST_DS_LEN>,
    pub scratch: [Unival; PAR_SLOTS],
}

impl PdpPrep {
    /// Fresh state: last value unknown, zero running value, and
    /// `unknown_secs` of unknown time already accumulated.
    pub fn unknown(unknown_secs: u64) -> Self {
        let mut scratch = [Unival::ZERO; PAR_SLOTS];
        scratch[PDP_UNKN_SEC_CNT] = Unival::from_count(unknown_secs);
        scratch[PDP_VAL] = Unival::from_value(0.0);
        let mut last_ds = FixedStr::default();
        last_ds.0[..UNKNOWN_LAST_DS.len()].copy_from_slice(UNKNOWN_LAST_DS.as_bytes());
        Self { last_ds, scratch }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CdpPrep {
    pub scratch: [Unival; PAR_SLOTS],
}

impl CdpPrep {
    pub const EMPTY: Self = Self {
        scratch: [Unival::ZERO; PAR_SLOTS],
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RraPtr {
    pub cur_row: u64,
}

/// Everything in the file ahead of the row storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RrdSchema {
    pub head: StatHead,
    pub live: LiveHead,
    pub ds_defs: Vec<DsDef>,
    pub pdp_prep: Vec<PdpPrep>,
    pub rra_defs: Vec<RraDef>,
    pub rra_ptrs: Vec<RraPtr>,
    /// `rra_defs.len() * ds_defs.len()` records, archive-major.
    pub cdp_prep: Vec<CdpPrep>,
}

impl RrdSchema {
    pub fn ds_cnt(&self) -> usize {
        self.ds_defs.len()
    }

    pub fn rra_cnt(&self) -> usize {
        self.rra_defs.len()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.ds_defs
            .iter()
            .map(|ds| ds.name.as_str().into_owned())
            .collect()
    }

    /// Consolidation records of one archive, in column order.
    pub fn cdp_block(&self, archive: usize) -> &[CdpPrep] {
        let ds = self.ds_cnt();
        &self.cdp_prep[archive * ds..(archive + 1) * ds]
    }

    pub fn rows(&self, archive: usize) -> Result<usize> {
        usize::try_from(self.rra_defs[archive].row_cnt).map_err(|_| {
            ModifyError::InvalidFormat(format!("archive {archive} row count does not fit in memory"))
        })
    }

    /// Bytes of row storage the archives declare, all archives together.
    pub fn row_storage_len(&self) -> Result<usize> {
        let too_large = || ModifyError::InvalidFormat("row storage size overflows".to_string());
        (0..self.rra_cnt()).try_fold(0usize, |total, archive| {
            let block = RowMatrix::byte_len(self.rows(archive)?, self.ds_cnt()).ok_or_else(too_large)?;
            total.checked_add(block).ok_or_else(too_large)
        })
    }

    /// Decodes the schema at the start of `bytes` and returns it with the
    /// row storage that follows. Fails with `ShortRead` when the declared
    /// archives need more bytes than are present, before any row buffer is
    /// allocated.
    pub fn from_bytes(bytes: &[u8]) -> Result<(Self, &[u8])> {
        let mut rest = bytes;
        let schema = Self::read_from(&mut rest)?;
        let needed = schema.row_storage_len()?;
        if rest.len() < needed {
            return Err(ModifyError::short_read("row storage", needed, rest.len()));
        }
        Ok((schema, rest))
    }

    /// Checks that every list length agrees with the counts and that every
    /// write cursor points inside its archive.
    pub fn validate(&self) -> Result<()> {
        if self.head.pdp_step == 0 {
            return Err(ModifyError::InvalidFormat("step is zero".to_string()));
        }
        let ds = self.ds_cnt();
        let rra = self.rra_cnt();
        if self.pdp_prep.len() != ds {
            return Err(ModifyError::InvalidFormat(format!(
                "{} accumulation records for {ds} columns",
                self.pdp_prep.len()
            )));
        }
        if self.rra_ptrs.len() != rra {
            return Err(ModifyError::InvalidFormat(format!(
                "{} write cursors for {rra} archives",
                self.rra_ptrs.len()
            )));
        }
        if Some(self.cdp_prep.len()) != rra.checked_mul(ds) {
            return Err(ModifyError::InvalidFormat(format!(
                "{} consolidation records for {rra} archives x {ds} columns",
                self.cdp_prep.len()
            )));
        }
        for (i, (def, ptr)) in self.rra_defs.iter().zip(&self.rra_ptrs).enumerate() {
            if def.row_cnt == 0 {
                return Err(ModifyError::InvalidFormat(format!("archive {i} has no rows")));
            }
            if ptr.cur_row >= def.row_cnt {
                return Err(ModifyError::InvalidFormat(format!(
                    "archive {i} cursor {} outside {} rows",
                    ptr.cur_row, def.row_cnt
                )));
            }
        }
        Ok(())
    }

    /// Reads and validates everything up to the first archive's rows.
    /// The version is checked before anything past the header is read.
    pub fn read_from<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        let raw: [u8; STAT_HEAD_LEN] = read_record(reader, "header")?;
        let mut f = Fields::new(&raw);
        let cookie: [u8; 4] = f.take();
        if &cookie != COOKIE {
            return Err(ModifyError::InvalidFormat("not a round-robin database file".to_string()));
        }
        let version: FixedStr<5> = FixedStr(f.take());
        if version.as_str() != SUPPORTED_VERSION {
            return Err(ModifyError::UnsupportedVersion {
                found: version.as_str().into_owned(),
                supported: SUPPORTED_VERSION,
            });
        }
        f.skip(7);
        if f.f64() != FLOAT_COOKIE {
            return Err(ModifyError::InvalidFormat(
                "float cookie mismatch, file written on an incompatible platform".to_string(),
            ));
        }
        let ds_cnt = to_count(f.u64(), "column count")?;
        let rra_cnt = to_count(f.u64(), "archive count")?;
        let head = StatHead {
            pdp_step: f.u64(),
            par: f.univals(),
        };
        let cdp_cnt = rra_cnt
            .checked_mul(ds_cnt)
            .ok_or_else(|| ModifyError::InvalidFormat("record counts overflow".to_string()))?;

        let ds_defs = read_list(reader, ds_cnt, "column definitions", decode_ds_def)?;
        let rra_defs = read_list(reader, rra_cnt, "archive definitions", decode_rra_def)?;
        let live = decode_live_head(&read_record(reader, "live header")?);
        let pdp_prep = read_list(reader, ds_cnt, "accumulation states", decode_pdp_prep)?;
        let cdp_prep = read_list(reader, cdp_cnt, "consolidation states", decode_cdp_prep)?;
        let rra_ptrs = read_list(reader, rra_cnt, "write cursors", decode_rra_ptr)?;

        let schema = Self {
            head,
            live,
            ds_defs,
            pdp_prep,
            rra_defs,
            rra_ptrs,
            cdp_prep,
        };
        schema.validate()?;
        Ok(schema)
    }

    pub fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> io::Result<()> {
        let mut buf = Vec::with_capacity(
            STAT_HEAD_LEN
                + self.ds_cnt() * (DS_DEF_LEN + PDP_PREP_LEN)
                + self.rra_cnt() * (RRA_DEF_LEN + RRA_PTR_LEN)
                + self.cdp_prep.len() * CDP_PREP_LEN
                + LIVE_HEAD_LEN,
        );
        buf.extend_from_slice(COOKIE);
        buf.extend_from_slice(SUPPORTED_VERSION.as_bytes());
        buf.push(0);
        buf.extend_from_slice(&[0u8; 7]);
        buf.extend_from_slice(&FLOAT_COOKIE.to_le_bytes());
        buf.extend_from_slice(&(self.ds_cnt() as u64).to_le_bytes());
        buf.extend_from_slice(&(self.rra_cnt() as u64).to_le_bytes());
        buf.extend_from_slice(&self.head.pdp_step.to_le_bytes());
        put_univals(&mut buf, &self.head.par);

        for ds in &self.ds_defs {
            buf.extend_from_slice(&ds.name.0);
            buf.extend_from_slice(&ds.dst.0);
            put_univals(&mut buf, &ds.par);
        }
        for rra in &self.rra_defs {
            buf.extend_from_slice(&rra.cf.0);
            buf.extend_from_slice(&[0u8; 4]);
            buf.extend_from_slice(&rra.row_cnt.to_le_bytes());
            buf.extend_from_slice(&rra.pdp_cnt.to_le_bytes());
            put_univals(&mut buf, &rra.par);
        }
        buf.extend_from_slice(&self.live.last_up.to_le_bytes());
        buf.extend_from_slice(&self.live.last_up_usec.to_le_bytes());
        for pdp in &self.pdp_prep {
            buf.extend_from_slice(&pdp.last_ds.0);
            buf.extend_from_slice(&[0u8; 2]);
            put_univals(&mut buf, &pdp.scratch);
        }
        for cdp in &self.cdp_prep {
            put_univals(&mut buf, &cdp.scratch);
        }
        for ptr in &self.rra_ptrs {
            buf.extend_from_slice(&ptr.cur_row.to_le_bytes());
        }
        out.write_all(&buf)
    }
}

/// A complete database: schema plus one row block per archive, rows in the
/// order they are stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Rrd {
    schema: RrdSchema,
    archives: Vec<RowMatrix>,
}

impl Rrd {
    /// Pairs a schema with its row blocks, checking every block's shape.
    pub fn new(schema: RrdSchema, archives: Vec<RowMatrix>) -> Result<Self> {
        schema.validate()?;
        if archives.len() != schema.rra_cnt() {
            return Err(ModifyError::InvalidFormat(format!(
                "{} row blocks for {} archives",
                archives.len(),
                schema.rra_cnt()
            )));
        }
        for (i, block) in archives.iter().enumerate() {
            if block.rows() != schema.rows(i)? || block.columns() != schema.ds_cnt() {
                return Err(ModifyError::InvalidFormat(format!(
                    "archive {i} block is {} x {}, expected {} x {}",
                    block.rows(),
                    block.columns(),
                    schema.rra_defs[i].row_cnt,
                    schema.ds_cnt()
                )));
            }
        }
        Ok(Self { schema, archives })
    }

    /// Decodes a whole database held in memory without reordering any rows.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (schema, mut rows) = RrdSchema::from_bytes(bytes)?;
        let mut archives = try_vec(schema.rra_cnt(), "archive blocks")?;
        for i in 0..schema.rra_cnt() {
            let len = RowMatrix::byte_len(schema.rows(i)?, schema.ds_cnt()).ok_or_else(|| {
                ModifyError::InvalidFormat(format!("archive {i} is too large"))
            })?;
            let (block, rest) = rows.split_at(len);
            archives.push(RowMatrix::from_le_bytes(schema.rows(i)?, schema.ds_cnt(), block)?);
            rows = rest;
        }
        Ok(Self { schema, archives })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let source = SourceFile::open(path)?;
        Self::from_bytes(source.bytes())
    }

    pub fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> io::Result<()> {
        self.schema.write_to(out)?;
        for block in &self.archives {
            block.write_le(out)?;
        }
        out.flush()
    }

    pub fn schema(&self) -> &RrdSchema {
        &self.schema
    }

    pub fn archives(&self) -> &[RowMatrix] {
        &self.archives
    }

    pub fn into_parts(self) -> (RrdSchema, Vec<RowMatrix>) {
        (self.schema, self.archives)
    }
}

/// A source database opened read-only and mapped into memory.
#[derive(Debug)]
pub struct SourceFile {
    path: PathBuf,
    map: Mmap,
}

impl SourceFile {
    pub fn open(path: &Path) -> Result<Self> {
        let open_err = |source| ModifyError::Open {
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).map_err(open_err)?;
        let len = file.metadata().map_err(open_err)?.len();
        if len == 0 {
            return Err(ModifyError::short_read("header", STAT_HEAD_LEN, 0));
        }
        // SAFETY: the mapping is read-only. A concurrent writer can only give
        // us an inconsistent snapshot, which callers accept.
        let map = unsafe { MmapOptions::new().map(&file) }.map_err(open_err)?;
        Ok(Self {
            path: path.to_path_buf(),
            map,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The whole file. `&[u8]` reads sequentially through [`Read`].
    pub fn bytes(&self) -> &[u8] {
        &self.map
    }
}

/// Reads until `buf` is full or the source is exhausted, returning the
/// number of bytes transferred.
pub fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn read_record<R: Read + ?Sized, const N: usize>(reader: &mut R, what: &str) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    let got = read_full(reader, &mut buf)?;
    if got != N {
        return Err(ModifyError::short_read(what, N, got));
    }
    Ok(buf)
}

fn read_list<R, T, const N: usize>(
    reader: &mut R,
    count: usize,
    what: &'static str,
    decode: fn(&[u8; N]) -> T,
) -> Result<Vec<T>>
where
    R: Read + ?Sized,
{
    // Reserve no more than a small prefix up front; the list only grows as
    // records actually arrive.
    let mut out = try_vec(count.min(RESERVE_RECORDS), what)?;
    for _ in 0..count {
        let raw: [u8; N] = read_record(reader, what)?;
        out.push(decode(&raw));
    }
    Ok(out)
}

fn to_count(raw: u64, what: &str) -> Result<usize> {
    usize::try_from(raw)
        .map_err(|_| ModifyError::InvalidFormat(format!("{what} {raw} does not fit in memory")))
}

fn put_univals(buf: &mut Vec<u8>, cells: &[Unival; PAR_SLOTS]) {
    for cell in cells {
        buf.extend_from_slice(&cell.0);
    }
}

/// Sequential field decoder over one fixed-size record.
struct Fields<'a> {
    buf: &'a [u8],
}

impl<'a> Fields<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let (head, rest) = self.buf.split_at(N);
        self.buf = rest;
        let mut out = [0u8; N];
        out.copy_from_slice(head);
        out
    }

    fn skip(&mut self, n: usize) {
        self.buf = &self.buf[n..];
    }

    fn u64(&mut self) -> u64 {
        u64::from_le_bytes(self.take())
    }

    fn i64(&mut self) -> i64 {
        i64::from_le_bytes(self.take())
    }

    fn f64(&mut self) -> f64 {
        f64::from_le_bytes(self.take())
    }

    fn univals(&mut self) -> [Unival; PAR_SLOTS] {
        let mut out = [Unival::ZERO; PAR_SLOTS];
        for cell in &mut out {
            *cell = Unival(self.take());
        }
        out
    }
}

fn decode_ds_def(raw: &[u8; DS_DEF_LEN]) -> DsDef {
    let mut f = Fields::new(raw);
    DsDef {
        name: FixedStr(f.take()),
        dst: FixedStr(f.take()),
        par: f.univals(),
    }
}

fn decode_rra_def(raw: &[u8; RRA_DEF_LEN]) -> RraDef {
    let mut f = Fields::new(raw);
    let cf = FixedStr(f.take());
    f.skip(4);
    RraDef {
        cf,
        row_cnt: f.u64(),
        pdp_cnt: f.u64(),
        par: f.univals(),
    }
}

fn decode_live_head(raw: &[u8; LIVE_HEAD_LEN]) -> LiveHead {
    let mut f = Fields::new(raw);
    LiveHead {
        last_up: f.i64(),
        last_up_usec: f.i64(),
    }
}

fn decode_pdp_prep(raw: &[u8; PDP_PREP_LEN]) -> PdpPrep {
    let mut f = Fields::new(raw);
    let last_ds = FixedStr(f.take());
    f.skip(2);
    PdpPrep {
        last_ds,
        scratch: f.univals(),
    }
}

fn decode_cdp_prep(raw: &[u8; CDP_PREP_LEN]) -> CdpPrep {
    CdpPrep {
        scratch: Fields::new(raw).univals(),
    }
}

fn decode_rra_ptr(raw: &[u8; RRA_PTR_LEN]) -> RraPtr {
    RraPtr {
        cur_row: Fields::new(raw).u64(),
    }
}
