// SPDX-License-Identifier: AGPL-3.0-or-later

//! The `modify` pipeline: read a source database, add or remove columns and
//! commit the result atomically.

use crate::commit::{commit, Destination};
use crate::config::ModifyOptions;
use crate::daemon::{flush_best_effort, CacheDaemon};
use crate::dsdef::DS_PREFIX;
use crate::error::{ModifyError, Result};
use crate::format::{Rrd, RrdSchema, SourceFile};
use crate::plan::ColumnPlan;
use crate::rebuild::rebuild_schema;
use crate::transcode::transcode_archives;
use std::path::Path;
use tracing::{debug, info, warn};

/// Argument prefix naming a column to remove.
pub const DEL_PREFIX: &str = "DEL:";

/// Column changes requested on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModifyRequest {
    /// Names of columns to remove.
    pub remove: Vec<String>,
    /// Full `DS:` definitions of columns to append, in order.
    pub add: Vec<String>,
}

impl ModifyRequest {
    /// Sorts `DS:` and `DEL:` arguments; anything else is logged and ignored.
    pub fn from_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut request = Self::default();
        for arg in args {
            let arg = arg.as_ref();
            if let Some(name) = arg.strip_prefix(DEL_PREFIX) {
                if name.is_empty() {
                    warn!(arg, "empty column name in removal, ignored");
                } else {
                    request.remove.push(name.to_string());
                }
            } else if arg.starts_with(DS_PREFIX) {
                request.add.push(arg.to_string());
            } else {
                warn!(arg, "argument is neither DS: nor DEL:, ignored");
            }
        }
        request
    }

    pub fn is_empty(&self) -> bool {
        self.remove.is_empty() && self.add.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModifySummary {
    pub kept: usize,
    pub dropped: usize,
    pub added: usize,
    pub archives: usize,
    /// Rows across all archives.
    pub rows: usize,
}

/// Decodes a whole source database from `bytes` and returns the rebuilt one.
/// Nothing is written anywhere.
pub fn transform(bytes: &[u8], request: &ModifyRequest) -> Result<(Rrd, ModifySummary)> {
    let (source, mut storage) = RrdSchema::from_bytes(bytes)?;
    let plan = ColumnPlan::build(&source.column_names(), &request.remove, &request.add)?;
    debug!(
        columns = ?plan.output_names(&source.column_names()),
        identity = plan.is_identity(),
        "destination columns"
    );
    let schema = rebuild_schema(&source, &plan)?;
    let archives = transcode_archives(&mut storage, &source, &plan)?;
    let rows = archives.iter().map(|a| a.rows()).sum();
    let summary = ModifySummary {
        kept: plan.kept(),
        dropped: plan.dropped(),
        added: plan.added(),
        archives: archives.len(),
        rows,
    };
    Ok((Rrd::new(schema, archives)?, summary))
}

/// Modifies `source` into `destination` using an already connected daemon.
pub fn modify_file(
    source: &Path,
    destination: &Destination,
    request: &ModifyRequest,
    daemon: &mut dyn CacheDaemon,
) -> Result<ModifySummary> {
    if request.is_empty() {
        debug!("no column changes requested, rows are only linearized");
    }
    flush_best_effort(daemon, source);

    let (rrd, summary) = {
        let file = SourceFile::open(source)?;
        debug!(path = %file.path().display(), bytes = file.bytes().len(), "source mapped");
        transform(file.bytes(), request)?
    };

    commit(destination, daemon, |out| {
        rrd.write_to(out).map_err(ModifyError::ShortWrite)
    })?;

    info!(
        source = %source.display(),
        kept = summary.kept,
        dropped = summary.dropped,
        added = summary.added,
        archives = summary.archives,
        rows = summary.rows,
        "database modified"
    );
    Ok(summary)
}

/// Entry point used by the command line: resolves the daemon, then runs
/// [`modify_file`]. `destination` may be `-` for standard output.
pub fn run(
    options: &ModifyOptions,
    source: &Path,
    destination: &str,
    request: &ModifyRequest,
) -> Result<ModifySummary> {
    let mut daemon = options.connect_daemon()?;
    modify_file(
        source,
        &Destination::from_arg(destination),
        request,
        daemon.as_mut(),
    )
}
