// SPDX-License-Identifier: AGPL-3.0-or-later
//
// rrdkit
// Structural editing of round-robin database files: add and remove columns,
// linearize archives, replace the destination atomically.

pub mod commit;
pub mod config;
pub mod daemon;
pub mod dsdef;
pub mod error;
pub mod format;
pub mod matrix;
pub mod modify;
pub mod plan;
pub mod rebuild;
pub mod transcode;

pub use crate::commit::Destination;
pub use crate::config::ModifyOptions;
pub use crate::daemon::{CacheDaemon, DaemonClient, NoDaemon};
pub use crate::error::{ModifyError, Result};
pub use crate::format::{Rrd, RrdSchema};
pub use crate::modify::{modify_file, run, transform, ModifyRequest, ModifySummary};
pub use crate::plan::{ColumnOp, ColumnPlan};
