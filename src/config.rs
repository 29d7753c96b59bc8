// SPDX-License-Identifier: AGPL-3.0-or-later

use crate::daemon::{CacheDaemon, DaemonClient, NoDaemon};
use crate::error::Result;

/// Environment variable naming the caching daemon when `--daemon` is absent.
pub const DAEMON_ADDRESS_ENV: &str = "RRDCACHED_ADDRESS";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModifyOptions {
    /// Explicit daemon address; overrides the environment.
    pub daemon: Option<String>,
}

impl ModifyOptions {
    /// The daemon address in effect, if any. Empty values count as unset.
    pub fn daemon_address(&self) -> Option<String> {
        self.daemon
            .clone()
            .or_else(|| std::env::var(DAEMON_ADDRESS_ENV).ok())
            .filter(|addr| !addr.trim().is_empty())
    }

    /// Connects to the configured daemon, or hands back a no-op one.
    pub fn connect_daemon(&self) -> Result<Box<dyn CacheDaemon>> {
        match self.daemon_address() {
            Some(address) => Ok(Box::new(DaemonClient::connect(&address)?)),
            None => Ok(Box::new(NoDaemon)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_address_wins() {
        let opts = ModifyOptions {
            daemon: Some("unix:/run/a.sock".to_string()),
        };
        assert_eq!(opts.daemon_address().as_deref(), Some("unix:/run/a.sock"));
    }

    #[test]
    fn test_blank_address_is_unset() {
        let opts = ModifyOptions {
            daemon: Some("  ".to_string()),
        };
        assert_eq!(opts.daemon_address(), None);
    }

    #[test]
    fn test_unreachable_daemon_fails_to_connect() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("missing.sock");
        let opts = ModifyOptions {
            daemon: Some(format!("unix:{}", sock.display())),
        };
        assert!(matches!(
            opts.connect_daemon(),
            Err(crate::error::ModifyError::DaemonConnect { .. })
        ));
    }
}
