use std::collections::HashSet;
use std::sync::Arc;

use tracing::warn;
use url::{Host, Url};

use crate::error::{Result, ShroudError};

/// Allow-list of target hostnames
///
/// Matching is exact: no wildcards, no subdomain matching. An empty list
/// allows every host.
#[derive(Debug, Clone, Default)]
pub struct HostGuard {
    allowed: Arc<HashSet<String>>,
}

impl HostGuard {
    /// Entries are normalised the way target URLs are (lowercase, punycode)
    pub fn new(hosts: impl IntoIterator<Item = String>) -> Self {
        let allowed = hosts
            .into_iter()
            .filter(|h| !h.is_empty())
            .filter_map(|entry| match Host::parse(&entry) {
                Ok(host) => Some(host.to_string()),
                Err(e) => {
                    warn!(entry = %entry, error = %e, "Ignoring unparseable allowed host");
                    None
                }
            })
            .collect();

        Self {
            allowed: Arc::new(allowed),
        }
    }

    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn is_allowed(&self, host: &str) -> bool {
        self.allowed.is_empty() || self.allowed.contains(host)
    }

    pub fn check(&self, target: &Url) -> Result<()> {
        let host = target.host_str().unwrap_or("");
        if self.is_allowed(host) {
            Ok(())
        } else {
            Err(ShroudError::HostNotAllowed {
                host: host.to_string(),
            })
        }
    }
}
