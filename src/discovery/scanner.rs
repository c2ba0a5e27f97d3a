//! Candidate port enumeration.

use crate::config::{ConfigError, DiscoveryConfig};
use crate::error::DeviceResult;
use crate::port::TransportOpener;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use tracing::debug;

/// Ports worth probing on this platform. `None` accepts every port.
///
/// macOS lists each USB serial device twice (`cu.*` and `tty.*`) next to
/// Bluetooth and debug ports that block on open.
static PLATFORM_INCLUDE: Lazy<Option<Regex>> = Lazy::new(|| {
    if cfg!(target_os = "macos") {
        Regex::new(r"tty\.usb(modem|serial)").ok()
    } else {
        None
    }
});

/// Produces the ordered list of ports a discovery pass will probe.
#[derive(Debug, Clone)]
pub struct PortScanner {
    include: Option<Regex>,
    exclude: BTreeSet<String>,
}

impl Default for PortScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl PortScanner {
    /// Scanner with the platform's default inclusion filter.
    pub fn new() -> Self {
        Self {
            include: (*PLATFORM_INCLUDE).clone(),
            exclude: BTreeSet::new(),
        }
    }

    pub fn from_config(config: &DiscoveryConfig) -> DeviceResult<Self> {
        let mut scanner = Self::new().with_excluded(config.exclude_ports.iter().cloned());
        if let Some(pattern) = &config.include_pattern {
            scanner.include = Some(Regex::new(pattern).map_err(|e| {
                ConfigError::validation("discovery.include_pattern", e.to_string())
            })?);
        }
        Ok(scanner)
    }

    /// Replace the inclusion filter.
    pub fn with_include(mut self, include: Option<Regex>) -> Self {
        self.include = include;
        self
    }

    pub fn with_excluded<I: IntoIterator<Item = String>>(mut self, ports: I) -> Self {
        self.exclude.extend(ports);
        self
    }

    /// Apply inclusion and exclusion, then sort and de-duplicate.
    pub fn filter<I: IntoIterator<Item = String>>(&self, ports: I) -> Vec<String> {
        ports
            .into_iter()
            .filter(|p| self.include.as_ref().map_or(true, |re| re.is_match(p)))
            .filter(|p| !self.exclude.contains(p))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Ports to probe. An explicit list is used verbatim.
    pub fn scan(
        &self,
        opener: &dyn TransportOpener,
        explicit: Option<&[String]>,
    ) -> DeviceResult<Vec<String>> {
        if let Some(ports) = explicit {
            return Ok(ports.to_vec());
        }
        let available = opener.list_available_ports()?;
        let candidates = self.filter(available);
        debug!(?candidates, "Scanned serial ports");
        Ok(candidates)
    }
}
