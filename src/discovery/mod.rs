//! Device discovery.
//!
//! A discovery pass scans candidate ports, probes each one in turn and keeps
//! every session whose identity passes the filter:
//!
//! 1. [`PortScanner`] lists the ports (explicit list, or the platform's
//!    ports filtered by pattern and exclusion list)
//! 2. [`probe`] opens a session on each port and checks the identity
//! 3. [`Discovery`] collects the matches into a [`DiscoveryReport`], or
//!    insists on exactly one device with [`Discovery::find_one`]

mod probe;
mod scanner;

pub use probe::{probe, DeviceMatch, IdentityFilter, ProbeOutcome};
pub use scanner::PortScanner;

use crate::config::Config;
use crate::error::{DeviceError, DeviceResult};
use crate::port::TransportOpener;
use crate::registry::DeviceRegistry;
use crate::session::{Session, SessionOptions};
use tracing::{debug, info};

/// A port that was probed without producing a match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub port: String,
    pub reason: String,
}

/// Result of one discovery pass.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    /// Matching sessions, in probe order.
    pub sessions: Vec<Session>,
    /// Every port probed, in order.
    pub tried: Vec<String>,
    pub rejected: Vec<Rejection>,
}

impl DiscoveryReport {
    pub fn matches(&self) -> Vec<DeviceMatch> {
        self.sessions
            .iter()
            .map(|s| DeviceMatch::new(s.port(), s.identity().clone()))
            .collect()
    }

    /// Move the sessions into a registry.
    pub fn into_registry(self) -> DeviceResult<DeviceRegistry> {
        let mut registry = DeviceRegistry::new();
        for session in self.sessions {
            registry.insert(session)?;
        }
        Ok(registry)
    }
}

/// Sequential device discovery over a transport opener.
pub struct Discovery<'a> {
    opener: &'a dyn TransportOpener,
    scanner: PortScanner,
    options: SessionOptions,
    /// Configured explicit port list, used when a call passes none.
    ports: Option<Vec<String>>,
}

impl<'a> Discovery<'a> {
    pub fn new(opener: &'a dyn TransportOpener, options: SessionOptions) -> Self {
        Self {
            opener,
            scanner: PortScanner::new(),
            options,
            ports: None,
        }
    }

    /// Discovery set up from every section of `config`.
    pub fn from_config(opener: &'a dyn TransportOpener, config: &Config) -> DeviceResult<Self> {
        Ok(Self {
            opener,
            scanner: PortScanner::from_config(&config.discovery)?,
            options: SessionOptions::from_config(config),
            ports: config.discovery.ports.clone(),
        })
    }

    pub fn with_scanner(mut self, scanner: PortScanner) -> Self {
        self.scanner = scanner;
        self
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    fn candidates(&self, explicit: Option<&[String]>) -> DeviceResult<Vec<String>> {
        self.scanner
            .scan(self.opener, explicit.or(self.ports.as_deref()))
    }

    /// Probe every candidate port once and keep all matches.
    pub fn discover(
        &self,
        explicit: Option<&[String]>,
        filter: &IdentityFilter,
    ) -> DeviceResult<DiscoveryReport> {
        let candidates = self.candidates(explicit)?;
        info!(ports = candidates.len(), %filter, "Starting device discovery");

        let mut report = DiscoveryReport::default();
        for port in candidates {
            if report.tried.contains(&port) {
                debug!(%port, "Skipping repeated port");
                continue;
            }
            match probe(self.opener, &port, &self.options, filter) {
                ProbeOutcome::Matched(session) => report.sessions.push(session),
                ProbeOutcome::NoMatch { port, reason } => {
                    report.rejected.push(Rejection { port, reason })
                }
            }
            report.tried.push(port);
        }

        info!(
            tried = report.tried.len(),
            matched = report.sessions.len(),
            "Device discovery finished"
        );
        Ok(report)
    }

    /// Discover and require exactly one matching device.
    ///
    /// With several matches every session is closed before returning
    /// `DiscoveryAmbiguous`.
    pub fn find_one(
        &self,
        explicit: Option<&[String]>,
        filter: &IdentityFilter,
    ) -> DeviceResult<Session> {
        let mut report = self.discover(explicit, filter)?;
        match report.sessions.len() {
            0 => Err(DeviceError::DiscoveryNotFound { tried: report.tried }),
            1 => Ok(report.sessions.remove(0)),
            _ => {
                let matches = report.matches();
                for session in &mut report.sessions {
                    session.close();
                }
                Err(DeviceError::DiscoveryAmbiguous { matches })
            }
        }
    }

    /// Connect to one named port.
    ///
    /// Unlike discovery, open and handshake failures are returned as-is. A
    /// device that fails the filter is `DiscoveryNotFound`.
    pub fn connect(&self, port: &str, filter: &IdentityFilter) -> DeviceResult<Session> {
        let mut session = Session::open(self.opener, port, &self.options)?;
        if filter.matches(session.identity()) {
            Ok(session)
        } else {
            session.close();
            Err(DeviceError::DiscoveryNotFound {
                tried: vec![port.to_string()],
            })
        }
    }
}
