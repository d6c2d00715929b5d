//! System limits and configuration bounds.
//!
//! Following TigerStyle: put limits on everything.
//! Every table, explanation list, and queue has an explicit maximum size.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// One minute in microseconds.
const MINUTE_US: u64 = 60 * 1_000_000;

/// Limits for the node-shutdown subsystem.
///
/// All limits are explicit and configurable. Missing fields in a TOML file
/// fall back to the defaults from [`Limits::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    // Shutdown records.
    /// Maximum number of active shutdown records in the cluster.
    pub max_shutdown_records: u32,
    /// Maximum size of a shutdown reason in bytes.
    pub max_reason_bytes: u32,
    /// Allocation delay applied to RESTART records that do not specify one.
    pub default_restart_allocation_delay_us: u64,
    /// Maximum allocation delay a RESTART record may request.
    pub max_allocation_delay_us: u64,

    // Status reporting.
    /// Maximum number of stalled-shard explanations carried by one status.
    pub max_status_explanations: u32,

    // Allocation.
    /// Concurrent incoming recoveries per node before allocation throttles.
    pub max_incoming_recoveries_per_node: u32,

    // Coordinator.
    /// Capacity of the coordinator's command channel.
    pub coordinator_channel_capacity: u32,
}

impl Limits {
    /// Creates limits with safe defaults.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            // Records: 1024 active, 4KB reasons, 5min restart delay, 24h max.
            max_shutdown_records: 1024,
            max_reason_bytes: 4096,
            default_restart_allocation_delay_us: 5 * MINUTE_US,
            max_allocation_delay_us: 24 * 60 * MINUTE_US,

            // Status: 16 stalled-shard explanations.
            max_status_explanations: 16,

            // Allocation: 2 incoming recoveries per node.
            max_incoming_recoveries_per_node: 2,

            // Coordinator: 1024 queued update tasks.
            coordinator_channel_capacity: 1024,
        }
    }

    /// Validates that all limits are internally consistent.
    ///
    /// # Errors
    /// Returns an error if any limits are invalid or inconsistent.
    pub fn validate(&self) -> Result<()> {
        if self.max_shutdown_records == 0 {
            return Err(Error::InvalidArgument {
                name: "max_shutdown_records",
                reason: "must be positive",
            });
        }

        if self.max_reason_bytes == 0 {
            return Err(Error::InvalidArgument {
                name: "max_reason_bytes",
                reason: "must be positive",
            });
        }

        if self.default_restart_allocation_delay_us > self.max_allocation_delay_us {
            return Err(Error::InvalidArgument {
                name: "default_restart_allocation_delay_us",
                reason: "must not exceed max_allocation_delay_us",
            });
        }

        if self.max_status_explanations == 0 {
            return Err(Error::InvalidArgument {
                name: "max_status_explanations",
                reason: "must be positive",
            });
        }

        if self.max_incoming_recoveries_per_node == 0 {
            return Err(Error::InvalidArgument {
                name: "max_incoming_recoveries_per_node",
                reason: "must be positive",
            });
        }

        if self.coordinator_channel_capacity == 0 {
            return Err(Error::InvalidArgument {
                name: "coordinator_channel_capacity",
                reason: "must be positive",
            });
        }

        Ok(())
    }

    /// Loads and validates limits from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let source_name = path.as_ref().display().to_string();
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| Error::Config {
            source_name: source_name.clone(),
            message: e.to_string(),
        })?;
        Self::parse(&contents, source_name)
    }

    /// Parses and validates limits from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML cannot be parsed or the limits are invalid.
    pub fn from_toml(toml: &str) -> Result<Self> {
        Self::parse(toml, "inline".to_string())
    }

    fn parse(toml: &str, source_name: String) -> Result<Self> {
        let limits: Self = toml::from_str(toml).map_err(|e| Error::Config {
            source_name,
            message: e.to_string(),
        })?;
        limits.validate()?;
        Ok(limits)
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_default_limits_valid() {
        assert!(Limits::new().validate().is_ok());
    }

    #[test]
    fn test_zero_records_invalid() {
        let limits = Limits {
            max_shutdown_records: 0,
            ..Limits::new()
        };
        assert!(matches!(
            limits.validate(),
            Err(Error::InvalidArgument {
                name: "max_shutdown_records",
                ..
            })
        ));
    }

    #[test]
    fn test_restart_delay_above_max_invalid() {
        let limits = Limits {
            default_restart_allocation_delay_us: 10,
            max_allocation_delay_us: 5,
            ..Limits::new()
        };
        assert!(limits.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let limits = Limits::from_toml("max_status_explanations = 4\n").unwrap();
        assert_eq!(limits.max_status_explanations, 4);
        assert_eq!(limits.max_shutdown_records, Limits::new().max_shutdown_records);
    }

    #[test]
    fn test_invalid_toml_rejected() {
        let err = Limits::from_toml("max_reason_bytes = 0\n").unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));

        let err = Limits::from_toml("max_reason_bytes = \"lots\"\n").unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_incoming_recoveries_per_node = 7").unwrap();

        let limits = Limits::from_file(file.path()).unwrap();
        assert_eq!(limits.max_incoming_recoveries_per_node, 7);

        let err = Limits::from_file("/nonexistent/limits.toml").unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }
}
