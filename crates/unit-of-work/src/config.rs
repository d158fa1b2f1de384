//! Unit-of-work configuration loaded from environment variables.

use crate::event_sourced::SnapshotPolicy;

/// Defaults applied to repositories created inside a unit of work.
///
/// Reads from environment variables:
/// - `UOW_AUTO_ENLIST`: repositories enlist with their scope on
///   get/add/remove (default: `true`)
/// - `UOW_SNAPSHOT_INTERVAL`: event-sourced repositories store a snapshot
///   every N versions, `0` disables (default: `0`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitOfWorkConfig {
    pub auto_enlist: bool,
    pub snapshot_interval: u64,
}

impl UnitOfWorkConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            auto_enlist: std::env::var("UOW_AUTO_ENLIST")
                .ok()
                .and_then(|v| parse_bool(&v))
                .unwrap_or(defaults.auto_enlist),
            snapshot_interval: std::env::var("UOW_SNAPSHOT_INTERVAL")
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.snapshot_interval),
        }
    }

    /// Snapshot policy matching `snapshot_interval`.
    pub fn snapshot_policy(&self) -> SnapshotPolicy {
        SnapshotPolicy::every(self.snapshot_interval)
    }
}

impl Default for UnitOfWorkConfig {
    fn default() -> Self {
        Self {
            auto_enlist: true,
            snapshot_interval: 0,
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        // SAFETY: tests touching the environment run serially.
        unsafe {
            std::env::remove_var("UOW_AUTO_ENLIST");
            std::env::remove_var("UOW_SNAPSHOT_INTERVAL");
        }
    }

    #[test]
    fn test_default_values() {
        let config = UnitOfWorkConfig::default();
        assert!(config.auto_enlist);
        assert_eq!(config.snapshot_interval, 0);
        assert_eq!(config.snapshot_policy(), SnapshotPolicy::Never);
    }

    #[test]
    #[serial]
    fn test_from_env_without_variables() {
        clear_env();
        assert_eq!(UnitOfWorkConfig::from_env(), UnitOfWorkConfig::default());
    }

    #[test]
    #[serial]
    fn test_from_env_reads_variables() {
        clear_env();
        unsafe {
            std::env::set_var("UOW_AUTO_ENLIST", "off");
            std::env::set_var("UOW_SNAPSHOT_INTERVAL", "25");
        }

        let config = UnitOfWorkConfig::from_env();
        clear_env();

        assert!(!config.auto_enlist);
        assert_eq!(config.snapshot_interval, 25);
        assert_eq!(config.snapshot_policy(), SnapshotPolicy::Every(25));
    }

    #[test]
    #[serial]
    fn test_from_env_ignores_garbage() {
        clear_env();
        unsafe {
            std::env::set_var("UOW_AUTO_ENLIST", "maybe");
            std::env::set_var("UOW_SNAPSHOT_INTERVAL", "-3");
        }

        let config = UnitOfWorkConfig::from_env();
        clear_env();

        assert_eq!(config, UnitOfWorkConfig::default());
    }
}
