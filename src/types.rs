use serde::{Deserialize, Serialize};

/// Destination root an album is written under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestMode {
    #[default]
    Media,
    Share,
    #[serde(alias = "www")]
    ConfigWww,
}

impl DestMode {
    pub fn as_str(&self) -> &str {
        match self {
            DestMode::Media => "media",
            DestMode::Share => "share",
            DestMode::ConfigWww => "config_www",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter(&self) -> &str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Which mutations the executor is allowed to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DryRun {
    /// Apply the whole plan.
    #[default]
    Off,
    /// Download, but only log pruning and mirror deletions.
    Deletions,
    /// Touch nothing on disk.
    Full,
}

impl DryRun {
    pub fn from_flags(dry_run: bool, prune_dry_run: bool) -> Self {
        if dry_run {
            DryRun::Full
        } else if prune_dry_run {
            DryRun::Deletions
        } else {
            DryRun::Off
        }
    }

    pub fn skips_fetches(&self) -> bool {
        *self == DryRun::Full
    }

    pub fn skips_deletions(&self) -> bool {
        *self != DryRun::Off
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dest_mode_accepts_www_alias() {
        let mode: DestMode = serde_yaml::from_str("www").unwrap();
        assert_eq!(mode, DestMode::ConfigWww);
        let mode: DestMode = serde_yaml::from_str("config_www").unwrap();
        assert_eq!(mode, DestMode::ConfigWww);
    }

    #[test]
    fn test_dest_mode_rejects_unknown() {
        assert!(serde_yaml::from_str::<DestMode>("downloads").is_err());
    }

    #[test]
    fn test_dry_run_flags() {
        assert_eq!(DryRun::from_flags(false, false), DryRun::Off);
        assert_eq!(DryRun::from_flags(false, true), DryRun::Deletions);
        assert_eq!(DryRun::from_flags(true, true), DryRun::Full);
        assert!(DryRun::Deletions.skips_deletions());
        assert!(!DryRun::Deletions.skips_fetches());
        assert!(DryRun::Full.skips_fetches());
        assert!(!DryRun::Off.skips_deletions());
    }
}
