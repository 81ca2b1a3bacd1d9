// permission.rs - The closed permission set and its fixed risk table.
//
// Every capability a plugin can ask for is one `Permission` variant. The
// risk level and the plain-language explanation for each permission are
// exhaustive matches, so adding a permission fails to compile until every
// table below says something about it. Manifests cannot override either.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ManifestError;

/// A single capability a plugin may request.
///
/// Serializes as the dotted wire string used in manifest files
/// (e.g. `"filesystem.read"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "filesystem.read")]
    FilesystemRead,
    #[serde(rename = "filesystem.write")]
    FilesystemWrite,
    #[serde(rename = "filesystem.watch")]
    FilesystemWatch,
    #[serde(rename = "network.local")]
    NetworkLocal,
    #[serde(rename = "network.internet")]
    NetworkInternet,
    #[serde(rename = "process.spawn")]
    ProcessSpawn,
    #[serde(rename = "process.monitor")]
    ProcessMonitor,
    #[serde(rename = "system.notifications")]
    SystemNotifications,
    #[serde(rename = "system.info")]
    SystemInfo,
    #[serde(rename = "configuration.read")]
    ConfigurationRead,
    #[serde(rename = "configuration.write")]
    ConfigurationWrite,
}

/// Fixed severity attached to a permission.
///
/// Ordered from least to most severe, so `risk >= RiskLevel::Medium` reads
/// the way it sounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Minimal,
    Low,
    Medium,
    High,
    Critical,
}

impl Permission {
    /// Every permission, in wire-string order.
    pub const ALL: [Permission; 11] = [
        Permission::ConfigurationRead,
        Permission::ConfigurationWrite,
        Permission::FilesystemRead,
        Permission::FilesystemWatch,
        Permission::FilesystemWrite,
        Permission::NetworkInternet,
        Permission::NetworkLocal,
        Permission::ProcessMonitor,
        Permission::ProcessSpawn,
        Permission::SystemInfo,
        Permission::SystemNotifications,
    ];

    /// The dotted wire string, as written in manifests.
    pub fn as_str(self) -> &'static str {
        match self {
            Permission::FilesystemRead => "filesystem.read",
            Permission::FilesystemWrite => "filesystem.write",
            Permission::FilesystemWatch => "filesystem.watch",
            Permission::NetworkLocal => "network.local",
            Permission::NetworkInternet => "network.internet",
            Permission::ProcessSpawn => "process.spawn",
            Permission::ProcessMonitor => "process.monitor",
            Permission::SystemNotifications => "system.notifications",
            Permission::SystemInfo => "system.info",
            Permission::ConfigurationRead => "configuration.read",
            Permission::ConfigurationWrite => "configuration.write",
        }
    }

    /// The fixed risk classification for this permission.
    pub fn risk_level(self) -> RiskLevel {
        match self {
            Permission::FilesystemRead
            | Permission::FilesystemWatch
            | Permission::ProcessMonitor
            | Permission::SystemNotifications
            | Permission::SystemInfo => RiskLevel::Minimal,
            Permission::FilesystemWrite
            | Permission::NetworkLocal
            | Permission::ConfigurationRead => RiskLevel::Low,
            Permission::NetworkInternet | Permission::ProcessSpawn => RiskLevel::Medium,
            Permission::ConfigurationWrite => RiskLevel::High,
        }
    }

    /// Plain-language explanation shown to the user in consent prompts.
    pub fn explanation(self) -> &'static str {
        match self {
            Permission::FilesystemRead => "Read files on your system (cannot modify them)",
            Permission::FilesystemWrite => "Create or modify files on your system",
            Permission::FilesystemWatch => "Monitor when files change (passive observation)",
            Permission::NetworkLocal => "Communicate within your local network only",
            Permission::NetworkInternet => "Access the internet (could share data externally)",
            Permission::ProcessSpawn => "Start new programs or scripts",
            Permission::ProcessMonitor => "See what programs are running (cannot control them)",
            Permission::SystemNotifications => "Show you notifications",
            Permission::SystemInfo => "Read system information (OS version, hardware, etc.)",
            Permission::ConfigurationRead => "Read your system configuration",
            Permission::ConfigurationWrite => {
                "MODIFY your system configuration (requires a rebuild)"
            }
        }
    }

    /// The read counterpart of a write permission, if it has one.
    pub fn read_counterpart(self) -> Option<Permission> {
        match self {
            Permission::FilesystemWrite => Some(Permission::FilesystemRead),
            Permission::ConfigurationWrite => Some(Permission::ConfigurationRead),
            _ => None,
        }
    }
}

impl RiskLevel {
    /// Upper-case label used in prompts and reports.
    pub fn label(self) -> &'static str {
        match self {
            RiskLevel::Minimal => "MINIMAL",
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RiskLevel::Minimal => "minimal",
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        })
    }
}

impl FromStr for Permission {
    type Err = ManifestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Permission::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| ManifestError::UnknownPermission {
                value: s.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_strings_parse_back() {
        for permission in Permission::ALL {
            let parsed: Permission = permission.as_str().parse().unwrap();
            assert_eq!(parsed, permission);
        }
    }

    #[test]
    fn all_is_sorted_by_wire_string() {
        let names: Vec<&str> = Permission::ALL.iter().map(|p| p.as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }

    #[test]
    fn unknown_permission_is_rejected() {
        let err = "filesystem.delete".parse::<Permission>().unwrap_err();
        assert!(err.to_string().contains("filesystem.delete"));
    }

    #[test]
    fn serde_uses_dotted_names() {
        let json = serde_json::to_string(&Permission::NetworkInternet).unwrap();
        assert_eq!(json, "\"network.internet\"");
        let back: Permission = serde_json::from_str("\"process.spawn\"").unwrap();
        assert_eq!(back, Permission::ProcessSpawn);
    }

    #[test]
    fn risk_table_matches_classification() {
        assert_eq!(Permission::FilesystemRead.risk_level(), RiskLevel::Minimal);
        assert_eq!(Permission::FilesystemWrite.risk_level(), RiskLevel::Low);
        assert_eq!(Permission::NetworkInternet.risk_level(), RiskLevel::Medium);
        assert_eq!(Permission::ProcessSpawn.risk_level(), RiskLevel::Medium);
        assert_eq!(Permission::ConfigurationWrite.risk_level(), RiskLevel::High);
    }

    #[test]
    fn risk_levels_are_ordered() {
        assert!(RiskLevel::Minimal < RiskLevel::Low);
        assert!(RiskLevel::Medium < RiskLevel::High);
        assert!(RiskLevel::High < RiskLevel::Critical);
    }

    #[test]
    fn write_permissions_have_read_counterparts() {
        assert_eq!(
            Permission::FilesystemWrite.read_counterpart(),
            Some(Permission::FilesystemRead)
        );
        assert_eq!(Permission::NetworkLocal.read_counterpart(), None);
    }
}
