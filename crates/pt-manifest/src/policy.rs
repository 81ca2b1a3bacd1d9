// policy.rs - Governing policies and the policy → permission allow-table.
//
// A governing policy is an enumerated tag on the manifest. It constrains
// which elevated-risk permissions a plugin may hold: a permission of Medium
// risk or higher is only usable when the policy's allow-table lists it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ManifestError;
use crate::permission::Permission;

/// The principle a plugin declares it is governed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoverningPolicy {
    ProtectAttention,
    PreservePrivacy,
    EnableSovereignty,
    BuildCommunity,
}

impl GoverningPolicy {
    pub const ALL: [GoverningPolicy; 4] = [
        GoverningPolicy::ProtectAttention,
        GoverningPolicy::PreservePrivacy,
        GoverningPolicy::EnableSovereignty,
        GoverningPolicy::BuildCommunity,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            GoverningPolicy::ProtectAttention => "protect_attention",
            GoverningPolicy::PreservePrivacy => "preserve_privacy",
            GoverningPolicy::EnableSovereignty => "enable_sovereignty",
            GoverningPolicy::BuildCommunity => "build_community",
        }
    }

    /// Permissions this policy explicitly allows.
    pub fn allowed_permissions(self) -> &'static [Permission] {
        use Permission::*;
        match self {
            GoverningPolicy::ProtectAttention => &[
                ProcessMonitor,
                SystemNotifications,
                SystemInfo,
                FilesystemRead,
            ],
            GoverningPolicy::PreservePrivacy => {
                &[FilesystemRead, FilesystemWrite, ProcessMonitor, SystemInfo]
            }
            GoverningPolicy::EnableSovereignty => &[
                FilesystemRead,
                ConfigurationRead,
                SystemInfo,
                ProcessMonitor,
            ],
            GoverningPolicy::BuildCommunity => &[NetworkLocal, NetworkInternet, FilesystemRead],
        }
    }

    pub fn allows(self, permission: Permission) -> bool {
        self.allowed_permissions().contains(&permission)
    }
}

/// How a plugin says it treats user data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSharing {
    #[default]
    Never,
    Anonymized,
    WithConsent,
    Always,
}

impl DataSharing {
    pub const ALL: [DataSharing; 4] = [
        DataSharing::Never,
        DataSharing::Anonymized,
        DataSharing::WithConsent,
        DataSharing::Always,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DataSharing::Never => "never",
            DataSharing::Anonymized => "anonymized",
            DataSharing::WithConsent => "with_consent",
            DataSharing::Always => "always",
        }
    }
}

impl fmt::Display for GoverningPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for DataSharing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GoverningPolicy {
    type Err = ManifestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GoverningPolicy::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| ManifestError::UnknownPolicy {
                value: s.to_string(),
            })
    }
}

impl FromStr for DataSharing {
    type Err = ManifestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DataSharing::ALL
            .iter()
            .copied()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| ManifestError::UnknownSharing {
                value: s.to_string(),
            })
    }
}
