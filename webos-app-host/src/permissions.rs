//! Permission model for app sandboxes.
//!
//! Every privileged operation maps to exactly one permission through a fixed
//! table. Operations the table does not know about require the baseline
//! `basic_access` permission.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Individual permission an application may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    BasicAccess,
    FileSystemAccess,
    NetworkAccess,
    AppCommunication,
    StorageAccess,
    Notifications,
}

impl Permission {
    pub const ALL: [Permission; 6] = [
        Permission::BasicAccess,
        Permission::FileSystemAccess,
        Permission::NetworkAccess,
        Permission::AppCommunication,
        Permission::StorageAccess,
        Permission::Notifications,
    ];

    /// Returns the descriptor-facing name of this permission.
    pub fn name(&self) -> &'static str {
        match self {
            Self::BasicAccess => "basic_access",
            Self::FileSystemAccess => "file_system_access",
            Self::NetworkAccess => "network_access",
            Self::AppCommunication => "app_communication",
            Self::StorageAccess => "storage_access",
            Self::Notifications => "notifications",
        }
    }

    /// Returns the permission an operation requires.
    pub fn required_for(operation: &str) -> Self {
        match operation {
            operations::FILE_ACCESS => Self::FileSystemAccess,
            operations::NETWORK_REQUEST => Self::NetworkAccess,
            operations::INTER_APP_COMMUNICATION => Self::AppCommunication,
            operations::STORAGE_ACCESS => Self::StorageAccess,
            operations::NOTIFICATION => Self::Notifications,
            _ => Self::BasicAccess,
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when a permission name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown permission '{0}'")]
pub struct UnknownPermission(pub String);

impl FromStr for Permission {
    type Err = UnknownPermission;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| UnknownPermission(s.to_string()))
    }
}

/// Operation names understood by the operation → permission table.
pub mod operations {
    pub const FILE_ACCESS: &str = "file_access";
    pub const NETWORK_REQUEST: &str = "network_request";
    pub const INTER_APP_COMMUNICATION: &str = "inter_app_communication";
    pub const STORAGE_ACCESS: &str = "storage_access";
    pub const NOTIFICATION: &str = "notification";
}

/// Ordered, duplicate-free set of permissions granted to an application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet {
    granted: Vec<Permission>,
}

impl PermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a set holding only `basic_access`.
    pub fn baseline() -> Self {
        Self {
            granted: vec![Permission::BasicAccess],
        }
    }

    /// Creates a set with every permission granted (for testing).
    pub fn all_granted() -> Self {
        Self {
            granted: Permission::ALL.to_vec(),
        }
    }

    /// Parses descriptor permission names, keeping first-seen order.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, UnknownPermission> {
        let mut set = Self::new();
        for name in names {
            set.grant(name.as_ref().parse()?);
        }
        Ok(set)
    }

    pub fn grant(&mut self, permission: Permission) {
        if !self.granted.contains(&permission) {
            self.granted.push(permission);
        }
    }

    pub fn revoke(&mut self, permission: Permission) {
        self.granted.retain(|p| *p != permission);
    }

    pub fn is_granted(&self, permission: Permission) -> bool {
        self.granted.contains(&permission)
    }

    /// Returns granted permissions in grant order.
    pub fn granted_permissions(&self) -> &[Permission] {
        &self.granted
    }

    pub fn len(&self) -> usize {
        self.granted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.granted.is_empty()
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        let mut set = Self::new();
        for permission in iter {
            set.grant(permission);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_table() {
        assert_eq!(Permission::required_for("file_access"), Permission::FileSystemAccess);
        assert_eq!(Permission::required_for("network_request"), Permission::NetworkAccess);
        assert_eq!(
            Permission::required_for("inter_app_communication"),
            Permission::AppCommunication
        );
        assert_eq!(Permission::required_for("storage_access"), Permission::StorageAccess);
        assert_eq!(Permission::required_for("notification"), Permission::Notifications);
    }

    #[test]
    fn unmapped_operations_need_basic_access() {
        assert_eq!(Permission::required_for("render"), Permission::BasicAccess);
        assert_eq!(Permission::required_for(""), Permission::BasicAccess);
    }

    #[test]
    fn names_round_trip_through_from_str() {
        for permission in Permission::ALL {
            assert_eq!(permission.name().parse::<Permission>(), Ok(permission));
        }
    }

    #[test]
    fn unknown_name_is_rejected() {
        let err = "root_access".parse::<Permission>().unwrap_err();
        assert_eq!(err, UnknownPermission("root_access".into()));
    }

    #[test]
    fn serde_uses_descriptor_names() {
        let json = serde_json::to_string(&Permission::FileSystemAccess).unwrap();
        assert_eq!(json, "\"file_system_access\"");
    }

    #[test]
    fn from_names_keeps_order_and_dedups() {
        let set = PermissionSet::from_names(&[
            "network_access",
            "basic_access",
            "network_access",
        ])
        .unwrap();
        assert_eq!(
            set.granted_permissions(),
            &[Permission::NetworkAccess, Permission::BasicAccess]
        );
    }

    #[test]
    fn grant_and_revoke() {
        let mut set = PermissionSet::baseline();
        assert!(!set.is_granted(Permission::NetworkAccess));

        set.grant(Permission::NetworkAccess);
        assert!(set.is_granted(Permission::NetworkAccess));

        set.revoke(Permission::NetworkAccess);
        assert!(!set.is_granted(Permission::NetworkAccess));
        assert!(set.is_granted(Permission::BasicAccess));
    }

    #[test]
    fn all_granted_has_everything() {
        let set = PermissionSet::all_granted();
        assert_eq!(set.len(), Permission::ALL.len());
        for permission in Permission::ALL {
            assert!(set.is_granted(permission));
        }
    }
}
