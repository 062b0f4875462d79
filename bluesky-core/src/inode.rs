//! POSIX-like metadata attached to objects.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// POSIX-like metadata: owner, group, mtime, 9 permission bits, 3 special bits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inode {
    /// Owner name.
    pub owner: String,
    /// Group name.
    pub group: String,
    /// Last modification time.
    pub mod_time: SystemTime,
    /// Owner permission bits (rwx, 3 bits).
    pub u: u8,
    /// Group permission bits (rwx, 3 bits).
    pub g: u8,
    /// Other permission bits (rwx, 3 bits).
    pub o: u8,
    /// Set-user-id bit.
    pub suid: bool,
    /// Set-group-id bit.
    pub sgid: bool,
    /// Sticky bit.
    pub sticky: bool,
}

impl Inode {
    /// Fresh inode with the given owner and group and `rw-r--r--` permissions.
    pub fn new(owner: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            group: group.into(),
            ..Self::default()
        }
    }

    /// Refresh the modification time to now.
    pub fn touch(&mut self) {
        self.mod_time = SystemTime::now();
    }

    /// Pack the 9 permission bits into a single octal-style value.
    pub fn mode(&self) -> u16 {
        ((self.u as u16 & 0o7) << 6) | ((self.g as u16 & 0o7) << 3) | (self.o as u16 & 0o7)
    }
}

impl Default for Inode {
    fn default() -> Self {
        Self {
            owner: String::new(),
            group: String::new(),
            mod_time: SystemTime::now(),
            u: 0o6,
            g: 0o4,
            o: 0o4,
            suid: false,
            sgid: false,
            sticky: false,
        }
    }
}
