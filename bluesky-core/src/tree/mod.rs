//! The concurrent tree: links, nodes, actors, events, transactions.

pub mod event;
pub(crate) mod group;
pub mod link;
pub mod node;
pub mod path;
pub mod queue;

use serde::{Deserialize, Serialize};

/// Link object data requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Req {
    /// Obtain the pointee object.
    Data = 0,
    /// Obtain the pointee object's node.
    DataNode = 1,
}

/// States of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ReqStatus {
    /// Never started.
    #[default]
    Void,
    /// Job in flight; callers may park as waiters.
    Busy,
    /// Finished successfully.
    OK,
    /// Finished with an error.
    Error,
}

/// Request status reset conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReqReset {
    /// Unconditional reset.
    Always,
    /// Reset only when the current status equals the compared one.
    IfEq,
    /// Reset only when the current status differs from the compared one.
    IfNeq,
}

/// Link property flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Flags(pub u32);

impl Flags {
    /// No special properties.
    pub const PLAIN: Flags = Flags(0);
    /// Link survives archive round-trips.
    pub const PERSISTENT: Flags = Flags(1);
    /// Link is excluded from tree walks.
    pub const DISABLED: Flags = Flags(2);
    /// Object payload is fetched from the archive on first access.
    pub const LAZY_LOAD: Flags = Flags(4);

    /// Whether all bits of `other` are set.
    pub fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Flags {
    type Output = Flags;
    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for Flags {
    fn bitor_assign(&mut self, rhs: Flags) {
        self.0 |= rhs.0;
    }
}

impl std::ops::BitAnd for Flags {
    type Output = Flags;
    fn bitand(self, rhs: Flags) -> Flags {
        Flags(self.0 & rhs.0)
    }
}

/// Node leaf indexes / orderings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    /// Insertion/custom order, random access.
    AnyOrder,
    /// Link's own id (unique).
    ID,
    /// Pointee object instance id (non-unique).
    OID,
    /// Link name (non-unique).
    Name,
    /// Pointee object type id (non-unique).
    OType,
}

/// Link insertion policy bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InsertPolicy(pub u32);

impl InsertPolicy {
    /// Duplicate names are allowed (default).
    pub const ALLOW_DUP_NAMES: InsertPolicy = InsertPolicy(0);
    /// Insertion of a duplicate name is refused.
    pub const DENY_DUP_NAMES: InsertPolicy = InsertPolicy(1);
    /// A duplicate name gets a numeric suffix appended.
    pub const RENAME_DUP: InsertPolicy = InsertPolicy(2);
    /// Node-pointing duplicates are merged leaf-by-leaf.
    pub const MERGE: InsertPolicy = InsertPolicy(4);

    /// Whether all bits of `other` are set.
    pub fn contains(self, other: InsertPolicy) -> bool {
        if other.0 == 0 {
            self.0 == 0
        } else {
            self.0 & other.0 == other.0
        }
    }
}

impl std::ops::BitOr for InsertPolicy {
    type Output = InsertPolicy;
    fn bitor(self, rhs: InsertPolicy) -> InsertPolicy {
        InsertPolicy(self.0 | rhs.0)
    }
}

/// Options tuning tree algorithms, subscriptions and map links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TreeOpts(pub u32);

impl TreeOpts {
    /// No special behavior.
    pub const NORMAL: TreeOpts = TreeOpts(0);
    /// Follow into contained nodes.
    pub const DEEP: TreeOpts = TreeOpts(4);
    /// Defer recomputation until the next request.
    pub const LAZY: TreeOpts = TreeOpts(8);
    /// Resolve symbolic links during walks.
    pub const FOLLOW_SYM_LINKS: TreeOpts = TreeOpts(16);
    /// Trigger lazy-load links during walks.
    pub const FOLLOW_LAZY_LINKS: TreeOpts = TreeOpts(32);
    /// Ignore events originating inside a map link's output subtree.
    ///
    /// Without this bit a mapper writing into its own output can retrigger
    /// itself; guarding against that is the caller's responsibility.
    pub const MUTE_OUTPUT_NODE: TreeOpts = TreeOpts(64);
    /// Run mapper invocations as detached workers.
    pub const DETACHED_WORKERS: TreeOpts = TreeOpts(128);
    /// High-priority dispatch for callbacks.
    pub const HIGH_PRIORITY: TreeOpts = TreeOpts(256);
    /// Track spawned workers and wake subscribers on completion.
    pub const TRACK_WORKERS: TreeOpts = TreeOpts(512);
    /// Clear output directories/nodes before recomputation.
    pub const CLEAR_DIRS: TreeOpts = TreeOpts(1024);

    /// Whether all bits of `other` are set.
    pub fn contains(self, other: TreeOpts) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for TreeOpts {
    type Output = TreeOpts;
    fn bitor(self, rhs: TreeOpts) -> TreeOpts {
        TreeOpts(self.0 | rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_combine() {
        let f = Flags::PERSISTENT | Flags::LAZY_LOAD;
        assert!(f.contains(Flags::PERSISTENT));
        assert!(f.contains(Flags::LAZY_LOAD));
        assert!(!f.contains(Flags::DISABLED));
    }

    #[test]
    fn policy_default_allows_dups() {
        let p = InsertPolicy::default();
        assert!(p.contains(InsertPolicy::ALLOW_DUP_NAMES));
        assert!(!p.contains(InsertPolicy::DENY_DUP_NAMES));
    }

    #[test]
    fn opts_combine() {
        let o = TreeOpts::DEEP | TreeOpts::MUTE_OUTPUT_NODE;
        assert!(o.contains(TreeOpts::DEEP));
        assert!(!o.contains(TreeOpts::LAZY));
    }
}
