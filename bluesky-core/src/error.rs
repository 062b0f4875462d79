//! Error types for the tree kernel.
//!
//! Every error kind carries a stable `(category, code)` pair so errors can
//! cross actor boundaries in a serializable box and be reconstructed on the
//! other side. The `ok` state is a distinguished success value used by
//! transaction results.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The main result type used across the kernel.
pub type Result<T> = std::result::Result<T, Error>;

/// Error category names used in boxed form.
pub mod category {
    /// Catch-all for free-form messages.
    pub const GENERIC: &str = "bluesky";
    /// Kernel subsystem errors (factories, transactions, plugins).
    pub const KERNEL: &str = "bluesky::kernel";
    /// Tree subsystem errors (links, nodes, archive).
    pub const TREE: &str = "bluesky::tree";
    /// Runtime faults converted from panics.
    pub const RUNTIME: &str = "bluesky::runtime";
}

/// The main error type for tree and kernel operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    // -------------------------------------------------------------------------
    // Tree: link errors (T001-T099)
    // -------------------------------------------------------------------------
    /// Link holds no data.
    #[error("T001: Empty data")]
    EmptyData,

    /// Link carries no inode.
    #[error("T002: inode is missing")]
    EmptyInode,

    /// Pointee object is not node-backed.
    #[error("T003: Not a node")]
    NotANode,

    /// Weak link observed a destroyed target.
    #[error("T004: Link is expired")]
    LinkExpired,

    /// Symbolic link path cannot be resolved.
    #[error("T005: Link path is invalid or cannot be resolved: {0}")]
    LinkBadPath(String),

    /// Request is busy and the caller asked not to wait.
    #[error("T006: Link is busy")]
    LinkBusy,

    /// Fusion link has no bridge to pull data through.
    #[error("T007: Fusion bridge isn't set")]
    NoFusionBridge,

    // -------------------------------------------------------------------------
    // Tree: node errors (T100-T199)
    // -------------------------------------------------------------------------
    /// Given key is not found.
    #[error("T101: Given key is not found")]
    KeyMismatch,

    /// Size of the given keys set doesn't match node size.
    #[error("T102: Size of given keys set doesn't match size of node")]
    WrongOrderSize,

    // -------------------------------------------------------------------------
    // Tree: filesystem archive errors (T200-T299)
    // -------------------------------------------------------------------------
    /// Path is empty.
    #[error("T201: Path is empty")]
    EmptyPath,

    /// Path doesn't exist.
    #[error("T202: Path doesn't exist: {0}")]
    PathNotExists(String),

    /// Path is not a directory.
    #[error("T203: Path is not a directory: {0}")]
    PathNotDirectory(String),

    /// Can't open file for reading.
    #[error("T204: Can't open file for reading: {0}")]
    CantReadFile(String),

    /// Can't open file for writing.
    #[error("T205: Can't open file for writing: {0}")]
    CantWriteFile(String),

    /// Link save/load wasn't started.
    #[error("T206: Link save/load wasn't started")]
    LinkWasntStarted,

    /// Node save/load wasn't started.
    #[error("T207: Node save/load wasn't started")]
    NodeWasntStarted,

    /// Formatter isn't installed for the given object type.
    #[error("T208: Formatter isn't installed for object type '{0}'")]
    MissingFormatter(String),

    /// Couldn't generate a unique filename.
    #[error("T209: Couldn't generate unique filename")]
    CantMakeFilename,

    // -------------------------------------------------------------------------
    // Kernel errors (K001-K099)
    // -------------------------------------------------------------------------
    /// Object failed an integrity check.
    #[error("K001: Bad object: {0}")]
    BadObject(String),

    /// Object has an unexpected type id.
    #[error("K002: Unexpected object type: expected '{expected}', got '{actual}'")]
    UnexpectedObjectType {
        /// The type id the caller expected.
        expected: String,
        /// The type id actually found.
        actual: String,
    },

    /// Transaction target is nil.
    #[error("K003: Transaction target is empty")]
    TrEmptyTarget,

    /// Plugin shared library cannot be loaded.
    #[error("K004: Can't load shared library: {0}")]
    CantLoadDLL(String),

    /// Plugin shared library cannot be unloaded.
    #[error("K005: Can't unload shared library: {0}")]
    CantUnloadDLL(String),

    /// Type factory registration failed.
    #[error("K006: Can't register type: {0}")]
    CantRegisterType(String),

    /// Blocking request exceeded its timeout.
    #[error("K007: Request timed out")]
    RequestTimeout,

    // -------------------------------------------------------------------------
    // Generic
    // -------------------------------------------------------------------------
    /// Free-form error message.
    #[error("{0}")]
    Custom(String),

    /// Expected condition that should not be logged.
    #[error("{0}")]
    Quiet(String),

    /// A panic converted to an error by the scope-safe evaluator.
    #[error("runtime fault: {0}")]
    Fault(String),
}

impl Error {
    /// Category name of this error kind.
    pub fn category(&self) -> &'static str {
        use Error::*;
        match self {
            EmptyData | EmptyInode | NotANode | LinkExpired | LinkBadPath(_) | LinkBusy
            | NoFusionBridge | KeyMismatch | WrongOrderSize | EmptyPath | PathNotExists(_)
            | PathNotDirectory(_) | CantReadFile(_) | CantWriteFile(_) | LinkWasntStarted
            | NodeWasntStarted | MissingFormatter(_) | CantMakeFilename => category::TREE,
            BadObject(_) | UnexpectedObjectType { .. } | TrEmptyTarget | CantLoadDLL(_)
            | CantUnloadDLL(_) | CantRegisterType(_) | RequestTimeout => category::KERNEL,
            Fault(_) => category::RUNTIME,
            Custom(_) | Quiet(_) => category::GENERIC,
        }
    }

    /// Stable integer code of this error kind.
    pub fn code(&self) -> i32 {
        use Error::*;
        match self {
            EmptyData => 1,
            EmptyInode => 2,
            NotANode => 3,
            LinkExpired => 4,
            LinkBadPath(_) => 5,
            LinkBusy => 6,
            NoFusionBridge => 7,
            KeyMismatch => 101,
            WrongOrderSize => 102,
            EmptyPath => 201,
            PathNotExists(_) => 202,
            PathNotDirectory(_) => 203,
            CantReadFile(_) => 204,
            CantWriteFile(_) => 205,
            LinkWasntStarted => 206,
            NodeWasntStarted => 207,
            MissingFormatter(_) => 208,
            CantMakeFilename => 209,
            BadObject(_) => 301,
            UnexpectedObjectType { .. } => 302,
            TrEmptyTarget => 303,
            CantLoadDLL(_) => 304,
            CantUnloadDLL(_) => 305,
            CantRegisterType(_) => 306,
            RequestTimeout => 307,
            Custom(_) => -1,
            Quiet(_) => -2,
            Fault(_) => -3,
        }
    }

    /// Whether this error is an expected condition that should not be logged.
    pub fn is_quiet(&self) -> bool {
        matches!(self, Error::Quiet(_))
    }

    /// Pack into a serializable box for cross-actor transmission.
    pub fn pack(&self) -> ErrorBox {
        ErrorBox {
            category: self.category().to_owned(),
            code: self.code(),
            message: self.to_string(),
            quiet: self.is_quiet(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Custom(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Custom(format!("serialization: {e}"))
    }
}

/// Serializable error form suitable for crossing actor boundaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBox {
    /// Category name of the originating error.
    pub category: String,
    /// Stable integer code within the category.
    pub code: i32,
    /// Human-readable message.
    pub message: String,
    /// Quiet errors are expected conditions and are not logged.
    #[serde(default)]
    pub quiet: bool,
}

impl std::fmt::Display for ErrorBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}:{}] {}", self.category, self.code, self.message)
    }
}

impl std::error::Error for ErrorBox {}

impl From<Error> for ErrorBox {
    fn from(e: Error) -> Self {
        e.pack()
    }
}

impl From<ErrorBox> for Error {
    /// Unpack a boxed error, reconstructing the kind for parameterless codes
    /// and falling back to a message-preserving variant otherwise.
    fn from(b: ErrorBox) -> Self {
        use Error::*;
        match (b.category.as_str(), b.code) {
            (category::TREE, 1) => EmptyData,
            (category::TREE, 2) => EmptyInode,
            (category::TREE, 3) => NotANode,
            (category::TREE, 4) => LinkExpired,
            (category::TREE, 6) => LinkBusy,
            (category::TREE, 7) => NoFusionBridge,
            (category::TREE, 101) => KeyMismatch,
            (category::TREE, 102) => WrongOrderSize,
            (category::TREE, 201) => EmptyPath,
            (category::TREE, 206) => LinkWasntStarted,
            (category::TREE, 207) => NodeWasntStarted,
            (category::TREE, 209) => CantMakeFilename,
            (category::KERNEL, 303) => TrEmptyTarget,
            (category::KERNEL, 307) => RequestTimeout,
            (category::RUNTIME, _) => Fault(b.message),
            _ if b.quiet => Quiet(b.message),
            _ => Custom(b.message),
        }
    }
}

/// Run a closure, converting panics into [`Error::Fault`].
///
/// Actors wrap user-supplied code (transactions, mappers, bridges) with this
/// evaluator so a panic never takes the actor down.
pub fn eval_safe<T>(f: impl FnOnce() -> Result<T> + std::panic::UnwindSafe) -> Result<T> {
    match std::panic::catch_unwind(f) {
        Ok(res) => res,
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_owned())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_owned());
            Err(Error::Fault(msg))
        }
    }
}
