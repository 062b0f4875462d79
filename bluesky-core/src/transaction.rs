//! Transaction types.
//!
//! A transaction is a user-supplied closure executed atomically against an
//! engine through the process-wide queue. The sync form returns a
//! [`TrResult`]: a propdict of named result info, or a boxed error.

use crate::error::ErrorBox;
use crate::object::Object;
use crate::property::Propdict;
use crate::tree::link::Link;
use crate::tree::node::Node;

/// Result of a synchronous transaction: info dict or boxed error.
pub type TrResult = std::result::Result<Propdict, ErrorBox>;

/// Plain transaction with no target.
pub type Transaction = Box<dyn FnOnce() -> TrResult + Send + 'static>;

/// Transaction executed against an object.
pub type ObjTransaction = Box<dyn FnOnce(Object) -> TrResult + Send + 'static>;

/// Transaction executed against a link.
pub type LinkTransaction = Box<dyn FnOnce(Link) -> TrResult + Send + 'static>;

/// Transaction executed against a node.
pub type NodeTransaction = Box<dyn FnOnce(Node) -> TrResult + Send + 'static>;
