//! BlueSky tree kernel.
//!
//! A concurrent hierarchical object tree: links point to reference-counted
//! objects, nodes are objects holding an ordered multi-index of links, every
//! engine is backed by an actor, every mutation is observable through home
//! event groups, and user callbacks run serialized on a process-wide
//! transaction queue.
//!
//! # Key components
//!
//! - **Links** ([`Link`]): hard, weak, symbolic, fusion and map variants
//!   over a common impl with two request state machines (Data, DataNode).
//! - **Nodes** ([`Node`]): multi-indexed ordered containers addressable by
//!   insertion order, link id, name, pointee object id and pointee type id.
//! - **Events** ([`Event`], [`TreeEvent`]): per-engine home groups with
//!   masked subscriptions, acks retransmitted up the handle chain.
//! - **Transactions** ([`queue`]): one detached thread serializing every
//!   user closure, with reentrancy fallback.
//!
//! The filesystem archive lives in the `bluesky-fs` crate.

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod inode;
pub mod kernel;
pub mod object;
pub mod property;
pub mod transaction;
pub mod tree;
pub mod types;

pub use config::KernelConfig;
pub use error::{eval_safe, Error, ErrorBox, Result};
pub use inode::Inode;
pub use object::{factory, Object, ObjectFactory, Payload, WeakObject, OBJ_NODE_TYPE};
pub use property::{Propdict, Property};
pub use transaction::{LinkTransaction, NodeTransaction, ObjTransaction, TrResult, Transaction};
pub use tree::event::{Event, EventCallback, TreeEvent};
pub use tree::link::{
    make_otid_filter, BareLink, FusionBridge, Link, LinkMapper, LinkProto, LinkProtoKind, Mapper,
    NodeMapper, PendingLoad,
};
pub use tree::node::{InsertStatus, Node};
pub use tree::path::{abspath, deref_path};
pub use tree::queue::{queue, TransQueue};
pub use tree::{Flags, InsertPolicy, Key, Req, ReqReset, ReqStatus, TreeOpts};
pub use types::LinkId;
