//! Map links: reproduce a transformed view of an input node into an output
//! node, re-evaluating on observed events.

use crate::kernel;
use crate::object::Object;
use crate::tree::event::{Event, TreeEvent};
use crate::tree::link::actor::LinkMsg;
use crate::tree::link::base::LinkKind;
use crate::tree::link::{Link, LinkEngine};
use crate::tree::node::Node;
use crate::tree::{InsertPolicy, Key, TreeOpts};
use crate::types::LinkId;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

/// Mapper invoked once per input link; yields zero or one output link.
pub type LinkMapper = Arc<dyn Fn(Link, Node, TreeEvent) -> Option<Link> + Send + Sync>;

/// Mapper invoked with the whole input node; fills the output node itself.
pub type NodeMapper = Arc<dyn Fn(Node, Node, TreeEvent) + Send + Sync>;

/// The two mapping modes of a map link.
#[derive(Clone)]
pub enum Mapper {
    /// Per-link mapping with engine-managed output bookkeeping.
    Link(LinkMapper),
    /// Whole-node mapping; the closure owns the output contents.
    Node(NodeMapper),
}

pub(crate) struct MapData {
    pub mapper: Mapper,
    pub input: Node,
    pub output: Node,
    /// Events in the input subtree that trigger re-evaluation.
    pub update_on: Event,
    pub opts: TreeOpts,
    /// Input-group subscription of the retranslator.
    pub sub_id: OnceCell<u64>,
    /// Link-mapper bookkeeping: input link id -> output link id.
    pub io_map: Mutex<HashMap<LinkId, LinkId>>,
}

impl MapData {
    pub fn new(
        mapper: Mapper,
        input: Node,
        output: Node,
        update_on: Event,
        opts: TreeOpts,
    ) -> Self {
        Self {
            mapper,
            input,
            output,
            update_on,
            opts,
            sub_id: OnceCell::new(),
            io_map: Mutex::new(HashMap::new()),
        }
    }
}

/// Whether a link sits inside the given node's subtree (owner-chain walk).
fn within(link: &Link, node: &Node) -> bool {
    let mut cur = link.owner();
    let mut guard = 0usize;
    while let Some(n) = cur {
        if n == *node {
            return true;
        }
        cur = n.handle().and_then(|h| h.owner());
        guard += 1;
        if guard > 256 {
            break;
        }
    }
    false
}

/// Attach the input retranslator: a task that joins the input node's home
/// group, filters events by the update mask and options, and forwards them
/// to the map link's actor.
pub(crate) fn start_retranslator(link: &Link) {
    let LinkKind::Map(m) = &link.imp().kind else {
        return;
    };
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let sid = m.input.imp().home.add_sub(m.update_on, tx);
    let _ = m.sub_id.set(sid);

    let eng: Weak<LinkEngine> = Arc::downgrade(&link.eng);
    let input = m.input.clone();
    let output = m.output.clone();
    let opts = m.opts;
    kernel::spawn(async move {
        while let Some(ev) = rx.recv().await {
            let Some(eng) = eng.upgrade() else { break };
            let map_link = Link { eng };
            // Direct-child filter: erased links have no owner anymore, so
            // erase acks are matched by the emitting node instead.
            let direct = if ev.code == Event::LINK_ERASED {
                ev.params.get_id("node") == Some(input.id())
            } else {
                ev.origin.owner().as_ref() == Some(&input)
            };
            if !opts.contains(TreeOpts::DEEP) && !direct {
                continue;
            }
            if opts.contains(TreeOpts::MUTE_OUTPUT_NODE) && within(&ev.origin, &output) {
                continue;
            }
            if map_link.raw_actor().send(LinkMsg::MapEvent(ev)).is_err() {
                break;
            }
        }
    });
}

/// Run one mapper evaluation for the given event.
///
/// The closure itself executes on the blocking pool; link-mapper output
/// bookkeeping (insert/erase against the output node) happens here.
pub(crate) async fn run_mapper(link: &Link, ev: TreeEvent) -> crate::error::Result<Node> {
    let LinkKind::Map(m) = &link.imp().kind else {
        return Err(crate::error::Error::EmptyData);
    };
    let input = m.input.clone();
    let output = m.output.clone();
    match &m.mapper {
        Mapper::Node(f) => {
            let f = f.clone();
            let (i, o) = (input.clone(), output.clone());
            kernel::spawn_blocking(move || f(i, o, ev))
                .await
                .map_err(|e| crate::error::Error::Fault(e.to_string()))?;
        }
        Mapper::Link(f) => {
            if ev.code == Event::NIL {
                // Full refresh over the current input leafs.
                for src in input.leafs(Key::AnyOrder).await {
                    apply_link_mapper(link, f.clone(), src, &output, ev.clone()).await?;
                }
            } else {
                let lid = ev.params.get_id("lid").unwrap_or_else(|| ev.origin.id());
                let src = input.find(lid).await;
                if !src.is_nil() {
                    apply_link_mapper(link, f.clone(), src, &output, ev).await?;
                } else if let LinkKind::Map(m) = &link.imp().kind {
                    // Source gone: drop its mapped counterpart.
                    let mapped = m.io_map.lock().remove(&lid);
                    if let Some(out_lid) = mapped {
                        output.erase(out_lid).await;
                    }
                }
            }
        }
    }
    Ok(output)
}

async fn apply_link_mapper(
    link: &Link,
    f: LinkMapper,
    src: Link,
    output: &Node,
    ev: TreeEvent,
) -> crate::error::Result<()> {
    let src_id = src.id();
    let out = output.clone();
    let produced = kernel::spawn_blocking(move || f(src, out, ev))
        .await
        .map_err(|e| crate::error::Error::Fault(e.to_string()))?;
    let LinkKind::Map(m) = &link.imp().kind else {
        return Ok(());
    };
    match produced {
        Some(mapped) => {
            let prev = m.io_map.lock().insert(src_id, mapped.id());
            if let Some(prev_lid) = prev {
                if prev_lid != mapped.id() {
                    output.erase(prev_lid).await;
                }
            }
            output
                .insert(mapped, InsertPolicy::ALLOW_DUP_NAMES)
                .await;
        }
        None => {
            let mapped = m.io_map.lock().remove(&src_id);
            if let Some(out_lid) = mapped {
                output.erase(out_lid).await;
            }
        }
    }
    Ok(())
}

/// Build a node-mapper map link that mirrors only the children whose object
/// type id is in `allowed_otids`.
pub fn make_otid_filter(
    allowed_otids: impl IntoIterator<Item = String>,
    name: impl Into<String>,
    src: Node,
    dest: Option<Node>,
    update_on: Event,
    opts: TreeOpts,
    flags: crate::tree::Flags,
) -> Link {
    let allowed: HashSet<String> = allowed_otids.into_iter().collect();
    let mapper: NodeMapper = Arc::new(move |input: Node, output: Node, _ev: TreeEvent| {
        output.clear_blocking();
        for l in input.leafs_blocking(Key::AnyOrder) {
            if allowed.contains(&l.imp().quick_otid()) {
                if let Ok(mirror) = l.clone_link_sync(false) {
                    output.insert_blocking(mirror, InsertPolicy::ALLOW_DUP_NAMES);
                }
            }
        }
    });
    Link::map_link(
        Mapper::Node(mapper),
        name,
        src,
        dest,
        update_on,
        opts,
        flags,
    )
}

/// Data request on a map link is not meaningful; the mapped view is the
/// output node.
pub(crate) fn map_data_error() -> Result<Object, crate::error::ErrorBox> {
    Err(crate::error::Error::EmptyData.pack())
}
