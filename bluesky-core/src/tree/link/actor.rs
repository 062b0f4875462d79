//! Link actor: message vocabulary and handlers.
//!
//! One actor per link engine, spawned lazily on first use. The mailbox
//! serializes all mutations; request jobs that may suspend (path
//! resolution, bridge pulls, mapper runs) execute as separate tasks and
//! report back through the mailbox, so waiters of a Busy request are always
//! resolved by exactly one completion message.

use crate::error::{Error, ErrorBox};
use crate::inode::Inode;
use crate::kernel;
use crate::object::Object;
use crate::property::Propdict;
use crate::transaction::{LinkTransaction, TrResult};
use crate::tree::event::{Event, TreeEvent};
use crate::tree::link::base::{emit_ack, status_params, LinkImpl, LinkKind};
use crate::tree::link::{fusion, map, sym, Link, LinkEngine};
use crate::tree::node::Node;
use crate::tree::{Flags, Req, ReqReset, ReqStatus, TreeOpts};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;

type ObjReply = oneshot::Sender<Result<Object, ErrorBox>>;
type NodeReply = oneshot::Sender<Result<Node, ErrorBox>>;

/// Typed message vocabulary of a link actor.
pub(crate) enum LinkMsg {
    GetName(oneshot::Sender<String>),
    Rename {
        new: String,
        silent: bool,
        tx: Option<oneshot::Sender<usize>>,
    },
    GetFlags(oneshot::Sender<Flags>),
    SetFlags(Flags),
    GetInode(oneshot::Sender<Option<Inode>>),
    GetOid(oneshot::Sender<String>),
    GetOtid(oneshot::Sender<String>),
    GetStatus {
        req: Req,
        tx: oneshot::Sender<ReqStatus>,
    },
    ResetStatus {
        req: Req,
        mode: ReqReset,
        new: ReqStatus,
        cmp: ReqStatus,
        silent: bool,
        tx: Option<oneshot::Sender<ReqStatus>>,
    },
    Data {
        wait: bool,
        tx: Option<ObjReply>,
    },
    DataNode {
        wait: bool,
        tx: Option<NodeReply>,
    },
    DataJobDone(Result<Object, ErrorBox>),
    NodeJobDone(Result<Node, ErrorBox>),
    Apply {
        tr: LinkTransaction,
        tx: oneshot::Sender<TrResult>,
    },
    CloneLink {
        deep: bool,
        tx: oneshot::Sender<Result<Link, ErrorBox>>,
    },
    MapEvent(TreeEvent),
    Bye,
}

/// Spawn the actor task for a link engine; returns its mailbox.
pub(crate) fn spawn(imp: Arc<LinkImpl>, eng: Weak<LinkEngine>) -> UnboundedSender<LinkMsg> {
    let (tx, rx) = unbounded_channel();
    let self_tx = tx.clone();
    kernel::spawn(run(imp, eng, rx, self_tx));
    tx
}

fn origin(eng: &Weak<LinkEngine>) -> Option<Link> {
    eng.upgrade().map(|eng| Link { eng })
}

async fn run(
    imp: Arc<LinkImpl>,
    eng: Weak<LinkEngine>,
    mut rx: UnboundedReceiver<LinkMsg>,
    self_tx: UnboundedSender<LinkMsg>,
) {
    while let Some(msg) = rx.recv().await {
        match msg {
            LinkMsg::GetName(tx) => {
                let _ = tx.send(imp.name.read().clone());
            }
            LinkMsg::Rename { new, silent, tx } => {
                let count = handle_rename(&imp, &eng, new, silent);
                if let Some(tx) = tx {
                    let _ = tx.send(count);
                }
            }
            LinkMsg::GetFlags(tx) => {
                let _ = tx.send(*imp.flags.read());
            }
            LinkMsg::SetFlags(f) => {
                *imp.flags.write() = f;
            }
            LinkMsg::GetInode(tx) => {
                let _ = tx.send(imp.inode.read().clone());
            }
            LinkMsg::GetOid(tx) => {
                let _ = tx.send(imp.quick_oid());
            }
            LinkMsg::GetOtid(tx) => {
                let _ = tx.send(imp.quick_otid());
            }
            LinkMsg::GetStatus { req, tx } => {
                let _ = tx.send(imp.req_status(req));
            }
            LinkMsg::ResetStatus {
                req,
                mode,
                new,
                cmp,
                silent,
                tx,
            } => {
                let (prev, changed) = imp.rs_reset(req, mode, new, cmp);
                if changed && !silent {
                    if let Some(link) = origin(&eng) {
                        emit_ack(
                            &link,
                            Event::LINK_STATUS_CHANGED,
                            status_params(req, new, prev),
                        );
                    }
                }
                if let Some(tx) = tx {
                    let _ = tx.send(prev);
                }
            }
            LinkMsg::Data { wait, tx } => {
                handle_data(&imp, &eng, &self_tx, wait, tx);
            }
            LinkMsg::DataNode { wait, tx } => {
                handle_data_node(&imp, &eng, &self_tx, wait, tx);
            }
            LinkMsg::DataJobDone(res) => {
                let prev = imp.data_st.lock().finish(&res);
                if let Some(link) = origin(&eng) {
                    let new = imp.req_status(Req::Data);
                    emit_ack(
                        &link,
                        Event::LINK_STATUS_CHANGED,
                        status_params(Req::Data, new, prev),
                    );
                    if let Ok(obj) = &res {
                        let mut params = Propdict::new();
                        params.set("oid", obj.id());
                        emit_ack(&link, Event::DATA_MODIFIED, params);
                    }
                }
            }
            LinkMsg::NodeJobDone(res) => {
                let prev = imp.node_st.lock().finish(&res);
                if let Some(link) = origin(&eng) {
                    let new = imp.req_status(Req::DataNode);
                    emit_ack(
                        &link,
                        Event::LINK_STATUS_CHANGED,
                        status_params(Req::DataNode, new, prev),
                    );
                }
            }
            LinkMsg::Apply { tr, tx } => {
                let Some(link) = origin(&eng) else {
                    let _ = tx.send(Err(Error::TrEmptyTarget.pack()));
                    continue;
                };
                let ack_link = link.clone();
                kernel::spawn(async move {
                    let res = crate::tree::queue::queue().apply(move || tr(link)).await;
                    if res.is_ok() {
                        emit_ack(&ack_link, Event::DATA_MODIFIED, Propdict::new());
                    }
                    let _ = tx.send(res);
                });
            }
            LinkMsg::CloneLink { deep, tx } => {
                let res = match origin(&eng) {
                    Some(link) => link.clone_link_sync(deep).map_err(|e| e.pack()),
                    None => Err(Error::TrEmptyTarget.pack()),
                };
                let _ = tx.send(res);
            }
            LinkMsg::MapEvent(ev) => {
                let Some(link) = origin(&eng) else { continue };
                let LinkKind::Map(m) = &imp.kind else { continue };
                if m.opts.contains(TreeOpts::LAZY) {
                    // Re-enter the refresh state: next DataNode re-runs the
                    // mapper over a cleared output.
                    imp.rs_reset(Req::DataNode, ReqReset::Always, ReqStatus::Void, ReqStatus::Void);
                    m.output.clear().await;
                } else {
                    match map::run_mapper(&link, ev).await {
                        Ok(_) => {
                            emit_ack(&link, Event::DATA_NODE_MODIFIED, Propdict::new());
                        }
                        Err(e) => {
                            if !e.is_quiet() {
                                tracing::warn!(lid = %imp.id, error = %e, "map link update failed");
                            }
                        }
                    }
                }
            }
            LinkMsg::Bye => break,
        }
    }
}

fn handle_rename(imp: &Arc<LinkImpl>, eng: &Weak<LinkEngine>, new: String, silent: bool) -> usize {
    let prev = imp.set_name(new.clone());
    if prev == new {
        return 0;
    }
    if let Some(owner) = imp.owner() {
        owner.imp().reindex_name(imp.id, &prev, &new);
    }
    if !silent {
        if let Some(link) = origin(eng) {
            let mut params = Propdict::new();
            params.set("new_name", new).set("prev_name", prev);
            emit_ack(&link, Event::LINK_RENAMED, params);
        }
    }
    1
}

fn handle_data(
    imp: &Arc<LinkImpl>,
    eng: &Weak<LinkEngine>,
    self_tx: &UnboundedSender<LinkMsg>,
    wait: bool,
    tx: Option<ObjReply>,
) {
    {
        let mut st = imp.data_st.lock();
        match st.status {
            ReqStatus::OK => {
                if let Some(obj) = imp.cached_object() {
                    drop(st);
                    if let Some(tx) = tx {
                        let _ = tx.send(Ok(obj));
                    }
                    return;
                }
                // No cache to serve from (sym and friends): restart the job.
            }
            ReqStatus::Busy => {
                match (wait, tx) {
                    (true, Some(tx)) => st.waiters.push(tx),
                    (false, Some(tx)) => {
                        let _ = tx.send(Err(Error::LinkBusy.pack()));
                    }
                    _ => {}
                }
                return;
            }
            ReqStatus::Void | ReqStatus::Error => {}
        }
        let prev = st.status;
        st.status = ReqStatus::Busy;
        if let Some(tx) = tx {
            st.waiters.push(tx);
        }
        drop(st);
        if let Some(link) = origin(eng) {
            emit_ack(
                &link,
                Event::LINK_STATUS_CHANGED,
                status_params(Req::Data, ReqStatus::Busy, prev),
            );
        }
    }
    start_data_job(imp, eng, self_tx);
}

fn start_data_job(imp: &Arc<LinkImpl>, eng: &Weak<LinkEngine>, self_tx: &UnboundedSender<LinkMsg>) {
    match &imp.kind {
        LinkKind::Nil => {
            let _ = self_tx.send(LinkMsg::DataJobDone(Err(Error::EmptyData.pack())));
        }
        LinkKind::Hard(h) => {
            if let Some(pending) = h.take_pending() {
                let obj = h.data.read().clone();
                let tx = self_tx.clone();
                kernel::spawn_blocking(move || {
                    let res = match obj {
                        Some(o) => pending(&o).map(|_| o).map_err(|e| e.pack()),
                        None => Err(Error::EmptyData.pack()),
                    };
                    let _ = tx.send(LinkMsg::DataJobDone(res));
                });
            } else {
                let res = h.data.read().clone().ok_or_else(|| Error::EmptyData.pack());
                let _ = self_tx.send(LinkMsg::DataJobDone(res));
            }
        }
        LinkKind::Weak(w) => {
            let res = w
                .data
                .read()
                .upgrade()
                .ok_or_else(|| Error::LinkExpired.pack());
            let _ = self_tx.send(LinkMsg::DataJobDone(res));
        }
        LinkKind::Sym(_) => {
            let Some(link) = origin(eng) else {
                let _ = self_tx.send(LinkMsg::DataJobDone(Err(Error::EmptyData.pack())));
                return;
            };
            let tx = self_tx.clone();
            kernel::spawn(async move {
                let res = match sym::resolve(&link).await {
                    Ok(target) => target.data().await.map_err(|e| e.pack()),
                    Err(e) => Err(e.pack()),
                };
                let _ = tx.send(LinkMsg::DataJobDone(res));
            });
        }
        LinkKind::Fusion(f) => {
            let Some(link) = origin(eng) else {
                let _ = self_tx.send(LinkMsg::DataJobDone(Err(Error::EmptyData.pack())));
                return;
            };
            let obj = f.data.read().clone();
            let tx = self_tx.clone();
            kernel::spawn(async move {
                let res = match (obj, fusion::find_bridge(&link)) {
                    (Some(o), Some(bridge)) => {
                        let pulled = o.clone();
                        let root_link = link.clone();
                        match kernel::spawn_blocking(move || {
                            bridge.pull_data(pulled, root_link, Propdict::new())
                        })
                        .await
                        {
                            Ok(Ok(())) => Ok(o),
                            Ok(Err(e)) => Err(e.pack()),
                            Err(e) => Err(Error::Fault(e.to_string()).pack()),
                        }
                    }
                    (Some(_), None) => Err(Error::NoFusionBridge.pack()),
                    (None, _) => Err(Error::EmptyData.pack()),
                };
                let _ = tx.send(LinkMsg::DataJobDone(res));
            });
        }
        LinkKind::Map(_) => {
            let _ = self_tx.send(LinkMsg::DataJobDone(map::map_data_error()));
        }
    }
}

fn handle_data_node(
    imp: &Arc<LinkImpl>,
    eng: &Weak<LinkEngine>,
    self_tx: &UnboundedSender<LinkMsg>,
    wait: bool,
    tx: Option<NodeReply>,
) {
    {
        let mut st = imp.node_st.lock();
        match st.status {
            ReqStatus::OK => {
                if let Some(node) = imp.quick_node() {
                    drop(st);
                    if let Some(tx) = tx {
                        let _ = tx.send(Ok(node));
                    }
                    return;
                }
            }
            ReqStatus::Busy => {
                match (wait, tx) {
                    (true, Some(tx)) => st.waiters.push(tx),
                    (false, Some(tx)) => {
                        let _ = tx.send(Err(Error::LinkBusy.pack()));
                    }
                    _ => {}
                }
                return;
            }
            ReqStatus::Void | ReqStatus::Error => {}
        }
        let prev = st.status;
        st.status = ReqStatus::Busy;
        if let Some(tx) = tx {
            st.waiters.push(tx);
        }
        drop(st);
        if let Some(link) = origin(eng) {
            emit_ack(
                &link,
                Event::LINK_STATUS_CHANGED,
                status_params(Req::DataNode, ReqStatus::Busy, prev),
            );
        }
    }
    start_node_job(imp, eng, self_tx);
}

fn start_node_job(imp: &Arc<LinkImpl>, eng: &Weak<LinkEngine>, self_tx: &UnboundedSender<LinkMsg>) {
    match &imp.kind {
        LinkKind::Nil => {
            let _ = self_tx.send(LinkMsg::NodeJobDone(Err(Error::EmptyData.pack())));
        }
        LinkKind::Hard(h) => {
            let res = match h.data.read().clone() {
                Some(o) => o.data_node().ok_or_else(|| Error::NotANode.pack()),
                None => Err(Error::EmptyData.pack()),
            };
            let _ = self_tx.send(LinkMsg::NodeJobDone(res));
        }
        LinkKind::Weak(w) => {
            let res = match w.data.read().upgrade() {
                Some(o) => o.data_node().ok_or_else(|| Error::NotANode.pack()),
                None => Err(Error::LinkExpired.pack()),
            };
            let _ = self_tx.send(LinkMsg::NodeJobDone(res));
        }
        LinkKind::Sym(_) => {
            let Some(link) = origin(eng) else {
                let _ = self_tx.send(LinkMsg::NodeJobDone(Err(Error::EmptyData.pack())));
                return;
            };
            let tx = self_tx.clone();
            kernel::spawn(async move {
                let res = match sym::resolve(&link).await {
                    Ok(target) => target.data_node().await.map_err(|e| e.pack()),
                    Err(e) => Err(e.pack()),
                };
                let _ = tx.send(LinkMsg::NodeJobDone(res));
            });
        }
        LinkKind::Fusion(f) => {
            let Some(link) = origin(eng) else {
                let _ = self_tx.send(LinkMsg::NodeJobDone(Err(Error::EmptyData.pack())));
                return;
            };
            let obj = f.data.read().clone();
            let tx = self_tx.clone();
            kernel::spawn(async move {
                let res = match (obj, fusion::find_bridge(&link)) {
                    (Some(o), Some(bridge)) => {
                        let populated = o.clone();
                        let root_link = link.clone();
                        match kernel::spawn_blocking(move || {
                            bridge.populate(populated, root_link, Propdict::new())
                        })
                        .await
                        {
                            Ok(Ok(())) => o.data_node().ok_or_else(|| Error::NotANode.pack()),
                            Ok(Err(e)) => Err(e.pack()),
                            Err(e) => Err(Error::Fault(e.to_string()).pack()),
                        }
                    }
                    (Some(_), None) => Err(Error::NoFusionBridge.pack()),
                    (None, _) => Err(Error::EmptyData.pack()),
                };
                let _ = tx.send(LinkMsg::NodeJobDone(res));
            });
        }
        LinkKind::Map(_) => {
            let Some(link) = origin(eng) else {
                let _ = self_tx.send(LinkMsg::NodeJobDone(Err(Error::EmptyData.pack())));
                return;
            };
            let tx = self_tx.clone();
            kernel::spawn(async move {
                let refresh = TreeEvent::new(Event::NIL, Link::nil(), Propdict::new());
                let res = map::run_mapper(&link, refresh).await.map_err(|e| e.pack());
                let _ = tx.send(LinkMsg::NodeJobDone(res));
            });
        }
    }
}
