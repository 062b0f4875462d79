//! Archive reader.
//!
//! Symmetric to the writer: reads the root file, restores the root link and
//! every child from its `.links/<id>.bsl` head file, registers loaded
//! objects for lazy payload reads, and resolves weak references once the
//! whole structure is back. Duplicate node directories are rejected.

use crate::formatter::get_formatter;
use crate::{
    TFSOpts, EMPTY_PAYLOAD_FILE, FORMAT_VERSION, LINK_FILE_EXT,
};
use bluesky_core::{
    factory, Error, Flags, Inode, InsertPolicy, Link, LinkId, LinkProto, LinkProtoKind, Node,
    Object, PendingLoad, Result, OBJ_NODE_TYPE,
};
use byteorder::{LittleEndian, ReadBytesExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use uuid::Uuid;

struct LoadCtx {
    links_path: PathBuf,
    objects_path: PathBuf,
    /// Already materialized objects, keyed by instance id (dedups shared
    /// pointees across links).
    objects: Mutex<HashMap<String, Object>>,
    /// Node directories seen so far; duplicates are a `KeyMismatch`.
    seen_node_dirs: Mutex<HashSet<String>>,
    /// Ids whose payload was empty on save: no payload file to read.
    empty: Arc<HashSet<String>>,
}

struct DeferredWeak {
    parent: Node,
    position: usize,
    proto_id: LinkId,
    name: String,
    flags: Flags,
    inode: Option<Inode>,
    object_ref: String,
}

/// Load a tree archive; returns the restored root link.
///
/// Object payloads are not read here: every restored link carrying a
/// payload gets the `LazyLoad` flag and a deferred read that runs on the
/// first Data request.
pub async fn load_tree(root_file: impl AsRef<Path>, _opts: TFSOpts) -> Result<Link> {
    let root_file = root_file.as_ref();
    let dir = root_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or(Error::EmptyPath)?
        .to_path_buf();
    let doc = read_json(root_file)?;

    let version = doc
        .get("format_version")
        .and_then(Value::as_u64)
        .unwrap_or(0) as u32;
    if version != FORMAT_VERSION {
        return Err(Error::BadObject(format!(
            "unsupported archive version {version}, expected {FORMAT_VERSION}"
        )));
    }
    // Stored directory names are ASCII generic-format; joining converts
    // them to native separators.
    let links_dir = doc
        .get("links_dir")
        .and_then(Value::as_str)
        .unwrap_or(crate::LINKS_DIR);
    let objects_dir = doc
        .get("objects_dir")
        .and_then(Value::as_str)
        .unwrap_or(crate::OBJECTS_DIR);

    let ctx = LoadCtx {
        links_path: dir.join(links_dir),
        objects_path: dir.join(objects_dir),
        objects: Mutex::new(HashMap::new()),
        seen_node_dirs: Mutex::new(HashSet::new()),
        empty: Arc::new(read_empty_payloads(&dir.join(EMPTY_PAYLOAD_FILE))),
    };

    let root_form = doc
        .get("root")
        .ok_or_else(|| Error::BadObject("archive root form is missing".into()))?;
    let mut deferred = Vec::new();
    let root = restore_link(root_form, &ctx, &mut deferred).await?;

    // Weak links observe objects restored anywhere in the tree; resolve
    // them after the full structure is back.
    for d in deferred {
        let target = ctx.objects.lock().get(&d.object_ref).cloned();
        let link = match target {
            Some(obj) => Link::restore(LinkProto {
                id: d.proto_id,
                name: d.name,
                flags: d.flags,
                inode: d.inode,
                kind: LinkProtoKind::Weak { obj },
            }),
            None => {
                // The observed object is not part of the archive: restore
                // an already expired observer.
                let ghost = Object::from_node_with_id(Node::new(), d.object_ref.clone());
                let link = Link::restore(LinkProto {
                    id: d.proto_id,
                    name: d.name,
                    flags: d.flags,
                    inode: d.inode,
                    kind: LinkProtoKind::Weak { obj: ghost },
                });
                link
            }
        };
        d.parent
            .insert_with(link, Some(d.position), InsertPolicy::ALLOW_DUP_NAMES)
            .await;
    }
    Ok(root)
}

fn read_json(path: &Path) -> Result<Value> {
    if !path.exists() {
        return Err(Error::PathNotExists(path.display().to_string()));
    }
    let raw = std::fs::read_to_string(path)
        .map_err(|e| Error::CantReadFile(format!("{}: {e}", path.display())))?;
    Ok(serde_json::from_str(&raw)?)
}

fn read_empty_payloads(path: &Path) -> HashSet<String> {
    let mut out = HashSet::new();
    let Ok(mut file) = std::fs::File::open(path) else {
        return out;
    };
    let mut buf = Vec::new();
    if file.read_to_end(&mut buf).is_err() {
        return out;
    }
    let mut cursor = std::io::Cursor::new(buf);
    while let Ok(raw) = cursor.read_u128::<LittleEndian>() {
        out.insert(Uuid::from_u128(raw).to_string());
    }
    out
}

fn prologue(form: &Value) -> Result<(LinkId, String, Flags, Option<Inode>, String)> {
    let id = form
        .get("id")
        .and_then(Value::as_str)
        .and_then(LinkId::parse)
        .ok_or_else(|| Error::BadObject("link file carries no valid id".into()))?;
    let name = form
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();
    let flags = Flags(form.get("flags").and_then(Value::as_u64).unwrap_or(0) as u32);
    let inode = form
        .get("inode")
        .map(|v| serde_json::from_value(v.clone()))
        .transpose()?;
    let type_id = form
        .get("type_id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();
    Ok((id, name, flags, inode, type_id))
}

fn restore_link<'a>(
    form: &'a Value,
    ctx: &'a LoadCtx,
    deferred: &'a mut Vec<DeferredWeak>,
) -> Pin<Box<dyn Future<Output = Result<Link>> + Send + 'a>> {
    Box::pin(async move {
        let (id, name, flags, inode, type_id) = prologue(form)?;
        match type_id.as_str() {
            "sym_link" => {
                let path = form
                    .get("path")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned();
                Ok(Link::restore(LinkProto {
                    id,
                    name,
                    flags,
                    inode,
                    kind: LinkProtoKind::Sym { path },
                }))
            }
            "hard_link" | "fusion_link" => {
                restore_object_link(form, ctx, deferred, id, name, flags, inode, &type_id).await
            }
            "weak_link" => {
                // A weak root is legal in the form but cannot defer; resolve
                // against already loaded objects or restore it expired.
                let object_ref = form
                    .get("object_ref")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned();
                let obj = ctx
                    .objects
                    .lock()
                    .get(&object_ref)
                    .cloned()
                    .unwrap_or_else(|| Object::from_node_with_id(Node::new(), object_ref));
                Ok(Link::restore(LinkProto {
                    id,
                    name,
                    flags,
                    inode,
                    kind: LinkProtoKind::Weak { obj },
                }))
            }
            other => Err(Error::BadObject(format!(
                "unknown archived link type '{other}'"
            ))),
        }
    })
}

#[allow(clippy::too_many_arguments)]
async fn restore_object_link(
    form: &Value,
    ctx: &LoadCtx,
    deferred: &mut Vec<DeferredWeak>,
    id: LinkId,
    name: String,
    flags: Flags,
    inode: Option<Inode>,
    type_id: &str,
) -> Result<Link> {
    let obj_form = form
        .get("object")
        .ok_or_else(|| Error::BadObject(format!("link {id} carries no object form")))?;
    let otype = obj_form
        .get("type_id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();
    let oid = obj_form
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();
    let fmt_name = form
        .get("fmt")
        .and_then(Value::as_str)
        .unwrap_or(crate::BIN_FMT_NAME)
        .to_owned();

    let (obj, pending) = if otype == OBJ_NODE_TYPE {
        let node_dir = form
            .get("node_dir")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::BadObject(format!("node link {id} carries no node_dir")))?
            .to_owned();
        if !ctx.seen_node_dirs.lock().insert(node_dir) {
            return Err(Error::KeyMismatch);
        }
        let node = Node::new();
        let obj = Object::from_node_with_id(node.clone(), oid.clone());
        ctx.objects.lock().insert(oid, obj.clone());

        let order: Vec<String> = form
            .get("leafs_order")
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()?
            .unwrap_or_default();
        for (position, cid) in order.iter().enumerate() {
            let head = ctx.links_path.join(format!("{cid}.{LINK_FILE_EXT}"));
            let child_form = read_json(&head)?;
            let child_type = child_form
                .get("type_id")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if child_type == "weak_link" {
                let (cid, cname, cflags, cinode, _) = prologue(&child_form)?;
                let object_ref = child_form
                    .get("object_ref")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned();
                deferred.push(DeferredWeak {
                    parent: node.clone(),
                    position,
                    proto_id: cid,
                    name: cname,
                    flags: cflags,
                    inode: cinode,
                    object_ref,
                });
                continue;
            }
            let child = restore_link(&child_form, ctx, deferred).await?;
            node.insert(child, InsertPolicy::ALLOW_DUP_NAMES).await;
        }
        (obj, None)
    } else {
        let known = ctx.objects.lock().get(&oid).cloned();
        let obj = match known {
            Some(obj) => obj,
            None => {
                let obj = factory().create_with_id(&otype, oid.clone())?;
                ctx.objects.lock().insert(oid.clone(), obj.clone());
                obj
            }
        };
        // Every link referencing the object gets its own deferred read, so
        // the payload is fetched no matter which link is accessed first.
        let objects_path = ctx.objects_path.clone();
        let empty = ctx.empty.clone();
        let pending: PendingLoad = Box::new(move |obj: &Object| {
            if empty.contains(&oid) {
                return Ok(());
            }
            let path = objects_path.join(format!("{oid}.{fmt_name}"));
            if !path.exists() {
                return Err(Error::PathNotExists(path.display().to_string()));
            }
            let fmt = get_formatter(&obj.type_id(), &fmt_name)
                .ok_or_else(|| Error::MissingFormatter(obj.type_id()))?;
            fmt.load(obj, &path)
        });
        (obj, Some(pending))
    };

    // The bridge of a fusion link is not archived, so its payload cannot be
    // lazily re-read; only hard links get the deferred read installed.
    let lazy = pending.is_some() && type_id != "fusion_link";
    let kind = match type_id {
        "fusion_link" => LinkProtoKind::Fusion { obj },
        _ => LinkProtoKind::Hard { obj, pending },
    };
    Ok(Link::restore(LinkProto {
        id,
        name,
        flags: if lazy { flags | Flags::LAZY_LOAD } else { flags },
        inode,
        kind,
    }))
}
