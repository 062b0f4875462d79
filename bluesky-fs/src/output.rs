//! Archive writer.
//!
//! Walks the tree in pre-order through blocking engine requests. Every link
//! gets a JSON form: the root link's inline in the root file, every other
//! link in its own `.links/<id>.bsl` head file. Object payload writes are
//! enqueued on the session manager and awaited once, at top-level close.

use crate::formatter::get_active_formatter;
use crate::manager::FrmManager;
use crate::{
    TFSOpts, EMPTY_PAYLOAD_FILE, FORMAT_VERSION, LINKS_DIR, LINK_FILE_EXT, OBJECTS_DIR,
};
use bluesky_core::{kernel, Error, Key, Link, LinkId, Result};
use byteorder::{LittleEndian, WriteBytesExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::fs::File;
use std::future::Future;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::pin::Pin;

struct SaveCtx {
    links_path: PathBuf,
    objects_path: PathBuf,
    opts: TFSOpts,
    manager: FrmManager,
    seen_objects: Mutex<HashSet<String>>,
    seen_node_dirs: Mutex<HashSet<String>>,
    errors: Mutex<Vec<Error>>,
}

/// Save the tree rooted at `root` into the directory of `root_file`.
///
/// The root file records the archive version and directory names, then the
/// root link's form. Returns the per-job errors collected while waiting for
/// deferred object payload writes.
pub async fn save_tree(
    root: &Link,
    root_file: impl AsRef<Path>,
    opts: TFSOpts,
) -> Result<Vec<Error>> {
    let root_file = root_file.as_ref();
    let dir = root_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or(Error::EmptyPath)?
        .to_path_buf();

    if opts.contains(TFSOpts::CLEAR_DIRS) && dir.exists() {
        std::fs::remove_dir_all(&dir)
            .map_err(|e| Error::CantWriteFile(format!("{}: {e}", dir.display())))?;
    }
    let links_path = dir.join(LINKS_DIR);
    let objects_path = dir.join(OBJECTS_DIR);
    for p in [&dir, &links_path, &objects_path] {
        std::fs::create_dir_all(p)
            .map_err(|e| Error::CantWriteFile(format!("{}: {e}", p.display())))?;
    }

    let ctx = SaveCtx {
        links_path,
        objects_path,
        opts,
        manager: FrmManager::new(),
        seen_objects: Mutex::new(HashSet::new()),
        seen_node_dirs: Mutex::new(HashSet::new()),
        errors: Mutex::new(Vec::new()),
    };

    let root_form = link_form(root.clone(), &ctx).await?;
    let doc = json!({
        "format_version": FORMAT_VERSION,
        "links_dir": LINKS_DIR,
        "objects_dir": OBJECTS_DIR,
        "root": root_form,
    });
    write_json(root_file, &doc)?;

    // Single deferred wait: collect every payload job enqueued during the
    // walk, then persist the empty-payload index.
    let (job_errors, empty_oids) = ctx.manager.wait_jobs_done(kernel::default_timeout()).await;
    write_empty_payloads(&dir.join(EMPTY_PAYLOAD_FILE), &empty_oids)?;

    let mut errors = ctx.errors.into_inner();
    errors.extend(job_errors);
    Ok(errors)
}

fn write_json(path: &Path, doc: &Value) -> Result<()> {
    let file = File::create(path)
        .map_err(|e| Error::CantWriteFile(format!("{}: {e}", path.display())))?;
    let mut out = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut out, doc)?;
    out.flush()
        .map_err(|e| Error::CantWriteFile(format!("{}: {e}", path.display())))?;
    Ok(())
}

fn write_empty_payloads(path: &Path, oids: &[String]) -> Result<()> {
    let file = File::create(path)
        .map_err(|e| Error::CantWriteFile(format!("{}: {e}", path.display())))?;
    let mut out = BufWriter::new(file);
    for oid in oids {
        // Non-uuid instance ids have no 128-bit form; their zero-byte
        // payload files are kept instead (see the save job).
        if let Some(id) = LinkId::parse(oid) {
            out.write_u128::<LittleEndian>(id.as_uuid().as_u128())
                .map_err(|e| Error::CantWriteFile(format!("{}: {e}", path.display())))?;
        }
    }
    out.flush()
        .map_err(|e| Error::CantWriteFile(format!("{}: {e}", path.display())))?;
    Ok(())
}

/// Serialize one link into its JSON form, writing child link files along the
/// way and enqueueing payload jobs for non-node objects.
fn link_form<'a>(
    link: Link,
    ctx: &'a SaveCtx,
) -> Pin<Box<dyn Future<Output = Result<Value>> + Send + 'a>> {
    Box::pin(async move {
        let bare = link.bare();
        let mut form = json!({
            "id": link.home_id(),
            "name": bare.name(),
            "flags": bare.flags().0,
            "type_id": link.type_id(),
        });
        if !ctx.opts.contains(TFSOpts::SAVE_MINIMAL) {
            if let Some(inode) = bare.inode() {
                form["inode"] = serde_json::to_value(inode)?;
            }
        }

        match link.type_id() {
            "sym_link" => {
                form["path"] = Value::String(link.sym_path().unwrap_or_default());
            }
            "weak_link" => {
                match link.data().await {
                    Ok(obj) => form["object_ref"] = Value::String(obj.id().to_owned()),
                    // An expired observer is archived as a dead reference.
                    Err(_) => form["object_ref"] = Value::Null,
                }
            }
            "hard_link" | "fusion_link" => {
                let obj = match link.data().await {
                    Ok(obj) => obj,
                    Err(e) => {
                        ctx.errors.lock().push(e);
                        return Ok(form);
                    }
                };
                let Some(fmt) = get_active_formatter(&obj.type_id()) else {
                    ctx.errors
                        .lock()
                        .push(Error::MissingFormatter(obj.type_id()));
                    return Ok(form);
                };
                form["fmt"] = Value::String(fmt.name.clone());
                form["object"] = json!({
                    "type_id": obj.type_id(),
                    "id": obj.id(),
                });

                if let Some(node) = obj.data_node() {
                    let node_dir = node.home_id();
                    if !ctx.seen_node_dirs.lock().insert(node_dir.clone()) {
                        ctx.errors.lock().push(Error::KeyMismatch);
                        return Ok(form);
                    }
                    form["node_dir"] = Value::String(node_dir);
                    let order: Vec<String> = node
                        .keys(Key::AnyOrder)
                        .await
                        .iter()
                        .map(|id| id.to_string())
                        .collect();
                    form["leafs_order"] = serde_json::to_value(&order)?;
                    if !fmt.stores_node {
                        for child in node.leafs(Key::AnyOrder).await {
                            let head = ctx
                                .links_path
                                .join(format!("{}.{LINK_FILE_EXT}", child.home_id()));
                            let child_form = link_form(child, ctx).await?;
                            write_json(&head, &child_form)?;
                        }
                    }
                } else if ctx.seen_objects.lock().insert(obj.id().to_owned()) {
                    let target = ctx
                        .objects_path
                        .join(format!("{}.{}", obj.home_id(), fmt.name));
                    ctx.manager.enqueue_save(obj, fmt, target);
                }
            }
            other => {
                // Map and nil links carry closures or nothing; neither has
                // an archived form beyond the prologue.
                tracing::warn!(type_id = other, lid = %link.id(), "link variant is not archived");
            }
        }
        Ok(form)
    })
}
