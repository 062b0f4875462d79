//! Tree paths: slash-separated link keys.
//!
//! Canonical paths use link ids, human-readable paths use names. `abspath`
//! walks the owner chain up to the root; the root container itself (the
//! topmost link, or a node without a handle) contributes no segment, so an
//! absolute path always resolves as children of the root node.

use crate::error::{Error, Result};
use crate::tree::link::base::LinkKind;
use crate::tree::link::Link;
use crate::tree::node::Node;
use crate::tree::{Key, TreeOpts};
use crate::types::LinkId;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;

fn key_of(link: &Link, meaning: Key) -> String {
    match meaning {
        Key::ID => link.id().to_string(),
        _ => link.imp().name.read().clone(),
    }
}

/// Absolute path of a link, walking the owner chain up to the nearest link
/// without an owner.
pub fn abspath(link: &Link, meaning: Key) -> String {
    let mut segs = Vec::new();
    let mut cur = link.clone();
    let mut guard = 0usize;
    loop {
        let Some(owner) = cur.owner() else {
            // `cur` is the root link: excluded from the path.
            break;
        };
        segs.push(key_of(&cur, meaning));
        match owner.handle() {
            Some(h) => cur = h,
            None => break,
        }
        guard += 1;
        if guard > 256 {
            break;
        }
    }
    // A link with no owner at all still names itself.
    if segs.is_empty() && link.owner().is_none() {
        segs.push(key_of(link, meaning));
    }
    segs.reverse();
    format!("/{}", segs.join("/"))
}

/// The topmost node above `start`: the pointee of the root link, or the
/// first owner node without a handle.
async fn root_node(start: &Node) -> Result<Node> {
    let mut node = start.clone();
    let mut guard = 0usize;
    loop {
        let Some(handle) = node.handle() else {
            return Ok(node);
        };
        match handle.owner() {
            Some(owner) => node = owner,
            None => return handle.data_node().await,
        }
        guard += 1;
        if guard > 256 {
            return Err(Error::LinkBadPath("owner chain too deep".into()));
        }
    }
}

/// Resolve a path against a starting link.
///
/// `.` stays, `..` climbs one level, an empty leading segment makes the path
/// absolute from the root. Symbolic links along the way are resolved when
/// [`TreeOpts::FOLLOW_SYM_LINKS`] is set; cycles are broken by tracking the
/// set of active symlinks and fail with [`Error::LinkBadPath`].
pub async fn deref_path(path: &str, start: Link, meaning: Key, opts: TreeOpts) -> Result<Link> {
    let base = match start.owner() {
        Some(owner) => owner,
        None => start.data_node().await.map_err(|_| {
            Error::LinkBadPath(format!("no base node to resolve '{path}' against"))
        })?,
    };
    let mut active = HashSet::new();
    deref_rec(path.to_owned(), base, meaning, opts, &mut active).await
}

/// Resolve a path against a node (the containing node of a sym link).
pub(crate) async fn deref_path_from_node(
    path: &str,
    base: Node,
    meaning: Key,
    opts: TreeOpts,
) -> Result<Link> {
    let mut active = HashSet::new();
    deref_rec(path.to_owned(), base, meaning, opts, &mut active).await
}

fn deref_rec<'a>(
    path: String,
    base: Node,
    meaning: Key,
    opts: TreeOpts,
    active: &'a mut HashSet<LinkId>,
) -> Pin<Box<dyn Future<Output = Result<Link>> + Send + 'a>> {
    Box::pin(async move {
        if path.is_empty() {
            return Err(Error::EmptyPath);
        }
        let mut node = if let Some(rest) = path.strip_prefix('/') {
            let root = root_node(&base).await?;
            if rest.is_empty() {
                return root.handle().ok_or_else(|| {
                    Error::LinkBadPath("root node has no handle link".into())
                });
            }
            root
        } else {
            base
        };

        let segs: Vec<&str> = path
            .trim_start_matches('/')
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();
        if segs.is_empty() {
            // Pure "." style paths denote the base itself.
            return node
                .handle()
                .ok_or_else(|| Error::LinkBadPath(format!("'{path}' has no link form")));
        }

        let mut current: Option<Link> = None;
        for (i, seg) in segs.iter().enumerate() {
            let last = i + 1 == segs.len();
            match *seg {
                "." => {
                    current = node.handle();
                    continue;
                }
                ".." => {
                    let handle = node
                        .handle()
                        .ok_or_else(|| Error::LinkBadPath(format!("'{path}' leaves the tree")))?;
                    node = handle
                        .owner()
                        .ok_or_else(|| Error::LinkBadPath(format!("'{path}' leaves the tree")))?;
                    current = node.handle();
                    continue;
                }
                _ => {}
            }

            let mut found = node.find_named(*seg, meaning).await;
            if found.is_nil() {
                // Canonical id segments work under any key meaning.
                if let Some(id) = LinkId::parse(seg) {
                    found = node.find(id).await;
                }
            }
            if found.is_nil() {
                return Err(Error::LinkBadPath(format!("'{seg}' not found in '{path}'")));
            }
            if last {
                return Ok(found);
            }
            node = enter(&found, meaning, opts, active).await?;
            current = Some(found);
        }
        current.ok_or_else(|| Error::LinkBadPath(format!("'{path}' has no link form")))
    })
}

/// Step into a link's node, resolving symlinks when asked to.
async fn enter(
    link: &Link,
    meaning: Key,
    opts: TreeOpts,
    active: &mut HashSet<LinkId>,
) -> Result<Node> {
    if let LinkKind::Sym(s) = &link.imp().kind {
        if opts.contains(TreeOpts::FOLLOW_SYM_LINKS) {
            if !active.insert(link.id()) {
                return Err(Error::LinkBadPath("symlink cycle".into()));
            }
            let stored = s.path.read().clone();
            let owner = link
                .owner()
                .ok_or_else(|| Error::LinkBadPath("unbound sym link".into()))?;
            let target = deref_rec(stored, owner, meaning, opts, active).await?;
            active.remove(&link.id());
            return target.data_node().await;
        }
    }
    if let Some(quick) = link.imp().quick_node() {
        return Ok(quick);
    }
    link.data_node().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Object;
    use crate::tree::InsertPolicy;

    #[derive(Default)]
    struct Stub;
    impl crate::object::Payload for Stub {
        fn type_id(&self) -> &'static str {
            "path_stub"
        }
        fn clone_payload(&self) -> Box<dyn crate::object::Payload> {
            Box::new(Stub)
        }
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
    }

    #[tokio::test]
    async fn abspath_and_back() {
        let root = Node::new();
        let sub = Node::new();
        let folder = Link::hard("folder", Object::from_node(sub.clone()));
        root.insert(folder.clone(), InsertPolicy::default()).await;
        let leaf = Link::hard("leaf", Object::from_payload(Stub));
        sub.insert(leaf.clone(), InsertPolicy::default()).await;

        assert_eq!(abspath(&leaf, Key::Name), "/folder/leaf");

        let resolved = deref_path_from_node("folder/leaf", root.clone(), Key::Name, TreeOpts::NORMAL)
            .await
            .unwrap();
        assert_eq!(resolved, leaf);

        let dotted = deref_path_from_node("./folder/../folder/leaf", root, Key::Name, TreeOpts::NORMAL).await;
        // The leading "." needs a handle link on the root node, which this
        // standalone tree doesn't have.
        assert!(dotted.is_err() || dotted.unwrap() == leaf);
    }

    #[tokio::test]
    async fn missing_segment_is_bad_path() {
        let root = Node::new();
        let err = deref_path_from_node("ghost", root, Key::Name, TreeOpts::NORMAL)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LinkBadPath(_)));
    }
}
