//! Symbolic links: carry a path resolved lazily against the containing node.

use crate::error::{Error, Result};
use crate::tree::link::Link;
use crate::tree::path;
use crate::tree::{Key, TreeOpts};
use parking_lot::RwLock;

pub(crate) struct SymData {
    /// Path interpreted relative to the containing node; may be absolute.
    pub path: RwLock<String>,
}

impl SymData {
    pub fn new(path: String) -> Self {
        Self {
            path: RwLock::new(path),
        }
    }
}

/// Resolve a sym link's target against its owner node.
///
/// Fails with [`Error::LinkBadPath`] when the link has no owner or the path
/// doesn't lead to a live link.
pub(crate) async fn resolve(link: &Link) -> Result<Link> {
    let stored = match &link.imp().kind {
        crate::tree::link::base::LinkKind::Sym(s) => s.path.read().clone(),
        _ => return Err(Error::LinkBadPath("not a sym link".into())),
    };
    let Some(owner) = link.owner() else {
        return Err(Error::LinkBadPath(format!("unbound sym link: {stored}")));
    };
    let target = path::deref_path_from_node(
        &stored,
        owner,
        Key::Name,
        TreeOpts::FOLLOW_SYM_LINKS,
    )
    .await?;
    if target.id() == link.id() {
        return Err(Error::LinkBadPath(format!("sym link resolves to itself: {stored}")));
    }
    Ok(target)
}

/// Probe whether the sym link's target currently resolves.
pub(crate) async fn check_alive(link: &Link) -> bool {
    resolve(link).await.is_ok()
}
