//! Object formatter registry.
//!
//! A formatter is a named save/load pair registered per object type id; one
//! formatter per type is active for saving. The default binary formatter
//! (`bin`) is always present — it bridges to the payload's own binary body
//! hooks — so every object type can be archived out of the box.

use bluesky_core::{Error, Object, Result};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

/// Name of the always-present default binary formatter.
pub const BIN_FMT_NAME: &str = "bin";

type FmtFn = Arc<dyn Fn(&Object, &Path) -> Result<()> + Send + Sync>;

/// A named pair of payload save/load routines for one object type.
#[derive(Clone)]
pub struct ObjectFormatter {
    /// Formatter name, recorded in link files and payload extensions.
    pub name: String,
    /// Whether the formatter persists child links of node-typed objects
    /// itself (the archive then skips structural writes for them).
    pub stores_node: bool,
    save: FmtFn,
    load: FmtFn,
}

impl ObjectFormatter {
    /// Build a formatter from save/load closures.
    pub fn new(
        name: impl Into<String>,
        stores_node: bool,
        save: impl Fn(&Object, &Path) -> Result<()> + Send + Sync + 'static,
        load: impl Fn(&Object, &Path) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            stores_node,
            save: Arc::new(save),
            load: Arc::new(load),
        }
    }

    /// The default binary formatter over the payload body hooks.
    pub fn bin() -> Self {
        Self::new(
            BIN_FMT_NAME,
            false,
            |obj, path| {
                let file = File::create(path)
                    .map_err(|e| Error::CantWriteFile(format!("{}: {e}", path.display())))?;
                let mut out = BufWriter::new(file);
                obj.save_body(&mut out)?;
                out.flush()
                    .map_err(|e| Error::CantWriteFile(format!("{}: {e}", path.display())))?;
                Ok(())
            },
            |obj, path| {
                let file = File::open(path)
                    .map_err(|e| Error::CantReadFile(format!("{}: {e}", path.display())))?;
                let mut input = BufReader::new(file);
                obj.load_body(&mut input)
            },
        )
    }

    /// Write the object's payload to a file.
    pub fn save(&self, obj: &Object, path: &Path) -> Result<()> {
        (self.save)(obj, path)
    }

    /// Read the object's payload from a file.
    pub fn load(&self, obj: &Object, path: &Path) -> Result<()> {
        (self.load)(obj, path)
    }
}

// obj type id -> installed formatters
static REGISTRY: Lazy<DashMap<String, Vec<ObjectFormatter>>> = Lazy::new(DashMap::new);
// obj type id -> active formatter name
static ACTIVE: Lazy<DashMap<String, String>> = Lazy::new(DashMap::new);

/// Install a formatter for an object type. Returns `false` when a formatter
/// with the same name is already installed for that type.
pub fn install_formatter(obj_type_id: &str, fmt: ObjectFormatter) -> bool {
    let mut entry = REGISTRY.entry(obj_type_id.to_owned()).or_default();
    if entry.iter().any(|f| f.name == fmt.name) {
        return false;
    }
    entry.push(fmt);
    true
}

/// Names of the formatters installed for a type (the implicit `bin`
/// formatter is always listed).
pub fn list_installed_formatters(obj_type_id: &str) -> Vec<String> {
    let mut out = vec![BIN_FMT_NAME.to_owned()];
    if let Some(entry) = REGISTRY.get(obj_type_id) {
        for f in entry.iter() {
            if f.name != BIN_FMT_NAME {
                out.push(f.name.clone());
            }
        }
    }
    out
}

/// Look up a formatter by name; `bin` resolves for every type.
pub fn get_formatter(obj_type_id: &str, fmt_name: &str) -> Option<ObjectFormatter> {
    if let Some(entry) = REGISTRY.get(obj_type_id) {
        if let Some(f) = entry.iter().find(|f| f.name == fmt_name) {
            return Some(f.clone());
        }
    }
    (fmt_name == BIN_FMT_NAME).then(ObjectFormatter::bin)
}

/// Mark a formatter active for saving a type. Returns whether it resolved.
pub fn select_active_formatter(obj_type_id: &str, fmt_name: &str) -> bool {
    if get_formatter(obj_type_id, fmt_name).is_some() {
        ACTIVE.insert(obj_type_id.to_owned(), fmt_name.to_owned());
        true
    } else {
        false
    }
}

/// The formatter used to save objects of a type: the selected one, else
/// `bin`, else the first installed.
pub fn get_active_formatter(obj_type_id: &str) -> Option<ObjectFormatter> {
    if let Some(name) = ACTIVE.get(obj_type_id) {
        if let Some(f) = get_formatter(obj_type_id, name.value()) {
            return Some(f);
        }
    }
    if let Some(f) = get_formatter(obj_type_id, BIN_FMT_NAME) {
        return Some(f);
    }
    REGISTRY
        .get(obj_type_id)
        .and_then(|entry| entry.first().cloned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bin_always_resolves() {
        assert!(get_formatter("whatever_type", BIN_FMT_NAME).is_some());
        assert!(get_active_formatter("whatever_type").is_some());
    }

    #[test]
    fn install_and_select() {
        let noop = |_: &Object, _: &Path| Ok(());
        assert!(install_formatter(
            "fmt_test_type",
            ObjectFormatter::new("alt", false, noop, noop)
        ));
        assert!(!install_formatter(
            "fmt_test_type",
            ObjectFormatter::new("alt", false, noop, noop)
        ));
        assert!(list_installed_formatters("fmt_test_type").contains(&"alt".to_owned()));

        assert!(select_active_formatter("fmt_test_type", "alt"));
        assert_eq!(get_active_formatter("fmt_test_type").unwrap().name, "alt");
        assert!(!select_active_formatter("fmt_test_type", "missing"));
    }
}
