//! Tagged property values and property dictionaries.
//!
//! Properties carry event parameters and transaction result info across
//! actors. The union covers scalars plus a homogeneous list of every scalar
//! alternative; a property holding a null object handle denotes "none".

use crate::object::Object;
use crate::types::LinkId;
use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};
use std::time::{Duration, SystemTime};

/// Tagged union of property alternatives.
#[derive(Debug, Clone, PartialEq)]
pub enum Property {
    /// Boolean flag.
    Bool(bool),
    /// 128-bit id.
    Id(LinkId),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit float.
    Real(f64),
    /// Nanosecond duration.
    Timespan(Duration),
    /// Nanosecond timestamp.
    Timestamp(SystemTime),
    /// UTF-8 string.
    Str(String),
    /// Shared object handle; `None` denotes an absent object.
    Obj(Option<Object>),
    /// Homogeneous boolean list.
    BoolList(Vec<bool>),
    /// Homogeneous id list.
    IdList(Vec<LinkId>),
    /// Homogeneous integer list.
    IntList(Vec<i64>),
    /// Homogeneous float list.
    RealList(Vec<f64>),
    /// Homogeneous duration list.
    TimespanList(Vec<Duration>),
    /// Homogeneous timestamp list.
    TimestampList(Vec<SystemTime>),
    /// Homogeneous string list.
    StrList(Vec<String>),
    /// Homogeneous object list.
    ObjList(Vec<Object>),
}

impl Property {
    /// Whether this property holds a null object handle.
    pub fn is_none(&self) -> bool {
        matches!(self, Property::Obj(None))
    }

    /// Extract a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Property::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Extract an id.
    pub fn as_id(&self) -> Option<LinkId> {
        match self {
            Property::Id(v) => Some(*v),
            _ => None,
        }
    }

    /// Extract an integer.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Property::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Extract a float.
    pub fn as_real(&self) -> Option<f64> {
        match self {
            Property::Real(v) => Some(*v),
            _ => None,
        }
    }

    /// Extract a string slice.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Property::Str(v) => Some(v),
            _ => None,
        }
    }

    /// Extract an object handle.
    pub fn as_obj(&self) -> Option<&Object> {
        match self {
            Property::Obj(Some(v)) => Some(v),
            _ => None,
        }
    }

    /// Extract an id list.
    pub fn as_ids(&self) -> Option<&[LinkId]> {
        match self {
            Property::IdList(v) => Some(v),
            _ => None,
        }
    }

    /// Extract a string list.
    pub fn as_strs(&self) -> Option<&[String]> {
        match self {
            Property::StrList(v) => Some(v),
            _ => None,
        }
    }
}

macro_rules! impl_prop_from {
    ($($src:ty => $variant:ident),+ $(,)?) => {$(
        impl From<$src> for Property {
            fn from(v: $src) -> Self {
                Property::$variant(v)
            }
        }
    )+};
}

impl_prop_from! {
    bool => Bool,
    LinkId => Id,
    i64 => Int,
    f64 => Real,
    Duration => Timespan,
    SystemTime => Timestamp,
    String => Str,
    Vec<bool> => BoolList,
    Vec<LinkId> => IdList,
    Vec<i64> => IntList,
    Vec<f64> => RealList,
    Vec<Duration> => TimespanList,
    Vec<SystemTime> => TimestampList,
    Vec<String> => StrList,
    Vec<Object> => ObjList,
}

impl From<&str> for Property {
    fn from(v: &str) -> Self {
        Property::Str(v.to_owned())
    }
}

impl From<Object> for Property {
    fn from(v: Object) -> Self {
        Property::Obj(Some(v))
    }
}

impl From<Option<Object>> for Property {
    fn from(v: Option<Object>) -> Self {
        Property::Obj(v)
    }
}

/// Ordered dictionary of named properties with transparent `&str` lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Propdict(BTreeMap<String, Property>);

impl Propdict {
    /// Create an empty dictionary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the dictionary contains the given key.
    pub fn has_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Insert a property, converting from any supported source type.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Property>) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Get a string property.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Property::as_str)
    }

    /// Get an integer property.
    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(Property::as_int)
    }

    /// Get an id property.
    pub fn get_id(&self, key: &str) -> Option<LinkId> {
        self.0.get(key).and_then(Property::as_id)
    }

    /// Get an id list property.
    pub fn get_ids(&self, key: &str) -> Option<&[LinkId]> {
        self.0.get(key).and_then(Property::as_ids)
    }

    /// Get a boolean property.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Property::as_bool)
    }

    /// Get an object property.
    pub fn get_obj(&self, key: &str) -> Option<&Object> {
        self.0.get(key).and_then(Property::as_obj)
    }

    /// Merge another dictionary into this one, overwriting shared keys.
    pub fn merge(&mut self, other: Propdict) {
        self.0.extend(other.0);
    }
}

impl Deref for Propdict {
    type Target = BTreeMap<String, Property>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Propdict {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl FromIterator<(String, Property)> for Propdict {
    fn from_iter<I: IntoIterator<Item = (String, Property)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_typed_get() {
        let mut d = Propdict::new();
        d.set("name", "persons").set("age", 42i64).set("ok", true);

        assert_eq!(d.get_str("name"), Some("persons"));
        assert_eq!(d.get_int("age"), Some(42));
        assert_eq!(d.get_bool("ok"), Some(true));
        assert!(d.has_key("name"));
        assert!(!d.has_key("missing"));
    }

    #[test]
    fn wrong_type_yields_none() {
        let mut d = Propdict::new();
        d.set("age", 42i64);
        assert_eq!(d.get_str("age"), None);
    }

    #[test]
    fn id_lists() {
        let ids = vec![LinkId::new(), LinkId::new()];
        let mut d = Propdict::new();
        d.set("lids", ids.clone());
        assert_eq!(d.get_ids("lids"), Some(ids.as_slice()));
    }

    #[test]
    fn null_object_is_none() {
        let p = Property::Obj(None);
        assert!(p.is_none());
        assert!(p.as_obj().is_none());
    }

    #[test]
    fn merge_overwrites() {
        let mut a = Propdict::new();
        a.set("x", 1i64);
        let mut b = Propdict::new();
        b.set("x", 2i64).set("y", 3i64);
        a.merge(b);
        assert_eq!(a.get_int("x"), Some(2));
        assert_eq!(a.get_int("y"), Some(3));
    }
}
