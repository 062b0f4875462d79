//! Objects: reference-counted payloads with a type id and an instance id.
//!
//! An object holds either a user-defined payload (created through the type
//! factory) or a [`Node`] — the *object-node* variant that makes subtrees
//! possible. Handles are cheap clones sharing one interior; equality is
//! interior identity.

use crate::error::{Error, Result};
use crate::inode::Inode;
use crate::transaction::{ObjTransaction, TrResult};
use crate::tree::node::Node;
use crate::types::LinkId;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Arc;

/// Type id of node-backed objects.
pub const OBJ_NODE_TYPE: &str = "objnode";

/// User-defined object payload.
///
/// Implementors supply a stable type id and binary body hooks used by the
/// default archive formatter. A payload with no body keeps the default no-op
/// hooks and ends up listed in the archive's empty-payload index.
pub trait Payload: Any + Send + Sync {
    /// Stable type discriminator, unique across the factory.
    fn type_id(&self) -> &'static str;

    /// Write the binary body to a stream.
    fn save_body(&self, _out: &mut dyn Write) -> Result<()> {
        Ok(())
    }

    /// Read the binary body back from a stream.
    fn load_body(&mut self, _input: &mut dyn Read) -> Result<()> {
        Ok(())
    }

    /// Clone the payload behind the trait object.
    fn clone_payload(&self) -> Box<dyn Payload>;

    /// Upcast for typed downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Mutable upcast for typed downcasting.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

pub(crate) enum ObjData {
    Payload(Box<dyn Payload>),
    Node(Node),
}

pub(crate) struct ObjectImpl {
    id: String,
    inode: RwLock<Option<Inode>>,
    pub(crate) data: RwLock<ObjData>,
}

/// Shared handle to an object.
#[derive(Clone)]
pub struct Object {
    inner: Arc<ObjectImpl>,
}

impl Object {
    /// Wrap a payload into a fresh object with a generated instance id.
    pub fn from_payload(payload: impl Payload) -> Self {
        Self::with_id(payload, LinkId::new().to_string())
    }

    /// Wrap a payload into an object with an explicit instance id.
    pub fn with_id(payload: impl Payload, id: impl Into<String>) -> Self {
        Self::from_boxed(Box::new(payload), id.into())
    }

    /// Wrap an already boxed payload (factory path).
    pub fn from_boxed(payload: Box<dyn Payload>, id: String) -> Self {
        Self {
            inner: Arc::new(ObjectImpl {
                id,
                inode: RwLock::new(Some(Inode::default())),
                data: RwLock::new(ObjData::Payload(payload)),
            }),
        }
    }

    /// Wrap a node into an object-node with a generated instance id.
    pub fn from_node(node: Node) -> Self {
        Self::from_node_with_id(node, LinkId::new().to_string())
    }

    /// Wrap a node into an object-node with an explicit instance id.
    pub fn from_node_with_id(node: Node, id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ObjectImpl {
                id: id.into(),
                inode: RwLock::new(Some(Inode::default())),
                data: RwLock::new(ObjData::Node(node)),
            }),
        }
    }

    /// Object instance id; its string form is also the object's home id.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Home id used for the object's payload file in an archive.
    pub fn home_id(&self) -> &str {
        &self.inner.id
    }

    /// Type id of the contained payload, or [`OBJ_NODE_TYPE`] for node objects.
    pub fn type_id(&self) -> String {
        match &*self.inner.data.read() {
            ObjData::Payload(p) => Payload::type_id(p.as_ref()).to_owned(),
            ObjData::Node(_) => OBJ_NODE_TYPE.to_owned(),
        }
    }

    /// Whether this object is node-backed.
    pub fn is_node(&self) -> bool {
        matches!(&*self.inner.data.read(), ObjData::Node(_))
    }

    /// The contained node for node-backed objects.
    pub fn data_node(&self) -> Option<Node> {
        match &*self.inner.data.read() {
            ObjData::Node(n) => Some(n.clone()),
            ObjData::Payload(_) => None,
        }
    }

    /// Read the inode.
    pub fn inode(&self) -> Option<Inode> {
        self.inner.inode.read().clone()
    }

    /// Replace the inode.
    pub fn set_inode(&self, inode: Option<Inode>) {
        *self.inner.inode.write() = inode;
    }

    /// Run a closure over the typed payload.
    ///
    /// Fails with [`Error::UnexpectedObjectType`] when the payload is of a
    /// different type or the object is node-backed.
    pub fn with_payload<T: Payload, R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        match &*self.inner.data.read() {
            ObjData::Payload(p) => match p.as_any().downcast_ref::<T>() {
                Some(typed) => Ok(f(typed)),
                None => Err(Error::UnexpectedObjectType {
                    expected: std::any::type_name::<T>().to_owned(),
                    actual: Payload::type_id(p.as_ref()).to_owned(),
                }),
            },
            ObjData::Node(_) => Err(Error::UnexpectedObjectType {
                expected: std::any::type_name::<T>().to_owned(),
                actual: OBJ_NODE_TYPE.to_owned(),
            }),
        }
    }

    /// Run a closure over the typed payload with mutable access.
    pub fn with_payload_mut<T: Payload, R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        match &mut *self.inner.data.write() {
            ObjData::Payload(p) => {
                let actual = Payload::type_id(p.as_ref());
                match p.as_any_mut().downcast_mut::<T>() {
                    Some(typed) => Ok(f(typed)),
                    None => Err(Error::UnexpectedObjectType {
                        expected: std::any::type_name::<T>().to_owned(),
                        actual: actual.to_owned(),
                    }),
                }
            }
            ObjData::Node(_) => Err(Error::UnexpectedObjectType {
                expected: std::any::type_name::<T>().to_owned(),
                actual: OBJ_NODE_TYPE.to_owned(),
            }),
        }
    }

    /// Serialize the payload body to a stream (default binary form).
    pub fn save_body(&self, out: &mut dyn Write) -> Result<()> {
        match &*self.inner.data.read() {
            ObjData::Payload(p) => p.save_body(out),
            ObjData::Node(_) => Ok(()),
        }
    }

    /// Deserialize the payload body from a stream (default binary form).
    pub fn load_body(&self, input: &mut dyn Read) -> Result<()> {
        match &mut *self.inner.data.write() {
            ObjData::Payload(p) => p.load_body(input),
            ObjData::Node(_) => Ok(()),
        }
    }

    /// Clone the object: fresh instance id, payload cloned through its own
    /// clone hook; node objects get a deep-cloned node.
    pub fn clone_object(&self) -> Result<Object> {
        match &*self.inner.data.read() {
            ObjData::Payload(p) => Ok(Object::from_boxed(
                p.clone_payload(),
                LinkId::new().to_string(),
            )),
            ObjData::Node(n) => Ok(Object::from_node(n.clone_subtree())),
        }
    }

    /// Execute a transaction against this object through the process queue.
    ///
    /// The closure runs serialized with all other transactions and event
    /// callbacks; reentrant calls from inside another transaction complete on
    /// a one-shot worker instead of deadlocking.
    pub async fn apply(&self, tr: ObjTransaction) -> TrResult {
        let this = self.clone();
        crate::tree::queue::queue()
            .apply(move || tr(this))
            .await
    }

    /// Blocking form of [`Object::apply`], usable from inside transactions.
    pub fn apply_sync(&self, tr: ObjTransaction) -> TrResult {
        let this = self.clone();
        crate::tree::queue::queue().apply_blocking(move || tr(this))
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Object {}

impl std::hash::Hash for Object {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.inner) as usize).hash(state);
    }
}

impl std::fmt::Debug for Object {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Object")
            .field("id", &self.inner.id)
            .field("type_id", &self.type_id())
            .finish_non_exhaustive()
    }
}

/// Downgraded object handle that does not extend the object's lifetime.
#[derive(Clone)]
pub struct WeakObject {
    inner: std::sync::Weak<ObjectImpl>,
}

impl WeakObject {
    /// Downgrade an object handle.
    pub fn new(obj: &Object) -> Self {
        Self {
            inner: Arc::downgrade(&obj.inner),
        }
    }

    /// Empty weak handle.
    pub fn empty() -> Self {
        Self {
            inner: std::sync::Weak::new(),
        }
    }

    /// Try to upgrade back to a strong handle.
    pub fn upgrade(&self) -> Option<Object> {
        self.inner.upgrade().map(|inner| Object { inner })
    }
}

type PayloadCtor = Arc<dyn Fn() -> Box<dyn Payload> + Send + Sync>;

struct TypeDecl {
    ctor: PayloadCtor,
}

/// Process-wide object type factory keyed on the type name.
///
/// Supports default construction, string-id construction and clone; the
/// archive reader uses it to materialize loaded objects.
pub struct ObjectFactory {
    types: RwLock<HashMap<String, TypeDecl>>,
}

static FACTORY: Lazy<ObjectFactory> = Lazy::new(|| ObjectFactory {
    types: RwLock::new(HashMap::new()),
});

/// The process-wide object factory.
pub fn factory() -> &'static ObjectFactory {
    &FACTORY
}

impl ObjectFactory {
    /// Register a payload type under its type id.
    ///
    /// Fails with [`Error::CantRegisterType`] when the id is already taken.
    pub fn register<P: Payload + Default>(&self, type_id: &str) -> Result<()> {
        let mut types = self.types.write();
        if types.contains_key(type_id) {
            return Err(Error::CantRegisterType(type_id.to_owned()));
        }
        types.insert(
            type_id.to_owned(),
            TypeDecl {
                ctor: Arc::new(|| Box::new(P::default())),
            },
        );
        tracing::debug!(type_id, "registered object type");
        Ok(())
    }

    /// Whether a type id is known to the factory.
    pub fn knows(&self, type_id: &str) -> bool {
        self.types.read().contains_key(type_id)
    }

    /// Default-construct an object of the given type.
    pub fn create(&self, type_id: &str) -> Result<Object> {
        self.create_with_id(type_id, LinkId::new().to_string())
    }

    /// Construct an object of the given type with an explicit instance id.
    pub fn create_with_id(&self, type_id: &str, id: impl Into<String>) -> Result<Object> {
        let types = self.types.read();
        let decl = types
            .get(type_id)
            .ok_or_else(|| Error::BadObject(format!("unknown type '{type_id}'")))?;
        Ok(Object::from_boxed((decl.ctor)(), id.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Blob {
        bytes: Vec<u8>,
    }

    impl Payload for Blob {
        fn type_id(&self) -> &'static str {
            "test_blob"
        }

        fn save_body(&self, out: &mut dyn Write) -> Result<()> {
            out.write_all(&self.bytes)?;
            Ok(())
        }

        fn load_body(&mut self, input: &mut dyn Read) -> Result<()> {
            self.bytes.clear();
            input.read_to_end(&mut self.bytes)?;
            Ok(())
        }

        fn clone_payload(&self) -> Box<dyn Payload> {
            Box::new(Blob {
                bytes: self.bytes.clone(),
            })
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    #[test]
    fn payload_round_trip() {
        let obj = Object::from_payload(Blob {
            bytes: vec![1, 2, 3],
        });
        assert_eq!(obj.type_id(), "test_blob");

        let mut buf = Vec::new();
        obj.save_body(&mut buf).unwrap();
        assert_eq!(buf, vec![1, 2, 3]);

        let twin = Object::from_payload(Blob::default());
        twin.load_body(&mut buf.as_slice()).unwrap();
        twin.with_payload(|b: &Blob| assert_eq!(b.bytes, vec![1, 2, 3]))
            .unwrap();
    }

    #[test]
    fn typed_access_checks_type() {
        #[derive(Default)]
        struct Other;
        impl Payload for Other {
            fn type_id(&self) -> &'static str {
                "test_other"
            }
            fn clone_payload(&self) -> Box<dyn Payload> {
                Box::new(Other)
            }
            fn as_any(&self) -> &dyn Any {
                self
            }
            fn as_any_mut(&mut self) -> &mut dyn Any {
                self
            }
        }

        let obj = Object::from_payload(Other);
        assert!(obj.with_payload(|_: &Blob| ()).is_err());
    }

    #[test]
    fn weak_expires_with_last_strong() {
        let obj = Object::from_payload(Blob::default());
        let weak = WeakObject::new(&obj);
        assert!(weak.upgrade().is_some());
        drop(obj);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn factory_register_and_create() {
        factory().register::<Blob>("test_blob_f").unwrap();
        assert!(factory().knows("test_blob_f"));
        assert!(factory().register::<Blob>("test_blob_f").is_err());

        let obj = factory().create_with_id("test_blob_f", "fixed-id").unwrap();
        assert_eq!(obj.id(), "fixed-id");
        assert_eq!(obj.type_id(), "test_blob");
    }

    #[test]
    fn clone_gets_fresh_id() {
        let obj = Object::from_payload(Blob {
            bytes: vec![9],
        });
        let twin = obj.clone_object().unwrap();
        assert_ne!(twin.id(), obj.id());
        twin.with_payload(|b: &Blob| assert_eq!(b.bytes, vec![9]))
            .unwrap();
    }
}
