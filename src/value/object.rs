//! # Object
//!
//! The heap side of the value model. Everything that is not an immediate is
//! an [`Obj`]: a type pointer, a lazily materialized attribute map, and a
//! payload. Payload mutation is serialized per object; coordinating larger
//! read-modify-write sequences is the program's job.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::{
    fiber::FiberCell,
    symbol::SymId,
    value::{self, lambda::Lambda, types::TypeData, Value},
};

pub struct Obj {
    /// The governing type. `None` only during the `Type` bootstrap, before
    /// the self-referential type pointer has been patched in.
    ty: RwLock<Option<Value>>,
    /// Attribute map, materialized on first write.
    attrs: RwLock<Option<HashMap<SymId, Value>>>,
    pub kind: ObjKind,
}

pub enum ObjKind {
    /// A plain instance of a user-defined type.
    Instance,
    Str(RwLock<String>),
    /// A cons cell: (first, rest).
    List(RwLock<(Value, Value)>),
    Vector(RwLock<Vec<Value>>),
    Dict(RwLock<HashMap<DictKey, Value>>),
    Lambda(Lambda),
    Fiber(Arc<FiberCell>),
    Type(TypeData),
    Module(RwLock<String>),
}

impl Obj {
    pub fn new(kind: ObjKind, ty: Value) -> Self {
        Self {
            ty: RwLock::new(Some(ty)),
            attrs: RwLock::new(None),
            kind,
        }
    }

    /// Used only while bootstrapping `Type`, whose type is itself and so
    /// cannot be known before the record exists.
    pub fn new_untyped(kind: ObjKind) -> Self {
        Self {
            ty: RwLock::new(None),
            attrs: RwLock::new(None),
            kind,
        }
    }

    pub fn ty(&self) -> Option<Value> {
        self.ty.read().clone()
    }

    pub fn set_ty(&self, ty: Value) {
        *self.ty.write() = Some(ty);
    }

    pub fn get_own_attr(&self, id: SymId) -> Option<Value> {
        self.attrs.read().as_ref().and_then(|m| m.get(&id).cloned())
    }

    pub fn set_own_attr(&self, id: SymId, value: Value) {
        self.attrs.write().get_or_insert_with(HashMap::new).insert(id, value);
    }

    pub fn as_type(&self) -> Option<&TypeData> {
        match &self.kind {
            ObjKind::Type(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_lambda(&self) -> Option<&Lambda> {
        match &self.kind {
            ObjKind::Lambda(l) => Some(l),
            _ => None,
        }
    }
}

/// Dict key wrapper giving [`Value`] the `Hash`/`Eq` the engine's `equals`
/// and `hash` operations define.
pub struct DictKey(pub Value);

impl Hash for DictKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(value::hash_value(&self.0));
    }
}

impl PartialEq for DictKey {
    fn eq(&self, other: &Self) -> bool {
        value::equals(&self.0, &other.0)
    }
}

impl Eq for DictKey {}
