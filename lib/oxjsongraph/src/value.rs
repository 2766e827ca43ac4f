//! The typed object graph the resolver produces and the writer consumes.
//!
//! Reference values (arrays, collections, maps, objects, free-form nodes)
//! share `Rc` allocations: the same allocation appearing twice in a graph is
//! one object, which is what the writer's reach-ability trace and the
//! round-trip identity guarantees are built on. Equality, hashing and the
//! total order treat reference values by pointer identity and logical
//! primitives by content.

use crate::node::JNodeRef;
use crate::types::{TypeDescriptor, TypeRef};
use crate::vocab::{self, type_names};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use num_bigint::BigInt;
use std::borrow::Cow;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::sync::Arc;

pub type ArrayRef = Rc<RefCell<ArrayValue>>;
pub type CollectionRef = Rc<RefCell<CollectionValue>>;
pub type MapRef = Rc<RefCell<MapValue>>;
pub type ObjectRef = Rc<RefCell<ObjectValue>>;

/// A value in a typed object graph.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Char(char),
    Str(Rc<str>),
    BigInt(BigInt),
    BigDec(BigDecimal),
    Date(DateTime<Utc>),
    /// A reference to a class itself, not an instance of it.
    Class(Rc<str>),
    Array(ArrayRef),
    Collection(CollectionRef),
    Map(MapRef),
    Object(ObjectRef),
    /// A free-form map, or any node of the intermediate tree in maps mode.
    Node(JNodeRef),
}

/// A typed array: fixed component type, materialized at its final length.
#[derive(Debug, Clone)]
pub struct ArrayValue {
    pub component: TypeRef,
    pub items: Vec<Value>,
}

/// The concrete shapes backing abstract collection interfaces.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum CollectionKind {
    /// Ordered list, the default for list-like and plain collection types.
    List,
    /// Insertion-ordered set.
    Set,
    /// Set kept sorted by the total order over values.
    SortedSet,
}

#[derive(Debug, Clone)]
pub struct CollectionValue {
    kind: CollectionKind,
    items: Vec<Value>,
}

impl CollectionValue {
    pub fn new(kind: CollectionKind) -> Self {
        Self {
            kind,
            items: Vec::new(),
        }
    }

    #[inline]
    pub fn kind(&self) -> CollectionKind {
        self.kind
    }

    #[inline]
    pub fn items(&self) -> &[Value] {
        &self.items
    }

    /// Whether elements are addressable by index (lists are, sets are not).
    #[inline]
    pub fn is_indexable(&self) -> bool {
        self.kind == CollectionKind::List
    }

    /// Adds an element honoring the collection shape: lists append, sets
    /// drop duplicates, sorted sets keep their order.
    pub fn insert(&mut self, value: Value) {
        match self.kind {
            CollectionKind::List => self.items.push(value),
            CollectionKind::Set => {
                if !self.items.contains(&value) {
                    self.items.push(value);
                }
            }
            CollectionKind::SortedSet => {
                if let Err(at) = self.items.binary_search(&value) {
                    self.items.insert(at, value);
                }
            }
        }
    }

    /// Raw positional write used by the forward-reference patch pass.
    pub(crate) fn set_item(&mut self, index: usize, value: Value) {
        self.items[index] = value;
    }

    pub(crate) fn push_raw(&mut self, value: Value) {
        self.items.push(value);
    }
}

/// The concrete shapes backing abstract map interfaces.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum MapKind {
    /// Insertion-ordered map, the default.
    Ordered,
    /// Map kept sorted by key.
    Sorted,
}

#[derive(Debug, Clone)]
pub struct MapValue {
    kind: MapKind,
    entries: IndexMap<Value, Value>,
}

impl MapValue {
    pub fn new(kind: MapKind) -> Self {
        Self {
            kind,
            entries: IndexMap::new(),
        }
    }

    #[inline]
    pub fn kind(&self) -> MapKind {
        self.kind
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: Value, value: Value) {
        self.entries.insert(key, value);
        if self.kind == MapKind::Sorted {
            self.entries.sort_by(|k1, _, k2, _| k1.cmp(k2));
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.iter()
    }

    /// Whether the compact `{"key": value}` JSON form can represent this map:
    /// every key is a string and none would be read back as a `@` directive.
    pub fn has_only_string_keys(&self) -> bool {
        self.entries.keys().all(|k| match k {
            Value::Str(s) => !vocab::is_reserved_key(s),
            _ => false,
        })
    }
}

/// An instance of a registered host type: its descriptor plus field values.
///
/// Field keys come from the deep declared-field map, so a subclass field
/// shadowing an inherited name is keyed `"Child.field"`.
#[derive(Debug, Clone)]
pub struct ObjectValue {
    descriptor: Arc<TypeDescriptor>,
    fields: IndexMap<Arc<str>, Value>,
}

impl ObjectValue {
    pub fn new(descriptor: Arc<TypeDescriptor>) -> Self {
        Self {
            descriptor,
            fields: IndexMap::new(),
        }
    }

    #[inline]
    pub fn descriptor(&self) -> &Arc<TypeDescriptor> {
        &self.descriptor
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn set(&mut self, field: impl Into<Arc<str>>, value: Value) {
        self.fields.insert(field.into(), value);
    }

    pub fn fields(&self) -> impl Iterator<Item = (&Arc<str>, &Value)> {
        self.fields.iter()
    }
}

impl Value {
    pub fn string(s: impl AsRef<str>) -> Self {
        Self::Str(Rc::from(s.as_ref()))
    }

    pub fn array(component: TypeRef, items: impl Into<Vec<Value>>) -> Self {
        Self::Array(Rc::new(RefCell::new(ArrayValue {
            component,
            items: items.into(),
        })))
    }

    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Self::collection(CollectionKind::List, items)
    }

    pub fn set(items: impl IntoIterator<Item = Value>) -> Self {
        Self::collection(CollectionKind::Set, items)
    }

    pub fn sorted_set(items: impl IntoIterator<Item = Value>) -> Self {
        Self::collection(CollectionKind::SortedSet, items)
    }

    pub fn collection(kind: CollectionKind, items: impl IntoIterator<Item = Value>) -> Self {
        let mut collection = CollectionValue::new(kind);
        for item in items {
            collection.insert(item);
        }
        Self::Collection(Rc::new(RefCell::new(collection)))
    }

    pub fn map(entries: impl IntoIterator<Item = (Value, Value)>) -> Self {
        Self::map_of_kind(MapKind::Ordered, entries)
    }

    pub fn sorted_map(entries: impl IntoIterator<Item = (Value, Value)>) -> Self {
        Self::map_of_kind(MapKind::Sorted, entries)
    }

    pub fn map_of_kind(kind: MapKind, entries: impl IntoIterator<Item = (Value, Value)>) -> Self {
        let mut map = MapValue::new(kind);
        for (k, v) in entries {
            map.insert(k, v);
        }
        Self::Map(Rc::new(RefCell::new(map)))
    }

    pub fn object(object: ObjectValue) -> Self {
        Self::Object(Rc::new(RefCell::new(object)))
    }

    /// Logical primitives are value-like for serialization purposes: they are
    /// never assigned an `@id` and never referenced through `@ref`.
    pub fn is_logical_primitive(&self) -> bool {
        !matches!(
            self,
            Self::Array(_) | Self::Collection(_) | Self::Map(_) | Self::Object(_) | Self::Node(_)
        )
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The dialect name of this value's concrete runtime type.
    pub fn type_name(&self) -> Cow<'static, str> {
        match self {
            Self::Null => Cow::Borrowed("null"),
            Self::Bool(_) => Cow::Borrowed(type_names::BOOLEAN),
            Self::Byte(_) => Cow::Borrowed(type_names::BYTE),
            Self::Short(_) => Cow::Borrowed(type_names::SHORT),
            Self::Int(_) => Cow::Borrowed(type_names::INT),
            Self::Long(_) => Cow::Borrowed(type_names::LONG),
            Self::Float(_) => Cow::Borrowed(type_names::FLOAT),
            Self::Double(_) => Cow::Borrowed(type_names::DOUBLE),
            Self::Char(_) => Cow::Borrowed(type_names::CHAR),
            Self::Str(_) => Cow::Borrowed(type_names::STRING),
            Self::BigInt(_) => Cow::Borrowed(type_names::BIG_INT),
            Self::BigDec(_) => Cow::Borrowed(type_names::BIG_DEC),
            Self::Date(_) => Cow::Borrowed(type_names::DATE),
            Self::Class(_) => Cow::Borrowed(type_names::CLASS),
            Self::Array(a) => {
                Cow::Owned(format!("{}[]", a.borrow().component))
            }
            Self::Collection(c) => Cow::Borrowed(match c.borrow().kind() {
                CollectionKind::List => type_names::LIST,
                CollectionKind::Set => type_names::SET,
                CollectionKind::SortedSet => type_names::SORTED_SET,
            }),
            Self::Map(m) => Cow::Borrowed(match m.borrow().kind() {
                MapKind::Ordered => type_names::MAP,
                MapKind::Sorted => type_names::SORTED_MAP,
            }),
            Self::Object(o) => Cow::Owned(o.borrow().descriptor().name().to_string()),
            Self::Node(_) => Cow::Borrowed(type_names::MAP),
        }
    }

    /// Stable identity of a reference value within one process: the address
    /// of its shared allocation. `None` for logical primitives.
    pub fn identity(&self) -> Option<usize> {
        Some(match self {
            Self::Array(r) => Rc::as_ptr(r) as usize,
            Self::Collection(r) => Rc::as_ptr(r) as usize,
            Self::Map(r) => Rc::as_ptr(r) as usize,
            Self::Object(r) => Rc::as_ptr(r) as usize,
            Self::Node(r) => Rc::as_ptr(r) as usize,
            _ => return None,
        })
    }

    pub fn as_bool(&self) -> Option<bool> {
        if let Self::Bool(b) = self { Some(*b) } else { None }
    }

    /// Any integer variant widened to 64 bits.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Byte(v) => Some(i64::from(*v)),
            Self::Short(v) => Some(i64::from(*v)),
            Self::Int(v) => Some(i64::from(*v)),
            Self::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(f64::from(*v)),
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        if let Self::Str(s) = self { Some(s) } else { None }
    }

    pub fn as_array(&self) -> Option<&ArrayRef> {
        if let Self::Array(a) = self { Some(a) } else { None }
    }

    pub fn as_collection(&self) -> Option<&CollectionRef> {
        if let Self::Collection(c) = self { Some(c) } else { None }
    }

    pub fn as_map(&self) -> Option<&MapRef> {
        if let Self::Map(m) = self { Some(m) } else { None }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        if let Self::Object(o) = self { Some(o) } else { None }
    }

    pub fn as_node(&self) -> Option<&JNodeRef> {
        if let Self::Node(n) = self { Some(n) } else { None }
    }

    /// Convenience accessor for a field of an object value.
    pub fn field(&self, name: &str) -> Option<Value> {
        self.as_object()?.borrow().get(name).cloned()
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Byte(_) => 2,
            Self::Short(_) => 3,
            Self::Int(_) => 4,
            Self::Long(_) => 5,
            Self::Float(_) => 6,
            Self::Double(_) => 7,
            Self::Char(_) => 8,
            Self::Str(_) => 9,
            Self::BigInt(_) => 10,
            Self::BigDec(_) => 11,
            Self::Date(_) => 12,
            Self::Class(_) => 13,
            Self::Array(_) => 14,
            Self::Collection(_) => 15,
            Self::Map(_) => 16,
            Self::Object(_) => 17,
            Self::Node(_) => 18,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Byte(a), Self::Byte(b)) => a == b,
            (Self::Short(a), Self::Short(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Long(a), Self::Long(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Double(a), Self::Double(b)) => a.to_bits() == b.to_bits(),
            (Self::Char(a), Self::Char(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::BigInt(a), Self::BigInt(b)) => a == b,
            (Self::BigDec(a), Self::BigDec(b)) => a == b,
            (Self::Date(a), Self::Date(b)) => a == b,
            (Self::Class(a), Self::Class(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => Rc::ptr_eq(a, b),
            (Self::Collection(a), Self::Collection(b)) => Rc::ptr_eq(a, b),
            (Self::Map(a), Self::Map(b)) => Rc::ptr_eq(a, b),
            (Self::Object(a), Self::Object(b)) => Rc::ptr_eq(a, b),
            (Self::Node(a), Self::Node(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Self::Null => {}
            Self::Bool(v) => v.hash(state),
            Self::Byte(v) => v.hash(state),
            Self::Short(v) => v.hash(state),
            Self::Int(v) => v.hash(state),
            Self::Long(v) => v.hash(state),
            Self::Float(v) => v.to_bits().hash(state),
            Self::Double(v) => v.to_bits().hash(state),
            Self::Char(v) => v.hash(state),
            Self::Str(v) => v.hash(state),
            Self::BigInt(v) => v.hash(state),
            Self::BigDec(v) => v.hash(state),
            Self::Date(v) => v.hash(state),
            Self::Class(v) => v.hash(state),
            Self::Array(_)
            | Self::Collection(_)
            | Self::Map(_)
            | Self::Object(_)
            | Self::Node(_) => {
                // identity hashing keeps cyclic values hashable
                self.identity().hash(state);
            }
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Byte(a), Self::Byte(b)) => a.cmp(b),
            (Self::Short(a), Self::Short(b)) => a.cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Long(a), Self::Long(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::Double(a), Self::Double(b)) => a.total_cmp(b),
            (Self::Char(a), Self::Char(b)) => a.cmp(b),
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            (Self::BigInt(a), Self::BigInt(b)) => a.cmp(b),
            (Self::BigDec(a), Self::BigDec(b)) => a.cmp(b),
            (Self::Date(a), Self::Date(b)) => a.cmp(b),
            (Self::Class(a), Self::Class(b)) => a.cmp(b),
            _ => self
                .rank()
                .cmp(&other.rank())
                .then_with(|| self.identity().cmp(&other.identity())),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<char> for Value {
    fn from(v: char) -> Self {
        Self::Char(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::string(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(Rc::from(v))
    }
}

impl From<BigInt> for Value {
    fn from(v: BigInt) -> Self {
        Self::BigInt(v)
    }
}

impl From<BigDecimal> for Value {
    fn from(v: BigDecimal) -> Self {
        Self::BigDec(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Date(v)
    }
}

impl From<ObjectValue> for Value {
    fn from(v: ObjectValue) -> Self {
        Self::object(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_equality_is_identity() {
        let a = Value::list([Value::from(1i64)]);
        let b = Value::list([Value::from(1i64)]);
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn logical_primitive_equality_is_by_content() {
        assert_eq!(Value::string("x"), Value::string("x"));
        assert_eq!(Value::Long(3), Value::Long(3));
        assert_ne!(Value::Long(3), Value::Int(3));
    }

    #[test]
    fn sets_drop_duplicates_and_sorted_sets_order() {
        let set = Value::set([Value::from(2i64), Value::from(2i64), Value::from(1i64)]);
        assert_eq!(set.as_collection().unwrap().borrow().items().len(), 2);
        let sorted = Value::sorted_set([Value::from(3i64), Value::from(1i64), Value::from(2i64)]);
        let items: Vec<_> = sorted
            .as_collection()
            .unwrap()
            .borrow()
            .items()
            .iter()
            .map(|v| v.as_i64().unwrap())
            .collect();
        assert_eq!(items, [1, 2, 3]);
    }

    #[test]
    fn sorted_maps_keep_key_order() {
        let map = Value::sorted_map([
            (Value::string("b"), Value::from(2i64)),
            (Value::string("a"), Value::from(1i64)),
        ]);
        let keys: Vec<_> = map
            .as_map()
            .unwrap()
            .borrow()
            .entries()
            .map(|(k, _)| k.as_str().unwrap().to_owned())
            .collect();
        assert_eq!(keys, ["a", "b"]);
    }

    #[test]
    fn meta_keyed_maps_are_not_compact_eligible() {
        let plain = Value::map([(Value::string("a"), Value::Long(1))]);
        assert!(plain.as_map().unwrap().borrow().has_only_string_keys());
        for key in [
            "@id", "@ref", "@type", "@items", "@keys", "@i", "@r", "@t", "@e", "@k",
        ] {
            let map = Value::map([(Value::string(key), Value::Long(1))]);
            assert!(
                !map.as_map().unwrap().borrow().has_only_string_keys(),
                "'{key}' must force the @keys/@items form"
            );
        }
    }

    #[test]
    fn cyclic_values_hash_without_overflow() {
        let list = Value::list([]);
        if let Value::Collection(c) = &list {
            c.borrow_mut().insert(list.clone());
        }
        let mut map = MapValue::new(MapKind::Ordered);
        map.insert(list.clone(), Value::Null);
        assert!(map.get(&list).is_some());
    }

    #[test]
    fn array_type_name_carries_component() {
        let array = Value::array(TypeRef::String, vec![]);
        assert_eq!(array.type_name(), "string[]");
    }
}
