//! Conversion of the intermediate node tree into a typed object graph.
//!
//! The traversal materializes every node at most once: a node's target value
//! is created and published *before* its children are resolved, which is what
//! closes cycles. References to `@id` nodes whose target does not exist yet
//! become patch records; after the main pass the patch pass drains them, then
//! the rehash pass inserts queued map entries (hash positions are only stable
//! once every referenced key is fully materialized).

use crate::codec::{CodecRegistry, CustomReader};
use crate::dates;
use crate::error::JsonGraphError;
use crate::node::{JNodeRef, JValue};
use crate::registry::TypeRegistry;
use crate::types::{Primitive, TypeDescriptor, TypeRef};
use crate::value::{
    ArrayRef, ArrayValue, CollectionKind, CollectionRef, CollectionValue, MapKind, MapRef,
    MapValue, ObjectRef, Value,
};
use bigdecimal::{BigDecimal, FromPrimitive};
use chrono::{DateTime, TimeZone, Utc};
use num_bigint::BigInt;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

/// Where a forward-referenced value must be written once its target exists.
enum PatchSlot {
    ArrayItem(ArrayRef, usize),
    ListItem(CollectionRef, usize),
    /// Non-indexable collections take patched elements by appending.
    CollectionAppend(CollectionRef),
    ObjectField(ObjectRef, Arc<str>),
    NodeEntry(JNodeRef, Rc<str>),
    MapEntry(MapRef, Value),
    /// A slot in a pending rehash key or value list, or the root slot.
    PendingSlot(Rc<RefCell<Vec<Value>>>, usize),
}

struct UnresolvedRef {
    slot: PatchSlot,
    target_id: i64,
}

struct RehashEntry {
    map: MapRef,
    keys: Rc<RefCell<Vec<Value>>>,
    values: Rc<RefCell<Vec<Value>>>,
}

/// Outcome of materializing one intermediate value.
enum Materialized {
    Done(Value),
    /// A `@ref` whose `@id` node has no target yet.
    Pending(i64),
}

pub struct Resolver<'a> {
    registry: &'a Arc<TypeRegistry>,
    codecs: &'a Rc<CodecRegistry>,
    ids: &'a FxHashMap<i64, JNodeRef>,
    allow_raw: bool,
    unresolved: Vec<UnresolvedRef>,
    rehash_queue: Vec<RehashEntry>,
    enum_constants: FxHashMap<(Arc<str>, Rc<str>), Value>,
    reader_cache: FxHashMap<String, Option<Rc<dyn CustomReader>>>,
}

impl<'a> Resolver<'a> {
    pub(crate) fn new(
        registry: &'a Arc<TypeRegistry>,
        codecs: &'a Rc<CodecRegistry>,
        ids: &'a FxHashMap<i64, JNodeRef>,
        allow_raw: bool,
    ) -> Self {
        Self {
            registry,
            codecs,
            ids,
            allow_raw,
            unresolved: Vec::new(),
            rehash_queue: Vec::new(),
            enum_constants: FxHashMap::default(),
            reader_cache: FxHashMap::default(),
        }
    }

    /// The type registry this resolution runs against, for custom readers.
    #[inline]
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        self.registry
    }

    pub(crate) fn resolve(mut self, root: JValue) -> Result<Value, JsonGraphError> {
        let root_slot = Rc::new(RefCell::new(vec![Value::Null]));
        match self.materialize(&root, &TypeRef::Any, "root")? {
            Materialized::Done(value) => root_slot.borrow_mut()[0] = value,
            Materialized::Pending(id) => self.unresolved.push(UnresolvedRef {
                slot: PatchSlot::PendingSlot(Rc::clone(&root_slot), 0),
                target_id: id,
            }),
        }
        self.patch_forward_references()?;
        self.rehash_maps();
        let value = root_slot.borrow()[0].clone();
        Ok(value)
    }

    /// Materializes one intermediate value against the type the surrounding
    /// context declares for it.
    ///
    /// This is also the entry point for [`CustomReader`] implementations that
    /// need nested values resolved.
    pub fn materialize_value(
        &mut self,
        raw: &JValue,
        declared: &TypeRef,
        context: &str,
    ) -> Result<Value, JsonGraphError> {
        match self.materialize(raw, declared, context)? {
            Materialized::Done(value) => Ok(value),
            Materialized::Pending(id) => Err(JsonGraphError::coercion(
                context,
                format!("forward reference @ref:{id} is not allowed here"),
            )),
        }
    }

    fn materialize(
        &mut self,
        raw: &JValue,
        declared: &TypeRef,
        context: &str,
    ) -> Result<Materialized, JsonGraphError> {
        Ok(match raw {
            JValue::Null => Materialized::Done(declared.unset_value()),
            JValue::Bool(_) | JValue::Long(_) | JValue::Double(_) | JValue::Str(_) => {
                // A custom codec on the declared type also receives scalar
                // raws; that is how primitive-form custom values come back.
                if !declared.is_any() {
                    if let Some(reader) = self.reader_for(declared) {
                        return Ok(Materialized::Done(reader.read(raw, self)?));
                    }
                }
                Materialized::Done(coerce_scalar(raw, declared, context)?)
            }
            JValue::Array(items) => {
                Materialized::Done(self.materialize_sequence(&items.borrow(), declared, context)?)
            }
            JValue::Node(node) => self.materialize_node(node, declared, context)?,
            JValue::Resolved(value) => Materialized::Done(value.clone()),
        })
    }

    /// A raw JSON array becomes whatever the declaring context asks for: an
    /// array of the declared component type by default, a collection when the
    /// context declares one.
    fn materialize_sequence(
        &mut self,
        items: &[JValue],
        declared: &TypeRef,
        context: &str,
    ) -> Result<Value, JsonGraphError> {
        match declared {
            TypeRef::List(_) | TypeRef::Set(_) | TypeRef::SortedSet(_) => {
                let kind = match declared {
                    TypeRef::Set(_) => CollectionKind::Set,
                    TypeRef::SortedSet(_) => CollectionKind::SortedSet,
                    _ => CollectionKind::List,
                };
                let collection = Rc::new(RefCell::new(CollectionValue::new(kind)));
                self.fill_collection(&collection, items, declared.component(), context)?;
                Ok(Value::Collection(collection))
            }
            _ => {
                let component = match declared {
                    TypeRef::Array(_) => declared.component().clone(),
                    _ => TypeRef::Any,
                };
                let array = Rc::new(RefCell::new(ArrayValue {
                    component: component.clone(),
                    items: Vec::with_capacity(items.len()),
                }));
                self.fill_array(&array, items, &component, context)?;
                Ok(Value::Array(array))
            }
        }
    }

    fn materialize_node(
        &mut self,
        node: &JNodeRef,
        declared: &TypeRef,
        context: &str,
    ) -> Result<Materialized, JsonGraphError> {
        if let Some(target) = node.borrow().target() {
            return Ok(Materialized::Done(target.clone()));
        }
        if let Some(ref_id) = node.borrow().ref_id() {
            let target = self
                .ids
                .get(&ref_id)
                .and_then(|n| n.borrow().target().cloned());
            return Ok(match target {
                Some(value) => Materialized::Done(value),
                None => Materialized::Pending(ref_id),
            });
        }

        // Concrete type selection: the node's own @type wins, then the type
        // the parent context declares, then free-form.
        let declared_name = node.borrow().type_name().cloned();
        let effective = match &declared_name {
            Some(name) => {
                let parsed = TypeRef::parse(name);
                if let TypeRef::Named(class) = &parsed {
                    if !self.registry.contains(class) {
                        return Err(JsonGraphError::unknown_class(class));
                    }
                }
                parsed
            }
            None if !declared.is_any() => declared.clone(),
            None => TypeRef::Any,
        };

        if effective.is_scalar() && node.borrow().items().is_some() {
            return Err(JsonGraphError::Type(format!(
                "Type '{effective}' cannot be combined with @items on the same node"
            )));
        }

        // Custom codecs outrank generic handling, the built-in date, big
        // number and class codecs included.
        if let Some(reader) = self.reader_for(&effective) {
            let value = reader.read(&JValue::Node(Rc::clone(node)), self)?;
            node.borrow_mut().set_target(value.clone());
            return Ok(Materialized::Done(value));
        }

        if effective.is_scalar() {
            return Ok(Materialized::Done(self.scalar_wrapper(node, &effective, context)?));
        }

        let value = match &effective {
            TypeRef::Named(name) => {
                let descriptor = self
                    .registry
                    .get(name)
                    .ok_or_else(|| JsonGraphError::unknown_class(name))?;
                if let Some(enum_descriptor) = self.registry.enum_ancestor(&descriptor) {
                    self.resolve_enum(node, &enum_descriptor)?
                } else {
                    self.traverse_object(node, &descriptor)?
                }
            }
            TypeRef::Map(k, v) => self.traverse_map(node, MapKind::Ordered, k, v, context)?,
            TypeRef::SortedMap(k, v) => self.traverse_map(node, MapKind::Sorted, k, v, context)?,
            TypeRef::List(c) => {
                self.traverse_collection(node, CollectionKind::List, c, context)?
            }
            TypeRef::Set(c) => self.traverse_collection(node, CollectionKind::Set, c, context)?,
            TypeRef::SortedSet(c) => {
                self.traverse_collection(node, CollectionKind::SortedSet, c, context)?
            }
            TypeRef::Array(c) => self.traverse_array(node, c, context)?,
            TypeRef::Any => {
                if node.borrow().is_map_node() {
                    self.traverse_map(node, MapKind::Ordered, &TypeRef::Any, &TypeRef::Any, context)?
                } else if node.borrow().is_array_node() {
                    self.traverse_array(node, &TypeRef::Any, context)?
                } else {
                    self.traverse_free_node(node, context)?
                }
            }
            // Scalars were dispatched above.
            _ => self.scalar_wrapper(node, &effective, context)?,
        };
        Ok(Materialized::Done(value))
    }

    /// A `{"@type":"int","value":5}` style wrapper node.
    fn scalar_wrapper(
        &mut self,
        node: &JNodeRef,
        target_type: &TypeRef,
        context: &str,
    ) -> Result<Value, JsonGraphError> {
        let raw = node.borrow().get("value").cloned().ok_or_else(|| {
            JsonGraphError::Type(format!(
                "Type '{target_type}' node is missing its 'value' entry"
            ))
        })?;
        let value = coerce_scalar(&raw, target_type, context)?;
        node.borrow_mut().set_target(value.clone());
        Ok(value)
    }

    fn traverse_array(
        &mut self,
        node: &JNodeRef,
        component: &TypeRef,
        context: &str,
    ) -> Result<Value, JsonGraphError> {
        let items = self.node_items(node)?;
        let array = Rc::new(RefCell::new(ArrayValue {
            component: component.clone(),
            items: Vec::with_capacity(items.borrow().len()),
        }));
        node.borrow_mut().set_target(Value::Array(Rc::clone(&array)));
        self.fill_array(&array, &items.borrow(), component, context)?;
        Ok(Value::Array(array))
    }

    fn fill_array(
        &mut self,
        array: &ArrayRef,
        items: &[JValue],
        component: &TypeRef,
        context: &str,
    ) -> Result<(), JsonGraphError> {
        for (index, item) in items.iter().enumerate() {
            match self.materialize(item, component, context)? {
                Materialized::Done(value) => array.borrow_mut().items.push(value),
                Materialized::Pending(id) => {
                    array.borrow_mut().items.push(Value::Null);
                    self.unresolved.push(UnresolvedRef {
                        slot: PatchSlot::ArrayItem(Rc::clone(array), index),
                        target_id: id,
                    });
                }
            }
        }
        Ok(())
    }

    fn traverse_collection(
        &mut self,
        node: &JNodeRef,
        kind: CollectionKind,
        component: &TypeRef,
        context: &str,
    ) -> Result<Value, JsonGraphError> {
        let items = self.node_items(node)?;
        let collection = Rc::new(RefCell::new(CollectionValue::new(kind)));
        node.borrow_mut()
            .set_target(Value::Collection(Rc::clone(&collection)));
        self.fill_collection(&collection, &items.borrow(), component, context)?;
        Ok(Value::Collection(collection))
    }

    fn fill_collection(
        &mut self,
        collection: &CollectionRef,
        items: &[JValue],
        component: &TypeRef,
        context: &str,
    ) -> Result<(), JsonGraphError> {
        for item in items {
            match self.materialize(item, component, context)? {
                Materialized::Done(value) => collection.borrow_mut().insert(value),
                Materialized::Pending(id) => {
                    let indexable = collection.borrow().is_indexable();
                    let slot = if indexable {
                        // Hold the position with a null, patch it in place.
                        let index = collection.borrow().items().len();
                        collection.borrow_mut().push_raw(Value::Null);
                        PatchSlot::ListItem(Rc::clone(collection), index)
                    } else {
                        PatchSlot::CollectionAppend(Rc::clone(collection))
                    };
                    self.unresolved.push(UnresolvedRef {
                        slot,
                        target_id: id,
                    });
                }
            }
        }
        Ok(())
    }

    fn traverse_map(
        &mut self,
        node: &JNodeRef,
        kind: MapKind,
        key_type: &TypeRef,
        value_type: &TypeRef,
        context: &str,
    ) -> Result<Value, JsonGraphError> {
        let map = Rc::new(RefCell::new(MapValue::new(kind)));
        node.borrow_mut().set_target(Value::Map(Rc::clone(&map)));

        if node.borrow().is_map_node() {
            let keys = self.node_keys(node)?;
            let items = self.node_items(node)?;
            if keys.borrow().len() != items.borrow().len() {
                return Err(JsonGraphError::Type(format!(
                    "@keys and @items lengths differ ({} vs {})",
                    keys.borrow().len(),
                    items.borrow().len()
                )));
            }
            let key_list = self.resolve_pending_list(&keys.borrow(), key_type, context)?;
            let value_list = self.resolve_pending_list(&items.borrow(), value_type, context)?;
            self.rehash_queue.push(RehashEntry {
                map: Rc::clone(&map),
                keys: key_list,
                values: value_list,
            });
        } else {
            // String-keyed compact form: plain entries are the map contents.
            let entries: Vec<(Rc<str>, JValue)> = node
                .borrow()
                .data_entries()
                .map(|(k, v)| (Rc::clone(k), v.clone()))
                .collect();
            for (key, raw) in entries {
                let key_value = Value::Str(Rc::clone(&key));
                match self.materialize(&raw, value_type, &key)? {
                    Materialized::Done(value) => map.borrow_mut().insert(key_value, value),
                    Materialized::Pending(id) => {
                        map.borrow_mut().insert(key_value.clone(), Value::Null);
                        self.unresolved.push(UnresolvedRef {
                            slot: PatchSlot::MapEntry(Rc::clone(&map), key_value),
                            target_id: id,
                        });
                    }
                }
            }
        }
        Ok(Value::Map(map))
    }

    /// Materializes the elements of a `@keys` or `@items` side into a shared
    /// list that pending references can be patched into.
    fn resolve_pending_list(
        &mut self,
        items: &[JValue],
        component: &TypeRef,
        context: &str,
    ) -> Result<Rc<RefCell<Vec<Value>>>, JsonGraphError> {
        let list = Rc::new(RefCell::new(Vec::with_capacity(items.len())));
        for (index, item) in items.iter().enumerate() {
            match self.materialize(item, component, context)? {
                Materialized::Done(value) => list.borrow_mut().push(value),
                Materialized::Pending(id) => {
                    list.borrow_mut().push(Value::Null);
                    self.unresolved.push(UnresolvedRef {
                        slot: PatchSlot::PendingSlot(Rc::clone(&list), index),
                        target_id: id,
                    });
                }
            }
        }
        Ok(list)
    }

    fn traverse_object(
        &mut self,
        node: &JNodeRef,
        descriptor: &Arc<TypeDescriptor>,
    ) -> Result<Value, JsonGraphError> {
        let instance = self.registry.instantiate(descriptor, self.allow_raw)?;
        node.borrow_mut().set_target(instance.clone());
        let Some(object) = instance.as_object() else {
            // A constructor may produce something that is not a plain object;
            // there are no fields to assign then.
            return Ok(instance);
        };
        let fields = self.registry.deep_fields(descriptor.name())?;
        let entries: Vec<(Rc<str>, JValue)> = node
            .borrow()
            .data_entries()
            .map(|(k, v)| (Rc::clone(k), v.clone()))
            .collect();
        for (key, raw) in entries {
            let Some(field) = fields.get(&*key) else {
                log::debug!(
                    "skipping unknown field '{key}' on class '{}'",
                    descriptor.name()
                );
                continue;
            };
            let field_key: Arc<str> = Arc::from(&*key);
            match self.materialize(&raw, field.declared(), &key)? {
                Materialized::Done(value) => object.borrow_mut().set(field_key, value),
                Materialized::Pending(id) => {
                    object
                        .borrow_mut()
                        .set(Arc::clone(&field_key), field.declared().unset_value());
                    self.unresolved.push(UnresolvedRef {
                        slot: PatchSlot::ObjectField(Rc::clone(object), field_key),
                        target_id: id,
                    });
                }
            }
        }
        Ok(instance)
    }

    /// A node with no type information anywhere stays a free-form map; its
    /// entries are resolved in place.
    fn traverse_free_node(
        &mut self,
        node: &JNodeRef,
        _context: &str,
    ) -> Result<Value, JsonGraphError> {
        node.borrow_mut()
            .set_target(Value::Node(Rc::clone(node)));
        let entries: Vec<(Rc<str>, JValue)> = node
            .borrow()
            .data_entries()
            .map(|(k, v)| (Rc::clone(k), v.clone()))
            .collect();
        for (key, raw) in entries {
            match raw {
                // Scalars already are their resolved form.
                JValue::Null
                | JValue::Bool(_)
                | JValue::Long(_)
                | JValue::Double(_)
                | JValue::Str(_)
                | JValue::Resolved(_) => {}
                _ => match self.materialize(&raw, &TypeRef::Any, &key)? {
                    Materialized::Done(value) => node
                        .borrow_mut()
                        .set_entry_value(&key, JValue::Resolved(value)),
                    Materialized::Pending(id) => {
                        self.unresolved.push(UnresolvedRef {
                            slot: PatchSlot::NodeEntry(Rc::clone(node), Rc::clone(&key)),
                            target_id: id,
                        });
                    }
                },
            }
        }
        Ok(Value::Node(Rc::clone(node)))
    }

    fn resolve_enum(
        &mut self,
        node: &JNodeRef,
        descriptor: &Arc<TypeDescriptor>,
    ) -> Result<Value, JsonGraphError> {
        let name = node
            .borrow()
            .get("name")
            .and_then(|v| v.as_str().map(Rc::from))
            .ok_or_else(|| {
                JsonGraphError::Type(format!(
                    "Enum '{}' value is missing its 'name' entry",
                    descriptor.name()
                ))
            })?;
        if !descriptor.variants().iter().any(|v| **v == *name) {
            return Err(JsonGraphError::Type(format!(
                "Unknown variant '{name}' for enum class '{}'",
                descriptor.name()
            )));
        }
        let key = (Arc::clone(descriptor.name()), Rc::clone(&name));
        let value = if let Some(existing) = self.enum_constants.get(&key) {
            existing.clone()
        } else {
            let mut object = crate::value::ObjectValue::new(Arc::clone(descriptor));
            object.set("name", Value::Str(Rc::clone(&name)));
            let value = Value::object(object);
            self.enum_constants.insert(key, value.clone());
            value
        };
        node.borrow_mut().set_target(value.clone());
        Ok(value)
    }

    fn node_items(&self, node: &JNodeRef) -> Result<Rc<RefCell<Vec<JValue>>>, JsonGraphError> {
        match node.borrow().items() {
            Some(JValue::Array(items)) => Ok(Rc::clone(items)),
            Some(other) => Err(JsonGraphError::Type(format!(
                "@items must be an array, found {}",
                other.describe()
            ))),
            None => Ok(Rc::new(RefCell::new(Vec::new()))),
        }
    }

    fn node_keys(&self, node: &JNodeRef) -> Result<Rc<RefCell<Vec<JValue>>>, JsonGraphError> {
        match node.borrow().keys() {
            Some(JValue::Array(keys)) => Ok(Rc::clone(keys)),
            Some(other) => Err(JsonGraphError::Type(format!(
                "@keys must be an array, found {}",
                other.describe()
            ))),
            None => Ok(Rc::new(RefCell::new(Vec::new()))),
        }
    }

    fn reader_for(&mut self, effective: &TypeRef) -> Option<Rc<dyn CustomReader>> {
        if effective.is_any() {
            return None;
        }
        let name = effective.to_string();
        if let Some(cached) = self.reader_cache.get(&name) {
            return cached.clone();
        }
        let reader = self.codecs.reader_for(&name, self.registry);
        self.reader_cache.insert(name, reader.clone());
        reader
    }

    fn patch_forward_references(&mut self) -> Result<(), JsonGraphError> {
        let mut missing = Vec::new();
        let records = std::mem::take(&mut self.unresolved);
        let patched = records.len();
        for record in records {
            let target = self
                .ids
                .get(&record.target_id)
                .and_then(|n| n.borrow().target().cloned());
            let Some(value) = target else {
                missing.push(record.target_id);
                continue;
            };
            match record.slot {
                PatchSlot::ArrayItem(array, index) => {
                    array.borrow_mut().items[index] = value;
                }
                PatchSlot::ListItem(collection, index) => {
                    collection.borrow_mut().set_item(index, value);
                }
                PatchSlot::CollectionAppend(collection) => {
                    collection.borrow_mut().insert(value);
                }
                PatchSlot::ObjectField(object, field) => {
                    object.borrow_mut().set(field, value);
                }
                PatchSlot::NodeEntry(node, key) => {
                    node.borrow_mut()
                        .set_entry_value(&key, JValue::Resolved(value));
                }
                PatchSlot::MapEntry(map, key) => {
                    map.borrow_mut().insert(key, value);
                }
                PatchSlot::PendingSlot(list, index) => {
                    list.borrow_mut()[index] = value;
                }
            }
        }
        if missing.is_empty() {
            if patched > 0 {
                log::debug!("patched {patched} forward references");
            }
            Ok(())
        } else {
            missing.sort_unstable();
            missing.dedup();
            Err(JsonGraphError::UnresolvedReferences(missing))
        }
    }

    fn rehash_maps(&mut self) {
        let entries = std::mem::take(&mut self.rehash_queue);
        if !entries.is_empty() {
            log::debug!("rehashing {} maps", entries.len());
        }
        for entry in entries {
            let keys = entry.keys.borrow();
            let values = entry.values.borrow();
            let mut map = entry.map.borrow_mut();
            for (key, value) in keys.iter().zip(values.iter()) {
                map.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Coerces a scalar intermediate value into the declared target type,
/// applying the dialect's lenient conversions.
pub(crate) fn coerce_scalar(
    raw: &JValue,
    declared: &TypeRef,
    context: &str,
) -> Result<Value, JsonGraphError> {
    // The identity mappings first: no declared type constrains the value.
    if declared.is_any() || matches!(declared, TypeRef::Named(_)) {
        return Ok(match raw {
            JValue::Null => Value::Null,
            JValue::Bool(b) => Value::Bool(*b),
            JValue::Long(v) => Value::Long(*v),
            JValue::Double(v) => Value::Double(*v),
            // "" into a non-string, non-primitive slot reads as null.
            JValue::Str(s) if s.is_empty() && !declared.is_any() => Value::Null,
            JValue::Str(s) => Value::Str(Rc::clone(s)),
            _ => {
                return Err(JsonGraphError::coercion(
                    context,
                    format!("{} is not a scalar", raw.describe()),
                ));
            }
        });
    }

    let mismatch = |why: &str| -> JsonGraphError {
        JsonGraphError::coercion(
            context,
            format!("cannot convert {} to '{declared}'{why}", raw.describe()),
        )
    };

    match declared {
        TypeRef::String => Ok(match raw {
            JValue::Null => Value::Null,
            JValue::Str(s) => Value::Str(Rc::clone(s)),
            JValue::Bool(b) => Value::string(if *b { "true" } else { "false" }),
            JValue::Long(v) => Value::string(v.to_string()),
            JValue::Double(v) => Value::string(v.to_string()),
            _ => return Err(mismatch("")),
        }),
        TypeRef::Primitive(p) | TypeRef::Boxed(p) => {
            coerce_primitive(raw, *p, matches!(declared, TypeRef::Primitive(_)), context)
        }
        TypeRef::BigInt => coerce_big_int(raw).map_err(|why| mismatch(&format!(": {why}"))),
        TypeRef::BigDec => coerce_big_dec(raw).map_err(|why| mismatch(&format!(": {why}"))),
        TypeRef::Date => match raw {
            JValue::Null => Ok(Value::Null),
            JValue::Long(millis) => Ok(Value::Date(epoch_millis(*millis))),
            JValue::Str(s) if s.trim().is_empty() => Ok(Value::Null),
            // Epoch milliseconds may arrive quoted (longs-as-strings mode).
            JValue::Str(s) if s.trim().parse::<i64>().is_ok() => Ok(Value::Date(epoch_millis(
                s.trim().parse::<i64>().unwrap_or(0),
            ))),
            JValue::Str(s) => dates::parse_date(s)
                .map(Value::Date)
                .map_err(|why| mismatch(&format!(": {why}"))),
            _ => Err(mismatch("")),
        },
        TypeRef::Class => match raw {
            JValue::Null => Ok(Value::Null),
            JValue::Str(s) if s.trim().is_empty() => Ok(Value::Null),
            JValue::Str(s) => Ok(Value::Class(Rc::clone(s))),
            _ => Err(mismatch("")),
        },
        _ => match raw {
            JValue::Null => Ok(Value::Null),
            // "" into any non-string, non-primitive slot reads as null.
            JValue::Str(s) if s.is_empty() => Ok(Value::Null),
            _ => Err(mismatch("")),
        },
    }
}

#[expect(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    reason = "narrowing conversions are the documented coercion behavior"
)]
fn coerce_primitive(
    raw: &JValue,
    kind: Primitive,
    is_primitive_slot: bool,
    context: &str,
) -> Result<Value, JsonGraphError> {
    let error = |why: String| JsonGraphError::coercion(context, why);
    // Empty strings coerce to the primitive zero; null stays null only for
    // boxed slots.
    match raw {
        JValue::Null => {
            return Ok(if is_primitive_slot {
                kind.zero()
            } else {
                Value::Null
            });
        }
        JValue::Str(s) if s.trim().is_empty() => {
            return Ok(kind.zero());
        }
        _ => {}
    }

    let as_long = |raw: &JValue| -> Result<i64, JsonGraphError> {
        match raw {
            JValue::Long(v) => Ok(*v),
            JValue::Double(v) => Ok(*v as i64),
            JValue::Bool(b) => Ok(i64::from(*b)),
            JValue::Str(s) => s
                .trim()
                .parse::<i64>()
                .or_else(|_| s.trim().parse::<f64>().map(|v| v as i64))
                .map_err(|_| error(format!("'{s}' is not a number"))),
            _ => Err(error(format!("{} is not a number", raw.describe()))),
        }
    };
    let as_double = |raw: &JValue| -> Result<f64, JsonGraphError> {
        match raw {
            JValue::Long(v) => Ok(*v as f64),
            JValue::Double(v) => Ok(*v),
            JValue::Bool(b) => Ok(f64::from(u8::from(*b))),
            JValue::Str(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| error(format!("'{s}' is not a number"))),
            _ => Err(error(format!("{} is not a number", raw.describe()))),
        }
    };

    Ok(match kind {
        Primitive::Boolean => Value::Bool(match raw {
            JValue::Bool(b) => *b,
            JValue::Long(v) => *v != 0,
            JValue::Double(v) => *v != 0.,
            JValue::Str(s) => s.trim().eq_ignore_ascii_case("true"),
            _ => return Err(error(format!("{} is not a boolean", raw.describe()))),
        }),
        Primitive::Byte => Value::Byte(as_long(raw)? as i8),
        Primitive::Short => Value::Short(as_long(raw)? as i16),
        Primitive::Int => Value::Int(as_long(raw)? as i32),
        Primitive::Long => Value::Long(as_long(raw)?),
        Primitive::Float => Value::Float(as_double(raw)? as f32),
        Primitive::Double => Value::Double(as_double(raw)?),
        Primitive::Char => Value::Char(match raw {
            JValue::Str(s) => s.chars().next().unwrap_or('\0'),
            _ => char::from_u32(u32::try_from(as_long(raw)?).unwrap_or(0)).unwrap_or('\0'),
        }),
    })
}

/// Big-integer coercion: strings parse (empty trims to null), booleans map
/// to 0/1, floats keep their integer part, integers wrap.
pub(crate) fn coerce_big_int(raw: &JValue) -> Result<Value, String> {
    Ok(match raw {
        JValue::Null => Value::Null,
        JValue::Str(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Value::Null
            } else {
                Value::BigInt(
                    trimmed
                        .parse::<BigInt>()
                        .map_err(|_| format!("'{trimmed}' is not an integer"))?,
                )
            }
        }
        JValue::Bool(b) => Value::BigInt(BigInt::from(u8::from(*b))),
        JValue::Long(v) => Value::BigInt(BigInt::from(*v)),
        JValue::Double(v) => {
            let decimal =
                BigDecimal::from_f64(*v).ok_or_else(|| format!("{v} has no exact form"))?;
            Value::BigInt(decimal.with_scale(0).into_bigint_and_exponent().0)
        }
        other => return Err(format!("{} is not a number", other.describe())),
    })
}

/// Big-decimal coercion: like big integers but floats convert exactly.
pub(crate) fn coerce_big_dec(raw: &JValue) -> Result<Value, String> {
    Ok(match raw {
        JValue::Null => Value::Null,
        JValue::Str(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Value::Null
            } else {
                Value::BigDec(
                    trimmed
                        .parse::<BigDecimal>()
                        .map_err(|_| format!("'{trimmed}' is not a decimal"))?,
                )
            }
        }
        JValue::Bool(b) => Value::BigDec(BigDecimal::from(u8::from(*b))),
        JValue::Long(v) => Value::BigDec(BigDecimal::from(*v)),
        JValue::Double(v) => {
            Value::BigDec(BigDecimal::from_f64(*v).ok_or_else(|| format!("{v} has no exact form"))?)
        }
        other => return Err(format!("{} is not a number", other.describe())),
    })
}

pub(crate) fn epoch_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coerce(raw: JValue, declared: TypeRef) -> Result<Value, JsonGraphError> {
        coerce_scalar(&raw, &declared, "test")
    }

    #[test]
    fn empty_string_coercions() {
        // "" into a boolean reads false, into a primitive reads zero.
        assert_eq!(
            coerce(JValue::Str(Rc::from("")), TypeRef::Primitive(Primitive::Boolean)).unwrap(),
            Value::Bool(false)
        );
        assert_eq!(
            coerce(JValue::Str(Rc::from("")), TypeRef::Primitive(Primitive::Int)).unwrap(),
            Value::Int(0)
        );
        // "" into a non-string, non-primitive slot reads null.
        assert_eq!(
            coerce(JValue::Str(Rc::from("")), TypeRef::Date).unwrap(),
            Value::Null
        );
        assert_eq!(
            coerce(JValue::Str(Rc::from("")), TypeRef::BigInt).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn string_numerics_parse() {
        assert_eq!(
            coerce(JValue::Str(Rc::from("42")), TypeRef::Primitive(Primitive::Int)).unwrap(),
            Value::Int(42)
        );
        assert_eq!(
            coerce(JValue::Str(Rc::from("2.5")), TypeRef::Primitive(Primitive::Double)).unwrap(),
            Value::Double(2.5)
        );
    }

    #[test]
    fn booleans_map_to_zero_and_one() {
        assert_eq!(
            coerce(JValue::Bool(true), TypeRef::Primitive(Primitive::Int)).unwrap(),
            Value::Int(1)
        );
        assert_eq!(
            coerce(JValue::Bool(true), TypeRef::BigInt).unwrap(),
            Value::BigInt(BigInt::from(1))
        );
    }

    #[test]
    fn big_number_rules() {
        assert_eq!(
            coerce_big_int(&JValue::Double(2.9)).unwrap(),
            Value::BigInt(BigInt::from(2))
        );
        assert_eq!(
            coerce_big_int(&JValue::Str(Rc::from("123456789012345678901234567890"))).unwrap(),
            Value::BigInt("123456789012345678901234567890".parse().unwrap())
        );
        assert_eq!(
            coerce_big_dec(&JValue::Long(7)).unwrap(),
            Value::BigDec(BigDecimal::from(7))
        );
    }

    #[test]
    fn dates_from_longs_and_strings() {
        let from_millis = coerce(JValue::Long(86_400_000), TypeRef::Date).unwrap();
        assert_eq!(
            from_millis,
            Value::Date(Utc.with_ymd_and_hms(1970, 1, 2, 0, 0, 0).unwrap())
        );
        let from_text = coerce(JValue::Str(Rc::from("1970-01-02")), TypeRef::Date).unwrap();
        assert_eq!(from_millis, from_text);
    }

    #[test]
    fn null_into_primitive_slot_is_zero() {
        assert_eq!(
            coerce(JValue::Null, TypeRef::Primitive(Primitive::Long)).unwrap(),
            Value::Long(0)
        );
        assert_eq!(coerce(JValue::Null, TypeRef::Boxed(Primitive::Long)).unwrap(), Value::Null);
    }

    #[test]
    fn char_coercions() {
        assert_eq!(
            coerce(JValue::Str(Rc::from("x")), TypeRef::Primitive(Primitive::Char)).unwrap(),
            Value::Char('x')
        );
        assert_eq!(
            coerce(JValue::Long(65), TypeRef::Primitive(Primitive::Char)).unwrap(),
            Value::Char('A')
        );
    }

    #[test]
    fn impossible_coercion_names_the_field() {
        let error = coerce(JValue::Bool(true), TypeRef::Date).unwrap_err();
        assert!(error.to_string().contains("test"));
    }
}
