//! Per-type custom read/write hooks and the registry resolving them by
//! inheritance distance.
//!
//! A reader takes the raw intermediate value and the resolver (for nested
//! materialization) and returns the typed value. A writer emits the body of
//! the JSON object for a value, and may declare a primitive form: a single
//! scalar the serializer uses when the value is not identity-referenced and
//! its type is inferable from context.

use crate::error::JsonGraphError;
use crate::node::JValue;
use crate::registry::TypeRegistry;
use crate::resolver::{self, Resolver};
use crate::types::TypeRef;
use crate::value::Value;
use crate::vocab::type_names;
use crate::writer::JsonEmitter;
use rustc_hash::FxHashSet;
use std::rc::Rc;
use std::sync::Arc;

pub trait CustomReader {
    fn read(&self, raw: &JValue, resolver: &mut Resolver<'_>) -> Result<Value, JsonGraphError>;
}

pub trait CustomWriter {
    /// Writes the body of the object form; the serializer has already opened
    /// the brace and emitted `@id`/`@type` as needed.
    fn write(
        &self,
        value: &Value,
        show_type: bool,
        emitter: &mut JsonEmitter<'_>,
    ) -> Result<(), JsonGraphError>;

    fn has_primitive_form(&self) -> bool {
        false
    }

    /// Writes the value as a single JSON scalar instead of an object.
    fn write_primitive_form(
        &self,
        _value: &Value,
        _emitter: &mut JsonEmitter<'_>,
    ) -> Result<(), JsonGraphError> {
        Err(JsonGraphError::Configuration(
            "codec declares no primitive form".into(),
        ))
    }
}

/// The two codec tables plus the "not custom" overrides.
///
/// Lookup picks the codec registered for the closest ancestor of the target
/// type, ties broken by registration order. Classes in a "not custom" set are
/// handled generically even when an ancestor has a codec.
pub struct CodecRegistry {
    readers: Vec<(Arc<str>, Rc<dyn CustomReader>)>,
    writers: Vec<(Arc<str>, Rc<dyn CustomWriter>)>,
    not_custom_read: FxHashSet<Arc<str>>,
    not_custom_written: FxHashSet<Arc<str>>,
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CodecRegistry {
    /// A registry pre-populated with the built-in codecs (dates, big
    /// numbers, class references).
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register_reader(type_names::DATE, DateReader);
        registry.register_writer(type_names::DATE, DateWriter);
        registry.register_reader(type_names::BIG_INT, BigIntReader);
        registry.register_writer(type_names::BIG_INT, BigIntWriter);
        registry.register_reader(type_names::BIG_DEC, BigDecReader);
        registry.register_writer(type_names::BIG_DEC, BigDecWriter);
        registry.register_reader(type_names::CLASS, ClassReader);
        registry.register_writer(type_names::CLASS, ClassWriter);
        registry
    }

    /// A registry with no codecs at all, built-ins included.
    pub fn empty() -> Self {
        Self {
            readers: Vec::new(),
            writers: Vec::new(),
            not_custom_read: FxHashSet::default(),
            not_custom_written: FxHashSet::default(),
        }
    }

    pub fn register_reader(
        &mut self,
        class: impl Into<Arc<str>>,
        reader: impl CustomReader + 'static,
    ) {
        self.readers.push((class.into(), Rc::new(reader)));
    }

    pub fn register_writer(
        &mut self,
        class: impl Into<Arc<str>>,
        writer: impl CustomWriter + 'static,
    ) {
        self.writers.push((class.into(), Rc::new(writer)));
    }

    /// Forces generic handling of a class on read even when an ancestor has
    /// a codec.
    pub fn set_not_custom_read(&mut self, class: impl Into<Arc<str>>) {
        self.not_custom_read.insert(class.into());
    }

    /// Forces generic handling of a class on write even when an ancestor has
    /// a codec.
    pub fn set_not_custom_written(&mut self, class: impl Into<Arc<str>>) {
        self.not_custom_written.insert(class.into());
    }

    pub(crate) fn reader_for(
        &self,
        type_name: &str,
        registry: &TypeRegistry,
    ) -> Option<Rc<dyn CustomReader>> {
        if self.not_custom_read.contains(type_name) {
            return None;
        }
        Self::closest(&self.readers, type_name, registry)
    }

    pub(crate) fn writer_for(
        &self,
        type_name: &str,
        registry: &TypeRegistry,
    ) -> Option<Rc<dyn CustomWriter>> {
        if self.not_custom_written.contains(type_name) {
            return None;
        }
        Self::closest(&self.writers, type_name, registry)
    }

    fn closest<C: ?Sized>(
        table: &[(Arc<str>, Rc<C>)],
        type_name: &str,
        registry: &TypeRegistry,
    ) -> Option<Rc<C>> {
        let mut best: Option<(u32, usize)> = None;
        for (index, (candidate, _)) in table.iter().enumerate() {
            if let Some(distance) = registry.distance(type_name, candidate) {
                // Strict < keeps the earliest registration on ties.
                if best.is_none_or(|(best_distance, _)| distance < best_distance) {
                    best = Some((distance, index));
                }
            }
        }
        let (_, index) = best?;
        Some(Rc::clone(&table[index].1))
    }
}

fn wrapper_value(raw: &JValue, type_name: &str) -> Result<JValue, JsonGraphError> {
    match raw {
        JValue::Node(node) => node.borrow().get("value").cloned().ok_or_else(|| {
            JsonGraphError::Type(format!(
                "Type '{type_name}' node is missing its 'value' entry"
            ))
        }),
        other => Ok(other.clone()),
    }
}

struct DateReader;

impl CustomReader for DateReader {
    fn read(&self, raw: &JValue, _resolver: &mut Resolver<'_>) -> Result<Value, JsonGraphError> {
        let raw = wrapper_value(raw, type_names::DATE)?;
        resolver::coerce_scalar(&raw, &TypeRef::Date, type_names::DATE)
    }
}

struct DateWriter;

impl CustomWriter for DateWriter {
    fn write(
        &self,
        value: &Value,
        _show_type: bool,
        emitter: &mut JsonEmitter<'_>,
    ) -> Result<(), JsonGraphError> {
        emitter.key("value")?;
        self.write_primitive_form(value, emitter)
    }

    fn has_primitive_form(&self) -> bool {
        true
    }

    fn write_primitive_form(
        &self,
        value: &Value,
        emitter: &mut JsonEmitter<'_>,
    ) -> Result<(), JsonGraphError> {
        let Value::Date(moment) = value else {
            return Err(JsonGraphError::Type("date codec got a non-date".into()));
        };
        match emitter.date_format() {
            Some(pattern) => {
                let formatted = crate::dates::format_date(moment, &pattern);
                emitter.write_string(&formatted)?;
            }
            None => emitter.write_long(moment.timestamp_millis())?,
        }
        Ok(())
    }
}

struct BigIntReader;

impl CustomReader for BigIntReader {
    fn read(&self, raw: &JValue, _resolver: &mut Resolver<'_>) -> Result<Value, JsonGraphError> {
        let raw = wrapper_value(raw, type_names::BIG_INT)?;
        resolver::coerce_big_int(&raw).map_err(JsonGraphError::Type)
    }
}

struct BigIntWriter;

impl CustomWriter for BigIntWriter {
    fn write(
        &self,
        value: &Value,
        _show_type: bool,
        emitter: &mut JsonEmitter<'_>,
    ) -> Result<(), JsonGraphError> {
        emitter.key("value")?;
        self.write_primitive_form(value, emitter)
    }

    fn has_primitive_form(&self) -> bool {
        true
    }

    fn write_primitive_form(
        &self,
        value: &Value,
        emitter: &mut JsonEmitter<'_>,
    ) -> Result<(), JsonGraphError> {
        let Value::BigInt(v) = value else {
            return Err(JsonGraphError::Type("bigint codec got a non-bigint".into()));
        };
        emitter.write_string(&v.to_string())?;
        Ok(())
    }
}

struct BigDecReader;

impl CustomReader for BigDecReader {
    fn read(&self, raw: &JValue, _resolver: &mut Resolver<'_>) -> Result<Value, JsonGraphError> {
        let raw = wrapper_value(raw, type_names::BIG_DEC)?;
        resolver::coerce_big_dec(&raw).map_err(JsonGraphError::Type)
    }
}

struct BigDecWriter;

impl CustomWriter for BigDecWriter {
    fn write(
        &self,
        value: &Value,
        _show_type: bool,
        emitter: &mut JsonEmitter<'_>,
    ) -> Result<(), JsonGraphError> {
        emitter.key("value")?;
        self.write_primitive_form(value, emitter)
    }

    fn has_primitive_form(&self) -> bool {
        true
    }

    fn write_primitive_form(
        &self,
        value: &Value,
        emitter: &mut JsonEmitter<'_>,
    ) -> Result<(), JsonGraphError> {
        let Value::BigDec(v) = value else {
            return Err(JsonGraphError::Type("bigdec codec got a non-bigdec".into()));
        };
        emitter.write_string(&v.to_string())?;
        Ok(())
    }
}

struct ClassReader;

impl CustomReader for ClassReader {
    fn read(&self, raw: &JValue, _resolver: &mut Resolver<'_>) -> Result<Value, JsonGraphError> {
        let raw = wrapper_value(raw, type_names::CLASS)?;
        resolver::coerce_scalar(&raw, &TypeRef::Class, type_names::CLASS)
    }
}

struct ClassWriter;

impl CustomWriter for ClassWriter {
    fn write(
        &self,
        value: &Value,
        _show_type: bool,
        emitter: &mut JsonEmitter<'_>,
    ) -> Result<(), JsonGraphError> {
        emitter.key("value")?;
        self.write_primitive_form(value, emitter)
    }

    fn has_primitive_form(&self) -> bool {
        true
    }

    fn write_primitive_form(
        &self,
        value: &Value,
        emitter: &mut JsonEmitter<'_>,
    ) -> Result<(), JsonGraphError> {
        let Value::Class(name) = value else {
            return Err(JsonGraphError::Type("class codec got a non-class".into()));
        };
        emitter.write_string(name)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeDescriptor;
    use rustc_hash::FxHashMap;

    struct Marker(&'static str);

    impl CustomReader for Marker {
        fn read(&self, _: &JValue, _: &mut Resolver<'_>) -> Result<Value, JsonGraphError> {
            Ok(Value::string(self.0))
        }
    }

    fn hierarchy() -> Arc<TypeRegistry> {
        let registry = TypeRegistry::new();
        registry.register(TypeDescriptor::class("demo.Animal"));
        registry.register(TypeDescriptor::class("demo.Dog").with_parent("demo.Animal"));
        registry.register(TypeDescriptor::class("demo.Puppy").with_parent("demo.Dog"));
        Arc::new(registry)
    }

    fn read_with(found: &Rc<dyn CustomReader>, types: &Arc<TypeRegistry>) -> Value {
        let codecs = Rc::new(CodecRegistry::empty());
        let ids = FxHashMap::default();
        let mut resolver = Resolver::new(types, &codecs, &ids, false);
        found.read(&JValue::Null, &mut resolver).unwrap()
    }

    #[test]
    fn lookup_prefers_the_closest_ancestor() {
        let types = hierarchy();
        let mut codecs = CodecRegistry::empty();
        codecs.register_reader("demo.Animal", Marker("animal"));
        codecs.register_reader("demo.Dog", Marker("dog"));
        let found = codecs.reader_for("demo.Puppy", &types).unwrap();
        assert_eq!(read_with(&found, &types), Value::string("dog"));
    }

    #[test]
    fn ties_break_by_registration_order() {
        let types = TypeRegistry::new();
        types.register(
            TypeDescriptor::class("demo.Both")
                .with_interface("demo.A")
                .with_interface("demo.B"),
        );
        let types = Arc::new(types);
        let mut codecs = CodecRegistry::empty();
        codecs.register_reader("demo.B", Marker("b"));
        codecs.register_reader("demo.A", Marker("a"));
        let found = codecs.reader_for("demo.Both", &types).unwrap();
        assert_eq!(read_with(&found, &types), Value::string("b"));
    }

    #[test]
    fn not_custom_forces_generic_handling() {
        let types = hierarchy();
        let mut codecs = CodecRegistry::empty();
        codecs.register_reader("demo.Animal", Marker("animal"));
        codecs.set_not_custom_read("demo.Dog");
        assert!(codecs.reader_for("demo.Dog", &types).is_none());
        // Subclasses are still covered through the ancestor codec.
        assert!(codecs.reader_for("demo.Puppy", &types).is_some());
    }

    #[test]
    fn builtins_are_registered_by_default() {
        let types = Arc::new(TypeRegistry::new());
        let codecs = CodecRegistry::new();
        assert!(codecs.reader_for("date", &types).is_some());
        assert!(codecs.writer_for("bigint", &types).is_some());
        assert!(codecs.reader_for("bigdec", &types).is_some());
        assert!(codecs.writer_for("class", &types).is_some());
    }
}
