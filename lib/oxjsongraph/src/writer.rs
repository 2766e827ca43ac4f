//! Serialization of typed object graphs (and intermediate node trees) back
//! into the JSON dialect.
//!
//! Writing is two passes. The reach-ability trace walks the graph and finds
//! every object reached more than once; only those are assigned ids, from a
//! counter starting at 1. The emit pass then writes the graph depth-first:
//! the first occurrence of a referenced object opens with `@id`, every later
//! occurrence collapses to `{"@ref": n}`, which is also what breaks cycles.

use crate::codec::CodecRegistry;
use crate::error::JsonGraphError;
use crate::node::{JNodeRef, JValue};
use crate::registry::TypeRegistry;
use crate::types::{Primitive, TypeRef};
use crate::value::{ArrayRef, CollectionKind, CollectionRef, MapKind, MapRef, ObjectRef, ObjectValue, Value};
use crate::vocab::{self, type_names};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::HashMap;
use std::io::{self, Write};
use std::rc::Rc;
use std::sync::Arc;

/// A serializer for the JSON graph dialect.
///
/// ```
/// use oxjsongraph::{GraphSerializer, Value};
///
/// let array = Value::array(oxjsongraph::TypeRef::Any, vec![Value::string("Hello, World")]);
/// let json = GraphSerializer::new().serialize_to_string(&array)?;
/// assert_eq!(json, "[\"Hello, World\"]");
/// # Result::<_, Box<dyn std::error::Error>>::Ok(())
/// ```
#[derive(Default, Clone)]
#[must_use]
pub struct GraphSerializer {
    registry: Arc<TypeRegistry>,
    codecs: Rc<CodecRegistry>,
    pretty: bool,
    forced_types: bool,
    short_meta_keys: bool,
    longs_as_strings: bool,
    enum_public_only: bool,
    date_format: Option<String>,
    type_name_map: HashMap<String, String>,
    field_specifiers: HashMap<String, Vec<String>>,
}

impl GraphSerializer {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Type descriptors used for field metadata while writing.
    #[inline]
    pub fn with_type_registry(mut self, registry: Arc<TypeRegistry>) -> Self {
        self.registry = registry;
        self
    }

    #[inline]
    pub fn with_codecs(mut self, codecs: CodecRegistry) -> Self {
        self.codecs = Rc::new(codecs);
        self
    }

    /// Newlines and two-space indentation between tokens.
    #[inline]
    pub fn with_pretty_print(mut self) -> Self {
        self.pretty = true;
        self
    }

    /// Emits `@type` on every value that can carry one.
    #[inline]
    pub fn with_forced_types(mut self) -> Self {
        self.forced_types = true;
        self
    }

    /// Emits the short meta keys `@t @i @r @e @k`.
    #[inline]
    pub fn with_short_meta_keys(mut self) -> Self {
        self.short_meta_keys = true;
        self
    }

    /// Emits 64-bit integers as quoted strings (safe for JavaScript readers).
    #[inline]
    pub fn with_longs_as_strings(mut self) -> Self {
        self.longs_as_strings = true;
        self
    }

    /// Skips non-public enum fields.
    #[inline]
    pub fn with_public_enum_fields_only(mut self) -> Self {
        self.enum_public_only = true;
        self
    }

    /// Emits dates as strings in the given strftime-style pattern instead of
    /// epoch milliseconds.
    #[inline]
    pub fn with_date_format(mut self, pattern: impl Into<String>) -> Self {
        self.date_format = Some(pattern.into());
        self
    }

    /// The forward (long → short) type-name substitution applied to emitted
    /// `@type` values.
    #[inline]
    pub fn with_type_name_map(mut self, map: HashMap<String, String>) -> Self {
        self.type_name_map = map;
        self
    }

    /// Replaces reflection for a class with an explicit ordered field list.
    #[inline]
    pub fn with_field_specifier<S: Into<String>>(
        mut self,
        class: impl Into<String>,
        fields: impl IntoIterator<Item = S>,
    ) -> Self {
        self.field_specifiers
            .insert(class.into(), fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn serialize_to_string(&self, value: &Value) -> Result<String, JsonGraphError> {
        let mut out = Vec::new();
        self.serialize_to_writer(value, &mut out)?;
        String::from_utf8(out)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e).into())
    }

    pub fn serialize_to_writer<W: Write>(
        &self,
        value: &Value,
        mut writer: W,
    ) -> Result<(), JsonGraphError> {
        let mut graph_writer = GraphWriter {
            emitter: JsonEmitter {
                out: &mut writer,
                pretty: self.pretty,
                longs_as_strings: self.longs_as_strings,
                date_format: self.date_format.clone(),
                depth: 0,
                counts: Vec::new(),
            },
            options: self,
            referenced: FxHashMap::default(),
            emitted: FxHashSet::default(),
        };
        graph_writer.trace(value)?;
        graph_writer.write_value(value, None)
    }
}

/// Token-level output: separators, indentation and scalar encodings.
///
/// Custom writers receive this to emit their object body or primitive form.
pub struct JsonEmitter<'a> {
    out: &'a mut dyn Write,
    pretty: bool,
    longs_as_strings: bool,
    date_format: Option<String>,
    depth: usize,
    counts: Vec<usize>,
}

impl JsonEmitter<'_> {
    pub(crate) fn begin_object(&mut self) -> Result<(), JsonGraphError> {
        self.out.write_all(b"{")?;
        self.depth += 1;
        self.counts.push(0);
        Ok(())
    }

    pub(crate) fn end_object(&mut self) -> Result<(), JsonGraphError> {
        let entries = self.counts.pop().unwrap_or(0);
        self.depth = self.depth.saturating_sub(1);
        if self.pretty && entries > 0 {
            self.new_line()?;
        }
        self.out.write_all(b"}")?;
        Ok(())
    }

    pub(crate) fn begin_array(&mut self) -> Result<(), JsonGraphError> {
        self.out.write_all(b"[")?;
        self.depth += 1;
        self.counts.push(0);
        Ok(())
    }

    pub(crate) fn end_array(&mut self) -> Result<(), JsonGraphError> {
        let entries = self.counts.pop().unwrap_or(0);
        self.depth = self.depth.saturating_sub(1);
        if self.pretty && entries > 0 {
            self.new_line()?;
        }
        self.out.write_all(b"]")?;
        Ok(())
    }

    /// Starts an object entry: separator, quoted key, colon.
    pub fn key(&mut self, name: &str) -> Result<(), JsonGraphError> {
        self.separator()?;
        self.write_string(name)?;
        self.out.write_all(b":")?;
        Ok(())
    }

    /// Starts an array item: separator only.
    pub fn item(&mut self) -> Result<(), JsonGraphError> {
        self.separator()
    }

    fn separator(&mut self) -> Result<(), JsonGraphError> {
        if let Some(count) = self.counts.last_mut() {
            if *count > 0 {
                self.out.write_all(b",")?;
            }
            *count += 1;
        }
        if self.pretty {
            self.new_line()?;
        }
        Ok(())
    }

    fn new_line(&mut self) -> Result<(), JsonGraphError> {
        self.out.write_all(b"\n")?;
        for _ in 0..self.depth {
            self.out.write_all(b"  ")?;
        }
        Ok(())
    }

    pub fn write_null(&mut self) -> Result<(), JsonGraphError> {
        self.out.write_all(b"null")?;
        Ok(())
    }

    pub fn write_bool(&mut self, value: bool) -> Result<(), JsonGraphError> {
        self.out
            .write_all(if value { b"true" } else { b"false" })?;
        Ok(())
    }

    /// A 64-bit integer, quoted when the serializer writes longs as strings.
    pub fn write_long(&mut self, value: i64) -> Result<(), JsonGraphError> {
        if self.longs_as_strings {
            write!(self.out, "\"{value}\"")?;
        } else {
            write!(self.out, "{value}")?;
        }
        Ok(())
    }

    /// A narrow integer, never quoted.
    pub fn write_int(&mut self, value: i64) -> Result<(), JsonGraphError> {
        write!(self.out, "{value}")?;
        Ok(())
    }

    pub fn write_double(&mut self, value: f64) -> Result<(), JsonGraphError> {
        if !value.is_finite() {
            // JSON has no NaN or infinities.
            return self.write_null();
        }
        let text = format!("{value}");
        self.out.write_all(text.as_bytes())?;
        if !text.contains(['.', 'e', 'E']) {
            self.out.write_all(b".0")?;
        }
        Ok(())
    }

    pub fn write_float(&mut self, value: f32) -> Result<(), JsonGraphError> {
        if !value.is_finite() {
            return self.write_null();
        }
        let text = format!("{value}");
        self.out.write_all(text.as_bytes())?;
        if !text.contains(['.', 'e', 'E']) {
            self.out.write_all(b".0")?;
        }
        Ok(())
    }

    /// A JSON string: `\b \f \n \r \t \\ \"` escapes, other ASCII control
    /// characters as `\u00XX`, everything else raw UTF-8.
    pub fn write_string(&mut self, value: &str) -> Result<(), JsonGraphError> {
        self.out.write_all(b"\"")?;
        let mut utf8 = [0u8; 4];
        for c in value.chars() {
            match c {
                '"' => self.out.write_all(b"\\\"")?,
                '\\' => self.out.write_all(b"\\\\")?,
                '\u{8}' => self.out.write_all(b"\\b")?,
                '\u{c}' => self.out.write_all(b"\\f")?,
                '\n' => self.out.write_all(b"\\n")?,
                '\r' => self.out.write_all(b"\\r")?,
                '\t' => self.out.write_all(b"\\t")?,
                c if u32::from(c) < 0x20 => write!(self.out, "\\u{:04x}", u32::from(c))?,
                c => self.out.write_all(c.encode_utf8(&mut utf8).as_bytes())?,
            }
        }
        self.out.write_all(b"\"")?;
        Ok(())
    }

    /// The serializer's date-format pattern, for date-like codecs.
    pub fn date_format(&self) -> Option<String> {
        self.date_format.clone()
    }
}

struct GraphWriter<'a, 'w> {
    emitter: JsonEmitter<'w>,
    options: &'a GraphSerializer,
    /// identity → assigned id, for objects reached more than once.
    referenced: FxHashMap<usize, i64>,
    /// identities already written in the emit pass.
    emitted: FxHashSet<usize>,
}

impl GraphWriter<'_, '_> {
    /// The reach-ability trace: logical primitives are never marked, the
    /// second encounter of anything else allocates it an id.
    fn trace(&mut self, root: &Value) -> Result<(), JsonGraphError> {
        let mut visited = FxHashSet::default();
        let mut next_id = 1i64;
        let mut stack = vec![root.clone()];
        while let Some(value) = stack.pop() {
            let Some(identity) = value.identity() else {
                continue;
            };
            if !visited.insert(identity) {
                if !self.referenced.contains_key(&identity) {
                    self.referenced.insert(identity, next_id);
                    next_id += 1;
                }
                continue;
            }
            match &value {
                Value::Array(array) => {
                    stack.extend(array.borrow().items.iter().cloned());
                }
                Value::Collection(collection) => {
                    stack.extend(collection.borrow().items().iter().cloned());
                }
                Value::Map(map) => {
                    for (k, v) in map.borrow().entries() {
                        stack.push(k.clone());
                        stack.push(v.clone());
                    }
                }
                Value::Object(object) => {
                    for (_, field_value, _) in self.emitted_fields(&object.borrow())? {
                        stack.push(field_value);
                    }
                }
                Value::Node(node) => {
                    for (_, entry) in node.borrow().entries() {
                        trace_jvalue(entry, &mut stack);
                    }
                }
                _ => {}
            }
        }
        log::debug!("traced {} referenced objects", self.referenced.len());
        Ok(())
    }

    fn write_value(
        &mut self,
        value: &Value,
        declared: Option<&TypeRef>,
    ) -> Result<(), JsonGraphError> {
        // Identity emission: anything already written collapses to a @ref.
        if let Some(identity) = value.identity() {
            if !self.emitted.insert(identity) {
                let id = self.referenced.get(&identity).copied().unwrap_or(0);
                self.emitter.begin_object()?;
                self.emitter.key(self.meta(vocab::REF))?;
                self.emitter.write_int(id)?;
                return self.emitter.end_object();
            }
        }
        let show_type = self.type_visible(value, declared);
        match value {
            Value::Null => self.emitter.write_null(),
            Value::Bool(v) => self.emitter.write_bool(*v),
            Value::Long(v) => self.emitter.write_long(*v),
            Value::Double(v) => self.emitter.write_double(*v),
            Value::Str(s) => self.emitter.write_string(s),
            Value::Byte(v) => self.write_narrow_scalar(i64::from(*v), type_names::BYTE, show_type),
            Value::Short(v) => {
                self.write_narrow_scalar(i64::from(*v), type_names::SHORT, show_type)
            }
            Value::Int(v) => self.write_narrow_scalar(i64::from(*v), type_names::INT, show_type),
            Value::Float(v) => {
                if show_type {
                    self.emitter.begin_object()?;
                    self.write_type_entry(type_names::FLOAT)?;
                    self.emitter.key("value")?;
                    self.emitter.write_float(*v)?;
                    self.emitter.end_object()
                } else {
                    self.emitter.write_float(*v)
                }
            }
            Value::Char(v) => {
                if show_type {
                    self.emitter.begin_object()?;
                    self.write_type_entry(type_names::CHAR)?;
                    self.emitter.key("value")?;
                    self.emitter.write_string(&v.to_string())?;
                    self.emitter.end_object()
                } else {
                    self.emitter.write_string(&v.to_string())
                }
            }
            Value::Date(_) | Value::BigInt(_) | Value::BigDec(_) | Value::Class(_) => {
                self.write_codec_scalar(value, show_type)
            }
            Value::Array(array) => self.write_array(array, show_type),
            Value::Collection(collection) => {
                self.write_collection(collection, declared, show_type)
            }
            Value::Map(map) => self.write_map(map, declared, show_type),
            Value::Object(object) => self.write_object(value, object, show_type),
            Value::Node(node) => self.write_node(node),
        }
    }

    /// Whether the runtime type must be spelled out because the declaring
    /// context cannot infer it.
    fn type_visible(&self, value: &Value, declared: Option<&TypeRef>) -> bool {
        let declared = match declared {
            Some(TypeRef::Any) | None => None,
            Some(other) => Some(other),
        };
        match value {
            // These read back from bare JSON as themselves.
            Value::Null | Value::Bool(_) | Value::Long(_) | Value::Double(_) | Value::Str(_) => {
                false
            }
            Value::Node(_) => false,
            Value::Byte(_) => !matches!(
                declared,
                Some(TypeRef::Primitive(Primitive::Byte) | TypeRef::Boxed(Primitive::Byte))
            ) || self.options.forced_types,
            Value::Short(_) => !matches!(
                declared,
                Some(TypeRef::Primitive(Primitive::Short) | TypeRef::Boxed(Primitive::Short))
            ) || self.options.forced_types,
            Value::Int(_) => !matches!(
                declared,
                Some(TypeRef::Primitive(Primitive::Int) | TypeRef::Boxed(Primitive::Int))
            ) || self.options.forced_types,
            Value::Float(_) => !matches!(
                declared,
                Some(TypeRef::Primitive(Primitive::Float) | TypeRef::Boxed(Primitive::Float))
            ) || self.options.forced_types,
            Value::Char(_) => !matches!(
                declared,
                Some(TypeRef::Primitive(Primitive::Char) | TypeRef::Boxed(Primitive::Char))
            ) || self.options.forced_types,
            Value::Date(_) => !matches!(declared, Some(TypeRef::Date)) || self.options.forced_types,
            Value::BigInt(_) => {
                !matches!(declared, Some(TypeRef::BigInt)) || self.options.forced_types
            }
            Value::BigDec(_) => {
                !matches!(declared, Some(TypeRef::BigDec)) || self.options.forced_types
            }
            Value::Class(_) => {
                !matches!(declared, Some(TypeRef::Class)) || self.options.forced_types
            }
            Value::Array(array) => {
                if self.options.forced_types {
                    return true;
                }
                let component = array.borrow().component.clone();
                match declared {
                    Some(TypeRef::Array(c)) => **c != component,
                    // Untyped arrays are the natural reading of a JSON array.
                    None => !component.is_any(),
                    _ => true,
                }
            }
            Value::Collection(collection) => {
                if self.options.forced_types {
                    return true;
                }
                let kind = collection.borrow().kind();
                !matches!(
                    (declared, kind),
                    (Some(TypeRef::List(_)), CollectionKind::List)
                        | (Some(TypeRef::Set(_)), CollectionKind::Set)
                        | (Some(TypeRef::SortedSet(_)), CollectionKind::SortedSet)
                )
            }
            Value::Map(map) => {
                if self.options.forced_types {
                    return true;
                }
                let kind = map.borrow().kind();
                !matches!(
                    (declared, kind),
                    (Some(TypeRef::Map(_, _)), MapKind::Ordered)
                        | (Some(TypeRef::SortedMap(_, _)), MapKind::Sorted)
                )
            }
            Value::Object(object) => {
                if self.options.forced_types {
                    return true;
                }
                match declared {
                    Some(TypeRef::Named(name)) => {
                        **object.borrow().descriptor().name() != **name
                    }
                    _ => true,
                }
            }
        }
    }

    fn write_narrow_scalar(
        &mut self,
        value: i64,
        type_name: &str,
        show_type: bool,
    ) -> Result<(), JsonGraphError> {
        if show_type {
            self.emitter.begin_object()?;
            self.write_type_entry(type_name)?;
            self.emitter.key("value")?;
            self.emitter.write_int(value)?;
            self.emitter.end_object()
        } else {
            self.emitter.write_int(value)
        }
    }

    fn write_codec_scalar(
        &mut self,
        value: &Value,
        show_type: bool,
    ) -> Result<(), JsonGraphError> {
        let type_name = value.type_name();
        if let Some(codec) = self
            .options
            .codecs
            .writer_for(&type_name, &self.options.registry)
        {
            if codec.has_primitive_form() && !show_type {
                return codec.write_primitive_form(value, &mut self.emitter);
            }
            self.emitter.begin_object()?;
            if show_type {
                self.write_type_entry(&type_name)?;
            }
            codec.write(value, show_type, &mut self.emitter)?;
            return self.emitter.end_object();
        }
        // The codec was disabled; fall back to the raw scalar body.
        match value {
            Value::Date(moment) => self.emitter.write_long(moment.timestamp_millis()),
            Value::BigInt(v) => self.emitter.write_string(&v.to_string()),
            Value::BigDec(v) => self.emitter.write_string(&v.to_string()),
            Value::Class(name) => self.emitter.write_string(name),
            _ => self.emitter.write_null(),
        }
    }

    fn write_array(&mut self, array: &ArrayRef, show_type: bool) -> Result<(), JsonGraphError> {
        let id = self.assigned_id(&Value::Array(Rc::clone(array)));
        let borrowed = array.borrow();
        if !show_type && id.is_none() {
            self.emitter.begin_array()?;
            for (index, item) in borrowed.items.iter().enumerate() {
                self.emitter.item()?;
                self.write_value(item, Some(&borrowed.component))
                    .map_err(|e| wrap_io(e, &format!("array index {index}")))?;
            }
            return self.emitter.end_array();
        }
        self.emitter.begin_object()?;
        if let Some(id) = id {
            self.emitter.key(self.meta(vocab::ID))?;
            self.emitter.write_int(id)?;
        }
        if show_type {
            self.write_type_entry(&format!("{}[]", borrowed.component))?;
        }
        self.emitter.key(self.meta(vocab::ITEMS))?;
        self.emitter.begin_array()?;
        for (index, item) in borrowed.items.iter().enumerate() {
            self.emitter.item()?;
            self.write_value(item, Some(&borrowed.component))
                .map_err(|e| wrap_io(e, &format!("array index {index}")))?;
        }
        self.emitter.end_array()?;
        self.emitter.end_object()
    }

    fn write_collection(
        &mut self,
        collection: &CollectionRef,
        declared: Option<&TypeRef>,
        show_type: bool,
    ) -> Result<(), JsonGraphError> {
        let id = self.assigned_id(&Value::Collection(Rc::clone(collection)));
        let borrowed = collection.borrow();
        let component = match declared {
            Some(d @ (TypeRef::List(_) | TypeRef::Set(_) | TypeRef::SortedSet(_))) => {
                d.component().clone()
            }
            _ => TypeRef::Any,
        };
        if !show_type && id.is_none() {
            self.emitter.begin_array()?;
            for item in borrowed.items() {
                self.emitter.item()?;
                self.write_value(item, Some(&component))?;
            }
            return self.emitter.end_array();
        }
        self.emitter.begin_object()?;
        if let Some(id) = id {
            self.emitter.key(self.meta(vocab::ID))?;
            self.emitter.write_int(id)?;
        }
        if show_type {
            let name = match borrowed.kind() {
                CollectionKind::List => type_names::LIST,
                CollectionKind::Set => type_names::SET,
                CollectionKind::SortedSet => type_names::SORTED_SET,
            };
            self.write_type_entry(name)?;
        }
        self.emitter.key(self.meta(vocab::ITEMS))?;
        self.emitter.begin_array()?;
        for item in borrowed.items() {
            self.emitter.item()?;
            self.write_value(item, Some(&component))?;
        }
        self.emitter.end_array()?;
        self.emitter.end_object()
    }

    fn write_map(
        &mut self,
        map: &MapRef,
        declared: Option<&TypeRef>,
        show_type: bool,
    ) -> Result<(), JsonGraphError> {
        let id = self.assigned_id(&Value::Map(Rc::clone(map)));
        let borrowed = map.borrow();
        let (key_type, value_type) = match declared {
            Some(d @ (TypeRef::Map(_, _) | TypeRef::SortedMap(_, _))) => {
                (d.key_component().clone(), d.component().clone())
            }
            _ => (TypeRef::Any, TypeRef::Any),
        };
        let type_name = match borrowed.kind() {
            MapKind::Ordered => type_names::MAP,
            MapKind::Sorted => type_names::SORTED_MAP,
        };
        self.emitter.begin_object()?;
        if let Some(id) = id {
            self.emitter.key(self.meta(vocab::ID))?;
            self.emitter.write_int(id)?;
        }
        if show_type {
            self.write_type_entry(type_name)?;
        }
        if borrowed.has_only_string_keys() {
            // Compact form: keys become the JSON object keys.
            for (key, value) in borrowed.entries() {
                let Some(key) = key.as_str() else { continue };
                self.emitter.key(key)?;
                self.write_value(value, Some(&value_type))
                    .map_err(|e| wrap_io(e, &format!("map key '{key}'")))?;
            }
        } else {
            self.emitter.key(self.meta(vocab::KEYS))?;
            self.emitter.begin_array()?;
            for (key, _) in borrowed.entries() {
                self.emitter.item()?;
                self.write_value(key, Some(&key_type))?;
            }
            self.emitter.end_array()?;
            self.emitter.key(self.meta(vocab::ITEMS))?;
            self.emitter.begin_array()?;
            for (_, value) in borrowed.entries() {
                self.emitter.item()?;
                self.write_value(value, Some(&value_type))?;
            }
            self.emitter.end_array()?;
        }
        self.emitter.end_object()
    }

    fn write_object(
        &mut self,
        value: &Value,
        object: &ObjectRef,
        show_type: bool,
    ) -> Result<(), JsonGraphError> {
        let id = self.assigned_id(value);
        let borrowed = object.borrow();
        let class_name = Arc::clone(borrowed.descriptor().name());
        if let Some(codec) = self
            .options
            .codecs
            .writer_for(&class_name, &self.options.registry)
        {
            if codec.has_primitive_form() && !show_type && id.is_none() {
                return codec.write_primitive_form(value, &mut self.emitter);
            }
            self.emitter.begin_object()?;
            if let Some(id) = id {
                self.emitter.key(self.meta(vocab::ID))?;
                self.emitter.write_int(id)?;
            }
            if show_type {
                self.write_type_entry(&class_name)?;
            }
            codec.write(value, show_type, &mut self.emitter)?;
            return self.emitter.end_object();
        }
        let fields = self.emitted_fields(&borrowed)?;
        self.emitter.begin_object()?;
        if let Some(id) = id {
            self.emitter.key(self.meta(vocab::ID))?;
            self.emitter.write_int(id)?;
        }
        if show_type {
            self.write_type_entry(&class_name)?;
        }
        for (key, field_value, declared) in &fields {
            self.emitter.key(key)?;
            self.write_value(field_value, Some(declared))
                .map_err(|e| wrap_io(e, &format!("field '{key}'")))?;
        }
        self.emitter.end_object()
    }

    /// Emission of an intermediate node: parse-time ids and types are kept,
    /// entries re-emit in their stored order.
    fn write_node(&mut self, node: &JNodeRef) -> Result<(), JsonGraphError> {
        let trace_id = self.assigned_id(&Value::Node(Rc::clone(node)));
        let borrowed = node.borrow();
        // An untyped, unreferenced array node is just its items.
        if borrowed.is_array_node()
            && borrowed.len() == 1
            && !borrowed.has_id()
            && trace_id.is_none()
            && borrowed.type_name().is_none()
        {
            let items = borrowed.items().cloned();
            drop(borrowed);
            if let Some(items) = items {
                return self.write_jvalue(&items);
            }
            return self.emitter.write_null();
        }
        self.emitter.begin_object()?;
        if borrowed.has_id() {
            self.emitter.key(self.meta(vocab::ID))?;
            self.emitter.write_int(borrowed.id())?;
        } else if let Some(id) = trace_id {
            self.emitter.key(self.meta(vocab::ID))?;
            self.emitter.write_int(id)?;
        }
        if let Some(type_name) = borrowed.type_name() {
            self.write_type_entry(type_name)?;
        }
        let entries: Vec<(Rc<str>, JValue)> = borrowed
            .entries()
            .map(|(k, v)| (Rc::clone(k), v.clone()))
            .collect();
        drop(borrowed);
        for (key, entry) in entries {
            self.emitter.key(self.meta(&key))?;
            self.write_jvalue(&entry)?;
        }
        self.emitter.end_object()
    }

    fn write_jvalue(&mut self, value: &JValue) -> Result<(), JsonGraphError> {
        match value {
            JValue::Null => self.emitter.write_null(),
            JValue::Bool(v) => self.emitter.write_bool(*v),
            JValue::Long(v) => self.emitter.write_long(*v),
            JValue::Double(v) => self.emitter.write_double(*v),
            JValue::Str(s) => self.emitter.write_string(s),
            JValue::Array(items) => {
                self.emitter.begin_array()?;
                for item in items.borrow().iter() {
                    self.emitter.item()?;
                    self.write_jvalue(item)?;
                }
                self.emitter.end_array()
            }
            JValue::Node(node) => self.write_value(&Value::Node(Rc::clone(node)), None),
            JValue::Resolved(resolved) => self.write_value(resolved, None),
        }
    }

    /// The fields emitted for an object, in order, with their declared types:
    /// reflection order from the deep declared-field map, or the caller's
    /// field specifier for this class.
    fn emitted_fields(
        &self,
        object: &ObjectValue,
    ) -> Result<Vec<(Arc<str>, Value, TypeRef)>, JsonGraphError> {
        let descriptor = object.descriptor();
        let class_name = descriptor.name();
        let deep = self.options.registry.deep_fields(class_name).ok();

        if let Some(specified) = self.options.field_specifiers.get(&**class_name) {
            let mut out = Vec::with_capacity(specified.len());
            for field_name in specified {
                let declared = deep
                    .as_ref()
                    .and_then(|d| d.get(field_name.as_str()))
                    .map(|f| f.declared().clone());
                let declared = match declared {
                    Some(declared) => declared,
                    None if object.get(field_name).is_some() => TypeRef::Any,
                    None => {
                        return Err(JsonGraphError::Configuration(format!(
                            "Field specifier names unknown field '{field_name}' on class '{class_name}'"
                        )));
                    }
                };
                out.push((
                    Arc::from(field_name.as_str()),
                    object.get(field_name).cloned().unwrap_or(Value::Null),
                    declared,
                ));
            }
            return Ok(out);
        }

        let mut out = Vec::new();
        if descriptor.is_enum() {
            out.push((
                Arc::from("name"),
                object.get("name").cloned().unwrap_or(Value::Null),
                TypeRef::String,
            ));
        }
        if let Some(deep) = deep {
            for (key, field) in deep.iter() {
                if field.is_transient() {
                    continue;
                }
                if descriptor.is_enum() {
                    if **key == *"name" {
                        continue;
                    }
                    if self.options.enum_public_only && !field.is_public() {
                        continue;
                    }
                }
                out.push((
                    Arc::clone(key),
                    object.get(key).cloned().unwrap_or(Value::Null),
                    field.declared().clone(),
                ));
            }
        } else {
            // The class is not registered here; emit the stored fields as-is.
            for (key, field_value) in object.fields() {
                if descriptor.is_enum() && **key == *"name" {
                    continue;
                }
                let own = descriptor.fields().iter().find(|f| f.name() == key);
                if own.is_some_and(|f| f.is_transient()) {
                    continue;
                }
                out.push((
                    Arc::clone(key),
                    field_value.clone(),
                    own.map_or(TypeRef::Any, |f| f.declared().clone()),
                ));
            }
        }
        Ok(out)
    }

    fn write_type_entry(&mut self, type_name: &str) -> Result<(), JsonGraphError> {
        let mapped = self
            .options
            .type_name_map
            .get(type_name)
            .map_or(type_name, String::as_str);
        self.emitter.key(self.meta(vocab::TYPE))?;
        self.emitter.write_string(mapped)?;
        Ok(())
    }

    fn meta<'k>(&self, key: &'k str) -> &'k str {
        if !self.options.short_meta_keys {
            return key;
        }
        match key {
            vocab::TYPE => vocab::SHORT_TYPE,
            vocab::ID => vocab::SHORT_ID,
            vocab::REF => vocab::SHORT_REF,
            vocab::ITEMS => vocab::SHORT_ITEMS,
            vocab::KEYS => vocab::SHORT_KEYS,
            other => other,
        }
    }

    fn assigned_id(&self, value: &Value) -> Option<i64> {
        self.referenced.get(&value.identity()?).copied()
    }
}

fn trace_jvalue(value: &JValue, stack: &mut Vec<Value>) {
    match value {
        JValue::Node(node) => stack.push(Value::Node(Rc::clone(node))),
        JValue::Resolved(resolved) => stack.push(resolved.clone()),
        JValue::Array(items) => {
            for item in items.borrow().iter() {
                trace_jvalue(item, stack);
            }
        }
        _ => {}
    }
}

/// Writer failures carry the owning field or index.
fn wrap_io(error: JsonGraphError, context: &str) -> JsonGraphError {
    match error {
        JsonGraphError::Io(io_error) => JsonGraphError::Io(io::Error::new(
            io_error.kind(),
            format!("writing {context}: {io_error}"),
        )),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeDescriptor;

    fn serialize(value: &Value) -> String {
        GraphSerializer::new().serialize_to_string(value).unwrap()
    }

    #[test]
    fn bare_top_level_array() {
        let array = Value::array(TypeRef::Any, vec![Value::string("Hello, World")]);
        assert_eq!(serialize(&array), "[\"Hello, World\"]");
    }

    #[test]
    fn scalars() {
        assert_eq!(serialize(&Value::Long(25)), "25");
        assert_eq!(serialize(&Value::Double(25.0)), "25.0");
        assert_eq!(serialize(&Value::Bool(true)), "true");
        assert_eq!(serialize(&Value::string("foo")), "\"foo\"");
        assert_eq!(serialize(&Value::Null), "null");
    }

    #[test]
    fn narrow_integers_carry_their_type_in_untyped_context() {
        assert_eq!(
            serialize(&Value::Int(5)),
            "{\"@type\":\"int\",\"value\":5}"
        );
        assert_eq!(serialize(&Value::Byte(-3)), "{\"@type\":\"byte\",\"value\":-3}");
    }

    #[test]
    fn shared_objects_get_ids_and_refs() {
        let shared = Value::list([Value::Long(1)]);
        let array = Value::array(TypeRef::Any, vec![shared.clone(), shared]);
        let json = serialize(&array);
        assert!(json.contains("\"@id\":1"), "{json}");
        assert!(json.contains("\"@ref\":1"), "{json}");
    }

    #[test]
    fn cycles_do_not_overflow() {
        let registry = Arc::new(TypeRegistry::new());
        registry.register(
            TypeDescriptor::class("demo.Node")
                .with_field("next", TypeRef::named("demo.Node"))
                .with_default_constructor(),
        );
        let descriptor = registry.get("demo.Node").unwrap();
        let node = registry.instantiate(&descriptor, false).unwrap();
        node.as_object()
            .unwrap()
            .borrow_mut()
            .set("next", node.clone());
        let json = GraphSerializer::new()
            .with_type_registry(registry)
            .serialize_to_string(&node)
            .unwrap();
        assert!(json.contains("\"@id\":1"), "{json}");
        assert!(json.contains("\"@ref\":1"), "{json}");
    }

    #[test]
    fn short_meta_keys() {
        let shared = Value::list([]);
        let array = Value::array(TypeRef::Any, vec![shared.clone(), shared]);
        let json = GraphSerializer::new()
            .with_short_meta_keys()
            .serialize_to_string(&array)
            .unwrap();
        assert!(json.contains("\"@i\":1"), "{json}");
        assert!(json.contains("\"@r\":1"), "{json}");
        assert!(json.contains("\"@t\":\"list\""), "{json}");
        assert!(json.contains("\"@e\":[]"), "{json}");
    }

    #[test]
    fn longs_as_strings() {
        let json = GraphSerializer::new()
            .with_longs_as_strings()
            .serialize_to_string(&Value::Long(9_007_199_254_740_993))
            .unwrap();
        assert_eq!(json, "\"9007199254740993\"");
    }

    #[test]
    fn string_escaping() {
        assert_eq!(
            serialize(&Value::string("a\"b\\c\nd\u{1}")),
            "\"a\\\"b\\\\c\\nd\\u0001\""
        );
    }

    #[test]
    fn non_string_keyed_map_uses_keys_and_items() {
        let map = Value::map([(Value::Long(1), Value::string("one"))]);
        let json = serialize(&map);
        assert!(json.contains("\"@keys\":[1]"), "{json}");
        assert!(json.contains("\"@items\":[\"one\"]"), "{json}");
    }

    #[test]
    fn string_keyed_map_uses_compact_form() {
        let map = Value::map([(Value::string("a"), Value::Long(1))]);
        let json = serialize(&map);
        assert!(json.contains("\"a\":1"), "{json}");
        assert!(!json.contains("@keys"), "{json}");
    }

    #[test]
    fn pretty_print_layout() {
        let map = Value::map([(Value::string("a"), Value::Long(1))]);
        let json = GraphSerializer::new()
            .with_pretty_print()
            .serialize_to_string(&map)
            .unwrap();
        assert_eq!(json, "{\n  \"@type\":\"map\",\n  \"a\":1\n}");
    }

    #[test]
    fn field_specifier_replaces_reflection() {
        let registry = Arc::new(TypeRegistry::new());
        registry.register(
            TypeDescriptor::class("demo.Person")
                .with_field("first", TypeRef::String)
                .with_field("last", TypeRef::String)
                .with_default_constructor(),
        );
        let descriptor = registry.get("demo.Person").unwrap();
        let person = registry.instantiate(&descriptor, false).unwrap();
        person
            .as_object()
            .unwrap()
            .borrow_mut()
            .set("first", Value::string("Ada"));
        let json = GraphSerializer::new()
            .with_type_registry(Arc::clone(&registry))
            .with_field_specifier("demo.Person", ["first"])
            .serialize_to_string(&person)
            .unwrap();
        assert!(json.contains("first"), "{json}");
        assert!(!json.contains("last"), "{json}");

        let error = GraphSerializer::new()
            .with_type_registry(registry)
            .with_field_specifier("demo.Person", ["missing"])
            .serialize_to_string(&person)
            .unwrap_err();
        assert!(matches!(error, JsonGraphError::Configuration(_)));
    }

    #[test]
    fn transient_fields_are_skipped() {
        let registry = Arc::new(TypeRegistry::new());
        registry.register(
            TypeDescriptor::class("demo.Cache")
                .with_field("kept", TypeRef::String)
                .with_field_descriptor(
                    crate::types::FieldDescriptor::new("scratch", TypeRef::Any).transient(),
                )
                .with_default_constructor(),
        );
        let descriptor = registry.get("demo.Cache").unwrap();
        let value = registry.instantiate(&descriptor, false).unwrap();
        let json = GraphSerializer::new()
            .with_type_registry(registry)
            .serialize_to_string(&value)
            .unwrap();
        assert!(json.contains("kept"), "{json}");
        assert!(!json.contains("scratch"), "{json}");
    }

    #[test]
    fn forward_type_name_map_shortens_types() {
        let mut map = HashMap::new();
        map.insert("list".to_owned(), "L".to_owned());
        let list = Value::list([]);
        let json = GraphSerializer::new()
            .with_type_name_map(map)
            .serialize_to_string(&list)
            .unwrap();
        assert!(json.contains("\"@type\":\"L\""), "{json}");
    }
}
