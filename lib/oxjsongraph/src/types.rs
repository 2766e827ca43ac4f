//! Declared-type references and host-registered type descriptors.
//!
//! Rust has no runtime reflection, so everything the resolver and the writer
//! know about host classes comes from [`TypeDescriptor`]s registered in a
//! [`TypeRegistry`](crate::TypeRegistry): declared fields, inheritance,
//! constructors and enum variants.

use crate::value::Value;
use crate::vocab::type_names;
use std::fmt;
use std::sync::Arc;

/// The eight primitive kinds. A primitive-typed field can never hold null,
/// its boxed counterpart can.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash)]
pub enum Primitive {
    Boolean,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    Char,
}

impl Primitive {
    /// The short type name used in `@type` values.
    pub fn name(self) -> &'static str {
        match self {
            Self::Boolean => type_names::BOOLEAN,
            Self::Byte => type_names::BYTE,
            Self::Short => type_names::SHORT,
            Self::Int => type_names::INT,
            Self::Long => type_names::LONG,
            Self::Float => type_names::FLOAT,
            Self::Double => type_names::DOUBLE,
            Self::Char => type_names::CHAR,
        }
    }

    /// The zero value a primitive field starts from.
    pub fn zero(self) -> Value {
        match self {
            Self::Boolean => Value::Bool(false),
            Self::Byte => Value::Byte(0),
            Self::Short => Value::Short(0),
            Self::Int => Value::Int(0),
            Self::Long => Value::Long(0),
            Self::Float => Value::Float(0.),
            Self::Double => Value::Double(0.),
            Self::Char => Value::Char('\0'),
        }
    }

    pub(crate) fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            type_names::BOOLEAN => Self::Boolean,
            type_names::BYTE => Self::Byte,
            type_names::SHORT => Self::Short,
            type_names::INT => Self::Int,
            type_names::LONG => Self::Long,
            type_names::FLOAT => Self::Float,
            type_names::DOUBLE => Self::Double,
            type_names::CHAR => Self::Char,
            _ => return None,
        })
    }
}

/// A declared type: the type of a field, an array component or a map side.
///
/// [`TypeRef::parse`] maps dialect type-name strings onto this enum; scalar
/// names parse to the boxed kind (a standalone `@type` describes a value, not
/// a slot). Field declarations choose between [`TypeRef::Primitive`] and
/// [`TypeRef::Boxed`] explicitly.
#[derive(Eq, PartialEq, Debug, Clone, Hash)]
pub enum TypeRef {
    /// Free-form: any value fits, concrete types are self-describing.
    Any,
    /// Non-nullable primitive slot.
    Primitive(Primitive),
    /// Nullable wrapper around a primitive kind.
    Boxed(Primitive),
    String,
    BigInt,
    BigDec,
    Date,
    /// A class-reference value (the class itself, not an instance).
    Class,
    Array(Box<TypeRef>),
    /// Ordered list, the factory default for abstract collection types.
    List(Box<TypeRef>),
    /// Insertion-ordered set.
    Set(Box<TypeRef>),
    /// Set kept sorted by the total order over values.
    SortedSet(Box<TypeRef>),
    /// Insertion-ordered map.
    Map(Box<TypeRef>, Box<TypeRef>),
    /// Map kept sorted by key.
    SortedMap(Box<TypeRef>, Box<TypeRef>),
    /// A host type registered under this name.
    Named(Arc<str>),
}

impl TypeRef {
    /// Parses a dialect type name, e.g. `"int"`, `"string[]"`, `"sorted-map"`
    /// or a registered class name. Never fails: unknown names are [`Named`].
    ///
    /// [`Named`]: TypeRef::Named
    pub fn parse(name: &str) -> Self {
        if let Some(component) = name.strip_suffix("[]") {
            return Self::Array(Box::new(Self::parse(component)));
        }
        if let Some(p) = Primitive::from_name(name) {
            return Self::Boxed(p);
        }
        match name {
            type_names::OBJECT => Self::Any,
            type_names::STRING => Self::String,
            type_names::BIG_INT => Self::BigInt,
            type_names::BIG_DEC => Self::BigDec,
            type_names::DATE => Self::Date,
            type_names::CLASS => Self::Class,
            type_names::LIST => Self::List(Box::new(Self::Any)),
            type_names::SET => Self::Set(Box::new(Self::Any)),
            type_names::SORTED_SET => Self::SortedSet(Box::new(Self::Any)),
            type_names::MAP => Self::Map(Box::new(Self::Any), Box::new(Self::Any)),
            type_names::SORTED_MAP => Self::SortedMap(Box::new(Self::Any), Box::new(Self::Any)),
            _ => Self::Named(Arc::from(name)),
        }
    }

    #[inline]
    pub fn named(name: impl Into<Arc<str>>) -> Self {
        Self::Named(name.into())
    }

    #[inline]
    pub fn array(component: TypeRef) -> Self {
        Self::Array(Box::new(component))
    }

    #[inline]
    pub fn list(component: TypeRef) -> Self {
        Self::List(Box::new(component))
    }

    #[inline]
    pub fn set(component: TypeRef) -> Self {
        Self::Set(Box::new(component))
    }

    #[inline]
    pub fn map(key: TypeRef, value: TypeRef) -> Self {
        Self::Map(Box::new(key), Box::new(value))
    }

    /// The value an unset slot of this type holds: primitive zero or null.
    pub fn unset_value(&self) -> Value {
        match self {
            Self::Primitive(p) => p.zero(),
            _ => Value::Null,
        }
    }

    /// The component type of arrays and collections, the value type of maps.
    pub(crate) fn component(&self) -> &TypeRef {
        match self {
            Self::Array(c) | Self::List(c) | Self::Set(c) | Self::SortedSet(c) => c,
            Self::Map(_, v) | Self::SortedMap(_, v) => v,
            _ => &Self::Any,
        }
    }

    pub(crate) fn key_component(&self) -> &TypeRef {
        match self {
            Self::Map(k, _) | Self::SortedMap(k, _) => k,
            _ => &Self::Any,
        }
    }

    #[inline]
    pub(crate) fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }

    /// Whether this declared type is a scalar wrapper in the sense of the
    /// `@type`-plus-empty-`@items` ambiguity: such a combination is an error.
    pub(crate) fn is_scalar(&self) -> bool {
        matches!(
            self,
            Self::Primitive(_)
                | Self::Boxed(_)
                | Self::String
                | Self::BigInt
                | Self::BigDec
                | Self::Date
                | Self::Class
        )
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str(type_names::OBJECT),
            Self::Primitive(p) | Self::Boxed(p) => f.write_str(p.name()),
            Self::String => f.write_str(type_names::STRING),
            Self::BigInt => f.write_str(type_names::BIG_INT),
            Self::BigDec => f.write_str(type_names::BIG_DEC),
            Self::Date => f.write_str(type_names::DATE),
            Self::Class => f.write_str(type_names::CLASS),
            Self::Array(c) => write!(f, "{c}[]"),
            Self::List(_) => f.write_str(type_names::LIST),
            Self::Set(_) => f.write_str(type_names::SET),
            Self::SortedSet(_) => f.write_str(type_names::SORTED_SET),
            Self::Map(_, _) => f.write_str(type_names::MAP),
            Self::SortedMap(_, _) => f.write_str(type_names::SORTED_MAP),
            Self::Named(name) => f.write_str(name),
        }
    }
}

/// Whether a registered type is a plain class or an enumeration.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum TypeKind {
    Class,
    Enum,
}

/// One declared field of a registered type.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    name: Arc<str>,
    declared: TypeRef,
    transient: bool,
    public: bool,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<Arc<str>>, declared: TypeRef) -> Self {
        Self {
            name: name.into(),
            declared,
            transient: false,
            public: true,
        }
    }

    /// Transient fields are never serialized.
    #[must_use]
    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }

    /// Non-public fields are skipped on enums when the serializer is
    /// configured with public-only enum emission.
    #[must_use]
    pub fn non_public(mut self) -> Self {
        self.public = false;
        self
    }

    #[inline]
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    #[inline]
    pub fn declared(&self) -> &TypeRef {
        &self.declared
    }

    #[inline]
    pub fn is_transient(&self) -> bool {
        self.transient
    }

    #[inline]
    pub fn is_public(&self) -> bool {
        self.public
    }
}

type ConstructorFn = Arc<dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync>;

/// A declared constructor: parameter types plus the code building the value.
///
/// The resolver calls constructors with synthesized arguments (nulls and
/// zeroes first, then sensible defaults), so `build` must tolerate any
/// type-correct argument list or return an error string.
#[derive(Clone)]
pub struct Constructor {
    params: Vec<TypeRef>,
    build: ConstructorFn,
}

impl Constructor {
    pub fn new(
        params: impl Into<Vec<TypeRef>>,
        build: impl Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            params: params.into(),
            build: Arc::new(build),
        }
    }

    #[inline]
    pub fn params(&self) -> &[TypeRef] {
        &self.params
    }

    #[inline]
    pub fn invoke(&self, args: &[Value]) -> Result<Value, String> {
        (self.build)(args)
    }
}

impl fmt::Debug for Constructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Constructor")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Everything the core knows about one host type.
///
/// ```
/// use oxjsongraph::{FieldDescriptor, TypeDescriptor, TypeRef};
///
/// let employee = TypeDescriptor::class("demo.Employee")
///     .with_parent("demo.Person")
///     .with_field("name", TypeRef::String)
///     .with_field("manager", TypeRef::named("demo.Employee"))
///     .with_field_descriptor(FieldDescriptor::new("cache", TypeRef::Any).transient())
///     .with_default_constructor();
/// assert_eq!(employee.name(), "demo.Employee");
/// assert_eq!(employee.fields().len(), 3);
/// ```
#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    name: Arc<str>,
    kind: TypeKind,
    parent: Option<Arc<str>>,
    interfaces: Vec<Arc<str>>,
    fields: Vec<FieldDescriptor>,
    constructors: Vec<Constructor>,
    default_constructible: bool,
    variants: Vec<Arc<str>>,
}

impl TypeDescriptor {
    pub fn class(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            kind: TypeKind::Class,
            parent: None,
            interfaces: Vec::new(),
            fields: Vec::new(),
            constructors: Vec::new(),
            default_constructible: false,
            variants: Vec::new(),
        }
    }

    /// An enumeration with the given variant names. Enum values carry an
    /// implicit `name` field holding the variant.
    pub fn enumeration<N: Into<Arc<str>>>(
        name: impl Into<Arc<str>>,
        variants: impl IntoIterator<Item = N>,
    ) -> Self {
        let mut descriptor = Self::class(name);
        descriptor.kind = TypeKind::Enum;
        descriptor.variants = variants.into_iter().map(Into::into).collect();
        descriptor
    }

    #[must_use]
    pub fn with_parent(mut self, parent: impl Into<Arc<str>>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    #[must_use]
    pub fn with_interface(mut self, interface: impl Into<Arc<str>>) -> Self {
        self.interfaces.push(interface.into());
        self
    }

    #[must_use]
    pub fn with_field(self, name: impl Into<Arc<str>>, declared: TypeRef) -> Self {
        self.with_field_descriptor(FieldDescriptor::new(name, declared))
    }

    #[must_use]
    pub fn with_field_descriptor(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    /// Declares an accessible no-arg constructor producing a zero-initialized
    /// instance. What most host types want.
    #[must_use]
    pub fn with_default_constructor(mut self) -> Self {
        self.default_constructible = true;
        self
    }

    #[must_use]
    pub fn with_constructor(mut self, constructor: Constructor) -> Self {
        self.constructors.push(constructor);
        self
    }

    #[inline]
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    #[inline]
    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    #[inline]
    pub fn is_enum(&self) -> bool {
        self.kind == TypeKind::Enum
    }

    #[inline]
    pub fn parent(&self) -> Option<&Arc<str>> {
        self.parent.as_ref()
    }

    #[inline]
    pub fn interfaces(&self) -> &[Arc<str>] {
        &self.interfaces
    }

    #[inline]
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    #[inline]
    pub fn constructors(&self) -> &[Constructor] {
        &self.constructors
    }

    #[inline]
    pub fn is_default_constructible(&self) -> bool {
        self.default_constructible
    }

    #[inline]
    pub fn variants(&self) -> &[Arc<str>] {
        &self.variants
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_scalar_names() {
        assert_eq!(TypeRef::parse("int"), TypeRef::Boxed(Primitive::Int));
        assert_eq!(TypeRef::parse("string"), TypeRef::String);
        assert_eq!(TypeRef::parse("date"), TypeRef::Date);
        assert_eq!(TypeRef::parse("object"), TypeRef::Any);
    }

    #[test]
    fn parse_array_suffix() {
        assert_eq!(
            TypeRef::parse("int[]"),
            TypeRef::Array(Box::new(TypeRef::Boxed(Primitive::Int)))
        );
        assert_eq!(
            TypeRef::parse("object[][]"),
            TypeRef::Array(Box::new(TypeRef::Array(Box::new(TypeRef::Any))))
        );
    }

    #[test]
    fn parse_unknown_name_is_named() {
        assert_eq!(
            TypeRef::parse("demo.Employee"),
            TypeRef::Named(Arc::from("demo.Employee"))
        );
    }

    #[test]
    fn display_round_trips_names() {
        for name in ["int", "string[]", "sorted-map", "list", "demo.Person"] {
            assert_eq!(TypeRef::parse(name).to_string(), name);
        }
    }

    #[test]
    fn primitive_zero_values() {
        assert_eq!(Primitive::Boolean.zero(), Value::Bool(false));
        assert_eq!(Primitive::Int.zero(), Value::Int(0));
        assert_eq!(Primitive::Char.zero(), Value::Char('\0'));
    }
}
