//! The registry of host type descriptors, with the two lazily-populated
//! per-class caches (deep declared fields, winning constructor recipe) and
//! the inheritance-distance metric used by codec lookup.
//!
//! Cache lookups may race; racing computations produce identical results, so
//! duplicated work is possible but corruption is not.

use crate::error::JsonGraphError;
use crate::types::{FieldDescriptor, TypeDescriptor, TypeRef};
use crate::value::{ObjectValue, Value};
use bigdecimal::BigDecimal;
use chrono::Utc;
use indexmap::IndexMap;
use num_bigint::BigInt;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;
use std::sync::{Arc, PoisonError, RwLock};

/// Deep declared fields of a class: own and inherited, in ancestor-first
/// declaration order. A subclass field shadowing an inherited name is keyed
/// `"Child.field"`; the ancestor keeps the plain name.
pub type FieldMap = IndexMap<Arc<str>, FieldDescriptor>;

/// Which instantiation strategy won for a class, cached after the first
/// successful materialization.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
enum Recipe {
    /// Accessible no-arg constructor: zero-initialized instance.
    DefaultInit,
    /// A declared constructor fed synthesized arguments.
    Constructor { index: usize, style: ArgStyle },
    /// Zero-initialized allocation bypassing constructors entirely.
    Raw,
}

#[derive(Eq, PartialEq, Debug, Clone, Copy)]
enum ArgStyle {
    /// Null for reference parameters, zero for primitives.
    Zeroes,
    /// Non-null sensible defaults: empty containers, current-time dates...
    Defaults,
}

#[derive(Default)]
pub struct TypeRegistry {
    types: RwLock<FxHashMap<Arc<str>, Arc<TypeDescriptor>>>,
    deep_fields: RwLock<FxHashMap<Arc<str>, Arc<FieldMap>>>,
    recipes: RwLock<FxHashMap<Arc<str>, Recipe>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a descriptor under its name, replacing any previous one.
    ///
    /// Registration is a setup-phase operation; the per-class caches are
    /// dropped so later lookups see the new shape.
    pub fn register(&self, descriptor: TypeDescriptor) -> Arc<TypeDescriptor> {
        let descriptor = Arc::new(descriptor);
        self.types
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(Arc::clone(descriptor.name()), Arc::clone(&descriptor));
        self.deep_fields
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.recipes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        descriptor
    }

    pub fn get(&self, name: &str) -> Option<Arc<TypeDescriptor>> {
        self.types
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// The deep declared-field map of a class, computed once and cached.
    pub fn deep_fields(&self, name: &str) -> Result<Arc<FieldMap>, JsonGraphError> {
        if let Some(cached) = self
            .deep_fields
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return Ok(Arc::clone(cached));
        }
        let computed = Arc::new(self.compute_deep_fields(name)?);
        self.deep_fields
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(Arc::from(name), Arc::clone(&computed));
        Ok(computed)
    }

    fn compute_deep_fields(&self, name: &str) -> Result<FieldMap, JsonGraphError> {
        let mut chain = Vec::new();
        let mut current = Some(
            self.get(name)
                .ok_or_else(|| JsonGraphError::unknown_class(name))?,
        );
        while let Some(descriptor) = current {
            current = descriptor.parent().and_then(|p| self.get(p));
            chain.push(descriptor);
        }
        let mut fields = FieldMap::new();
        for descriptor in chain.iter().rev() {
            for field in descriptor.fields() {
                let key = if fields.contains_key(field.name()) {
                    Arc::from(format!("{}.{}", descriptor.name(), field.name()))
                } else {
                    Arc::clone(field.name())
                };
                fields.insert(key, field.clone());
            }
        }
        Ok(fields)
    }

    /// Inheritance distance from `from` to `to`: superclass hops for classes,
    /// minimum over candidates through interfaces. `None` when `to` is not an
    /// ancestor of `from`.
    pub fn distance(&self, from: &str, to: &str) -> Option<u32> {
        if from == to {
            return Some(0);
        }
        let mut queue = VecDeque::new();
        let mut visited = FxHashSet::default();
        queue.push_back((Arc::<str>::from(from), 0u32));
        while let Some((name, hops)) = queue.pop_front() {
            if !visited.insert(Arc::clone(&name)) {
                continue;
            }
            let Some(descriptor) = self.get(&name) else {
                continue;
            };
            for ancestor in descriptor
                .parent()
                .into_iter()
                .chain(descriptor.interfaces())
            {
                if **ancestor == *to {
                    return Some(hops + 1);
                }
                queue.push_back((Arc::clone(ancestor), hops + 1));
            }
        }
        None
    }

    /// The nearest enum ancestor of a descriptor, the descriptor itself
    /// included. Anonymous enum subclasses resolve through this.
    pub(crate) fn enum_ancestor(
        &self,
        descriptor: &Arc<TypeDescriptor>,
    ) -> Option<Arc<TypeDescriptor>> {
        let mut current = Some(Arc::clone(descriptor));
        while let Some(descriptor) = current {
            if descriptor.is_enum() {
                return Some(descriptor);
            }
            current = descriptor.parent().and_then(|p| self.get(p));
        }
        None
    }

    /// A zero-initialized instance: every deep declared field set to its
    /// unset value (primitive zero or null).
    pub(crate) fn zeroed_object(
        &self,
        descriptor: &Arc<TypeDescriptor>,
    ) -> Result<ObjectValue, JsonGraphError> {
        let fields = self.deep_fields(descriptor.name())?;
        let mut object = ObjectValue::new(Arc::clone(descriptor));
        for (key, field) in fields.iter() {
            object.set(Arc::clone(key), field.declared().unset_value());
        }
        Ok(object)
    }

    /// Materializes an instance of a class, trying in order: the no-arg
    /// constructor, every declared constructor with null/zero arguments,
    /// every declared constructor with sensible defaults, and raw
    /// zero-initialized allocation when `allow_raw` is set. The winning
    /// recipe is cached per class.
    pub fn instantiate(
        &self,
        descriptor: &Arc<TypeDescriptor>,
        allow_raw: bool,
    ) -> Result<Value, JsonGraphError> {
        let cached = self
            .recipes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(descriptor.name())
            .copied();
        if let Some(recipe) = cached {
            return self.apply_recipe(descriptor, recipe);
        }
        for recipe in self.candidate_recipes(descriptor, allow_raw) {
            if let Ok(value) = self.apply_recipe(descriptor, recipe) {
                self.recipes
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(Arc::clone(descriptor.name()), recipe);
                return Ok(value);
            }
        }
        Err(JsonGraphError::Type(format!(
            "Unable to instantiate class '{}': no constructor succeeded",
            descriptor.name()
        )))
    }

    fn candidate_recipes(
        &self,
        descriptor: &Arc<TypeDescriptor>,
        allow_raw: bool,
    ) -> Vec<Recipe> {
        let mut candidates = Vec::new();
        if descriptor.is_default_constructible() {
            candidates.push(Recipe::DefaultInit);
        }
        for style in [ArgStyle::Zeroes, ArgStyle::Defaults] {
            for index in 0..descriptor.constructors().len() {
                candidates.push(Recipe::Constructor { index, style });
            }
        }
        if allow_raw {
            candidates.push(Recipe::Raw);
        }
        candidates
    }

    fn apply_recipe(
        &self,
        descriptor: &Arc<TypeDescriptor>,
        recipe: Recipe,
    ) -> Result<Value, JsonGraphError> {
        match recipe {
            Recipe::DefaultInit | Recipe::Raw => {
                Ok(Value::object(self.zeroed_object(descriptor)?))
            }
            Recipe::Constructor { index, style } => {
                let constructor = &descriptor.constructors()[index];
                let args: Vec<Value> = constructor
                    .params()
                    .iter()
                    .map(|p| synthesize_argument(p, style))
                    .collect();
                constructor.invoke(&args).map_err(|reason| {
                    JsonGraphError::Type(format!(
                        "Constructor of class '{}' failed: {reason}",
                        descriptor.name()
                    ))
                })
            }
        }
    }
}

fn synthesize_argument(param: &TypeRef, style: ArgStyle) -> Value {
    match style {
        ArgStyle::Zeroes => param.unset_value(),
        ArgStyle::Defaults => match param {
            TypeRef::Primitive(p) | TypeRef::Boxed(p) => p.zero(),
            TypeRef::String => Value::string(""),
            TypeRef::BigInt => Value::BigInt(BigInt::from(10)),
            TypeRef::BigDec => Value::BigDec(BigDecimal::from(10)),
            TypeRef::Date => Value::Date(Utc::now()),
            TypeRef::Array(component) => Value::array((**component).clone(), vec![]),
            TypeRef::List(_) => Value::list([]),
            TypeRef::Set(_) => Value::set([]),
            TypeRef::SortedSet(_) => Value::sorted_set([]),
            TypeRef::Map(_, _) => Value::map([]),
            TypeRef::SortedMap(_, _) => Value::sorted_map([]),
            TypeRef::Any | TypeRef::Class | TypeRef::Named(_) => Value::Null,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Constructor;

    fn registry() -> TypeRegistry {
        let registry = TypeRegistry::new();
        registry.register(
            TypeDescriptor::class("demo.Person")
                .with_field("name", TypeRef::String)
                .with_field("age", TypeRef::Primitive(crate::Primitive::Int))
                .with_default_constructor(),
        );
        registry.register(
            TypeDescriptor::class("demo.Employee")
                .with_parent("demo.Person")
                .with_interface("demo.Payable")
                .with_field("name", TypeRef::String)
                .with_field("salary", TypeRef::Primitive(crate::Primitive::Double))
                .with_default_constructor(),
        );
        registry
    }

    #[test]
    fn deep_fields_are_ancestor_first_with_shadow_keys() {
        let registry = registry();
        let fields = registry.deep_fields("demo.Employee").unwrap();
        let keys: Vec<_> = fields.keys().map(ToString::to_string).collect();
        assert_eq!(keys, ["name", "age", "demo.Employee.name", "salary"]);
    }

    #[test]
    fn distance_counts_hops() {
        let registry = registry();
        assert_eq!(registry.distance("demo.Employee", "demo.Employee"), Some(0));
        assert_eq!(registry.distance("demo.Employee", "demo.Person"), Some(1));
        assert_eq!(registry.distance("demo.Employee", "demo.Payable"), Some(1));
        assert_eq!(registry.distance("demo.Person", "demo.Employee"), None);
    }

    #[test]
    fn instantiate_prefers_the_no_arg_constructor() {
        let registry = registry();
        let descriptor = registry.get("demo.Person").unwrap();
        let value = registry.instantiate(&descriptor, false).unwrap();
        assert_eq!(value.field("age"), Some(Value::Int(0)));
        assert_eq!(value.field("name"), Some(Value::Null));
    }

    #[test]
    fn instantiate_falls_back_to_declared_constructors() {
        let registry = TypeRegistry::new();
        let descriptor = registry.register(
            TypeDescriptor::class("demo.Point").with_constructor(Constructor::new(
                [TypeRef::Primitive(crate::Primitive::Int)],
                |args| {
                    let mut object = ObjectValue::new(Arc::new(TypeDescriptor::class("demo.Point")));
                    object.set("x", args[0].clone());
                    Ok(Value::object(object))
                },
            )),
        );
        let value = registry.instantiate(&descriptor, false).unwrap();
        assert_eq!(value.field("x"), Some(Value::Int(0)));
    }

    #[test]
    fn instantiate_without_any_constructor_needs_the_escape_hatch() {
        let registry = TypeRegistry::new();
        let descriptor =
            registry.register(TypeDescriptor::class("demo.Opaque").with_field("v", TypeRef::Any));
        assert!(registry.instantiate(&descriptor, false).is_err());
        let value = registry.instantiate(&descriptor, true).unwrap();
        assert_eq!(value.field("v"), Some(Value::Null));
    }
}
