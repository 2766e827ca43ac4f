//! The intermediate representation between JSON text and typed graphs.
//!
//! Every JSON object whose identity must be tracked parses into a [`JNode`]:
//! an insertion-ordered entry map annotated with the declared type name, the
//! optional `@id`, the source position and, once the resolver has
//! materialized it, the typed target value.

use crate::value::Value;
use crate::vocab;
use indexmap::IndexMap;
use std::cell::RefCell;
use std::rc::Rc;

pub type JNodeRef = Rc<RefCell<JNode>>;

/// A value inside the intermediate tree.
#[derive(Debug, Clone)]
pub enum JValue {
    Null,
    Bool(bool),
    Long(i64),
    Double(f64),
    Str(Rc<str>),
    /// A raw JSON array, not yet shaped into an array, collection or map side.
    Array(Rc<RefCell<Vec<JValue>>>),
    Node(JNodeRef),
    /// Written in place by the resolver when a free-form map entry
    /// materializes into a typed value.
    Resolved(Value),
}

impl JValue {
    pub fn array(items: Vec<JValue>) -> Self {
        Self::Array(Rc::new(RefCell::new(items)))
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        if let Self::Str(s) = self { Some(s) } else { None }
    }

    pub fn as_long(&self) -> Option<i64> {
        if let Self::Long(v) = self { Some(*v) } else { None }
    }

    pub fn as_node(&self) -> Option<&JNodeRef> {
        if let Self::Node(n) = self { Some(n) } else { None }
    }

    /// A short description of the value shape, for error messages.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Long(_) => "long",
            Self::Double(_) => "double",
            Self::Str(_) => "string",
            Self::Array(_) => "array",
            Self::Node(_) => "object",
            Self::Resolved(_) => "resolved value",
        }
    }
}

/// Sentinel for "no `@id` assigned".
pub const UNASSIGNED_ID: i64 = -1;

/// One parsed JSON object, identity-tracked.
#[derive(Debug, Default)]
pub struct JNode {
    entries: IndexMap<Rc<str>, JValue>,
    type_name: Option<Rc<str>>,
    id: i64,
    target: Option<Value>,
    line: u64,
    column: u64,
}

impl JNode {
    pub fn new() -> Self {
        Self {
            entries: IndexMap::new(),
            type_name: None,
            id: UNASSIGNED_ID,
            target: None,
            line: 0,
            column: 0,
        }
    }

    pub fn new_at(line: u64, column: u64) -> Self {
        Self {
            line,
            column,
            ..Self::new()
        }
    }

    #[inline]
    pub fn into_ref(self) -> JNodeRef {
        Rc::new(RefCell::new(self))
    }

    #[inline]
    pub fn line(&self) -> u64 {
        self.line
    }

    #[inline]
    pub fn column(&self) -> u64 {
        self.column
    }

    pub fn insert(&mut self, key: Rc<str>, value: JValue) {
        self.entries.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&JValue> {
        self.entries.get(key)
    }

    pub(crate) fn set_entry_value(&mut self, key: &str, value: JValue) {
        if let Some(slot) = self.entries.get_mut(key) {
            *slot = value;
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = (&Rc<str>, &JValue)> {
        self.entries.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn type_name(&self) -> Option<&Rc<str>> {
        self.type_name.as_ref()
    }

    pub fn set_type_name(&mut self, name: Rc<str>) {
        self.type_name = Some(name);
    }

    pub fn clear_type_name(&mut self) {
        self.type_name = None;
    }

    #[inline]
    pub fn id(&self) -> i64 {
        self.id
    }

    #[inline]
    pub fn has_id(&self) -> bool {
        self.id != UNASSIGNED_ID
    }

    pub fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    #[inline]
    pub fn target(&self) -> Option<&Value> {
        self.target.as_ref()
    }

    /// Assigns the materialized value. A node materializes at most once;
    /// every reference to it resolves to this same target afterwards.
    pub fn set_target(&mut self, target: Value) {
        debug_assert!(self.target.is_none(), "node target assigned twice");
        self.target = Some(target);
    }

    /// The id this node points at, when the node is a `{"@ref": n}` stub.
    pub fn ref_id(&self) -> Option<i64> {
        self.entries.get(vocab::REF)?.as_long()
    }

    pub fn items(&self) -> Option<&JValue> {
        self.entries.get(vocab::ITEMS)
    }

    pub fn keys(&self) -> Option<&JValue> {
        self.entries.get(vocab::KEYS)
    }

    /// `@keys` and `@items` together make a map node.
    pub fn is_map_node(&self) -> bool {
        self.keys().is_some() && self.items().is_some()
    }

    /// `@items` alone makes an array (or indexable collection) node.
    pub fn is_array_node(&self) -> bool {
        self.items().is_some() && self.keys().is_none()
    }

    /// Entries that are not dialect meta keys, in insertion order.
    pub fn data_entries(&self) -> impl Iterator<Item = (&Rc<str>, &JValue)> {
        self.entries.iter().filter(|(k, _)| !vocab::is_meta_key(k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_order_is_preserved() {
        let mut node = JNode::new();
        node.insert(Rc::from("z"), JValue::Long(1));
        node.insert(Rc::from("a"), JValue::Long(2));
        node.insert(Rc::from("m"), JValue::Long(3));
        let keys: Vec<_> = node.entries().map(|(k, _)| k.to_string()).collect();
        assert_eq!(keys, ["z", "a", "m"]);
    }

    #[test]
    fn discriminators() {
        let mut array = JNode::new();
        array.insert(Rc::from(vocab::ITEMS), JValue::array(vec![]));
        assert!(array.is_array_node());
        assert!(!array.is_map_node());

        let mut map = JNode::new();
        map.insert(Rc::from(vocab::KEYS), JValue::array(vec![]));
        map.insert(Rc::from(vocab::ITEMS), JValue::array(vec![]));
        assert!(map.is_map_node());
        assert!(!map.is_array_node());
    }

    #[test]
    fn ref_id_reads_the_ref_entry() {
        let mut node = JNode::new();
        node.insert(Rc::from(vocab::REF), JValue::Long(4));
        assert_eq!(node.ref_id(), Some(4));
    }

    #[test]
    fn data_entries_skip_meta_keys() {
        let mut node = JNode::new();
        node.insert(Rc::from(vocab::REF), JValue::Long(4));
        node.insert(Rc::from("name"), JValue::Str(Rc::from("x")));
        let keys: Vec<_> = node.data_entries().map(|(k, _)| k.to_string()).collect();
        assert_eq!(keys, ["name"]);
    }
}
