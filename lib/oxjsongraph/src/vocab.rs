//! Constants of the JSON graph dialect: meta keys, their short aliases and
//! the short names used for built-in types in `@type` values.

use std::rc::Rc;

/// `@type` meta key: fully qualified class name or short alias of the node.
pub const TYPE: &str = "@type";
/// `@id` meta key: positive integer identity of a multiply-referenced node.
pub const ID: &str = "@id";
/// `@ref` meta key: back or forward reference to a node carrying `@id`.
pub const REF: &str = "@ref";
/// `@items` meta key: contents of an array or collection, or the values side of a map.
pub const ITEMS: &str = "@items";
/// `@keys` meta key: keys side of a map.
pub const KEYS: &str = "@keys";

pub const SHORT_TYPE: &str = "@t";
pub const SHORT_ID: &str = "@i";
pub const SHORT_REF: &str = "@r";
pub const SHORT_ITEMS: &str = "@e";
pub const SHORT_KEYS: &str = "@k";

/// Maps a short meta key to its long form, leaving every other key untouched.
pub(crate) fn normalize_meta_key(key: &str) -> &str {
    match key {
        SHORT_TYPE => TYPE,
        SHORT_ID => ID,
        SHORT_REF => REF,
        SHORT_ITEMS => ITEMS,
        SHORT_KEYS => KEYS,
        _ => key,
    }
}

#[inline]
pub(crate) fn is_meta_key(key: &str) -> bool {
    matches!(key, TYPE | ID | REF | ITEMS | KEYS)
}

/// Whether a string used as a map key would be read back as a dialect
/// directive if it were written in the compact object form. Covers the long
/// meta keys and their short aliases.
#[inline]
pub(crate) fn is_reserved_key(key: &str) -> bool {
    is_meta_key(normalize_meta_key(key))
}

/// Short names of the built-in types as they appear in `@type` values.
pub mod type_names {
    pub const BOOLEAN: &str = "boolean";
    pub const BYTE: &str = "byte";
    pub const CHAR: &str = "char";
    pub const INT: &str = "int";
    pub const LONG: &str = "long";
    pub const SHORT: &str = "short";
    pub const DOUBLE: &str = "double";
    pub const FLOAT: &str = "float";
    pub const STRING: &str = "string";
    pub const DATE: &str = "date";
    pub const CLASS: &str = "class";
    pub const BIG_INT: &str = "bigint";
    pub const BIG_DEC: &str = "bigdec";
    pub const LIST: &str = "list";
    pub const SET: &str = "set";
    pub const SORTED_SET: &str = "sorted-set";
    pub const MAP: &str = "map";
    pub const SORTED_MAP: &str = "sorted-map";
    pub const OBJECT: &str = "object";
}

/// Strings the parser sees over and over again. Hits are shared instead of
/// reallocated, one `Rc` clone per occurrence.
const INTERN_TABLE: &[&str] = &[
    "", " ", "true", "false", "null", "name", "id", "key", "value", "type",
    "date", "time", "0", "1", "2", "city", "state", "country", "first",
    "last", TYPE, ID, REF, ITEMS, KEYS,
];

pub(crate) struct InternTable {
    entries: Vec<Rc<str>>,
}

impl InternTable {
    pub fn new() -> Self {
        Self {
            entries: INTERN_TABLE.iter().map(|s| Rc::from(*s)).collect(),
        }
    }

    /// Returns a shared copy for table hits, a fresh allocation otherwise.
    pub fn intern(&self, s: &str) -> Rc<str> {
        // The table is small and its members are short, a scan beats hashing.
        if s.len() <= 8 {
            for entry in &self.entries {
                if **entry == *s {
                    return Rc::clone(entry);
                }
            }
        }
        Rc::from(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_key_normalization() {
        assert_eq!(normalize_meta_key("@t"), "@type");
        assert_eq!(normalize_meta_key("@i"), "@id");
        assert_eq!(normalize_meta_key("@r"), "@ref");
        assert_eq!(normalize_meta_key("@e"), "@items");
        assert_eq!(normalize_meta_key("@k"), "@keys");
        assert_eq!(normalize_meta_key("@type"), "@type");
        assert_eq!(normalize_meta_key("name"), "name");
    }

    #[test]
    fn reserved_keys_cover_both_forms() {
        assert!(is_reserved_key("@type"));
        assert!(is_reserved_key("@id"));
        assert!(is_reserved_key("@r"));
        assert!(is_reserved_key("@e"));
        assert!(!is_reserved_key("@custom"));
        assert!(!is_reserved_key("name"));
    }

    #[test]
    fn interning_shares_common_strings() {
        let table = InternTable::new();
        let a = table.intern("true");
        let b = table.intern("true");
        assert!(Rc::ptr_eq(&a, &b));
        let c = table.intern("definitely not in the table");
        let d = table.intern("definitely not in the table");
        assert!(!Rc::ptr_eq(&c, &d));
    }
}
