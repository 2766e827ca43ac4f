//! Graph-aware structural equality.
//!
//! Plain `==` on [`Value`] treats reference values by pointer identity, which
//! is what containers need. Round-trip checks need the other notion: two
//! distinct graphs that have the same shape, the same scalars and the same
//! sharing. `deep_equals` provides that, cycle-safe.

use crate::node::JValue;
use crate::value::Value;
use rustc_hash::FxHashSet;

/// Structural equality over whole graphs.
///
/// Reference values compare by contents; a pair of nodes already under
/// comparison is assumed equal, which both terminates cycles and checks that
/// sharing lines up.
///
/// ```
/// use oxjsongraph::{deep_equals, Value};
///
/// let a = Value::list([Value::Long(1), Value::string("x")]);
/// let b = Value::list([Value::Long(1), Value::string("x")]);
/// assert!(a != b); // identity
/// assert!(deep_equals(&a, &b)); // structure
/// ```
pub fn deep_equals(a: &Value, b: &Value) -> bool {
    let mut in_progress = FxHashSet::default();
    deep_equals_impl(a, b, &mut in_progress)
}

fn deep_equals_impl(a: &Value, b: &Value, in_progress: &mut FxHashSet<(usize, usize)>) -> bool {
    match (a.identity(), b.identity()) {
        (Some(ia), Some(ib)) => {
            if ia == ib {
                return true;
            }
            if !in_progress.insert((ia, ib)) {
                // Already comparing this pair further up the stack.
                return true;
            }
        }
        (None, None) => return a == b,
        _ => return false,
    }
    match (a, b) {
        (Value::Array(x), Value::Array(y)) => {
            let x = x.borrow();
            let y = y.borrow();
            x.items.len() == y.items.len()
                && x.items
                    .iter()
                    .zip(y.items.iter())
                    .all(|(i, j)| deep_equals_impl(i, j, in_progress))
        }
        (Value::Collection(x), Value::Collection(y)) => {
            let x = x.borrow();
            let y = y.borrow();
            x.kind() == y.kind()
                && x.items().len() == y.items().len()
                && x.items()
                    .iter()
                    .zip(y.items().iter())
                    .all(|(i, j)| deep_equals_impl(i, j, in_progress))
        }
        (Value::Map(x), Value::Map(y)) => {
            let x = x.borrow();
            let y = y.borrow();
            if x.kind() != y.kind() || x.len() != y.len() {
                return false;
            }
            // Entry order is not part of map equality.
            x.entries().all(|(k, v)| {
                y.entries().any(|(k2, v2)| {
                    deep_equals_impl(k, k2, in_progress) && deep_equals_impl(v, v2, in_progress)
                })
            })
        }
        (Value::Object(x), Value::Object(y)) => {
            let x = x.borrow();
            let y = y.borrow();
            if x.descriptor().name() != y.descriptor().name() {
                return false;
            }
            let mut fields_x: Vec<_> = x.fields().collect();
            let mut fields_y: Vec<_> = y.fields().collect();
            fields_x.sort_by(|(k1, _), (k2, _)| k1.cmp(k2));
            fields_y.sort_by(|(k1, _), (k2, _)| k1.cmp(k2));
            fields_x.len() == fields_y.len()
                && fields_x.iter().zip(fields_y.iter()).all(|((k1, v1), (k2, v2))| {
                    k1 == k2 && deep_equals_impl(v1, v2, in_progress)
                })
        }
        (Value::Node(x), Value::Node(y)) => {
            let x = x.borrow();
            let y = y.borrow();
            x.len() == y.len()
                && x.entries().zip(y.entries()).all(|((k1, v1), (k2, v2))| {
                    k1 == k2 && jvalue_deep_equals(v1, v2, in_progress)
                })
        }
        _ => false,
    }
}

fn jvalue_deep_equals(
    a: &JValue,
    b: &JValue,
    in_progress: &mut FxHashSet<(usize, usize)>,
) -> bool {
    match (a, b) {
        (JValue::Null, JValue::Null) => true,
        (JValue::Bool(x), JValue::Bool(y)) => x == y,
        (JValue::Long(x), JValue::Long(y)) => x == y,
        (JValue::Double(x), JValue::Double(y)) => x.to_bits() == y.to_bits(),
        (JValue::Str(x), JValue::Str(y)) => x == y,
        (JValue::Array(x), JValue::Array(y)) => {
            let x = x.borrow();
            let y = y.borrow();
            x.len() == y.len()
                && x.iter()
                    .zip(y.iter())
                    .all(|(i, j)| jvalue_deep_equals(i, j, in_progress))
        }
        (JValue::Node(x), JValue::Node(y)) => deep_equals_impl(
            &Value::Node(std::rc::Rc::clone(x)),
            &Value::Node(std::rc::Rc::clone(y)),
            in_progress,
        ),
        (JValue::Resolved(x), JValue::Resolved(y)) => deep_equals_impl(x, y, in_progress),
        (JValue::Resolved(x), _) => match b {
            JValue::Bool(v) => deep_equals_impl(x, &Value::Bool(*v), in_progress),
            JValue::Long(v) => deep_equals_impl(x, &Value::Long(*v), in_progress),
            JValue::Double(v) => deep_equals_impl(x, &Value::Double(*v), in_progress),
            JValue::Str(v) => deep_equals_impl(x, &Value::Str(v.clone()), in_progress),
            JValue::Null => x.is_null(),
            _ => false,
        },
        (_, JValue::Resolved(_)) => jvalue_deep_equals(b, a, in_progress),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeRef;

    #[test]
    fn scalars_compare_by_value() {
        assert!(deep_equals(&Value::Long(3), &Value::Long(3)));
        assert!(!deep_equals(&Value::Long(3), &Value::Int(3)));
        assert!(deep_equals(&Value::string("x"), &Value::string("x")));
    }

    #[test]
    fn containers_compare_structurally() {
        let a = Value::array(TypeRef::Any, vec![Value::Long(1), Value::Long(2)]);
        let b = Value::array(TypeRef::Any, vec![Value::Long(1), Value::Long(2)]);
        assert!(deep_equals(&a, &b));
        let c = Value::array(TypeRef::Any, vec![Value::Long(2), Value::Long(1)]);
        assert!(!deep_equals(&a, &c));
    }

    #[test]
    fn map_entry_order_does_not_matter() {
        let a = Value::map([
            (Value::string("x"), Value::Long(1)),
            (Value::string("y"), Value::Long(2)),
        ]);
        let b = Value::map([
            (Value::string("y"), Value::Long(2)),
            (Value::string("x"), Value::Long(1)),
        ]);
        assert!(deep_equals(&a, &b));
    }

    #[test]
    fn cycles_terminate() {
        let a = Value::list([]);
        if let Value::Collection(c) = &a {
            c.borrow_mut().insert(a.clone());
        }
        let b = Value::list([]);
        if let Value::Collection(c) = &b {
            c.borrow_mut().insert(b.clone());
        }
        assert!(deep_equals(&a, &b));
    }
}
