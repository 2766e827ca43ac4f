//! Parser robustness against maliciously crafted input: unbounded nesting,
//! oversized number literals and truncated documents must fail with a parse
//! error instead of exhausting the stack or memory.

use oxjsongraph::{GraphParser, JsonGraphError};

fn generate_nested_arrays(depth: usize) -> String {
    let mut json = String::with_capacity(depth * 2 + 1);
    for _ in 0..depth {
        json.push('[');
    }
    json.push('1');
    for _ in 0..depth {
        json.push(']');
    }
    json
}

fn generate_nested_objects(depth: usize) -> String {
    let mut json = String::new();
    for _ in 0..depth {
        json.push_str("{\"a\":");
    }
    json.push('1');
    for _ in 0..depth {
        json.push('}');
    }
    json
}

#[test]
fn deeply_nested_arrays_are_rejected() {
    let error = GraphParser::new()
        .parse_str(&generate_nested_arrays(10_000))
        .unwrap_err();
    let message = error.to_string();
    assert!(message.contains("depth"), "expected a depth error, got: {message}");
}

#[test]
fn deeply_nested_objects_are_rejected() {
    let error = GraphParser::new()
        .use_maps()
        .parse_str(&generate_nested_objects(10_000))
        .unwrap_err();
    let message = error.to_string();
    assert!(message.contains("depth"), "expected a depth error, got: {message}");
}

#[test]
fn moderate_nesting_is_allowed() {
    let value = GraphParser::new()
        .parse_str(&generate_nested_arrays(100))
        .expect("moderate nesting should parse");
    let mut current = value;
    let mut depth = 0;
    while let Some(array) = current.as_array().map(std::rc::Rc::clone) {
        let inner = array.borrow().items[0].clone();
        current = inner;
        depth += 1;
    }
    assert_eq!(depth, 100);
}

#[test]
fn oversized_number_literals_are_rejected() {
    let error = GraphParser::new().parse_str(&"9".repeat(100_000)).unwrap_err();
    assert!(matches!(error, JsonGraphError::Syntax(_)), "{error}");
}

#[test]
fn truncated_documents_fail_with_position() {
    for input in ["{\"a\":", "[1, 2", "\"unterminated", "{\"a\"", "tru"] {
        let error = GraphParser::new().use_maps().parse_str(input).unwrap_err();
        assert!(
            matches!(error, JsonGraphError::Syntax(_)),
            "input {input:?} should fail with a syntax error, got {error}"
        );
    }
}

#[test]
fn error_snippet_is_bounded() {
    let mut input = String::from("[");
    input.push_str(&"1,".repeat(5_000));
    input.push('x');
    let error = GraphParser::new().parse_str(&input).unwrap_err();
    let JsonGraphError::Syntax(syntax) = error else {
        panic!("expected a syntax error");
    };
    assert!(syntax.snippet().chars().count() <= 200);
}

#[test]
fn normal_input_still_works() {
    let value = GraphParser::new()
        .parse_str(r#"[{"a": [1, 2, {"b": true}]}, null, "text"]"#)
        .expect("normal input should parse");
    assert_eq!(value.as_array().unwrap().borrow().items.len(), 3);
}
