//! Behavior of the intermediate-tree mode: the parser returns the node tree
//! untouched, type names survive unresolved, and re-encoding reproduces the
//! input produced by this serializer.

use oxjsongraph::{GraphParser, GraphSerializer, JsonGraphError, Value};

fn parse_maps(input: &str) -> Result<Value, JsonGraphError> {
    GraphParser::new().use_maps().parse_str(input)
}

#[test]
fn nodes_keep_entry_order_and_types() -> Result<(), JsonGraphError> {
    let tree = parse_maps(r#"{"@type":"x.Y","b":1,"a":2}"#)?;
    let node = tree.as_node().unwrap().borrow();
    assert_eq!(node.type_name().map(|t| &**t), Some("x.Y"));
    let keys: Vec<_> = node.entries().map(|(k, _)| k.to_string()).collect();
    assert_eq!(keys, ["b", "a"]);
    Ok(())
}

#[test]
fn unresolvable_types_are_kept_not_rejected() -> Result<(), JsonGraphError> {
    // The typed path would fail on this; the maps path returns the tree.
    let tree = parse_maps(r#"{"@type":"never.Registered","x":1}"#)?;
    assert!(tree.as_node().is_some());
    Ok(())
}

#[test]
fn refs_stay_as_stub_nodes() -> Result<(), JsonGraphError> {
    let tree = parse_maps(r#"[{"@id":1,"v":2},{"@ref":1}]"#)?;
    let root = tree.as_node().unwrap().borrow();
    assert!(root.is_array_node());
    Ok(())
}

#[test]
fn re_encoding_reproduces_serializer_output() -> Result<(), JsonGraphError> {
    for json in [
        "{}",
        "[1,2,3]",
        "{\"a\":1,\"b\":[true,null,\"x\"]}",
        "{\"@type\":\"map\",\"k\":\"v\"}",
        "{\"@id\":1,\"self\":{\"@ref\":1}}",
        "[{\"@type\":\"int\",\"value\":5}]",
        "25",
        "25.0",
        "\"text with \\\"quotes\\\" and \\n\"",
    ] {
        let tree = GraphParser::new().use_maps().parse_str(json)?;
        let out = GraphSerializer::new().serialize_to_string(&tree)?;
        assert_eq!(json, out, "re-encoding changed the document");
    }
    Ok(())
}

#[test]
fn scalar_roots_are_plain_values() -> Result<(), JsonGraphError> {
    assert_eq!(parse_maps("25")?, Value::Long(25));
    assert_eq!(parse_maps("null")?, Value::Null);
    assert_eq!(parse_maps("\"s\"")?, Value::string("s"));
    Ok(())
}
