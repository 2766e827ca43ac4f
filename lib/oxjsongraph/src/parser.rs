//! The JSON-dialect parser: a four-state machine per object over the
//! pushback reader, producing the intermediate [`JNode`] tree and the
//! `@id` table, plus the public [`GraphParser`] entry point.

use crate::codec::CodecRegistry;
use crate::error::JsonGraphError;
use crate::node::{JNode, JNodeRef, JValue};
use crate::pushback::PushbackReader;
use crate::registry::TypeRegistry;
use crate::resolver::Resolver;
use crate::value::Value;
use crate::vocab::{self, InternTable};
use rustc_hash::FxHashMap;
use std::collections::HashMap;
use std::io::Read;
use std::rc::Rc;
use std::sync::Arc;

/// Nesting depth guard: adversarial input fails with a syntax error instead
/// of exhausting the stack.
const MAX_NESTING_DEPTH: usize = 512;
/// Longest accepted number literal.
const NUMBER_BUFFER_LIMIT: usize = 256;

/// A parser for the JSON graph dialect.
///
/// Returns the typed object graph materialized against the configured
/// [`TypeRegistry`], or the intermediate node tree in maps mode.
///
/// ```
/// use oxjsongraph::{GraphParser, Value};
///
/// let value = GraphParser::new().parse_str("[1, 2, 3]")?;
/// let array = value.as_array().unwrap().borrow();
/// assert_eq!(array.items.len(), 3);
/// assert_eq!(array.items[0], Value::Long(1));
/// # Result::<_, Box<dyn std::error::Error>>::Ok(())
/// ```
#[derive(Default, Clone)]
#[must_use]
pub struct GraphParser {
    registry: Arc<TypeRegistry>,
    codecs: Rc<CodecRegistry>,
    type_name_map: HashMap<String, String>,
    use_maps: bool,
    allow_raw_allocation: bool,
}

impl GraphParser {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Type descriptors to materialize against.
    #[inline]
    pub fn with_type_registry(mut self, registry: Arc<TypeRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Custom read/write codecs. The built-in set is used otherwise.
    #[inline]
    pub fn with_codecs(mut self, codecs: CodecRegistry) -> Self {
        self.codecs = Rc::new(codecs);
        self
    }

    /// The forward (long → short) type-name substitution map used on write;
    /// its reverse is applied to `@type` values while parsing.
    #[inline]
    pub fn with_type_name_map(mut self, map: HashMap<String, String>) -> Self {
        self.type_name_map = map;
        self
    }

    /// Returns the intermediate node tree instead of a typed graph.
    #[inline]
    pub fn use_maps(mut self) -> Self {
        self.use_maps = true;
        self
    }

    /// Allows zero-initialized allocation of classes whose constructors all
    /// fail. Off by default.
    #[inline]
    pub fn with_raw_allocation(mut self) -> Self {
        self.allow_raw_allocation = true;
        self
    }

    pub fn parse_str(&self, input: &str) -> Result<Value, JsonGraphError> {
        self.parse_reader(input.as_bytes())
    }

    pub fn parse_slice(&self, input: &[u8]) -> Result<Value, JsonGraphError> {
        self.parse_reader(input)
    }

    /// Parses a whole document from a [`Read`] implementation. The entire
    /// graph is materialized before anything is returned.
    pub fn parse_reader<R: Read>(&self, reader: R) -> Result<Value, JsonGraphError> {
        let reverse_type_names: HashMap<String, String> = self
            .type_name_map
            .iter()
            .map(|(long, short)| (short.clone(), long.clone()))
            .collect();
        let mut ids = FxHashMap::default();
        let mut parser = JsonParser {
            input: PushbackReader::new(reader),
            ids: &mut ids,
            reverse_type_names: &reverse_type_names,
            interner: InternTable::new(),
        };
        let root = parser.parse_root()?;
        if self.use_maps {
            Ok(raw_value(root))
        } else {
            Resolver::new(
                &self.registry,
                &self.codecs,
                &ids,
                self.allow_raw_allocation,
            )
            .resolve(root)
        }
    }
}

/// Maps-mode conversion: scalars map one-to-one, objects stay nodes.
fn raw_value(value: JValue) -> Value {
    match value {
        JValue::Null => Value::Null,
        JValue::Bool(b) => Value::Bool(b),
        JValue::Long(v) => Value::Long(v),
        JValue::Double(v) => Value::Double(v),
        JValue::Str(s) => Value::Str(s),
        JValue::Node(node) => Value::Node(node),
        JValue::Resolved(value) => value,
        JValue::Array(items) => {
            let mut node = JNode::new();
            node.insert(Rc::from(vocab::ITEMS), JValue::Array(items));
            Value::Node(node.into_ref())
        }
    }
}

/// Parser states of the per-object state machine.
enum ObjectState {
    ReadField,
    ReadValue(Rc<str>),
    ReadPostValue,
}

pub(crate) struct JsonParser<'a, R: Read> {
    input: PushbackReader<R>,
    ids: &'a mut FxHashMap<i64, JNodeRef>,
    reverse_type_names: &'a HashMap<String, String>,
    interner: InternTable,
}

impl<R: Read> JsonParser<'_, R> {
    pub fn parse_root(&mut self) -> Result<JValue, JsonGraphError> {
        let value = self.read_value(0)?;
        // A top-level untyped array becomes a node carrying @items.
        Ok(match value {
            JValue::Array(items) => {
                let mut node = JNode::new_at(1, 0);
                node.insert(self.interner.intern(vocab::ITEMS), JValue::Array(items));
                JValue::Node(node.into_ref())
            }
            other => other,
        })
    }

    fn read_value(&mut self, depth: usize) -> Result<JValue, JsonGraphError> {
        if depth > MAX_NESTING_DEPTH {
            return Err(self
                .input
                .syntax_error("Maximum parsing depth exceeded")
                .into());
        }
        let c = self.skip_whitespace_expecting("value")?;
        match c {
            '{' => {
                self.input.unread('{')?;
                self.read_object(depth)
            }
            '[' => self.read_array(depth),
            '"' => Ok(JValue::Str(self.read_string()?)),
            '-' | '0'..='9' => self.read_number(c),
            't' | 'T' | 'f' | 'F' => self.read_boolean(c),
            'n' | 'N' => {
                self.read_token(c, "null")?;
                Ok(JValue::Null)
            }
            other => Err(self
                .input
                .syntax_error(format!("Unknown JSON value starting with '{other}'"))
                .into()),
        }
    }

    /// The four-state machine of the dialect: start object, field, value,
    /// post value.
    fn read_object(&mut self, depth: usize) -> Result<JValue, JsonGraphError> {
        let c = self.skip_whitespace_expecting("'{'")?;
        if c != '{' {
            return Err(self
                .input
                .syntax_error(format!("Expected '{{', found '{c}'"))
                .into());
        }
        let position = self.input.position();
        let node = JNode::new_at(position.line, position.column).into_ref();

        // ReadStartObject: an immediate '}' yields the empty-object sentinel.
        let c = self.skip_whitespace_expecting("field or '}'")?;
        if c == '}' {
            return Ok(JValue::Node(node));
        }
        self.input.unread(c)?;

        let mut state = ObjectState::ReadField;
        loop {
            state = match state {
                ObjectState::ReadField => {
                    let c = self.skip_whitespace_expecting("field name")?;
                    if c != '"' {
                        return Err(self
                            .input
                            .syntax_error("Expected quote before field name")
                            .into());
                    }
                    let field = self.read_string()?;
                    let field = if field.starts_with('@') {
                        self.interner.intern(vocab::normalize_meta_key(&field))
                    } else {
                        field
                    };
                    let c = self.skip_whitespace_expecting("':'")?;
                    if c != ':' {
                        return Err(self
                            .input
                            .syntax_error("Expected ':' between field and value")
                            .into());
                    }
                    ObjectState::ReadValue(field)
                }
                ObjectState::ReadValue(field) => {
                    let value = self.read_value(depth + 1)?;
                    self.store_field(&node, field, value)?;
                    ObjectState::ReadPostValue
                }
                ObjectState::ReadPostValue => {
                    let c = self.skip_whitespace_expecting("',' or '}'")?;
                    match c {
                        '}' => return Ok(JValue::Node(node)),
                        ',' => ObjectState::ReadField,
                        _ => {
                            return Err(self
                                .input
                                .syntax_error("Object not ended with '}'")
                                .into());
                        }
                    }
                }
            };
        }
    }

    fn store_field(
        &mut self,
        node: &JNodeRef,
        field: Rc<str>,
        value: JValue,
    ) -> Result<(), JsonGraphError> {
        match &*field {
            vocab::ID => {
                let Some(id) = value.as_long() else {
                    return Err(self
                        .input
                        .syntax_error(format!("Expected an integer for @id, found {}", value.describe()))
                        .into());
                };
                node.borrow_mut().set_id(id);
                self.ids.insert(id, Rc::clone(node));
            }
            vocab::TYPE => {
                let Some(name) = value.as_str() else {
                    return Err(self
                        .input
                        .syntax_error(format!("Expected a string for @type, found {}", value.describe()))
                        .into());
                };
                let name = self
                    .reverse_type_names
                    .get(name)
                    .map_or(name, String::as_str);
                let name = self.interner.intern(name);
                node.borrow_mut().set_type_name(name);
            }
            _ => node.borrow_mut().insert(field, value),
        }
        Ok(())
    }

    fn read_array(&mut self, depth: usize) -> Result<JValue, JsonGraphError> {
        if depth > MAX_NESTING_DEPTH {
            return Err(self
                .input
                .syntax_error("Maximum parsing depth exceeded")
                .into());
        }
        let mut items = Vec::new();
        let c = self.skip_whitespace_expecting("value or ']'")?;
        if c == ']' {
            return Ok(JValue::array(items));
        }
        self.input.unread(c)?;
        loop {
            items.push(self.read_value(depth + 1)?);
            match self.skip_whitespace()? {
                Some(']') => return Ok(JValue::array(items)),
                Some(',') => {}
                _ => {
                    return Err(self
                        .input
                        .syntax_error("Expected ',' or ']' inside array")
                        .into());
                }
            }
        }
    }

    /// Reads a string body, the opening quote already consumed. Standard JSON
    /// escapes plus the lenient `\'`; `\u` escapes combine surrogate pairs.
    fn read_string(&mut self) -> Result<Rc<str>, JsonGraphError> {
        let mut out = String::new();
        loop {
            let c = self.read_expecting("string character")?;
            match c {
                '"' => break,
                '\\' => {
                    let escape = self.read_expecting("escape character")?;
                    match escape {
                        '"' => out.push('"'),
                        '\'' => out.push('\''),
                        '\\' => out.push('\\'),
                        '/' => out.push('/'),
                        'b' => out.push('\u{8}'),
                        'f' => out.push('\u{c}'),
                        'n' => out.push('\n'),
                        'r' => out.push('\r'),
                        't' => out.push('\t'),
                        'u' => {
                            let unit = self.read_hex_unit()?;
                            if (0xD800..=0xDBFF).contains(&unit) {
                                // High surrogate: a \uXXXX low surrogate must follow.
                                if self.read_expecting("escape")? == '\\'
                                    && self.read_expecting("escape")? == 'u'
                                {
                                    let low = self.read_hex_unit()?;
                                    let combined = 0x10000
                                        + ((u32::from(unit) - 0xD800) << 10)
                                        + (u32::from(low) - 0xDC00);
                                    out.push(char::from_u32(combined).unwrap_or('\u{fffd}'));
                                } else {
                                    return Err(self
                                        .input
                                        .syntax_error("Expected \\u escape after a high surrogate")
                                        .into());
                                }
                            } else {
                                out.push(char::from_u32(u32::from(unit)).unwrap_or('\u{fffd}'));
                            }
                        }
                        other => {
                            return Err(self
                                .input
                                .syntax_error(format!("Invalid character escape sequence '\\{other}'"))
                                .into());
                        }
                    }
                }
                _ => out.push(c),
            }
        }
        Ok(self.interner.intern(&out))
    }

    fn read_hex_unit(&mut self) -> Result<u16, JsonGraphError> {
        let mut unit: u16 = 0;
        for _ in 0..4 {
            let c = self.read_expecting("hexadecimal digit")?;
            let digit = c.to_digit(16).ok_or_else(|| {
                JsonGraphError::from(
                    self.input
                        .syntax_error("Expected hexadecimal digits in \\u escape"),
                )
            })?;
            unit = (unit << 4) | u16::try_from(digit).unwrap_or(0);
        }
        Ok(unit)
    }

    /// Numbers with `.`, `e` or `E` parse as 64-bit floats, everything else
    /// as signed 64-bit integers.
    fn read_number(&mut self, first: char) -> Result<JValue, JsonGraphError> {
        let mut text = String::new();
        text.push(first);
        let mut is_float = false;
        loop {
            match self.input.read()? {
                Some(c @ ('0'..='9' | '-' | '+')) => text.push(c),
                Some(c @ ('.' | 'e' | 'E')) => {
                    is_float = true;
                    text.push(c);
                }
                Some(c) => {
                    self.input.unread(c)?;
                    break;
                }
                None => break,
            }
            if text.len() > NUMBER_BUFFER_LIMIT {
                return Err(self
                    .input
                    .syntax_error("Too many digits in number")
                    .into());
            }
        }
        if is_float {
            match text.parse::<f64>() {
                Ok(v) => Ok(JValue::Double(v)),
                Err(_) => Err(self
                    .input
                    .syntax_error(format!("Invalid floating point number: '{text}'"))
                    .into()),
            }
        } else {
            match text.parse::<i64>() {
                Ok(v) => Ok(JValue::Long(v)),
                Err(_) => Err(self
                    .input
                    .syntax_error(format!("Invalid integer number: '{text}'"))
                    .into()),
            }
        }
    }

    fn read_boolean(&mut self, first: char) -> Result<JValue, JsonGraphError> {
        if first.eq_ignore_ascii_case(&'t') {
            self.read_token(first, "true")?;
            Ok(JValue::Bool(true))
        } else {
            self.read_token(first, "false")?;
            Ok(JValue::Bool(false))
        }
    }

    /// Matches the rest of `true`, `false` or `null`, case-insensitively.
    fn read_token(&mut self, first: char, token: &str) -> Result<(), JsonGraphError> {
        debug_assert!(first.eq_ignore_ascii_case(&token.chars().next().unwrap_or_default()));
        for expected in token.chars().skip(1) {
            let c = self.read_expecting("token character")?;
            if !c.eq_ignore_ascii_case(&expected) {
                return Err(self
                    .input
                    .syntax_error(format!("Expected token: {token}"))
                    .into());
            }
        }
        Ok(())
    }

    fn skip_whitespace(&mut self) -> Result<Option<char>, JsonGraphError> {
        loop {
            match self.input.read()? {
                Some(c) if c.is_ascii_whitespace() => {}
                other => return Ok(other),
            }
        }
    }

    fn skip_whitespace_expecting(&mut self, what: &str) -> Result<char, JsonGraphError> {
        self.skip_whitespace()?.ok_or_else(|| {
            JsonGraphError::from(
                self.input
                    .syntax_error(format!("EOF reached prematurely, expected {what}")),
            )
        })
    }

    fn read_expecting(&mut self, what: &str) -> Result<char, JsonGraphError> {
        self.input.read()?.ok_or_else(|| {
            JsonGraphError::from(
                self.input
                    .syntax_error(format!("EOF reached prematurely, expected {what}")),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_maps(input: &str) -> Result<Value, JsonGraphError> {
        GraphParser::new().use_maps().parse_str(input)
    }

    #[test]
    fn scalar_roots() -> Result<(), JsonGraphError> {
        assert_eq!(parse_maps("25")?, Value::Long(25));
        assert_eq!(parse_maps("25.0")?, Value::Double(25.0));
        assert_eq!(parse_maps("true")?, Value::Bool(true));
        assert_eq!(parse_maps("TRUE")?, Value::Bool(true));
        assert_eq!(parse_maps("\"foo\"")?, Value::string("foo"));
        assert_eq!(parse_maps("null")?, Value::Null);
        Ok(())
    }

    #[test]
    fn empty_object_is_an_empty_node() -> Result<(), JsonGraphError> {
        let value = parse_maps("{}")?;
        let node = value.as_node().unwrap().borrow();
        assert!(node.is_empty());
        assert!(node.type_name().is_none());
        Ok(())
    }

    #[test]
    fn top_level_array_is_wrapped_under_items() -> Result<(), JsonGraphError> {
        let value = parse_maps("[1, \"two\", false]")?;
        let node = value.as_node().unwrap().borrow();
        assert!(node.is_array_node());
        Ok(())
    }

    #[test]
    fn short_meta_keys_normalize() -> Result<(), JsonGraphError> {
        let value = parse_maps(r#"{"@t":"demo.Thing","@i":3,"@e":[1]}"#)?;
        let node = value.as_node().unwrap().borrow();
        assert_eq!(node.type_name().map(|t| &**t), Some("demo.Thing"));
        assert_eq!(node.id(), 3);
        assert!(node.items().is_some());
        Ok(())
    }

    #[test]
    fn reverse_type_name_map_applies_to_type_values() -> Result<(), JsonGraphError> {
        let mut map = HashMap::new();
        map.insert("demo.very.long.Name".to_owned(), "N".to_owned());
        let value = GraphParser::new()
            .with_type_name_map(map)
            .use_maps()
            .parse_str(r#"{"@type":"N"}"#)?;
        let node = value.as_node().unwrap().borrow();
        assert_eq!(node.type_name().map(|t| &**t), Some("demo.very.long.Name"));
        Ok(())
    }

    #[test]
    fn string_escapes() -> Result<(), JsonGraphError> {
        assert_eq!(
            parse_maps(r#""a\nb\t\'c\" A""#)?,
            Value::string("a\nb\t'c\" A")
        );
        // A \u surrogate pair combines into one code point beyond the BMP.
        assert_eq!(
            parse_maps(r#""\ud83d\ude00""#)?,
            Value::string("\u{1f600}")
        );
        assert_eq!(parse_maps("\"\u{1f600}\"")?, Value::string("\u{1f600}"));
        Ok(())
    }

    #[test]
    fn bad_hex_escape_is_an_error() {
        let error = parse_maps(r#""\uZZZZ""#).unwrap_err();
        assert!(error.to_string().contains("hexadecimal"));
    }

    #[test]
    fn field_order_is_preserved() -> Result<(), JsonGraphError> {
        let value = parse_maps(r#"{"z":1,"a":2,"m":3}"#)?;
        let node = value.as_node().unwrap().borrow();
        let keys: Vec<_> = node.entries().map(|(k, _)| k.to_string()).collect();
        assert_eq!(keys, ["z", "a", "m"]);
        Ok(())
    }

    #[test]
    fn array_separator_error_message() {
        let error =
            parse_maps("[true, \"bunch of ints\", 1,2, 3 , 4, 5 , 6,7,8,9,10").unwrap_err();
        assert!(
            error
                .to_string()
                .contains("Expected ',' or ']' inside array"),
            "unexpected message: {error}"
        );
    }

    #[test]
    fn unbalanced_object_is_an_error_with_position() {
        let error = parse_maps("{\"a\": 1\n").unwrap_err();
        let JsonGraphError::Syntax(syntax) = error else {
            panic!("expected a syntax error");
        };
        assert_eq!(syntax.position().line, 2);
        assert!(syntax.snippet().contains("{\"a\": 1"));
    }

    #[test]
    fn number_longer_than_256_chars_is_an_error() {
        let input = "1".repeat(300);
        assert!(parse_maps(&input).is_err());
    }

    #[test]
    fn long_overflow_is_an_error() {
        assert!(parse_maps("92233720368547758080").is_err());
    }

    #[test]
    fn deep_nesting_is_bounded() {
        let mut input = String::new();
        for _ in 0..600 {
            input.push('[');
        }
        let error = parse_maps(&input).unwrap_err();
        assert!(error.to_string().contains("depth"));
    }

    #[test]
    fn colon_and_comma_misplacement() {
        assert!(parse_maps(r#"{"a" 1}"#).is_err());
        assert!(parse_maps(r#"{"a": 1 "b": 2}"#).is_err());
        assert!(parse_maps(r#"{,}"#).is_err());
    }
}
