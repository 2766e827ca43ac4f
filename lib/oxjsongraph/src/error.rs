use std::fmt;
use std::io;

/// A position in the parsed text: a 1-based `line` and a 0-based `column`
/// counted in code points.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub struct TextPosition {
    pub line: u64,
    pub column: u64,
}

/// An error in the syntax of the parsed document.
///
/// It carries a message, the position the parser had reached and a snippet of
/// the last read input (at most 200 code points).
#[derive(Debug)]
pub struct JsonGraphSyntaxError {
    message: String,
    position: TextPosition,
    snippet: String,
}

impl JsonGraphSyntaxError {
    pub(crate) fn new(
        message: impl Into<String>,
        position: TextPosition,
        snippet: impl Into<String>,
    ) -> Self {
        Self {
            message: message.into(),
            position,
            snippet: snippet.into(),
        }
    }

    /// The position the parser had reached when the error was raised.
    #[inline]
    pub fn position(&self) -> TextPosition {
        self.position
    }

    /// The error message.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The last read input, at most 200 code points.
    #[inline]
    pub fn snippet(&self) -> &str {
        &self.snippet
    }
}

impl fmt::Display for JsonGraphSyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Parser error at line {} column {}: {}",
            self.position.line, self.position.column, self.message
        )?;
        if !self.snippet.is_empty() {
            write!(f, "\nLast read: {}", self.snippet)?;
        }
        Ok(())
    }
}

impl std::error::Error for JsonGraphSyntaxError {}

impl From<JsonGraphSyntaxError> for io::Error {
    #[inline]
    fn from(error: JsonGraphSyntaxError) -> Self {
        Self::new(io::ErrorKind::InvalidData, error)
    }
}

/// Error returned while parsing or serializing a JSON object graph.
#[derive(Debug, thiserror::Error)]
pub enum JsonGraphError {
    /// I/O error on the underlying byte source or sink.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// An error in the document syntax.
    #[error(transparent)]
    Syntax(#[from] JsonGraphSyntaxError),
    /// `@ref` values that name no defined `@id`, gathered after the patch pass.
    #[error("Unresolved references to non-existent @id values: {}", format_ids(.0))]
    UnresolvedReferences(Vec<i64>),
    /// `@type` names an unknown class, or the named class cannot be instantiated.
    #[error("{0}")]
    Type(String),
    /// A value that cannot be converted to the declared field type.
    #[error("Unable to coerce value into field '{field}': {reason}")]
    Coercion { field: String, reason: String },
    /// Caller-supplied configuration that contradicts the registered types.
    #[error("{0}")]
    Configuration(String),
}

impl JsonGraphError {
    pub(crate) fn unknown_class(name: &str) -> Self {
        Self::Type(format!("Unable to resolve class named '{name}'"))
    }

    pub(crate) fn coercion(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Coercion {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl From<JsonGraphError> for io::Error {
    #[inline]
    fn from(error: JsonGraphError) -> Self {
        match error {
            JsonGraphError::Io(error) => error,
            JsonGraphError::Syntax(error) => error.into(),
            error => Self::new(io::ErrorKind::InvalidData, error.to_string()),
        }
    }
}

fn format_ids(ids: &[i64]) -> String {
    let mut out = String::new();
    for (i, id) in ids.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&id.to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syntax_error_display() {
        let error = JsonGraphSyntaxError::new(
            "Expected ',' or ']' inside array",
            TextPosition { line: 3, column: 7 },
            "[1, 2 3",
        );
        let text = error.to_string();
        assert!(text.contains("line 3"));
        assert!(text.contains("column 7"));
        assert!(text.contains("Expected ',' or ']' inside array"));
        assert!(text.contains("[1, 2 3"));
    }

    #[test]
    fn unresolved_references_lists_all_ids() {
        let error = JsonGraphError::UnresolvedReferences(vec![4, 17]);
        let text = error.to_string();
        assert!(text.contains('4'));
        assert!(text.contains("17"));
    }

    #[test]
    fn unknown_class_message_names_the_class() {
        let text = JsonGraphError::unknown_class("non.existent.Thing").to_string();
        assert!(text.contains("class"));
        assert!(text.contains("non.existent.Thing"));
    }
}
