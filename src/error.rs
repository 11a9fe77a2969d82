/*!
# Error Handling

Error types for query parsing, translation, and result assembly. All
operations in this crate return well-structured errors with enough context
to point at the offending clause, function, or value kind.

## Error Categories

- **Parse Errors**: syntax errors in query text with position information
- **Translate Errors**: statement shapes the backend cannot express
  (sub-queries, regex sources, conflicting grouping functions, ...)
- **Function Errors**: arity or argument-kind violations, reported with the
  function name and offending argument index
- **Type Errors**: unsupported operator/kind pairs and failed coercions in
  the value engine
- **Assemble Errors**: a backend response that does not match the shape the
  translated query promised
- **Format Errors**: a result set a formatter cannot reshape

Errors are values, never control flow; the translator and assembler stop at
the first hard error rather than producing partial results.
*/

use std::fmt;

/// Error type shared by every stage of the query pipeline.
///
/// Each variant carries the context relevant to its stage. Divide-by-zero
/// is intentionally *not* an error anywhere in this crate: a zero-valued
/// divisor yields a null value so one blank cell cannot fail a dashboard.
#[derive(Debug, Clone)]
pub enum TsqlError {
    /// Syntax error while parsing query text.
    ParseError {
        message: String,
        /// Character position in the query text where the error occurred.
        position: Option<usize>,
    },

    /// The statement parsed but cannot be translated to a backend request.
    TranslateError { message: String },

    /// A function was called with the wrong number or kind of arguments.
    FunctionError {
        /// Name of the function as written in the query.
        function: String,
        message: String,
    },

    /// The value engine was asked to combine incompatible kinds.
    TypeError {
        expected: String,
        actual: String,
        value: Option<String>,
    },

    /// Expression evaluation failed during result assembly.
    EvaluationError { message: String },

    /// The backend response does not match the translated query.
    AssembleError { message: String },

    /// A formatter could not reshape the result set.
    FormatError { format: String, message: String },
}

impl fmt::Display for TsqlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TsqlError::ParseError { message, position } => {
                if let Some(pos) = position {
                    write!(f, "parse error at position {}: {}", pos, message)
                } else {
                    write!(f, "parse error: {}", message)
                }
            }
            TsqlError::TranslateError { message } => {
                write!(f, "translate error: {}", message)
            }
            TsqlError::FunctionError { function, message } => {
                write!(f, "function '{}': {}", function, message)
            }
            TsqlError::TypeError {
                expected,
                actual,
                value,
            } => {
                if let Some(val) = value {
                    write!(
                        f,
                        "type error: expected {}, got {} for value '{}'",
                        expected, actual, val
                    )
                } else {
                    write!(f, "type error: expected {}, got {}", expected, actual)
                }
            }
            TsqlError::EvaluationError { message } => {
                write!(f, "evaluation error: {}", message)
            }
            TsqlError::AssembleError { message } => {
                write!(f, "assemble error: {}", message)
            }
            TsqlError::FormatError { format, message } => {
                write!(f, "format '{}': {}", format, message)
            }
        }
    }
}

impl std::error::Error for TsqlError {}

impl TsqlError {
    /// Create a parse error with optional position.
    pub fn parse_error(message: impl Into<String>, position: Option<usize>) -> Self {
        TsqlError::ParseError {
            message: message.into(),
            position,
        }
    }

    /// Create a translate error.
    pub fn translate_error(message: impl Into<String>) -> Self {
        TsqlError::TranslateError {
            message: message.into(),
        }
    }

    /// Create a function-contract error.
    pub fn function_error(function: impl Into<String>, message: impl Into<String>) -> Self {
        TsqlError::FunctionError {
            function: function.into(),
            message: message.into(),
        }
    }

    /// Create a type error.
    pub fn type_error(
        expected: impl Into<String>,
        actual: impl Into<String>,
        value: Option<String>,
    ) -> Self {
        TsqlError::TypeError {
            expected: expected.into(),
            actual: actual.into(),
            value,
        }
    }

    /// Create an evaluation error.
    pub fn evaluation_error(message: impl Into<String>) -> Self {
        TsqlError::EvaluationError {
            message: message.into(),
        }
    }

    /// Create an assemble error.
    pub fn assemble_error(message: impl Into<String>) -> Self {
        TsqlError::AssembleError {
            message: message.into(),
        }
    }

    /// Create a format error.
    pub fn format_error(format: impl Into<String>, message: impl Into<String>) -> Self {
        TsqlError::FormatError {
            format: format.into(),
            message: message.into(),
        }
    }

    /// Arity check helper: the function must receive exactly `num` arguments.
    pub fn check_args_num(name: &str, got: usize, num: usize) -> Result<(), TsqlError> {
        if got < num {
            return Err(TsqlError::function_error(
                name,
                format!("must have {} args, got {}", num, got),
            ));
        }
        if got > num {
            return Err(TsqlError::function_error(
                name,
                format!("expects {} args, got {}", num, got),
            ));
        }
        Ok(())
    }

    /// Arity check helper: the function must receive at least `num` arguments.
    pub fn check_args_min(name: &str, got: usize, num: usize) -> Result<(), TsqlError> {
        if got < num {
            return Err(TsqlError::function_error(
                name,
                format!("args must be no less than {}", num),
            ));
        }
        Ok(())
    }
}

/// Result type for query pipeline operations.
pub type TsqlResult<T> = Result<T, TsqlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_context() {
        let err = TsqlError::parse_error("expected FROM clause", Some(42));
        assert_eq!(
            err.to_string(),
            "parse error at position 42: expected FROM clause"
        );

        let err = TsqlError::function_error("percentiles", "args must be no less than 2");
        assert_eq!(
            err.to_string(),
            "function 'percentiles': args must be no less than 2"
        );

        let err = TsqlError::type_error("string", "int", Some("42".to_string()));
        assert_eq!(
            err.to_string(),
            "type error: expected string, got int for value '42'"
        );
    }

    #[test]
    fn test_arity_helpers() {
        assert!(TsqlError::check_args_num("if", 3, 3).is_ok());
        assert!(TsqlError::check_args_num("if", 2, 3).is_err());
        assert!(TsqlError::check_args_num("if", 4, 3).is_err());
        assert!(TsqlError::check_args_min("include", 2, 2).is_ok());
        assert!(TsqlError::check_args_min("include", 1, 2).is_err());
    }
}
