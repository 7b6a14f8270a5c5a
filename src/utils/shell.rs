//! Shell escaping and quoting utilities.

/// Escape a value for use inside single quotes.
/// Replaces `'` with `'\''` (end quote, escaped quote, start quote).
pub fn escape_single_quote_content(value: &str) -> String {
    value.replace('\'', "'\\''")
}

/// Quote a single value for shell execution.
/// - Empty strings become `''`
/// - Strings with shell metacharacters are wrapped in single quotes
/// - Embedded single quotes are escaped
pub fn quote_arg(arg: &str) -> String {
    if arg.is_empty() {
        return "''".to_string();
    }

    const SHELL_META: &[char] = &[
        ' ', '\t', '\n', '\'', '"', '\\', '$', '`', '!', '*', '?', '[', ']', '(', ')', '{', '}',
        '<', '>', '|', '&', ';', '#', '~',
    ];

    if !arg.contains(SHELL_META) {
        return arg.to_string();
    }

    format!("'{}'", escape_single_quote_content(arg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_values_pass_through() {
        assert_eq!(quote_arg("dist"), "dist");
        assert_eq!(quote_arg("s3-bucket.example"), "s3-bucket.example");
        assert_eq!(quote_arg("layers/python3.12"), "layers/python3.12");
    }

    #[test]
    fn values_with_spaces_are_quoted() {
        assert_eq!(quote_arg("my app"), "'my app'");
    }

    #[test]
    fn command_substitution_is_neutralized() {
        assert_eq!(quote_arg("$(rm -rf /)"), "'$(rm -rf /)'");
    }

    #[test]
    fn embedded_single_quote_is_escaped() {
        assert_eq!(quote_arg("it's"), "'it'\\''s'");
    }

    #[test]
    fn empty_value_is_quoted() {
        assert_eq!(quote_arg(""), "''");
    }
}
