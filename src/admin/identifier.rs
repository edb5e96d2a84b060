//! Quoting for SQL identifiers embedded in administrative statements.

/// Wraps `name` in double quotes, doubling any embedded quote.
pub(super) fn quote_identifier(name: &str) -> String {
    let mut quoted = String::with_capacity(name.len() + 2);
    quoted.push('"');
    for ch in name.chars() {
        if ch == '"' {
            quoted.push('"');
        }
        quoted.push(ch);
    }
    quoted.push('"');
    quoted
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("app", "\"app\"")]
    #[case("MixedCase", "\"MixedCase\"")]
    #[case("with space", "\"with space\"")]
    #[case("evil\"; DROP DATABASE postgres; --", "\"evil\"\"; DROP DATABASE postgres; --\"")]
    #[case("\"\"", "\"\"\"\"\"\"")]
    fn quotes_and_escapes(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(quote_identifier(raw), expected);
    }
}
