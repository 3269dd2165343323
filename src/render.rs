//! Short fixed-budget display strings for traced values

use std::fmt::Display;

/// Values whose text is longer than this are elided in the middle.
pub const MAX_VALUE_CHARS: usize = 50;

/// Characters kept from each end of an elided value.
const KEEP_CHARS: usize = 25;

/// Render a value's text form on one line, eliding the middle of long values.
///
/// The text is trimmed and newlines become spaces. Anything over
/// [`MAX_VALUE_CHARS`] characters keeps its first and last 25 characters
/// around a literal `...`.
pub fn render(value: impl Display) -> String {
    let text = value.to_string();
    let text = text.trim().replace('\n', " ");

    let char_count = text.chars().count();
    if char_count <= MAX_VALUE_CHARS {
        return text;
    }

    let head: String = text.chars().take(KEEP_CHARS).collect();
    let tail: String = text.chars().skip(char_count - KEEP_CHARS).collect();
    format!("{}...{}", head, tail)
}

#[cfg(test)]
mod tests {
    use super::render;

    #[test]
    fn short_values_are_unchanged() {
        assert_eq!(render(42), "42");
        assert_eq!(render("[1, 2, 3]"), "[1, 2, 3]");
    }

    #[test]
    fn newlines_collapse_and_edges_trim() {
        assert_eq!(render("  a\nb\n"), "a b");
    }

    #[test]
    fn long_values_keep_both_ends() {
        let value: String = ('a'..='z').cycle().take(80).collect();
        let rendered = render(&value);
        assert_eq!(rendered.chars().count(), 53);
        assert_eq!(&rendered[..25], &value[..25]);
        assert_eq!(&rendered[25..28], "...");
        assert_eq!(&rendered[28..], &value[55..]);
    }

    #[test]
    fn boundary_is_inclusive() {
        let exact = "x".repeat(50);
        assert_eq!(render(&exact), exact);
        assert_eq!(render("x".repeat(51)).chars().count(), 53);
    }

    #[test]
    fn elision_counts_characters_not_bytes() {
        let value = "é".repeat(60);
        let rendered = render(&value);
        assert_eq!(rendered.chars().count(), 53);
        assert!(rendered.starts_with(&"é".repeat(25)));
    }

    #[test]
    fn rendering_is_stable() {
        let value = vec![1; 40];
        let text = format!("{:?}", value);
        assert_eq!(render(&text), render(&text));
    }
}
