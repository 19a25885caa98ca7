/// Formats a possibly long text (usually a query) cut at 497 bytes.
#[macro_export]
macro_rules! truncate_long {
    ($text:expr) => {
        format_args!(
            "{}{}",
            $crate::truncate_at(&$text, 497).trim_end(),
            if $text.len() > 497 { "..." } else { "" },
        )
    };
}

/// Longest prefix of `text` not exceeding `max` bytes that ends on a char boundary.
pub fn truncate_at(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Case-insensitive comparison of column and member names.
pub fn same_name(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

#[cfg(test)]
mod tests {
    use super::truncate_at;

    #[test]
    fn truncate() {
        assert_eq!(truncate_at("SELECT 1", 100), "SELECT 1");
        assert_eq!(truncate_at("abcdef", 3), "abc");
        assert_eq!(truncate_at("aé", 2), "a");
        let long = "x".repeat(600);
        assert_eq!(format!("{}", truncate_long!(long)).len(), 500);
    }
}
