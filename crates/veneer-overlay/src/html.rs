//! HTML transforms.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::transform::Transform;

/// Matches the `href` attribute of a `<base>` start tag, capturing the text
/// before the value, and the value with its quotes.
static BASE_HREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(<base\b[^>]*?\bhref\s*=\s*)("[^"]*"|'[^']*'|[^\s"'>]+)"#).unwrap()
});

/// Rewrite the `href` of every `<base>` element to `href`.
///
/// The original quote style is kept; unquoted values are rewritten with
/// double quotes. Other attributes on the tag are left untouched.
pub fn base_href(href: &str) -> Transform {
    let href = href.to_string();

    Transform::new(format!("base_href:{href}"), move |content| {
        BASE_HREF
            .replace_all(content, |caps: &Captures<'_>| {
                let quote = match caps[2].chars().next() {
                    Some(q @ ('"' | '\'')) => q,
                    _ => '"',
                };
                format!("{}{quote}{href}{quote}", &caps[1])
            })
            .into_owned()
    })
}
