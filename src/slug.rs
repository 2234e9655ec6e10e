use lazy_regex::regex;

/// Normalizes free text into a URL slug: lowercase, quote characters
/// removed, every non-alphanumeric run collapsed to a single hyphen,
/// edge hyphens trimmed. Returns an empty string when nothing survives.
pub fn slugify(input: &str) -> String {
    let lowered = input.trim().to_lowercase();
    let no_quotes = regex!(r#"['"]"#).replace_all(&lowered, "");
    let hyphenated = regex!(r"[^a-z0-9]+").replace_all(&no_quotes, "-");
    hyphenated.trim_matches('-').to_string()
}

/// Slug shape accepted from clients that provide one explicitly:
/// lowercase alphanumeric segments joined by single hyphens.
pub fn is_valid_slug(input: &str) -> bool {
    regex!(r"^[a-z0-9]+(-[a-z0-9]+)*$").is_match(input)
}
