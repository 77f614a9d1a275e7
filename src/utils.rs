/// Strip Markdown code fences that models like to wrap JSON in.
///
/// Returns the content of the first ```` ```json ```` block, else of the
/// first bare ```` ``` ```` block, else the trimmed input.
///
/// # Examples
///
/// ```
/// use localeats::utils::strip_code_fence;
/// assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
/// assert_eq!(strip_code_fence("```\n[1]\n```"), "[1]");
/// assert_eq!(strip_code_fence("  {} "), "{}");
/// ```
pub fn strip_code_fence(text: &str) -> &str {
    let t = text.trim();
    let inner = if let Some((_, rest)) = t.split_once("```json") {
        rest
    } else if let Some((_, rest)) = t.split_once("```") {
        rest
    } else {
        return t;
    };
    inner.split("```").next().unwrap_or(inner).trim()
}

/// Parse `text` as JSON of type `T` after removing code fences.
pub fn parse_model_json<T: serde::de::DeserializeOwned>(text: &str) -> serde_json::Result<T> {
    serde_json::from_str(strip_code_fence(text))
}

/// Lowercase `text` and replace everything but letters, digits and spaces
/// with a space so that word-boundary checks can pad with spaces.
///
/// # Examples
///
/// ```
/// use localeats::utils::words_only;
/// assert_eq!(words_only("Pizza, near MIT!"), "pizza  near mit ");
/// ```
pub fn words_only(text: &str) -> String {
    text.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == ' ' {
                c.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect()
}

/// `true` when `phrase` appears in `text` bounded by spaces or the string
/// ends. Both arguments are expected to be lowercase.
pub fn contains_phrase(text: &str, phrase: &str) -> bool {
    format!(" {text} ").contains(&format!(" {phrase} "))
}
