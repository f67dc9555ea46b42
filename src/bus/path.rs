//! Routing path normalisation and prefix matching.
//!
//! Matching is literal-prefix, not segment-aware: `/msg` matches both
//! `/msg/group` and `/msgx`.

/// Normalise a routing path.
///
/// Empty input becomes `/`, a leading slash is ensured, repeated slashes and
/// `.` segments are collapsed, `..` removes the previous segment and trailing
/// slashes are dropped.
pub fn normalize(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    format!("/{}", segments.join("/"))
}

/// Returns true if `pattern` is a non-empty literal prefix of `path`.
pub fn is_match(pattern: &str, path: &str) -> bool {
    !pattern.is_empty() && path.starts_with(pattern)
}

/// Pick the longest pattern that is a prefix of `path`.
pub fn longest_match<'a, I>(patterns: I, path: &str) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    patterns
        .into_iter()
        .filter(|pattern| is_match(pattern, path))
        .max_by_key(|pattern| pattern.len())
}
