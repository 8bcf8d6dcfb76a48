//! Hub hostname derivation from CONNECT identity fields.

/// Extract `<label>.<domain_suffix>` from `input`.
///
/// Scans for the first occurrence of `.{domain_suffix}` whose label (the
/// run of non-`/` characters immediately before it) is non-empty; the label
/// extends left to the nearest path separator or the start of the string.
/// Matching is case-sensitive and purely substring-based, so a name
/// embedded in a longer string still matches through the suffix
/// (`test.example-iot.network` yields `test.example-iot.net` for suffix
/// `example-iot.net`).
///
/// Device usernames commonly look like
/// `myhub.example-iot.net/dev-01/?api-version=2020-09-30`; the hub name is
/// the first path segment.
pub fn derive_hub_hostname(input: &str, domain_suffix: &str) -> Option<String> {
    if domain_suffix.is_empty() {
        return None;
    }
    let needle = format!(".{domain_suffix}");
    let mut search_from = 0;
    while let Some(rel) = input[search_from..].find(&needle) {
        let at = search_from + rel;
        let start = input[..at].rfind('/').map(|i| i + 1).unwrap_or(0);
        if start < at {
            return Some(input[start..at + needle.len()].to_string());
        }
        // Empty label (suffix right after a separator); keep scanning.
        search_from = at + 1;
    }
    None
}
