/// Separator between an optional label and the credential itself.
const LABEL_SEPARATOR: &str = "::";
const ENCODED_LABEL_SEPARATOR: &str = "%3A%3A";

/// Splits a composite authorization value into individual credential strings.
///
/// The value may carry multiple comma-separated entries. Each entry is either a
/// bare credential or a `<label>::<credential>` pair; the label is discarded.
/// Entries using the percent-encoded separator are decoded first. Empty entries
/// are dropped.
pub fn parse_auth_value(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| {
            let decoded;
            let entry = if entry.contains(ENCODED_LABEL_SEPARATOR)
                || entry.contains(&ENCODED_LABEL_SEPARATOR.to_ascii_lowercase())
            {
                decoded = urlencoding::decode(entry).map(|s| s.into_owned()).ok()?;
                decoded.as_str()
            } else {
                entry
            };
            let credential = match entry.rsplit_once(LABEL_SEPARATOR) {
                Some((_, credential)) => credential,
                None => entry,
            };
            let credential = credential.trim();
            if credential.is_empty() {
                None
            } else {
                Some(credential.to_string())
            }
        })
        .collect()
}

/// Redacted form of a credential safe for logs: first and last four characters.
pub fn redact(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "***".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}
