/// Redacts free-form text against the same blocklist used for content
/// filtering, for use at log call sites (e.g. `tracing::info!(%msg_redacted,
/// ...)`). A plain string transform rather than a `tracing::field::Visit`
/// implementation, since most `#[instrument]` spans here carry typed IDs,
/// not free-form user content.
///
/// For each blocklisted word found case-insensitively, the rest of that
/// token (up to the next whitespace) is replaced with `***`, so
/// `"api_key=sk-abc123"` becomes `"api_key=***"`, keeping the field name
/// visible for diagnosing which value was redacted.
pub fn redact_text(blocklist: &[String], text: &str) -> String {
    let lower = text.to_lowercase();
    if blocklist.iter().all(|pattern| !lower.contains(pattern.as_str())) {
        return text.to_string();
    }

    text.split(' ')
        .map(|token| {
            let lower_token = token.to_lowercase();
            if blocklist.iter().any(|pattern| lower_token.contains(pattern.as_str())) {
                match token.split_once(['=', ':']) {
                    Some((key, _)) => format!("{key}{}***", &token[key.len()..key.len() + 1]),
                    None => "***".to_string(),
                }
            } else {
                token.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocklist() -> Vec<String> {
        vec!["api_key".into(), "password".into(), "token".into()]
    }

    #[test]
    fn redacts_the_value_of_a_blocklisted_key() {
        let out = redact_text(&blocklist(), "connecting with api_key=sk-abc123 now");
        assert_eq!(out, "connecting with api_key=*** now");
    }

    #[test]
    fn leaves_clean_text_untouched() {
        let out = redact_text(&blocklist(), "hello world, nothing sensitive here");
        assert_eq!(out, "hello world, nothing sensitive here");
    }

    #[test]
    fn redacts_a_bare_sensitive_token_with_no_separator() {
        let out = redact_text(&blocklist(), "my password hunter2 leaked");
        assert_eq!(out, "my *** hunter2 leaked");
    }

    #[test]
    fn is_case_insensitive() {
        let out = redact_text(&blocklist(), "TOKEN=abc123");
        assert_eq!(out, "TOKEN=***");
    }
}
