/// Mask a credential for logging/transcripts.
///
/// Secrets of 9 or more characters show their first 4 and last 4
/// characters with the middle replaced by a fixed run of asterisks;
/// shorter secrets are fully redacted.
pub fn mask_secret(value: &str) -> String {
    let len = value.chars().count();
    if len == 0 {
        return String::new();
    }
    if len < 9 {
        return "*".repeat(8.min(len.max(4)));
    }
    let chars: Vec<char> = value.chars().collect();
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[len - 4..].iter().collect();
    format!("{head}{}{tail}", "*".repeat(8))
}

/// Replace the credential-setting argument of a logged command line with
/// its masked form. Used before a command is written into `logs/app.log`.
pub fn mask_command_line(parts: &[String], secret: &str) -> Vec<String> {
    let masked = mask_secret(secret);
    parts
        .iter()
        .map(|p| if p == secret { masked.clone() } else { p.clone() })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_secrets_fully_redacted() {
        assert_eq!(mask_secret("abcd"), "****");
        assert_eq!(mask_secret("abcdefgh"), "********");
    }

    #[test]
    fn long_secrets_show_head_and_tail() {
        let masked = mask_secret("sk-ant-REDACTED");
        assert!(masked.starts_with("sk-a"));
        assert!(masked.ends_with("wxyz"));
        assert!(!masked.contains("ABCDEFGHIJ"));
    }

    #[test]
    fn command_line_masking_replaces_only_the_secret_arg() {
        let parts = vec!["inference".into(), "key".into(), "set".into(), "ANTHROPIC_API_KEY".into(), "sk-ant-REDACTED".into()];
        let masked = mask_command_line(&parts, "sk-ant-REDACTED");
        assert!(!masked.iter().any(|p| p.contains("ABCDEFGHIJ")));
        assert_eq!(masked[3], "ANTHROPIC_API_KEY");
    }
}
