/// Single-quotes a value for a POSIX shell.
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Wraps a command for elevated execution. The whole command runs under one
/// `sh -c` so that `cd x && y` keeps its meaning after elevation.
pub fn elevate(command: &str) -> String {
    format!("sudo -S -p '' sh -c {}", quote(command))
}

pub fn truncate_utf8_prefix(value: &str, max_bytes: usize) -> &str {
    if value.len() <= max_bytes {
        return value;
    }
    let mut end = max_bytes;
    while end > 0 && !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

#[cfg(test)]
mod tests {
    use super::{elevate, quote, truncate_utf8_prefix};

    #[test]
    fn quote_escapes_embedded_single_quotes() {
        assert_eq!(quote("it's"), "'it'\\''s'");
        assert_eq!(quote("plain"), "'plain'");
    }

    #[test]
    fn elevate_wraps_compound_commands() {
        assert_eq!(
            elevate("cd /tmp && ls"),
            "sudo -S -p '' sh -c 'cd /tmp && ls'"
        );
    }

    #[test]
    fn truncate_does_not_split_utf8() {
        assert_eq!(truncate_utf8_prefix("a\u{1F600}b", 2), "a");
        assert_eq!(truncate_utf8_prefix("hello", 3), "hel");
    }
}
