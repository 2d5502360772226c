// POSIX shell quoting helpers.

fn is_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c)
}

/// Quote `s` so the device shell reads it back as exactly one literal token.
pub fn single_quote(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    if s.chars().all(is_safe) {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r#"'"'"'"#))
}

/// Quote `s` as one token while keeping `$VAR` and backtick expansion alive.
pub fn double_quote(s: &str) -> String {
    if s.is_empty() {
        return "\"\"".to_string();
    }
    if s.chars().all(is_safe) {
        return s.to_string();
    }
    format!("\"{}\"", s.replace('"', "\\\""))
}

/// Join argv tokens into a shell command line.
pub fn join_quoted<S: AsRef<str>>(tokens: &[S]) -> String {
    tokens
        .iter()
        .map(|t| single_quote(t.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Shell variable names accepted in a command environment.
pub fn is_valid_variable_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Minimal sh word splitter covering the quoting forms produced above.
    pub(crate) fn split_words(line: &str) -> Vec<String> {
        let mut words = Vec::new();
        let mut current = String::new();
        let mut in_word = false;
        let mut chars = line.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '\'' => {
                    in_word = true;
                    for q in chars.by_ref() {
                        if q == '\'' {
                            break;
                        }
                        current.push(q);
                    }
                }
                '"' => {
                    in_word = true;
                    while let Some(q) = chars.next() {
                        match q {
                            '"' => break,
                            '\\' => {
                                if let Some(n) = chars.next() {
                                    current.push(n);
                                }
                            }
                            other => current.push(other),
                        }
                    }
                }
                ' ' => {
                    if in_word {
                        words.push(std::mem::take(&mut current));
                        in_word = false;
                    }
                }
                other => {
                    in_word = true;
                    current.push(other);
                }
            }
        }
        if in_word {
            words.push(current);
        }
        words
    }

    #[test]
    fn test_safe_tokens_stay_bare() {
        assert_eq!(single_quote("ls"), "ls");
        assert_eq!(single_quote("/data/local/tmp/a.txt"), "/data/local/tmp/a.txt");
        assert_eq!(single_quote(""), "''");
    }

    #[test]
    fn test_single_quote_escapes_quotes() {
        assert_eq!(single_quote("it's"), r#"'it'"'"'s'"#);
        assert_eq!(single_quote("a b"), "'a b'");
        assert_eq!(single_quote("$HOME"), "'$HOME'");
    }

    #[test]
    fn test_double_quote_keeps_variables() {
        assert_eq!(double_quote("$PATH:/x"), "\"$PATH:/x\"");
        assert_eq!(double_quote("say \"hi\""), "\"say \\\"hi\\\"\"");
        assert_eq!(double_quote(""), "\"\"");
    }

    #[test]
    fn test_quoting_round_trip() {
        let tokens = vec![
            "echo".to_string(),
            "two words".to_string(),
            "it's".to_string(),
            "$HOME".to_string(),
            "\"double\"".to_string(),
            "".to_string(),
            "mixed 'both' \"kinds\" $x".to_string(),
        ];
        let line = join_quoted(&tokens);
        assert_eq!(split_words(&line), tokens);
    }

    #[test]
    fn test_variable_names() {
        assert!(is_valid_variable_name("PATH"));
        assert!(is_valid_variable_name("_x1"));
        assert!(!is_valid_variable_name("1X"));
        assert!(!is_valid_variable_name("A-B"));
        assert!(!is_valid_variable_name(""));
    }
}
