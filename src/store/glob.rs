//! Redis-style glob matching for `SCAN ... MATCH`
//!
//! Supports `*`, `?` and backslash escapes, which is everything the queue
//! discovery pattern needs. Character classes are not interpreted.

/// Escape glob metacharacters so `literal` matches only itself.
pub fn escape_glob(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Match `text` against a glob `pattern`
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<Token> = tokenize(pattern);
    let text: Vec<char> = text.chars().collect();
    glob_match_impl(&pattern, &text)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Star,
    Any,
    Literal(char),
}

fn tokenize(pattern: &str) -> Vec<Token> {
    let mut tokens = Vec::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        tokens.push(match c {
            '*' => Token::Star,
            '?' => Token::Any,
            // A trailing backslash matches itself
            '\\' => Token::Literal(chars.next().unwrap_or('\\')),
            other => Token::Literal(other),
        });
    }
    tokens
}

fn glob_match_impl(pattern: &[Token], text: &[char]) -> bool {
    let mut p = 0;
    let mut t = 0;
    let mut star_p = None;
    let mut star_t = 0;

    while t < text.len() {
        if p < pattern.len() {
            match pattern[p] {
                Token::Any => {
                    p += 1;
                    t += 1;
                    continue;
                }
                Token::Star => {
                    star_p = Some(p);
                    star_t = t;
                    p += 1;
                    continue;
                }
                Token::Literal(c) if c == text[t] => {
                    p += 1;
                    t += 1;
                    continue;
                }
                Token::Literal(_) => {}
            }
        }

        // Backtrack to the last star, letting it absorb one more character
        match star_p {
            Some(sp) => {
                p = sp + 1;
                star_t += 1;
                t = star_t;
            }
            None => return false,
        }
    }

    while p < pattern.len() && pattern[p] == Token::Star {
        p += 1;
    }
    p == pattern.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_pattern() {
        assert!(glob_match("bull:*:meta", "bull:emails:meta"));
        assert!(glob_match("bull:*:meta", "bull:team:emails:meta"));
        assert!(!glob_match("bull:*:meta", "bull:emails:wait"));
        assert!(!glob_match("bull:*:meta", "other:emails:meta"));
        assert!(!glob_match("bull:*:meta", "bull:emails:meta:x"));
    }

    #[test]
    fn test_question_mark() {
        assert!(glob_match("k?y", "key"));
        assert!(!glob_match("k?y", "ky"));
    }

    #[test]
    fn test_escaped_prefix_is_literal() {
        let pattern = format!("{}:*:meta", escape_glob("bu*ll"));
        assert_eq!(pattern, "bu\\*ll:*:meta");
        assert!(glob_match(&pattern, "bu*ll:q:meta"));
        assert!(!glob_match(&pattern, "buXXll:q:meta"));
    }

    #[test]
    fn test_empty() {
        assert!(glob_match("", ""));
        assert!(glob_match("*", ""));
        assert!(!glob_match("", "a"));
    }
}
