/// Matches `text` against a store-side glob.
///
/// Supports `*`, `?`, bracket classes with ranges and `^` negation, and `\`
/// escapes. Matching is byte-wise and case-sensitive.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    matches(pattern.as_bytes(), text.as_bytes())
}

pub(crate) fn glob_match_bytes(pattern: &str, text: &[u8]) -> bool {
    matches(pattern.as_bytes(), text)
}

fn matches(mut pattern: &[u8], mut text: &[u8]) -> bool {
    while let Some(&token) = pattern.first() {
        match token {
            b'*' => {
                while pattern.len() > 1 && pattern[1] == b'*' {
                    pattern = &pattern[1..];
                }
                if pattern.len() == 1 {
                    return true;
                }
                return (0..=text.len()).any(|skip| matches(&pattern[1..], &text[skip..]));
            }
            b'?' => {
                if text.is_empty() {
                    return false;
                }
                pattern = &pattern[1..];
                text = &text[1..];
            }
            b'[' => {
                let Some((&byte, rest)) = text.split_first() else {
                    return false;
                };
                let (hit, after) = class(&pattern[1..], byte);
                if !hit {
                    return false;
                }
                pattern = after;
                text = rest;
            }
            b'\\' if pattern.len() >= 2 => {
                if text.first() != Some(&pattern[1]) {
                    return false;
                }
                pattern = &pattern[2..];
                text = &text[1..];
            }
            literal => {
                if text.first() != Some(&literal) {
                    return false;
                }
                pattern = &pattern[1..];
                text = &text[1..];
            }
        }
    }
    text.is_empty()
}

/// Evaluates a bracket class body against `byte`; returns the verdict and
/// the pattern after the closing bracket.
fn class(mut body: &[u8], byte: u8) -> (bool, &[u8]) {
    let negate = body.first() == Some(&b'^');
    if negate {
        body = &body[1..];
    }
    let mut hit = false;
    loop {
        match body {
            [] => break,
            [b']', rest @ ..] => {
                body = rest;
                break;
            }
            [b'\\', escaped, rest @ ..] => {
                hit |= *escaped == byte;
                body = rest;
            }
            [start, b'-', end, rest @ ..] if *end != b']' => {
                let (low, high) = if start <= end { (*start, *end) } else { (*end, *start) };
                hit |= (low..=high).contains(&byte);
                body = rest;
            }
            [literal, rest @ ..] => {
                hit |= *literal == byte;
                body = rest;
            }
        }
    }
    (hit != negate, body)
}

#[cfg(test)]
mod tests {
    use super::glob_match;

    #[test]
    fn wildcards() {
        assert!(glob_match("*", ""));
        assert!(glob_match("user:*", "user:1:name"));
        assert!(glob_match("*:name", "user:1:name"));
        assert!(glob_match("u*1*n*", "user:1:name"));
        assert!(!glob_match("user:*", "session:abc"));
        assert!(glob_match("user:?", "user:1"));
        assert!(!glob_match("user:?", "user:10"));
    }

    #[test]
    fn classes_and_escapes() {
        assert!(glob_match("h[ae]llo", "hello"));
        assert!(!glob_match("h[^e]llo", "hello"));
        assert!(glob_match("h[a-c]llo", "hbllo"));
        assert!(glob_match("h[c-a]llo", "hbllo"));
        assert!(glob_match("k\\*", "k*"));
        assert!(!glob_match("k\\*", "kx"));
        assert!(glob_match("[\\]]", "]"));
    }
}
