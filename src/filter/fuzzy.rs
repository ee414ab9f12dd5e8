use crate::config::{FilterConfig, ScoreWeights};

/// Subsequence matcher for one query.
#[derive(Clone, Debug)]
pub struct Matcher {
    query: Vec<char>,
    delimiter: Vec<char>,
    case_sensitive: bool,
    weights: ScoreWeights,
}

impl Matcher {
    /// Prepares `query` for matching names split on `delimiter`.
    pub fn new(query: &str, config: &FilterConfig, delimiter: &str) -> Self {
        let case_sensitive = config.case_sensitive;
        Self {
            query: fold_all(query, case_sensitive),
            delimiter: fold_all(delimiter, case_sensitive),
            case_sensitive,
            weights: config.weights,
        }
    }

    /// Whether the query is empty and therefore matches everything.
    pub fn is_empty(&self) -> bool {
        self.query.is_empty()
    }

    /// Scores `candidate`; `None` when the query is not a subsequence of it.
    ///
    /// The greedy forward pass finds where the match ends, then a backward
    /// pass from that end finds the latest possible start, which yields the
    /// most compact window ending there.
    pub fn score(&self, candidate: &str) -> Option<u32> {
        if self.query.is_empty() {
            return Some(0);
        }
        let text = fold_all(candidate, self.case_sensitive);
        let end = forward_end(&self.query, &text)?;
        let positions = backward_positions(&self.query, &text, end);

        let w = self.weights;
        let mut score = w.per_char * self.query.len() as u32;
        for (i, &pos) in positions.iter().enumerate() {
            if i > 0 && positions[i - 1] + 1 == pos {
                score += w.consecutive;
            }
            if self.at_boundary(&text, pos) {
                score += w.boundary;
            }
        }
        let window = positions[positions.len() - 1] - positions[0] + 1;
        let gaps = (window - positions.len()) as u32;
        Some(score.saturating_sub(gaps * w.gap))
    }

    fn at_boundary(&self, text: &[char], pos: usize) -> bool {
        pos == 0 || (!self.delimiter.is_empty() && text[..pos].ends_with(&self.delimiter))
    }
}

/// Whether `needle` is a subsequence of `haystack` under the given folding.
pub fn is_subsequence(needle: &str, haystack: &str, case_sensitive: bool) -> bool {
    let needle = fold_all(needle, case_sensitive);
    let haystack = fold_all(haystack, case_sensitive);
    needle.is_empty() || forward_end(&needle, &haystack).is_some()
}

fn fold_all(text: &str, case_sensitive: bool) -> Vec<char> {
    if case_sensitive {
        text.chars().collect()
    } else {
        text.chars().map(fold).collect()
    }
}

fn fold(c: char) -> char {
    if c.is_ascii() {
        c.to_ascii_lowercase()
    } else {
        c.to_lowercase().next().unwrap_or(c)
    }
}

/// Index of the character completing a greedy match of `query`.
fn forward_end(query: &[char], text: &[char]) -> Option<usize> {
    let mut qi = 0;
    for (ti, &c) in text.iter().enumerate() {
        if c == query[qi] {
            qi += 1;
            if qi == query.len() {
                return Some(ti);
            }
        }
    }
    None
}

fn backward_positions(query: &[char], text: &[char], end: usize) -> Vec<usize> {
    let mut positions = vec![0; query.len()];
    let mut qi = query.len();
    let mut ti = end + 1;
    while qi > 0 && ti > 0 {
        ti -= 1;
        if text[ti] == query[qi - 1] {
            qi -= 1;
            positions[qi] = ti;
        }
    }
    positions
}
