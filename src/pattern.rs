//! Case-insensitive glob matching
//!
//! Two wildcards are recognised:
//! - `*` matches zero or more characters
//! - `?` matches exactly one character
//!
//! Greedy matcher that backtracks to the most recent `*` on mismatch, so
//! patterns with literals after a `*` (`a*ba`) match correctly.

/// Match `s` against `pattern`, ignoring case
pub fn matches(pattern: &str, s: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().flat_map(char::to_lowercase).collect();
    let s: Vec<char> = s.chars().flat_map(char::to_lowercase).collect();

    let (mut p, mut i) = (0, 0);
    // Position of the last `*` seen and the input index it was tried at
    let mut star: Option<(usize, usize)> = None;

    while i < s.len() {
        match pattern.get(p) {
            Some('*') => {
                star = Some((p, i));
                p += 1;
            }
            Some(&c) if c == '?' || c == s[i] => {
                p += 1;
                i += 1;
            }
            _ => match star {
                // Let the last `*` swallow one more character
                Some((sp, si)) => {
                    p = sp + 1;
                    i = si + 1;
                    star = Some((sp, si + 1));
                }
                None => return false,
            },
        }
    }

    // Input exhausted: only trailing stars may remain
    pattern[p..].iter().all(|&c| c == '*')
}
