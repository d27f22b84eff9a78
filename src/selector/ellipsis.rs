//! Ellipsis pattern expansion
//!
//! `node-{1...4}` expands to four node names and `nvme{0...1}n{1...2}` to
//! the cartesian product of both groups. Bounds are either both numeric or
//! both lowercase alphabetic (`a..z`, `aa..az`, ...); reversed bounds are
//! swapped.

use crate::error::{Error, Result};

const ELLIPSIS: &str = "...";

/// Largest number of values a single argument may expand to
pub const MAX_EXPANSION: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Range { start: u64, end: u64, alpha: bool },
}

impl Segment {
    fn len(&self) -> u64 {
        match self {
            Segment::Literal(_) => 1,
            Segment::Range { start, end, .. } => (end - start).saturating_add(1),
        }
    }

    fn values(&self) -> Vec<String> {
        match self {
            Segment::Literal(text) => vec![text.clone()],
            Segment::Range { start, end, alpha } => (*start..=*end)
                .map(|n| if *alpha { int_to_alpha(n) } else { n.to_string() })
                .collect(),
        }
    }
}

/// Bijective base-26: a=1, z=26, aa=27
fn alpha_to_int(value: &str) -> u64 {
    value
        .bytes()
        .fold(0u64, |acc, b| acc.saturating_mul(26).saturating_add(u64::from(b - b'a' + 1)))
}

fn int_to_alpha(mut value: u64) -> String {
    let mut chars = Vec::new();
    while value > 0 {
        let rem = (value - 1) % 26;
        chars.push((b'a' + rem as u8) as char);
        value = (value - 1) / 26;
    }
    chars.iter().rev().collect()
}

fn parse_bound(value: &str) -> Option<(u64, bool)> {
    if let Ok(n) = value.parse::<u64>() {
        return Some((n, false));
    }
    if !value.is_empty() && value.bytes().all(|b| b.is_ascii_lowercase()) {
        return Some((alpha_to_int(value), true));
    }
    None
}

fn parse_range(arg: &str, pattern: &str, position: usize) -> Result<Segment> {
    let inner = &pattern[1..pattern.len() - 1];
    let tokens: Vec<&str> = inner.split(ELLIPSIS).collect();
    if tokens.len() != 2 {
        return Err(Error::Validation(format!(
            "{}: invalid ellipsis {} at {}",
            arg, pattern, position
        )));
    }

    let (start, start_alpha) = parse_bound(tokens[0]).ok_or_else(|| {
        Error::Validation(format!(
            "{}: invalid start value '{}' in ellipsis {} at {}",
            arg, tokens[0], pattern, position
        ))
    })?;
    let (end, end_alpha) = parse_bound(tokens[1]).ok_or_else(|| {
        Error::Validation(format!(
            "{}: invalid end value '{}' in ellipsis {} at {}",
            arg, tokens[1], pattern, position
        ))
    })?;

    if start_alpha != end_alpha {
        return Err(Error::Validation(format!(
            "{}: invalid ellipsis {} at {}; start/end must be same kind",
            arg, pattern, position
        )));
    }

    Ok(Segment::Range {
        start: start.min(end),
        end: start.max(end),
        alpha: start_alpha,
    })
}

fn parse(arg: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut literal_start = 0;
    let mut open: Option<usize> = None;

    for (i, c) in arg.char_indices() {
        match c {
            '{' => {
                if open.is_some() {
                    return Err(Error::Validation(format!(
                        "{}: nested ellipsis pattern at {}",
                        arg,
                        i + 1
                    )));
                }
                if literal_start < i {
                    segments.push(Segment::Literal(arg[literal_start..i].to_string()));
                }
                open = Some(i);
            }
            '}' => {
                let start = open.take().ok_or_else(|| {
                    Error::Validation(format!("{}: invalid ellipsis pattern at {}", arg, i + 1))
                })?;
                segments.push(parse_range(arg, &arg[start..=i], start)?);
                literal_start = i + 1;
            }
            _ => {}
        }
    }

    if let Some(start) = open {
        return Err(Error::Validation(format!(
            "{}: unterminated ellipsis pattern at {}",
            arg,
            start + 1
        )));
    }
    if literal_start < arg.len() {
        segments.push(Segment::Literal(arg[literal_start..].to_string()));
    }
    Ok(segments)
}

/// Expand every ellipsis group in `arg`; plain strings expand to themselves
pub fn expand(arg: &str) -> Result<Vec<String>> {
    let segments = parse(arg)?;
    let total = segments
        .iter()
        .try_fold(1u64, |acc, segment| acc.checked_mul(segment.len()))
        .filter(|total| *total <= MAX_EXPANSION);
    if total.is_none() {
        return Err(Error::Validation(format!(
            "{}: ellipsis expands to more than {} values",
            arg, MAX_EXPANSION
        )));
    }

    let mut results = vec![String::new()];
    for segment in &segments {
        let values = segment.values();
        results = results
            .iter()
            .flat_map(|prefix| values.iter().map(move |v| format!("{}{}", prefix, v)))
            .collect();
    }
    Ok(results)
}

/// Check whether `arg` contains an ellipsis group
pub fn has_ellipsis(arg: &str) -> bool {
    arg.contains('{') && arg.contains(ELLIPSIS) && arg.contains('}')
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_expand_numeric_and_alpha() {
        assert_eq!(
            expand("node-{1...4}").unwrap(),
            strings(&["node-1", "node-2", "node-3", "node-4"])
        );
        assert_eq!(expand("sd{a...c}").unwrap(), strings(&["sda", "sdb", "sdc"]));
        assert_eq!(expand("{f...c}").unwrap(), strings(&["c", "d", "e", "f"]));
        assert_eq!(
            expand("{az...bc}").unwrap(),
            strings(&["az", "ba", "bb", "bc"])
        );
        assert_eq!(
            expand("a{12...14}x").unwrap(),
            strings(&["a12x", "a13x", "a14x"])
        );
        assert_eq!(expand("abc").unwrap(), strings(&["abc"]));
    }

    #[test]
    fn test_expand_cartesian_product() {
        let result = expand("x{a...c}y{1...2}").unwrap();
        assert_eq!(result.len(), 6);
        assert_eq!(
            result,
            strings(&["xay1", "xay2", "xby1", "xby2", "xcy1", "xcy2"])
        );

        let nvme = expand("nvmen{1...2}p{1...2}").unwrap();
        assert_eq!(
            nvme,
            strings(&["nvmen1p1", "nvmen1p2", "nvmen2p1", "nvmen2p2"])
        );
    }

    #[test]
    fn test_malformed_patterns() {
        for pattern in [
            "xvd{b...}",
            "{...b}z",
            "a{a.c}p",
            "a{a..c}p",
            "a{a....c}p",
            "{123}",
            "{a...{a...z}}",
            "1}ccc{sss}",
            "{11...az}",
            "{a...0}",
            "{a0...z}",
            "sd{a...c",
        ] {
            assert_matches!(expand(pattern), Err(Error::Validation(_)), "{}", pattern);
        }
    }

    #[test]
    fn test_expansion_limit() {
        assert_matches!(
            expand("sd{a...z}{1...99999}"),
            Err(Error::Validation(msg)) if msg.contains("more than 10000")
        );
        assert_matches!(expand("{0...18446744073709551615}"), Err(Error::Validation(_)));
        assert_eq!(expand("{1...10000}").unwrap().len(), 10_000);
    }

    #[test]
    fn test_alpha_conversion() {
        assert_eq!(alpha_to_int("a"), 1);
        assert_eq!(alpha_to_int("z"), 26);
        assert_eq!(alpha_to_int("aa"), 27);
        assert_eq!(int_to_alpha(52), "az");
        assert_eq!(int_to_alpha(53), "ba");
        assert!(has_ellipsis("sd{a...f}"));
        assert!(!has_ellipsis("sda"));
    }
}
