//! Pattern matcher (§4.1): match a path against one pattern, binding `$`
//! wildcards to path segments under one of three recursion behaviours.

/// Mode governing how much of the path must be consumed (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// The whole path must be consumed by the whole pattern.
    Exact,
    /// A prefix match is accepted; used to drive iteration.
    Partial,
}

/// Result of matching a pattern against a path.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Bound wildcard values, in pattern-field order. Shorter than the
    /// pattern's field count during partial/iterative matching.
    pub values: Vec<String>,
    /// Index into `pattern` up to which matching consumed (byte offset).
    pub pat_consumed: usize,
    /// Index into `path` up to which matching consumed (byte offset).
    pub path_consumed: usize,
    /// Set only for a failed `Exact` match where the pattern was fully
    /// consumed but the path had trailing segments left over — the
    /// `InvalidKey("Key continues past the matched pattern")` case of
    /// §4.3, distinct from "no map matched at all".
    pub exceeded: bool,
}

impl MatchResult {
    fn none() -> Self {
        MatchResult {
            matched: false,
            values: Vec::new(),
            pat_consumed: 0,
            path_consumed: 0,
            exceeded: false,
        }
    }
}

/// Number of `$` wildcards appearing in `pattern`.
pub fn field_count(pattern: &str) -> usize {
    pattern.bytes().filter(|b| *b == b'$').count()
}

/// Walk `pattern` and `path` jointly, binding `$` to path segments.
///
/// `recurse = false` additionally constrains **Partial** matches: a prefix
/// match only succeeds if the unconsumed pattern tail holds at most one
/// more `$` with no intervening `/` (so iteration stays one level deep).
pub fn match_pattern(pattern: &str, path: &str, mode: MatchMode, recurse: bool) -> MatchResult {
    let pat = pattern.as_bytes();
    let pth = path.as_bytes();
    let mut pi = 0usize;
    let mut xi = 0usize;
    let mut values = Vec::new();

    while pi < pat.len() {
        match pat[pi] {
            b'$' => {
                let seg_start = xi;
                while xi < pth.len() && pth[xi] != b'/' {
                    xi += 1;
                }
                values.push(path[seg_start..xi].to_string());
                pi += 1;
            }
            c => {
                if xi < pth.len() && pth[xi] == c {
                    pi += 1;
                    xi += 1;
                } else {
                    return MatchResult::none();
                }
            }
        }

        if mode == MatchMode::Partial && xi >= pth.len() && pi < pat.len() {
            // Path exhausted mid-pattern: only a boundary at '/' (or end)
            // counts as a usable prefix.
            if pi == pat.len() || pat[pi] == b'/' || pat.get(pi) == Some(&b'$') {
                return finish_partial(pattern, pat, pi, xi, values, recurse);
            }
        }
    }

    if pi == pat.len() {
        if xi == pth.len() {
            return MatchResult {
                matched: true,
                values,
                pat_consumed: pi,
                path_consumed: xi,
                exceeded: false,
            };
        }
        if mode == MatchMode::Partial {
            return finish_partial(pattern, pat, pi, xi, values, recurse);
        }
        // Exact mode: pattern fully consumed but path has trailing
        // segments left over (§4.3's "Key continues past the matched
        // pattern").
        return MatchResult {
            matched: false,
            values,
            pat_consumed: pi,
            path_consumed: xi,
            exceeded: true,
        };
    }

    MatchResult::none()
}

/// Implements the Partial-mode acceptance rule from §4.1: either the
/// consumed pattern prefix ends at a `/` boundary, or (when recursion is
/// disabled) at most one `$` remains with no intervening `/`.
fn finish_partial(
    pattern: &str,
    pat: &[u8],
    pi: usize,
    xi: usize,
    values: Vec<String>,
    recurse: bool,
) -> MatchResult {
    let at_boundary = pi == pat.len() || pat.get(pi) == Some(&b'/');
    let tail = &pattern[pi..];

    let ok = if at_boundary {
        true
    } else if !recurse {
        let dollars_before_slash = {
            let up_to_slash = tail.split('/').next().unwrap_or("");
            up_to_slash.bytes().filter(|b| *b == b'$').count()
        };
        tail.bytes().filter(|b| *b == b'/').count() == 0 && dollars_before_slash <= 1
    } else {
        false
    };

    if !ok {
        return MatchResult::none();
    }

    // Trailing '/' on the final bound value is stripped (§4.1).
    let mut values = values;
    if let Some(last) = values.last_mut() {
        while last.ends_with('/') {
            last.pop();
        }
    }

    MatchResult {
        matched: true,
        values,
        pat_consumed: pi,
        path_consumed: xi,
        exceeded: false,
    }
}

/// Reconstruct a key string by substituting `$` occurrences in `pattern`
/// with `values`, used both by `match(Exact)`'s invariant (§8.1) and by the
/// iteration engine's row -> key step (§4.8 step 3).
pub fn substitute(pattern: &str, values: &[String]) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut vi = 0;
    for ch in pattern.chars() {
        if ch == '$' {
            if let Some(v) = values.get(vi) {
                out.push_str(v);
            }
            vi += 1;
        } else {
            out.push(ch);
        }
    }
    out
}
