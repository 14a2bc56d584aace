use std::borrow::Cow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternError {
    EmptyInput,
    EscapesProjectRoot,
    Absolute,
    ResolvesToProjectRoot,
}

impl std::fmt::Display for PatternError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyInput => write!(f, "pattern cannot be empty"),
            Self::EscapesProjectRoot => {
                write!(f, "pattern traversal escapes above the project root")
            }
            Self::Absolute => write!(f, "pattern must be project-relative, not absolute"),
            Self::ResolvesToProjectRoot => {
                write!(f, "pattern resolves to the project root; use '**' explicitly")
            }
        }
    }
}

impl std::error::Error for PatternError {}

/// One `/`-separated piece of a parsed pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    /// A single segment containing `*`, `?` or a `[...]` class.
    Wildcard(String),
    /// `**`: zero or more whole segments.
    MatchRest,
}

impl Segment {
    fn classify(raw: &str) -> Self {
        if raw == "**" {
            Self::MatchRest
        } else if raw.contains(['*', '?', '[']) {
            Self::Wildcard(raw.to_string())
        } else {
            Self::Literal(raw.to_string())
        }
    }
}

/// A normalized, project-relative path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    text: String,
    segments: Vec<Segment>,
}

impl Pattern {
    /// Normalize and parse a pattern.
    ///
    /// - trim surrounding whitespace
    /// - normalize separators to '/'
    /// - collapse duplicate separators and repeated `**`
    /// - resolve '.' and '..' lexically, rejecting escape above the root
    /// - reject absolute paths
    /// - a trailing '/' marks a directory and reserves everything below it
    pub fn parse(input: &str) -> Result<Self, PatternError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(PatternError::EmptyInput);
        }

        let normalized = normalize_separators(input);
        if normalized.starts_with('/') || has_windows_drive_prefix(&normalized) {
            return Err(PatternError::Absolute);
        }
        let directory = normalized.ends_with('/');

        let mut raw: Vec<&str> = Vec::new();
        for segment in normalized.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    if raw.pop().is_none() {
                        return Err(PatternError::EscapesProjectRoot);
                    }
                }
                "**" if raw.last() == Some(&"**") => {}
                other => raw.push(other),
            }
        }

        if raw.is_empty() {
            return Err(PatternError::ResolvesToProjectRoot);
        }
        if directory && raw.last() != Some(&"**") {
            raw.push("**");
        }

        Ok(Self {
            text: raw.join("/"),
            segments: raw.into_iter().map(Segment::classify).collect(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_literal(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s, Segment::Literal(_)))
    }

    pub fn overlaps(&self, other: &Pattern) -> bool {
        patterns_overlap(self, other)
    }
}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

impl std::str::FromStr for Pattern {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Canonical text form of a pattern.
pub fn normalize_pattern(input: &str) -> Result<String, PatternError> {
    Pattern::parse(input).map(|p| p.text)
}

/// Whether some concrete path could be selected by both patterns.
///
/// Table over suffix pairs: `fits[i][j]` says `a[i..]` and `b[j..]` can
/// match a common path. Wildcard-vs-wildcard is conservative, so this never
/// answers `false` for patterns that share a path.
pub fn patterns_overlap(a: &Pattern, b: &Pattern) -> bool {
    let (a, b) = (a.segments(), b.segments());
    let (n, m) = (a.len(), b.len());
    let mut fits = vec![vec![false; m + 1]; n + 1];

    for i in (0..=n).rev() {
        for j in (0..=m).rev() {
            fits[i][j] = match (a.get(i), b.get(j)) {
                (None, None) => true,
                (Some(Segment::MatchRest), _) => fits[i + 1][j] || (j < m && fits[i][j + 1]),
                (_, Some(Segment::MatchRest)) => fits[i][j + 1] || (i < n && fits[i + 1][j]),
                (None, Some(_)) | (Some(_), None) => false,
                (Some(x), Some(y)) => segments_overlap(x, y) && fits[i + 1][j + 1],
            };
        }
    }
    fits[0][0]
}

fn segments_overlap(a: &Segment, b: &Segment) -> bool {
    match (a, b) {
        (Segment::Literal(x), Segment::Literal(y)) => fold(x) == fold(y),
        (Segment::Wildcard(g), Segment::Literal(l)) | (Segment::Literal(l), Segment::Wildcard(g)) => {
            glob_match(g, l)
        }
        (Segment::Wildcard(x), Segment::Wildcard(y)) => wildcards_compatible(x, y),
        (Segment::MatchRest, _) | (_, Segment::MatchRest) => true,
    }
}

/// Single-segment glob match supporting `*`, `?` and `[...]` classes.
fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = fold(pattern).chars().collect();
    let t: Vec<char> = fold(text).chars().collect();
    let (mut pi, mut ti) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        let advanced = match p.get(pi) {
            Some('*') => {
                star = Some((pi, ti));
                pi += 1;
                continue;
            }
            Some('?') => {
                pi += 1;
                true
            }
            Some('[') => match match_class(&p, pi, t[ti]) {
                Some((true, next)) => {
                    pi = next;
                    true
                }
                Some((false, _)) => false,
                None if t[ti] == '[' => {
                    pi += 1;
                    true
                }
                None => false,
            },
            Some(&c) if c == t[ti] => {
                pi += 1;
                true
            }
            _ => false,
        };

        if advanced {
            ti += 1;
        } else if let Some((star_pi, star_ti)) = star {
            pi = star_pi + 1;
            ti = star_ti + 1;
            star = Some((star_pi, star_ti + 1));
        } else {
            return false;
        }
    }

    p[pi..].iter().all(|&c| c == '*')
}

/// Returns `(matched, index after ']')`, or `None` for an unterminated class.
fn match_class(p: &[char], start: usize, ch: char) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negate = matches!(p.get(i), Some('!') | Some('^'));
    if negate {
        i += 1;
    }
    let first = i;
    let mut matched = false;
    while i < p.len() {
        if p[i] == ']' && i > first {
            return Some((matched != negate, i + 1));
        }
        if i + 2 < p.len() && p[i + 1] == '-' && p[i + 2] != ']' {
            if p[i] <= ch && ch <= p[i + 2] {
                matched = true;
            }
            i += 3;
        } else {
            if p[i] == ch {
                matched = true;
            }
            i += 1;
        }
    }
    None
}

/// Two wildcard segments can share a name unless their fixed heads or fixed
/// tails disagree.
fn wildcards_compatible(a: &str, b: &str) -> bool {
    let (a, b) = (fold(a), fold(b));
    let head = |s: &str| s.find(['*', '?', '[']).unwrap_or(s.len());
    let tail = |s: &str| s.rfind(['*', '?', ']']).map_or(0, |i| i + 1);

    let (ah, bh) = (&a[..head(&a)], &b[..head(&b)]);
    let (at, bt) = (&a[tail(&a)..], &b[tail(&b)..]);

    let heads_agree = ah.starts_with(bh) || bh.starts_with(ah);
    let tails_agree = at.ends_with(bt) || bt.ends_with(at);
    heads_agree && tails_agree
}

/// Flag patterns that reserve far more than an agent usually means to.
pub fn suspicious_pattern(pattern: &Pattern) -> Option<String> {
    let text = pattern.as_str();
    if matches!(text, "*" | "**" | "**/*") {
        return Some(format!(
            "pattern '{text}' reserves the entire project; prefer something like 'src/api/*.py'"
        ));
    }
    if text.len() <= 2 && text.contains('*') {
        return Some(format!(
            "pattern '{text}' is very short and may match more files than intended"
        ));
    }
    None
}

fn fold(s: &str) -> Cow<'_, str> {
    if cfg!(windows) {
        Cow::Owned(s.to_ascii_lowercase())
    } else {
        Cow::Borrowed(s)
    }
}

fn normalize_separators(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut prev_sep = false;

    for ch in input.chars() {
        let is_sep = ch == '/' || ch == '\\';
        if is_sep {
            if !prev_sep {
                out.push('/');
            }
            prev_sep = true;
        } else {
            out.push(ch);
            prev_sep = false;
        }
    }

    out
}

fn has_windows_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> Pattern {
        Pattern::parse(s).unwrap()
    }

    fn overlap(a: &str, b: &str) -> bool {
        let (a, b) = (p(a), p(b));
        let forward = patterns_overlap(&a, &b);
        assert_eq!(
            forward,
            patterns_overlap(&b, &a),
            "overlap must be symmetric for {a} / {b}"
        );
        forward
    }

    #[test]
    fn normalizes_like_repo_relative_paths() {
        assert_eq!(normalize_pattern("src/./store/mesh.rs").unwrap(), "src/store/mesh.rs");
        assert_eq!(normalize_pattern("./src/store/").unwrap(), "src/store/**");
        assert_eq!(normalize_pattern("src\\store\\*.rs").unwrap(), "src/store/*.rs");
        assert_eq!(normalize_pattern("src//a/../b.rs").unwrap(), "src/b.rs");
        assert_eq!(normalize_pattern("src/**/**/x.rs").unwrap(), "src/**/x.rs");
        assert_eq!(normalize_pattern("src/**/").unwrap(), "src/**");
    }

    #[test]
    fn rejects_invalid_inputs() {
        assert_eq!(Pattern::parse("  ").unwrap_err(), PatternError::EmptyInput);
        assert_eq!(
            Pattern::parse("../x").unwrap_err(),
            PatternError::EscapesProjectRoot
        );
        assert_eq!(Pattern::parse("/etc/passwd").unwrap_err(), PatternError::Absolute);
        assert_eq!(Pattern::parse("C:\\src").unwrap_err(), PatternError::Absolute);
        assert_eq!(
            Pattern::parse("src/..").unwrap_err(),
            PatternError::ResolvesToProjectRoot
        );
    }

    #[test]
    fn classifies_segments() {
        let pat = p("src/**/*.py");
        assert_eq!(
            pat.segments(),
            &[
                Segment::Literal("src".into()),
                Segment::MatchRest,
                Segment::Wildcard("*.py".into()),
            ]
        );
        assert!(!pat.is_literal());
        assert!(p("src/app.py").is_literal());
    }

    #[test]
    fn literal_vs_literal() {
        assert!(overlap("src/app.py", "src/app.py"));
        assert!(!overlap("src/app.py", "src/lib.py"));
        assert!(!overlap("src/app.py", "src/app.py/inner"));
    }

    #[test]
    fn wildcard_vs_literal() {
        assert!(overlap("a/*.py", "a/main.py"));
        assert!(!overlap("a/*.py", "a/readme.md"));
        assert!(!overlap("a/*.py", "a/b/main.py"));
        assert!(overlap("a/?.rs", "a/x.rs"));
        assert!(!overlap("a/?.rs", "a/xy.rs"));
        assert!(overlap("a/[abc].rs", "a/b.rs"));
        assert!(!overlap("a/[!abc].rs", "a/b.rs"));
        assert!(overlap("a/[a-c]*.rs", "a/cat.rs"));
    }

    #[test]
    fn wildcard_vs_wildcard() {
        assert!(overlap("a/*.py", "a/*.py"));
        assert!(overlap("a/test_*", "a/*.py"));
        assert!(!overlap("a/*.py", "a/*.md"));
        assert!(!overlap("a/foo*", "a/bar*"));
        assert!(overlap("a/*", "a/?.md"));
    }

    #[test]
    fn match_rest_absorbs_segments() {
        assert!(overlap("src/**/*.py", "src/app.py"));
        assert!(overlap("src/**/*.py", "src/deep/er/app.py"));
        assert!(!overlap("src/**/*.py", "docs/app.py"));
        assert!(!overlap("src/**/*.py", "src/app.rs"));
        assert!(overlap("src/**", "src/anything/at/all"));
        assert!(overlap("src/**", "src/*.rs"));
        assert!(overlap("**/*.md", "docs/guide/intro.md"));
        assert!(overlap("src/**/mod.rs", "src/**/*.rs"));
        assert!(!overlap("src/**/mod.rs", "lib/**/*.rs"));
    }

    #[test]
    fn trailing_slash_reserves_directory_contents() {
        assert!(overlap("src/store/", "src/store/mesh.rs"));
        assert!(overlap("src/store/", "src/store/a/b.rs"));
        assert!(!overlap("src/store/", "src/storehouse/file.rs"));
    }

    #[test]
    fn different_depths_do_not_overlap_without_match_rest() {
        assert!(!overlap("src/store", "src/store/mesh.rs"));
        assert!(!overlap("*/*", "a"));
        assert!(overlap("*/*", "a/b"));
    }

    #[test]
    fn unterminated_class_is_literal_bracket() {
        assert!(overlap("a/[x", "a/[x"));
        assert!(!overlap("a/[x", "a/x"));
    }

    #[test]
    fn case_rules_follow_platform() {
        if cfg!(windows) {
            assert!(overlap("SRC/App.py", "src/app.py"));
        } else {
            assert!(!overlap("SRC/App.py", "src/app.py"));
        }
    }

    #[test]
    fn suspicious_patterns_are_flagged() {
        assert!(suspicious_pattern(&p("**")).is_some());
        assert!(suspicious_pattern(&p("**/*")).is_some());
        assert!(suspicious_pattern(&p("*")).is_some());
        assert!(suspicious_pattern(&p("a*")).is_some());
        assert!(suspicious_pattern(&p("src/api/*.py")).is_none());
    }
}
