use crate::ConfigError;

/// A compiled glob over hostnames
///
/// Supported syntax:
/// - `*` matches any run of characters, dots included
/// - `?` matches exactly one character
/// - `[abc]`, `[a-z]`, `[!a-z]` match one character from (or not from) a class
///
/// Matching is ASCII case-insensitive since hostnames are.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainGlob {
    source: String,
    tokens: Vec<Token>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(char),
    AnyRun,
    AnyOne,
    Class { negated: bool, ranges: Vec<(char, char)> },
}

impl DomainGlob {
    /// Compiles a glob pattern
    ///
    /// # Errors
    ///
    /// `ConfigError::InvalidPattern` for an empty pattern, an unterminated or
    /// empty character class, or a reversed range such as `[z-a]`.
    pub fn parse(pattern: &str) -> Result<Self, ConfigError> {
        if pattern.is_empty() {
            return Err(ConfigError::InvalidPattern(
                "Domain glob cannot be empty".to_string(),
            ));
        }

        let lowered = pattern.to_ascii_lowercase();
        let chars: Vec<char> = lowered.chars().collect();
        let mut tokens = Vec::new();
        let mut i = 0;

        while i < chars.len() {
            match chars[i] {
                '*' => {
                    // Consecutive stars are equivalent to one
                    if tokens.last() != Some(&Token::AnyRun) {
                        tokens.push(Token::AnyRun);
                    }
                    i += 1;
                }
                '?' => {
                    tokens.push(Token::AnyOne);
                    i += 1;
                }
                '[' => {
                    let (token, next) = parse_class(&chars, i, pattern)?;
                    tokens.push(token);
                    i = next;
                }
                c => {
                    tokens.push(Token::Literal(c));
                    i += 1;
                }
            }
        }

        Ok(Self {
            source: pattern.to_string(),
            tokens,
        })
    }

    /// The pattern this glob was compiled from
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Returns true if `host` matches the whole pattern
    pub fn matches(&self, host: &str) -> bool {
        let host: Vec<char> = host.to_ascii_lowercase().chars().collect();
        match_tokens(&self.tokens, &host)
    }
}

/// Parses a `[...]` class starting at `start`; returns the token and the
/// index just past the closing bracket
fn parse_class(chars: &[char], start: usize, pattern: &str) -> Result<(Token, usize), ConfigError> {
    let mut i = start + 1;
    let negated = matches!(chars.get(i), Some('!') | Some('^'));
    if negated {
        i += 1;
    }

    let mut ranges = Vec::new();
    while i < chars.len() && chars[i] != ']' {
        let lo = chars[i];
        if chars.get(i + 1) == Some(&'-') && chars.get(i + 2).map_or(false, |c| *c != ']') {
            let hi = chars[i + 2];
            if hi < lo {
                return Err(ConfigError::InvalidPattern(format!(
                    "Reversed range '{}-{}' in glob '{}'",
                    lo, hi, pattern
                )));
            }
            ranges.push((lo, hi));
            i += 3;
        } else {
            ranges.push((lo, lo));
            i += 1;
        }
    }

    if i >= chars.len() {
        return Err(ConfigError::InvalidPattern(format!(
            "Unterminated character class in glob '{}'",
            pattern
        )));
    }
    if ranges.is_empty() {
        return Err(ConfigError::InvalidPattern(format!(
            "Empty character class in glob '{}'",
            pattern
        )));
    }

    Ok((Token::Class { negated, ranges }, i + 1))
}

/// Iterative wildcard matching with single-star backtracking
fn match_tokens(tokens: &[Token], text: &[char]) -> bool {
    let (mut t, mut s) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while s < text.len() {
        match tokens.get(t) {
            Some(Token::AnyRun) => {
                star = Some((t, s));
                t += 1;
            }
            Some(token) if single_matches(token, text[s]) => {
                t += 1;
                s += 1;
            }
            _ => match star {
                Some((star_t, star_s)) => {
                    t = star_t + 1;
                    s = star_s + 1;
                    star = Some((star_t, star_s + 1));
                }
                None => return false,
            },
        }
    }

    tokens[t..].iter().all(|token| *token == Token::AnyRun)
}

fn single_matches(token: &Token, c: char) -> bool {
    match token {
        Token::Literal(l) => *l == c,
        Token::AnyOne => true,
        Token::Class { negated, ranges } => {
            let hit = ranges.iter().any(|(lo, hi)| *lo <= c && c <= *hi);
            hit != *negated
        }
        Token::AnyRun => false,
    }
}

/// Checks if a host matches a glob pattern
///
/// An invalid pattern matches nothing.
///
/// # Examples
///
/// ```
/// use swarm_crawl::url::glob_match;
///
/// assert!(glob_match("*", "anything.example"));
/// assert!(glob_match("*.jd.*", "sclub.jd.com"));
/// assert!(!glob_match("*.jd.*", "jd.com"));
/// assert!(glob_match("api?.example.com", "api2.example.com"));
/// ```
pub fn glob_match(pattern: &str, host: &str) -> bool {
    DomainGlob::parse(pattern).map_or(false, |glob| glob.matches(host))
}
