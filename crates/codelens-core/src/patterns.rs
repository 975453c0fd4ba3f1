//! Heuristics classifier.
//!
//! A pure function from `(chunk, file path)` to `(purpose, domain-tags,
//! pattern-tags)`. Rules are table-driven: each rule is a predicate plus an
//! output plus a confidence. The highest-confidence matching predicate wins
//! the chunk's single `purpose`; every matching predicate contributes to the
//! additive tag sets.

use std::collections::BTreeSet;

use crate::types::{Chunk, ChunkKind};

/// Result of classifying one chunk.
#[derive(Debug, Clone, Default)]
pub struct Classification {
    /// Highest-confidence purpose tag.
    pub purpose: String,
    /// Additive domain tags.
    pub domain_tags: BTreeSet<String>,
    /// Additive pattern tags.
    pub pattern_tags: BTreeSet<String>,
}

/// A single classification rule: a predicate over the chunk and its path,
/// an output tag, and a confidence used to break ties between purposes.
struct Rule {
    predicate: fn(&Chunk) -> bool,
    purpose: Option<&'static str>,
    domain: Option<&'static str>,
    pattern: Option<&'static str>,
    confidence: f64,
}

/// The default rule table. `purpose` rules compete on confidence; `domain`
/// and `pattern` rules are additive regardless of which purpose wins.
fn rule_table() -> &'static [Rule] {
    &[
        Rule {
            predicate: |c| c.name.starts_with("use") && c.syntax_kind.is_function_like(),
            purpose: Some("react-hook"),
            domain: None,
            pattern: Some("react-hooks"),
            confidence: 0.9,
        },
        Rule {
            predicate: |c| c.syntax_kind.is_function_like() && references_jsx(&c.code),
            purpose: Some("ui-component"),
            domain: None,
            pattern: None,
            confidence: 0.85,
        },
        Rule {
            predicate: |c| contains_word_any(&c.name, &["get", "fetch"]),
            purpose: Some("data-retrieval"),
            domain: None,
            pattern: None,
            confidence: 0.7,
        },
        Rule {
            predicate: |c| contains_word_any(&c.name, &["create", "add"]),
            purpose: Some("data-creation"),
            domain: None,
            pattern: None,
            confidence: 0.7,
        },
        Rule {
            predicate: |c| contains_word_any(&c.name, &["update", "edit"]),
            purpose: Some("data-modification"),
            domain: None,
            pattern: None,
            confidence: 0.7,
        },
        Rule {
            predicate: |c| contains_word_any(&c.name, &["delete", "remove"]),
            purpose: Some("data-deletion"),
            domain: None,
            pattern: None,
            confidence: 0.7,
        },
        Rule {
            predicate: |c| contains_word_any(&c.name, &["validate", "check"]),
            purpose: Some("validation"),
            domain: None,
            pattern: None,
            confidence: 0.65,
        },
        Rule {
            predicate: |c| contains_word_any(&c.name, &["parse", "format"]),
            purpose: Some("data-processing"),
            domain: None,
            pattern: None,
            confidence: 0.65,
        },
        Rule {
            predicate: |c| path_contains(&c.file, "components"),
            purpose: Some("ui-component"),
            domain: Some("user_interface"),
            pattern: None,
            confidence: 0.6,
        },
        Rule {
            predicate: |c| path_contains(&c.file, "api") || path_contains(&c.file, "routes"),
            purpose: Some("api-handler"),
            domain: Some("api_networking"),
            pattern: Some("http-requests"),
            confidence: 0.6,
        },
        Rule {
            predicate: |c| {
                path_contains(&c.file, "auth") || mentions_any(&c.code, &["token", "jwt", "password"])
            },
            purpose: None,
            domain: Some("authentication"),
            pattern: None,
            confidence: 0.5,
        },
        Rule {
            predicate: |c| c.is_async || mentions_any(&c.code, &["await", "async"]),
            purpose: None,
            domain: None,
            pattern: Some("async-operations"),
            confidence: 0.0,
        },
        Rule {
            predicate: |c| {
                mentions_any(&c.code, &["try", "catch", "except", "Result<", "Err(", ".unwrap()"])
            },
            purpose: None,
            domain: None,
            pattern: Some("error-handling"),
            confidence: 0.0,
        },
        Rule {
            predicate: |c| matches!(c.syntax_kind, ChunkKind::Class | ChunkKind::Struct | ChunkKind::Impl),
            purpose: None,
            domain: None,
            pattern: Some("object-oriented"),
            confidence: 0.0,
        },
        Rule {
            predicate: |c| c.syntax_kind.is_function_like() && !mentions_any(&c.code, &["this.", "self."]),
            purpose: None,
            domain: None,
            pattern: Some("functional-programming"),
            confidence: 0.0,
        },
        Rule {
            predicate: |c| mentions_any(&c.code, &[": string", ": number", ": boolean", "interface ", "type "])
                && c.code.contains(':'),
            purpose: None,
            domain: None,
            pattern: Some("static-typing"),
            confidence: 0.0,
        },
    ]
}

/// Classify a chunk. Always returns a non-empty purpose (falls back to
/// `utility-function` when no rule matches, satisfying invariant 1 of the
/// data model: every chunk has at least one purpose tag).
pub fn classify(chunk: &Chunk) -> Classification {
    let mut best_purpose: Option<(&'static str, f64)> = None;
    let mut domain_tags = BTreeSet::new();
    let mut pattern_tags = BTreeSet::new();

    for rule in rule_table() {
        if !(rule.predicate)(chunk) {
            continue;
        }
        if let Some(purpose) = rule.purpose {
            let better = match best_purpose {
                Some((_, confidence)) => rule.confidence > confidence,
                None => true,
            };
            if better {
                best_purpose = Some((purpose, rule.confidence));
            }
        }
        if let Some(domain) = rule.domain {
            domain_tags.insert(domain.to_string());
        }
        if let Some(pattern) = rule.pattern {
            pattern_tags.insert(pattern.to_string());
        }
    }

    Classification {
        purpose: best_purpose.map(|(p, _)| p.to_string()).unwrap_or_else(|| "utility-function".to_string()),
        domain_tags,
        pattern_tags,
    }
}

fn path_contains(path: &str, segment: &str) -> bool {
    path.split(['/', '\\']).any(|s| s.eq_ignore_ascii_case(segment))
}

fn mentions_any(code: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| code.contains(n))
}

fn references_jsx(code: &str) -> bool {
    code.contains("</") || code.contains("/>") || code.contains("React.") || code.contains("jsx(")
}

/// True if `name`, split on case/underscore boundaries, contains any of `words`
/// as a whole segment (word-boundary matching, not substring matching).
fn contains_word_any(name: &str, words: &[&str]) -> bool {
    let segments = split_identifier(name);
    segments.iter().any(|seg| words.iter().any(|w| seg.eq_ignore_ascii_case(w)))
}

/// Split a camelCase/PascalCase/snake_case identifier into lowercase segments.
fn split_identifier(name: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;

    for ch in name.chars() {
        if ch == '_' || ch == '-' {
            if !current.is_empty() {
                segments.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if ch.is_uppercase() && prev_lower {
            segments.push(std::mem::take(&mut current));
        }
        current.push(ch.to_ascii_lowercase());
        prev_lower = ch.is_lowercase() || ch.is_numeric();
    }
    if !current.is_empty() {
        segments.push(current);
    }
    segments
}

/// Count branch/loop/error-handling/short-circuit tokens in `code`, using
/// word-boundary matching for keywords and literal matching for operators.
/// The raw complexity score is this count plus one.
pub fn complexity_score(code: &str) -> u32 {
    const KEYWORDS: &[&str] = &[
        "if", "else", "for", "while", "loop", "match", "switch", "case", "catch", "except", "try",
        "rescue", "elif", "unless",
    ];
    const OPERATORS: &[&str] = &["&&", "||", "?."];

    let mut count = 0u32;
    for word in KEYWORDS {
        count += count_word_boundary(code, word);
    }
    for op in OPERATORS {
        count += code.matches(op).count() as u32;
    }

    count + 1
}

/// Count occurrences of `word` in `code` where both edges are word boundaries
/// (not preceded/followed by an identifier character).
fn count_word_boundary(code: &str, word: &str) -> u32 {
    let bytes = code.as_bytes();
    let wlen = word.len();
    if wlen == 0 {
        return 0;
    }
    let mut count = 0u32;
    let mut start = 0;
    while let Some(pos) = code[start..].find(word) {
        let idx = start + pos;
        let before_ok = idx == 0 || !is_ident_byte(bytes[idx - 1]);
        let after_idx = idx + wlen;
        let after_ok = after_idx >= bytes.len() || !is_ident_byte(bytes[after_idx]);
        if before_ok && after_ok {
            count += 1;
        }
        start = idx + wlen;
        if start >= code.len() {
            break;
        }
    }
    count
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ComplexityLevel;

    fn base_chunk(name: &str, file: &str, code: &str) -> Chunk {
        Chunk {
            id: Chunk::build_id(file, name, 1),
            name: name.to_string(),
            file: file.to_string(),
            start_line: 1,
            end_line: 2,
            syntax_kind: ChunkKind::Function,
            code: code.to_string(),
            exported: true,
            is_async: false,
            imports_referenced: Vec::new(),
            purpose: String::new(),
            domain_tags: BTreeSet::new(),
            pattern_tags: BTreeSet::new(),
            complexity_score: 0,
            complexity_level: ComplexityLevel::Low,
            embedding: None,
            bundles: BTreeSet::new(),
        }
    }

    #[test]
    fn test_fetch_name_classifies_as_data_retrieval() {
        let chunk = base_chunk("fetchUser", "src/api/user.ts", "function fetchUser() {}");
        let classification = classify(&chunk);
        assert_eq!(classification.purpose, "data-retrieval");
        assert!(classification.domain_tags.contains("api_networking"));
        assert!(classification.pattern_tags.contains("http-requests"));
    }

    #[test]
    fn test_use_prefixed_function_is_react_hook() {
        let chunk = base_chunk("useCounter", "src/hooks/useCounter.ts", "function useCounter() {}");
        let classification = classify(&chunk);
        assert_eq!(classification.purpose, "react-hook");
        assert!(classification.pattern_tags.contains("react-hooks"));
    }

    #[test]
    fn test_unmatched_chunk_falls_back_to_utility() {
        let chunk = base_chunk("tick", "src/lib.rs", "fn tick() {}");
        let classification = classify(&chunk);
        assert_eq!(classification.purpose, "utility-function");
    }

    #[test]
    fn test_auth_path_sets_domain_without_purpose_conflict() {
        let chunk = base_chunk("checkSession", "src/auth/session.ts", "fn checkSession() {}");
        let classification = classify(&chunk);
        assert_eq!(classification.purpose, "validation");
        assert!(classification.domain_tags.contains("authentication"));
    }

    #[test]
    fn test_word_boundary_does_not_match_substrings() {
        // "category" contains "cat" and "go" is not a keyword, but this
        // should not match "for" embedded in "format" as a keyword token.
        assert_eq!(count_word_boundary("format(x)", "for"), 0);
        assert_eq!(count_word_boundary("for x in y", "for"), 1);
    }

    #[test]
    fn test_complexity_score_counts_branches_plus_one() {
        let code = "if a { } else if b { } for x in y { } a && b";
        // if, else, if, for, && -> 5 tokens + 1
        assert_eq!(complexity_score(code), 6);
    }

    #[test]
    fn test_complexity_score_minimum_is_one() {
        assert_eq!(complexity_score("let x = 1;"), 1);
    }
}
