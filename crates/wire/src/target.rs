//! Target expression evaluation.
//!
//! A minion evaluates a `(target_kind, target_expr)` pair against its own
//! [`IdentityFacts`] to decide whether a publish applies to it. This is the
//! minimal slice of the pillar/grains subsystem this core needs — just
//! enough matching to make the routing invariants in the spec testable.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::message::TargetKind;

/// The identity facts a minion matches target expressions against.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityFacts {
    pub id: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub attrs: BTreeMap<String, String>,
}

impl IdentityFacts {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), roles: Vec::new(), attrs: BTreeMap::new() }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }
}

/// Evaluate a target expression against a minion's identity facts.
pub fn matches(kind: TargetKind, expr: &str, facts: &IdentityFacts) -> bool {
    match kind {
        TargetKind::Glob => glob_match(expr, &facts.id),
        TargetKind::List => list_match(expr, &facts.id),
        TargetKind::Grain => grain_match(expr, facts),
        TargetKind::Compound => compound_match(expr, facts),
    }
}

/// Shell-style glob match supporting `*` (any run of characters) and `?`
/// (exactly one character). No character classes — this core does not need
/// them.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pat: Vec<char> = pattern.chars().collect();
    let txt: Vec<char> = text.chars().collect();
    glob_match_inner(&pat, &txt)
}

fn glob_match_inner(pat: &[char], txt: &[char]) -> bool {
    match pat.first() {
        None => txt.is_empty(),
        Some('*') => {
            glob_match_inner(&pat[1..], txt)
                || (!txt.is_empty() && glob_match_inner(pat, &txt[1..]))
        }
        Some('?') => !txt.is_empty() && glob_match_inner(&pat[1..], &txt[1..]),
        Some(c) => txt.first() == Some(c) && glob_match_inner(&pat[1..], &txt[1..]),
    }
}

/// `L@` list match: comma-separated minion ids, exact membership.
fn list_match(expr: &str, id: &str) -> bool {
    expr.split(',').map(str::trim).any(|candidate| candidate == id)
}

/// `G@` grain match: `key:value` where `value` may itself be a glob
/// pattern. `key == "roles"` matches against any of the minion's roles
/// instead of a single `attrs` entry.
fn grain_match(expr: &str, facts: &IdentityFacts) -> bool {
    let Some((key, value_pattern)) = expr.split_once(':') else {
        return false;
    };
    if key == "roles" || key == "role" {
        return facts.roles.iter().any(|role| glob_match(value_pattern, role));
    }
    match facts.attrs.get(key) {
        Some(value) => glob_match(value_pattern, value),
        None => false,
    }
}

/// `compound` match: a left-to-right evaluated sequence of clauses joined
/// by `and` / `or`, each clause optionally prefixed with `not`, and typed
/// with one of:
///   - `G@key:value` — grain match
///   - `L@id1,id2`   — list match
///   - `P@pattern` or a bare pattern — glob match against the minion id
///
/// Example: `G@role:web* and not L@m3,m4`
fn compound_match(expr: &str, facts: &IdentityFacts) -> bool {
    let mut tokens = expr.split_whitespace().peekable();
    let mut result = match tokens.next() {
        Some(clause) => eval_clause(clause, &mut tokens, facts),
        None => return false,
    };

    loop {
        match tokens.next() {
            Some("and") => {
                let Some(clause) = tokens.next() else { break };
                result = result && eval_clause(clause, &mut tokens, facts);
            }
            Some("or") => {
                let Some(clause) = tokens.next() else { break };
                result = result || eval_clause(clause, &mut tokens, facts);
            }
            Some(_) | None => break,
        }
    }
    result
}

fn eval_clause<'a>(
    first: &'a str,
    tokens: &mut std::iter::Peekable<std::str::SplitWhitespace<'a>>,
    facts: &IdentityFacts,
) -> bool {
    let (negate, first) = match first {
        "not" => (true, tokens.next().unwrap_or("")),
        other => (false, other),
    };

    let value = if let Some(rest) = first.strip_prefix("G@") {
        grain_match(rest, facts)
    } else if let Some(rest) = first.strip_prefix("L@") {
        list_match(rest, &facts.id)
    } else if let Some(rest) = first.strip_prefix("P@") {
        glob_match(rest, &facts.id)
    } else {
        glob_match(first, &facts.id)
    };

    if negate {
        !value
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts() -> IdentityFacts {
        IdentityFacts::new("web-1").with_role("web").with_attr("dc", "us-east")
    }

    #[test]
    fn glob_matches_wildcard() {
        assert!(matches(TargetKind::Glob, "web-*", &facts()));
        assert!(matches(TargetKind::Glob, "*", &facts()));
        assert!(!matches(TargetKind::Glob, "db-*", &facts()));
    }

    #[test]
    fn list_matches_membership() {
        assert!(matches(TargetKind::List, "web-1,web-2", &facts()));
        assert!(!matches(TargetKind::List, "web-2,web-3", &facts()));
    }

    #[test]
    fn grain_matches_role_and_attr() {
        assert!(matches(TargetKind::Grain, "roles:web", &facts()));
        assert!(matches(TargetKind::Grain, "dc:us-*", &facts()));
        assert!(!matches(TargetKind::Grain, "dc:eu-*", &facts()));
    }

    #[test]
    fn compound_combines_clauses() {
        assert!(matches(TargetKind::Compound, "G@roles:web and P@web-*", &facts()));
        assert!(!matches(TargetKind::Compound, "G@roles:web and not P@web-*", &facts()));
        assert!(matches(TargetKind::Compound, "L@nope or G@dc:us-east", &facts()));
    }
}
