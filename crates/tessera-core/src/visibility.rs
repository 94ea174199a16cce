//! # Visibility & Authorization
//!
//! A [`Visibility`] is a boolean expression over security labels; an
//! [`Authorizations`] is the set of labels a requester holds.
//!
//! Grammar (compatible with the wide-column store's column visibility):
//!
//! ```text
//! expr  := term ( '&' term )*  |  term ( '|' term )*
//! term  := label | '"' quoted '"' | '(' expr ')' | '!' term
//! label := [A-Za-z0-9_\-:./]+
//! ```
//!
//! `&` and `|` cannot be mixed at one nesting level without parentheses.
//! Expressions are parsed once, at construction, so a malformed expression
//! fails fast and evaluation is total.

use crate::TesseraError;
use crate::primitives::MAX_VISIBILITY_DEPTH;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

#[derive(Debug, PartialEq, Eq)]
enum Node {
    Label(String),
    Not(Box<Node>),
    And(Vec<Node>),
    Or(Vec<Node>),
}

impl Node {
    fn evaluate(&self, authorizations: &Authorizations) -> bool {
        match self {
            Self::Label(label) => authorizations.contains(label),
            Self::Not(inner) => !inner.evaluate(authorizations),
            Self::And(terms) => terms.iter().all(|t| t.evaluate(authorizations)),
            Self::Or(terms) => terms.iter().any(|t| t.evaluate(authorizations)),
        }
    }
}

// =============================================================================
// VISIBILITY
// =============================================================================

/// A parsed visibility expression.
///
/// Cloning is cheap (the parse tree is shared). Equality, ordering and
/// hashing use the expression text, so two spellings of the same boolean
/// function are distinct visibilities, exactly as in the physical layout.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Visibility {
    expression: String,
    root: Option<Arc<Node>>,
}

impl Visibility {
    /// Parse a visibility expression.
    pub fn new(expression: impl Into<String>) -> Result<Self, TesseraError> {
        let expression = expression.into();
        let root = Parser::new(&expression).parse()?;
        Ok(Self {
            expression,
            root: root.map(Arc::new),
        })
    }

    /// The empty visibility, readable by everyone.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            expression: String::new(),
            root: None,
        }
    }

    /// The expression text as given.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.expression
    }

    /// Whether this is the always-satisfiable empty expression.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Evaluate the expression against a requester's labels.
    #[must_use]
    pub fn can_read(&self, authorizations: &Authorizations) -> bool {
        self.root
            .as_ref()
            .is_none_or(|root| root.evaluate(authorizations))
    }
}

impl Default for Visibility {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Visibility({:?})", self.expression)
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

impl PartialEq for Visibility {
    fn eq(&self, other: &Self) -> bool {
        self.expression == other.expression
    }
}

impl Eq for Visibility {}

impl PartialOrd for Visibility {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Visibility {
    fn cmp(&self, other: &Self) -> Ordering {
        self.expression.cmp(&other.expression)
    }
}

impl Hash for Visibility {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.expression.hash(state);
    }
}

impl TryFrom<String> for Visibility {
    type Error = TesseraError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for Visibility {
    type Error = TesseraError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Visibility> for String {
    fn from(value: Visibility) -> Self {
        value.expression
    }
}

// =============================================================================
// AUTHORIZATIONS
// =============================================================================

/// The set of labels held by a requester.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorizations {
    labels: BTreeSet<String>,
}

impl Authorizations {
    /// Create authorizations from any collection of labels.
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            labels: labels.into_iter().map(Into::into).collect(),
        }
    }

    /// Authorizations holding no labels (can read only empty visibilities).
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn contains(&self, label: &str) -> bool {
        self.labels.contains(label)
    }

    #[must_use]
    pub fn can_read(&self, visibility: &Visibility) -> bool {
        visibility.can_read(self)
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }
}

// =============================================================================
// PARSER
// =============================================================================

struct Parser<'a> {
    expression: &'a str,
    bytes: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(expression: &'a str) -> Self {
        Self {
            expression,
            bytes: expression.as_bytes(),
            pos: 0,
            depth: 0,
        }
    }

    fn parse(mut self) -> Result<Option<Node>, TesseraError> {
        self.skip_whitespace();
        if self.pos == self.bytes.len() {
            return Ok(None);
        }
        let node = self.parse_expr()?;
        self.skip_whitespace();
        if self.pos != self.bytes.len() {
            return Err(self.error(format!("unexpected character at position {}", self.pos)));
        }
        Ok(Some(node))
    }

    fn parse_expr(&mut self) -> Result<Node, TesseraError> {
        let mut terms = vec![self.parse_term()?];
        let mut operator: Option<u8> = None;

        loop {
            self.skip_whitespace();
            let Some(&c) = self.bytes.get(self.pos) else {
                break;
            };
            if c != b'&' && c != b'|' {
                break;
            }
            if operator.is_some_and(|op| op != c) {
                return Err(self.error(format!(
                    "cannot mix '&' and '|' without parentheses at position {}",
                    self.pos
                )));
            }
            operator = Some(c);
            self.pos += 1;
            terms.push(self.parse_term()?);
        }

        Ok(match operator {
            Some(b'&') => Node::And(terms),
            Some(_) => Node::Or(terms),
            None => terms
                .pop()
                .ok_or_else(|| self.error("empty expression".to_string()))?,
        })
    }

    fn parse_term(&mut self) -> Result<Node, TesseraError> {
        self.skip_whitespace();
        match self.bytes.get(self.pos).copied() {
            Some(b'(') => {
                self.descend()?;
                self.pos += 1;
                let node = self.parse_expr()?;
                self.skip_whitespace();
                if self.bytes.get(self.pos) != Some(&b')') {
                    return Err(self.error(format!("expected ')' at position {}", self.pos)));
                }
                self.pos += 1;
                self.depth -= 1;
                Ok(node)
            }
            Some(b'!') => {
                self.descend()?;
                self.pos += 1;
                let node = Node::Not(Box::new(self.parse_term()?));
                self.depth -= 1;
                Ok(node)
            }
            Some(b'"') => self.parse_quoted(),
            Some(c) if is_label_byte(c) => {
                let start = self.pos;
                while self.bytes.get(self.pos).is_some_and(|&b| is_label_byte(b)) {
                    self.pos += 1;
                }
                Ok(Node::Label(self.expression[start..self.pos].to_string()))
            }
            Some(_) => Err(self.error(format!("unexpected character at position {}", self.pos))),
            None => Err(self.error("unexpected end of expression".to_string())),
        }
    }

    fn parse_quoted(&mut self) -> Result<Node, TesseraError> {
        self.pos += 1;
        let mut label = Vec::new();
        loop {
            match self.bytes.get(self.pos).copied() {
                Some(b'"') => {
                    self.pos += 1;
                    break;
                }
                Some(b'\\') => {
                    match self.bytes.get(self.pos + 1).copied() {
                        Some(escaped @ (b'"' | b'\\')) => label.push(escaped),
                        _ => {
                            return Err(
                                self.error(format!("invalid escape at position {}", self.pos))
                            );
                        }
                    }
                    self.pos += 2;
                }
                Some(b) => {
                    label.push(b);
                    self.pos += 1;
                }
                None => return Err(self.error("unterminated quoted label".to_string())),
            }
        }
        if label.is_empty() {
            return Err(self.error("empty quoted label".to_string()));
        }
        let label = String::from_utf8(label)
            .map_err(|_| self.error("quoted label is not valid UTF-8".to_string()))?;
        Ok(Node::Label(label))
    }

    fn skip_whitespace(&mut self) {
        while self.bytes.get(self.pos).is_some_and(u8::is_ascii_whitespace) {
            self.pos += 1;
        }
    }

    fn descend(&mut self) -> Result<(), TesseraError> {
        if self.depth >= MAX_VISIBILITY_DEPTH {
            return Err(self.error(format!(
                "nesting deeper than {MAX_VISIBILITY_DEPTH} at position {}",
                self.pos
            )));
        }
        self.depth += 1;
        Ok(())
    }

    fn error(&self, reason: String) -> TesseraError {
        TesseraError::InvalidVisibility {
            expression: self.expression.to_string(),
            reason,
        }
    }
}

fn is_label_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b':' | b'.' | b'/')
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn vis(expr: &str) -> Visibility {
        Visibility::new(expr).expect("parse")
    }

    #[test]
    fn empty_expression_is_always_readable() {
        assert!(vis("").can_read(&Authorizations::empty()));
        assert!(vis("   ").is_empty());
        assert!(Visibility::empty().can_read(&Authorizations::new(["a"])));
    }

    #[test]
    fn single_label() {
        let v = vis("secret");
        assert!(!v.can_read(&Authorizations::empty()));
        assert!(v.can_read(&Authorizations::new(["secret"])));
    }

    #[test]
    fn and_or_and_parentheses() {
        let v = vis("a&(b|c)");
        assert!(!v.can_read(&Authorizations::new(["a"])));
        assert!(v.can_read(&Authorizations::new(["a", "c"])));
        assert!(!v.can_read(&Authorizations::new(["b", "c"])));
    }

    #[test]
    fn negation() {
        let v = vis("public&!embargo");
        assert!(v.can_read(&Authorizations::new(["public"])));
        assert!(!v.can_read(&Authorizations::new(["public", "embargo"])));
    }

    #[test]
    fn quoted_labels_with_escapes() {
        let v = vis(r#""a b"|"q\"uote""#);
        assert!(v.can_read(&Authorizations::new(["a b"])));
        assert!(v.can_read(&Authorizations::new(["q\"uote"])));
    }

    #[test]
    fn mixing_operators_without_parentheses_fails() {
        assert!(matches!(
            Visibility::new("a&b|c"),
            Err(TesseraError::InvalidVisibility { .. })
        ));
    }

    #[test]
    fn nesting_is_bounded() {
        let at_limit = format!(
            "{}a{}",
            "(".repeat(MAX_VISIBILITY_DEPTH),
            ")".repeat(MAX_VISIBILITY_DEPTH)
        );
        assert!(vis(&at_limit).can_read(&Authorizations::new(["a"])));

        let deep = format!("{}a{}", "(".repeat(200_000), ")".repeat(200_000));
        assert!(matches!(
            Visibility::new(deep),
            Err(TesseraError::InvalidVisibility { .. })
        ));
        let negations = format!("{}a", "!".repeat(200_000));
        assert!(matches!(
            Visibility::new(negations),
            Err(TesseraError::InvalidVisibility { .. })
        ));
    }

    #[test]
    fn malformed_expressions_fail_at_parse_time() {
        for bad in ["a&", "(a", "a)", "&a", "a$b", "\"open", "\"\"", "!"] {
            assert!(Visibility::new(bad).is_err(), "expected failure for {bad:?}");
        }
    }

    #[test]
    fn equality_uses_expression_text() {
        assert_eq!(vis("a|b"), vis("a|b"));
        assert_ne!(vis("a|b"), vis("b|a"));
        assert!(vis("a") < vis("b"));
    }

    #[test]
    fn serde_round_trip_reparses() {
        let v = vis("a&b");
        let bytes = postcard::to_allocvec(&v).expect("serialize");
        let back: Visibility = postcard::from_bytes(&bytes).expect("deserialize");
        assert_eq!(back, v);
        assert!(back.can_read(&Authorizations::new(["a", "b"])));
    }
}
