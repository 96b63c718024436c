//! Reference expressions and their parser.
//!
//! Grammar, in the order the parser tries it:
//!
//! ```text
//! this.field(.sub)*                   own item
//! $binding(.path)*                    shadow binding of the own item
//! byTag[tag](.field)                  any item of any collection with the tag
//! byTag[this.field](.field)           tag taken from the own item
//! collection[*](.field)               whole collection
//! collection[n](.field)               single index
//! collection[n:m](.field)             inclusive range, `n:` runs to the end
//! collection[cond](.field)            items matching a condition
//! name(.field)                        pick alias or whole collection
//! ```

use std::fmt;

use crate::condition::{Condition, parse_condition};
use crate::keywords::{BY_TAG_OPEN, SHADOW_PREFIX, THIS_PREFIX, WILDCARD};
use crate::node::NodeId;

/// Index part of `collection[...]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexSelector {
    Single(u64),
    /// Inclusive on both ends; `end: None` means the last index.
    Range { start: u64, end: Option<u64> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagSelector {
    Static(String),
    /// `byTag[this.kind]`: the tag is read from a field of the own item.
    SelfField(String),
}

/// Resolved reference target, after declarations are known.
#[derive(Debug, Clone, PartialEq)]
pub enum ReferenceTarget {
    Collection {
        collection: String,
        field: Option<String>,
    },
    Indexed {
        collection: String,
        index: IndexSelector,
        field: Option<String>,
    },
    Tag {
        tag: TagSelector,
        field: Option<String>,
    },
    Pick {
        alias: String,
        field: Option<String>,
    },
    SelfField {
        path: String,
    },
    Shadow {
        binding: String,
        path: Option<String>,
    },
    Conditional {
        collection: String,
        condition: Condition,
        field: Option<String>,
    },
}

impl ReferenceTarget {
    /// Collection named directly by the reference, if any.
    pub fn collection(&self) -> Option<&str> {
        match self {
            ReferenceTarget::Collection { collection, .. }
            | ReferenceTarget::Indexed { collection, .. }
            | ReferenceTarget::Conditional { collection, .. } => Some(collection),
            _ => None,
        }
    }

    /// Field projected out of the selected item.
    pub fn field(&self) -> Option<&str> {
        match self {
            ReferenceTarget::Collection { field, .. }
            | ReferenceTarget::Indexed { field, .. }
            | ReferenceTarget::Tag { field, .. }
            | ReferenceTarget::Pick { field, .. }
            | ReferenceTarget::Conditional { field, .. } => field.as_deref(),
            ReferenceTarget::SelfField { path } => Some(path),
            ReferenceTarget::Shadow { path, .. } => path.as_deref(),
        }
    }
}

/// A reference as it appears in the tree.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceNode {
    pub id: NodeId,
    /// Source text, kept for messages.
    pub raw: String,
    /// Round-robin instead of random selection.
    pub sequential: bool,
    pub target: ReferenceTarget,
}

impl fmt::Display for ReferenceNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Parsed shape of a reference before names are checked against
/// declarations. `Named` is either a pick alias or a collection.
#[derive(Debug, Clone, PartialEq)]
pub enum ReferenceSyntax {
    Named {
        name: String,
        field: Option<String>,
    },
    Collection {
        collection: String,
        field: Option<String>,
    },
    Indexed {
        collection: String,
        index: IndexSelector,
        field: Option<String>,
    },
    Tag {
        tag: TagSelector,
        field: Option<String>,
    },
    SelfField {
        path: String,
    },
    Shadow {
        binding: String,
        path: Option<String>,
    },
    Conditional {
        collection: String,
        condition: Condition,
        field: Option<String>,
    },
}

/// Reasons a reference string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceParseError {
    Empty,
    Malformed,
    MissingSelfField,
    InvalidShadow,
    MalformedByTag,
    InvalidIndex,
    UnclosedBracket,
    EmptyCondition,
    InvalidCondition(String),
}

impl ReferenceParseError {
    /// Message fragment completing "Reference field 'f' ...".
    pub fn describe(&self) -> String {
        match self {
            ReferenceParseError::Empty => "has empty reference".to_string(),
            ReferenceParseError::Malformed => "has malformed reference".to_string(),
            ReferenceParseError::MissingSelfField => {
                format!("is invalid - missing field name after '{THIS_PREFIX}'")
            }
            ReferenceParseError::InvalidShadow => {
                "has malformed shadow binding reference".to_string()
            }
            ReferenceParseError::MalformedByTag => "has malformed byTag reference".to_string(),
            ReferenceParseError::InvalidIndex => "has invalid index format".to_string(),
            ReferenceParseError::UnclosedBracket => {
                "has unclosed bracket in conditional reference".to_string()
            }
            ReferenceParseError::EmptyCondition => "has empty condition in brackets".to_string(),
            ReferenceParseError::InvalidCondition(reason) => {
                format!("has invalid condition: {reason}")
            }
        }
    }
}

/// Parse a reference string.
pub fn parse_reference(raw: &str) -> Result<ReferenceSyntax, ReferenceParseError> {
    let reference = raw.trim();
    if reference.is_empty() {
        return Err(ReferenceParseError::Empty);
    }

    if reference == "this" {
        return Err(ReferenceParseError::MissingSelfField);
    }
    if let Some(path) = reference.strip_prefix(THIS_PREFIX) {
        if path.is_empty() {
            return Err(ReferenceParseError::MissingSelfField);
        }
        return Ok(ReferenceSyntax::SelfField {
            path: path.to_string(),
        });
    }

    if let Some(binding) = reference.strip_prefix(SHADOW_PREFIX) {
        let (name, path) = split_field(binding);
        if name.is_empty() || path.is_some_and(str::is_empty) {
            return Err(ReferenceParseError::InvalidShadow);
        }
        return Ok(ReferenceSyntax::Shadow {
            binding: name.to_string(),
            path: path.map(str::to_string),
        });
    }

    if let Some(inner_and_tail) = reference.strip_prefix(BY_TAG_OPEN) {
        return parse_by_tag(inner_and_tail);
    }

    if let Some(open) = reference.find('[') {
        return parse_bracketed(reference, open);
    }

    let (name, field) = split_field(reference);
    if name.is_empty() || field.is_some_and(str::is_empty) {
        return Err(ReferenceParseError::Malformed);
    }
    Ok(ReferenceSyntax::Named {
        name: name.to_string(),
        field: field.map(str::to_string),
    })
}

/// `inner_and_tail` is everything after `byTag[`.
fn parse_by_tag(inner_and_tail: &str) -> Result<ReferenceSyntax, ReferenceParseError> {
    let close = inner_and_tail
        .find(']')
        .ok_or(ReferenceParseError::MalformedByTag)?;
    let inner = inner_and_tail[..close].trim();
    if inner.is_empty() {
        return Err(ReferenceParseError::MalformedByTag);
    }
    let field = parse_tail(&inner_and_tail[close + 1..])
        .map_err(|_| ReferenceParseError::MalformedByTag)?;

    let tag = match inner.strip_prefix(THIS_PREFIX) {
        Some("") => return Err(ReferenceParseError::MalformedByTag),
        Some(path) => TagSelector::SelfField(path.to_string()),
        None => TagSelector::Static(inner.to_string()),
    };
    Ok(ReferenceSyntax::Tag { tag, field })
}

fn parse_bracketed(reference: &str, open: usize) -> Result<ReferenceSyntax, ReferenceParseError> {
    let collection = reference[..open].trim();
    let Some(close) = find_closing_bracket(reference, open) else {
        let inner = &reference[open + 1..];
        return if looks_conditional(inner) {
            Err(ReferenceParseError::UnclosedBracket)
        } else {
            Err(ReferenceParseError::InvalidIndex)
        };
    };
    if collection.is_empty() {
        return Err(ReferenceParseError::Malformed);
    }

    let inner = reference[open + 1..close].trim();
    let field = parse_tail(&reference[close + 1..])?;
    let collection = collection.to_string();

    if inner.is_empty() {
        return Err(ReferenceParseError::EmptyCondition);
    }
    if inner == WILDCARD {
        return Ok(ReferenceSyntax::Collection { collection, field });
    }
    if let Some(index) = parse_index(inner) {
        return Ok(ReferenceSyntax::Indexed {
            collection,
            index: index?,
            field,
        });
    }
    if looks_conditional(inner) {
        let condition =
            parse_condition(inner).map_err(ReferenceParseError::InvalidCondition)?;
        return Ok(ReferenceSyntax::Conditional {
            collection,
            condition,
            field,
        });
    }
    Err(ReferenceParseError::InvalidIndex)
}

/// `None` when `inner` is not index-shaped at all.
fn parse_index(inner: &str) -> Option<Result<IndexSelector, ReferenceParseError>> {
    let is_digits = |text: &str| !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit());

    if is_digits(inner) {
        return Some(
            inner
                .parse()
                .map(IndexSelector::Single)
                .map_err(|_| ReferenceParseError::InvalidIndex),
        );
    }

    let (start, end) = inner.split_once(':')?;
    let (start, end) = (start.trim(), end.trim());
    if !is_digits(start) || !(end.is_empty() || is_digits(end)) {
        return Some(Err(ReferenceParseError::InvalidIndex));
    }
    let parsed = (|| {
        let start: u64 = start.parse().ok()?;
        let end: Option<u64> = if end.is_empty() {
            None
        } else {
            Some(end.parse().ok()?)
        };
        if end.is_some_and(|end| end < start) {
            return None;
        }
        Some(IndexSelector::Range { start, end })
    })();
    Some(parsed.ok_or(ReferenceParseError::InvalidIndex))
}

fn parse_tail(tail: &str) -> Result<Option<String>, ReferenceParseError> {
    if tail.is_empty() {
        return Ok(None);
    }
    match tail.strip_prefix('.') {
        Some(field) if !field.is_empty() => Ok(Some(field.to_string())),
        _ => Err(ReferenceParseError::InvalidIndex),
    }
}

fn split_field(text: &str) -> (&str, Option<&str>) {
    match text.split_once('.') {
        Some((head, field)) => (head, Some(field)),
        None => (text, None),
    }
}

fn looks_conditional(inner: &str) -> bool {
    inner.contains(['=', '<', '>', '!'])
}

fn find_closing_bracket(text: &str, open: usize) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (offset, ch) in text[open + 1..].char_indices() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => {}
            None if ch == '\'' || ch == '"' => quote = Some(ch),
            None if ch == ']' => return Some(open + 1 + offset),
            None => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_shape() {
        assert_eq!(
            parse_reference("users[*].id"),
            Ok(ReferenceSyntax::Collection {
                collection: "users".to_string(),
                field: Some("id".to_string()),
            })
        );
        assert_eq!(
            parse_reference("users[3]"),
            Ok(ReferenceSyntax::Indexed {
                collection: "users".to_string(),
                index: IndexSelector::Single(3),
                field: None,
            })
        );
        assert_eq!(
            parse_reference("employees[0:4].name"),
            Ok(ReferenceSyntax::Indexed {
                collection: "employees".to_string(),
                index: IndexSelector::Range {
                    start: 0,
                    end: Some(4)
                },
                field: Some("name".to_string()),
            })
        );
        assert_eq!(
            parse_reference("employees[2:]"),
            Ok(ReferenceSyntax::Indexed {
                collection: "employees".to_string(),
                index: IndexSelector::Range {
                    start: 2,
                    end: None
                },
                field: None,
            })
        );
        assert_eq!(
            parse_reference("byTag[this.kind].name"),
            Ok(ReferenceSyntax::Tag {
                tag: TagSelector::SelfField("kind".to_string()),
                field: Some("name".to_string()),
            })
        );
        assert_eq!(
            parse_reference("$user.address.city"),
            Ok(ReferenceSyntax::Shadow {
                binding: "user".to_string(),
                path: Some("address.city".to_string()),
            })
        );
        assert_eq!(
            parse_reference("admin.name"),
            Ok(ReferenceSyntax::Named {
                name: "admin".to_string(),
                field: Some("name".to_string()),
            })
        );
        assert!(matches!(
            parse_reference("users[status='active'].id"),
            Ok(ReferenceSyntax::Conditional { .. })
        ));
    }

    #[test]
    fn names_starting_with_by_tag_are_collections() {
        assert_eq!(
            parse_reference("byTagger[*].id"),
            Ok(ReferenceSyntax::Collection {
                collection: "byTagger".to_string(),
                field: Some("id".to_string()),
            })
        );
        assert_eq!(
            parse_reference("byTags.name"),
            Ok(ReferenceSyntax::Named {
                name: "byTags".to_string(),
                field: Some("name".to_string()),
            })
        );
    }

    #[test]
    fn closing_bracket_inside_quotes_is_not_the_end() {
        let parsed = parse_reference("items[label='a]b'].id").expect("parse");
        let ReferenceSyntax::Conditional { field, .. } = parsed else {
            panic!("expected conditional");
        };
        assert_eq!(field.as_deref(), Some("id"));
    }

    #[test]
    fn reports_malformed_references() {
        assert_eq!(parse_reference("  "), Err(ReferenceParseError::Empty));
        assert_eq!(parse_reference("this."), Err(ReferenceParseError::MissingSelfField));
        assert_eq!(parse_reference("byTag[x"), Err(ReferenceParseError::MalformedByTag));
        assert_eq!(parse_reference("byTag[]"), Err(ReferenceParseError::MalformedByTag));
        assert_eq!(parse_reference("users[abc]"), Err(ReferenceParseError::InvalidIndex));
        assert_eq!(parse_reference("users[4:1]"), Err(ReferenceParseError::InvalidIndex));
        assert_eq!(parse_reference("users[ ]"), Err(ReferenceParseError::EmptyCondition));
        assert_eq!(
            parse_reference("users[age>3"),
            Err(ReferenceParseError::UnclosedBracket)
        );
        assert_eq!(
            parse_reference("users[a=1 AND b=2]"),
            Err(ReferenceParseError::InvalidCondition(
                "logical operators must be lowercase".to_string()
            ))
        );
    }
}
