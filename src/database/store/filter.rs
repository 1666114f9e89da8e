use serde_json::Value;

use super::{Document, ID_FIELD};

/// Document predicate
///
/// Field names may use dots to reach into nested objects (`perm.admin`).
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches every document
    All,
    /// Field equals the value
    Eq(String, Value),
    /// Every inner filter matches
    And(Vec<Filter>),
    /// At least one inner filter matches
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(field.into(), value.into())
    }

    /// Shorthand for an `_id` lookup
    pub fn id(id: impl Into<String>) -> Self {
        Filter::Eq(ID_FIELD.to_string(), Value::String(id.into()))
    }

    pub fn matches(&self, document: &Document) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(field, expected) => lookup(document, field) == Some(expected),
            Filter::And(filters) => filters.iter().all(|f| f.matches(document)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(document)),
        }
    }

    /// The `_id` this filter pins, if it is a plain id lookup
    pub fn pinned_id(&self) -> Option<&str> {
        match self {
            Filter::Eq(field, Value::String(id)) if field == ID_FIELD => Some(id.as_str()),
            _ => None,
        }
    }

    /// Top-level equality constraints, used to seed upserted documents
    pub fn equalities(&self) -> Vec<(&str, &Value)> {
        match self {
            Filter::Eq(field, value) if !field.contains('.') => vec![(field.as_str(), value)],
            Filter::And(filters) => filters.iter().flat_map(|f| f.equalities()).collect(),
            _ => Vec::new(),
        }
    }
}

fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let first = parts.next()?;
    let mut current = document.get(first)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_eq_and_nested_lookup() {
        let user = doc(json!({"_id": "u1", "slug": "admin", "perm": {"admin": true}}));

        assert!(Filter::eq("slug", "admin").matches(&user));
        assert!(!Filter::eq("slug", "root").matches(&user));
        assert!(Filter::eq("perm.admin", true).matches(&user));
        assert!(!Filter::eq("perm.editor", true).matches(&user));
        assert!(Filter::All.matches(&user));
    }

    #[test]
    fn test_or_matches_slug_or_email() {
        let user = doc(json!({"_id": "u1", "slug": "alice", "email": "a@example.com"}));
        let by_email = Filter::Or(vec![
            Filter::eq("slug", "a@example.com"),
            Filter::eq("email", "a@example.com"),
        ]);
        assert!(by_email.matches(&user));

        let neither = Filter::Or(vec![Filter::eq("slug", "bob"), Filter::eq("email", "bob")]);
        assert!(!neither.matches(&user));
    }

    #[test]
    fn test_pinned_id_and_equalities() {
        assert_eq!(Filter::id("db_version").pinned_id(), Some("db_version"));
        assert_eq!(Filter::eq("slug", "x").pinned_id(), None);

        let filter = Filter::And(vec![
            Filter::id("jwt_secret"),
            Filter::eq("kind", "secret"),
            Filter::eq("nested.field", 1),
        ]);
        let eqs = filter.equalities();
        assert_eq!(eqs.len(), 2);
        assert_eq!(eqs[0].0, "_id");
        assert_eq!(eqs[1].0, "kind");
    }
}
