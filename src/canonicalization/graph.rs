//! Mapping of a JSON tree onto an RDF dataset.
//!
//! Objects become nodes, keys become predicates, scalars become typed literals and arrays
//! become RDF lists so that element order is part of the graph.
//!
//! This is not JSON-LD expansion: `@context` is not interpreted and keys that are not
//! absolute IRIs are mapped into a fixed `btc1.dev` term vocabulary. Hashes are
//! deterministic within this crate, but `bip340-rdfc-2025` proofs made here do not verify
//! against implementations that expand JSON-LD, and theirs do not verify here.

use oxrdf::vocab::{rdf, xsd};
use oxrdf::{BlankNode, Dataset, GraphName, Literal, NamedNode, Quad, Subject, Term};
use serde_json::{Map, Value};

/// Vocabulary for keys that are not absolute IRIs.
const TERM_VOCAB: &str = "https://btc1.dev/context/v1/terms#";

/// Predicate linking a non-object root to its value.
const ROOT_VALUE: &str = "https://btc1.dev/context/v1/terms#@value";

pub(super) fn to_dataset(value: &Value) -> Dataset {
    let mut builder = GraphBuilder::default();

    match value {
        Value::Object(map) => {
            builder.node(map);
        }
        value => {
            let root = builder.blank_node();
            if let Some(object) = builder.term(value) {
                builder.push(root, named_node(ROOT_VALUE), object);
            }
        }
    }

    builder.quads.iter().collect()
}

#[derive(Clone)]
enum Node {
    Iri(NamedNode),
    Blank(BlankNode),
}

impl From<Node> for Subject {
    fn from(node: Node) -> Self {
        match node {
            Node::Iri(iri) => iri.into(),
            Node::Blank(blank) => blank.into(),
        }
    }
}

impl From<Node> for Term {
    fn from(node: Node) -> Self {
        match node {
            Node::Iri(iri) => iri.into(),
            Node::Blank(blank) => blank.into(),
        }
    }
}

#[derive(Default)]
struct GraphBuilder {
    quads: Vec<Quad>,
    next_blank: usize,
}

impl GraphBuilder {
    fn blank_node(&mut self) -> Node {
        let node = BlankNode::new_unchecked(format!("b{}", self.next_blank));
        self.next_blank += 1;

        Node::Blank(node)
    }

    fn push(&mut self, subject: Node, predicate: NamedNode, object: Term) {
        self.quads.push(Quad::new(
            Subject::from(subject),
            predicate,
            object,
            GraphName::DefaultGraph,
        ));
    }

    /// Emit all triples of an object and return its subject.
    fn node(&mut self, map: &Map<String, Value>) -> Node {
        let iri = map
            .get("id")
            .and_then(Value::as_str)
            .and_then(absolute_iri);
        let subject = match &iri {
            Some(iri) => Node::Iri(iri.clone()),
            None => self.blank_node(),
        };

        for (key, value) in map {
            if key == "id" && iri.is_some() {
                continue;
            }

            if let Some(object) = self.term(value) {
                self.push(subject.clone(), predicate(key), object);
            }
        }

        subject
    }

    /// Map a JSON value to an RDF term. `null` has no term.
    fn term(&mut self, value: &Value) -> Option<Term> {
        let term = match value {
            Value::Null => return None,
            Value::Bool(b) => Literal::new_typed_literal(b.to_string(), xsd::BOOLEAN).into(),
            Value::Number(n) if n.is_f64() => {
                Literal::new_typed_literal(n.to_string(), xsd::DOUBLE).into()
            }
            Value::Number(n) => Literal::new_typed_literal(n.to_string(), xsd::INTEGER).into(),
            Value::String(s) => Literal::new_simple_literal(s.as_str()).into(),
            Value::Object(map) => self.node(map).into(),
            Value::Array(items) => self.list(items),
        };

        Some(term)
    }

    /// Build an `rdf:List` from the non-null items.
    fn list(&mut self, items: &[Value]) -> Term {
        let terms: Vec<Term> = items.iter().filter_map(|item| self.term(item)).collect();

        let mut head = Term::from(NamedNode::from(rdf::NIL));
        for term in terms.into_iter().rev() {
            let cell = self.blank_node();
            self.push(cell.clone(), rdf::FIRST.into(), term);
            self.push(cell.clone(), rdf::REST.into(), head);
            head = cell.into();
        }

        head
    }
}

/// An IRI node for values that carry a scheme, such as `did:` or `https:`.
fn absolute_iri(value: &str) -> Option<NamedNode> {
    let (scheme, _) = value.split_once(':')?;
    let valid_scheme = scheme
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));

    if valid_scheme {
        NamedNode::new(value).ok()
    } else {
        None
    }
}

fn predicate(key: &str) -> NamedNode {
    absolute_iri(key)
        .unwrap_or_else(|| named_node(&format!("{TERM_VOCAB}{}", urlencoding::encode(key))))
}

fn named_node(iri: &str) -> NamedNode {
    NamedNode::new_unchecked(iri)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_objects_with_absolute_ids_are_iris() {
        let dataset = to_dataset(&json!({"id": "did:example:123", "name": "x"}));
        let quads: Vec<_> = dataset.iter().collect();

        assert_eq!(quads.len(), 1);
        assert_eq!(quads[0].subject.to_string(), "<did:example:123>");
        assert_eq!(
            quads[0].predicate.as_str(),
            format!("{TERM_VOCAB}name").as_str()
        );
    }

    #[test]
    fn test_relative_ids_stay_literals() {
        let dataset = to_dataset(&json!({"id": "#key-1"}));
        let quads: Vec<_> = dataset.iter().collect();

        assert_eq!(quads.len(), 1);
        assert!(quads[0].subject.to_string().starts_with("_:"));
    }

    #[test]
    fn test_nulls_are_dropped_and_lists_are_built() {
        let dataset = to_dataset(&json!({"a": null, "list": [1, null, 2]}));

        // root -> list head, then two cells of first/rest
        assert_eq!(dataset.len(), 5);
    }

    #[test]
    fn test_key_encoding() {
        assert_eq!(
            predicate("@context").as_str(),
            format!("{TERM_VOCAB}%40context").as_str()
        );
        assert_eq!(predicate("https://schema.org/name").as_str(), "https://schema.org/name");
        assert_eq!(
            predicate("publicKeyMultibase").as_str(),
            format!("{TERM_VOCAB}publicKeyMultibase").as_str()
        );
    }
}
