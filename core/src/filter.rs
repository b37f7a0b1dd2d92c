//! Filter expressions and their compact array encoding.
//!
//! # Design
//! A filter is a closed tree of three node kinds. Its JSON form is built from
//! nested arrays:
//!
//! ```text
//! ["attr", "Eq", 42]                          leaf
//! ["And", [["a", "Eq", 1], ["b", "Gt", 2]]]   conjunction
//! ["Or",  [ ... ]]                            disjunction
//! ```
//!
//! `Filter` implements `Serialize` directly, so it can be encoded on its own
//! or sit as a field inside any request struct. An absent filter is written
//! as `Option<Filter>`, which serde already renders as `null`. Compound nodes
//! hold `Option<Filter>` children so callers can splice in conditional
//! clauses; absent children are dropped when encoding.
//!
//! Filters are write-only: the client never reads them back.

use serde::ser::{SerializeSeq, Serializer};
use serde::Serialize;
use serde_json::Value;

/// Comparison operators understood by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Operator {
    Eq,
    NotEq,
    In,
    NotIn,
    Lt,
    Lte,
    Gt,
    Gte,
    Glob,
    NotGlob,
    IGlob,
    NotIGlob,
}

impl Operator {
    pub const ALL: [Operator; 12] = [
        Operator::Eq,
        Operator::NotEq,
        Operator::In,
        Operator::NotIn,
        Operator::Lt,
        Operator::Lte,
        Operator::Gt,
        Operator::Gte,
        Operator::Glob,
        Operator::NotGlob,
        Operator::IGlob,
        Operator::NotIGlob,
    ];

    /// Wire token for this operator.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "Eq",
            Operator::NotEq => "NotEq",
            Operator::In => "In",
            Operator::NotIn => "NotIn",
            Operator::Lt => "Lt",
            Operator::Lte => "Lte",
            Operator::Gt => "Gt",
            Operator::Gte => "Gte",
            Operator::Glob => "Glob",
            Operator::NotGlob => "NotGlob",
            Operator::IGlob => "IGlob",
            Operator::NotIGlob => "NotIGlob",
        }
    }
}

/// A boolean expression over document attributes.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `attribute <operator> value`
    Base {
        attribute: String,
        operator: Operator,
        value: Value,
    },
    /// True when every present child is true.
    And(Vec<Option<Filter>>),
    /// True when at least one present child is true.
    Or(Vec<Option<Filter>>),
}

impl Filter {
    pub fn base(attribute: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Filter::Base {
            attribute: attribute.into(),
            operator,
            value: value.into(),
        }
    }

    pub fn eq(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::base(attribute, Operator::Eq, value)
    }

    pub fn not_eq(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::base(attribute, Operator::NotEq, value)
    }

    pub fn is_in(attribute: impl Into<String>, values: impl Into<Value>) -> Self {
        Self::base(attribute, Operator::In, values)
    }

    pub fn glob(attribute: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::base(attribute, Operator::Glob, pattern.into())
    }

    /// Conjunction of `children`; accepts `Filter` or `Option<Filter>` items.
    pub fn and<I, F>(children: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<Option<Filter>>,
    {
        Filter::And(children.into_iter().map(Into::into).collect())
    }

    /// Disjunction of `children`; accepts `Filter` or `Option<Filter>` items.
    pub fn or<I, F>(children: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<Option<Filter>>,
    {
        Filter::Or(children.into_iter().map(Into::into).collect())
    }

    /// Wire encoding as a JSON value.
    pub fn to_value(&self) -> Value {
        match self {
            Filter::Base {
                attribute,
                operator,
                value,
            } => Value::Array(vec![
                Value::String(attribute.clone()),
                Value::String(operator.as_str().to_string()),
                value.clone(),
            ]),
            Filter::And(children) => compound_value("And", children),
            Filter::Or(children) => compound_value("Or", children),
        }
    }
}

fn compound_value(tag: &str, children: &[Option<Filter>]) -> Value {
    Value::Array(vec![
        Value::String(tag.to_string()),
        Value::Array(children.iter().flatten().map(Filter::to_value).collect()),
    ])
}

/// Serializes the present children of a compound node as one array.
struct Children<'a>(&'a [Option<Filter>]);

impl Serialize for Children<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let present = self.0.iter().flatten();
        let mut seq = serializer.serialize_seq(Some(present.clone().count()))?;
        for child in present {
            seq.serialize_element(child)?;
        }
        seq.end()
    }
}

impl Serialize for Filter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Filter::Base {
                attribute,
                operator,
                value,
            } => {
                let mut seq = serializer.serialize_seq(Some(3))?;
                seq.serialize_element(attribute)?;
                seq.serialize_element(operator)?;
                seq.serialize_element(value)?;
                seq.end()
            }
            Filter::And(children) => serialize_compound(serializer, "And", children),
            Filter::Or(children) => serialize_compound(serializer, "Or", children),
        }
    }
}

fn serialize_compound<S: Serializer>(
    serializer: S,
    tag: &str,
    children: &[Option<Filter>],
) -> Result<S::Ok, S::Error> {
    let mut seq = serializer.serialize_seq(Some(2))?;
    seq.serialize_element(tag)?;
    seq.serialize_element(&Children(children))?;
    seq.end()
}
