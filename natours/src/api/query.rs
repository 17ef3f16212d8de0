//! Filtering, sorting, projection and pagination for list endpoints.
//!
//! ```text
//! ?difficulty=easy&price[lt]=150000&sort=-ratings_average,price&fields=name,price&page=2&limit=10
//! ```
//!
//! Documents are filtered as serialized JSON, so every resource gets the
//! same behavior from its field whitelist alone.

use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Default sort when `sort` is absent
pub const DEFAULT_SORT: &str = "-created_at";
/// Default page size
pub const DEFAULT_LIMIT: usize = 100;
/// Largest accepted page size
pub const MAX_LIMIT: usize = 1000;

/// A rejected query string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    /// Field not in the resource whitelist
    #[error("Unknown field: {0}")]
    UnknownField(String),
    /// Operator other than gte, gt, lte, lt
    #[error("Unknown operator: {0}")]
    UnknownOperator(String),
    /// Page is not a positive integer
    #[error("Invalid page: {0}")]
    InvalidPage(String),
    /// Limit is not an integer in `1..=MAX_LIMIT`
    #[error("Invalid limit: {0} (must be between 1 and {MAX_LIMIT})")]
    InvalidLimit(String),
}

/// Comparison applied by a filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    /// `field=value`
    Eq,
    /// `field[gte]=value`
    Gte,
    /// `field[gt]=value`
    Gt,
    /// `field[lte]=value`
    Lte,
    /// `field[lt]=value`
    Lt,
}

impl FilterOp {
    fn parse(op: &str) -> Result<Self, QueryError> {
        match op {
            "gte" => Ok(Self::Gte),
            "gt" => Ok(Self::Gt),
            "lte" => Ok(Self::Lte),
            "lt" => Ok(Self::Lt),
            other => Err(QueryError::UnknownOperator(other.to_string())),
        }
    }

    const fn accepts(self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => matches!(ordering, Ordering::Equal),
            Self::Gte => !matches!(ordering, Ordering::Less),
            Self::Gt => matches!(ordering, Ordering::Greater),
            Self::Lte => !matches!(ordering, Ordering::Greater),
            Self::Lt => matches!(ordering, Ordering::Less),
        }
    }
}

/// One `field[op]=value` condition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    /// Field name
    pub field: String,
    /// Comparison
    pub op: FilterOp,
    /// Raw value from the query string
    pub value: String,
}

impl Filter {
    fn matches(&self, document: &Map<String, Value>) -> bool {
        let Some(actual) = document.get(&self.field) else {
            return false;
        };
        match actual {
            Value::Array(items) if self.op == FilterOp::Eq => {
                items.iter().any(|item| compare_raw(item, &self.value) == Some(Ordering::Equal))
            },
            other => compare_raw(other, &self.value).is_some_and(|o| self.op.accepts(o)),
        }
    }
}

/// One sort key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    /// Field name
    pub field: String,
    /// `-field` sorts descending
    pub descending: bool,
}

/// Parsed list query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryFeatures {
    /// Conditions, all of which must hold
    pub filters: Vec<Filter>,
    /// Sort keys in priority order
    pub sort: Vec<SortKey>,
    /// Projection; `None` keeps every field
    pub fields: Option<Vec<String>>,
    /// 1-based page
    pub page: usize,
    /// Page size
    pub limit: usize,
}

impl QueryFeatures {
    /// Parse query pairs against a field whitelist.
    ///
    /// # Errors
    ///
    /// Returns a [`QueryError`] for unknown fields or operators and for
    /// malformed pagination.
    pub fn parse(params: &[(String, String)], allowed: &[&str]) -> Result<Self, QueryError> {
        let known = |field: &str| {
            if allowed.contains(&field) {
                Ok(field.to_string())
            } else {
                Err(QueryError::UnknownField(field.to_string()))
            }
        };

        let mut features = Self {
            filters: Vec::new(),
            sort: Vec::new(),
            fields: None,
            page: 1,
            limit: DEFAULT_LIMIT,
        };
        let mut sort = DEFAULT_SORT.to_string();

        for (key, value) in params {
            match key.as_str() {
                "sort" => sort.clone_from(value),
                "fields" => {
                    let fields = split_list(value)
                        .map(known)
                        .collect::<Result<Vec<_>, _>>()?;
                    features.fields = Some(fields);
                },
                "page" => {
                    features.page = value
                        .parse()
                        .ok()
                        .filter(|p| *p >= 1)
                        .ok_or_else(|| QueryError::InvalidPage(value.clone()))?;
                },
                "limit" => {
                    features.limit = value
                        .parse()
                        .ok()
                        .filter(|l| (1..=MAX_LIMIT).contains(l))
                        .ok_or_else(|| QueryError::InvalidLimit(value.clone()))?;
                },
                _ => {
                    let (field, op) = match key.split_once('[') {
                        Some((field, rest)) => {
                            let op = rest
                                .strip_suffix(']')
                                .ok_or_else(|| QueryError::UnknownOperator(rest.to_string()))?;
                            (field, FilterOp::parse(op)?)
                        },
                        None => (key.as_str(), FilterOp::Eq),
                    };
                    features.filters.push(Filter {
                        field: known(field)?,
                        op,
                        value: value.clone(),
                    });
                },
            }
        }

        for key in split_list(&sort) {
            let (field, descending) = match key.strip_prefix('-') {
                Some(field) => (field, true),
                None => (key, false),
            };
            features.sort.push(SortKey {
                field: known(field)?,
                descending,
            });
        }

        Ok(features)
    }

    /// Number of documents to skip for the requested page
    #[must_use]
    pub const fn skip(&self) -> usize {
        (self.page - 1).saturating_mul(self.limit)
    }

    /// Filter, sort, paginate and project serialized documents.
    #[must_use]
    pub fn apply(&self, documents: Vec<Value>) -> Vec<Value> {
        let mut matching: Vec<Map<String, Value>> = documents
            .into_iter()
            .filter_map(|doc| match doc {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .filter(|doc| self.filters.iter().all(|f| f.matches(doc)))
            .collect();

        matching.sort_by(|a, b| {
            self.sort
                .iter()
                .map(|key| {
                    let ordering = compare_fields(a.get(&key.field), b.get(&key.field));
                    if key.descending {
                        ordering.reverse()
                    } else {
                        ordering
                    }
                })
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal)
        });

        matching
            .into_iter()
            .skip(self.skip())
            .take(self.limit)
            .map(|doc| Value::Object(self.project(doc)))
            .collect()
    }

    fn project(&self, mut doc: Map<String, Value>) -> Map<String, Value> {
        if let Some(fields) = &self.fields {
            doc.retain(|key, _| key == "id" || fields.iter().any(|f| f == key));
        }
        doc
    }
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

/// Compare a stored value with a raw query value.
fn compare_raw(actual: &Value, raw: &str) -> Option<Ordering> {
    match actual {
        Value::Number(n) => {
            let expected: f64 = raw.parse().ok()?;
            n.as_f64()?.partial_cmp(&expected)
        },
        Value::String(s) => Some(s.as_str().cmp(raw)),
        Value::Bool(b) => {
            let expected: bool = raw.parse().ok()?;
            Some(b.cmp(&expected))
        },
        _ => None,
    }
}

/// Order two stored values; missing values sort last.
fn compare_fields(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .zip(y.as_f64())
            .and_then(|(x, y)| x.partial_cmp(&y))
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Null) | None, Some(Value::Null) | None) => Ordering::Equal,
        (Some(Value::Null) | None, Some(_)) => Ordering::Greater,
        (Some(_), Some(Value::Null) | None) => Ordering::Less,
        _ => Ordering::Equal,
    }
}
