// ============================================================================
// src/query.rs - Run listing parameters: filtering, sorting, pagination
// ============================================================================
//
// Filters arrive as the dashboard's filter document:
//
//   {"type": "and", "filters": [
//       {"field": "config.lr", "operator": ">", "value": 0.01},
//       {"type": "or", "filters": [...]}
//   ]}
//
// Missing fields evaluate as null. Values of different JSON types are never
// ordered against each other.
//
// ============================================================================

use crate::core::{DataError, Result, Run};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::cmp::Ordering;
use std::str::FromStr;

// ============================================================================
// SORT DIRECTION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl FromStr for SortDirection {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "asc" | "1" => Ok(Self::Asc),
            "desc" | "-1" => Ok(Self::Desc),
            other => Err(DataError::InvalidQuery(format!("unknown sort direction '{}'", other))),
        }
    }
}

// ============================================================================
// FILTER DOCUMENT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum FilterOperator {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    NotEq,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    LtEq,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    GtEq,
    #[serde(rename = "regex")]
    Regex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupKind {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum QueryFilter {
    Group {
        #[serde(rename = "type")]
        kind: GroupKind,
        filters: Vec<QueryFilter>,
    },
    Clause {
        field: String,
        operator: FilterOperator,
        value: Value,
    },
}

impl QueryFilter {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| DataError::InvalidQuery(e.to_string()))
    }

    pub fn and(filters: Vec<QueryFilter>) -> Self {
        Self::Group { kind: GroupKind::And, filters }
    }

    pub fn or(filters: Vec<QueryFilter>) -> Self {
        Self::Group { kind: GroupKind::Or, filters }
    }

    pub fn clause(field: &str, operator: FilterOperator, value: Value) -> Self {
        Self::Clause {
            field: field.to_string(),
            operator,
            value,
        }
    }

    /// Validate the filter and compile its regular expressions.
    pub fn compile(&self) -> Result<CompiledFilter> {
        match self {
            QueryFilter::Group { kind, filters } => {
                let compiled = filters.iter().map(|f| f.compile()).collect::<Result<Vec<_>>>()?;
                Ok(match kind {
                    GroupKind::And => CompiledFilter::And(compiled),
                    GroupKind::Or => CompiledFilter::Or(compiled),
                })
            }
            QueryFilter::Clause { field, operator: FilterOperator::Regex, value } => {
                let pattern = value.as_str().ok_or_else(|| {
                    DataError::InvalidQuery(format!("regex on '{}' needs a string pattern", field))
                })?;
                let regex = Regex::new(pattern)
                    .map_err(|e| DataError::InvalidQuery(format!("bad regex '{}': {}", pattern, e)))?;
                Ok(CompiledFilter::Regex { field: field.clone(), regex })
            }
            QueryFilter::Clause { field, operator, value } => Ok(CompiledFilter::Compare {
                field: field.clone(),
                operator: *operator,
                value: value.clone(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub enum CompiledFilter {
    And(Vec<CompiledFilter>),
    Or(Vec<CompiledFilter>),
    Compare {
        field: String,
        operator: FilterOperator,
        value: Value,
    },
    Regex {
        field: String,
        regex: Regex,
    },
}

impl CompiledFilter {
    pub fn matches(&self, run: &Run) -> bool {
        match self {
            CompiledFilter::And(filters) => filters.iter().all(|f| f.matches(run)),
            CompiledFilter::Or(filters) => filters.iter().any(|f| f.matches(run)),
            CompiledFilter::Compare { field, operator, value } => {
                let actual = run.field(field).unwrap_or(Value::Null);
                evaluate(&actual, *operator, value)
            }
            CompiledFilter::Regex { field, regex } => match run.field(field) {
                Some(Value::String(text)) => regex.is_match(&text),
                _ => false,
            },
        }
    }
}

/// Order two JSON values of the same kind. Mixed kinds are unordered.
pub fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
        },
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn evaluate(actual: &Value, operator: FilterOperator, expected: &Value) -> bool {
    let equal = actual == expected || compare_values(actual, expected) == Some(Ordering::Equal);
    match operator {
        FilterOperator::Eq => equal,
        FilterOperator::NotEq => !equal,
        FilterOperator::Regex => false,
        ordered => {
            let Some(ordering) = compare_values(actual, expected) else {
                return false;
            };
            match ordered {
                FilterOperator::Lt => ordering == Ordering::Less,
                FilterOperator::LtEq => ordering != Ordering::Greater,
                FilterOperator::Gt => ordering == Ordering::Greater,
                FilterOperator::GtEq => ordering != Ordering::Less,
                _ => unreachable!(),
            }
        }
    }
}

// ============================================================================
// RUN QUERY
// ============================================================================

/// Parameters of a "list runs" request.
#[derive(Debug, Clone, Default)]
pub struct RunQuery {
    pub sort_by: Option<String>,
    pub direction: SortDirection,
    pub start: usize,
    pub limit: Option<usize>,
    pub filter: Option<QueryFilter>,
}

impl RunQuery {
    /// Every run, in discovery order.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn sort_by(mut self, field: &str, direction: SortDirection) -> Self {
        self.sort_by = Some(field.to_string());
        self.direction = direction;
        self
    }

    pub fn start(mut self, start: usize) -> Self {
        self.start = start;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn filter(mut self, filter: QueryFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// No sort and no filter: results can stream straight off the run index.
    pub fn is_streaming(&self) -> bool {
        self.sort_by.is_none() && self.filter.is_none()
    }

    pub fn paginate<'a, T: 'a>(
        &self,
        items: impl Iterator<Item = T> + 'a,
    ) -> Box<dyn Iterator<Item = T> + 'a> {
        let items = items.skip(self.start);
        match self.limit {
            Some(limit) => Box::new(items.take(limit)),
            None => Box::new(items),
        }
    }
}

/// Rank of a JSON type in sort order: null, bool, number, string, array, object.
fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over sort keys: by type rank, then by value within a type.
/// Arrays and objects tie with their own kind.
pub fn sort_order(left: &Value, right: &Value) -> Ordering {
    type_rank(left)
        .cmp(&type_rank(right))
        .then_with(|| compare_values(left, right).unwrap_or(Ordering::Equal))
}

/// Stable sort by a dotted field path. Missing values sort first when ascending.
pub fn sort_runs(runs: &mut Vec<Run>, field: &str, direction: SortDirection) {
    let mut keyed: Vec<(Value, Run)> = runs
        .drain(..)
        .map(|run| (run.field(field).unwrap_or(Value::Null), run))
        .collect();

    keyed.sort_by(|(a, _), (b, _)| {
        let ordering = sort_order(a, b);
        match direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    });

    runs.extend(keyed.into_iter().map(|(_, run)| run));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::Path;

    fn run(id: &str, lr: Value, status: &str) -> Run {
        Run::from_fragments(
            id,
            json!({
                "start_time": "2020-01-01T00:00:00.000000",
                "stop_time": "2020-01-01T01:00:00.000000",
                "heartbeat": "2020-01-01T00:30:00.000000",
                "status": status,
            }),
            json!({"lr": lr}),
            json!({}),
            Path::new("run.json"),
        )
        .unwrap()
    }

    #[test]
    fn test_parse_filter_document() {
        let filter = QueryFilter::from_json(
            r#"{"type": "and", "filters": [
                {"field": "config.lr", "operator": ">=", "value": 0.01},
                {"type": "or", "filters": [
                    {"field": "status", "operator": "==", "value": "COMPLETED"},
                    {"field": "status", "operator": "regex", "value": "^RUN"}
                ]}
            ]}"#,
        )
        .unwrap();

        let QueryFilter::Group { kind, filters } = &filter else {
            panic!("expected group");
        };
        assert_eq!(*kind, GroupKind::And);
        assert_eq!(filters.len(), 2);
    }

    #[test]
    fn test_unknown_operator_is_invalid_query() {
        let err = QueryFilter::from_json(r#"{"field": "x", "operator": "~~", "value": 1}"#).unwrap_err();
        assert!(matches!(err, DataError::InvalidQuery(_)));

        let bad_regex = QueryFilter::clause("status", FilterOperator::Regex, json!("(unclosed"));
        assert!(matches!(bad_regex.compile(), Err(DataError::InvalidQuery(_))));
    }

    #[test]
    fn test_filter_matching() {
        let fast = run("a", json!(0.1), "COMPLETED");
        let slow = run("b", json!(0.001), "RUNNING");

        let filter = QueryFilter::and(vec![QueryFilter::clause("config.lr", FilterOperator::Gt, json!(0.01))])
            .compile()
            .unwrap();
        assert!(filter.matches(&fast));
        assert!(!filter.matches(&slow));

        let regex = QueryFilter::clause("status", FilterOperator::Regex, json!("^RUN"))
            .compile()
            .unwrap();
        assert!(regex.matches(&slow));
        assert!(!regex.matches(&fast));

        let missing = QueryFilter::clause("config.momentum", FilterOperator::Eq, Value::Null)
            .compile()
            .unwrap();
        assert!(missing.matches(&fast));

        // Mixed types are never ordered
        let mixed = QueryFilter::clause("status", FilterOperator::Lt, json!(5)).compile().unwrap();
        assert!(!mixed.matches(&fast));
    }

    #[test]
    fn test_empty_and_matches_everything() {
        let filter = QueryFilter::and(vec![]).compile().unwrap();
        assert!(filter.matches(&run("a", json!(1), "COMPLETED")));
        assert!(!QueryFilter::or(vec![]).compile().unwrap().matches(&run("a", json!(1), "X")));
    }

    #[test]
    fn test_integer_and_float_equality() {
        let r = run("a", json!(1), "COMPLETED");
        let filter = QueryFilter::clause("config.lr", FilterOperator::Eq, json!(1.0)).compile().unwrap();
        assert!(filter.matches(&r));
    }

    #[test]
    fn test_sort_runs_missing_first_ascending() {
        let mut runs = vec![
            run("a", json!(0.5), "X"),
            run("b", Value::Null, "X"),
            run("c", json!(0.1), "X"),
        ];
        sort_runs(&mut runs, "config.lr", SortDirection::Asc);
        let ids: Vec<_> = runs.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);

        sort_runs(&mut runs, "config.lr", SortDirection::Desc);
        let ids: Vec<_> = runs.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "b"]);
    }

    #[test]
    fn test_sort_runs_mixed_types() {
        let keys = [
            json!("b"),
            json!(3),
            json!(true),
            json!(0.5),
            Value::Null,
            json!("a"),
            json!(false),
            json!(-2),
            json!([1]),
            json!(10),
        ];
        let mut runs: Vec<_> = keys
            .iter()
            .enumerate()
            .map(|(i, lr)| run(&i.to_string(), lr.clone(), "X"))
            .collect();

        sort_runs(&mut runs, "config.lr", SortDirection::Asc);
        let sorted: Vec<_> = runs.iter().map(|r| r.config["lr"].clone()).collect();
        assert_eq!(
            sorted,
            vec![
                Value::Null,
                json!(false),
                json!(true),
                json!(-2),
                json!(0.5),
                json!(3),
                json!(10),
                json!("a"),
                json!("b"),
                json!([1]),
            ]
        );

        sort_runs(&mut runs, "config.lr", SortDirection::Desc);
        let numbers: Vec<_> = runs.iter().filter_map(|r| r.config["lr"].as_f64()).collect();
        assert_eq!(numbers, vec![10.0, 3.0, 0.5, -2.0]);
        assert!(runs[0].config["lr"].is_array());
        assert!(runs[runs.len() - 1].config["lr"].is_null());
    }

    #[test]
    fn test_pagination() {
        let query = RunQuery::all().start(1).limit(2);
        let page: Vec<_> = query.paginate(0..10).collect();
        assert_eq!(page, vec![1, 2]);
        assert!(query.is_streaming());
        assert!(!RunQuery::all().sort_by("_id", SortDirection::Desc).is_streaming());
    }

    #[test]
    fn test_sort_direction_from_str() {
        assert_eq!("DESC".parse::<SortDirection>().unwrap(), SortDirection::Desc);
        assert_eq!("1".parse::<SortDirection>().unwrap(), SortDirection::Asc);
        assert!("sideways".parse::<SortDirection>().is_err());
    }
}
