use std::cmp::Ordering;

use serde_json::Value;

use crate::engine::config::{OrderByClause, OrderDirection, QueryClauses, WhereClause, WhereFilterOp};
use crate::engine::DocData;

/// Applies `clauses` to a set of documents and returns the filtered, ordered
/// and bounded result.
///
/// Documents are ordered by the `orderBy` fields and then by id. `start_after`
/// is a cursor produced by [`cursor_for`]; only documents sorting after it are
/// kept.
pub fn apply_query<I>(
    documents: I,
    clauses: &QueryClauses,
    start_after: Option<&Value>,
) -> Vec<(String, DocData)>
where
    I: IntoIterator<Item = (String, DocData)>,
{
    let mut filtered: Vec<(String, DocData)> = documents
        .into_iter()
        .filter(|(_, data)| matches_filters(data, &clauses.where_clauses))
        .collect();

    filtered.sort_by(|(left_id, left), (right_id, right)| {
        compare_docs(left_id, left, right_id, right, &clauses.order_by)
    });

    if let Some(Value::Array(cursor)) = start_after {
        filtered.retain(|(id, data)| {
            compare_to_cursor(id, data, cursor, &clauses.order_by) == Ordering::Greater
        });
    }

    if let Some(limit) = clauses.limit {
        filtered.truncate(limit as usize);
    }
    filtered
}

/// Position of a document in its query order, usable as `start_after`.
pub fn cursor_for(id: &str, data: &DocData, order_by: &[OrderByClause]) -> Value {
    let mut position: Vec<Value> = order_by
        .iter()
        .map(|order| field_value(data, &order.field).cloned().unwrap_or(Value::Null))
        .collect();
    position.push(Value::String(id.to_string()));
    Value::Array(position)
}

pub fn matches_filters(data: &DocData, filters: &[WhereClause]) -> bool {
    filters.iter().all(|filter| match field_value(data, &filter.field) {
        Some(value) => evaluate_filter(filter, value),
        None => matches!(filter.op, WhereFilterOp::NotEqual) && !filter.value.is_null(),
    })
}

fn evaluate_filter(filter: &WhereClause, value: &Value) -> bool {
    match filter.op {
        WhereFilterOp::Equal => value == &filter.value,
        WhereFilterOp::NotEqual => value != &filter.value,
        WhereFilterOp::LessThan => compare_values(value, &filter.value) == Some(Ordering::Less),
        WhereFilterOp::LessThanOrEqual => matches!(
            compare_values(value, &filter.value),
            Some(Ordering::Less | Ordering::Equal)
        ),
        WhereFilterOp::GreaterThan => {
            compare_values(value, &filter.value) == Some(Ordering::Greater)
        }
        WhereFilterOp::GreaterThanOrEqual => matches!(
            compare_values(value, &filter.value),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        WhereFilterOp::ArrayContains => match value {
            Value::Array(array) => array.contains(&filter.value),
            _ => false,
        },
        WhereFilterOp::ArrayContainsAny => match (value, &filter.value) {
            (Value::Array(array), Value::Array(needles)) => {
                needles.iter().any(|needle| array.contains(needle))
            }
            _ => false,
        },
        WhereFilterOp::In => match &filter.value {
            Value::Array(candidates) => candidates.contains(value),
            _ => false,
        },
        WhereFilterOp::NotIn => match &filter.value {
            Value::Array(candidates) => !value.is_null() && !candidates.contains(value),
            _ => false,
        },
    }
}

/// Looks up a dot-separated field path.
pub fn field_value<'a>(data: &'a DocData, field: &str) -> Option<&'a Value> {
    let mut segments = field.split('.');
    let mut current = data.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Ordering between values of the same kind; `None` across kinds.
fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
        },
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn kind_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order used for sorting: by kind first, then by value.
fn sort_values(left: &Value, right: &Value) -> Ordering {
    compare_values(left, right).unwrap_or_else(|| kind_rank(left).cmp(&kind_rank(right)))
}

fn directed(ordering: Ordering, direction: OrderDirection) -> Ordering {
    match direction {
        OrderDirection::Asc => ordering,
        OrderDirection::Desc => ordering.reverse(),
    }
}

fn compare_docs(
    left_id: &str,
    left: &DocData,
    right_id: &str,
    right: &DocData,
    order_by: &[OrderByClause],
) -> Ordering {
    for order in order_by {
        let ordering = sort_values(
            field_value(left, &order.field).unwrap_or(&Value::Null),
            field_value(right, &order.field).unwrap_or(&Value::Null),
        );
        let ordering = directed(ordering, order.direction);
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    left_id.cmp(right_id)
}

fn compare_to_cursor(id: &str, data: &DocData, cursor: &[Value], order_by: &[OrderByClause]) -> Ordering {
    for (index, order) in order_by.iter().enumerate() {
        let Some(bound) = cursor.get(index) else {
            return Ordering::Greater;
        };
        let value = field_value(data, &order.field).unwrap_or(&Value::Null);
        let ordering = directed(sort_values(value, bound), order.direction);
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    match cursor.get(order_by.len()).and_then(Value::as_str) {
        Some(cursor_id) => id.cmp(cursor_id),
        None => Ordering::Greater,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pokedex() -> Vec<(String, DocData)> {
        [
            ("001", json!({"name": "Bulbasaur", "type": ["grass", "poison"], "stats": {"hp": 45}})),
            ("004", json!({"name": "Charmander", "type": ["fire"], "stats": {"hp": 39}})),
            ("007", json!({"name": "Squirtle", "type": ["water"], "stats": {"hp": 44}})),
            ("025", json!({"name": "Pikachu", "type": ["electric"], "stats": {"hp": 35}})),
        ]
        .into_iter()
        .map(|(id, data)| (id.to_string(), data.as_object().cloned().unwrap()))
        .collect()
    }

    fn ids(docs: &[(String, DocData)]) -> Vec<&str> {
        docs.iter().map(|(id, _)| id.as_str()).collect()
    }

    fn clause(field: &str, op: WhereFilterOp, value: Value) -> WhereClause {
        WhereClause {
            field: field.to_string(),
            op,
            value,
        }
    }

    #[test]
    fn filters_on_nested_fields() {
        let clauses = QueryClauses {
            where_clauses: vec![clause("stats.hp", WhereFilterOp::GreaterThanOrEqual, json!(40))],
            ..Default::default()
        };
        assert_eq!(ids(&apply_query(pokedex(), &clauses, None)), vec!["001", "007"]);
    }

    #[test]
    fn array_and_membership_filters() {
        let contains = QueryClauses {
            where_clauses: vec![clause("type", WhereFilterOp::ArrayContainsAny, json!(["fire", "water"]))],
            ..Default::default()
        };
        assert_eq!(ids(&apply_query(pokedex(), &contains, None)), vec!["004", "007"]);

        let not_in = QueryClauses {
            where_clauses: vec![clause("name", WhereFilterOp::NotIn, json!(["Pikachu", "Squirtle"]))],
            ..Default::default()
        };
        assert_eq!(ids(&apply_query(pokedex(), &not_in, None)), vec!["001", "004"]);
    }

    #[test]
    fn orders_and_pages_with_cursor() {
        let clauses = QueryClauses {
            order_by: vec![OrderByClause {
                field: "stats.hp".to_string(),
                direction: OrderDirection::Desc,
            }],
            limit: Some(2),
            ..Default::default()
        };
        let first_page = apply_query(pokedex(), &clauses, None);
        assert_eq!(ids(&first_page), vec!["001", "007"]);

        let (last_id, last) = first_page.last().unwrap();
        let cursor = cursor_for(last_id, last, &clauses.order_by);
        let second_page = apply_query(pokedex(), &clauses, Some(&cursor));
        assert_eq!(ids(&second_page), vec!["004", "025"]);
    }

    #[test]
    fn missing_field_only_matches_not_equal() {
        let missing = QueryClauses {
            where_clauses: vec![clause("nickname", WhereFilterOp::NotEqual, json!("Sparky"))],
            ..Default::default()
        };
        assert_eq!(apply_query(pokedex(), &missing, None).len(), 4);
    }
}
