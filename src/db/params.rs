//! Parameter binding utilities for database queries.
//!
//! Statements run through the `Any` driver, so a single binder covers every
//! backend.

use crate::models::{QueryParam, Statement};
use sqlx::Any;
use sqlx::any::AnyArguments;
use sqlx::query::Query;

/// Bind a parameter to an `Any` query.
pub(crate) fn bind_any_param<'q>(
    query: Query<'q, Any, AnyArguments<'q>>,
    param: &'q QueryParam,
) -> Query<'q, Any, AnyArguments<'q>> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        QueryParam::Bytes(v) => query.bind(v.as_slice()),
    }
}

/// Build an executable query from a statement, binding its parameters in order.
pub(crate) fn build_query(statement: &Statement) -> Query<'_, Any, AnyArguments<'_>> {
    statement
        .params
        .iter()
        .fold(sqlx::query(&statement.sql), bind_any_param)
}
