//! Declarative macros for row decoding.
//!
//! Mapped row structs derive `sqlx::FromRow` and opt into typed result access
//! with [`impl_row_decode!`]. The generated impl reads the whole row in both
//! the scalar and the record view, the same way an entity select yields the
//! entity either way.

/// Implement [`RowDecode`](crate::db::types::RowDecode) for one or more
/// `sqlx::FromRow` types.
///
/// # Example
///
/// ```ignore
/// #[derive(Debug, sqlx::FromRow)]
/// struct User {
///     id: i64,
///     name: String,
/// }
///
/// impl_row_decode!(User);
/// ```
#[macro_export]
macro_rules! impl_row_decode {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::db::types::RowDecode for $ty {
                fn decode_scalar(row: &$crate::db::AnyRow) -> $crate::error::DbResult<Self> {
                    $crate::db::types::decode_from_row(row)
                }

                fn decode_record(row: &$crate::db::AnyRow) -> $crate::error::DbResult<Self> {
                    $crate::db::types::decode_from_row(row)
                }
            }
        )+
    };
}
