//! Typed row decoding.
//!
//! A query result has two views:
//! 1. the **scalar** view, where each row collapses to its first column
//! 2. the **record** view, where each row is kept whole
//!
//! [`RowDecode`] lets the caller's return type decide how it is extracted from
//! either view. Primitive types only make sense as scalars, tuples only as
//! records, and `FromRow` structs (via [`impl_row_decode!`](crate::impl_row_decode))
//! as both. Asking a view for a shape it cannot produce is a type mismatch.

use crate::error::{DbError, DbResult};
use sqlx::any::AnyRow;
use sqlx::{FromRow, Row};
use std::any::type_name;
use tracing::debug;

/// A type that can be decoded from a result row.
pub trait RowDecode: Sized {
    /// Decode from the first column of the row.
    fn decode_scalar(row: &AnyRow) -> DbResult<Self>;

    /// Decode from the whole row.
    fn decode_record(row: &AnyRow) -> DbResult<Self>;

    /// Decode using the view selected by `is_scalar`.
    fn decode(row: &AnyRow, is_scalar: bool) -> DbResult<Self> {
        if is_scalar {
            Self::decode_scalar(row)
        } else {
            Self::decode_record(row)
        }
    }
}

/// Map a driver decode failure to a type mismatch for `T`.
pub(crate) fn decode_error<T>(err: sqlx::Error) -> DbError {
    debug!(expected = type_name::<T>(), error = %err, "Row decode failed");
    DbError::type_mismatch(type_name::<T>(), err.to_string())
}

/// The requested type has no representation in this view.
pub fn view_mismatch<T>(view: &str) -> DbError {
    DbError::type_mismatch(
        type_name::<T>(),
        format!("cannot be produced from the {} view of a row", view),
    )
}

/// Decode the whole row through `FromRow`, mapping failures to type mismatches.
pub fn decode_from_row<T>(row: &AnyRow) -> DbResult<T>
where
    T: for<'r> FromRow<'r, AnyRow>,
{
    T::from_row(row).map_err(decode_error::<T>)
}

macro_rules! impl_scalar_decode {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl RowDecode for $ty {
                fn decode_scalar(row: &AnyRow) -> DbResult<Self> {
                    row.try_get::<$ty, _>(0).map_err(decode_error::<$ty>)
                }

                fn decode_record(_row: &AnyRow) -> DbResult<Self> {
                    Err(view_mismatch::<$ty>("record"))
                }
            }

            impl RowDecode for Option<$ty> {
                fn decode_scalar(row: &AnyRow) -> DbResult<Self> {
                    row.try_get::<Option<$ty>, _>(0)
                        .map_err(decode_error::<Option<$ty>>)
                }

                fn decode_record(_row: &AnyRow) -> DbResult<Self> {
                    Err(view_mismatch::<Option<$ty>>("record"))
                }
            }
        )+
    };
}

impl_scalar_decode!(bool, i16, i32, i64, f32, f64, String, Vec<u8>);

macro_rules! impl_tuple_decode {
    ($($t:ident),+) => {
        impl<$($t),+> RowDecode for ($($t,)+)
        where
            Self: for<'r> FromRow<'r, AnyRow>,
        {
            fn decode_scalar(_row: &AnyRow) -> DbResult<Self> {
                Err(view_mismatch::<Self>("scalar"))
            }

            fn decode_record(row: &AnyRow) -> DbResult<Self> {
                decode_from_row(row)
            }
        }
    };
}

impl_tuple_decode!(T1);
impl_tuple_decode!(T1, T2);
impl_tuple_decode!(T1, T2, T3);
impl_tuple_decode!(T1, T2, T3, T4);

// =============================================================================
// Row identity
// =============================================================================

/// One column value of a row, in a hashable form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyPart {
    Null,
    Int(i64),
    /// Bit pattern of the float
    Float(u64),
    Text(String),
    Bool(bool),
    Bytes(Vec<u8>),
    /// Column whose value could not be read; keyed by the row's position so
    /// it is never treated as a duplicate.
    Opaque(usize),
}

/// Read the hashable value of column `idx`, trying the common types in turn.
fn key_part(row: &AnyRow, idx: usize, position: usize) -> KeyPart {
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return v.map_or(KeyPart::Null, KeyPart::Int);
    }
    if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
        return v.map_or(KeyPart::Null, |v| KeyPart::Int(v.into()));
    }
    if let Ok(v) = row.try_get::<Option<i16>, _>(idx) {
        return v.map_or(KeyPart::Null, |v| KeyPart::Int(v.into()));
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
        return v.map_or(KeyPart::Null, |v| KeyPart::Float(v.to_bits()));
    }
    if let Ok(v) = row.try_get::<Option<f32>, _>(idx) {
        return v.map_or(KeyPart::Null, |v| KeyPart::Float(f64::from(v).to_bits()));
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
        return v.map_or(KeyPart::Null, KeyPart::Text);
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
        return v.map_or(KeyPart::Null, KeyPart::Bool);
    }
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
        return v.map_or(KeyPart::Null, KeyPart::Bytes);
    }
    KeyPart::Opaque(position)
}

/// Default identity of a row in the given view: the first column for the
/// scalar view, every column for the record view.
pub fn row_key(row: &AnyRow, is_scalar: bool, position: usize) -> Vec<KeyPart> {
    let columns = if is_scalar { row.len().min(1) } else { row.len() };
    (0..columns).map(|idx| key_part(row, idx, position)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_mismatch_names_type() {
        let err = view_mismatch::<i64>("record");
        assert!(err.to_string().contains("i64"));
        assert!(err.to_string().contains("record view"));
    }

    #[test]
    fn test_key_part_equality() {
        assert_eq!(KeyPart::Int(1), KeyPart::Int(1));
        assert_ne!(KeyPart::Int(1), KeyPart::Float(1.0_f64.to_bits()));
        assert_ne!(KeyPart::Opaque(0), KeyPart::Opaque(1));
        assert_ne!(KeyPart::Null, KeyPart::Text(String::new()));
    }
}
