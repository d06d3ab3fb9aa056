//! Result wrappers returned by the query executor.
//!
//! [`RowResult`] backs single-row queries (`first`, `one`), [`RowResults`]
//! backs multi-row queries (`all`, `fetch`, `unique`). Both carry the scalar
//! flag chosen when the query was issued; it never changes afterwards.

use crate::db::types::{RowDecode, row_key};
use crate::error::{DbError, DbResult};
use sqlx::any::AnyRow;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;

/// Result of a single-row query.
pub struct RowResult {
    rows: Vec<AnyRow>,
    is_scalar: bool,
}

impl fmt::Debug for RowResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowResult")
            .field("len", &self.rows.len())
            .field("is_scalar", &self.is_scalar)
            .finish()
    }
}

impl RowResult {
    pub fn new(rows: Vec<AnyRow>, is_scalar: bool) -> Self {
        Self { rows, is_scalar }
    }

    pub fn is_scalar(&self) -> bool {
        self.is_scalar
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First row decoded as `T`, or `None` when the query returned nothing.
    pub fn first<T: RowDecode>(&self) -> DbResult<Option<T>> {
        self.rows
            .first()
            .map(|row| T::decode(row, self.is_scalar))
            .transpose()
    }

    /// The only row decoded as `T`.
    ///
    /// Zero rows or more than one row is an [`DbError::EmptyOrAmbiguous`] error.
    pub fn one<T: RowDecode>(&self) -> DbResult<T> {
        match self.rows.as_slice() {
            [row] => T::decode(row, self.is_scalar),
            rows => Err(DbError::empty_or_ambiguous(rows.len())),
        }
    }
}

/// Result of a multi-row query.
///
/// Rows are handed out once: `all` and `fetch` consume what they return.
pub struct RowResults {
    rows: VecDeque<AnyRow>,
    is_scalar: bool,
}

impl fmt::Debug for RowResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowResults")
            .field("len", &self.rows.len())
            .field("is_scalar", &self.is_scalar)
            .finish()
    }
}

impl RowResults {
    pub fn new(rows: Vec<AnyRow>, is_scalar: bool) -> Self {
        Self {
            rows: rows.into(),
            is_scalar,
        }
    }

    pub fn is_scalar(&self) -> bool {
        self.is_scalar
    }

    /// Rows not yet consumed.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Every remaining row decoded as `T`.
    pub fn all<T: RowDecode>(&mut self) -> DbResult<Vec<T>> {
        let is_scalar = self.is_scalar;
        self.rows
            .drain(..)
            .map(|row| T::decode(&row, is_scalar))
            .collect()
    }

    /// Up to `size` of the remaining rows decoded as `T`.
    pub fn fetch<T: RowDecode>(&mut self, size: usize) -> DbResult<Vec<T>> {
        let is_scalar = self.is_scalar;
        let take = size.min(self.rows.len());
        self.rows
            .drain(..take)
            .map(|row| T::decode(&row, is_scalar))
            .collect()
    }

    /// Drop duplicate remaining rows, keeping the first occurrence of each.
    ///
    /// Two rows are duplicates when their column values match in the active
    /// view (first column only for scalar results).
    pub fn unique(self) -> RowResults {
        let is_scalar = self.is_scalar;
        let mut position = 0;
        self.unique_by(|row| {
            position += 1;
            row_key(row, is_scalar, position)
        })
    }

    /// Drop duplicate remaining rows using a caller-supplied key.
    pub fn unique_by<K, F>(self, mut key: F) -> RowResults
    where
        K: Eq + Hash,
        F: FnMut(&AnyRow) -> K,
    {
        let mut seen = HashSet::new();
        let rows = self
            .rows
            .into_iter()
            .filter(|row| seen.insert(key(row)))
            .collect::<Vec<_>>();
        RowResults::new(rows, self.is_scalar)
    }
}
