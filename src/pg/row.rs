//! Row factories: how a cursor assembles converted column values into rows.

use std::collections::HashMap;
use std::ops::Index;
use std::sync::Arc;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use super::cursor::Column;
use super::types::Value;

/// Builds the row representation a cursor hands out.
///
/// `bind` is called once per execute with the new result's columns;
/// `make_row` receives the converted values in column order.
pub trait RowFactory {
    type Row;

    fn bind(&mut self, _columns: &[Column]) {}

    fn make_row(&self, values: Vec<Value>) -> Self::Row;
}

/// Rows as plain `Vec<Value>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TupleRowFactory;

impl RowFactory for TupleRowFactory {
    type Row = Vec<Value>;

    #[inline]
    fn make_row(&self, values: Vec<Value>) -> Vec<Value> {
        values
    }
}

/// Rows addressable by position or column name.
#[derive(Debug, Clone, Default)]
pub struct DictRowFactory {
    index: Arc<HashMap<String, usize>>,
}

impl RowFactory for DictRowFactory {
    type Row = DictRow;

    fn bind(&mut self, columns: &[Column]) {
        // duplicate names resolve to the last column carrying them
        let index = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), i))
            .collect();
        self.index = Arc::new(index);
    }

    fn make_row(&self, values: Vec<Value>) -> DictRow {
        DictRow {
            values,
            index: Arc::clone(&self.index),
        }
    }
}

/// A row whose values can be looked up by column name.
#[derive(Debug, Clone, PartialEq)]
pub struct DictRow {
    values: Vec<Value>,
    index: Arc<HashMap<String, usize>>,
}

impl DictRow {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.index.get(name).and_then(|&i| self.values.get(i))
    }

    pub fn get_index(&self, i: usize) -> Option<&Value> {
        self.values.get(i)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Column names in column order.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<(&str, usize)> = self.index.iter().map(|(k, &i)| (k.as_str(), i)).collect();
        keys.sort_by_key(|&(_, i)| i);
        keys.into_iter().map(|(k, _)| k).collect()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

impl Index<usize> for DictRow {
    type Output = Value;

    fn index(&self, i: usize) -> &Value {
        &self.values[i]
    }
}

impl Index<&str> for DictRow {
    type Output = Value;

    /// Panics if no column has that name; use [`DictRow::get`] to probe.
    fn index(&self, name: &str) -> &Value {
        match self.get(name) {
            Some(v) => v,
            None => panic!("no column named {name:?}"),
        }
    }
}

/// Serializes as a map from column name to value, in column order.
impl Serialize for DictRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let keys = self.keys();
        let mut map = serializer.serialize_map(Some(keys.len()))?;
        for key in keys {
            map.serialize_entry(key, &self[key])?;
        }
        map.end()
    }
}
