use serde::{Deserialize, Serialize};

use crate::types::{
    PageNo, RowId,
    value::{DataType, Value},
};

/// One decoded leaf-table cell: the row id, its typed values and the overflow
/// pages that were read while assembling the payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub row_id: RowId,
    pub values: Vec<Value>,
    pub overflow_pages: Vec<PageNo>,
}

impl Column {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_row_id(row_id: RowId, values: Vec<Value>) -> Self {
        Self {
            row_id,
            values,
            overflow_pages: Vec::new(),
        }
    }

    pub fn clear(&mut self) {
        self.row_id = 0;
        self.values.clear();
        self.overflow_pages.clear();
    }

    pub fn row_id(&self) -> RowId {
        self.row_id
    }

    pub fn set_row_id(&mut self, row_id: RowId) {
        self.row_id = row_id;
    }

    pub fn overflow_pages(&self) -> &[PageNo] {
        &self.overflow_pages
    }

    pub fn add_overflow_page(&mut self, pgno: PageNo) {
        self.overflow_pages.push(pgno);
    }

    pub fn add_null(&mut self) {
        self.values.push(Value::Null);
    }

    pub fn add_integer(&mut self, value: i32) {
        self.values.push(Value::Integer(value as i64));
    }

    pub fn add_integer64(&mut self, value: i64) {
        self.values.push(Value::Integer(value));
    }

    pub fn add_number(&mut self, value: f64) {
        self.values.push(Value::Number(value));
    }

    /// Adds text, dropping everything from the first NUL on.
    pub fn add_text(&mut self, text: &str) {
        let text = match text.find('\0') {
            Some(end) => &text[..end],
            None => text,
        };
        self.values.push(Value::Text(text.to_string()));
    }

    /// Adds length-delimited text that carries no terminator. Bytes that are
    /// not valid UTF-8 are kept as they are.
    pub fn add_text_bytes(&mut self, bytes: &[u8]) {
        self.values.push(Value::text_from_bytes(bytes));
    }

    pub fn add_binary(&mut self, bytes: &[u8]) {
        self.values.push(Value::Binary(bytes.to_vec()));
    }

    pub fn count(&self) -> usize {
        self.values.len()
    }

    pub fn get_value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn value_type(&self, index: usize) -> DataType {
        self.values
            .get(index)
            .map(Value::data_type)
            .unwrap_or(DataType::Null)
    }

    /// 32-bit view; values outside `i32` wrap.
    pub fn integer(&self, index: usize) -> i32 {
        self.integer64(index) as i32
    }

    pub fn integer64(&self, index: usize) -> i64 {
        self.values.get(index).map(Value::as_integer64).unwrap_or(0)
    }

    pub fn number(&self, index: usize) -> f64 {
        self.values.get(index).map(Value::as_number).unwrap_or(0.0)
    }

    pub fn text(&self, index: usize) -> Option<&str> {
        self.values.get(index).and_then(Value::as_text)
    }

    /// Raw bytes of a text value, including text that is not valid UTF-8.
    pub fn text_bytes(&self, index: usize) -> Option<&[u8]> {
        self.values.get(index).and_then(Value::as_text_bytes)
    }

    pub fn binary(&self, index: usize) -> Option<&[u8]> {
        self.values.get(index).and_then(Value::as_binary)
    }

    pub fn bytes(&self, index: usize) -> usize {
        self.values.get(index).map(Value::bytes).unwrap_or(0)
    }
}
