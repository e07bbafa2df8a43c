use serde_json::{Map, Value};

/// One row of a graph query result, addressable by column name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record {
	pub columns: Vec<String>,
	pub values: Vec<Value>,
}
impl Record {
	pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
		Self { columns, values }
	}

	pub fn get(&self, column: &str) -> Option<&Value> {
		let idx = self.columns.iter().position(|name| name == column)?;

		self.values.get(idx)
	}

	pub fn get_str(&self, column: &str) -> Option<&str> {
		self.get(column).and_then(Value::as_str)
	}

	pub fn get_f64(&self, column: &str) -> Option<f64> {
		self.get(column).and_then(Value::as_f64)
	}

	pub fn get_i64(&self, column: &str) -> Option<i64> {
		self.get(column).and_then(Value::as_i64)
	}

	pub fn get_map(&self, column: &str) -> Option<&Map<String, Value>> {
		self.get(column).and_then(Value::as_object)
	}

	pub fn get_strings(&self, column: &str) -> Vec<String> {
		self.get(column)
			.and_then(Value::as_array)
			.map(|items| items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
			.unwrap_or_default()
	}
}
