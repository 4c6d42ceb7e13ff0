//! Schema checks for implementation-specific TOML tables.
//!
//! Storage backends and notification providers each receive an opaque
//! `toml::Value` from configuration. Before a factory is invoked the table is
//! checked against the schema the implementation publishes, so that a typo in
//! `storage.implementations.file` surfaces at startup rather than on the first
//! write.

use async_trait::async_trait;
use thiserror::Error;

/// Errors produced while checking a configuration table.
#[derive(Debug, Error)]
pub enum ValidationError {
	#[error("Missing required field: {0}")]
	MissingField(String),
	#[error("Invalid value for field '{field}': {message}")]
	InvalidValue { field: String, message: String },
	#[error("Type mismatch for field '{field}': expected {expected}, got {actual}")]
	TypeMismatch {
		field: String,
		expected: String,
		actual: String,
	},
	#[error("Failed to deserialize config: {0}")]
	DeserializationError(String),
}

impl ValidationError {
	/// Prefixes the field path with `parent`, used when descending into tables.
	fn nested_under(self, parent: &str) -> Self {
		match self {
			ValidationError::MissingField(f) => {
				ValidationError::MissingField(format!("{}.{}", parent, f))
			},
			ValidationError::InvalidValue { field, message } => ValidationError::InvalidValue {
				field: format!("{}.{}", parent, field),
				message,
			},
			ValidationError::TypeMismatch {
				field,
				expected,
				actual,
			} => ValidationError::TypeMismatch {
				field: format!("{}.{}", parent, field),
				expected,
				actual,
			},
			other => other,
		}
	}
}

/// Expected shape of a single configuration value.
#[derive(Debug)]
pub enum FieldType {
	String,
	/// Integer with optional inclusive bounds.
	Integer { min: Option<i64>, max: Option<i64> },
	/// Float with optional inclusive bounds. Integers are accepted too.
	Float { min: Option<f64>, max: Option<f64> },
	Boolean,
	/// A string restricted to a fixed set of spellings.
	OneOf(Vec<&'static str>),
	Array(Box<FieldType>),
	Table(Schema),
}

/// Extra check run after the type check succeeds.
pub type FieldValidator = Box<dyn Fn(&toml::Value) -> Result<(), String> + Send + Sync>;

/// A named entry in a [`Schema`].
pub struct Field {
	pub name: String,
	pub field_type: FieldType,
	pub validator: Option<FieldValidator>,
}

impl std::fmt::Debug for Field {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Field")
			.field("name", &self.name)
			.field("field_type", &self.field_type)
			.field("has_validator", &self.validator.is_some())
			.finish()
	}
}

impl Field {
	pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
		Self {
			name: name.into(),
			field_type,
			validator: None,
		}
	}

	/// Attaches a custom check that runs once the value has the right type.
	pub fn with_validator<F>(mut self, validator: F) -> Self
	where
		F: Fn(&toml::Value) -> Result<(), String> + Send + Sync + 'static,
	{
		self.validator = Some(Box::new(validator));
		self
	}

	fn check(&self, value: &toml::Value) -> Result<(), ValidationError> {
		check_type(&self.name, value, &self.field_type)?;
		if let Some(validator) = &self.validator {
			validator(value).map_err(|message| ValidationError::InvalidValue {
				field: self.name.clone(),
				message,
			})?;
		}
		Ok(())
	}
}

/// Required and optional fields of a configuration table.
///
/// Unknown keys are ignored so that implementations can grow new options
/// without breaking older configuration files.
#[derive(Debug)]
pub struct Schema {
	pub required: Vec<Field>,
	pub optional: Vec<Field>,
}

impl Schema {
	pub fn new(required: Vec<Field>, optional: Vec<Field>) -> Self {
		Self { required, optional }
	}

	/// Checks `config`, which must be a table.
	///
	/// Returns the first problem found: a missing required field, a value of
	/// the wrong type or out of range, or a failed custom check. Nested tables
	/// report their fields with a dotted path.
	pub fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let table = config
			.as_table()
			.ok_or_else(|| ValidationError::TypeMismatch {
				field: "root".to_string(),
				expected: "table".to_string(),
				actual: config.type_str().to_string(),
			})?;

		for field in &self.required {
			let value = table
				.get(&field.name)
				.ok_or_else(|| ValidationError::MissingField(field.name.clone()))?;
			field.check(value)?;
		}

		for field in &self.optional {
			if let Some(value) = table.get(&field.name) {
				field.check(value)?;
			}
		}

		Ok(())
	}
}

fn mismatch(field: &str, expected: &str, value: &toml::Value) -> ValidationError {
	ValidationError::TypeMismatch {
		field: field.to_string(),
		expected: expected.to_string(),
		actual: value.type_str().to_string(),
	}
}

fn out_of_range<T: std::fmt::Display>(
	field: &str,
	value: T,
	min: Option<T>,
	max: Option<T>,
) -> ValidationError {
	let message = match (min, max) {
		(Some(min), Some(max)) => format!("Value {} is outside {}..={}", value, min, max),
		(Some(min), None) => format!("Value {} is less than minimum {}", value, min),
		(None, Some(max)) => format!("Value {} is greater than maximum {}", value, max),
		(None, None) => format!("Value {} is out of range", value),
	};
	ValidationError::InvalidValue {
		field: field.to_string(),
		message,
	}
}

fn check_type(
	field_name: &str,
	value: &toml::Value,
	expected: &FieldType,
) -> Result<(), ValidationError> {
	match expected {
		FieldType::String => {
			if !value.is_str() {
				return Err(mismatch(field_name, "string", value));
			}
		},
		FieldType::Integer { min, max } => {
			let n = value
				.as_integer()
				.ok_or_else(|| mismatch(field_name, "integer", value))?;
			if min.is_some_and(|m| n < m) || max.is_some_and(|m| n > m) {
				return Err(out_of_range(field_name, n, *min, *max));
			}
		},
		FieldType::Float { min, max } => {
			let n = value
				.as_float()
				.or_else(|| value.as_integer().map(|i| i as f64))
				.ok_or_else(|| mismatch(field_name, "float", value))?;
			if min.is_some_and(|m| n < m) || max.is_some_and(|m| n > m) {
				return Err(out_of_range(field_name, n, *min, *max));
			}
		},
		FieldType::Boolean => {
			if !value.is_bool() {
				return Err(mismatch(field_name, "boolean", value));
			}
		},
		FieldType::OneOf(allowed) => {
			let s = value
				.as_str()
				.ok_or_else(|| mismatch(field_name, "string", value))?;
			if !allowed.contains(&s) {
				return Err(ValidationError::InvalidValue {
					field: field_name.to_string(),
					message: format!("'{}' is not one of {}", s, allowed.join(", ")),
				});
			}
		},
		FieldType::Array(inner) => {
			let items = value
				.as_array()
				.ok_or_else(|| mismatch(field_name, "array", value))?;
			for (i, item) in items.iter().enumerate() {
				check_type(&format!("{}[{}]", field_name, i), item, inner)?;
			}
		},
		FieldType::Table(schema) => {
			schema
				.validate(value)
				.map_err(|e| e.nested_under(field_name))?;
		},
	}

	Ok(())
}

/// Published by every pluggable implementation so its table can be checked
/// before construction.
#[async_trait]
pub trait ConfigSchema: Send + Sync {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError>;
}

#[cfg(test)]
mod tests {
	use super::*;

	fn provider_schema() -> Schema {
		Schema::new(
			vec![Field::new("endpoint", FieldType::String).with_validator(|v| {
				match v.as_str() {
					Some(url) if url.starts_with("http") => Ok(()),
					_ => Err("endpoint must be an http(s) URL".to_string()),
				}
			})],
			vec![
				Field::new(
					"timeout_seconds",
					FieldType::Integer {
						min: Some(1),
						max: Some(60),
					},
				),
				Field::new(
					"failure_rate",
					FieldType::Float {
						min: Some(0.0),
						max: Some(1.0),
					},
				),
				Field::new("mode", FieldType::OneOf(vec!["live", "sandbox"])),
			],
		)
	}

	#[test]
	fn test_valid_table_passes() {
		let config: toml::Value = toml::from_str(
			r#"
			endpoint = "https://sms.example.com/send"
			timeout_seconds = 5
			failure_rate = 1
			mode = "sandbox"
			"#,
		)
		.unwrap();
		assert!(provider_schema().validate(&config).is_ok());
	}

	#[test]
	fn test_missing_required_field() {
		let config: toml::Value = toml::from_str("timeout_seconds = 5").unwrap();
		let err = provider_schema().validate(&config).unwrap_err();
		assert!(matches!(err, ValidationError::MissingField(f) if f == "endpoint"));
	}

	#[test]
	fn test_bounds_and_choices() {
		let config: toml::Value = toml::from_str(
			r#"
			endpoint = "https://sms.example.com"
			timeout_seconds = 0
			"#,
		)
		.unwrap();
		assert!(matches!(
			provider_schema().validate(&config),
			Err(ValidationError::InvalidValue { .. })
		));

		let config: toml::Value = toml::from_str(
			r#"
			endpoint = "https://sms.example.com"
			mode = "prod"
			"#,
		)
		.unwrap();
		assert!(matches!(
			provider_schema().validate(&config),
			Err(ValidationError::InvalidValue { field, .. }) if field == "mode"
		));
	}

	#[test]
	fn test_custom_validator_and_nested_path() {
		let schema = Schema::new(
			vec![Field::new("sms", FieldType::Table(provider_schema()))],
			vec![],
		);
		let config: toml::Value = toml::from_str(
			r#"
			[sms]
			endpoint = "ftp://nope"
			"#,
		)
		.unwrap();
		let err = schema.validate(&config).unwrap_err();
		assert!(matches!(err, ValidationError::InvalidValue { field, .. } if field == "sms.endpoint"));
	}
}
