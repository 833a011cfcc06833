use crate::errors::{DomainError, DomainResult, ValidationError};

/// A trait that entities should implement for validation.
pub trait Validate {
    /// Validates the entity and returns an error if validation fails.
    fn validate(&self) -> DomainResult<()>;
}

/// Struct for configuring string-field validations in a fluent style
pub struct ValidationBuilder<'a> {
    field_name: String,
    value: Option<&'a str>,
    errors: Vec<ValidationError>,
}

impl<'a> ValidationBuilder<'a> {
    pub fn new(field_name: &str, value: Option<&'a str>) -> Self {
        Self {
            field_name: field_name.to_string(),
            value,
            errors: Vec::new(),
        }
    }

    /// The field must be present and non-blank.
    pub fn required(mut self) -> Self {
        match self.value {
            Some(v) if !v.trim().is_empty() => {}
            _ => self.errors.push(ValidationError::required(&self.field_name)),
        }
        self
    }

    pub fn max_length(mut self, max: usize) -> Self {
        if let Some(v) = self.value {
            if v.chars().count() > max {
                self.errors
                    .push(ValidationError::max_length(&self.field_name, max));
            }
        }
        self
    }

    /// Apply a custom predicate against the (present) value.
    pub fn check<F>(mut self, reason: &str, predicate: F) -> Self
    where
        F: FnOnce(&str) -> bool,
    {
        if let Some(v) = self.value {
            if !predicate(v) {
                self.errors
                    .push(ValidationError::invalid_value(&self.field_name, reason));
            }
        }
        self
    }

    pub fn validate(mut self) -> DomainResult<()> {
        match self.errors.pop() {
            None => Ok(()),
            Some(err) => Err(DomainError::Validation(err)),
        }
    }
}
