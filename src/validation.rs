use validator::{Validate, ValidationErrors};

use crate::error::AppError;

/// Run declarative validation and fold the failures into one
/// `AppError::Validation`, so callers surface a single message and never
/// reach storage with a bad request.
pub fn validate_request<T: Validate>(request: &T) -> Result<(), AppError> {
    request
        .validate()
        .map_err(|errors| AppError::Validation(flatten_errors(&errors)))
}

fn flatten_errors(errors: &ValidationErrors) -> String {
    let mut messages: Vec<String> = Vec::new();

    for (field, field_errors) in errors.field_errors() {
        for error in field_errors.iter() {
            let message = error
                .message
                .clone()
                .unwrap_or_else(|| "Invalid value".into());
            messages.push(format!("{}: {}", field, message));
        }
    }

    messages.sort();
    messages.join("; ")
}
