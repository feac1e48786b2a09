use crate::error::ValidationError;

/// Extension trait for Option types to simplify required field validation
///
/// This trait provides convenient methods to convert None values into ValidationError,
/// reducing boilerplate in builder patterns.
///
/// # Example
///
/// ```rust
/// use warden_core::error::utilities::RequiredFieldExt;
///
/// let secret: Option<Vec<u8>> = Some(b"secret".to_vec());
/// let secret = secret.require_field("JWT secret").unwrap();
/// assert_eq!(secret, b"secret".to_vec());
/// ```
pub trait RequiredFieldExt<T> {
    /// Convert None to a ValidationError::MissingField
    fn require_field(self, field_name: &str) -> Result<T, ValidationError>;
}

impl<T> RequiredFieldExt<T> for Option<T> {
    fn require_field(self, field_name: &str) -> Result<T, ValidationError> {
        self.ok_or_else(|| ValidationError::MissingField(format!("{field_name} is required")))
    }
}
