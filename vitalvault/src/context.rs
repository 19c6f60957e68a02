//! Context types for field encryption and lookup digests.

use std::fmt;

/// Context for field encryption, bound into every ciphertext as associated data.
///
/// A ciphertext produced for one column will not authenticate when opened
/// with the context of another column, so swapped or copied columns fail
/// closed instead of decoding into the wrong attribute.
///
/// # Example
///
/// ```
/// use vitalvault::context::FieldContext;
///
/// let ctx = FieldContext::new("patients", "email");
/// assert_eq!(ctx.to_string(), "patients|email");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldContext {
    table_name: String,
    column_name: String,
}

impl FieldContext {
    /// Creates a new field context.
    ///
    /// # Arguments
    ///
    /// * `table_name` - Database table name
    /// * `column_name` - Logical column (attribute) name
    #[must_use]
    pub fn new(table_name: impl Into<String>, column_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            column_name: column_name.into(),
        }
    }
}

impl fmt::Display for FieldContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.table_name, self.column_name)
    }
}

/// Context for lookup digest generation.
///
/// Keeps digests of different columns apart: the same value indexed under
/// `legal_id` and under `access_code` produces unrelated digests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexContext {
    table_name: String,
    column_name: String,
}

impl IndexContext {
    /// Creates a new index context.
    #[must_use]
    pub fn new(table_name: impl Into<String>, column_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            column_name: column_name.into(),
        }
    }
}

impl fmt::Display for IndexContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.table_name, self.column_name)
    }
}

impl From<&FieldContext> for IndexContext {
    fn from(ctx: &FieldContext) -> Self {
        Self {
            table_name: ctx.table_name.clone(),
            column_name: ctx.column_name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_context_display() {
        let ctx = FieldContext::new("patients", "legal_id");
        assert_eq!(ctx.to_string(), "patients|legal_id");
    }

    #[test]
    fn test_index_context_display() {
        let ctx = IndexContext::new("patients", "access_code");
        assert_eq!(ctx.to_string(), "patients|access_code");
    }

    #[test]
    fn test_index_context_from_field_context() {
        let field_ctx = FieldContext::new("patients", "legal_id");

        let idx_ctx = IndexContext::from(&field_ctx);
        assert_eq!(idx_ctx, IndexContext::new("patients", "legal_id"));
    }
}
