//! Typed statement parameters.

use crate::value::SqlValue;
use crate::wire::WireType;

/// A value bound to one positional placeholder (`@p{position}`).
#[derive(Debug, Clone, PartialEq)]
pub struct TypedParameter {
    position: usize,
    wire_type: WireType,
    value: SqlValue,
}

impl TypedParameter {
    /// Create a new typed parameter.
    #[must_use]
    pub fn new(position: usize, wire_type: WireType, value: SqlValue) -> Self {
        Self {
            position,
            wire_type,
            value,
        }
    }

    /// Zero-based placeholder position.
    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }

    /// Parameter name without the `@` sigil.
    #[must_use]
    pub fn name(&self) -> String {
        format!("p{}", self.position)
    }

    /// The declared wire type.
    #[must_use]
    pub fn wire_type(&self) -> WireType {
        self.wire_type
    }

    /// The bound value.
    #[must_use]
    pub fn value(&self) -> &SqlValue {
        &self.value
    }

    /// Consume the parameter, yielding its value.
    #[must_use]
    pub fn into_value(self) -> SqlValue {
        self.value
    }

    /// Declaration fragment, e.g. `@p0 varchar(255)`.
    #[must_use]
    pub fn declaration(&self) -> String {
        format!("@p{} {}", self.position, self.wire_type.declaration())
    }
}

/// Render the full declaration list for a parameter set.
///
/// Returns `None` when there are no parameters.
#[must_use]
pub fn declaration_list(params: &[TypedParameter]) -> Option<String> {
    if params.is_empty() {
        return None;
    }
    Some(
        params
            .iter()
            .map(TypedParameter::declaration)
            .collect::<Vec<_>>()
            .join(", "),
    )
}
