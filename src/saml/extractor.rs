//! Pull the subject identifier and a flat attribute map out of an assertion.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{
    error::ExtractionError,
    schema::{Assertion, AttributeValue},
};

/// Attribute name to its textual values, in document order.
///
/// Only the first attribute statement contributes. Values are kept when they
/// are typed `xs:string`, or untyped with text content. Values of any other
/// schema type are dropped.
pub type AttributeMap = BTreeMap<String, Vec<String>>;

/// Identity facts carried by a validated assertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub subject_id: String,
    pub attributes: AttributeMap,
}

/// Extract [`Claims`] from `assertion`.
///
/// When an attribute name appears more than once, the last occurrence
/// replaces the earlier ones. An attribute whose values were all dropped
/// still appears, with an empty list.
pub fn extract(assertion: &Assertion) -> Result<Claims, ExtractionError> {
    let subject_id = assertion
        .name_id()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or(ExtractionError::MissingSubject)?
        .to_string();

    let mut attributes = AttributeMap::new();

    if let Some(statement) = assertion.attribute_statements.first() {
        if assertion.attribute_statements.len() > 1 {
            tracing::debug!(
                count = assertion.attribute_statements.len(),
                "Ignoring attribute statements after the first"
            );
        }

        for attribute in &statement.attributes {
            let mut values = Vec::with_capacity(attribute.values.len());
            for value in &attribute.values {
                match value {
                    AttributeValue::String(s) => values.push(s.clone()),
                    AttributeValue::Any(Some(s)) => values.push(s.clone()),
                    AttributeValue::Any(None) => {}
                    AttributeValue::Other { type_name } => {
                        tracing::trace!(
                            attribute = %attribute.name,
                            xsi_type = %type_name,
                            "Dropping attribute value of unsupported type"
                        );
                    }
                }
            }
            if attributes.insert(attribute.name.clone(), values).is_some() {
                tracing::debug!(
                    attribute = %attribute.name,
                    "Repeated attribute replaces earlier values"
                );
            }
        }
    }

    Ok(Claims {
        subject_id,
        attributes,
    })
}
