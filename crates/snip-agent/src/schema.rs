//! JSON Schema validation for tool inputs and structured outputs.

use jsonschema::{Draft, JSONSchema};
use serde_json::Value;

/// A compiled JSON Schema (draft 7).
pub struct SchemaValidator {
    schema: JSONSchema,
}

impl std::fmt::Debug for SchemaValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaValidator").finish_non_exhaustive()
    }
}

impl SchemaValidator {
    /// Compile `schema`.  The error is a human-readable reason.
    pub fn compile(schema: &Value) -> std::result::Result<Self, String> {
        let schema = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(schema)
            .map_err(|e| format!("invalid JSON schema: {e}"))?;
        Ok(Self { schema })
    }

    /// Validate `instance`, joining every violation into one reason.
    pub fn check(&self, instance: &Value) -> std::result::Result<(), String> {
        if let Err(errors) = self.schema.validate(instance) {
            let messages: Vec<String> = errors
                .map(|e| {
                    let path = e.instance_path.to_string();
                    if path.is_empty() {
                        e.to_string()
                    } else {
                        format!("{path}: {e}")
                    }
                })
                .collect();
            return Err(messages.join(", "));
        }
        Ok(())
    }
}
