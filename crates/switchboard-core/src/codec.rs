use serde_json::Value;

use crate::error::{ProviderError, ProviderResult};
use crate::schema::ObjectSchema;
use crate::ty::TypeDescriptor;
use crate::value::DynamicValue;

/// Decode transport bytes against the object type implied by `schema`.
///
/// Absent attributes come back as `null`. Fails with `SchemaMismatch` on
/// empty input, malformed JSON, a structure that does not match the implied
/// type, or a missing required attribute/block.
pub fn decode_input(bytes: &[u8], schema: &ObjectSchema) -> ProviderResult<DynamicValue> {
    let raw = parse_bytes(bytes)?;
    let normalized = schema.implied_type().to_value_type().conform(&raw)?;
    schema.check_required(&normalized)?;
    Ok(normalized)
}

/// Decode transport bytes against a standalone type, e.g. an action result.
pub fn decode_value(bytes: &[u8], ty: &TypeDescriptor) -> ProviderResult<DynamicValue> {
    let raw = parse_bytes(bytes)?;
    ty.to_value_type().conform(&raw)
}

/// Encode `value` as transport bytes for the declared output type.
///
/// Evaluating code is expected to produce conforming values; a value that does
/// not conform is reported as `SchemaMismatch` rather than encoded.
pub fn encode_output(value: &DynamicValue, ty: &TypeDescriptor) -> ProviderResult<Vec<u8>> {
    let normalized = ty.to_value_type().conform(value)?;
    serde_json::to_vec(&normalized)
        .map_err(|err| ProviderError::SchemaMismatch(format!("failed to encode value: {err}")))
}

fn parse_bytes(bytes: &[u8]) -> ProviderResult<Value> {
    if bytes.is_empty() {
        return Err(ProviderError::SchemaMismatch(
            "input must not be empty".to_string(),
        ));
    }

    let raw: Value = serde_json::from_slice(bytes)
        .map_err(|err| ProviderError::SchemaMismatch(format!("input is not valid JSON: {err}")))?;
    if raw.is_null() {
        return Err(ProviderError::SchemaMismatch(
            "input must not be null".to_string(),
        ));
    }
    Ok(raw)
}
