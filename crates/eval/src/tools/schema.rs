use namel3ss_ir::ContractField;

use crate::value::Value;

/// Validate a tool payload or result against declared fields. An empty
/// field list accepts anything.
pub fn validate_fields(
    direction: &str,
    fields: &[ContractField],
    payload: &serde_json::Map<String, serde_json::Value>,
) -> Result<(), String> {
    if fields.is_empty() {
        return Ok(());
    }
    for key in payload.keys() {
        if !fields.iter().any(|f| &f.name == key) {
            return Err(format!("unknown {} field \"{}\"", direction, key));
        }
    }
    for field in fields {
        match payload.get(&field.name) {
            None | Some(serde_json::Value::Null) if field.required => {
                return Err(format!("missing {} field \"{}\"", direction, field.name));
            }
            None | Some(serde_json::Value::Null) => {}
            Some(raw) => {
                let value = Value::from_json(raw).map_err(|e| {
                    format!("{} field \"{}\": {}", direction, field.name, e)
                })?;
                if !value.matches_type(&field.type_name) {
                    return Err(format!(
                        "{} field \"{}\" must be {}, got {}",
                        direction,
                        field.name,
                        field.type_name,
                        value.type_name()
                    ));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field(name: &str, type_name: &str, required: bool) -> ContractField {
        ContractField {
            name: name.into(),
            type_name: type_name.into(),
            required,
        }
    }

    fn object(v: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn checks_names_types_and_required() {
        let fields = vec![field("city", "text", true), field("days", "number", false)];
        assert!(validate_fields("input", &fields, &object(json!({"city": "Oslo"}))).is_ok());
        assert_eq!(
            validate_fields("input", &fields, &object(json!({"days": 2}))).unwrap_err(),
            "missing input field \"city\""
        );
        assert!(validate_fields("input", &fields, &object(json!({"city": 1}))).is_err());
        assert!(validate_fields("input", &fields, &object(json!({"city": "a", "x": 1}))).is_err());
        assert!(validate_fields("output", &[], &object(json!({"anything": 1}))).is_ok());
    }
}
