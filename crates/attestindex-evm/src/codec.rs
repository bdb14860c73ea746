//! ABI payload codec.
//!
//! Encodes and decodes attestation payloads against a parsed schema field
//! list. The field order from the definition is the ABI layout; values are
//! normalized into JSON with large integers rendered as decimal strings so
//! nothing is lost to JSON number precision.

use alloy_dyn_abi::{DynSolType, DynSolValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use attestindex_core::error::IndexerError;
use attestindex_core::schema::{FieldType, SchemaField};

/// One decoded payload field, ready for JSON storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedField {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub value: Value,
}

fn field_to_dyn(field: &SchemaField) -> DynSolType {
    let base = match field.ty {
        FieldType::Address => DynSolType::Address,
        FieldType::String => DynSolType::String,
        FieldType::Bool => DynSolType::Bool,
        FieldType::Bytes32 => DynSolType::FixedBytes(32),
        FieldType::Bytes => DynSolType::Bytes,
        FieldType::Uint(bits) => DynSolType::Uint(bits as usize),
    };
    if field.is_array {
        DynSolType::Array(Box::new(base))
    } else {
        base
    }
}

fn normalize(value: DynSolValue) -> Value {
    match value {
        DynSolValue::Address(a) => Value::String(a.to_checksum(None)),
        DynSolValue::Bool(b) => Value::Bool(b),
        DynSolValue::String(s) => Value::String(s),
        DynSolValue::Bytes(b) => Value::String(format!("0x{}", hex::encode(b))),
        DynSolValue::FixedBytes(word, size) => {
            Value::String(format!("0x{}", hex::encode(&word[..size])))
        }
        // Decimal strings; uint256 exceeds JSON number range.
        DynSolValue::Uint(v, _) => Value::String(v.to_string()),
        DynSolValue::Int(v, _) => Value::String(v.to_string()),
        DynSolValue::Array(vals) | DynSolValue::FixedArray(vals) | DynSolValue::Tuple(vals) => {
            Value::Array(vals.into_iter().map(normalize).collect())
        }
        // The schema grammar never produces these.
        _ => Value::Null,
    }
}

/// Decode a `0x…` hex payload against an ordered field list.
pub fn decode_payload(
    fields: &[SchemaField],
    payload: &str,
) -> Result<Vec<DecodedField>, IndexerError> {
    let raw = hex::decode(payload.strip_prefix("0x").unwrap_or(payload))
        .map_err(|e| IndexerError::Decode(format!("invalid payload hex: {e}")))?;

    let tuple = DynSolType::Tuple(fields.iter().map(field_to_dyn).collect());
    let decoded = tuple
        .abi_decode_params(&raw)
        .map_err(|e| IndexerError::Decode(e.to_string()))?;

    let values = match decoded {
        DynSolValue::Tuple(vals) => vals,
        other => vec![other],
    };
    if values.len() != fields.len() {
        return Err(IndexerError::Decode(format!(
            "expected {} values, decoded {}",
            fields.len(),
            values.len()
        )));
    }

    Ok(fields
        .iter()
        .zip(values)
        .map(|(field, value)| DecodedField {
            name: field.name.clone(),
            ty: if field.is_array {
                format!("{}[]", field.ty)
            } else {
                field.ty.to_string()
            },
            value: normalize(value),
        })
        .collect())
}

/// Encode values into a `0x…` hex payload, in field-list order.
///
/// The inverse of [`decode_payload`] for matching values; mainly used to
/// construct payloads in tests and tools.
pub fn encode_payload(values: Vec<DynSolValue>) -> String {
    format!("0x{}", hex::encode(DynSolValue::Tuple(values).abi_encode_params()))
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, B256, U256};
    use attestindex_core::schema;

    #[test]
    fn decode_mixed_payload() {
        let fields = schema::parse("uint256 value, address owner, bool active").unwrap();
        let owner = "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045";
        let payload = encode_payload(vec![
            DynSolValue::Uint(U256::from(1_000_000_000_000_000_000u64), 256),
            DynSolValue::Address(owner.parse::<Address>().unwrap()),
            DynSolValue::Bool(true),
        ]);

        let decoded = decode_payload(&fields, &payload).unwrap();
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[0].name, "value");
        assert_eq!(decoded[0].ty, "uint256");
        assert_eq!(decoded[0].value, Value::String("1000000000000000000".into()));
        assert_eq!(decoded[1].value, Value::String(owner.into()));
        assert_eq!(decoded[2].value, Value::Bool(true));
    }

    #[test]
    fn decode_dynamic_and_array_fields() {
        let fields = schema::parse("string note, bytes32[] proofs").unwrap();
        let payload = encode_payload(vec![
            DynSolValue::String("hello".into()),
            DynSolValue::Array(vec![
                DynSolValue::FixedBytes(B256::repeat_byte(0x11), 32),
                DynSolValue::FixedBytes(B256::repeat_byte(0x22), 32),
            ]),
        ]);

        let decoded = decode_payload(&fields, &payload).unwrap();
        assert_eq!(decoded[0].value, Value::String("hello".into()));
        assert_eq!(decoded[1].ty, "bytes32[]");
        let proofs = decoded[1].value.as_array().unwrap();
        assert_eq!(proofs.len(), 2);
        assert_eq!(proofs[0], Value::String(format!("0x{}", "11".repeat(32))));
    }

    #[test]
    fn large_uint_survives_as_decimal_string() {
        let fields = schema::parse("uint256 big").unwrap();
        let payload = encode_payload(vec![DynSolValue::Uint(U256::MAX, 256)]);
        let decoded = decode_payload(&fields, &payload).unwrap();
        assert_eq!(
            decoded[0].value,
            Value::String(U256::MAX.to_string())
        );
    }

    #[test]
    fn decode_rejects_truncated_payload() {
        let fields = schema::parse("uint256 value, address owner").unwrap();
        // Only one word of data for a two-field layout.
        let payload = format!("0x{}", "00".repeat(32));
        assert!(decode_payload(&fields, &payload).is_err());
    }

    #[test]
    fn decode_rejects_bad_hex() {
        let fields = schema::parse("bool flag").unwrap();
        assert!(decode_payload(&fields, "0xzz").is_err());
    }

    #[test]
    fn decoded_fields_serialize_with_type_key() {
        let fields = schema::parse("bool flag").unwrap();
        let payload = encode_payload(vec![DynSolValue::Bool(false)]);
        let decoded = decode_payload(&fields, &payload).unwrap();
        let json = serde_json::to_value(&decoded).unwrap();
        assert_eq!(json[0]["type"], "bool");
        assert_eq!(json[0]["value"], false);
    }
}
