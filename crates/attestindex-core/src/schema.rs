//! Schema codec — parses the compact field grammar used by schema definitions.
//!
//! A definition is a comma-separated list of `<type>['[]']? <name>` tokens,
//! e.g. `"uint256 value, address owner, bytes32[] proofs"`. The parsed field
//! list preserves declaration order; that order is the ABI layout used to
//! encode and decode attestation payloads.

use std::fmt;

use alloy_primitives::U256;

use crate::error::IndexerError;

// ─── FieldType ────────────────────────────────────────────────────────────────

/// The fixed set of field types the grammar accepts.
///
/// Unsigned integers are allowed at 8-bit increments only (`uint8` through
/// `uint256`); anything else fails the whole parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Address,
    String,
    Bool,
    Bytes32,
    Bytes,
    Uint(u16),
}

impl FieldType {
    /// Parse a bare type token (no array suffix).
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "address" => Some(Self::Address),
            "string" => Some(Self::String),
            "bool" => Some(Self::Bool),
            "bytes32" => Some(Self::Bytes32),
            "bytes" => Some(Self::Bytes),
            _ => {
                let bits: u16 = token.strip_prefix("uint")?.parse().ok()?;
                let valid = (8..=256).contains(&bits)
                    && bits % 8 == 0
                    && token == format!("uint{bits}");
                valid.then_some(Self::Uint(bits))
            }
        }
    }

    /// Bit width for integer types, `None` otherwise.
    pub fn bit_width(&self) -> Option<u16> {
        match self {
            Self::Uint(bits) => Some(*bits),
            _ => None,
        }
    }

    /// Inclusive upper bound `2^N - 1` for `uintN` types, `None` otherwise.
    ///
    /// Exposed for validation by callers; the codec itself does not enforce
    /// ranges.
    pub fn max_value(&self) -> Option<U256> {
        match self {
            Self::Uint(256) => Some(U256::MAX),
            Self::Uint(bits) => Some((U256::from(1u8) << (*bits as usize)) - U256::from(1u8)),
            _ => None,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Address => write!(f, "address"),
            Self::String => write!(f, "string"),
            Self::Bool => write!(f, "bool"),
            Self::Bytes32 => write!(f, "bytes32"),
            Self::Bytes => write!(f, "bytes"),
            Self::Uint(bits) => write!(f, "uint{bits}"),
        }
    }
}

// ─── SchemaField ──────────────────────────────────────────────────────────────

/// One parsed field of a schema definition. Order is significant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaField {
    pub name: String,
    pub ty: FieldType,
    pub is_array: bool,
}

impl fmt::Display for SchemaField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_array {
            write!(f, "{}[] {}", self.ty, self.name)
        } else {
            write!(f, "{} {}", self.ty, self.name)
        }
    }
}

// ─── Parsing ──────────────────────────────────────────────────────────────────

/// Parse a schema definition into its ordered field list.
///
/// Any token that does not match the grammar fails the whole parse — there are
/// no partial schemas.
pub fn parse(definition: &str) -> Result<Vec<SchemaField>, IndexerError> {
    let err = |reason: String| IndexerError::SchemaParse {
        definition: definition.to_string(),
        reason,
    };

    let mut fields = Vec::new();
    for raw in definition.split(',') {
        let token = raw.trim();
        let mut parts = token.split_whitespace();
        let (Some(ty_part), Some(name), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(err(format!("expected '<type> <name>', got {token:?}")));
        };

        let (ty_token, is_array) = match ty_part.strip_suffix("[]") {
            Some(base) => (base, true),
            None => (ty_part, false),
        };
        let ty = FieldType::parse(ty_token)
            .ok_or_else(|| err(format!("unknown type '{ty_token}'")))?;

        if !is_identifier(name) {
            return Err(err(format!("invalid field name '{name}'")));
        }

        fields.push(SchemaField {
            name: name.to_string(),
            ty,
            is_array,
        });
    }
    Ok(fields)
}

/// Render a field list back into its canonical definition string.
///
/// `parse(serialize(fields)) == fields` for every valid field list.
pub fn serialize(fields: &[SchemaField]) -> String {
    fields
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_preserves_field_order() {
        let fields = parse("uint256 value, address owner, bool active").unwrap();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[0].name, "value");
        assert_eq!(fields[0].ty, FieldType::Uint(256));
        assert_eq!(fields[1].name, "owner");
        assert_eq!(fields[1].ty, FieldType::Address);
        assert_eq!(fields[2].name, "active");
        assert_eq!(fields[2].ty, FieldType::Bool);
    }

    #[test]
    fn parse_array_suffix() {
        let fields = parse("bytes32[] proofs, string note").unwrap();
        assert!(fields[0].is_array);
        assert_eq!(fields[0].ty, FieldType::Bytes32);
        assert!(!fields[1].is_array);
    }

    #[test]
    fn parse_rejects_non_multiple_of_eight_uint() {
        assert!(parse("uint9 foo").is_err());
        assert!(parse("uint0 foo").is_err());
        assert!(parse("uint264 foo").is_err());
    }

    #[test]
    fn parse_rejects_padded_uint_width() {
        // "uint08" is not in the allowed set even though 8 is
        assert!(parse("uint08 foo").is_err());
    }

    #[test]
    fn parse_rejects_malformed_tokens() {
        assert!(parse("").is_err());
        assert!(parse("uint256").is_err());
        assert!(parse("uint256 a b").is_err());
        assert!(parse("uint256 1name").is_err());
        assert!(parse("uint256 ok, float bad").is_err());
    }

    #[test]
    fn round_trip_through_serialize() {
        let def = "uint64 height, address[] signers, bytes payload, bytes32 root";
        let fields = parse(def).unwrap();
        let rendered = serialize(&fields);
        assert_eq!(parse(&rendered).unwrap(), fields);
        assert_eq!(rendered, def);
    }

    #[test]
    fn uint_ranges() {
        assert_eq!(FieldType::Uint(8).max_value(), Some(U256::from(255u64)));
        assert_eq!(
            FieldType::Uint(64).max_value(),
            Some(U256::from(u64::MAX))
        );
        assert_eq!(FieldType::Uint(256).max_value(), Some(U256::MAX));
        assert_eq!(FieldType::Address.max_value(), None);
        assert_eq!(FieldType::Uint(16).bit_width(), Some(16));
    }
}
