// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CBOR PAYLOAD
//
// Transaction payloads are CBOR maps: "v" names the verb, positional
// parameters are "p1", "p2", ... with text values. Every decoding failure
// is InvalidTransaction: a malformed payload rejects the transaction, it
// never takes the processor down.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use cc_core::num::{parse_positive, parse_u64};
use cc_core::CcError;
use ciborium::Value;
use num_bigint::BigInt;

/// The decoded parameter map of one transaction.
#[derive(Debug)]
pub struct CborParams {
    map: Vec<(Value, Value)>,
}

/// Decode a payload into the verb name and its parameters.
pub fn command_and_params(payload: &[u8]) -> Result<(String, CborParams), CcError> {
    let value: Value = ciborium::de::from_reader(payload)
        .map_err(|_| CcError::invalid("Malformed CBOR payload"))?;
    let Value::Map(map) = value else {
        return Err(CcError::invalid("CBOR Object as the encoded command"));
    };
    let params = CborParams { map };
    let cmd = params
        .text("v")
        .ok_or_else(|| CcError::invalid("verb is required"))?;
    Ok((cmd, params))
}

impl CborParams {
    fn text(&self, id: &str) -> Option<String> {
        self.map.iter().find_map(|(key, value)| match (key, value) {
            (Value::Text(k), Value::Text(v)) if k == id => Some(v.clone()),
            _ => None,
        })
    }

    /// A required text parameter.
    pub fn get_string(&self, id: &str, name: &str) -> Result<String, CcError> {
        self.text(id)
            .ok_or_else(|| CcError::invalid(format!("Expecting {}", name)))
    }

    /// A required text parameter, lowercased (ids and foreign-chain names
    /// are case-insensitive on the wire).
    pub fn get_string_lower(&self, id: &str, name: &str) -> Result<String, CcError> {
        Ok(self.get_string(id, name)?.to_lowercase())
    }

    /// A required non-negative decimal; returns both the original string
    /// (state stores the text form verbatim) and the parsed value.
    pub fn get_bigint(&self, id: &str, name: &str) -> Result<(String, BigInt), CcError> {
        let text = self.get_string(id, name)?;
        let value = parse_positive(&text)?;
        Ok((text, value))
    }

    /// A required uint64 (block-count expiration deltas).
    pub fn get_u64(&self, id: &str, name: &str) -> Result<u64, CcError> {
        parse_u64(&self.get_string(id, name)?)
    }
}

/// Encode a verb and positional text parameters into a payload. The mirror
/// image of `command_and_params`, used by tests and tooling.
pub fn encode_params(verb: &str, params: &[&str]) -> Vec<u8> {
    let mut map = vec![(
        Value::Text("v".to_string()),
        Value::Text(verb.to_string()),
    )];
    for (i, param) in params.iter().enumerate() {
        map.push((
            Value::Text(format!("p{}", i + 1)),
            Value::Text(param.to_string()),
        ));
    }
    let mut out = Vec::new();
    // Writing a Value into a Vec cannot fail.
    let _ = ciborium::ser::into_writer(&Value::Map(map), &mut out);
    out
}
