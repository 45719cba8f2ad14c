// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CREDITCOIN - CRYPTOGRAPHY MODULE
//
// SHA-512 based merkle address derivation and signer identity (sighash).
// - 70-hex-digit state addresses: namespace(6) + kind(4) + SHA512(seed)[-60:]
// - secp256k1 public key compression for a stable signer sighash
// All digests are lowercase hex. No key material is ever held here; signature
// verification belongs to the host validator.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use sha2::{Digest, Sha512};
use std::sync::LazyLock;

/// Root namespace string hashed into the 6-hex-digit state prefix.
pub const NAMESPACE: &str = "CREDITCOIN";

/// Full merkle address length in hex digits.
pub const MERKLE_ADDRESS_LENGTH: usize = 70;
/// Namespace prefix length in hex digits.
pub const NAMESPACE_PREFIX_LENGTH: usize = 6;
/// Entity kind prefix length in hex digits.
pub const KIND_PREFIX_LENGTH: usize = 4;

/// Hex digits to skip so that the tail of a SHA-512 digest fills the
/// remaining 60 digits of a merkle address: 512 bits / 8 bits per byte *
/// 2 hex digits per byte - 60.
const SKIP_TO_GET_60: usize = 512 / 8 * 2 - 60;

/// Lowercase hex SHA-512 digest of a message.
pub fn sha512(message: &str) -> String {
    hex::encode(Sha512::digest(message.as_bytes()))
}

/// The last 60 hex digits of a SHA-512 digest: the id portion of a merkle
/// address and the signer sighash format.
pub fn sha512_id(message: &str) -> String {
    let digest = sha512(message);
    let id = digest[SKIP_TO_GET_60..].to_string();
    debug_assert_eq!(
        id.len(),
        MERKLE_ADDRESS_LENGTH - NAMESPACE_PREFIX_LENGTH - KIND_PREFIX_LENGTH
    );
    id
}

/// The 6-hex-digit namespace prefix rooting every state address.
/// Computed once: SHA512("CREDITCOIN")[0..6] = "8a1a04".
static NAMESPACE_PREFIX: LazyLock<String> =
    LazyLock::new(|| sha512(NAMESPACE)[..NAMESPACE_PREFIX_LENGTH].to_string());

pub fn namespace_prefix() -> &'static str {
    &NAMESPACE_PREFIX
}

/// Assemble a full 70-hex-digit merkle address from an entity kind prefix
/// and a seed string. Pure in (kind, seed).
pub fn make_address(kind: &str, seed: &str) -> String {
    let address = format!("{}{}{}", namespace_prefix(), kind, sha512_id(seed));
    debug_assert_eq!(address.len(), MERKLE_ADDRESS_LENGTH);
    address
}

/// True when the string consists solely of lowercase hex digits.
pub fn is_hex(s: &str) -> bool {
    s.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// Key is neither a 33-byte compressed nor a 65-byte uncompressed
    /// secp256k1 point in hex.
    UnexpectedFormat,
}

impl std::fmt::Display for KeyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyError::UnexpectedFormat => write!(f, "Unexpected public key format"),
        }
    }
}

impl std::error::Error for KeyError {}

/// Compress a hex-encoded secp256k1 public key.
///
/// An uncompressed key is 0x04 + x + y (x and y 32 bytes each); the
/// compressed form is 0x02 + x when y is even, 0x03 + x when y is odd.
/// Already-compressed keys (0x02/0x03 + x) pass through unchanged. The
/// parity is read from the last byte of y, so only those two hex digits
/// are decoded.
pub fn compress(uncompressed: &str) -> Result<String, KeyError> {
    let marker = uncompressed.get(..2).unwrap_or_default();
    if uncompressed.len() == 2 * (1 + 2 * 32) && is_hex(uncompressed) && marker == "04" {
        let x = &uncompressed[2..2 + 2 * 32];
        let y_last = &uncompressed[2 * (1 + 32 + 31)..];
        if let Ok(last) = u8::from_str_radix(y_last, 16) {
            return if last % 2 == 1 {
                Ok(format!("03{}", x))
            } else {
                Ok(format!("02{}", x))
            };
        }
    } else if (marker == "02" || marker == "03") && uncompressed.len() == 66 {
        return Ok(uncompressed.to_string());
    }
    Err(KeyError::UnexpectedFormat)
}

/// Stable signer identity: the SHA-512 id of the compressed public key hex.
/// Compressed and uncompressed forms of the same key agree.
pub fn sighash_from_public_key(public_key: &str) -> Result<String, KeyError> {
    Ok(sha512_id(&compress(public_key)?))
}
