//! field elements used as tree leaves and nodes
//!
//! Values are kept as plain unsigned integers up to 256 bits. Leaves may sit
//! above the bn254 modulus (the exclusion tree's upper sentinel does); hashers
//! reduce their inputs before absorbing them.

use crate::error::{Result, TreeError};
use num_bigint::BigUint;
use num_traits::{Num, One, Zero};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// bn254 scalar field modulus (decimal)
pub const FIELD_MODULUS: &str =
    "21888242871839275222246405745257275088548364400416034343698204186575808495617";

/// bn254 scalar field modulus
pub fn modulus() -> &'static BigUint {
    static MODULUS: OnceLock<BigUint> = OnceLock::new();
    MODULUS.get_or_init(|| {
        BigUint::from_str_radix(FIELD_MODULUS, 10).expect("modulus literal is decimal")
    })
}

#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldElement(BigUint);

impl FieldElement {
    pub fn zero() -> Self {
        Self(BigUint::zero())
    }

    pub fn from_u64(value: u64) -> Self {
        Self(BigUint::from(value))
    }

    /// largest 256-bit value, `2^256 - 1`
    pub fn max_value() -> Self {
        Self((BigUint::one() << 256u32) - BigUint::one())
    }

    pub fn from_biguint(value: BigUint) -> Result<Self> {
        if value.bits() > 256 {
            return Err(TreeError::InvalidElement(format!(
                "value exceeds 256 bits ({} bits)",
                value.bits()
            )));
        }
        Ok(Self(value))
    }

    /// construct from a value already reduced mod p (hash outputs)
    pub(crate) fn from_reduced(value: BigUint) -> Self {
        debug_assert!(&value < modulus());
        Self(value)
    }

    pub fn from_be_bytes(bytes: &[u8; 32]) -> Self {
        Self(BigUint::from_bytes_be(bytes))
    }

    /// parse `0x`-prefixed hex (any case) or decimal
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) if !hex.is_empty() => BigUint::from_str_radix(hex, 16),
            Some(_) => return Err(TreeError::InvalidElement(s.to_string())),
            None if !s.is_empty() => BigUint::from_str_radix(s, 10),
            None => return Err(TreeError::InvalidElement("empty string".into())),
        };
        let value = parsed.map_err(|e| TreeError::InvalidElement(format!("{}: {}", s, e)))?;
        Self::from_biguint(value)
    }

    pub fn as_biguint(&self) -> &BigUint {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// value reduced into the bn254 scalar field
    pub fn reduced(&self) -> BigUint {
        &self.0 % modulus()
    }

    /// big-endian 32 byte encoding
    pub fn to_be_bytes(&self) -> [u8; 32] {
        let bytes = self.0.to_bytes_be();
        let mut out = [0u8; 32];
        out[32 - bytes.len()..].copy_from_slice(&bytes);
        out
    }

    /// `0x` + 64 lowercase hex digits
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.to_be_bytes()))
    }
}

impl fmt::Display for FieldElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for FieldElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldElement({})", self.0)
    }
}

impl FromStr for FieldElement {
    type Err = TreeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<u64> for FieldElement {
    fn from(value: u64) -> Self {
        Self::from_u64(value)
    }
}

impl Serialize for FieldElement {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_str_radix(10))
    }
}

impl<'de> Deserialize<'de> for FieldElement {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_and_decimal() {
        let hex = FieldElement::parse("0xABC").unwrap();
        let dec = FieldElement::parse("2748").unwrap();
        assert_eq!(hex, dec);
        assert_eq!(hex.to_string(), "2748");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(FieldElement::parse("").is_err());
        assert!(FieldElement::parse("0x").is_err());
        assert!(FieldElement::parse("0xzz").is_err());
        assert!(FieldElement::parse("12a").is_err());
    }

    #[test]
    fn test_max_value_fits_256_bits() {
        let max = FieldElement::max_value();
        assert_eq!(max.to_be_bytes(), [0xff; 32]);
        let parsed = FieldElement::parse(
            "0xFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF",
        )
        .unwrap();
        assert_eq!(parsed, max);

        let too_big = FieldElement::from_biguint(max.as_biguint() + 1u32);
        assert!(matches!(too_big, Err(TreeError::InvalidElement(_))));
    }

    #[test]
    fn test_ordering_is_numeric() {
        let small = FieldElement::parse("0x123").unwrap();
        let big = FieldElement::parse("0xabc").unwrap();
        assert!(small < big);
        assert!(FieldElement::zero() < small);
        assert!(big < FieldElement::max_value());
    }

    #[test]
    fn test_serde_uses_decimal_strings() {
        let el = FieldElement::parse("0xff").unwrap();
        let json = serde_json::to_string(&el).unwrap();
        assert_eq!(json, "\"255\"");
        let back: FieldElement = serde_json::from_str("\"0xff\"").unwrap();
        assert_eq!(back, el);
    }

    #[test]
    fn test_hex_encoding_is_padded() {
        let el = FieldElement::from_u64(1);
        assert_eq!(el.to_hex().len(), 66);
        assert!(el.to_hex().ends_with("01"));
    }
}
