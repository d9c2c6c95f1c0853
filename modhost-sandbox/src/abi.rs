//! Contract call-data encoding exposed to guests as `bridge::encode_call`.
//!
//! Produces the 4-byte Keccak-256 selector of the canonical signature
//! followed by the head/tail encoded arguments. Supports the elementary
//! types mods actually use; arrays and tuples are rejected.

use serde_json::Value;
use sha3::{Digest, Keccak256};
use std::fmt;
use thiserror::Error;

const WORD: usize = 32;

type Word = [u8; WORD];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AbiError {
    #[error("invalid signature '{0}'")]
    InvalidSignature(String),

    #[error("unsupported parameter type '{0}'")]
    UnsupportedType(String),

    #[error("expected {expected} arguments, got {got}")]
    ArgumentCount { expected: usize, got: usize },

    #[error("argument {index} ({param}): {reason}")]
    InvalidArgument {
        index: usize,
        param: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbiType {
    Uint(u16),
    Int(u16),
    Address,
    Bool,
    FixedBytes(u8),
    Bytes,
    String,
}

impl AbiType {
    pub fn parse(name: &str) -> Result<Self, AbiError> {
        let unsupported = || AbiError::UnsupportedType(name.to_string());
        match name {
            "address" => return Ok(Self::Address),
            "bool" => return Ok(Self::Bool),
            "string" => return Ok(Self::String),
            "bytes" => return Ok(Self::Bytes),
            "uint" => return Ok(Self::Uint(256)),
            "int" => return Ok(Self::Int(256)),
            _ => {}
        }
        if let Some(bits) = name.strip_prefix("uint") {
            return int_width(bits).map(Self::Uint).ok_or_else(unsupported);
        }
        if let Some(bits) = name.strip_prefix("int") {
            return int_width(bits).map(Self::Int).ok_or_else(unsupported);
        }
        if let Some(len) = name.strip_prefix("bytes") {
            return match len.parse::<u8>() {
                Ok(n) if (1..=32).contains(&n) => Ok(Self::FixedBytes(n)),
                _ => Err(unsupported()),
            };
        }
        Err(unsupported())
    }

    fn is_dynamic(&self) -> bool {
        matches!(self, Self::Bytes | Self::String)
    }
}

fn int_width(bits: &str) -> Option<u16> {
    match bits.parse::<u16>() {
        Ok(n) if n % 8 == 0 && (8..=256).contains(&n) => Some(n),
        _ => None,
    }
}

impl fmt::Display for AbiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uint(bits) => write!(f, "uint{bits}"),
            Self::Int(bits) => write!(f, "int{bits}"),
            Self::Address => f.write_str("address"),
            Self::Bool => f.write_str("bool"),
            Self::FixedBytes(n) => write!(f, "bytes{n}"),
            Self::Bytes => f.write_str("bytes"),
            Self::String => f.write_str("string"),
        }
    }
}

/// A parsed function signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSignature {
    pub name: String,
    pub params: Vec<AbiType>,
}

impl CallSignature {
    /// Accepts `name(type,...)`, with an optional leading `function` keyword
    /// and optional parameter names / data locations.
    pub fn parse(signature: &str) -> Result<Self, AbiError> {
        let invalid = || AbiError::InvalidSignature(signature.to_string());
        let text = signature.trim();
        let text = text.strip_prefix("function ").unwrap_or(text).trim();

        let open = text.find('(').ok_or_else(invalid)?;
        let close = text.rfind(')').ok_or_else(invalid)?;
        if close < open || !text[close + 1..].trim().is_empty() {
            return Err(invalid());
        }

        let name = text[..open].trim();
        let valid_name = name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid_name {
            return Err(invalid());
        }

        let inner = text[open + 1..close].trim();
        if inner.contains('(') || inner.contains('[') {
            return Err(AbiError::UnsupportedType(inner.to_string()));
        }
        let params = if inner.is_empty() {
            Vec::new()
        } else {
            inner
                .split(',')
                .map(|param| {
                    let ty = param.split_whitespace().next().ok_or_else(invalid)?;
                    AbiType::parse(ty)
                })
                .collect::<Result<Vec<_>, _>>()?
        };

        Ok(Self {
            name: name.to_string(),
            params,
        })
    }

    pub fn canonical(&self) -> String {
        let params: Vec<String> = self.params.iter().map(ToString::to_string).collect();
        format!("{}({})", self.name, params.join(","))
    }

    pub fn selector(&self) -> [u8; 4] {
        let hash = Keccak256::digest(self.canonical().as_bytes());
        [hash[0], hash[1], hash[2], hash[3]]
    }

    pub fn encode(&self, args: &[Value]) -> Result<Vec<u8>, AbiError> {
        if args.len() != self.params.len() {
            return Err(AbiError::ArgumentCount {
                expected: self.params.len(),
                got: args.len(),
            });
        }

        let mut head = Vec::with_capacity(self.params.len() * WORD);
        let mut tail = Vec::new();
        let head_size = self.params.len() * WORD;

        for (index, (param, arg)) in self.params.iter().zip(args).enumerate() {
            let fail = |reason: String| AbiError::InvalidArgument {
                index,
                param: param.to_string(),
                reason,
            };
            if param.is_dynamic() {
                let data = match param {
                    AbiType::String => arg
                        .as_str()
                        .map(|s| s.as_bytes().to_vec())
                        .ok_or_else(|| fail("expected a string".into()))?,
                    _ => hex_arg(arg).map_err(fail)?,
                };
                head.extend_from_slice(&uint_word((head_size + tail.len()) as u64));
                tail.extend_from_slice(&uint_word(data.len() as u64));
                tail.extend_from_slice(&data);
                tail.resize(tail.len().div_ceil(WORD) * WORD, 0);
            } else {
                head.extend_from_slice(&encode_static(*param, arg).map_err(fail)?);
            }
        }

        let mut out = Vec::with_capacity(4 + head.len() + tail.len());
        out.extend_from_slice(&self.selector());
        out.extend_from_slice(&head);
        out.extend_from_slice(&tail);
        Ok(out)
    }
}

/// Parses `signature` and encodes `args` against it.
pub fn encode_call(signature: &str, args: &[Value]) -> Result<Vec<u8>, AbiError> {
    CallSignature::parse(signature)?.encode(args)
}

fn encode_static(param: AbiType, arg: &Value) -> Result<Word, String> {
    match param {
        AbiType::Bool => match arg {
            Value::Bool(b) => Ok(uint_word(u64::from(*b))),
            _ => Err("expected a bool".into()),
        },
        AbiType::Address => {
            let bytes = hex_arg(arg)?;
            if bytes.len() != 20 {
                return Err(format!("address must be 20 bytes, got {}", bytes.len()));
            }
            let mut word = [0u8; WORD];
            word[12..].copy_from_slice(&bytes);
            Ok(word)
        }
        AbiType::FixedBytes(n) => {
            let bytes = hex_arg(arg)?;
            if bytes.len() != usize::from(n) {
                return Err(format!("expected {n} bytes, got {}", bytes.len()));
            }
            let mut word = [0u8; WORD];
            word[..bytes.len()].copy_from_slice(&bytes);
            Ok(word)
        }
        AbiType::Uint(bits) => {
            let (negative, magnitude) = integer_arg(arg)?;
            if negative && bit_len(&magnitude) > 0 {
                return Err("unsigned value is negative".into());
            }
            if bit_len(&magnitude) > u32::from(bits) {
                return Err(format!("value does not fit in uint{bits}"));
            }
            Ok(magnitude)
        }
        AbiType::Int(bits) => {
            let (negative, magnitude) = integer_arg(arg)?;
            let len = bit_len(&magnitude);
            let limit = u32::from(bits) - 1;
            // Negative values may reach exactly -2^(bits-1).
            let is_min = len == limit + 1 && magnitude.iter().map(|b| b.count_ones()).sum::<u32>() == 1;
            if len > limit && !(negative && is_min) {
                return Err(format!("value does not fit in int{bits}"));
            }
            Ok(if negative { twos_complement(magnitude) } else { magnitude })
        }
        AbiType::Bytes | AbiType::String => Err("dynamic type in static position".into()),
    }
}

fn uint_word(value: u64) -> Word {
    let mut word = [0u8; WORD];
    word[WORD - 8..].copy_from_slice(&value.to_be_bytes());
    word
}

/// Accepts JSON integers, decimal text and `0x` hex text, with an optional sign.
fn integer_arg(arg: &Value) -> Result<(bool, Word), String> {
    match arg {
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                Ok((false, uint_word(u)))
            } else if let Some(i) = n.as_i64() {
                Ok((i < 0, uint_word(i.unsigned_abs())))
            } else {
                Err("expected an integer, got a float".into())
            }
        }
        Value::String(text) => {
            let text = text.trim();
            let (negative, digits) = match text.strip_prefix('-') {
                Some(rest) => (true, rest),
                None => (false, text),
            };
            let word = match digits.strip_prefix("0x") {
                Some(hex_digits) => parse_hex_word(hex_digits),
                None => parse_decimal_word(digits),
            }
            .ok_or_else(|| format!("'{text}' is not a 256-bit integer"))?;
            Ok((negative, word))
        }
        _ => Err("expected an integer".into()),
    }
}

fn hex_arg(arg: &Value) -> Result<Vec<u8>, String> {
    let text = arg.as_str().ok_or("expected 0x-prefixed hex text")?;
    let digits = text.strip_prefix("0x").ok_or("expected 0x-prefixed hex text")?;
    hex::decode(digits).map_err(|e| e.to_string())
}

fn parse_decimal_word(digits: &str) -> Option<Word> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let mut word = [0u8; WORD];
    for digit in digits.bytes() {
        let mut carry = u16::from(digit - b'0');
        for byte in word.iter_mut().rev() {
            let v = u16::from(*byte) * 10 + carry;
            *byte = (v & 0xff) as u8;
            carry = v >> 8;
        }
        if carry != 0 {
            return None;
        }
    }
    Some(word)
}

fn parse_hex_word(digits: &str) -> Option<Word> {
    if digits.is_empty() || digits.len() > WORD * 2 {
        return None;
    }
    let padded = format!("{digits:0>64}");
    let bytes = hex::decode(padded).ok()?;
    let mut word = [0u8; WORD];
    word.copy_from_slice(&bytes);
    Some(word)
}

fn bit_len(word: &Word) -> u32 {
    match word.iter().position(|b| *b != 0) {
        Some(i) => ((WORD - i - 1) * 8) as u32 + (8 - word[i].leading_zeros()),
        None => 0,
    }
}

fn twos_complement(mut word: Word) -> Word {
    for byte in word.iter_mut() {
        *byte = !*byte;
    }
    for byte in word.iter_mut().rev() {
        let (v, overflow) = byte.overflowing_add(1);
        *byte = v;
        if !overflow {
            break;
        }
    }
    word
}
