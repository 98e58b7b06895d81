use alloy::dyn_abi::{DynSolType, DynSolValue, Word};
use alloy::primitives::{keccak256, Address, B256, I256, U256};
use alloy::sol_types::{Revert, SolError};
use serde_json::Value;
use std::str::FromStr;

use super::error::{BindError, BindResult};

/// Validates and normalizes an Ethereum address
pub fn validate_address(address: &str) -> BindResult<Address> {
    let address = address.trim();

    if address.is_empty() {
        return Err(BindError::InvalidAddress(
            "Address cannot be empty".to_string(),
        ));
    }

    if !address.starts_with("0x") && !address.starts_with("0X") {
        return Err(BindError::InvalidAddress(format!(
            "'{}'. Ethereum addresses must start with '0x'",
            address
        )));
    }

    if address.len() != 42 {
        return Err(BindError::InvalidAddress(format!(
            "'{}'. Ethereum addresses must be exactly 42 characters (0x + 40 hex characters)",
            address
        )));
    }

    // Check if all characters after 0x are valid hex
    let hex_part = &address[2..];
    if !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(BindError::InvalidAddress(format!(
            "'{}'. Contains non-hexadecimal characters",
            address
        )));
    }

    Address::from_str(address)
        .map_err(|e| BindError::InvalidAddress(format!("'{}': {}", address, e)))
}

/// Parses a decimal or `0x`-prefixed hex quantity
pub fn validate_hex_value(value_str: &str) -> BindResult<U256> {
    let value_str = value_str.trim();
    if value_str.is_empty() {
        return Err(BindError::Encode("Value cannot be empty".to_string()));
    }

    if let Some(hex) = value_str
        .strip_prefix("0x")
        .or_else(|| value_str.strip_prefix("0X"))
    {
        U256::from_str_radix(hex, 16)
            .map_err(|_| BindError::Encode(format!("Invalid hexadecimal value: '{}'", value_str)))
    } else {
        U256::from_str(value_str).map_err(|_| {
            BindError::Encode(format!(
                "Invalid numeric value: '{}'. Use decimal format or '0x' prefixed hex",
                value_str
            ))
        })
    }
}

/// Rejects integers that do not fit the declared width
pub fn check_value_range(value: &DynSolValue) -> BindResult<()> {
    match value {
        DynSolValue::Uint(v, size) if *size < 256 && v.bit_len() > *size => Err(
            BindError::Encode(format!("Value {} overflows uint{}", v, size)),
        ),
        DynSolValue::Int(v, size) if *size < 256 => {
            // Bits above the sign bit must all equal the sign
            let top = v.into_raw() >> (*size - 1);
            let fits = if v.is_negative() {
                top == U256::MAX >> (*size - 1)
            } else {
                top.is_zero()
            };
            if fits {
                Ok(())
            } else {
                Err(BindError::Encode(format!(
                    "Value {} overflows int{}",
                    v, size
                )))
            }
        }
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) | DynSolValue::Tuple(items) => {
            items.iter().try_for_each(check_value_range)
        }
        _ => Ok(()),
    }
}

/// Topic word an indexed event argument is matched by: static values by
/// their 32-byte encoding, dynamic values by the hash of their packed encoding
pub fn topic_for_value(value: &DynSolValue) -> B256 {
    value
        .as_word()
        .unwrap_or_else(|| keccak256(value.abi_encode_packed()))
}

/// Convert JSON value to DynSolValue based on expected Solidity type
pub fn json_to_dyn_sol_value(value: &Value, sol_type: &DynSolType) -> BindResult<DynSolValue> {
    let converted = match sol_type {
        DynSolType::Address => {
            let addr_str = value
                .as_str()
                .ok_or_else(|| BindError::Encode("Address must be a string".to_string()))?;
            DynSolValue::Address(validate_address(addr_str)?)
        }
        DynSolType::Uint(size) => {
            let num = match value {
                Value::Number(n) => n
                    .as_u64()
                    .map(U256::from)
                    .ok_or_else(|| BindError::Encode(format!("Invalid uint value: {}", n)))?,
                Value::String(s) => validate_hex_value(s)?,
                _ => {
                    return Err(BindError::Encode(
                        "Uint must be a number or string".to_string(),
                    ))
                }
            };
            DynSolValue::Uint(num, *size)
        }
        DynSolType::Int(size) => {
            let text = match value {
                Value::Number(n) if n.is_i64() || n.is_u64() => n.to_string(),
                Value::String(s) => s.trim().to_string(),
                _ => {
                    return Err(BindError::Encode(
                        "Int must be an integer or string".to_string(),
                    ))
                }
            };
            let num = I256::from_dec_str(&text)
                .map_err(|_| BindError::Encode(format!("Invalid int value: {}", text)))?;
            DynSolValue::Int(num, *size)
        }
        DynSolType::String => {
            let s = value
                .as_str()
                .ok_or_else(|| BindError::Encode("String parameter must be a string".to_string()))?;
            DynSolValue::String(s.to_string())
        }
        DynSolType::Bool => {
            let b = value
                .as_bool()
                .ok_or_else(|| BindError::Encode("Bool parameter must be a boolean".to_string()))?;
            DynSolValue::Bool(b)
        }
        DynSolType::FixedBytes(size) => {
            let bytes = decode_hex_param(value)?;
            if bytes.len() > *size {
                return Err(BindError::Encode(format!(
                    "Expected at most {} bytes, got {}",
                    size,
                    bytes.len()
                )));
            }
            let mut word_bytes = [0u8; 32];
            word_bytes[..bytes.len()].copy_from_slice(&bytes);
            DynSolValue::FixedBytes(Word::from(word_bytes), *size)
        }
        DynSolType::Bytes => DynSolValue::Bytes(decode_hex_param(value)?),
        DynSolType::Array(inner) => {
            let array = value
                .as_array()
                .ok_or_else(|| BindError::Encode("Array parameter must be an array".to_string()))?;
            DynSolValue::Array(
                array
                    .iter()
                    .map(|element| json_to_dyn_sol_value(element, inner))
                    .collect::<BindResult<_>>()?,
            )
        }
        DynSolType::FixedArray(inner, len) => {
            let array = value
                .as_array()
                .ok_or_else(|| BindError::Encode("Array parameter must be an array".to_string()))?;
            if array.len() != *len {
                return Err(BindError::Encode(format!(
                    "Expected {} array elements, got {}",
                    len,
                    array.len()
                )));
            }
            DynSolValue::FixedArray(
                array
                    .iter()
                    .map(|element| json_to_dyn_sol_value(element, inner))
                    .collect::<BindResult<_>>()?,
            )
        }
        DynSolType::Tuple(types) => {
            let array = value
                .as_array()
                .ok_or_else(|| BindError::Encode("Tuple parameter must be an array".to_string()))?;
            if array.len() != types.len() {
                return Err(BindError::Encode(format!(
                    "Expected {} tuple elements, got {}",
                    types.len(),
                    array.len()
                )));
            }
            DynSolValue::Tuple(
                array
                    .iter()
                    .zip(types)
                    .map(|(element, ty)| json_to_dyn_sol_value(element, ty))
                    .collect::<BindResult<_>>()?,
            )
        }
        other => {
            return Err(BindError::Encode(format!(
                "Unsupported Solidity type: {:?}",
                other
            )))
        }
    };

    check_value_range(&converted)?;
    Ok(converted)
}

fn decode_hex_param(value: &Value) -> BindResult<Vec<u8>> {
    let hex_str = value
        .as_str()
        .ok_or_else(|| BindError::Encode("Bytes must be a hex string".to_string()))?;
    hex::decode(hex_str.trim_start_matches("0x"))
        .map_err(|_| BindError::Encode(format!("Invalid hex string: {}", hex_str)))
}

/// Convert single DynSolValue to JSON
pub fn dyn_sol_value_to_json(value: &DynSolValue) -> BindResult<Value> {
    match value {
        DynSolValue::Address(addr) => Ok(Value::String(addr.to_checksum(None))),
        DynSolValue::Uint(num, _) => Ok(Value::String(num.to_string())),
        DynSolValue::Int(num, _) => Ok(Value::String(num.to_string())),
        DynSolValue::Bool(b) => Ok(Value::Bool(*b)),
        DynSolValue::String(s) => Ok(Value::String(s.clone())),
        DynSolValue::Bytes(bytes) => Ok(Value::String(format!("0x{}", hex::encode(bytes)))),
        DynSolValue::FixedBytes(bytes, size) => Ok(Value::String(format!(
            "0x{}",
            hex::encode(&bytes[..*size])
        ))),
        DynSolValue::Array(arr) | DynSolValue::FixedArray(arr) | DynSolValue::Tuple(arr) => Ok(
            Value::Array(arr.iter().map(dyn_sol_value_to_json).collect::<BindResult<_>>()?),
        ),
        _ => Err(BindError::Decode(format!(
            "Unsupported DynSolValue type: {:?}",
            value
        ))),
    }
}

/// Extracts the revert reason from a JSON-RPC error, preferring the
/// `Error(string)` payload in `data` over the message text
pub fn revert_reason(message: &str, data: Option<&str>) -> Option<String> {
    if let Some(data) = data {
        let hex_str = serde_json::from_str::<String>(data)
            .unwrap_or_else(|_| data.trim_matches('"').to_string());
        if let Ok(bytes) = hex::decode(hex_str.trim_start_matches("0x")) {
            if let Some(reason) = decode_revert_data(&bytes) {
                return Some(reason);
            }
        }
    }

    message.find("execution reverted").map(|idx| {
        message[idx + "execution reverted".len()..]
            .trim_start_matches(':')
            .trim()
            .to_string()
    })
}

/// Decodes `Error(string)` revert data
pub fn decode_revert_data(data: &[u8]) -> Option<String> {
    Revert::abi_decode(data, true).ok().map(|revert| revert.reason)
}

/// Creates user-friendly error messages for common RPC errors
pub fn interpret_rpc_error(error: &str) -> String {
    if error.contains("insufficient funds") {
        "Insufficient funds to cover gas costs. Make sure the sender has enough ETH for gas fees.".to_string()
    } else if error.contains("gas required exceeds allowance") {
        "Gas limit too low. Try increasing the gas limit for this transaction.".to_string()
    } else if error.contains("nonce too low") {
        "Nonce too low. Another transaction was already mined with this nonce; retry with a fresh nonce.".to_string()
    } else if error.contains("replacement transaction underpriced") {
        "Gas price too low to replace pending transaction. Increase the gas price.".to_string()
    } else if error.contains("connection refused") || error.contains("network unreachable") {
        "Cannot connect to RPC endpoint. Check your internet connection and RPC URL configuration.".to_string()
    } else if error.contains("timeout") || error.contains("timed out") {
        "Request timed out. The RPC endpoint may be overloaded or unreachable.".to_string()
    } else if error.contains("rate limit") {
        "Too many requests to the RPC endpoint. Try again in a few moments or use a different endpoint.".to_string()
    } else if error.contains("method not found") {
        "The requested method is not supported by this RPC endpoint. Try using a different endpoint.".to_string()
    } else {
        error.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_address() {
        // Valid addresses
        assert!(validate_address("0x742d35Cc6435C9c1c72c5E7b18BaB7e1DB7a5d6e").is_ok());
        assert!(validate_address("0x0000000000000000000000000000000000000000").is_ok());

        // Invalid addresses
        assert!(validate_address("").is_err());
        assert!(validate_address("not_an_address").is_err());
        assert!(validate_address("0x123").is_err()); // Too short
        assert!(validate_address("742d35Cc6435C9c1c72c5E7b18BaB7e1DB7a5d6e").is_err()); // Missing 0x
        assert!(validate_address("0xgg2d35Cc6435C9c1c72c5E7b18BaB7e1DB7a5d6e").is_err());
        // Invalid hex
    }

    #[test]
    fn test_validate_hex_value() {
        assert_eq!(validate_hex_value("42").unwrap(), U256::from(42));
        assert_eq!(validate_hex_value("0x2a").unwrap(), U256::from(42));
        assert!(validate_hex_value("").is_err());
        assert!(validate_hex_value("0xzz").is_err());
    }

    #[test]
    fn test_integer_width_checks() {
        assert!(check_value_range(&DynSolValue::Uint(U256::from(255), 8)).is_ok());
        assert!(check_value_range(&DynSolValue::Uint(U256::from(256), 8)).is_err());
        assert!(check_value_range(&DynSolValue::Uint(U256::MAX, 256)).is_ok());

        let int = |s: &str| I256::from_dec_str(s).unwrap();
        assert!(check_value_range(&DynSolValue::Int(int("127"), 8)).is_ok());
        assert!(check_value_range(&DynSolValue::Int(int("-128"), 8)).is_ok());
        assert!(check_value_range(&DynSolValue::Int(int("128"), 8)).is_err());
        assert!(check_value_range(&DynSolValue::Int(int("-129"), 8)).is_err());

        let nested = DynSolValue::Array(vec![
            DynSolValue::Uint(U256::from(1), 8),
            DynSolValue::Uint(U256::from(1000), 8),
        ]);
        assert!(check_value_range(&nested).is_err());
    }

    #[test]
    fn test_json_coercion() {
        assert_eq!(
            json_to_dyn_sol_value(&json!("42"), &DynSolType::Uint(256)).unwrap(),
            DynSolValue::Uint(U256::from(42), 256)
        );
        assert_eq!(
            json_to_dyn_sol_value(&json!(7), &DynSolType::Uint(8)).unwrap(),
            DynSolValue::Uint(U256::from(7), 8)
        );
        assert!(json_to_dyn_sol_value(&json!(300), &DynSolType::Uint(8)).is_err());
        assert_eq!(
            json_to_dyn_sol_value(&json!(-5), &DynSolType::Int(16)).unwrap(),
            DynSolValue::Int(I256::from_dec_str("-5").unwrap(), 16)
        );
        assert_eq!(
            json_to_dyn_sol_value(
                &json!([true, "0xabcd"]),
                &DynSolType::Tuple(vec![DynSolType::Bool, DynSolType::Bytes])
            )
            .unwrap(),
            DynSolValue::Tuple(vec![
                DynSolValue::Bool(true),
                DynSolValue::Bytes(vec![0xab, 0xcd])
            ])
        );
        assert!(json_to_dyn_sol_value(
            &json!([1, 2]),
            &DynSolType::FixedArray(Box::new(DynSolType::Uint(256)), 3)
        )
        .is_err());
        assert!(json_to_dyn_sol_value(&json!(1), &DynSolType::String).is_err());
    }

    #[test]
    fn test_value_to_json() {
        let value = DynSolValue::Tuple(vec![
            DynSolValue::Uint(U256::from(42), 256),
            DynSolValue::FixedBytes(Word::right_padding_from(&[0xff]), 1),
            DynSolValue::String("hi".to_string()),
        ]);
        assert_eq!(
            dyn_sol_value_to_json(&value).unwrap(),
            json!(["42", "0xff", "hi"])
        );
    }

    #[test]
    fn test_revert_reason_from_data() {
        let data = Revert {
            reason: "increment should be positive".to_string(),
        }
        .abi_encode();
        let data_json = format!("\"0x{}\"", hex::encode(&data));
        assert_eq!(
            revert_reason("execution reverted", Some(&data_json)).as_deref(),
            Some("increment should be positive")
        );
    }

    #[test]
    fn test_revert_reason_from_message() {
        assert_eq!(
            revert_reason("execution reverted: incBy: increment should be positive", None)
                .as_deref(),
            Some("incBy: increment should be positive")
        );
        assert_eq!(revert_reason("execution reverted", None).as_deref(), Some(""));
        assert_eq!(revert_reason("nonce too low", None), None);
    }

    #[test]
    fn test_topic_for_value() {
        let word = topic_for_value(&DynSolValue::Uint(U256::from(1), 256));
        assert_eq!(word, B256::with_last_byte(1));

        let hashed = topic_for_value(&DynSolValue::String("abc".to_string()));
        assert_eq!(hashed, keccak256("abc"));
    }
}
