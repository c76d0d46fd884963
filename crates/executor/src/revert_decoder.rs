//! Solidity Revert 错误解码器
//!
//! 解析 PositionManager、Universal Router、Permit2 等合约 revert 时返回的数据

use ethers::abi::{self, ParamType, Token};
use ethers::types::U256;
use ethers::utils::id;
use std::collections::HashMap;
use tracing::{debug, warn};

const SELECTOR_ERROR_STRING: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];
const SELECTOR_PANIC: [u8; 4] = [0x4e, 0x48, 0x7b, 0x71];

/// 已知的自定义错误: 签名 -> 参数类型
fn known_errors() -> Vec<(&'static str, Vec<ParamType>)> {
    vec![
        // PositionManager
        ("NotApproved(address)", vec![ParamType::Address]),
        ("DeadlinePassed(uint256)", vec![ParamType::Uint(256)]),
        ("MaximumAmountExceeded(uint128,uint128)", vec![ParamType::Uint(128), ParamType::Uint(128)]),
        ("MinimumAmountInsufficient(uint128,uint128)", vec![ParamType::Uint(128), ParamType::Uint(128)]),
        // V4Router
        ("V4TooLittleReceived(uint256,uint256)", vec![ParamType::Uint(256), ParamType::Uint(256)]),
        ("V4TooMuchRequested(uint256,uint256)", vec![ParamType::Uint(256), ParamType::Uint(256)]),
        // PoolManager
        ("CurrencyNotSettled()", vec![]),
        ("PoolNotInitialized()", vec![]),
        ("ManagerLocked()", vec![]),
        // Universal Router
        ("TransactionDeadlinePassed()", vec![]),
        ("ExecutionFailed(uint256,bytes)", vec![ParamType::Uint(256), ParamType::Bytes]),
        // Permit2
        ("AllowanceExpired(uint256)", vec![ParamType::Uint(256)]),
        ("InsufficientAllowance(uint256)", vec![ParamType::Uint(256)]),
    ]
}

lazy_static::lazy_static! {
    static ref CUSTOM_ERRORS: HashMap<[u8; 4], (&'static str, Vec<ParamType>)> = known_errors()
        .into_iter()
        .map(|(sig, params)| (id(sig), (sig, params)))
        .collect();

    // Panic 错误代码映射
    static ref PANIC_CODES: HashMap<u64, &'static str> = {
        let mut m = HashMap::new();
        m.insert(0x00, "通用/未定义错误");
        m.insert(0x01, "断言失败 (assert)");
        m.insert(0x11, "算术溢出/下溢");
        m.insert(0x12, "除以零");
        m.insert(0x21, "无效的枚举值");
        m.insert(0x31, "空数组 pop");
        m.insert(0x32, "数组越界");
        m.insert(0x41, "内存分配过大");
        m
    };

    static ref HEX_PATTERNS: Vec<regex::Regex> = [
        // Revert(Bytes(0x...))
        r"Bytes\((0x[0-9a-fA-F]+)\)",
        // revert data: 0x...
        r"revert data[:\s]+(0x[0-9a-fA-F]+)",
        // execution reverted: 0x...
        r"reverted[:\s]+(0x[0-9a-fA-F]+)",
        r"(0x[0-9a-fA-F]{8,})",
    ]
    .iter()
    .filter_map(|p| regex::Regex::new(p).ok())
    .collect();
}

/// 错误类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevertErrorType {
    /// 标准 Error(string)
    ErrorString,
    Panic,
    /// 已知签名的自定义错误
    CustomError,
    /// 未知选择器
    UnknownCustomError,
    EmptyRevert,
    Unknown,
}

/// 解码后的错误信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRevertError {
    pub error_type: RevertErrorType,
    /// 可读的错误消息
    pub message: String,
    /// 原始错误数据 (hex)
    pub raw_data: String,
}

impl DecodedRevertError {
    fn new(error_type: RevertErrorType, message: impl Into<String>, raw_data: impl Into<String>) -> Self {
        Self {
            error_type,
            message: message.into(),
            raw_data: raw_data.into(),
        }
    }
}

/// Revert 错误解码器
pub struct RevertDecoder;

impl RevertDecoder {
    /// 从 ethers 错误消息中提取并解码 revert 数据
    pub fn decode_from_error_string(error: &str) -> DecodedRevertError {
        debug!("解码错误字符串: {}", error);

        if let Some(data) = Self::extract_hex_from_error(error) {
            return Self::decode_revert_data(&data);
        }

        let error_type = if error.to_lowercase().contains("execution reverted") {
            RevertErrorType::ErrorString
        } else {
            RevertErrorType::Unknown
        };
        DecodedRevertError::new(error_type, error, error)
    }

    /// 解码 revert 数据 (bytes)
    pub fn decode_revert_data(data: &[u8]) -> DecodedRevertError {
        if data.is_empty() {
            return DecodedRevertError::new(RevertErrorType::EmptyRevert, "空 revert (无错误消息)", "0x");
        }

        let raw_hex = format!("0x{}", hex::encode(data));
        if data.len() < 4 {
            return DecodedRevertError::new(
                RevertErrorType::Unknown,
                format!("数据太短，无法解析: {}", raw_hex),
                raw_hex,
            );
        }

        let mut selector = [0u8; 4];
        selector.copy_from_slice(&data[..4]);
        let payload = &data[4..];

        match selector {
            SELECTOR_ERROR_STRING => Self::decode_error_string(payload, raw_hex),
            SELECTOR_PANIC => Self::decode_panic(payload, raw_hex),
            _ => Self::decode_custom(selector, payload, raw_hex),
        }
    }

    fn decode_error_string(payload: &[u8], raw_hex: String) -> DecodedRevertError {
        match abi::decode(&[ParamType::String], payload) {
            Ok(tokens) => {
                if let Some(Token::String(msg)) = tokens.into_iter().next() {
                    return DecodedRevertError::new(RevertErrorType::ErrorString, msg, raw_hex);
                }
            }
            Err(e) => warn!("解码 Error(string) 失败: {:?}", e),
        }

        match Self::try_extract_utf8(payload) {
            Some(msg) => DecodedRevertError::new(RevertErrorType::ErrorString, msg, raw_hex),
            None => DecodedRevertError::new(RevertErrorType::ErrorString, "Error(string) 但无法解码消息", raw_hex),
        }
    }

    fn decode_panic(payload: &[u8], raw_hex: String) -> DecodedRevertError {
        if let Ok(tokens) = abi::decode(&[ParamType::Uint(256)], payload) {
            if let Some(Token::Uint(code)) = tokens.into_iter().next() {
                let code = code.low_u64();
                let description = PANIC_CODES.get(&code).copied().unwrap_or("未知 Panic 代码");
                return DecodedRevertError::new(
                    RevertErrorType::Panic,
                    format!("Panic(0x{:02x}): {}", code, description),
                    raw_hex,
                );
            }
        }
        DecodedRevertError::new(RevertErrorType::Panic, "Panic 但无法解码代码", raw_hex)
    }

    fn decode_custom(selector: [u8; 4], payload: &[u8], raw_hex: String) -> DecodedRevertError {
        let Some((signature, params)) = CUSTOM_ERRORS.get(&selector) else {
            return DecodedRevertError::new(
                RevertErrorType::UnknownCustomError,
                format!("自定义错误 (选择器: 0x{})", hex::encode(selector)),
                raw_hex,
            );
        };

        let name = signature.split('(').next().unwrap_or(signature);
        let args = match abi::decode(params, payload) {
            Ok(tokens) => tokens.iter().map(Self::format_token).collect::<Vec<_>>().join(", "),
            Err(e) => {
                warn!("解码 {} 参数失败: {:?}", signature, e);
                "?".to_string()
            }
        };
        DecodedRevertError::new(RevertErrorType::CustomError, format!("{}({})", name, args), raw_hex)
    }

    fn format_token(token: &Token) -> String {
        match token {
            Token::Address(a) => format!("{:?}", a),
            Token::Uint(v) | Token::Int(v) => v.to_string(),
            Token::Bytes(b) => format!("0x{}", hex::encode(b)),
            other => other.to_string(),
        }
    }

    /// 从错误消息中提取 hex 数据
    fn extract_hex_from_error(error: &str) -> Option<Vec<u8>> {
        HEX_PATTERNS.iter().find_map(|re| {
            let hex_str = re.captures(error)?.get(1)?.as_str();
            hex::decode(&hex_str[2..]).ok()
        })
    }

    /// ABI 解码失败时，按 offset/length 布局直接读取字符串
    fn try_extract_utf8(data: &[u8]) -> Option<String> {
        if data.len() < 64 {
            return None;
        }

        let offset = U256::from_big_endian(&data[0..32]);
        if offset < U256::from(32) || offset >= U256::from(data.len()) {
            return None;
        }
        let offset = offset.as_usize();
        if offset + 32 > data.len() {
            return None;
        }

        let length = U256::from_big_endian(&data[offset..offset + 32]);
        let start = offset + 32;
        if length > U256::from(data.len() - start) {
            return None;
        }

        String::from_utf8(data[start..start + length.as_usize()].to_vec()).ok()
    }
}

impl std::fmt::Display for DecodedRevertError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:?}] {}", self.error_type, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::Address;

    fn with_selector(signature: &str, tokens: &[Token]) -> Vec<u8> {
        let mut data = id(signature).to_vec();
        data.extend(abi::encode(tokens));
        data
    }

    #[test]
    fn test_decode_error_string() {
        let data = with_selector("Error(string)", &[Token::String("Too little received".into())]);
        let decoded = RevertDecoder::decode_revert_data(&data);
        assert_eq!(decoded.error_type, RevertErrorType::ErrorString);
        assert_eq!(decoded.message, "Too little received");
    }

    #[test]
    fn test_decode_panic() {
        let data = with_selector("Panic(uint256)", &[Token::Uint(U256::from(0x11))]);
        let decoded = RevertDecoder::decode_revert_data(&data);
        assert_eq!(decoded.error_type, RevertErrorType::Panic);
        assert!(decoded.message.contains("0x11"));
    }

    #[test]
    fn test_decode_known_custom_errors() {
        let caller = Address::repeat_byte(0x42);
        let data = with_selector("NotApproved(address)", &[Token::Address(caller)]);
        let decoded = RevertDecoder::decode_revert_data(&data);
        assert_eq!(decoded.error_type, RevertErrorType::CustomError);
        assert_eq!(decoded.message, format!("NotApproved({:?})", caller));

        let data = with_selector(
            "V4TooLittleReceived(uint256,uint256)",
            &[Token::Uint(U256::from(990)), Token::Uint(U256::from(900))],
        );
        assert_eq!(
            RevertDecoder::decode_revert_data(&data).message,
            "V4TooLittleReceived(990, 900)"
        );

        let decoded = RevertDecoder::decode_revert_data(&id("CurrencyNotSettled()"));
        assert_eq!(decoded.message, "CurrencyNotSettled()");
    }

    #[test]
    fn test_unknown_and_empty() {
        let decoded = RevertDecoder::decode_revert_data(&[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(decoded.error_type, RevertErrorType::UnknownCustomError);
        assert!(decoded.message.contains("deadbeef"));

        assert_eq!(
            RevertDecoder::decode_revert_data(&[]).error_type,
            RevertErrorType::EmptyRevert
        );
    }

    #[test]
    fn test_decode_from_error_string() {
        let data = with_selector("DeadlinePassed(uint256)", &[Token::Uint(U256::from(1_700_000_000u64))]);
        let error = format!("(code: 3, message: execution reverted, data: Some(Bytes(0x{})))", hex::encode(&data));
        let decoded = RevertDecoder::decode_from_error_string(&error);
        assert_eq!(decoded.message, "DeadlinePassed(1700000000)");

        let plain = RevertDecoder::decode_from_error_string("execution reverted");
        assert_eq!(plain.error_type, RevertErrorType::ErrorString);
    }
}
