//! Land-use class codes of the cadastre.

use crate::error::{OrthochipError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Cadastral land-use code (the `NS` attribute of a parcel feature)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
#[repr(u16)]
pub enum ClassCode {
    Ns40 = 40,
    Ns41 = 41,
    Ns42 = 42,
    Ns48 = 48,
    Ns52 = 52,
    Ns53 = 53,
    Ns54 = 54,
    Ns55 = 55,
    Ns56 = 56,
    Ns57 = 57,
    Ns58 = 58,
    Ns59 = 59,
    Ns60 = 60,
    Ns61 = 61,
    Ns62 = 62,
    Ns63 = 63,
    Ns64 = 64,
    Ns65 = 65,
    Ns72 = 72,
    Ns83 = 83,
    Ns84 = 84,
    Ns87 = 87,
    Ns88 = 88,
    Ns92 = 92,
    Ns95 = 95,
    Ns96 = 96,
}

impl ClassCode {
    pub const ALL: [ClassCode; 26] = [
        ClassCode::Ns40,
        ClassCode::Ns41,
        ClassCode::Ns42,
        ClassCode::Ns48,
        ClassCode::Ns52,
        ClassCode::Ns53,
        ClassCode::Ns54,
        ClassCode::Ns55,
        ClassCode::Ns56,
        ClassCode::Ns57,
        ClassCode::Ns58,
        ClassCode::Ns59,
        ClassCode::Ns60,
        ClassCode::Ns61,
        ClassCode::Ns62,
        ClassCode::Ns63,
        ClassCode::Ns64,
        ClassCode::Ns65,
        ClassCode::Ns72,
        ClassCode::Ns83,
        ClassCode::Ns84,
        ClassCode::Ns87,
        ClassCode::Ns88,
        ClassCode::Ns92,
        ClassCode::Ns95,
        ClassCode::Ns96,
    ];

    pub fn code(&self) -> u16 {
        *self as u16
    }

    /// Read a class code from a feature attribute stored as a number or a string
    pub fn from_attribute(value: &serde_json::Value) -> Option<ClassCode> {
        let code = match value {
            serde_json::Value::Number(n) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64))?,
            serde_json::Value::String(s) => s.trim().parse::<u64>().ok()?,
            _ => return None,
        };
        u16::try_from(code).ok().and_then(|c| ClassCode::try_from(c).ok())
    }
}

impl TryFrom<u16> for ClassCode {
    type Error = OrthochipError;

    fn try_from(value: u16) -> Result<Self> {
        ClassCode::ALL.iter().copied().find(|c| c.code() == value).ok_or_else(|| {
            OrthochipError::validation("mask_label", format!("{} is not a cadastral class code", value))
        })
    }
}

impl From<ClassCode> for u16 {
    fn from(value: ClassCode) -> Self {
        value.code()
    }
}

impl fmt::Display for ClassCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_codes_round_trip() {
        for class in ClassCode::ALL {
            assert_eq!(ClassCode::try_from(class.code()).unwrap(), class);
        }
    }

    #[test]
    fn test_rejects_unknown_codes() {
        assert!(ClassCode::try_from(43).is_err());
        assert!(ClassCode::try_from(0).is_err());
    }

    #[test]
    fn test_from_attribute() {
        assert_eq!(ClassCode::from_attribute(&json!(41)), Some(ClassCode::Ns41));
        assert_eq!(ClassCode::from_attribute(&json!("92")), Some(ClassCode::Ns92));
        assert_eq!(ClassCode::from_attribute(&json!(41.0)), Some(ClassCode::Ns41));
        assert_eq!(ClassCode::from_attribute(&json!(41.5)), None);
        assert_eq!(ClassCode::from_attribute(&json!(99)), None);
        assert_eq!(ClassCode::from_attribute(&json!(null)), None);
    }

    #[test]
    fn test_ordering_follows_code() {
        let mut codes = vec![ClassCode::Ns96, ClassCode::Ns40, ClassCode::Ns61];
        codes.sort();
        assert_eq!(codes, vec![ClassCode::Ns40, ClassCode::Ns61, ClassCode::Ns96]);
    }

    #[test]
    fn test_serde_as_number() {
        assert_eq!(serde_json::to_string(&ClassCode::Ns83).unwrap(), "83");
        let parsed: Vec<ClassCode> = serde_json::from_str("[40, 41]").unwrap();
        assert_eq!(parsed, vec![ClassCode::Ns40, ClassCode::Ns41]);
        assert!(serde_json::from_str::<ClassCode>("44").is_err());
    }
}
