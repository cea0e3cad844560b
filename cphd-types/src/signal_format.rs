use serde::{Deserialize, Serialize};

use crate::{CphdError, CphdResult};

/// Формат комплексных выборок сигнального массива (`SignalArrayFormat`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalFormat {
    /// 8-битные целые (I8, Q8)
    #[serde(rename = "CI2")]
    Ci2,
    /// 16-битные целые (I16, Q16)
    #[serde(rename = "CI4")]
    Ci4,
    /// 32-битные числа с плавающей точкой (F32, F32)
    #[serde(rename = "CF8")]
    Cf8,
}

impl SignalFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalFormat::Ci2 => "CI2",
            SignalFormat::Ci4 => "CI4",
            SignalFormat::Cf8 => "CF8",
        }
    }

    /// Размер одной комплексной выборки в байтах
    pub fn sample_size(&self) -> usize {
        match self {
            SignalFormat::Ci2 => 2, // 1 байт I + 1 байт Q
            SignalFormat::Ci4 => 4, // 2 байта I + 2 байта Q
            SignalFormat::Cf8 => 8, // 4 байта I + 4 байта Q
        }
    }

    /// Размер одной компоненты (I или Q) в байтах
    pub fn component_size(&self) -> usize {
        self.sample_size() / 2
    }
}

impl std::fmt::Display for SignalFormat {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SignalFormat {
    type Err = CphdError;

    fn from_str(s: &str) -> CphdResult<Self> {
        match s.to_uppercase().as_str() {
            "CI2" | "INT8" | "I8" => Ok(SignalFormat::Ci2),
            "CI4" | "INT16" | "I16" => Ok(SignalFormat::Ci4),
            "CF8" | "FLOAT32" | "F32" => Ok(SignalFormat::Cf8),
            _ => Err(CphdError::format(format!(
                "Unknown signal array format: '{s}'. Use: CI2, CI4, CF8"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_sizes() {
        assert_eq!(SignalFormat::Ci2.sample_size(), 2);
        assert_eq!(SignalFormat::Ci4.sample_size(), 4);
        assert_eq!(SignalFormat::Cf8.sample_size(), 8);
        assert_eq!(SignalFormat::Cf8.component_size(), 4);
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!("cf8".parse::<SignalFormat>().unwrap(), SignalFormat::Cf8);
        assert_eq!("int16".parse::<SignalFormat>().unwrap(), SignalFormat::Ci4);
        assert!("CI8".parse::<SignalFormat>().is_err());
    }

    #[test]
    fn test_serde_uses_cphd_names() {
        let json = serde_json::to_string(&SignalFormat::Ci4).unwrap();
        assert_eq!(json, "\"CI4\"");

        let back: SignalFormat = serde_json::from_str("\"CF8\"").unwrap();
        assert_eq!(back, SignalFormat::Cf8);
    }
}
