use serde::{Deserialize, Serialize};

use crate::{CphdError, CphdResult};

/// Размер слова PVP в байтах. Смещения и размеры параметров задаются в словах.
pub const PVP_WORD_SIZE: usize = 8;

/// Формат одного PVP параметра.
///
/// Строковое представление совпадает с полем `Format` метаданных CPHD:
/// `F8`, `I8`, `U8`, `X=F8;Y=F8;Z=F8;` и `S[n]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PvpFormat {
    /// 64-битное число с плавающей точкой
    F8,
    /// 64-битное знаковое целое
    I8,
    /// 64-битное беззнаковое целое
    U8,
    /// Вектор из трёх F8 (X, Y, Z)
    Xyz,
    /// Строка фиксированной длины `n` байт (дополняется нулями)
    Str(usize),
}

impl PvpFormat {
    /// Размер параметра в 8-байтовых словах
    pub fn size_words(&self) -> usize {
        match self {
            PvpFormat::F8 | PvpFormat::I8 | PvpFormat::U8 => 1,
            PvpFormat::Xyz => 3,
            PvpFormat::Str(n) => n.div_ceil(PVP_WORD_SIZE).max(1),
        }
    }

    pub fn size_bytes(&self) -> usize {
        self.size_words() * PVP_WORD_SIZE
    }
}

impl std::fmt::Display for PvpFormat {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            PvpFormat::F8 => write!(f, "F8"),
            PvpFormat::I8 => write!(f, "I8"),
            PvpFormat::U8 => write!(f, "U8"),
            PvpFormat::Xyz => write!(f, "X=F8;Y=F8;Z=F8;"),
            PvpFormat::Str(n) => write!(f, "S[{n}]"),
        }
    }
}

impl std::str::FromStr for PvpFormat {
    type Err = CphdError;

    fn from_str(s: &str) -> CphdResult<Self> {
        let s = s.trim();

        match s {
            "F8" => return Ok(PvpFormat::F8),
            "I8" => return Ok(PvpFormat::I8),
            "U8" => return Ok(PvpFormat::U8),
            "X=F8;Y=F8;Z=F8;" | "X=F8;Y=F8;Z=F8" => return Ok(PvpFormat::Xyz),
            _ => {}
        }

        let len = s
            .strip_prefix("S[")
            .and_then(|rest| rest.strip_suffix(']'))
            .ok_or_else(|| CphdError::schema(format!("Unknown PVP format: '{s}'")))?;

        match len.parse::<usize>() {
            Ok(n) if n > 0 => Ok(PvpFormat::Str(n)),
            _ => Err(CphdError::schema(format!(
                "Invalid PVP string length in '{s}'"
            ))),
        }
    }
}

impl TryFrom<String> for PvpFormat {
    type Error = CphdError;

    fn try_from(s: String) -> CphdResult<Self> {
        s.parse()
    }
}

impl From<PvpFormat> for String {
    fn from(f: PvpFormat) -> Self {
        f.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_words() {
        assert_eq!(PvpFormat::F8.size_words(), 1);
        assert_eq!(PvpFormat::Xyz.size_words(), 3);
        assert_eq!(PvpFormat::Str(8).size_words(), 1);
        assert_eq!(PvpFormat::Str(9).size_words(), 2);
        assert_eq!(PvpFormat::Str(20).size_bytes(), 24);
    }

    #[test]
    fn test_parse_display() {
        for f in [
            PvpFormat::F8,
            PvpFormat::I8,
            PvpFormat::U8,
            PvpFormat::Xyz,
            PvpFormat::Str(12),
        ] {
            assert_eq!(f.to_string().parse::<PvpFormat>().unwrap(), f);
        }

        assert_eq!("X=F8;Y=F8;Z=F8".parse::<PvpFormat>().unwrap(), PvpFormat::Xyz);
        assert!("F4".parse::<PvpFormat>().is_err());
        assert!("S[0]".parse::<PvpFormat>().is_err());
        assert!("S[abc]".parse::<PvpFormat>().is_err());
    }

    #[test]
    fn test_serde_as_format_string() {
        let json = serde_json::to_string(&PvpFormat::Xyz).unwrap();
        assert_eq!(json, "\"X=F8;Y=F8;Z=F8;\"");

        let back: PvpFormat = serde_json::from_str("\"S[16]\"").unwrap();
        assert_eq!(back, PvpFormat::Str(16));

        assert!(serde_json::from_str::<PvpFormat>("\"Q8\"").is_err());
    }
}
