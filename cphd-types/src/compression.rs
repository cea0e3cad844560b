use serde::{Deserialize, Serialize};

use crate::{CphdError, CphdResult};

/// Сжатие сигнального блока (`SignalCompressionID`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compression {
    /// Без сжатия, выборки хранятся как есть
    #[default]
    #[serde(rename = "NONE")]
    None,
    /// Сжатие LZ4 блоками векторов
    #[serde(rename = "LZ4")]
    Lz4,
}

impl Compression {
    pub fn as_str(&self) -> &'static str {
        match self {
            Compression::None => "NONE",
            Compression::Lz4 => "LZ4",
        }
    }

    pub fn is_compressed(&self) -> bool {
        *self != Compression::None
    }
}

impl std::fmt::Display for Compression {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Compression {
    type Err = CphdError;

    fn from_str(s: &str) -> CphdResult<Self> {
        match s.to_lowercase().as_str() {
            "none" | "no" | "off" => Ok(Compression::None),
            "lz4" => Ok(Compression::Lz4),
            _ => Err(CphdError::format(format!(
                "Unknown compression '{s}'. Use: none, lz4"
            ))),
        }
    }
}
