use std::ops::Range;

use cphd_core::DEFAULT_FRAME_BYTES;
use cphd_types::{Compression, SignalFormat};

/// Общие настройки команд.
#[derive(Debug, Clone)]
pub struct ToolConfig {
    /// Рабочих потоков для каналов и опорных массивов
    pub threads: usize,
    /// Бюджет буферов читателя, байт
    pub scratch_bytes: usize,
    /// Целевой размер кадра писателя, байт
    pub block_bytes: usize,
}

/// Геометрия одного канала `vectors × samples`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelShape {
    pub num_vectors: usize,
    pub num_samples: usize,
}

/// Параметры синтетического файла для `generate`.
#[derive(Debug, Clone)]
pub struct GenerateSpec {
    pub channels: Vec<ChannelShape>,
    pub signal_format: SignalFormat,
    pub compression: Compression,
    /// Добавить опорный массив усиления антенны к каждому каналу
    pub with_support: bool,
    /// Зерно генератора выборок
    pub seed: u64,
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            scratch_bytes: 64 * 1024 * 1024,
            block_bytes: DEFAULT_FRAME_BYTES,
        }
    }
}

impl Default for GenerateSpec {
    fn default() -> Self {
        Self {
            channels: vec![ChannelShape {
                num_vectors: 256,
                num_samples: 1024,
            }],
            signal_format: SignalFormat::Cf8,
            compression: Compression::None,
            with_support: false,
            seed: 42,
        }
    }
}

impl std::fmt::Display for ChannelShape {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "{}x{}", self.num_vectors, self.num_samples)
    }
}

impl std::str::FromStr for ChannelShape {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (v, n) = s
            .trim()
            .to_lowercase()
            .split_once('x')
            .map(|(a, b)| (a.trim().to_string(), b.trim().to_string()))
            .ok_or_else(|| format!("Invalid channel shape '{s}'. Use: VECTORSxSAMPLES"))?;

        let num_vectors: usize = v
            .parse()
            .map_err(|e| format!("Invalid vector count '{v}': {e}"))?;
        let num_samples: usize = n
            .parse()
            .map_err(|e| format!("Invalid sample count '{n}': {e}"))?;

        if num_vectors == 0 || num_samples == 0 {
            return Err(format!("Channel shape '{s}' has a zero dimension"));
        }

        Ok(Self {
            num_vectors,
            num_samples,
        })
    }
}

/// Парсит размер в байтах.
///
/// Поддерживает суффиксы: `GiB`, `MiB`, `KiB`, `GB`, `MB`, `KB`, `B`
/// (регистронезависимо).
///
/// # Примеры
/// ```
/// use cphd_tool::config::parse_byte_size;
/// assert_eq!(parse_byte_size("4MiB").unwrap(), 4 * 1024 * 1024);
/// assert_eq!(parse_byte_size("1.5KB").unwrap(), 1_500);
/// assert_eq!(parse_byte_size("4096").unwrap(), 4096);
/// ```
pub fn parse_byte_size(s: &str) -> Result<usize, String> {
    let s = s.trim();
    let lower = s.to_lowercase();

    let suffixes: [(&str, f64); 7] = [
        ("gib", 1024.0 * 1024.0 * 1024.0),
        ("mib", 1024.0 * 1024.0),
        ("kib", 1024.0),
        ("gb", 1e9),
        ("mb", 1e6),
        ("kb", 1e3),
        ("b", 1.0),
    ];

    let Some((num_str, mult)) = suffixes
        .iter()
        .find_map(|(suffix, mult)| lower.strip_suffix(suffix).map(|v| (v.trim(), *mult)))
    else {
        // Без суффикса: число в байтах
        return s
            .parse::<usize>()
            .map_err(|e| format!("Invalid size '{s}': {e}"));
    };

    let n: f64 = num_str
        .parse()
        .map_err(|e| format!("Invalid size value '{num_str}': {e}"))?;

    if !n.is_finite() || n < 0.0 {
        return Err(format!("Invalid size '{s}'"));
    }

    Ok((n * mult).round() as usize)
}

/// Парсит диапазон векторов `START..END` (конец не включается).
pub fn parse_vector_range(s: &str) -> Result<Range<usize>, String> {
    let (a, b) = s
        .trim()
        .split_once("..")
        .ok_or_else(|| format!("Invalid range '{s}'. Use: START..END"))?;

    let start: usize = a
        .trim()
        .parse()
        .map_err(|e| format!("Invalid range start '{a}': {e}"))?;
    let end: usize = b
        .trim()
        .parse()
        .map_err(|e| format!("Invalid range end '{b}': {e}"))?;

    if start > end {
        return Err(format!("Range '{s}' is reversed"));
    }

    Ok(start..end)
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_byte_size() {
        assert_eq!(parse_byte_size("4MiB").unwrap(), 4 * 1024 * 1024);
        assert_eq!(parse_byte_size("2 KiB").unwrap(), 2048);
        assert_eq!(parse_byte_size("1GB").unwrap(), 1_000_000_000);
        assert_eq!(parse_byte_size("512b").unwrap(), 512);
        assert_eq!(parse_byte_size("65536").unwrap(), 65536);
        assert!(parse_byte_size("lots").is_err());
        assert!(parse_byte_size("-1MB").is_err());
    }

    #[test]
    fn test_channel_shape_fromstr() {
        let shape: ChannelShape = "128x512".parse().unwrap();
        assert_eq!(shape.num_vectors, 128);
        assert_eq!(shape.num_samples, 512);
        assert_eq!(shape.to_string(), "128x512");

        assert!("128".parse::<ChannelShape>().is_err());
        assert!("0x5".parse::<ChannelShape>().is_err());
    }

    #[test]
    fn test_parse_vector_range() {
        assert_eq!(parse_vector_range("10..20").unwrap(), 10..20);
        assert_eq!(parse_vector_range("0..0").unwrap(), 0..0);
        assert!(parse_vector_range("5..2").is_err());
        assert!(parse_vector_range("5-9").is_err());
    }
}
