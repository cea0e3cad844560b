//! Байтовая раскладка массивов внутри блоков.
//!
//! Смещения отсчитываются от начала соответствующего блока и хранятся в
//! JSON метаданных рядом с описанием каналов, как `Data` секция CPHD.

use cphd_types::{CphdError, CphdResult};
use serde::{Deserialize, Serialize};

use crate::metadata::Metadata;

/// Раскладка одного канала в блоках PVP и сигнала.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelLayout {
    pub identifier: String,
    pub signal_array_byte_offset: u64,
    pub pvp_array_byte_offset: u64,
    /// Размер сжатого массива; `None` для несжатых файлов
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compressed_signal_size: Option<u64>,
}

/// Раскладка опорного массива в блоке опорных массивов.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportLayout {
    pub identifier: String,
    pub array_byte_offset: u64,
}

/// Раскладка всех массивов файла.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataLayout {
    pub num_bytes_pvp: usize,
    pub channels: Vec<ChannelLayout>,
    pub support_arrays: Vec<SupportLayout>,
}

/// Содержимое блока метаданных: модель плюс раскладка.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataDocument {
    pub metadata: Metadata,
    pub data: DataLayout,
}

impl DataLayout {
    /// Вычисляет раскладку по метаданным.
    ///
    /// Для сжатых файлов `compressed_sizes` обязателен и содержит размер
    /// закодированного массива каждого канала.
    pub fn compute(
        metadata: &Metadata,
        compressed_sizes: Option<&[u64]>,
    ) -> CphdResult<Self> {
        let compressed = metadata.compression.is_compressed();

        let sizes = match (compressed, compressed_sizes) {
            (true, Some(sizes)) if sizes.len() == metadata.num_channels() => Some(sizes),
            (true, Some(sizes)) => {
                return Err(CphdError::schema(format!(
                    "Expected {} compressed sizes, got {}",
                    metadata.num_channels(),
                    sizes.len()
                )))
            }
            (true, None) => {
                return Err(CphdError::schema(
                    "Compressed file requires per-channel signal sizes",
                ))
            }
            (false, _) => None,
        };

        let num_bytes_pvp = metadata.pvp.num_bytes_pvp();
        let mut channels = Vec::with_capacity(metadata.num_channels());
        let mut signal_offset = 0u64;
        let mut pvp_offset = 0u64;

        for (i, c) in metadata.channels.iter().enumerate() {
            let signal_size = match sizes {
                Some(s) => s[i],
                None => metadata.signal_bytes(i)?,
            };

            channels.push(ChannelLayout {
                identifier: c.identifier.clone(),
                signal_array_byte_offset: signal_offset,
                pvp_array_byte_offset: pvp_offset,
                compressed_signal_size: sizes.map(|s| s[i]),
            });

            signal_offset = signal_offset
                .checked_add(signal_size)
                .ok_or_else(|| offset_overflow("signal", i))?;
            pvp_offset = (c.num_vectors as u64)
                .checked_mul(num_bytes_pvp as u64)
                .and_then(|n| pvp_offset.checked_add(n))
                .ok_or_else(|| offset_overflow("PVP", i))?;
        }

        let mut support_arrays = Vec::with_capacity(metadata.support_arrays.len());
        let mut support_offset = 0u64;

        for (i, s) in metadata.support_arrays.iter().enumerate() {
            support_arrays.push(SupportLayout {
                identifier: s.identifier.clone(),
                array_byte_offset: support_offset,
            });
            support_offset = support_offset
                .checked_add(s.size_bytes() as u64)
                .ok_or_else(|| offset_overflow("support", i))?;
        }

        Ok(DataLayout {
            num_bytes_pvp,
            channels,
            support_arrays,
        })
    }

    /// Размер сигнального массива канала в файле.
    pub fn signal_size(
        &self,
        metadata: &Metadata,
        channel: usize,
    ) -> CphdResult<u64> {
        let layout = self.channel(channel)?;

        match layout.compressed_signal_size {
            Some(size) => Ok(size),
            None => metadata.signal_bytes(channel),
        }
    }

    /// Размер сигнального блока.
    pub fn signal_block_size(
        &self,
        metadata: &Metadata,
    ) -> CphdResult<u64> {
        let mut total = 0u64;
        for ch in 0..self.channels.len() {
            total = total
                .checked_add(self.signal_size(metadata, ch)?)
                .ok_or_else(|| offset_overflow("signal", ch))?;
        }
        Ok(total)
    }

    pub fn channel(
        &self,
        channel: usize,
    ) -> CphdResult<&ChannelLayout> {
        self.channels
            .get(channel)
            .ok_or_else(|| CphdError::config(format!("Channel {channel} out of range")))
    }

    /// Сравнивает раскладку, прочитанную из файла, с вычисленной по метаданным.
    pub fn verify(
        &self,
        metadata: &Metadata,
    ) -> CphdResult<()> {
        let sizes: Option<Vec<u64>> = metadata
            .compression
            .is_compressed()
            .then(|| {
                self.channels
                    .iter()
                    .map(|c| c.compressed_signal_size.unwrap_or(0))
                    .collect()
            });

        let expected = Self::compute(metadata, sizes.as_deref())?;

        if expected != *self {
            return Err(CphdError::schema(
                "Array byte offsets disagree with declared dimensions",
            ));
        }

        Ok(())
    }
}

fn offset_overflow(
    block: &str,
    index: usize,
) -> CphdError {
    CphdError::schema(format!("{block} array {index} offset overflows"))
}

impl MetadataDocument {
    pub fn to_json(&self) -> CphdResult<Vec<u8>> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| CphdError::format(format!("Metadata serialization failed: {e}")))
    }

    pub fn from_json(bytes: &[u8]) -> CphdResult<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| CphdError::format(format!("Malformed metadata block: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use cphd_types::{Compression, SignalFormat};

    use super::*;
    use crate::metadata::{ChannelDescriptor, SupportArrayDescriptor};

    fn metadata() -> Metadata {
        let mut m = Metadata::new(
            SignalFormat::Ci4,
            vec![
                ChannelDescriptor::new("A", 10, 100),
                ChannelDescriptor::new("B", 5, 50),
            ],
        );
        m.support_arrays
            .push(SupportArrayDescriptor::new("S0", 3, 3, 4, "F4"));
        m.support_arrays
            .push(SupportArrayDescriptor::new("S1", 2, 2, 8, "F8"));
        m
    }

    #[test]
    fn test_uncompressed_offsets() {
        let m = metadata();
        let layout = DataLayout::compute(&m, None).unwrap();

        assert_eq!(layout.channels[0].signal_array_byte_offset, 0);
        assert_eq!(layout.channels[1].signal_array_byte_offset, 10 * 100 * 4);
        assert_eq!(
            layout.channels[1].pvp_array_byte_offset,
            10 * m.pvp.num_bytes_pvp() as u64
        );
        assert_eq!(layout.support_arrays[1].array_byte_offset, 36);
        assert_eq!(layout.signal_block_size(&m).unwrap(), 4000 + 1000);
        layout.verify(&m).unwrap();
    }

    #[test]
    fn test_compressed_offsets() {
        let mut m = metadata();
        m.compression = Compression::Lz4;

        assert!(DataLayout::compute(&m, None).is_err());
        assert!(DataLayout::compute(&m, Some(&[1])).is_err());

        let layout = DataLayout::compute(&m, Some(&[700, 300])).unwrap();

        assert_eq!(layout.channels[1].signal_array_byte_offset, 700);
        assert_eq!(layout.signal_size(&m, 1).unwrap(), 300);
        assert_eq!(layout.signal_block_size(&m).unwrap(), 1000);
        layout.verify(&m).unwrap();
    }

    #[test]
    fn test_compressed_sizes_overflow() {
        let mut m = metadata();
        m.compression = Compression::Lz4;

        let err = DataLayout::compute(&m, Some(&[u64::MAX, 1])).unwrap_err();
        assert!(matches!(err, CphdError::SchemaMismatch(_)));
        assert!(err.to_string().contains("overflows"));
    }

    #[test]
    fn test_verify_detects_tampering() {
        let m = metadata();
        let mut layout = DataLayout::compute(&m, None).unwrap();
        layout.channels[1].signal_array_byte_offset += 8;

        assert!(matches!(
            layout.verify(&m),
            Err(CphdError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_document_json() {
        let m = metadata();
        let doc = MetadataDocument {
            data: DataLayout::compute(&m, None).unwrap(),
            metadata: m,
        };

        let json = doc.to_json().unwrap();
        assert_eq!(MetadataDocument::from_json(&json).unwrap(), doc);
        assert!(MetadataDocument::from_json(b"{not json").unwrap_err().is_format_error());
    }
}
