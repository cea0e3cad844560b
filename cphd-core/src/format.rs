//! Спецификация контейнера CPHD версии 1.0
//!
//! Файл начинается с текстового заголовка `KEY := VALUE`, за которым следуют
//! блок метаданных, блок опорных массивов (если есть), блок PVP и сигнальный
//! блок. Все многобайтовые числа в бинарных блоках хранятся в порядке
//! big-endian.
//!
//! ```text
//! CPHD/1.0\n
//! METADATA_BLOCK_SIZE := 1234\n
//! ...
//! \f\n                    : конец заголовка
//! <metadata JSON>\f\n
//! <support> <pvp> <signal>
//! ```

use cphd_types::{CphdError, CphdResult};
use crc32fast::Hasher;

/// Тип файла в первой строке заголовка
pub const CPHD_FILE_TYPE: &str = "CPHD";

/// Текущая версия формата
pub const CPHD_VERSION: &str = "1.0";

/// Разделитель ключа и значения в заголовке
pub const KVP_DELIMITER: &str = " := ";

/// Признак конца строки заголовка
pub const LINE_TERMINATOR: u8 = b'\n';

/// Признак конца секции (form feed)
pub const SECTION_TERMINATOR: u8 = 0x0C;

/// Терминатор секции вместе с переводом строки, 2 байта
pub const SECTION_END: [u8; 2] = [SECTION_TERMINATOR, LINE_TERMINATOR];

/// Максимальный размер текстового заголовка
pub const CPHD_MAX_HEADER_SIZE: usize = 4096;

/// Размер заголовка сжатого кадра: content_size + vector_count + first_vector
pub const SIGNAL_FRAME_HEADER_SIZE: usize = 16;

/// Служебные байты кадра: заголовок + CRC32
pub const SIGNAL_FRAME_OVERHEAD: usize = SIGNAL_FRAME_HEADER_SIZE + 4;

/// Целевой размер несжатых данных в одном кадре (1 МБ)
pub const DEFAULT_FRAME_BYTES: usize = 1024 * 1024;

/// Заголовок файла CPHD: размеры и смещения блоков.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub version: String,
    pub metadata_block_size: u64,
    pub metadata_block_byte_offset: u64,
    /// CRC32 блока метаданных (без терминатора)
    pub metadata_crc32: u32,
    pub support_block_size: u64,
    pub support_block_byte_offset: u64,
    pub pvp_block_size: u64,
    pub pvp_block_byte_offset: u64,
    pub signal_block_size: u64,
    pub signal_block_byte_offset: u64,
    pub classification: String,
    pub release_info: String,
}

/// Заголовок сжатого кадра сигнального блока
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Размер содержимого: vector_count + first_vector + payload
    pub content_size: usize,
    /// Количество векторов в кадре
    pub vector_count: u32,
    /// Индекс первого вектора кадра внутри канала
    pub first_vector: u64,
}

/// Кадр сжатых выборок, заимствованный из буфера чтения.
#[derive(Debug, Clone, Copy)]
pub struct SignalFrame<'a> {
    pub first_vector: u64,
    pub vector_count: u32,
    /// LZ4 payload с префиксом размера
    pub payload: &'a [u8],
}

/// Блок векторов канала (переменный размер).
///
/// Формат (big-endian):
/// ```text
/// [0..4]   CONTENT_SIZE  u32
/// [4..8]   VECTOR_COUNT  u32
/// [8..16]  FIRST_VECTOR  u64
/// [16..]   DATA          [u8] : LZ4 с префиксом размера
/// [..+4]   CRC32         u32  : покрывает [4 .. 4 + CONTENT_SIZE)
/// ```
#[derive(Debug, Clone)]
pub struct SignalBlock {
    pub first_vector: u64,
    pub vector_count: u32,
    pub data: Vec<u8>,
    /// Флаг: данные в `data` находятся в сжатом виде
    pub is_compressed: bool,
}

impl FileHeader {
    /// Создаёт заголовок без размеров блоков.
    pub fn new(
        classification: &str,
        release_info: &str,
    ) -> Self {
        FileHeader {
            version: CPHD_VERSION.to_string(),
            metadata_block_size: 0,
            metadata_block_byte_offset: 0,
            metadata_crc32: 0,
            support_block_size: 0,
            support_block_byte_offset: 0,
            pvp_block_size: 0,
            pvp_block_byte_offset: 0,
            signal_block_size: 0,
            signal_block_byte_offset: 0,
            classification: classification.to_string(),
            release_info: release_info.to_string(),
        }
    }

    /// Задаёт размеры блоков и вычисляет смещения.
    ///
    /// Длина заголовка зависит от количества цифр в смещениях, поэтому
    /// пересчитываем до тех пор, пока размер не стабилизируется.
    /// Возвращает итоговый размер заголовка вместе с терминатором.
    pub fn set_sizes(
        &mut self,
        metadata_size: u64,
        support_size: u64,
        pvp_size: u64,
        signal_size: u64,
    ) -> usize {
        self.metadata_block_size = metadata_size;
        self.support_block_size = support_size;
        self.pvp_block_size = pvp_size;
        self.signal_block_size = signal_size;

        loop {
            let initial = self.size();

            self.metadata_block_byte_offset = initial as u64;
            let after_metadata =
                self.metadata_block_byte_offset + self.metadata_block_size + SECTION_END.len() as u64;

            if self.support_block_size > 0 {
                self.support_block_byte_offset = after_metadata;
                self.pvp_block_byte_offset = after_metadata + self.support_block_size;
            } else {
                self.support_block_byte_offset = 0;
                self.pvp_block_byte_offset = after_metadata;
            }

            self.signal_block_byte_offset = self.pvp_block_byte_offset + self.pvp_block_size;

            if self.size() == initial {
                return initial;
            }
        }
    }

    /// Полный размер файла, описанного заголовком.
    pub fn file_size(&self) -> u64 {
        self.signal_block_byte_offset
            .saturating_add(self.signal_block_size)
    }

    /// Размер сериализованного заголовка вместе с терминатором секции.
    pub fn size(&self) -> usize {
        self.serialize().len()
    }

    /// Сериализация заголовка в текст `KEY := VALUE`
    pub fn serialize(&self) -> Vec<u8> {
        let mut s = format!("{CPHD_FILE_TYPE}/{}\n", self.version);

        let mut kvp = |key: &str, value: &dyn std::fmt::Display| {
            s.push_str(&format!("{key}{KVP_DELIMITER}{value}\n"));
        };

        kvp("METADATA_BLOCK_SIZE", &self.metadata_block_size);
        kvp("METADATA_BLOCK_BYTE_OFFSET", &self.metadata_block_byte_offset);
        kvp("METADATA_CRC32", &format!("{:08x}", self.metadata_crc32));

        // Блок опорных массивов необязателен
        if self.support_block_size > 0 {
            kvp("SUPPORT_BLOCK_SIZE", &self.support_block_size);
            kvp("SUPPORT_BLOCK_BYTE_OFFSET", &self.support_block_byte_offset);
        }

        kvp("PVP_BLOCK_SIZE", &self.pvp_block_size);
        kvp("PVP_BLOCK_BYTE_OFFSET", &self.pvp_block_byte_offset);
        kvp("SIGNAL_BLOCK_SIZE", &self.signal_block_size);
        kvp("SIGNAL_BLOCK_BYTE_OFFSET", &self.signal_block_byte_offset);
        kvp("CLASSIFICATION", &self.classification);
        kvp("RELEASE_INFO", &self.release_info);

        let mut buf = s.into_bytes();
        buf.extend_from_slice(&SECTION_END);
        buf
    }

    /// Десериализация заголовка из начала файла.
    ///
    /// Возвращает заголовок и количество байт, занятых им вместе с
    /// терминатором.
    pub fn deserialize(buf: &[u8]) -> CphdResult<(Self, usize)> {
        if !is_cphd(buf) {
            return Err(CphdError::format("Not a CPHD file"));
        }

        let end = buf
            .windows(SECTION_END.len())
            .position(|w| w == SECTION_END)
            .ok_or_else(|| CphdError::format("Header section terminator not found"))?;

        let text = std::str::from_utf8(&buf[..end])
            .map_err(|e| CphdError::format(format!("Header is not valid UTF-8: {e}")))?;

        let mut lines = text.split('\n').filter(|l| !l.is_empty());

        // Первая строка: CPHD/<version>
        let first = lines.next().unwrap_or_default();
        let version = first
            .strip_prefix(CPHD_FILE_TYPE)
            .and_then(|v| v.strip_prefix('/'))
            .ok_or_else(|| CphdError::format(format!("Invalid file type line: '{first}'")))?;

        if version != CPHD_VERSION {
            return Err(CphdError::UnsupportedVersion {
                found: version.to_string(),
                expected: CPHD_VERSION,
            });
        }

        let mut header = FileHeader::new("", "");
        let mut crc_seen = false;

        for line in lines {
            let (key, value) = line
                .split_once(KVP_DELIMITER)
                .ok_or_else(|| CphdError::format(format!("Malformed header line: '{line}'")))?;

            match key {
                "METADATA_BLOCK_SIZE" => header.metadata_block_size = parse_u64(key, value)?,
                "METADATA_BLOCK_BYTE_OFFSET" => {
                    header.metadata_block_byte_offset = parse_u64(key, value)?
                }
                "METADATA_CRC32" => {
                    header.metadata_crc32 = u32::from_str_radix(value, 16).map_err(|e| {
                        CphdError::format(format!("Invalid METADATA_CRC32 '{value}': {e}"))
                    })?;
                    crc_seen = true;
                }
                "SUPPORT_BLOCK_SIZE" => header.support_block_size = parse_u64(key, value)?,
                "SUPPORT_BLOCK_BYTE_OFFSET" => {
                    header.support_block_byte_offset = parse_u64(key, value)?
                }
                "PVP_BLOCK_SIZE" => header.pvp_block_size = parse_u64(key, value)?,
                "PVP_BLOCK_BYTE_OFFSET" => header.pvp_block_byte_offset = parse_u64(key, value)?,
                "SIGNAL_BLOCK_SIZE" => header.signal_block_size = parse_u64(key, value)?,
                "SIGNAL_BLOCK_BYTE_OFFSET" => {
                    header.signal_block_byte_offset = parse_u64(key, value)?
                }
                "CLASSIFICATION" => header.classification = value.to_string(),
                "RELEASE_INFO" => header.release_info = value.to_string(),
                _ => {
                    return Err(CphdError::format(format!(
                        "Invalid CPHD header entry '{key}'"
                    )))
                }
            }
        }

        // Обязательные поля
        if header.metadata_block_size == 0
            || header.metadata_block_byte_offset == 0
            || !crc_seen
            || header.pvp_block_size == 0
            || header.pvp_block_byte_offset == 0
            || header.signal_block_size == 0
            || header.signal_block_byte_offset == 0
            || header.classification.is_empty()
            || header.release_info.is_empty()
        {
            return Err(CphdError::format("CPHD header information is incomplete"));
        }

        Ok((header, end + SECTION_END.len()))
    }

    /// Проверяет, что блоки не перекрываются и помещаются в файл длиной
    /// `file_len`.
    pub fn validate_extents(
        &self,
        header_len: usize,
        file_len: u64,
    ) -> CphdResult<()> {
        if self.metadata_block_byte_offset < header_len as u64 {
            return Err(CphdError::format(format!(
                "Metadata block at {} overlaps the {header_len}-byte header",
                self.metadata_block_byte_offset
            )));
        }

        let metadata_end = block_end(
            "metadata",
            self.metadata_block_byte_offset,
            self.metadata_block_size.saturating_add(SECTION_END.len() as u64),
        )?;

        let mut blocks = vec![
            ("PVP", self.pvp_block_byte_offset, self.pvp_block_size),
            ("signal", self.signal_block_byte_offset, self.signal_block_size),
        ];
        if self.support_block_size > 0 {
            blocks.insert(
                0,
                ("support", self.support_block_byte_offset, self.support_block_size),
            );
        }

        let mut prev_end = metadata_end;
        for (name, offset, size) in blocks {
            if offset < prev_end {
                return Err(CphdError::format(format!(
                    "{name} block at {offset} overlaps the previous block ending at {prev_end}"
                )));
            }
            prev_end = block_end(name, offset, size)?;
        }

        if prev_end > file_len {
            return Err(CphdError::format(format!(
                "File is truncated: header describes {prev_end} bytes, file has {file_len}"
            )));
        }

        Ok(())
    }
}

/// Конец блока `offset + size`; переполнение означает повреждённый заголовок.
fn block_end(
    name: &str,
    offset: u64,
    size: u64,
) -> CphdResult<u64> {
    offset.checked_add(size).ok_or_else(|| {
        CphdError::format(format!(
            "{name} block at {offset} with size {size} exceeds the addressable range"
        ))
    })
}

/// Проверяет первую строку: `CPHD/`.
pub fn is_cphd(buf: &[u8]) -> bool {
    buf.len() > CPHD_FILE_TYPE.len()
        && &buf[..CPHD_FILE_TYPE.len()] == CPHD_FILE_TYPE.as_bytes()
        && buf[CPHD_FILE_TYPE.len()] == b'/'
}

fn parse_u64(
    key: &str,
    value: &str,
) -> CphdResult<u64> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|e| CphdError::format(format!("Invalid value for {key}: '{value}': {e}")))
}

impl FrameHeader {
    /// Разбирает 16 байт заголовка кадра.
    pub fn parse(buf: &[u8]) -> CphdResult<Self> {
        if buf.len() < SIGNAL_FRAME_HEADER_SIZE {
            return Err(CphdError::format("Frame header too small"));
        }

        let content_size = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        let vector_count = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let first_vector = u64::from_be_bytes([
            buf[8], buf[9], buf[10], buf[11], buf[12], buf[13], buf[14], buf[15],
        ]);

        if content_size < SIGNAL_FRAME_HEADER_SIZE - 4 {
            return Err(CphdError::format(format!(
                "Invalid frame content_size: {content_size}"
            )));
        }

        Ok(FrameHeader {
            content_size,
            vector_count,
            first_vector,
        })
    }

    /// Полный размер кадра в файле (с полем размера и CRC).
    pub fn frame_len(&self) -> usize {
        4 + self.content_size + 4
    }
}

impl<'a> SignalFrame<'a> {
    /// Разбирает кадр из среза, проверяя CRC.
    ///
    /// Возвращает кадр и количество прочитанных байт.
    pub fn parse(buf: &'a [u8]) -> CphdResult<(Self, usize)> {
        let header = FrameHeader::parse(buf)?;
        let total = header.frame_len();

        if total > buf.len() {
            return Err(CphdError::format("Incomplete frame"));
        }

        let content = &buf[4..4 + header.content_size];
        let stored_crc = u32::from_be_bytes([
            buf[total - 4],
            buf[total - 3],
            buf[total - 2],
            buf[total - 1],
        ]);
        let calculated_crc = crc32_checksum(content);

        if stored_crc != calculated_crc {
            return Err(CphdError::CrcMismatch {
                expected: calculated_crc,
                found: stored_crc,
            });
        }

        Ok((
            SignalFrame {
                first_vector: header.first_vector,
                vector_count: header.vector_count,
                payload: &buf[SIGNAL_FRAME_HEADER_SIZE..total - 4],
            },
            total,
        ))
    }

    /// Распаковывает payload в `out`, длина которого должна совпадать с
    /// несжатым размером кадра.
    pub fn decompress_into(
        &self,
        out: &mut [u8],
    ) -> CphdResult<()> {
        if self.payload.len() < 4 {
            return Err(CphdError::format("LZ4 payload too small"));
        }

        let declared = u32::from_le_bytes([
            self.payload[0],
            self.payload[1],
            self.payload[2],
            self.payload[3],
        ]) as usize;

        if declared != out.len() {
            return Err(CphdError::format(format!(
                "LZ4 size prefix {declared} ≠ expected {}",
                out.len()
            )));
        }

        let written = lz4_flex::decompress_into(&self.payload[4..], out)
            .map_err(|e| CphdError::format(format!("LZ4 decompression failed: {e}")))?;

        if written != out.len() {
            return Err(CphdError::format(format!(
                "LZ4 produced {written} bytes, expected {}",
                out.len()
            )));
        }

        Ok(())
    }
}

impl SignalBlock {
    /// Создаёт блок с несжатыми векторами.
    pub fn new(
        first_vector: u64,
        vector_count: u32,
        data: Vec<u8>,
    ) -> Self {
        SignalBlock {
            first_vector,
            vector_count,
            data,
            is_compressed: false,
        }
    }

    /// Сжимает данные блока с помощью LZ4.
    pub fn compress(&mut self) {
        if self.is_compressed {
            return;
        }

        self.data = lz4_flex::compress_prepend_size(&self.data);
        self.is_compressed = true;
    }

    /// Сериализует блок в байты с CRC.
    pub fn serialize(&self) -> CphdResult<Vec<u8>> {
        let content_size = SIGNAL_FRAME_HEADER_SIZE - 4 + self.data.len();
        let content_size_u32 = u32::try_from(content_size)
            .map_err(|_| CphdError::format(format!("Frame too large: {content_size} bytes")))?;

        let mut buf = Vec::with_capacity(content_size + 8);

        buf.extend_from_slice(&content_size_u32.to_be_bytes());
        buf.extend_from_slice(&self.vector_count.to_be_bytes());
        buf.extend_from_slice(&self.first_vector.to_be_bytes());
        buf.extend_from_slice(&self.data);

        let crc = crc32_checksum(&buf[4..]); // CRC покрывает [4..end-4]
        buf.extend_from_slice(&crc.to_be_bytes());

        Ok(buf)
    }
}

/// CRC32 (IEEE 802.3 / crc32fast)
pub fn crc32_checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sized_header() -> FileHeader {
        let mut h = FileHeader::new("UNCLASSIFIED", "UNRESTRICTED");
        h.metadata_crc32 = 0xDEAD_BEEF;
        h.set_sizes(1_000, 256, 4_096, 65_536);
        h
    }

    #[test]
    fn test_header_round_trip() {
        let header = sized_header();
        let bytes = header.serialize();

        let (parsed, len) = FileHeader::deserialize(&bytes).unwrap();

        assert_eq!(parsed, header);
        assert_eq!(len, bytes.len());
        assert_eq!(parsed.metadata_crc32, 0xDEAD_BEEF);
    }

    #[test]
    fn test_offsets_follow_header() {
        let h = sized_header();
        let len = h.size() as u64;

        assert_eq!(h.metadata_block_byte_offset, len);
        assert_eq!(h.support_block_byte_offset, len + 1_000 + 2);
        assert_eq!(h.pvp_block_byte_offset, h.support_block_byte_offset + 256);
        assert_eq!(h.signal_block_byte_offset, h.pvp_block_byte_offset + 4_096);
        assert_eq!(h.file_size(), h.signal_block_byte_offset + 65_536);
    }

    #[test]
    fn test_no_support_block_omits_keys() {
        let mut h = FileHeader::new("UNCLASSIFIED", "UNRESTRICTED");
        h.set_sizes(10, 0, 64, 128);

        let text = String::from_utf8(h.serialize()).unwrap();

        assert!(!text.contains("SUPPORT_BLOCK_SIZE"));
        assert_eq!(h.pvp_block_byte_offset, h.metadata_block_byte_offset + 10 + 2);

        let (parsed, _) = FileHeader::deserialize(h.serialize().as_slice()).unwrap();
        assert_eq!(parsed.support_block_size, 0);
    }

    #[test]
    fn test_header_byte_layout() {
        let bytes = sized_header().serialize();

        assert_eq!(&bytes[0..9], b"CPHD/1.0\n", "file type line");
        assert_eq!(&bytes[bytes.len() - 2..], &SECTION_END, "terminator");
    }

    #[test]
    fn test_header_rejects_bad_magic() {
        let mut bytes = sized_header().serialize();
        bytes[0..4].copy_from_slice(b"XXXX");

        let err = FileHeader::deserialize(&bytes).unwrap_err();
        assert!(err.to_string().contains("Not a CPHD file"));
    }

    #[test]
    fn test_header_rejects_unknown_version() {
        let text = b"CPHD/0.3\nCLASSIFICATION := U\n\x0c\n";
        let err = FileHeader::deserialize(text).unwrap_err();

        assert!(matches!(err, CphdError::UnsupportedVersion { .. }));
    }

    #[test]
    fn test_header_rejects_unknown_key_and_incomplete() {
        let unknown = b"CPHD/1.0\nFOO := 1\n\x0c\n";
        assert!(FileHeader::deserialize(unknown).is_err());

        let incomplete = b"CPHD/1.0\nPVP_BLOCK_SIZE := 8\n\x0c\n";
        let err = FileHeader::deserialize(incomplete).unwrap_err();
        assert!(err.to_string().contains("incomplete"));
    }

    #[test]
    fn test_header_missing_terminator() {
        let mut bytes = sized_header().serialize();
        bytes.truncate(bytes.len() - 2);

        assert!(FileHeader::deserialize(&bytes).unwrap_err().is_format_error());
    }

    #[test]
    fn test_validate_extents_detects_truncation() {
        let h = sized_header();
        let len = h.size();

        h.validate_extents(len, h.file_size()).unwrap();

        let err = h.validate_extents(len, h.file_size() - 1).unwrap_err();
        assert!(err.to_string().contains("truncated"));
    }

    #[test]
    fn test_signal_block_round_trip() {
        let data = vec![7u8; 4_000];
        let mut block = SignalBlock::new(120, 50, data.clone());
        block.compress();

        let bytes = block.serialize().unwrap();
        let (frame, used) = SignalFrame::parse(&bytes).unwrap();

        assert_eq!(used, bytes.len());
        assert_eq!(frame.first_vector, 120);
        assert_eq!(frame.vector_count, 50);

        let mut out = vec![0u8; data.len()];
        frame.decompress_into(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_validate_extents_rejects_overflow() {
        let mut h = sized_header();
        let len = h.size();
        h.metadata_block_size = u64::MAX;

        let err = h.validate_extents(len, u64::MAX).unwrap_err();
        assert!(err.is_format_error());

        let mut h = sized_header();
        h.signal_block_size = u64::MAX;

        let err = h.validate_extents(len, u64::MAX).unwrap_err();
        assert!(err.to_string().contains("signal block"));
    }

    #[test]
    fn test_signal_frame_decompress_into() {
        let data: Vec<u8> = (0..1_024u32).map(|i| (i % 13) as u8).collect();
        let mut block = SignalBlock::new(0, 16, data.clone());
        block.compress();
        let bytes = block.serialize().unwrap();

        let (frame, _) = SignalFrame::parse(&bytes).unwrap();
        let mut out = vec![0u8; data.len()];
        frame.decompress_into(&mut out).unwrap();
        assert_eq!(out, data);

        // Неверный размер выходного буфера
        let mut short = vec![0u8; data.len() - 1];
        assert!(frame.decompress_into(&mut short).is_err());
    }

    #[test]
    fn test_signal_frame_corrupted_crc() {
        let mut block = SignalBlock::new(0, 4, vec![1u8; 64]);
        block.compress();
        let mut bytes = block.serialize().unwrap();
        bytes[SIGNAL_FRAME_HEADER_SIZE] ^= 0xFF;

        let err = SignalFrame::parse(&bytes).unwrap_err();
        assert!(matches!(err, CphdError::CrcMismatch { .. }));
    }

    #[test]
    fn test_compress_idempotent() {
        let mut block = SignalBlock::new(0, 10, vec![0u8; 1_000]);

        block.compress();
        let size1 = block.data.len();
        block.compress(); // no-op
        assert_eq!(block.data.len(), size1);
        assert!(block.is_compressed);
    }
}
