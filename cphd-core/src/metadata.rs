//! Модель метаданных CPHD.
//!
//! Метаданные описывают каналы, формат выборок, раскладку PVP и опорные
//! массивы. Они неизменяемы на время вызова писателя и полностью
//! определяют байтовую раскладку файла (кроме размеров сжатых каналов).

use std::collections::HashSet;

use cphd_types::{Compression, CphdError, CphdResult, PvpFormat, SignalFormat, PVP_WORD_SIZE};
use serde::{Deserialize, Serialize};

use crate::format::{FileHeader, CPHD_MAX_HEADER_SIZE};

/// Классификация по умолчанию
pub const DEFAULT_CLASSIFICATION: &str = "UNCLASSIFIED";

/// Ограничения распространения по умолчанию
pub const DEFAULT_RELEASE_INFO: &str = "UNRESTRICTED";

/// Общая информация о сборе данных (CollectionID).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub core_name: String,
    pub collector_name: String,
    pub radar_mode: String,
}

/// Описание одного канала.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDescriptor {
    pub identifier: String,
    /// Количество векторов (импульсов)
    pub num_vectors: usize,
    /// Количество выборок в векторе
    pub num_samples: usize,
    /// Идентификатор связанного опорного массива
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub support_array: Option<String>,
}

/// Описание опорного массива (например, диаграммы антенны).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportArrayDescriptor {
    pub identifier: String,
    pub num_rows: usize,
    pub num_cols: usize,
    pub bytes_per_element: usize,
    /// Формат элемента, например `F4` или `Gain=F4;Phase=F4;`
    pub element_format: String,
}

/// Один PVP параметр: имя, смещение в словах и формат.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PvpParam {
    pub name: String,
    /// Смещение в 8-байтовых словах от начала записи вектора
    pub offset: usize,
    pub format: PvpFormat,
}

/// Раскладка PVP записи: упорядоченный набор параметров.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PvpLayout {
    params: Vec<PvpParam>,
}

/// Метаданные файла CPHD.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub collection: CollectionInfo,
    pub classification: String,
    pub release_info: String,
    /// Формат выборок всех каналов
    pub signal_format: SignalFormat,
    /// Сжатие сигнального блока
    #[serde(default)]
    pub compression: Compression,
    pub channels: Vec<ChannelDescriptor>,
    pub pvp: PvpLayout,
    #[serde(default)]
    pub support_arrays: Vec<SupportArrayDescriptor>,
}

/// Обязательные PVP параметры CPHD 1.0 в порядке их раскладки.
const REQUIRED_PVP: [(&str, PvpFormat); 17] = [
    ("TxTime", PvpFormat::F8),
    ("TxPos", PvpFormat::Xyz),
    ("TxVel", PvpFormat::Xyz),
    ("RcvTime", PvpFormat::F8),
    ("RcvPos", PvpFormat::Xyz),
    ("RcvVel", PvpFormat::Xyz),
    ("SRPPos", PvpFormat::Xyz),
    ("aFDOP", PvpFormat::F8),
    ("aFRR1", PvpFormat::F8),
    ("aFRR2", PvpFormat::F8),
    ("FX1", PvpFormat::F8),
    ("FX2", PvpFormat::F8),
    ("TOA1", PvpFormat::F8),
    ("TOA2", PvpFormat::F8),
    ("TDTropoSRP", PvpFormat::F8),
    ("SC0", PvpFormat::F8),
    ("SCSS", PvpFormat::F8),
];

/// Необязательные стандартные параметры и их форматы.
pub const OPTIONAL_PVP: [(&str, PvpFormat); 7] = [
    ("AmpSF", PvpFormat::F8),
    ("FXN1", PvpFormat::F8),
    ("FXN2", PvpFormat::F8),
    ("TOAE1", PvpFormat::F8),
    ("TOAE2", PvpFormat::F8),
    ("TDIonoSRP", PvpFormat::F8),
    ("SIGNAL", PvpFormat::I8),
];

impl Default for CollectionInfo {
    fn default() -> Self {
        Self {
            core_name: String::new(),
            collector_name: String::new(),
            radar_mode: "SPOTLIGHT".to_string(),
        }
    }
}

impl ChannelDescriptor {
    pub fn new(
        identifier: &str,
        num_vectors: usize,
        num_samples: usize,
    ) -> Self {
        Self {
            identifier: identifier.to_string(),
            num_vectors,
            num_samples,
            support_array: None,
        }
    }

    /// Связывает канал с опорным массивом.
    pub fn with_support_array(
        mut self,
        identifier: &str,
    ) -> Self {
        self.support_array = Some(identifier.to_string());
        self
    }
}

impl SupportArrayDescriptor {
    pub fn new(
        identifier: &str,
        num_rows: usize,
        num_cols: usize,
        bytes_per_element: usize,
        element_format: &str,
    ) -> Self {
        Self {
            identifier: identifier.to_string(),
            num_rows,
            num_cols,
            bytes_per_element,
            element_format: element_format.to_string(),
        }
    }

    /// Размер массива в байтах (насыщается при переполнении).
    pub fn size_bytes(&self) -> usize {
        self.checked_size().unwrap_or(usize::MAX)
    }

    fn checked_size(&self) -> Option<usize> {
        self.num_rows
            .checked_mul(self.num_cols)?
            .checked_mul(self.bytes_per_element)
    }
}

impl PvpParam {
    /// Размер параметра в словах
    pub fn size(&self) -> usize {
        self.format.size_words()
    }

    /// Смещение параметра в байтах
    pub fn byte_offset(&self) -> usize {
        self.offset * PVP_WORD_SIZE
    }
}

impl PvpLayout {
    /// Пустая раскладка.
    pub fn new() -> Self {
        Self::default()
    }

    /// Обязательный набор параметров CPHD 1.0, упакованный без пропусков.
    pub fn standard() -> Self {
        let mut layout = Self::new();
        for (name, format) in REQUIRED_PVP {
            layout.params.push(PvpParam {
                name: name.to_string(),
                offset: layout.next_offset(),
                format,
            });
        }
        layout
    }

    /// Добавляет параметр сразу за последним (AddedPVP или необязательный).
    pub fn push(
        &mut self,
        name: &str,
        format: PvpFormat,
    ) -> CphdResult<()> {
        let offset = self.next_offset();
        self.insert_at(name, offset, format)
    }

    /// Добавляет параметр с явным смещением в словах.
    pub fn insert_at(
        &mut self,
        name: &str,
        offset: usize,
        format: PvpFormat,
    ) -> CphdResult<()> {
        if self.get(name).is_some() {
            return Err(CphdError::schema(format!("Duplicate PVP parameter '{name}'")));
        }

        self.params.push(PvpParam {
            name: name.to_string(),
            offset,
            format,
        });

        Ok(())
    }

    pub fn params(&self) -> &[PvpParam] {
        &self.params
    }

    pub fn get(
        &self,
        name: &str,
    ) -> Option<&PvpParam> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.params.iter().map(|p| p.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Размер записи одного вектора в байтах (`NumBytesPVP`).
    pub fn num_bytes_pvp(&self) -> usize {
        self.next_offset().saturating_mul(PVP_WORD_SIZE)
    }

    fn next_offset(&self) -> usize {
        self.params
            .iter()
            .map(|p| p.offset.saturating_add(p.size()))
            .max()
            .unwrap_or(0)
    }

    /// Проверяет уникальность имён и отсутствие перекрытий.
    pub fn validate(&self) -> CphdResult<()> {
        if self.params.is_empty() {
            return Err(CphdError::schema("PVP layout has no parameters"));
        }

        let mut seen = HashSet::new();
        for p in &self.params {
            if p.name.is_empty() {
                return Err(CphdError::schema("PVP parameter with empty name"));
            }
            if !seen.insert(p.name.as_str()) {
                return Err(CphdError::schema(format!(
                    "Duplicate PVP parameter '{}'",
                    p.name
                )));
            }
        }

        let mut sorted: Vec<&PvpParam> = self.params.iter().collect();
        sorted.sort_by_key(|p| p.offset);

        for w in sorted.windows(2) {
            if w[0].offset.saturating_add(w[0].size()) > w[1].offset {
                return Err(CphdError::schema(format!(
                    "PVP parameters '{}' and '{}' overlap",
                    w[0].name, w[1].name
                )));
            }
        }

        Ok(())
    }
}

impl Metadata {
    /// Метаданные со стандартной раскладкой PVP и без опорных массивов.
    pub fn new(
        signal_format: SignalFormat,
        channels: Vec<ChannelDescriptor>,
    ) -> Self {
        Self {
            collection: CollectionInfo::default(),
            classification: DEFAULT_CLASSIFICATION.to_string(),
            release_info: DEFAULT_RELEASE_INFO.to_string(),
            signal_format,
            compression: Compression::None,
            channels,
            pvp: PvpLayout::standard(),
            support_arrays: Vec::new(),
        }
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Описание канала `channel`.
    pub fn channel(
        &self,
        channel: usize,
    ) -> CphdResult<&ChannelDescriptor> {
        self.channels.get(channel).ok_or_else(|| {
            CphdError::config(format!(
                "Channel {channel} out of range (file has {} channels)",
                self.channels.len()
            ))
        })
    }

    pub fn num_vectors(
        &self,
        channel: usize,
    ) -> CphdResult<usize> {
        Ok(self.channel(channel)?.num_vectors)
    }

    pub fn num_samples(
        &self,
        channel: usize,
    ) -> CphdResult<usize> {
        Ok(self.channel(channel)?.num_samples)
    }

    /// Формат выборок канала (единый для файла).
    pub fn sample_format(
        &self,
        channel: usize,
    ) -> CphdResult<SignalFormat> {
        self.channel(channel).map(|_| self.signal_format)
    }

    /// Сжат ли сигнальный массив канала (единое значение для файла).
    pub fn is_compressed(
        &self,
        channel: usize,
    ) -> CphdResult<bool> {
        self.channel(channel).map(|_| self.compression.is_compressed())
    }

    pub fn has_support_array(
        &self,
        channel: usize,
    ) -> bool {
        self.channels
            .get(channel)
            .is_some_and(|c| c.support_array.is_some())
    }

    /// Индекс и описание опорного массива по идентификатору.
    pub fn support_array(
        &self,
        identifier: &str,
    ) -> Option<(usize, &SupportArrayDescriptor)> {
        self.support_arrays
            .iter()
            .enumerate()
            .find(|(_, s)| s.identifier == identifier)
    }

    /// Размер одного вектора канала в байтах (без сжатия).
    pub fn vector_bytes(
        &self,
        channel: usize,
    ) -> CphdResult<usize> {
        self.channel(channel)?
            .num_samples
            .checked_mul(self.signal_format.sample_size())
            .ok_or_else(|| size_overflow(&format!("channel {channel} vector")))
    }

    /// Размер несжатого сигнального массива канала.
    pub fn signal_bytes(
        &self,
        channel: usize,
    ) -> CphdResult<u64> {
        let c = self.channel(channel)?;
        (c.num_vectors as u64)
            .checked_mul(c.num_samples as u64)
            .and_then(|n| n.checked_mul(self.signal_format.sample_size() as u64))
            .ok_or_else(|| size_overflow(&format!("channel {channel} signal array")))
    }

    pub fn total_vectors(&self) -> u64 {
        self.channels
            .iter()
            .fold(0u64, |acc, c| acc.saturating_add(c.num_vectors as u64))
    }

    /// Размер блока PVP в байтах.
    pub fn pvp_block_size(&self) -> u64 {
        self.total_vectors()
            .saturating_mul(self.pvp.num_bytes_pvp() as u64)
    }

    /// Размер блока опорных массивов в байтах.
    pub fn support_block_size(&self) -> u64 {
        self.support_arrays
            .iter()
            .fold(0u64, |acc, s| acc.saturating_add(s.size_bytes() as u64))
    }

    /// Проверяет самосогласованность метаданных.
    pub fn validate(&self) -> CphdResult<()> {
        if self.channels.is_empty() {
            return Err(CphdError::schema("Metadata declares no channels"));
        }

        let mut ids = HashSet::new();
        for (i, c) in self.channels.iter().enumerate() {
            if !ids.insert(c.identifier.as_str()) {
                return Err(CphdError::schema(format!(
                    "Duplicate channel identifier '{}'",
                    c.identifier
                )));
            }
            if c.num_vectors == 0 || c.num_samples == 0 {
                return Err(CphdError::schema(format!(
                    "Channel {i} ('{}') has zero dimensions: {}×{}",
                    c.identifier, c.num_vectors, c.num_samples
                )));
            }
            if let Some(sa) = &c.support_array {
                if self.support_array(sa).is_none() {
                    return Err(CphdError::schema(format!(
                        "Channel {i} references unknown support array '{sa}'"
                    )));
                }
            }
        }

        let mut support_ids = HashSet::new();
        for s in &self.support_arrays {
            if !support_ids.insert(s.identifier.as_str()) {
                return Err(CphdError::schema(format!(
                    "Duplicate support array identifier '{}'",
                    s.identifier
                )));
            }
            if s.size_bytes() == 0 {
                return Err(CphdError::schema(format!(
                    "Support array '{}' is empty",
                    s.identifier
                )));
            }
        }

        self.check_header_text()?;
        self.pvp.validate()?;
        self.check_sizes()
    }

    /// Строки заголовка: непустые, без управляющих символов, и заголовок
    /// с максимальными смещениями помещается в [`CPHD_MAX_HEADER_SIZE`].
    fn check_header_text(&self) -> CphdResult<()> {
        for (key, value) in [
            ("Classification", &self.classification),
            ("Release info", &self.release_info),
        ] {
            if value.is_empty() {
                return Err(CphdError::schema(format!("{key} must not be empty")));
            }
            if value.chars().any(char::is_control) {
                return Err(CphdError::schema(format!(
                    "{key} contains control characters: {value:?}"
                )));
            }
        }

        let mut worst = FileHeader::new(&self.classification, &self.release_info);
        worst.metadata_block_size = u64::MAX;
        worst.metadata_block_byte_offset = u64::MAX;
        worst.support_block_size = u64::MAX;
        worst.support_block_byte_offset = u64::MAX;
        worst.pvp_block_size = u64::MAX;
        worst.pvp_block_byte_offset = u64::MAX;
        worst.signal_block_size = u64::MAX;
        worst.signal_block_byte_offset = u64::MAX;

        if worst.size() > CPHD_MAX_HEADER_SIZE {
            return Err(CphdError::schema(format!(
                "Classification and release info do not fit the {CPHD_MAX_HEADER_SIZE}-byte header"
            )));
        }

        Ok(())
    }

    /// Размеры всех блоков и их сумма должны помещаться в u64.
    fn check_sizes(&self) -> CphdResult<()> {
        let mut signal = 0u64;
        for ch in 0..self.channels.len() {
            self.vector_bytes(ch)?;
            signal = signal
                .checked_add(self.signal_bytes(ch)?)
                .ok_or_else(|| size_overflow("signal block"))?;
        }

        let num_bytes_pvp = self
            .pvp
            .next_offset()
            .checked_mul(PVP_WORD_SIZE)
            .ok_or_else(|| size_overflow("PVP record"))?;
        let pvp = self
            .channels
            .iter()
            .try_fold(0u64, |acc, c| {
                (c.num_vectors as u64)
                    .checked_mul(num_bytes_pvp as u64)
                    .and_then(|n| acc.checked_add(n))
            })
            .ok_or_else(|| size_overflow("PVP block"))?;

        let mut support = 0u64;
        for s in &self.support_arrays {
            let size = s
                .checked_size()
                .ok_or_else(|| size_overflow(&format!("support array '{}'", s.identifier)))?;
            support = support
                .checked_add(size as u64)
                .ok_or_else(|| size_overflow("support block"))?;
        }

        signal
            .checked_add(pvp)
            .and_then(|n| n.checked_add(support))
            .and_then(|n| n.checked_add(CPHD_MAX_HEADER_SIZE as u64))
            .ok_or_else(|| size_overflow("file"))?;

        Ok(())
    }
}

fn size_overflow(what: &str) -> CphdError {
    CphdError::schema(format!("Declared {what} size overflows"))
}
