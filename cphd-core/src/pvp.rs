//! Блок PVP (Per-Vector Parameters).
//!
//! Внутри хранится по колонкам: для каждого канала отображение
//! `имя параметра → типизированная колонка` длиной `num_vectors`.
//! Построчное представление ([`PvpRecord`]) существует только на границе
//! API: [`PvpBlock::from_records`] и [`PvpBlock::to_records`].
//!
//! На диске канал хранится как `num_vectors` записей по `NumBytesPVP` байт,
//! каждый параметр по смещению `offset * 8`, big-endian.

use std::collections::{BTreeMap, BTreeSet};

use byteorder::{BigEndian, ByteOrder};
use cphd_types::{CphdError, CphdResult, PvpFormat};
use serde::Serialize;

use crate::metadata::{Metadata, PvpLayout};

/// Значение одного параметра одного вектора.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PvpValue {
    F64(f64),
    I64(i64),
    U64(u64),
    Xyz([f64; 3]),
    Str(String),
}

/// Строка таблицы PVP: значения всех параметров одного вектора.
pub type PvpRecord = BTreeMap<String, PvpValue>;

/// Типизированная колонка одного параметра.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PvpColumn {
    F64(Vec<f64>),
    I64(Vec<i64>),
    U64(Vec<u64>),
    Xyz(Vec<[f64; 3]>),
    Str(Vec<String>),
}

/// Колонки PVP одного канала.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PvpChannel {
    pub num_vectors: usize,
    pub columns: BTreeMap<String, PvpColumn>,
}

/// Блок PVP всего файла, разбитый по каналам.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PvpBlock {
    channels: Vec<PvpChannel>,
}

impl PvpValue {
    fn kind(&self) -> &'static str {
        match self {
            PvpValue::F64(_) => "F8",
            PvpValue::I64(_) => "I8",
            PvpValue::U64(_) => "U8",
            PvpValue::Xyz(_) => "XYZ",
            PvpValue::Str(_) => "S",
        }
    }
}

impl From<f64> for PvpValue {
    fn from(v: f64) -> Self {
        PvpValue::F64(v)
    }
}

impl From<i64> for PvpValue {
    fn from(v: i64) -> Self {
        PvpValue::I64(v)
    }
}

impl From<u64> for PvpValue {
    fn from(v: u64) -> Self {
        PvpValue::U64(v)
    }
}

impl From<[f64; 3]> for PvpValue {
    fn from(v: [f64; 3]) -> Self {
        PvpValue::Xyz(v)
    }
}

impl From<&str> for PvpValue {
    fn from(v: &str) -> Self {
        PvpValue::Str(v.to_string())
    }
}

impl PvpColumn {
    /// Колонка из `len` нулевых значений формата `format`.
    pub fn zeros(
        format: PvpFormat,
        len: usize,
    ) -> Self {
        match format {
            PvpFormat::F8 => PvpColumn::F64(vec![0.0; len]),
            PvpFormat::I8 => PvpColumn::I64(vec![0; len]),
            PvpFormat::U8 => PvpColumn::U64(vec![0; len]),
            PvpFormat::Xyz => PvpColumn::Xyz(vec![[0.0; 3]; len]),
            PvpFormat::Str(_) => PvpColumn::Str(vec![String::new(); len]),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            PvpColumn::F64(v) => v.len(),
            PvpColumn::I64(v) => v.len(),
            PvpColumn::U64(v) => v.len(),
            PvpColumn::Xyz(v) => v.len(),
            PvpColumn::Str(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(
        &self,
        index: usize,
    ) -> Option<PvpValue> {
        match self {
            PvpColumn::F64(v) => v.get(index).map(|x| PvpValue::F64(*x)),
            PvpColumn::I64(v) => v.get(index).map(|x| PvpValue::I64(*x)),
            PvpColumn::U64(v) => v.get(index).map(|x| PvpValue::U64(*x)),
            PvpColumn::Xyz(v) => v.get(index).map(|x| PvpValue::Xyz(*x)),
            PvpColumn::Str(v) => v.get(index).map(|x| PvpValue::Str(x.clone())),
        }
    }

    /// Записывает значение, проверяя совпадение вида.
    pub fn set(
        &mut self,
        index: usize,
        value: PvpValue,
    ) -> CphdResult<()> {
        let len = self.len();
        if index >= len {
            return Err(CphdError::schema(format!(
                "Vector index {index} out of range ({len} vectors)"
            )));
        }

        match (self, value) {
            (PvpColumn::F64(v), PvpValue::F64(x)) => v[index] = x,
            (PvpColumn::I64(v), PvpValue::I64(x)) => v[index] = x,
            (PvpColumn::U64(v), PvpValue::U64(x)) => v[index] = x,
            (PvpColumn::Xyz(v), PvpValue::Xyz(x)) => v[index] = x,
            (PvpColumn::Str(v), PvpValue::Str(x)) => v[index] = x,
            (column, value) => {
                return Err(CphdError::schema(format!(
                    "Value of kind {} does not fit column of kind {}",
                    value.kind(),
                    column.kind()
                )))
            }
        }

        Ok(())
    }

    fn kind(&self) -> &'static str {
        match self {
            PvpColumn::F64(_) => "F8",
            PvpColumn::I64(_) => "I8",
            PvpColumn::U64(_) => "U8",
            PvpColumn::Xyz(_) => "XYZ",
            PvpColumn::Str(_) => "S",
        }
    }

    /// Проверяет, что колонка представима в формате `format`.
    fn check_format(
        &self,
        name: &str,
        format: PvpFormat,
    ) -> CphdResult<()> {
        let fits = match (self, format) {
            (PvpColumn::F64(_), PvpFormat::F8)
            | (PvpColumn::I64(_), PvpFormat::I8)
            | (PvpColumn::U64(_), PvpFormat::U8)
            | (PvpColumn::Xyz(_), PvpFormat::Xyz) => true,
            (PvpColumn::Str(v), PvpFormat::Str(n)) => {
                if let Some(s) = v.iter().find(|s| s.len() > n) {
                    return Err(CphdError::schema(format!(
                        "PVP '{name}': string '{s}' exceeds {n} bytes"
                    )));
                }
                true
            }
            _ => false,
        };

        if !fits {
            return Err(CphdError::schema(format!(
                "PVP '{name}' declared as {format}, got values of kind {}",
                self.kind()
            )));
        }

        Ok(())
    }
}

impl PvpChannel {
    /// Колонки из нулей для всех параметров раскладки.
    pub fn zeros(
        layout: &PvpLayout,
        num_vectors: usize,
    ) -> Self {
        let columns = layout
            .params()
            .iter()
            .map(|p| (p.name.clone(), PvpColumn::zeros(p.format, num_vectors)))
            .collect();

        Self {
            num_vectors,
            columns,
        }
    }

    /// Упаковывает канал в формат диска.
    pub fn encode(
        &self,
        layout: &PvpLayout,
    ) -> CphdResult<Vec<u8>> {
        let stride = layout.num_bytes_pvp();
        let mut buf = vec![0u8; stride * self.num_vectors];

        for param in layout.params() {
            let column = self.columns.get(&param.name).ok_or_else(|| {
                CphdError::schema(format!("Missing PVP column '{}'", param.name))
            })?;
            column.check_format(&param.name, param.format)?;

            if column.len() != self.num_vectors {
                return Err(CphdError::schema(format!(
                    "PVP '{}' has {} values, expected {}",
                    param.name,
                    column.len(),
                    self.num_vectors
                )));
            }

            let base = param.byte_offset();

            for (v, record) in buf.chunks_exact_mut(stride).enumerate() {
                let field = &mut record[base..base + param.format.size_bytes()];

                match column {
                    PvpColumn::F64(c) => BigEndian::write_f64(field, c[v]),
                    PvpColumn::I64(c) => BigEndian::write_i64(field, c[v]),
                    PvpColumn::U64(c) => BigEndian::write_u64(field, c[v]),
                    PvpColumn::Xyz(c) => BigEndian::write_f64_into(&c[v], field),
                    PvpColumn::Str(c) => {
                        let bytes = c[v].as_bytes();
                        field[..bytes.len()].copy_from_slice(bytes);
                    }
                }
            }
        }

        Ok(buf)
    }

    /// Распаковывает канал из формата диска.
    pub fn decode(
        bytes: &[u8],
        layout: &PvpLayout,
        num_vectors: usize,
    ) -> CphdResult<Self> {
        let stride = layout.num_bytes_pvp();

        if bytes.len() != stride * num_vectors {
            return Err(CphdError::format(format!(
                "PVP array is {} bytes, expected {}",
                bytes.len(),
                stride * num_vectors
            )));
        }

        let mut columns = BTreeMap::new();

        for param in layout.params() {
            let base = param.byte_offset();
            let width = param.format.size_bytes();
            let fields = bytes
                .chunks_exact(stride)
                .map(|record| &record[base..base + width]);

            let column = match param.format {
                PvpFormat::F8 => PvpColumn::F64(fields.map(BigEndian::read_f64).collect()),
                PvpFormat::I8 => PvpColumn::I64(fields.map(BigEndian::read_i64).collect()),
                PvpFormat::U8 => PvpColumn::U64(fields.map(BigEndian::read_u64).collect()),
                PvpFormat::Xyz => PvpColumn::Xyz(
                    fields
                        .map(|f| {
                            let mut xyz = [0.0; 3];
                            BigEndian::read_f64_into(f, &mut xyz);
                            xyz
                        })
                        .collect(),
                ),
                PvpFormat::Str(n) => PvpColumn::Str(
                    fields
                        .map(|f| {
                            let raw = &f[..n];
                            let end = raw.iter().rposition(|b| *b != 0).map_or(0, |p| p + 1);
                            String::from_utf8(raw[..end].to_vec()).map_err(|e| {
                                CphdError::format(format!("PVP '{}': {e}", param.name))
                            })
                        })
                        .collect::<CphdResult<Vec<_>>>()?,
                ),
            };

            columns.insert(param.name.clone(), column);
        }

        Ok(Self {
            num_vectors,
            columns,
        })
    }
}

impl PvpBlock {
    /// Блок из нулевых значений под метаданные.
    pub fn new(metadata: &Metadata) -> Self {
        let channels = metadata
            .channels
            .iter()
            .map(|c| PvpChannel::zeros(&metadata.pvp, c.num_vectors))
            .collect();

        Self { channels }
    }

    /// Строит блок из строк (по одной последовательности на канал).
    ///
    /// Набор имён каждой строки должен совпадать с раскладкой PVP, вид
    /// значения с форматом параметра, число строк с `num_vectors` канала.
    pub fn from_records(
        records: &[Vec<PvpRecord>],
        metadata: &Metadata,
    ) -> CphdResult<Self> {
        if records.len() != metadata.num_channels() {
            return Err(CphdError::schema(format!(
                "PVP records describe {} channels, metadata declares {}",
                records.len(),
                metadata.num_channels()
            )));
        }

        let expected: BTreeSet<&str> = metadata.pvp.names().collect();
        let mut block = Self::new(metadata);

        for (ch, rows) in records.iter().enumerate() {
            let num_vectors = metadata.num_vectors(ch)?;

            if rows.len() != num_vectors {
                return Err(CphdError::schema(format!(
                    "Channel {ch}: {} PVP records, expected {num_vectors}",
                    rows.len()
                )));
            }

            let channel = &mut block.channels[ch];

            for (v, row) in rows.iter().enumerate() {
                let names: BTreeSet<&str> = row.keys().map(String::as_str).collect();

                if names != expected {
                    let missing: Vec<_> = expected.difference(&names).collect();
                    let extra: Vec<_> = names.difference(&expected).collect();
                    return Err(CphdError::schema(format!(
                        "Channel {ch}, vector {v}: PVP names differ (missing {missing:?}, unexpected {extra:?})"
                    )));
                }

                for (name, value) in row {
                    if let Some(column) = channel.columns.get_mut(name) {
                        column.set(v, value.clone()).map_err(|e| {
                            CphdError::schema(format!("Channel {ch}, vector {v}, '{name}': {e}"))
                        })?;
                    }
                }
            }
        }

        block.check_against(metadata)?;

        Ok(block)
    }

    /// Обратное преобразование в строки.
    pub fn to_records(
        &self,
        metadata: &Metadata,
    ) -> CphdResult<Vec<Vec<PvpRecord>>> {
        self.check_against(metadata)?;

        Ok(self
            .channels
            .iter()
            .map(|channel| {
                (0..channel.num_vectors)
                    .map(|v| {
                        channel
                            .columns
                            .iter()
                            .filter_map(|(name, col)| col.get(v).map(|val| (name.clone(), val)))
                            .collect()
                    })
                    .collect()
            })
            .collect())
    }

    /// Проверяет согласованность блока с метаданными.
    pub fn check_against(
        &self,
        metadata: &Metadata,
    ) -> CphdResult<()> {
        if self.channels.len() != metadata.num_channels() {
            return Err(CphdError::schema(format!(
                "PVP block has {} channels, metadata declares {}",
                self.channels.len(),
                metadata.num_channels()
            )));
        }

        for (ch, channel) in self.channels.iter().enumerate() {
            let num_vectors = metadata.num_vectors(ch)?;

            if channel.num_vectors != num_vectors {
                return Err(CphdError::schema(format!(
                    "Channel {ch}: PVP block has {} vectors, metadata declares {num_vectors}",
                    channel.num_vectors
                )));
            }

            if channel.columns.len() != metadata.pvp.len() {
                return Err(CphdError::schema(format!(
                    "Channel {ch}: PVP block has {} parameters, metadata declares {}",
                    channel.columns.len(),
                    metadata.pvp.len()
                )));
            }

            for param in metadata.pvp.params() {
                let column = channel.columns.get(&param.name).ok_or_else(|| {
                    CphdError::schema(format!("Channel {ch}: missing PVP '{}'", param.name))
                })?;

                if column.len() != num_vectors {
                    return Err(CphdError::schema(format!(
                        "Channel {ch}: PVP '{}' has {} values, expected {num_vectors}",
                        param.name,
                        column.len()
                    )));
                }

                column.check_format(&param.name, param.format)?;
            }
        }

        Ok(())
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn channels(&self) -> &[PvpChannel] {
        &self.channels
    }

    pub fn channel(
        &self,
        channel: usize,
    ) -> CphdResult<&PvpChannel> {
        self.channels
            .get(channel)
            .ok_or_else(|| CphdError::config(format!("PVP channel {channel} out of range")))
    }

    pub fn num_vectors(
        &self,
        channel: usize,
    ) -> CphdResult<usize> {
        Ok(self.channel(channel)?.num_vectors)
    }

    pub fn column(
        &self,
        channel: usize,
        name: &str,
    ) -> CphdResult<&PvpColumn> {
        self.channel(channel)?
            .columns
            .get(name)
            .ok_or_else(|| CphdError::schema(format!("Unknown PVP parameter '{name}'")))
    }

    /// Заменяет колонку целиком. Имя должно существовать, длина и вид совпадать.
    pub fn set_column(
        &mut self,
        channel: usize,
        name: &str,
        column: PvpColumn,
    ) -> CphdResult<()> {
        let ch = self
            .channels
            .get_mut(channel)
            .ok_or_else(|| CphdError::config(format!("PVP channel {channel} out of range")))?;

        let slot = ch
            .columns
            .get_mut(name)
            .ok_or_else(|| CphdError::schema(format!("Unknown PVP parameter '{name}'")))?;

        if column.len() != ch.num_vectors {
            return Err(CphdError::schema(format!(
                "Column '{name}' has {} values, channel {channel} has {} vectors",
                column.len(),
                ch.num_vectors
            )));
        }
        if std::mem::discriminant(slot) != std::mem::discriminant(&column) {
            return Err(CphdError::schema(format!(
                "Column '{name}' of kind {} cannot replace kind {}",
                column.kind(),
                slot.kind()
            )));
        }

        *slot = column;
        Ok(())
    }

    pub fn get(
        &self,
        channel: usize,
        vector: usize,
        name: &str,
    ) -> CphdResult<PvpValue> {
        self.column(channel, name)?.get(vector).ok_or_else(|| {
            CphdError::schema(format!(
                "Vector {vector} out of range for channel {channel}"
            ))
        })
    }

    pub fn set(
        &mut self,
        channel: usize,
        vector: usize,
        name: &str,
        value: PvpValue,
    ) -> CphdResult<()> {
        self.channels
            .get_mut(channel)
            .ok_or_else(|| CphdError::config(format!("PVP channel {channel} out of range")))?
            .columns
            .get_mut(name)
            .ok_or_else(|| CphdError::schema(format!("Unknown PVP parameter '{name}'")))?
            .set(vector, value)
    }

    /// Упаковывает канал `channel` в формат диска.
    pub fn encode_channel(
        &self,
        channel: usize,
        layout: &PvpLayout,
    ) -> CphdResult<Vec<u8>> {
        self.channel(channel)?.encode(layout)
    }

    /// Упаковывает весь блок (каналы подряд).
    pub fn encode(
        &self,
        metadata: &Metadata,
    ) -> CphdResult<Vec<u8>> {
        self.check_against(metadata)?;

        let mut buf = Vec::with_capacity(metadata.pvp_block_size() as usize);
        for ch in 0..self.channels.len() {
            buf.extend_from_slice(&self.encode_channel(ch, &metadata.pvp)?);
        }
        Ok(buf)
    }

    /// Распаковывает один канал из его участка блока.
    pub fn decode_channel(
        bytes: &[u8],
        metadata: &Metadata,
        channel: usize,
    ) -> CphdResult<PvpChannel> {
        let num_vectors = metadata.num_vectors(channel)?;
        PvpChannel::decode(bytes, &metadata.pvp, num_vectors)
    }

    /// Распаковывает весь блок.
    pub fn decode(
        bytes: &[u8],
        metadata: &Metadata,
    ) -> CphdResult<Self> {
        let stride = metadata.pvp.num_bytes_pvp();
        let mut offset = 0;
        let mut channels = Vec::with_capacity(metadata.num_channels());

        for (ch, c) in metadata.channels.iter().enumerate() {
            let len = c.num_vectors * stride;
            let chunk = bytes
                .get(offset..offset + len)
                .ok_or_else(|| CphdError::format("PVP block is truncated"))?;

            channels.push(Self::decode_channel(chunk, metadata, ch)?);
            offset += len;
        }

        Ok(Self { channels })
    }
}

#[cfg(test)]
mod tests {
    use cphd_types::SignalFormat;

    use super::*;
    use crate::metadata::ChannelDescriptor;

    fn metadata() -> Metadata {
        let mut m = Metadata::new(
            SignalFormat::Cf8,
            vec![
                ChannelDescriptor::new("CH0", 3, 4),
                ChannelDescriptor::new("CH1", 2, 4),
            ],
        );
        m.pvp.push("SIGNAL", PvpFormat::I8).unwrap();
        m.pvp.push("Beam", PvpFormat::Str(10)).unwrap();
        m
    }

    fn record(
        m: &Metadata,
        t: f64,
    ) -> PvpRecord {
        let mut r = PvpRecord::new();
        for p in m.pvp.params() {
            let v = match p.format {
                PvpFormat::F8 => PvpValue::F64(t),
                PvpFormat::I8 => PvpValue::I64(t as i64 - 1),
                PvpFormat::U8 => PvpValue::U64(t as u64),
                PvpFormat::Xyz => PvpValue::Xyz([t, -t, t * 2.0]),
                PvpFormat::Str(_) => PvpValue::Str(format!("b{t}")),
            };
            r.insert(p.name.clone(), v);
        }
        r
    }

    fn records(m: &Metadata) -> Vec<Vec<PvpRecord>> {
        m.channels
            .iter()
            .enumerate()
            .map(|(ch, c)| {
                (0..c.num_vectors)
                    .map(|v| record(m, (ch * 10 + v) as f64))
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_records_round_trip() {
        let m = metadata();
        let recs = records(&m);

        let block = PvpBlock::from_records(&recs, &m).unwrap();
        assert_eq!(block.to_records(&m).unwrap(), recs);

        assert_eq!(
            block.get(1, 1, "TxTime").unwrap(),
            PvpValue::F64(11.0)
        );
        assert_eq!(
            block.get(0, 2, "Beam").unwrap(),
            PvpValue::Str("b2".to_string())
        );
    }

    #[test]
    fn test_records_name_mismatch() {
        let m = metadata();

        let mut recs = records(&m);
        recs[1][0].remove("SIGNAL");
        let err = PvpBlock::from_records(&recs, &m).unwrap_err();
        assert!(matches!(err, CphdError::SchemaMismatch(_)));
        assert!(err.to_string().contains("SIGNAL"));

        let mut recs = records(&m);
        recs[0][1].insert("Extra".to_string(), PvpValue::F64(1.0));
        assert!(PvpBlock::from_records(&recs, &m).is_err());
    }

    #[test]
    fn test_records_kind_and_count_mismatch() {
        let m = metadata();

        let mut recs = records(&m);
        recs[0][0].insert("TxPos".to_string(), PvpValue::F64(1.0));
        assert!(PvpBlock::from_records(&recs, &m).is_err());

        let mut recs = records(&m);
        recs[1].pop();
        assert!(PvpBlock::from_records(&recs, &m).is_err());

        let recs = records(&m);
        assert!(PvpBlock::from_records(&recs[..1], &m).is_err());

        let mut recs = records(&m);
        recs[0][0].insert("Beam".to_string(), "much-too-long-name".into());
        assert!(PvpBlock::from_records(&recs, &m).is_err());
    }

    #[test]
    fn test_encode_decode_block() {
        let m = metadata();
        let block = PvpBlock::from_records(&records(&m), &m).unwrap();

        let bytes = block.encode(&m).unwrap();
        assert_eq!(bytes.len() as u64, m.pvp_block_size());

        let back = PvpBlock::decode(&bytes, &m).unwrap();
        assert_eq!(back, block);

        assert!(PvpBlock::decode(&bytes[..bytes.len() - 1], &m).is_err());
    }

    #[test]
    fn test_encoded_field_positions() {
        let m = metadata();
        let mut block = PvpBlock::new(&m);
        block.set(0, 1, "TxTime", PvpValue::F64(1.5)).unwrap();
        block.set(0, 1, "TxPos", PvpValue::Xyz([1.0, 2.0, 3.0])).unwrap();

        let bytes = block.encode_channel(0, &m.pvp).unwrap();
        let stride = m.pvp.num_bytes_pvp();
        let rec = &bytes[stride..2 * stride];

        assert_eq!(BigEndian::read_f64(&rec[0..8]), 1.5);
        assert_eq!(BigEndian::read_f64(&rec[16..24]), 2.0);

        let channel = PvpBlock::decode_channel(&bytes, &m, 0).unwrap();
        assert_eq!(&channel, block.channel(0).unwrap());
    }

    #[test]
    fn test_column_access() {
        let m = metadata();
        let mut block = PvpBlock::new(&m);

        block
            .set_column(1, "SIGNAL", PvpColumn::I64(vec![1, 0]))
            .unwrap();
        assert_eq!(block.column(1, "SIGNAL").unwrap(), &PvpColumn::I64(vec![1, 0]));

        assert!(block
            .set_column(1, "SIGNAL", PvpColumn::F64(vec![1.0, 0.0]))
            .is_err());
        assert!(block
            .set_column(1, "SIGNAL", PvpColumn::I64(vec![1]))
            .is_err());
        assert!(block.column(0, "Nope").is_err());
        assert!(block.set(0, 9, "TxTime", PvpValue::F64(0.0)).is_err());
    }
}
