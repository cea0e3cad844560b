//! Писатель CPHD файлов.
//!
//! Запись выполняется одним вызовом: все входные данные проверяются до
//! первого байта на диске, затем пишутся метаданные, опорные массивы и
//! PVP, после чего каналы кодируются параллельно и пишутся в заранее
//! вычисленные диапазоны. Текстовый заголовок пишется последним, поэтому
//! прерванная запись не оставляет корректного CPHD файла.

use std::{
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
    time::Instant,
};

use cphd_types::{CphdError, CphdResult};
use log::{debug, info, warn};

use crate::{
    binary::write_all_at,
    format::{crc32_checksum, FileHeader, SignalBlock, DEFAULT_FRAME_BYTES, SECTION_END},
    layout::{DataLayout, MetadataDocument},
    metadata::Metadata,
    metrics::{IoMetrics, MetricsSummary},
    pool::WorkerPool,
    pvp::PvpBlock,
    signal::{SignalArray, SignalView},
    support::SupportArrayData,
};

/// Настройки писателя.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Количество рабочих потоков для кодирования каналов
    pub num_threads: usize,
    /// Файлы схем, которые должны быть доступны для чтения
    pub schema_paths: Vec<PathBuf>,
    /// Целевой объём несжатых выборок в одном кадре/порции записи
    pub block_bytes: usize,
}

/// Состояние писателя.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    /// Ничего не записано
    Unopened,
    /// Метаданные, опорные массивы и PVP записаны
    HeaderWritten,
    /// Идёт запись каналов
    DataInProgress { pending: usize },
    /// Запись завершена (успешно или нет) либо вызван `close()`
    Closed,
}

/// Писатель одного CPHD файла.
#[derive(Debug)]
pub struct CphdWriter {
    metadata: Metadata,
    path: PathBuf,
    config: WriterConfig,
    pool: WorkerPool,
    state: WriterState,
    metrics: IoMetrics,
    started: Instant,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            num_threads: 1,
            schema_paths: Vec::new(),
            block_bytes: DEFAULT_FRAME_BYTES,
        }
    }
}

impl CphdWriter {
    /// Создаёт писатель. Файл не создаётся до вызова записи.
    pub fn new<P: AsRef<Path>>(
        metadata: Metadata,
        path: P,
        schema_paths: Vec<PathBuf>,
        num_threads: usize,
    ) -> CphdResult<Self> {
        Self::with_config(
            metadata,
            path,
            WriterConfig {
                num_threads,
                schema_paths,
                ..WriterConfig::default()
            },
        )
    }

    pub fn with_config<P: AsRef<Path>>(
        metadata: Metadata,
        path: P,
        config: WriterConfig,
    ) -> CphdResult<Self> {
        metadata.validate()?;

        let pool = WorkerPool::new(config.num_threads)?;

        if config.block_bytes == 0 {
            return Err(CphdError::config("Block size must be non-zero"));
        }

        for schema in &config.schema_paths {
            match std::fs::metadata(schema) {
                Ok(m) if m.is_file() => File::open(schema).map(drop).map_err(|e| {
                    CphdError::config(format!("Schema file {schema:?} is not readable: {e}"))
                })?,
                Ok(_) => {
                    return Err(CphdError::config(format!(
                        "Schema path {schema:?} is not a file"
                    )))
                }
                Err(e) => {
                    return Err(CphdError::config(format!(
                        "Schema file {schema:?} not found: {e}"
                    )))
                }
            }
        }

        Ok(Self {
            metadata,
            path: path.as_ref().to_path_buf(),
            config,
            pool,
            state: WriterState::Unopened,
            metrics: IoMetrics::new(),
            started: Instant::now(),
        })
    }

    /// Записывает файл целиком из массивов по каналам.
    pub fn write_wideband(
        &mut self,
        pvp: &PvpBlock,
        widebands: &[SignalArray],
        support: &[SupportArrayData],
    ) -> CphdResult<()> {
        let views: Vec<SignalView<'_>> = widebands.iter().map(SignalArray::view).collect();
        self.write_views(pvp, &views, support)
    }

    /// Записывает файл из одного вертикально склеенного массива.
    ///
    /// Массив режется по `num_vectors` каналов в порядке метаданных и
    /// записывается тем же путём, что и [`CphdWriter::write_wideband`].
    pub fn write_wideband_stacked(
        &mut self,
        pvp: &PvpBlock,
        stacked: &SignalArray,
        total_shape: (usize, usize),
        support: &[SupportArrayData],
    ) -> CphdResult<()> {
        self.ensure_open()?;

        let (rows, cols) = stacked.shape();
        if cols != total_shape.1 {
            return Err(CphdError::DimensionMismatch {
                channel: 0,
                what: "stacked array samples",
                expected: total_shape.1,
                found: cols,
            });
        }
        if rows != total_shape.0 {
            return Err(CphdError::DimensionMismatch {
                channel: 0,
                what: "stacked array rows",
                expected: total_shape.0,
                found: rows,
            });
        }

        let counts: Vec<usize> = self.metadata.channels.iter().map(|c| c.num_vectors).collect();
        let total: usize = counts.iter().sum();

        if total != rows {
            return Err(CphdError::DimensionMismatch {
                channel: self.first_short_channel(rows),
                what: "num_vectors",
                expected: total,
                found: rows,
            });
        }

        let views = stacked.split_rows(&counts)?;
        self.write_views(pvp, &views, support)
    }

    /// Закрывает писатель. Повторная запись невозможна.
    pub fn close(&mut self) {
        self.state = WriterState::Closed;
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn metrics(&self) -> MetricsSummary {
        self.metrics.summary(&self.started, 0)
    }

    fn ensure_open(&self) -> CphdResult<()> {
        match self.state {
            WriterState::Unopened => Ok(()),
            _ => Err(CphdError::Closed("writer")),
        }
    }

    /// Канал, на котором заканчиваются `rows` строк склеенного массива.
    fn first_short_channel(
        &self,
        rows: usize,
    ) -> usize {
        let mut acc = 0;
        for (i, c) in self.metadata.channels.iter().enumerate() {
            acc += c.num_vectors;
            if acc > rows {
                return i;
            }
        }
        self.metadata.num_channels().saturating_sub(1)
    }

    fn write_views(
        &mut self,
        pvp: &PvpBlock,
        views: &[SignalView<'_>],
        support: &[SupportArrayData],
    ) -> CphdResult<()> {
        self.ensure_open()?;
        self.validate_inputs(pvp, views, support)?;

        self.started = Instant::now();
        let result = self.write_file(pvp, views, support);
        self.state = WriterState::Closed;

        match result {
            Ok(()) => {
                info!(
                    "Wrote {:?}: {} channel(s), {} bytes",
                    self.path,
                    views.len(),
                    self.metrics().bytes_written
                );
                Ok(())
            }
            Err(e) => {
                self.metrics.error();
                warn!("Write of {:?} aborted, file left without header: {e}", self.path);
                Err(e)
            }
        }
    }

    /// Все проверки формы и схемы до записи первого байта.
    fn validate_inputs(
        &self,
        pvp: &PvpBlock,
        views: &[SignalView<'_>],
        support: &[SupportArrayData],
    ) -> CphdResult<()> {
        let m = &self.metadata;

        if views.len() != m.num_channels() {
            return Err(CphdError::DimensionMismatch {
                channel: views.len().min(m.num_channels()),
                what: "channel count",
                expected: m.num_channels(),
                found: views.len(),
            });
        }

        for (ch, (view, desc)) in views.iter().zip(&m.channels).enumerate() {
            if view.format() != m.signal_format {
                return Err(CphdError::schema(format!(
                    "Channel {ch}: samples are {}, metadata declares {}",
                    view.format(),
                    m.signal_format
                )));
            }

            let (rows, cols) = view.shape();
            if rows != desc.num_vectors {
                return Err(CphdError::DimensionMismatch {
                    channel: ch,
                    what: "num_vectors",
                    expected: desc.num_vectors,
                    found: rows,
                });
            }
            if cols != desc.num_samples {
                return Err(CphdError::DimensionMismatch {
                    channel: ch,
                    what: "num_samples",
                    expected: desc.num_samples,
                    found: cols,
                });
            }
        }

        pvp.check_against(m)?;

        if support.len() != m.support_arrays.len() {
            return Err(CphdError::schema(format!(
                "Got {} support arrays, metadata declares {}",
                support.len(),
                m.support_arrays.len()
            )));
        }
        for (data, desc) in support.iter().zip(&m.support_arrays) {
            data.check_against(desc)?;
        }

        Ok(())
    }

    fn rows_per_block(
        &self,
        channel: usize,
    ) -> CphdResult<usize> {
        let row_bytes = self.metadata.vector_bytes(channel)?;
        Ok((self.config.block_bytes / row_bytes.max(1))
            .clamp(1, u32::MAX as usize))
    }

    fn write_file(
        &mut self,
        pvp: &PvpBlock,
        views: &[SignalView<'_>],
        support: &[SupportArrayData],
    ) -> CphdResult<()> {
        let compressed = self.metadata.compression.is_compressed();
        let num_channels = views.len();

        // Смещения сжатых каналов зависят от их размеров, поэтому
        // сжатые каналы кодируются до создания файла.
        let encoded: Option<Vec<Vec<u8>>> = if compressed {
            Some(self.pool.run(num_channels, |ch| {
                let frames = encode_compressed(&views[ch], ch, self.rows_per_block(ch)?)?;
                debug!("Channel {ch}: compressed to {} bytes", frames.len());
                Ok(frames)
            })?)
        } else {
            None
        };

        let sizes: Option<Vec<u64>> = encoded
            .as_ref()
            .map(|e| e.iter().map(|c| c.len() as u64).collect());
        let layout = DataLayout::compute(&self.metadata, sizes.as_deref())?;

        let document = MetadataDocument {
            metadata: self.metadata.clone(),
            data: layout.clone(),
        };
        let json = document.to_json()?;
        let pvp_bytes = pvp.encode(&self.metadata)?;

        let mut header = FileHeader::new(&self.metadata.classification, &self.metadata.release_info);
        header.metadata_crc32 = crc32_checksum(&json);
        header.set_sizes(
            json.len() as u64,
            self.metadata.support_block_size(),
            pvp_bytes.len() as u64,
            layout.signal_block_size(&self.metadata)?,
        );

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        file.set_len(header.file_size())?;

        write_all_at(&file, &json, header.metadata_block_byte_offset)?;
        write_all_at(
            &file,
            &SECTION_END,
            header.metadata_block_byte_offset + json.len() as u64,
        )?;

        for (data, sa) in support.iter().zip(&layout.support_arrays) {
            write_all_at(
                &file,
                data.as_bytes(),
                header.support_block_byte_offset + sa.array_byte_offset,
            )?;
        }

        write_all_at(&file, &pvp_bytes, header.pvp_block_byte_offset)?;
        self.metrics
            .add_written(json.len() + pvp_bytes.len() + self.metadata.support_block_size() as usize);

        self.state = WriterState::HeaderWritten;
        debug!(
            "Metadata, support and PVP blocks written; {} channel(s) pending",
            num_channels
        );
        self.state = WriterState::DataInProgress {
            pending: num_channels,
        };

        let signal_base = header.signal_block_byte_offset;
        let file_ref = &file;
        let layout_ref = &layout;
        let metrics = &self.metrics;

        self.pool.run(num_channels, |ch| {
            let offset = signal_base + layout_ref.channels[ch].signal_array_byte_offset;

            match &encoded {
                Some(frames) => {
                    write_all_at(file_ref, &frames[ch], offset)
                        .map_err(|e| CphdError::from(e).in_channel(ch))?;
                    metrics.add_written(frames[ch].len());
                }
                None => {
                    let view = &views[ch];
                    let rows_per_block = self.rows_per_block(ch)?;
                    let mut buf = Vec::new();
                    let mut pos = offset;
                    let mut first = 0;

                    while first < view.num_vectors() {
                        let count = rows_per_block.min(view.num_vectors() - first);
                        let rows = view.rows(first..first + count);

                        buf.resize(rows.encoded_len(), 0);
                        rows.encode_into(&mut buf)
                            .map_err(|e| CphdError::encode(ch, e.to_string()))?;
                        write_all_at(file_ref, &buf, pos)
                            .map_err(|e| CphdError::from(e).in_channel(ch))?;

                        metrics.add_written(buf.len());
                        pos += buf.len() as u64;
                        first += count;
                    }
                }
            }

            metrics.channel_done();
            debug!("Channel {ch}: written at offset {offset}");
            Ok(())
        })?;

        write_all_at(&file, &header.serialize(), 0)?;
        file.sync_all()?;

        Ok(())
    }
}

/// Кодирует канал в последовательность сжатых кадров.
fn encode_compressed(
    view: &SignalView<'_>,
    channel: usize,
    rows_per_frame: usize,
) -> CphdResult<Vec<u8>> {
    let num_vectors = view.num_vectors();
    let mut out = Vec::new();
    let mut first = 0;

    while first < num_vectors {
        let count = rows_per_frame.min(num_vectors - first);
        let vector_count =
            u32::try_from(count).map_err(|_| CphdError::encode(channel, "frame too large"))?;

        let mut block = SignalBlock::new(
            first as u64,
            vector_count,
            view.rows(first..first + count).encode(),
        );
        block.compress();

        let frame = block
            .serialize()
            .map_err(|e| CphdError::encode(channel, e.to_string()))?;
        out.extend_from_slice(&frame);

        first += count;
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use cphd_types::{Compression, SignalFormat};
    use ndarray::Array2;
    use num_complex::Complex;
    use tempfile::tempdir;

    use super::*;
    use crate::metadata::ChannelDescriptor;

    fn metadata() -> Metadata {
        Metadata::new(
            SignalFormat::Ci4,
            vec![
                ChannelDescriptor::new("A", 4, 8),
                ChannelDescriptor::new("B", 6, 8),
            ],
        )
    }

    fn channel(
        rows: usize,
        cols: usize,
    ) -> SignalArray {
        SignalArray::from(Array2::from_shape_fn((rows, cols), |(r, c)| {
            Complex::new(r as i16, c as i16)
        }))
    }

    #[test]
    fn test_zero_threads_rejected() {
        let dir = tempdir().unwrap();
        let err = CphdWriter::new(metadata(), dir.path().join("x.cphd"), vec![], 0).unwrap_err();
        assert!(matches!(err, CphdError::Config(_)));
    }

    #[test]
    fn test_missing_schema_rejected() {
        let dir = tempdir().unwrap();
        let err = CphdWriter::new(
            metadata(),
            dir.path().join("x.cphd"),
            vec![dir.path().join("missing.xsd")],
            2,
        )
        .unwrap_err();
        assert!(err.to_string().contains("missing.xsd"));
    }

    #[test]
    fn test_dimension_mismatch_before_any_io() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.cphd");
        let m = metadata();
        let mut w = CphdWriter::new(m.clone(), &path, vec![], 2).unwrap();

        let err = w
            .write_wideband(&PvpBlock::new(&m), &[channel(4, 8), channel(5, 8)], &[])
            .unwrap_err();

        assert!(matches!(
            err,
            CphdError::DimensionMismatch {
                channel: 1,
                what: "num_vectors",
                ..
            }
        ));
        assert!(!path.exists());
        assert_eq!(w.state(), WriterState::Unopened);
    }

    #[test]
    fn test_write_then_closed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ok.cphd");
        let m = metadata();
        let mut w = CphdWriter::new(m.clone(), &path, vec![], 2).unwrap();
        let pvp = PvpBlock::new(&m);

        w.write_wideband(&pvp, &[channel(4, 8), channel(6, 8)], &[])
            .unwrap();

        assert_eq!(w.state(), WriterState::Closed);
        assert!(std::fs::read(&path).unwrap().starts_with(b"CPHD/1.0\n"));
        assert!(matches!(
            w.write_wideband(&pvp, &[channel(4, 8), channel(6, 8)], &[]),
            Err(CphdError::Closed(_))
        ));
    }

    #[test]
    fn test_stacked_shape_checks() {
        let dir = tempdir().unwrap();
        let m = metadata();
        let pvp = PvpBlock::new(&m);

        let mut w = CphdWriter::new(m.clone(), dir.path().join("s.cphd"), vec![], 1).unwrap();
        let err = w
            .write_wideband_stacked(&pvp, &channel(10, 8), (10, 7), &[])
            .unwrap_err();
        assert!(matches!(
            err,
            CphdError::DimensionMismatch {
                what: "stacked array samples",
                ..
            }
        ));

        let err = w
            .write_wideband_stacked(&pvp, &channel(9, 8), (9, 8), &[])
            .unwrap_err();
        assert!(matches!(err, CphdError::DimensionMismatch { channel: 1, .. }));
    }

    #[test]
    fn test_small_blocks_split_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lz4.cphd");
        let mut m = metadata();
        m.compression = Compression::Lz4;

        let config = WriterConfig {
            num_threads: 2,
            block_bytes: 64,
            ..WriterConfig::default()
        };
        let mut w = CphdWriter::with_config(m.clone(), &path, config).unwrap();
        w.write_wideband(&PvpBlock::new(&m), &[channel(4, 8), channel(6, 8)], &[])
            .unwrap();

        // 64 байта на кадр = 2 вектора по 32 байта
        assert_eq!(w.metrics().channels_done, 2);
        assert!(path.metadata().unwrap().len() > 0);
    }
}
