//! Читатель CPHD файлов.
//!
//! При открытии разбираются заголовок и метаданные, блок PVP читается
//! целиком. Сигнальные массивы декодируются по запросу через буферы из
//! общего бюджета [`ScratchSpace`], поэтому размер сигнального блока не
//! ограничен объёмом памяти под буферы.

use std::{
    fs::File,
    ops::Range,
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
    time::Instant,
};

use cphd_types::{CphdError, CphdResult};
use log::{debug, info};

use crate::{
    binary::{read_exact_at, read_vec_at},
    format::{
        crc32_checksum, FileHeader, FrameHeader, SignalFrame, CPHD_MAX_HEADER_SIZE, SECTION_END,
        SIGNAL_FRAME_HEADER_SIZE,
    },
    layout::{DataLayout, MetadataDocument},
    metadata::Metadata,
    metrics::{IoMetrics, MetricsSummary},
    pool::WorkerPool,
    pvp::PvpBlock,
    scratch::ScratchSpace,
    signal::SignalArray,
    support::SupportArrayData,
};

/// Состояние читателя.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    /// Файл ещё не открыт
    Unopened,
    /// Заголовок, метаданные и PVP прочитаны
    HeaderParsed,
    /// Идёт декодирование `in_flight` каналов
    DataInProgress { in_flight: usize },
    /// Вызван `close()`
    Closed,
}

/// Статистика, накопленная [`CphdReader`].
#[derive(Debug, Default, Clone)]
pub struct ReadStats {
    /// Прочитано байт из файла
    pub bytes_read: u64,
    /// Распаковано сжатых кадров
    pub frames: u64,
    /// Декодировано сигнальных массивов
    pub channels_decoded: u64,
    /// Максимум одновременно занятых байт бюджета
    pub peak_scratch: usize,
    pub scratch_budget: usize,
}

/// Читатель одного CPHD файла.
#[derive(Debug)]
pub struct CphdReader {
    path: PathBuf,
    file: Option<File>,
    header: FileHeader,
    document: MetadataDocument,
    pvp: PvpBlock,
    scratch: ScratchSpace,
    metrics: IoMetrics,
    in_flight: AtomicUsize,
    opened: Instant,
}

/// Доступ к сигнальным массивам открытого файла.
#[derive(Debug, Clone, Copy)]
pub struct Wideband<'a> {
    reader: &'a CphdReader,
}

/// Счётчик задач, декодирующих каналы.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl CphdReader {
    /// Открывает файл. `scratch_bytes` ограничивает суммарный объём буферов
    /// декодирования сигнальных массивов.
    ///
    /// Бюджет должен вмещать хотя бы один вектор. Для файлов со сжатием
    /// LZ4 он должен вмещать целый кадр вместе с распакованными векторами:
    /// при размере кадра писателя по умолчанию ([`crate::format::DEFAULT_FRAME_BYTES`],
    /// 1 MiB) это около 2 MiB. Меньший бюджет приводит к `Config`.
    pub fn open<P: AsRef<Path>>(
        path: P,
        scratch_bytes: usize,
    ) -> CphdResult<Self> {
        let path = path.as_ref().to_path_buf();
        let scratch = ScratchSpace::new(scratch_bytes)?;
        let metrics = IoMetrics::new();

        let file = File::open(&path)?;
        let file_len = file.metadata()?.len();

        let head = read_vec_at(&file, (CPHD_MAX_HEADER_SIZE as u64).min(file_len) as usize, 0)?;
        let (header, header_len) = FileHeader::deserialize(&head)?;
        header.validate_extents(header_len, file_len)?;

        let block = read_vec_at(
            &file,
            header.metadata_block_size as usize + SECTION_END.len(),
            header.metadata_block_byte_offset,
        )?;
        let (json, terminator) = block.split_at(header.metadata_block_size as usize);

        if terminator != SECTION_END {
            return Err(CphdError::format("Metadata block terminator missing"));
        }

        let crc = crc32_checksum(json);
        if crc != header.metadata_crc32 {
            return Err(CphdError::CrcMismatch {
                expected: crc,
                found: header.metadata_crc32,
            });
        }

        let document = MetadataDocument::from_json(json)?;
        let metadata = &document.metadata;

        metadata.validate()?;
        document.data.verify(metadata)?;
        check_block_sizes(&header, metadata, &document.data)?;

        let pvp_bytes = read_vec_at(
            &file,
            header.pvp_block_size as usize,
            header.pvp_block_byte_offset,
        )?;
        let pvp = PvpBlock::decode(&pvp_bytes, metadata)?;

        metrics.add_read(head.len() + block.len() + pvp_bytes.len());

        info!(
            "Opened {:?}: {} channel(s), {} vector(s), {} signal bytes",
            path,
            metadata.num_channels(),
            metadata.total_vectors(),
            header.signal_block_size
        );

        Ok(Self {
            path,
            file: Some(file),
            header,
            document,
            pvp,
            scratch,
            metrics,
            in_flight: AtomicUsize::new(0),
            opened: Instant::now(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn metadata(&self) -> CphdResult<&Metadata> {
        self.file()?;
        Ok(&self.document.metadata)
    }

    pub fn pvp_block(&self) -> CphdResult<&PvpBlock> {
        self.file()?;
        Ok(&self.pvp)
    }

    pub fn file_header(&self) -> CphdResult<&FileHeader> {
        self.file()?;
        Ok(&self.header)
    }

    pub fn layout(&self) -> CphdResult<&DataLayout> {
        self.file()?;
        Ok(&self.document.data)
    }

    pub fn wideband(&self) -> CphdResult<Wideband<'_>> {
        self.file()?;
        Ok(Wideband { reader: self })
    }

    /// То же, что `wideband()?.read(channel)`.
    pub fn phd(
        &self,
        channel: usize,
    ) -> CphdResult<SignalArray> {
        self.wideband()?.read(channel)
    }

    /// Декодирует все каналы на `num_threads` потоках в общем бюджете.
    pub fn read_all(
        &self,
        num_threads: usize,
    ) -> CphdResult<Vec<SignalArray>> {
        let pool = WorkerPool::new(num_threads)?;
        let metadata = self.metadata()?;
        let stage_limit = (self.scratch.budget() / pool.workers()).max(1);

        pool.run(metadata.num_channels(), |ch| {
            let num_vectors = metadata.num_vectors(ch)?;
            self.read_channel(ch, 0..num_vectors, stage_limit)
        })
    }

    /// Читает все опорные массивы на `num_threads` потоках.
    pub fn support_arrays(
        &self,
        num_threads: usize,
    ) -> CphdResult<Vec<SupportArrayData>> {
        let pool = WorkerPool::new(num_threads)?;
        let file = self.file()?;
        let metadata = &self.document.metadata;
        let layout = &self.document.data;

        pool.run(metadata.support_arrays.len(), |i| {
            let desc = &metadata.support_arrays[i];
            let offset = self.header.support_block_byte_offset + layout.support_arrays[i].array_byte_offset;

            let bytes = read_vec_at(file, desc.size_bytes(), offset)?;
            self.metrics.add_read(bytes.len());
            debug!("Support array '{}': {} bytes", desc.identifier, bytes.len());

            Ok(SupportArrayData::new(bytes))
        })
    }

    /// Освобождает файл. Все последующие вызовы завершаются `Closed`.
    pub fn close(&mut self) {
        if self.file.take().is_some() {
            debug!("Closed {:?}", self.path);
        }
    }

    pub fn state(&self) -> ReaderState {
        if self.file.is_none() {
            return ReaderState::Closed;
        }

        match self.in_flight.load(Ordering::Acquire) {
            0 => ReaderState::HeaderParsed,
            n => ReaderState::DataInProgress { in_flight: n },
        }
    }

    pub fn stats(&self) -> ReadStats {
        ReadStats {
            bytes_read: self.metrics.bytes_read.load(Ordering::Relaxed),
            frames: self.metrics.frames.load(Ordering::Relaxed),
            channels_decoded: self.metrics.channels_done.load(Ordering::Relaxed),
            peak_scratch: self.scratch.peak(),
            scratch_budget: self.scratch.budget(),
        }
    }

    /// Максимум одновременно занятых байт бюджета.
    pub fn peak_scratch(&self) -> usize {
        self.scratch.peak()
    }

    pub fn metrics(&self) -> MetricsSummary {
        self.metrics.summary(&self.opened, self.scratch.peak())
    }

    fn file(&self) -> CphdResult<&File> {
        self.file.as_ref().ok_or(CphdError::Closed("reader"))
    }

    /// Декодирует векторы `range` канала, порциями не больше `stage_limit`
    /// байт (но не меньше одного вектора).
    fn read_channel(
        &self,
        channel: usize,
        range: Range<usize>,
        stage_limit: usize,
    ) -> CphdResult<SignalArray> {
        let file = self.file()?;
        let metadata = &self.document.metadata;
        let desc = metadata.channel(channel)?;

        if range.start > range.end || range.end > desc.num_vectors {
            return Err(CphdError::config(format!(
                "Vector range {range:?} out of bounds for channel {channel} ({} vectors)",
                desc.num_vectors
            )));
        }

        let row_bytes = metadata.vector_bytes(channel)?;
        if row_bytes > self.scratch.budget() {
            return Err(CphdError::config(format!(
                "One vector of channel {channel} is {row_bytes} bytes, scratch budget is {}",
                self.scratch.budget()
            )));
        }

        let _guard = InFlight::enter(&self.in_flight);
        let mut out = SignalArray::zeros(metadata.signal_format, range.len(), desc.num_samples);

        if range.is_empty() {
            return Ok(out);
        }

        let base = self.header.signal_block_byte_offset
            + self.document.data.channel(channel)?.signal_array_byte_offset;

        if metadata.compression.is_compressed() {
            self.read_compressed(file, channel, base, row_bytes, &range, &mut out)?;
        } else {
            let rows_per_stage = (stage_limit / row_bytes).max(1);
            let mut done = 0;

            while done < range.len() {
                let count = rows_per_stage.min(range.len() - done);
                let mut lease = self.scratch.acquire(count * row_bytes)?;
                let offset = base + ((range.start + done) * row_bytes) as u64;

                read_exact_at(file, &mut lease, offset)
                    .map_err(|e| CphdError::from(e).in_channel(channel))?;
                out.decode_rows_into(done, &lease)
                    .map_err(|e| CphdError::decode(channel, e.to_string()))?;

                self.metrics.add_read(lease.len());
                done += count;
            }
        }

        self.metrics.channel_done();
        debug!("Channel {channel}: decoded vectors {range:?}");

        Ok(out)
    }

    /// Проходит по кадрам канала и распаковывает кадры, пересекающие `range`.
    fn read_compressed(
        &self,
        file: &File,
        channel: usize,
        base: u64,
        row_bytes: usize,
        range: &Range<usize>,
        out: &mut SignalArray,
    ) -> CphdResult<()> {
        let metadata = &self.document.metadata;
        let num_vectors = metadata.num_vectors(channel)?;
        let end = base + self.document.data.signal_size(metadata, channel)?;
        let mut pos = base;
        let mut cursor = 0usize;

        while pos < end && cursor < range.end {
            let mut head = [0u8; SIGNAL_FRAME_HEADER_SIZE];
            read_exact_at(file, &mut head, pos)
                .map_err(|e| CphdError::from(e).in_channel(channel))?;

            let fh = FrameHeader::parse(&head).map_err(|e| CphdError::decode(channel, e.to_string()))?;
            let frame_len = fh.frame_len();
            let frame_first = cursor;
            let frame_end = cursor + fh.vector_count as usize;

            if pos + frame_len as u64 > end {
                return Err(CphdError::decode(
                    channel,
                    format!("frame at {pos} runs past the end of the channel"),
                ));
            }
            if frame_end > num_vectors {
                return Err(CphdError::decode(
                    channel,
                    format!(
                        "frame at {pos} holds vectors {frame_first}..{frame_end}, channel has {num_vectors}"
                    ),
                ));
            }
            if fh.first_vector != frame_first as u64 {
                return Err(CphdError::decode(
                    channel,
                    format!(
                        "frame starts at vector {}, expected {frame_first}",
                        fh.first_vector
                    ),
                ));
            }

            if frame_end > range.start {
                let raw_len = fh.vector_count as usize * row_bytes;
                let mut lease = self.scratch.acquire(frame_len + raw_len).map_err(|_| {
                    CphdError::config(format!(
                        "Frame of {} bytes in channel {channel} does not fit scratch budget of {} bytes",
                        frame_len + raw_len,
                        self.scratch.budget()
                    ))
                })?;
                let (compressed, raw) = lease.split_at_mut(frame_len);

                read_exact_at(file, compressed, pos)
                    .map_err(|e| CphdError::from(e).in_channel(channel))?;

                let (frame, _) = SignalFrame::parse(compressed)
                    .map_err(|e| CphdError::decode(channel, e.to_string()))?;
                frame
                    .decompress_into(raw)
                    .map_err(|e| CphdError::decode(channel, e.to_string()))?;

                let lo = frame_first.max(range.start);
                let hi = frame_end.min(range.end);
                let rows = &raw[(lo - frame_first) * row_bytes..(hi - frame_first) * row_bytes];

                out.decode_rows_into(lo - range.start, rows)
                    .map_err(|e| CphdError::decode(channel, e.to_string()))?;

                self.metrics.add_read(frame_len);
                self.metrics.add_frames(1);
            }

            pos += frame_len as u64;
            cursor = frame_end;
        }

        if cursor < range.end {
            return Err(CphdError::decode(
                channel,
                format!("channel data ends after {cursor} vectors, expected at least {}", range.end),
            ));
        }

        Ok(())
    }
}

impl Wideband<'_> {
    pub fn num_channels(&self) -> usize {
        self.reader.document.metadata.num_channels()
    }

    /// Декодирует канал целиком.
    pub fn read(
        &self,
        channel: usize,
    ) -> CphdResult<SignalArray> {
        let num_vectors = self.reader.metadata()?.num_vectors(channel)?;
        self.read_vectors(channel, 0..num_vectors)
    }

    /// Декодирует диапазон векторов канала.
    pub fn read_vectors(
        &self,
        channel: usize,
        range: Range<usize>,
    ) -> CphdResult<SignalArray> {
        self.reader
            .read_channel(channel, range, self.reader.scratch.budget())
    }
}

/// Размеры блоков в заголовке должны совпадать с вычисленными по метаданным.
fn check_block_sizes(
    header: &FileHeader,
    metadata: &Metadata,
    layout: &DataLayout,
) -> CphdResult<()> {
    let expected = [
        ("support", metadata.support_block_size(), header.support_block_size),
        ("PVP", metadata.pvp_block_size(), header.pvp_block_size),
        (
            "signal",
            layout.signal_block_size(metadata)?,
            header.signal_block_size,
        ),
    ];

    for (name, computed, declared) in expected {
        if computed != declared {
            return Err(CphdError::schema(format!(
                "Header declares {declared}-byte {name} block, metadata implies {computed}"
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use cphd_types::{Compression, SignalFormat};
    use ndarray::Array2;
    use num_complex::Complex;
    use tempfile::tempdir;

    use super::*;
    use crate::{
        metadata::ChannelDescriptor,
        writer::{CphdWriter, WriterConfig},
    };

    fn write_file(
        path: &Path,
        compression: Compression,
    ) -> (Metadata, Vec<SignalArray>) {
        let mut m = Metadata::new(
            SignalFormat::Cf8,
            vec![
                ChannelDescriptor::new("A", 12, 6),
                ChannelDescriptor::new("B", 5, 6),
            ],
        );
        m.compression = compression;

        let channels: Vec<SignalArray> = m
            .channels
            .iter()
            .enumerate()
            .map(|(ch, c)| {
                SignalArray::from(Array2::from_shape_fn((c.num_vectors, c.num_samples), |(r, s)| {
                    Complex::new((ch * 100 + r) as f32, s as f32)
                }))
            })
            .collect();

        let config = WriterConfig {
            num_threads: 2,
            block_bytes: 3 * 6 * 8,
            ..WriterConfig::default()
        };
        CphdWriter::with_config(m.clone(), path, config)
            .unwrap()
            .write_wideband(&PvpBlock::new(&m), &channels, &[])
            .unwrap();

        (m, channels)
    }

    #[test]
    fn test_open_and_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("r.cphd");
        let (m, channels) = write_file(&path, Compression::None);

        let reader = CphdReader::open(&path, 1 << 20).unwrap();
        assert_eq!(reader.metadata().unwrap(), &m);
        assert_eq!(reader.state(), ReaderState::HeaderParsed);
        assert_eq!(reader.phd(1).unwrap(), channels[1]);
        assert_eq!(reader.wideband().unwrap().read(0).unwrap(), channels[0]);
    }

    #[test]
    fn test_read_vectors_range() {
        for compression in [Compression::None, Compression::Lz4] {
            let dir = tempdir().unwrap();
            let path = dir.path().join("r.cphd");
            let (_, channels) = write_file(&path, compression);

            let reader = CphdReader::open(&path, 1 << 20).unwrap();
            let part = reader.wideband().unwrap().read_vectors(0, 4..10).unwrap();

            let expected = channels[0].as_cf8().unwrap().slice(ndarray::s![4..10, ..]).to_owned();
            assert_eq!(part.as_cf8().unwrap(), &expected);

            assert!(reader.wideband().unwrap().read_vectors(0, 4..13).is_err());
        }
    }

    #[test]
    fn test_budget_smaller_than_vector() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("r.cphd");
        write_file(&path, Compression::None);

        let reader = CphdReader::open(&path, 16).unwrap();
        assert!(matches!(reader.phd(0), Err(CphdError::Config(_))));
    }

    #[test]
    fn test_closed_reader() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("r.cphd");
        write_file(&path, Compression::None);

        let mut reader = CphdReader::open(&path, 1 << 20).unwrap();
        reader.close();

        assert_eq!(reader.state(), ReaderState::Closed);
        assert!(matches!(reader.metadata(), Err(CphdError::Closed(_))));
        assert!(matches!(reader.phd(0), Err(CphdError::Closed(_))));
        assert!(matches!(reader.support_arrays(2), Err(CphdError::Closed(_))));
    }

    #[test]
    fn test_not_a_cphd_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("junk.bin");
        std::fs::write(&path, b"hello world").unwrap();

        let err = CphdReader::open(&path, 1024).unwrap_err();
        assert!(err.is_format_error());
    }
}
