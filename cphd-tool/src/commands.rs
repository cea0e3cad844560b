//! Реализация подкоманд `cphd-tool`.

use std::{
    fs::File,
    io::{BufWriter, Write},
    ops::Range,
    path::Path,
};

use cphd_core::{
    ChannelDescriptor, CphdReader, CphdWriter, Metadata, MetricsSummary, PvpBlock, PvpColumn,
    SignalArray, SupportArrayData, SupportArrayDescriptor, WriterConfig, OPTIONAL_PVP,
};
use cphd_types::SignalFormat;
use log::{debug, info};
use ndarray::Array2;
use num_complex::Complex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;

use crate::{
    config::{GenerateSpec, ToolConfig},
    error::{ToolError, ToolResult},
};

/// Сводка по файлу для `info`.
#[derive(Debug, Clone, Serialize)]
pub struct FileInfo {
    pub version: String,
    pub classification: String,
    pub release_info: String,
    pub core_name: String,
    pub signal_format: String,
    pub compression: String,
    pub num_bytes_pvp: usize,
    pub pvp_params: Vec<String>,
    pub channels: Vec<ChannelInfo>,
    pub support_arrays: Vec<String>,
    pub file_size: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelInfo {
    pub identifier: String,
    pub num_vectors: usize,
    pub num_samples: usize,
    pub signal_bytes: u64,
}

/// Результат `verify`.
#[derive(Debug, Clone)]
pub struct VerifyReport {
    pub channels: usize,
    pub vectors: u64,
    pub support_arrays: usize,
    pub peak_scratch: usize,
    pub scratch_budget: usize,
    pub bytes_read: u64,
}

////////////////////////////////////////////////////////////////////////////////
// info
////////////////////////////////////////////////////////////////////////////////

pub fn info<P: AsRef<Path>>(
    path: P,
    cfg: &ToolConfig,
) -> ToolResult<FileInfo> {
    let reader = CphdReader::open(path, cfg.scratch_bytes)?;
    let header = reader.file_header()?;
    let m = reader.metadata()?;
    let layout = reader.layout()?;

    let channels = m
        .channels
        .iter()
        .enumerate()
        .map(|(i, c)| -> ToolResult<ChannelInfo> {
            Ok(ChannelInfo {
                identifier: c.identifier.clone(),
                num_vectors: c.num_vectors,
                num_samples: c.num_samples,
                signal_bytes: layout.signal_size(m, i)?,
            })
        })
        .collect::<ToolResult<Vec<_>>>()?;

    Ok(FileInfo {
        version: header.version.clone(),
        classification: header.classification.clone(),
        release_info: header.release_info.clone(),
        core_name: m.collection.core_name.clone(),
        signal_format: m.signal_format.to_string(),
        compression: m.compression.to_string(),
        num_bytes_pvp: m.pvp.num_bytes_pvp(),
        pvp_params: m.pvp.names().map(str::to_string).collect(),
        channels,
        support_arrays: m
            .support_arrays
            .iter()
            .map(|s| format!("{} {}x{} {}", s.identifier, s.num_rows, s.num_cols, s.element_format))
            .collect(),
        file_size: header.file_size(),
    })
}

impl std::fmt::Display for FileInfo {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        writeln!(f, "  Version        : CPHD/{}", self.version)?;
        writeln!(f, "  Classification : {}", self.classification)?;
        writeln!(f, "  Release info   : {}", self.release_info)?;
        writeln!(f, "  Core name      : {}", self.core_name)?;
        writeln!(f, "  Signal format  : {}", self.signal_format)?;
        writeln!(f, "  Compression    : {}", self.compression)?;
        writeln!(
            f,
            "  PVP            : {} params, {} B/vector",
            self.pvp_params.len(),
            self.num_bytes_pvp
        )?;
        for c in &self.channels {
            writeln!(
                f,
                "  Channel {:<6} : {}x{} ({} bytes)",
                c.identifier, c.num_vectors, c.num_samples, c.signal_bytes
            )?;
        }
        for s in &self.support_arrays {
            writeln!(f, "  Support        : {s}")?;
        }
        writeln!(f, "  File size      : {} bytes", self.file_size)?;
        write!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")
    }
}

////////////////////////////////////////////////////////////////////////////////
// pvp
////////////////////////////////////////////////////////////////////////////////

/// Выводит PVP записи в JSON: все каналы или только `channel`.
pub fn dump_pvp<P: AsRef<Path>, W: Write>(
    path: P,
    channel: Option<usize>,
    cfg: &ToolConfig,
    out: W,
) -> ToolResult<()> {
    let reader = CphdReader::open(path, cfg.scratch_bytes)?;
    let m = reader.metadata()?;
    let mut records = reader.pvp_block()?.to_records(m)?;

    if let Some(ch) = channel {
        if ch >= records.len() {
            return Err(ToolError::invalid(format!(
                "Channel {ch} out of range (file has {} channels)",
                records.len()
            )));
        }
        records = vec![records.swap_remove(ch)];
    }

    let mut out = BufWriter::new(out);
    serde_json::to_writer_pretty(&mut out, &records)?;
    writeln!(out)?;
    out.flush()?;

    Ok(())
}

////////////////////////////////////////////////////////////////////////////////
// generate
////////////////////////////////////////////////////////////////////////////////

/// Метаданные синтетического файла.
pub fn synthetic_metadata(spec: &GenerateSpec) -> ToolResult<Metadata> {
    let channels = spec
        .channels
        .iter()
        .enumerate()
        .map(|(i, shape)| {
            let c = ChannelDescriptor::new(&format!("CH{i}"), shape.num_vectors, shape.num_samples);
            if spec.with_support {
                c.with_support_array(&format!("AntGain{i}"))
            } else {
                c
            }
        })
        .collect();

    let mut m = Metadata::new(spec.signal_format, channels);
    m.compression = spec.compression;
    m.collection.core_name = format!("SYNTHETIC_{:08X}", spec.seed);
    m.collection.collector_name = "cphd-tool".to_string();

    for (name, format) in OPTIONAL_PVP
        .iter()
        .filter(|(name, _)| matches!(*name, "AmpSF" | "SIGNAL"))
    {
        m.pvp.push(name, *format)?;
    }

    if spec.with_support {
        for i in 0..spec.channels.len() {
            m.support_arrays.push(SupportArrayDescriptor::new(
                &format!("AntGain{i}"),
                16,
                16,
                4,
                "F4",
            ));
        }
    }

    m.validate()?;
    Ok(m)
}

/// Детерминированный блок PVP: время передачи и положение на прямой орбите.
fn synthetic_pvp(m: &Metadata) -> ToolResult<PvpBlock> {
    let mut pvp = PvpBlock::new(m);
    let prf = 1_000.0;

    for (ch, c) in m.channels.iter().enumerate() {
        let n = c.num_vectors;
        let t: Vec<f64> = (0..n).map(|v| v as f64 / prf).collect();
        let pos: Vec<[f64; 3]> = t.iter().map(|t| [7_000_000.0, t * 7_500.0, 0.0]).collect();
        let vel = vec![[0.0, 7_500.0, 0.0]; n];

        pvp.set_column(ch, "TxTime", PvpColumn::F64(t.clone()))?;
        pvp.set_column(ch, "RcvTime", PvpColumn::F64(t.iter().map(|t| t + 4.7e-3).collect()))?;
        pvp.set_column(ch, "TxPos", PvpColumn::Xyz(pos.clone()))?;
        pvp.set_column(ch, "RcvPos", PvpColumn::Xyz(pos))?;
        pvp.set_column(ch, "TxVel", PvpColumn::Xyz(vel.clone()))?;
        pvp.set_column(ch, "RcvVel", PvpColumn::Xyz(vel))?;
        pvp.set_column(ch, "FX1", PvpColumn::F64(vec![9.5e9; n]))?;
        pvp.set_column(ch, "FX2", PvpColumn::F64(vec![9.8e9; n]))?;
        pvp.set_column(ch, "SC0", PvpColumn::F64(vec![9.5e9; n]))?;
        pvp.set_column(ch, "SCSS", PvpColumn::F64(vec![3e8 / c.num_samples as f64; n]))?;
        pvp.set_column(ch, "AmpSF", PvpColumn::F64(vec![1.0; n]))?;
        pvp.set_column(ch, "SIGNAL", PvpColumn::I64(vec![1; n]))?;
    }

    Ok(pvp)
}

fn synthetic_channel(
    format: SignalFormat,
    rows: usize,
    cols: usize,
    rng: &mut StdRng,
) -> SignalArray {
    match format {
        SignalFormat::Ci2 => Array2::from_shape_simple_fn((rows, cols), || {
            Complex::new(rng.gen_range(-64i8..64), rng.gen_range(-64i8..64))
        })
        .into(),
        SignalFormat::Ci4 => Array2::from_shape_simple_fn((rows, cols), || {
            Complex::new(rng.gen_range(-8192i16..8192), rng.gen_range(-8192i16..8192))
        })
        .into(),
        SignalFormat::Cf8 => Array2::from_shape_simple_fn((rows, cols), || {
            Complex::new(rng.gen_range(-1.0f32..1.0), rng.gen_range(-1.0f32..1.0))
        })
        .into(),
    }
}

/// Пишет синтетический файл по `spec`.
pub fn generate<P: AsRef<Path>>(
    path: P,
    spec: &GenerateSpec,
    cfg: &ToolConfig,
) -> ToolResult<MetricsSummary> {
    let m = synthetic_metadata(spec)?;
    let pvp = synthetic_pvp(&m)?;
    let mut rng = StdRng::seed_from_u64(spec.seed);

    let widebands: Vec<SignalArray> = m
        .channels
        .iter()
        .map(|c| synthetic_channel(m.signal_format, c.num_vectors, c.num_samples, &mut rng))
        .collect();

    let support: Vec<SupportArrayData> = m
        .support_arrays
        .iter()
        .map(|s| {
            let gain: Vec<f32> = (0..s.num_rows * s.num_cols)
                .map(|i| {
                    let (r, c) = (i / s.num_cols, i % s.num_cols);
                    let d = (r as f32 - 7.5).hypot(c as f32 - 7.5);
                    (-d * d / 32.0).exp()
                })
                .collect();
            SupportArrayData::from_f32_be(&gain)
        })
        .collect();

    debug!(
        "Generated {} channel(s), {} support array(s)",
        widebands.len(),
        support.len()
    );

    let config = WriterConfig {
        num_threads: cfg.threads,
        schema_paths: Vec::new(),
        block_bytes: cfg.block_bytes,
    };
    let mut writer = CphdWriter::with_config(m, path.as_ref(), config)?;
    writer.write_wideband(&pvp, &widebands, &support)?;

    info!("✓ Generated {:?}", path.as_ref());
    Ok(writer.metrics())
}

////////////////////////////////////////////////////////////////////////////////
// verify
////////////////////////////////////////////////////////////////////////////////

/// Декодирует файл целиком и сверяет размеры с метаданными.
pub fn verify<P: AsRef<Path>>(
    path: P,
    cfg: &ToolConfig,
) -> ToolResult<VerifyReport> {
    let reader = CphdReader::open(path, cfg.scratch_bytes)?;
    let m = reader.metadata()?;

    let channels = reader.read_all(cfg.threads)?;
    for (i, (data, c)) in channels.iter().zip(&m.channels).enumerate() {
        if data.shape() != (c.num_vectors, c.num_samples) {
            return Err(ToolError::VerifyFailed(format!(
                "Channel {i} decoded as {:?}, metadata declares {}x{}",
                data.shape(),
                c.num_vectors,
                c.num_samples
            )));
        }
    }

    let support = reader.support_arrays(cfg.threads)?;
    for (data, desc) in support.iter().zip(&m.support_arrays) {
        data.check_against(desc)?;
    }

    let stats = reader.stats();
    if stats.peak_scratch > stats.scratch_budget {
        return Err(ToolError::VerifyFailed(format!(
            "Scratch peak {} exceeds budget {}",
            stats.peak_scratch, stats.scratch_budget
        )));
    }

    Ok(VerifyReport {
        channels: channels.len(),
        vectors: m.total_vectors(),
        support_arrays: support.len(),
        peak_scratch: stats.peak_scratch,
        scratch_budget: stats.scratch_budget,
        bytes_read: stats.bytes_read,
    })
}

impl std::fmt::Display for VerifyReport {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        writeln!(f, "  Channels       : {}", self.channels)?;
        writeln!(f, "  Vectors        : {}", self.vectors)?;
        writeln!(f, "  Support arrays : {}", self.support_arrays)?;
        writeln!(f, "  Bytes read     : {}", self.bytes_read)?;
        write!(
            f,
            "  Peak scratch   : {} / {} bytes",
            self.peak_scratch, self.scratch_budget
        )
    }
}

////////////////////////////////////////////////////////////////////////////////
// extract
////////////////////////////////////////////////////////////////////////////////

/// Пишет выборки канала (big-endian, построчно) в `out_path`.
///
/// Возвращает количество записанных байт.
pub fn extract<P: AsRef<Path>, Q: AsRef<Path>>(
    path: P,
    channel: usize,
    range: Option<Range<usize>>,
    out_path: Q,
    cfg: &ToolConfig,
) -> ToolResult<u64> {
    let reader = CphdReader::open(path, cfg.scratch_bytes)?;
    let wideband = reader.wideband()?;

    let data = match range {
        Some(r) => wideband.read_vectors(channel, r)?,
        None => wideband.read(channel)?,
    };

    let bytes = data.view().encode();
    let mut out = BufWriter::new(File::create(out_path.as_ref())?);
    out.write_all(&bytes)?;
    out.flush()?;

    info!(
        "✓ Extracted channel {channel} {:?} → {:?}",
        data.shape(),
        out_path.as_ref()
    );
    Ok(bytes.len() as u64)
}
