//! Пример: запись CPHD-файла через CphdWriter
//!
//! Демонстрирует:
//! - описание каналов и расширение стандартного набора PVP
//! - построение блока PVP из построчных записей
//! - параллельную запись каналов со сжатием LZ4

use cphd_core::{
    ChannelDescriptor, CphdWriter, Metadata, PvpBlock, PvpRecord, PvpValue, SignalArray,
    SupportArrayData, SupportArrayDescriptor,
};
use cphd_types::{Compression, PvpFormat, SignalFormat};
use ndarray::Array2;
use num_complex::Complex;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let output_path = "cphd-core/test_output.cphd";

    let mut metadata = Metadata::new(
        SignalFormat::Cf8,
        vec![
            ChannelDescriptor::new("CH0", 256, 1024).with_support_array("AntGain"),
            ChannelDescriptor::new("CH1", 128, 512),
        ],
    );
    metadata.compression = Compression::Lz4;
    metadata.collection.core_name = "EXAMPLE_0001".to_string();
    metadata.pvp.push("SIGNAL", PvpFormat::I8)?;
    metadata
        .support_arrays
        .push(SupportArrayDescriptor::new("AntGain", 32, 32, 4, "F4"));

    // --- PVP: одна запись на вектор ---
    let prf = 1_000.0;
    let records: Vec<Vec<PvpRecord>> = metadata
        .channels
        .iter()
        .map(|c| {
            (0..c.num_vectors)
                .map(|v| {
                    let t = v as f64 / prf;
                    metadata
                        .pvp
                        .params()
                        .iter()
                        .map(|p| {
                            let value = match p.format {
                                PvpFormat::Xyz => PvpValue::Xyz([7_000_000.0, t * 7_500.0, 0.0]),
                                PvpFormat::I8 => PvpValue::I64(1),
                                PvpFormat::U8 => PvpValue::U64(v as u64),
                                PvpFormat::Str(_) => PvpValue::Str(String::new()),
                                PvpFormat::F8 => PvpValue::F64(t),
                            };
                            (p.name.clone(), value)
                        })
                        .collect()
                })
                .collect()
        })
        .collect();
    let pvp = PvpBlock::from_records(&records, &metadata)?;

    // --- Сигнал: линейная частотная модуляция ---
    let widebands: Vec<SignalArray> = metadata
        .channels
        .iter()
        .map(|c| {
            let n = c.num_samples as f32;
            SignalArray::from(Array2::from_shape_fn((c.num_vectors, c.num_samples), |(_, s)| {
                let x = s as f32 / n - 0.5;
                Complex::from_polar(1.0, std::f32::consts::PI * 200.0 * x * x)
            }))
        })
        .collect();

    let gain: Vec<f32> = (0..32 * 32).map(|i| 1.0 - (i % 32) as f32 / 64.0).collect();
    let support = vec![SupportArrayData::from_f32_be(&gain)];

    let mut writer = CphdWriter::new(metadata, output_path, vec![], 4)?;
    writer.write_wideband(&pvp, &widebands, &support)?;

    println!("✓ Written {output_path}");
    println!("{}", writer.metrics());

    Ok(())
}
