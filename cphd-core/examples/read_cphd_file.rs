//! Пример: чтение CPHD-файла через CphdReader
//!
//! Демонстрирует:
//! - разбор заголовка и метаданных при открытии
//! - чтение каналов в ограниченном бюджете буферов
//! - чтение опорных массивов на нескольких потоках

use cphd_core::CphdReader;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let input_path = "cphd-core/test_output.cphd";
    let scratch_bytes = 4 * 1024 * 1024;

    let reader = match CphdReader::open(input_path, scratch_bytes) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("✗ Open failed: {e}");
            return Err(Box::new(e));
        }
    };

    let header = reader.file_header()?;
    let metadata = reader.metadata()?;
    println!("✓ Header validated");
    println!("  Version        : {}", header.version);
    println!("  Classification : {}", header.classification);
    println!("  Signal format  : {}", metadata.signal_format);
    println!("  Compression    : {}", metadata.compression);
    println!("  PVP bytes/vec  : {}", metadata.pvp.num_bytes_pvp());

    let channels = reader.read_all(4)?;
    for (c, data) in metadata.channels.iter().zip(&channels) {
        println!("  {:<8} {:?}", c.identifier, data.shape());
    }

    let support = reader.support_arrays(2)?;
    for (s, data) in metadata.support_arrays.iter().zip(&support) {
        println!("  {:<8} {} bytes", s.identifier, data.len());
    }

    let stats = reader.stats();
    println!("\n✓ Read complete");
    println!("  Bytes read     : {}", stats.bytes_read);
    println!(
        "  Peak scratch   : {} / {} bytes",
        stats.peak_scratch, stats.scratch_budget
    );

    Ok(())
}
