//! Чтение и запись файлов CPHD (Compensated Phase History Data)
//!
//! Файл разбит по каналам: метаданные описывают геометрию каналов, блок
//! PVP хранит параметры каждого вектора, сигнальный блок хранит
//! комплексные выборки. Каналы кодируются и декодируются параллельно,
//! каждая задача работает только со своим диапазоном байт.
//!
//! # Быстрый старт
//!
//! ```no_run
//! use cphd_core::{ChannelDescriptor, CphdReader, CphdWriter, Metadata, PvpBlock, SignalArray};
//! use cphd_types::SignalFormat;
//!
//! let metadata = Metadata::new(SignalFormat::Cf8, vec![ChannelDescriptor::new("CH0", 128, 512)]);
//! let pvp = PvpBlock::new(&metadata);
//! let wideband = SignalArray::zeros(SignalFormat::Cf8, 128, 512);
//!
//! let mut writer = CphdWriter::new(metadata, "phd.cphd", vec![], 4)?;
//! writer.write_wideband(&pvp, &[wideband], &[])?;
//!
//! let reader = CphdReader::open("phd.cphd", 16 * 1024 * 1024)?;
//! let channel = reader.wideband()?.read(0)?;
//! assert_eq!(channel.shape(), (128, 512));
//! # Ok::<(), cphd_types::CphdError>(())
//! ```

pub mod binary;
pub mod format;
pub mod layout;
pub mod metadata;
pub mod metrics;
pub mod pool;
pub mod pvp;
pub mod reader;
pub mod scratch;
pub mod signal;
pub mod support;
pub mod writer;

pub use format::*;
pub use layout::*;
pub use metadata::*;
pub use metrics::*;
pub use pool::*;
pub use pvp::*;
pub use reader::*;
pub use scratch::*;
pub use signal::*;
pub use support::*;
pub use writer::*;

/// Версия библиотеки.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_exports() {
        assert_eq!(CPHD_VERSION, "1.0");
        assert_eq!(SECTION_END, [0x0C, b'\n']);
        assert!(!VERSION.is_empty());
    }
}
