pub mod compression;
pub mod error;
pub mod pvp_format;
pub mod signal_format;

pub use compression::*;
pub use error::*;
pub use pvp_format::*;
pub use signal_format::*;
