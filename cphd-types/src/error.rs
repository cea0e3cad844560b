use thiserror::Error;

/// Результат для операций CPHD
pub type CphdResult<T> = std::result::Result<T, CphdError>;

/// Типы ошибок чтения/записи CPHD.
#[derive(Debug, Error)]
pub enum CphdError {
    /// Размеры переданного массива не совпадают с метаданными
    #[error("Dimension mismatch in channel {channel}: {what} expected {expected}, found {found}")]
    DimensionMismatch {
        channel: usize,
        what: &'static str,
        expected: usize,
        found: usize,
    },

    /// Набор PVP параметров или самосогласованность метаданных нарушены
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Повреждённый или усечённый файл
    #[error("Format error: {0}")]
    Format(String),

    /// Несовместимая версия формата
    #[error("Unsupported version: found {found}, expected {expected}")]
    UnsupportedVersion {
        found: String,
        expected: &'static str,
    },

    /// Несовпадение CRC32 (ожидалось/найдено)
    #[error("CRC mismatch: expected {expected:08x}, found {found:08x}")]
    CrcMismatch { expected: u32, found: u32 },

    /// Ошибки ввода/вывода (автоконвертируются из std::io::Error)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Ошибка ввода/вывода внутри задачи конкретного канала
    #[error("I/O error in channel {channel}: {source}")]
    ChannelIo {
        channel: usize,
        #[source]
        source: std::io::Error,
    },

    /// Ошибка кодирования канала
    #[error("Encode error in channel {channel}: {reason}")]
    Encode { channel: usize, reason: String },

    /// Ошибка декодирования канала
    #[error("Decode error in channel {channel}: {reason}")]
    Decode { channel: usize, reason: String },

    /// Некорректная конфигурация читателя/писателя
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Операция после `close()`
    #[error("{0} is closed")]
    Closed(&'static str),
}

impl CphdError {
    /// Удобные конструкторы
    pub fn format<S: Into<String>>(s: S) -> Self {
        Self::Format(s.into())
    }

    pub fn schema<S: Into<String>>(s: S) -> Self {
        Self::SchemaMismatch(s.into())
    }

    pub fn config<S: Into<String>>(s: S) -> Self {
        Self::Config(s.into())
    }

    pub fn encode<S: Into<String>>(
        channel: usize,
        reason: S,
    ) -> Self {
        Self::Encode {
            channel,
            reason: reason.into(),
        }
    }

    pub fn decode<S: Into<String>>(
        channel: usize,
        reason: S,
    ) -> Self {
        Self::Decode {
            channel,
            reason: reason.into(),
        }
    }

    /// Привязывает ошибку I/O к каналу, остальные ошибки не меняются.
    pub fn in_channel(
        self,
        channel: usize,
    ) -> Self {
        match self {
            Self::Io(source) => Self::ChannelIo { channel, source },
            other => other,
        }
    }

    /// `true` для повреждённых, усечённых и несовместимых файлов.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            Self::Format(_) | Self::CrcMismatch { .. } | Self::UnsupportedVersion { .. }
        )
    }

    /// Индекс канала, если ошибка относится к задаче канала.
    pub fn channel(&self) -> Option<usize> {
        match self {
            Self::DimensionMismatch { channel, .. }
            | Self::ChannelIo { channel, .. }
            | Self::Encode { channel, .. }
            | Self::Decode { channel, .. } => Some(*channel),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_channel_wraps_io_only() {
        let io = CphdError::Io(std::io::Error::other("disk full"));
        let wrapped = io.in_channel(3);

        assert!(matches!(wrapped, CphdError::ChannelIo { channel: 3, .. }));
        assert_eq!(wrapped.channel(), Some(3));
        assert!(wrapped.to_string().contains("disk full"));

        let enc = CphdError::encode(1, "bad").in_channel(7);
        assert_eq!(enc.channel(), Some(1));
    }

    #[test]
    fn test_format_error_grouping() {
        assert!(CphdError::format("truncated").is_format_error());
        assert!(CphdError::CrcMismatch {
            expected: 1,
            found: 2
        }
        .is_format_error());
        assert!(!CphdError::schema("x").is_format_error());
        assert!(!CphdError::Closed("reader").is_format_error());
    }

    #[test]
    fn test_dimension_mismatch_message() {
        let e = CphdError::DimensionMismatch {
            channel: 2,
            what: "num_vectors",
            expected: 10,
            found: 9,
        };
        let msg = e.to_string();

        assert!(msg.contains("channel 2"));
        assert!(msg.contains("num_vectors"));
    }
}
