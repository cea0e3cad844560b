use thiserror::Error;

pub type ToolResult<T> = std::result::Result<T, ToolError>;

#[derive(Debug, Error)]
pub enum ToolError {
    /// Ошибка чтения/записи CPHD
    #[error("CPHD error: {0}")]
    Cphd(#[from] cphd_types::CphdError),

    /// Ошибка ввода/вывода вне CPHD файла
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Ошибка вывода JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Некорректный аргумент командной строки
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Файл прочитан, но проверка не пройдена
    #[error("Verification failed: {0}")]
    VerifyFailed(String),
}

impl ToolError {
    pub fn invalid<S: Into<String>>(s: S) -> Self {
        Self::InvalidArgument(s.into())
    }
}
