//! Позиционный ввод/вывод.
//!
//! Задачи каналов читают и пишут непересекающиеся диапазоны одного файла
//! без общего курсора, поэтому блокировка файла не нужна.

pub mod read;
pub mod write;

pub use read::*;
pub use write::*;
