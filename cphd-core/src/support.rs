use byteorder::{BigEndian, ByteOrder};
use cphd_types::{CphdError, CphdResult};

use crate::metadata::SupportArrayDescriptor;

/// Опорный массив: байты без интерпретации.
///
/// Форма и размер элемента берутся из [`SupportArrayDescriptor`];
/// типизированное чтение выполняет вызывающая сторона.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SupportArrayData {
    bytes: Vec<u8>,
}

impl SupportArrayData {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Массив из f32 в big-endian.
    pub fn from_f32_be(values: &[f32]) -> Self {
        let mut bytes = vec![0u8; values.len() * 4];
        BigEndian::write_f32_into(values, &mut bytes);
        Self { bytes }
    }

    /// Массив из f64 в big-endian.
    pub fn from_f64_be(values: &[f64]) -> Self {
        let mut bytes = vec![0u8; values.len() * 8];
        BigEndian::write_f64_into(values, &mut bytes);
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn to_f32_be(&self) -> CphdResult<Vec<f32>> {
        if self.bytes.len() % 4 != 0 {
            return Err(CphdError::format(format!(
                "{} bytes is not a whole number of f32 values",
                self.bytes.len()
            )));
        }

        let mut out = vec![0.0f32; self.bytes.len() / 4];
        BigEndian::read_f32_into(&self.bytes, &mut out);
        Ok(out)
    }

    pub fn to_f64_be(&self) -> CphdResult<Vec<f64>> {
        if self.bytes.len() % 8 != 0 {
            return Err(CphdError::format(format!(
                "{} bytes is not a whole number of f64 values",
                self.bytes.len()
            )));
        }

        let mut out = vec![0.0f64; self.bytes.len() / 8];
        BigEndian::read_f64_into(&self.bytes, &mut out);
        Ok(out)
    }

    /// Проверяет размер по описанию из метаданных.
    pub fn check_against(
        &self,
        descriptor: &SupportArrayDescriptor,
    ) -> CphdResult<()> {
        let expected = descriptor.size_bytes();

        if self.bytes.len() != expected {
            return Err(CphdError::schema(format!(
                "Support array '{}' is {} bytes, expected {expected} ({}×{}×{})",
                descriptor.identifier,
                self.bytes.len(),
                descriptor.num_rows,
                descriptor.num_cols,
                descriptor.bytes_per_element
            )));
        }

        Ok(())
    }
}

impl From<Vec<u8>> for SupportArrayData {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_views() {
        let values = [1.0f32, -0.5, 3.25, 0.0];
        let data = SupportArrayData::from_f32_be(&values);

        assert_eq!(data.as_bytes()[0..4], 1.0f32.to_be_bytes());
        assert_eq!(data.to_f32_be().unwrap(), values);
        assert_eq!(data.to_f64_be().unwrap().len(), 2);

        let odd = SupportArrayData::new(vec![0; 6]);
        assert!(odd.to_f32_be().is_err());
        assert!(odd.to_f64_be().is_err());
    }

    #[test]
    fn test_check_against_descriptor() {
        let desc = SupportArrayDescriptor::new("Gain", 2, 2, 8, "F8");

        SupportArrayData::from_f64_be(&[1.0, 2.0, 3.0, 4.0])
            .check_against(&desc)
            .unwrap();

        let err = SupportArrayData::from_f32_be(&[1.0; 4])
            .check_against(&desc)
            .unwrap_err();
        assert!(err.to_string().contains("Gain"));
    }
}
