//! Сигнальные массивы каналов (wideband).
//!
//! Канал хранится как двумерный массив `(num_vectors, num_samples)`
//! комплексных выборок. На диске выборки записаны построчно, компоненты
//! I и Q подряд в big-endian.

use std::ops::Range;

use byteorder::{BigEndian, ByteOrder};
use cphd_types::{CphdError, CphdResult, SignalFormat};
use ndarray::{s, Array2, ArrayView2};
use num_complex::Complex;

/// Сигнальный массив одного канала.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalArray {
    Ci2(Array2<Complex<i8>>),
    Ci4(Array2<Complex<i16>>),
    Cf8(Array2<Complex<f32>>),
}

/// Заимствованное представление сигнального массива.
#[derive(Debug, Clone)]
pub enum SignalView<'a> {
    Ci2(ArrayView2<'a, Complex<i8>>),
    Ci4(ArrayView2<'a, Complex<i16>>),
    Cf8(ArrayView2<'a, Complex<f32>>),
}

impl SignalArray {
    /// Массив из нулей заданного формата и формы.
    pub fn zeros(
        format: SignalFormat,
        num_vectors: usize,
        num_samples: usize,
    ) -> Self {
        let shape = (num_vectors, num_samples);

        match format {
            SignalFormat::Ci2 => SignalArray::Ci2(Array2::zeros(shape)),
            SignalFormat::Ci4 => SignalArray::Ci4(Array2::zeros(shape)),
            SignalFormat::Cf8 => SignalArray::Cf8(Array2::zeros(shape)),
        }
    }

    pub fn format(&self) -> SignalFormat {
        match self {
            SignalArray::Ci2(_) => SignalFormat::Ci2,
            SignalArray::Ci4(_) => SignalFormat::Ci4,
            SignalArray::Cf8(_) => SignalFormat::Cf8,
        }
    }

    /// Форма `(num_vectors, num_samples)`
    pub fn shape(&self) -> (usize, usize) {
        match self {
            SignalArray::Ci2(a) => a.dim(),
            SignalArray::Ci4(a) => a.dim(),
            SignalArray::Cf8(a) => a.dim(),
        }
    }

    pub fn num_vectors(&self) -> usize {
        self.shape().0
    }

    pub fn num_samples(&self) -> usize {
        self.shape().1
    }

    pub fn view(&self) -> SignalView<'_> {
        match self {
            SignalArray::Ci2(a) => SignalView::Ci2(a.view()),
            SignalArray::Ci4(a) => SignalView::Ci4(a.view()),
            SignalArray::Cf8(a) => SignalView::Cf8(a.view()),
        }
    }

    /// Разрезает вертикально склеенный массив на блоки строк заданной длины.
    pub fn split_rows(
        &self,
        counts: &[usize],
    ) -> CphdResult<Vec<SignalView<'_>>> {
        let total: usize = counts.iter().sum();
        if total != self.num_vectors() {
            return Err(CphdError::DimensionMismatch {
                channel: 0,
                what: "total vectors",
                expected: total,
                found: self.num_vectors(),
            });
        }

        let view = self.view();
        let mut start = 0;

        Ok(counts
            .iter()
            .map(|&n| {
                let rows = view.rows(start..start + n);
                start += n;
                rows
            })
            .collect())
    }

    /// Декодирует строки `[first_row, first_row + bytes / row_bytes)` из
    /// big-endian байтов.
    pub fn decode_rows_into(
        &mut self,
        first_row: usize,
        bytes: &[u8],
    ) -> CphdResult<()> {
        let (num_vectors, num_samples) = self.shape();
        let row_bytes = num_samples * self.format().sample_size();

        if row_bytes == 0 || bytes.len() % row_bytes != 0 {
            return Err(CphdError::format(format!(
                "{} bytes is not a whole number of {row_bytes}-byte vectors",
                bytes.len()
            )));
        }

        let rows = bytes.len() / row_bytes;
        if first_row + rows > num_vectors {
            return Err(CphdError::format(format!(
                "Vectors {first_row}..{} exceed array of {num_vectors}",
                first_row + rows
            )));
        }

        let range = first_row..first_row + rows;

        match self {
            SignalArray::Ci2(a) => {
                for (c, b) in a.slice_mut(s![range, ..]).iter_mut().zip(bytes.chunks_exact(2)) {
                    *c = Complex::new(b[0] as i8, b[1] as i8);
                }
            }
            SignalArray::Ci4(a) => {
                for (c, b) in a.slice_mut(s![range, ..]).iter_mut().zip(bytes.chunks_exact(4)) {
                    *c = Complex::new(BigEndian::read_i16(&b[0..2]), BigEndian::read_i16(&b[2..4]));
                }
            }
            SignalArray::Cf8(a) => {
                for (c, b) in a.slice_mut(s![range, ..]).iter_mut().zip(bytes.chunks_exact(8)) {
                    *c = Complex::new(BigEndian::read_f32(&b[0..4]), BigEndian::read_f32(&b[4..8]));
                }
            }
        }

        Ok(())
    }

    /// Декодирует массив целиком.
    pub fn decode(
        format: SignalFormat,
        num_vectors: usize,
        num_samples: usize,
        bytes: &[u8],
    ) -> CphdResult<Self> {
        let expected = num_vectors * num_samples * format.sample_size();
        if bytes.len() != expected {
            return Err(CphdError::format(format!(
                "Signal array is {} bytes, expected {expected}",
                bytes.len()
            )));
        }

        let mut array = Self::zeros(format, num_vectors, num_samples);
        array.decode_rows_into(0, bytes)?;
        Ok(array)
    }

    pub fn as_ci2(&self) -> Option<&Array2<Complex<i8>>> {
        match self {
            SignalArray::Ci2(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_ci4(&self) -> Option<&Array2<Complex<i16>>> {
        match self {
            SignalArray::Ci4(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_cf8(&self) -> Option<&Array2<Complex<f32>>> {
        match self {
            SignalArray::Cf8(a) => Some(a),
            _ => None,
        }
    }
}

impl From<Array2<Complex<i8>>> for SignalArray {
    fn from(a: Array2<Complex<i8>>) -> Self {
        SignalArray::Ci2(a)
    }
}

impl From<Array2<Complex<i16>>> for SignalArray {
    fn from(a: Array2<Complex<i16>>) -> Self {
        SignalArray::Ci4(a)
    }
}

impl From<Array2<Complex<f32>>> for SignalArray {
    fn from(a: Array2<Complex<f32>>) -> Self {
        SignalArray::Cf8(a)
    }
}

impl<'a> SignalView<'a> {
    pub fn format(&self) -> SignalFormat {
        match self {
            SignalView::Ci2(_) => SignalFormat::Ci2,
            SignalView::Ci4(_) => SignalFormat::Ci4,
            SignalView::Cf8(_) => SignalFormat::Cf8,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        match self {
            SignalView::Ci2(a) => a.dim(),
            SignalView::Ci4(a) => a.dim(),
            SignalView::Cf8(a) => a.dim(),
        }
    }

    pub fn num_vectors(&self) -> usize {
        self.shape().0
    }

    /// Строки `range` как новое представление с тем же временем жизни.
    pub fn rows(
        &self,
        range: Range<usize>,
    ) -> SignalView<'a> {
        match self {
            SignalView::Ci2(a) => SignalView::Ci2(a.clone().slice_move(s![range, ..])),
            SignalView::Ci4(a) => SignalView::Ci4(a.clone().slice_move(s![range, ..])),
            SignalView::Cf8(a) => SignalView::Cf8(a.clone().slice_move(s![range, ..])),
        }
    }

    /// Размер представления на диске.
    pub fn encoded_len(&self) -> usize {
        let (rows, cols) = self.shape();
        rows * cols * self.format().sample_size()
    }

    /// Кодирует выборки построчно в `out` (длина равна [`encoded_len`]).
    ///
    /// [`encoded_len`]: SignalView::encoded_len
    pub fn encode_into(
        &self,
        out: &mut [u8],
    ) -> CphdResult<()> {
        if out.len() != self.encoded_len() {
            return Err(CphdError::format(format!(
                "Output buffer is {} bytes, expected {}",
                out.len(),
                self.encoded_len()
            )));
        }

        self.write_samples(out);
        Ok(())
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.encoded_len()];
        self.write_samples(&mut buf);
        buf
    }

    /// `out` уже имеет длину [`SignalView::encoded_len`].
    fn write_samples(
        &self,
        out: &mut [u8],
    ) {
        match self {
            SignalView::Ci2(a) => {
                for (c, b) in a.iter().zip(out.chunks_exact_mut(2)) {
                    b[0] = c.re as u8;
                    b[1] = c.im as u8;
                }
            }
            SignalView::Ci4(a) => {
                for (c, b) in a.iter().zip(out.chunks_exact_mut(4)) {
                    BigEndian::write_i16(&mut b[0..2], c.re);
                    BigEndian::write_i16(&mut b[2..4], c.im);
                }
            }
            SignalView::Cf8(a) => {
                for (c, b) in a.iter().zip(out.chunks_exact_mut(8)) {
                    BigEndian::write_f32(&mut b[0..4], c.re);
                    BigEndian::write_f32(&mut b[4..8], c.im);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(
        rows: usize,
        cols: usize,
    ) -> Array2<Complex<f32>> {
        Array2::from_shape_fn((rows, cols), |(r, c)| {
            Complex::new(r as f32 + c as f32 * 0.5, -(r as f32))
        })
    }

    #[test]
    fn test_cf8_byte_order() {
        let a = SignalArray::from(Array2::from_elem((1, 1), Complex::new(1.0f32, -2.0)));
        let bytes = a.view().encode();

        assert_eq!(&bytes[0..4], &1.0f32.to_be_bytes());
        assert_eq!(&bytes[4..8], &(-2.0f32).to_be_bytes());
    }

    #[test]
    fn test_encode_into_matches_encode() {
        let a = SignalArray::from(Array2::from_shape_fn((2, 3), |(r, c)| {
            Complex::new(r as i16, c as i16 * -3)
        }));
        let view = a.view();

        let mut buf = vec![0u8; view.encoded_len()];
        view.encode_into(&mut buf).unwrap();
        assert_eq!(buf, view.encode());

        let mut short = vec![0u8; view.encoded_len() - 1];
        assert!(view.encode_into(&mut short).is_err());
    }

    #[test]
    fn test_ci2_ci4_round_trip() {
        let ci2 = SignalArray::from(Array2::from_shape_fn((3, 5), |(r, c)| {
            Complex::new(r as i8 - 2, -(c as i8) * 20)
        }));
        let back = SignalArray::decode(SignalFormat::Ci2, 3, 5, &ci2.view().encode()).unwrap();
        assert_eq!(back, ci2);

        let ci4 = SignalArray::from(Array2::from_shape_fn((2, 4), |(r, c)| {
            Complex::new(r as i16 * 1000 - 30000, c as i16 * -7)
        }));
        let back = SignalArray::decode(SignalFormat::Ci4, 2, 4, &ci4.view().encode()).unwrap();
        assert_eq!(back, ci4);
    }

    #[test]
    fn test_decode_rows_into_partial() {
        let src = SignalArray::from(ramp(6, 3));
        let bytes = src.view().rows(2..5).encode();

        let mut dst = SignalArray::zeros(SignalFormat::Cf8, 6, 3);
        dst.decode_rows_into(2, &bytes).unwrap();

        let d = dst.as_cf8().unwrap();
        let s = src.as_cf8().unwrap();
        assert_eq!(d.row(3), s.row(3));
        assert_eq!(d[[0, 1]], Complex::new(0.0, 0.0));
        assert!(dst.decode_rows_into(5, &bytes).is_err());
        assert!(dst.decode_rows_into(0, &bytes[..5]).is_err());
    }

    #[test]
    fn test_split_rows_matches_parts() {
        let stacked = SignalArray::from(ramp(7, 4));
        let parts = stacked.split_rows(&[3, 4]).unwrap();

        assert_eq!(parts[0].shape(), (3, 4));
        assert_eq!(parts[1].shape(), (4, 4));
        assert_eq!(parts[1].encode(), stacked.view().rows(3..7).encode());
        assert!(stacked.split_rows(&[3, 3]).is_err());
    }

    #[test]
    fn test_non_contiguous_view_encodes_logically() {
        let a = ramp(4, 4);
        let t = a.t().to_owned();
        let reversed = t.t();

        let expected = SignalArray::from(a.clone()).view().encode();
        assert_eq!(SignalView::Cf8(reversed).encode(), expected);
    }
}
