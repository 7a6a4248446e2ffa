//! Binary wire formats.
//!
//! Two artifacts define compatibility: the network model file
//! ([`network`], magic `PCNN`) and the predictor file ([`predictor`],
//! magic `PCPR`). Both are little-endian streams of fixed records; both
//! loaders reject bad magic, unknown versions, declared shapes that don't
//! match their payloads, and trailing bytes.

pub mod network;
pub mod predictor;

use std::io::{self, Read, Write};

/// Magic number for network model files (`PCNN`).
pub const NETWORK_MAGIC: [u8; 4] = *b"PCNN";

/// Magic number for predictor files (`PCPR`).
pub const PREDICTOR_MAGIC: [u8; 4] = *b"PCPR";

/// Current version of both formats.
pub const FORMAT_VERSION: u16 = 1;

/// Upper bound on a single tensor's element count; a corrupt length
/// field must not turn into a multi-gigabyte allocation.
pub const MAX_TENSOR_ELEMENTS: usize = 1 << 27;

/// Upper bound on label-string length in bytes.
pub const MAX_LABEL_BYTES: usize = 4096;

/// Layer kind tags in the network file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LayerKind {
    /// Convolution with bias
    Conv = 0x01,
    /// Grouped convolution with bias
    GroupedConv = 0x02,
    /// Max pooling
    Pool = 0x03,
    /// Fully connected with bias
    Dense = 0x04,
    /// Elementwise max(0, x)
    Relu = 0x05,
    /// Local response normalization
    Normalize = 0x06,
    /// Spatial collapse to (images, units)
    Flatten = 0x07,
    /// Inference-time identity
    Dropout = 0x08,
    /// Row-wise softmax
    Softmax = 0x09,
}

impl LayerKind {
    /// Convert from the on-disk u8 tag.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Conv),
            0x02 => Some(Self::GroupedConv),
            0x03 => Some(Self::Pool),
            0x04 => Some(Self::Dense),
            0x05 => Some(Self::Relu),
            0x06 => Some(Self::Normalize),
            0x07 => Some(Self::Flatten),
            0x08 => Some(Self::Dropout),
            0x09 => Some(Self::Softmax),
            _ => None,
        }
    }
}

pub(crate) fn read_u8<R: Read>(reader: &mut R) -> io::Result<u8> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf)?;
    Ok(buf[0])
}

pub(crate) fn read_u16<R: Read>(reader: &mut R) -> io::Result<u16> {
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

pub(crate) fn read_u32<R: Read>(reader: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

pub(crate) fn read_f32<R: Read>(reader: &mut R) -> io::Result<f32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(f32::from_le_bytes(buf))
}

pub(crate) fn read_f32_vec<R: Read>(reader: &mut R, count: usize) -> io::Result<Vec<f32>> {
    let mut bytes = vec![0u8; count * 4];
    reader.read_exact(&mut bytes)?;
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

pub(crate) fn write_u8<W: Write>(writer: &mut W, value: u8) -> io::Result<()> {
    writer.write_all(&[value])
}

pub(crate) fn write_u16<W: Write>(writer: &mut W, value: u16) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

pub(crate) fn write_u32<W: Write>(writer: &mut W, value: u32) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

pub(crate) fn write_f32<W: Write>(writer: &mut W, value: f32) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

pub(crate) fn write_f32_slice<W: Write>(writer: &mut W, values: &[f32]) -> io::Result<()> {
    for &value in values {
        writer.write_all(&value.to_le_bytes())?;
    }
    Ok(())
}

/// True if the stream is exhausted; a well-formed file ends exactly where
/// the last record does.
pub(crate) fn at_eof<R: Read>(reader: &mut R) -> io::Result<bool> {
    let mut buf = [0u8; 1];
    match reader.read(&mut buf)? {
        0 => Ok(true),
        _ => Ok(false),
    }
}
