//! Predictor file codec.
//!
//! Layout: magic `PCPR`, version, feature dimension, weight vector, bias.

use super::{
    at_eof, read_f32, read_f32_vec, read_u16, read_u32, write_f32, write_f32_slice, write_u16,
    write_u32, FORMAT_VERSION, PREDICTOR_MAGIC,
};
use crate::error::{PercibirError, Result};
use crate::linear::Predictor;
use crate::primitives::Vector;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Upper bound on the stored feature dimension.
pub const MAX_PREDICTOR_DIMENSION: usize = 1 << 24;

/// Maps stream errors to the predictor-file taxonomy.
fn corrupt(err: io::Error) -> PercibirError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        PercibirError::corrupt_file("file ends before the declared weights do")
    } else {
        PercibirError::Io(err)
    }
}

fn write_failure(err: io::Error) -> PercibirError {
    PercibirError::WriteFailure {
        message: err.to_string(),
    }
}

/// Loads a predictor file.
///
/// # Errors
///
/// [`PercibirError::CorruptFile`] or I/O errors.
pub fn read_file<P: AsRef<Path>>(path: P) -> Result<Predictor> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    decode(&mut reader)
}

/// Writes a predictor file.
///
/// # Errors
///
/// [`PercibirError::WriteFailure`] if creating or writing the file fails.
pub fn write_file<P: AsRef<Path>>(predictor: &Predictor, path: P) -> Result<()> {
    let file = File::create(path).map_err(write_failure)?;
    let mut writer = BufWriter::new(file);
    encode(predictor, &mut writer).map_err(write_failure)?;
    writer.flush().map_err(write_failure)
}

/// Decodes a predictor from a byte stream.
///
/// # Errors
///
/// [`PercibirError::CorruptFile`] on malformed records or an unknown
/// version.
pub fn decode<R: Read>(reader: &mut R) -> Result<Predictor> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic).map_err(corrupt)?;
    if magic != PREDICTOR_MAGIC {
        return Err(PercibirError::corrupt_file(format!(
            "bad magic number {magic:02X?}, expected PCPR"
        )));
    }
    let version = read_u16(reader).map_err(corrupt)?;
    if version != FORMAT_VERSION {
        return Err(PercibirError::corrupt_file(format!(
            "unsupported predictor version {version}, max supported {FORMAT_VERSION}"
        )));
    }
    let dimension = read_u32(reader).map_err(corrupt)? as usize;
    if dimension == 0 || dimension > MAX_PREDICTOR_DIMENSION {
        return Err(PercibirError::corrupt_file(format!(
            "feature dimension {dimension} is outside 1..={MAX_PREDICTOR_DIMENSION}"
        )));
    }
    let weights = read_f32_vec(reader, dimension).map_err(corrupt)?;
    let bias = read_f32(reader).map_err(corrupt)?;
    if !at_eof(reader).map_err(corrupt)? {
        return Err(PercibirError::corrupt_file(
            "trailing bytes after the bias scalar",
        ));
    }
    Ok(Predictor::from_parts(Vector::from_vec(weights), bias))
}

/// Encodes a predictor to a byte stream.
///
/// # Errors
///
/// Propagates I/O errors from the writer.
pub fn encode<W: Write>(predictor: &Predictor, writer: &mut W) -> io::Result<()> {
    writer.write_all(&PREDICTOR_MAGIC)?;
    write_u16(writer, FORMAT_VERSION)?;
    write_u32(writer, predictor.dimension() as u32)?;
    write_f32_slice(writer, predictor.weights().as_slice())?;
    write_f32(writer, predictor.bias())
}
