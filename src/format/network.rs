//! Network model file codec.
//!
//! Layout: magic, version, layer count, input geometry, mean tensor, one
//! tagged record per layer, label table. See the module docs in
//! [`crate::format`] for the shared conventions.

use super::{
    at_eof, read_f32, read_f32_vec, read_u16, read_u32, read_u8, write_f32, write_f32_slice,
    write_u16, write_u32, write_u8, LayerKind, FORMAT_VERSION, MAX_LABEL_BYTES,
    MAX_TENSOR_ELEMENTS, NETWORK_MAGIC,
};
use crate::error::{PercibirError, Result};
use crate::net::{Conv, Dense, GroupedConv, InputGeometry, Layer, Network, Normalize, Pool};
use crate::primitives::{Tensor, Vector};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Maps stream errors to the model-file taxonomy: truncation is a corrupt
/// file, everything else is I/O.
fn corrupt(err: io::Error) -> PercibirError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        PercibirError::corrupt_model("file ends before the declared records do")
    } else {
        PercibirError::Io(err)
    }
}

fn write_failure(err: io::Error) -> PercibirError {
    PercibirError::WriteFailure {
        message: err.to_string(),
    }
}

/// Loads a network model file.
///
/// # Errors
///
/// [`PercibirError::CorruptModel`], [`PercibirError::UnsupportedVersion`],
/// or I/O errors.
pub fn read_file<P: AsRef<Path>>(path: P) -> Result<Network> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    decode(&mut reader)
}

/// Writes a network model file.
///
/// # Errors
///
/// [`PercibirError::WriteFailure`] if creating or writing the file fails.
pub fn write_file<P: AsRef<Path>>(network: &Network, path: P) -> Result<()> {
    let file = File::create(path).map_err(write_failure)?;
    let mut writer = BufWriter::new(file);
    encode(network, &mut writer).map_err(write_failure)?;
    writer.flush().map_err(write_failure)
}

/// Decodes a network from a byte stream.
///
/// # Errors
///
/// [`PercibirError::CorruptModel`] on malformed records,
/// [`PercibirError::UnsupportedVersion`] on an unknown version.
pub fn decode<R: Read>(reader: &mut R) -> Result<Network> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic).map_err(corrupt)?;
    if magic != NETWORK_MAGIC {
        return Err(PercibirError::corrupt_model(format!(
            "bad magic number {magic:02X?}, expected PCNN"
        )));
    }
    let version = read_u16(reader).map_err(corrupt)?;
    if version != FORMAT_VERSION {
        return Err(PercibirError::UnsupportedVersion {
            found: version,
            supported: FORMAT_VERSION,
        });
    }
    let layer_count = read_u16(reader).map_err(corrupt)? as usize;

    let geometry = InputGeometry {
        rescaled_size: read_u32(reader).map_err(corrupt)? as usize,
        input_size: read_u32(reader).map_err(corrupt)? as usize,
        channels: read_u32(reader).map_err(corrupt)? as usize,
    };
    let mean = read_tensor(reader)?;

    let mut layers = Vec::with_capacity(layer_count);
    for _ in 0..layer_count {
        layers.push(read_layer(reader)?);
    }

    let label_count = read_u32(reader).map_err(corrupt)? as usize;
    let mut labels = Vec::with_capacity(label_count);
    for _ in 0..label_count {
        labels.push(read_label(reader)?);
    }

    if !at_eof(reader).map_err(corrupt)? {
        return Err(PercibirError::corrupt_model(
            "trailing bytes after the label table",
        ));
    }

    Network::from_parts(geometry, mean, layers, labels)
}

/// Encodes a network to a byte stream.
///
/// # Errors
///
/// Propagates I/O errors from the writer.
pub fn encode<W: Write>(network: &Network, writer: &mut W) -> io::Result<()> {
    writer.write_all(&NETWORK_MAGIC)?;
    write_u16(writer, FORMAT_VERSION)?;
    write_u16(writer, network.layers().len() as u16)?;

    let geometry = network.geometry();
    write_u32(writer, geometry.rescaled_size as u32)?;
    write_u32(writer, geometry.input_size as u32)?;
    write_u32(writer, geometry.channels as u32)?;
    write_tensor(writer, network.mean())?;

    for layer in network.layers() {
        write_layer(writer, layer)?;
    }

    write_u32(writer, network.labels().len() as u32)?;
    for label in network.labels() {
        write_u32(writer, label.len() as u32)?;
        writer.write_all(label.as_bytes())?;
    }
    Ok(())
}

fn read_layer<R: Read>(reader: &mut R) -> Result<Layer> {
    let tag = read_u8(reader).map_err(corrupt)?;
    let kind = LayerKind::from_u8(tag)
        .ok_or_else(|| PercibirError::corrupt_model(format!("unknown layer kind 0x{tag:02X}")))?;
    match kind {
        LayerKind::Conv => {
            let kernel_size = read_u32(reader).map_err(corrupt)? as usize;
            let stride = read_u32(reader).map_err(corrupt)? as usize;
            let margin = read_u32(reader).map_err(corrupt)? as usize;
            let kernels = read_tensor(reader)?;
            let bias = read_bias(reader)?;
            Ok(Layer::Conv(Conv::new(
                kernels,
                bias,
                kernel_size,
                stride,
                margin,
            )?))
        }
        LayerKind::GroupedConv => {
            let kernel_size = read_u32(reader).map_err(corrupt)? as usize;
            let stride = read_u32(reader).map_err(corrupt)? as usize;
            let margin = read_u32(reader).map_err(corrupt)? as usize;
            let kernels = read_tensor(reader)?;
            let bias = read_bias(reader)?;
            Ok(Layer::GroupedConv(GroupedConv::new(
                kernels,
                bias,
                kernel_size,
                stride,
                margin,
            )?))
        }
        LayerKind::Pool => {
            let size = read_u32(reader).map_err(corrupt)? as usize;
            let stride = read_u32(reader).map_err(corrupt)? as usize;
            Ok(Layer::Pool(Pool::new(size, stride)?))
        }
        LayerKind::Dense => {
            let dropout = read_f32(reader).map_err(corrupt)?;
            let weights = read_tensor(reader)?;
            let bias = read_bias(reader)?;
            Ok(Layer::Dense(Dense::new(weights, bias, dropout)?))
        }
        LayerKind::Normalize => {
            let window = read_u32(reader).map_err(corrupt)? as usize;
            let k = read_f32(reader).map_err(corrupt)?;
            let alpha = read_f32(reader).map_err(corrupt)?;
            let beta = read_f32(reader).map_err(corrupt)?;
            Ok(Layer::Normalize(Normalize::new(window, k, alpha, beta)?))
        }
        LayerKind::Relu => Ok(Layer::Relu),
        LayerKind::Flatten => Ok(Layer::Flatten),
        LayerKind::Dropout => Ok(Layer::Dropout),
        LayerKind::Softmax => Ok(Layer::Softmax),
    }
}

fn write_layer<W: Write>(writer: &mut W, layer: &Layer) -> io::Result<()> {
    match layer {
        Layer::Conv(conv) => {
            write_u8(writer, LayerKind::Conv as u8)?;
            let (kernel_size, stride, margin) = conv.geometry();
            write_u32(writer, kernel_size as u32)?;
            write_u32(writer, stride as u32)?;
            write_u32(writer, margin as u32)?;
            write_tensor(writer, conv.kernels())?;
            write_bias(writer, conv.bias())
        }
        Layer::GroupedConv(gconv) => {
            write_u8(writer, LayerKind::GroupedConv as u8)?;
            let (kernel_size, stride, margin) = gconv.geometry();
            write_u32(writer, kernel_size as u32)?;
            write_u32(writer, stride as u32)?;
            write_u32(writer, margin as u32)?;
            write_tensor(writer, gconv.kernels())?;
            write_bias(writer, gconv.bias())
        }
        Layer::Pool(pool) => {
            write_u8(writer, LayerKind::Pool as u8)?;
            write_u32(writer, pool.size as u32)?;
            write_u32(writer, pool.stride as u32)
        }
        Layer::Dense(dense) => {
            write_u8(writer, LayerKind::Dense as u8)?;
            write_f32(writer, dense.dropout())?;
            write_tensor(writer, dense.weights())?;
            write_bias(writer, dense.bias())
        }
        Layer::Normalize(n) => {
            write_u8(writer, LayerKind::Normalize as u8)?;
            write_u32(writer, n.window as u32)?;
            write_f32(writer, n.k)?;
            write_f32(writer, n.alpha)?;
            write_f32(writer, n.beta)
        }
        Layer::Relu => write_u8(writer, LayerKind::Relu as u8),
        Layer::Flatten => write_u8(writer, LayerKind::Flatten as u8),
        Layer::Dropout => write_u8(writer, LayerKind::Dropout as u8),
        Layer::Softmax => write_u8(writer, LayerKind::Softmax as u8),
    }
}

/// Reads a shape-prefixed tensor record: rank, dims, f32 payload.
fn read_tensor<R: Read>(reader: &mut R) -> Result<Tensor> {
    let rank = read_u8(reader).map_err(corrupt)? as usize;
    if rank == 0 || rank > 4 {
        return Err(PercibirError::corrupt_model(format!(
            "tensor rank {rank} is outside 1..=4"
        )));
    }
    let mut dims = Vec::with_capacity(rank);
    let mut count: usize = 1;
    for _ in 0..rank {
        let dim = read_u32(reader).map_err(corrupt)? as usize;
        if dim == 0 {
            return Err(PercibirError::corrupt_model("tensor dimension is zero"));
        }
        count = count.checked_mul(dim).ok_or_else(|| {
            PercibirError::corrupt_model("tensor dimensions overflow the element count")
        })?;
        dims.push(dim);
    }
    if count > MAX_TENSOR_ELEMENTS {
        return Err(PercibirError::corrupt_model(format!(
            "tensor declares {count} elements, limit is {MAX_TENSOR_ELEMENTS}"
        )));
    }
    let data = read_f32_vec(reader, count).map_err(corrupt)?;
    Tensor::from_vec(&dims, data).map_err(PercibirError::corrupt_model)
}

fn write_tensor<W: Write>(writer: &mut W, tensor: &Tensor) -> io::Result<()> {
    write_u8(writer, tensor.rank() as u8)?;
    for &dim in tensor.dims() {
        write_u32(writer, dim as u32)?;
    }
    write_f32_slice(writer, tensor.as_slice())
}

/// Bias vectors are stored as rank-1 tensor records.
fn read_bias<R: Read>(reader: &mut R) -> Result<Vector<f32>> {
    let tensor = read_tensor(reader)?;
    if tensor.rank() != 1 {
        return Err(PercibirError::corrupt_model("bias tensor must be rank 1"));
    }
    Ok(Vector::from_vec(tensor.into_vec()))
}

fn write_bias<W: Write>(writer: &mut W, bias: &Vector<f32>) -> io::Result<()> {
    write_u8(writer, 1)?;
    write_u32(writer, bias.len() as u32)?;
    write_f32_slice(writer, bias.as_slice())
}

fn read_label<R: Read>(reader: &mut R) -> Result<String> {
    let len = read_u32(reader).map_err(corrupt)? as usize;
    if len > MAX_LABEL_BYTES {
        return Err(PercibirError::corrupt_model(format!(
            "label length {len} exceeds {MAX_LABEL_BYTES} bytes"
        )));
    }
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes).map_err(corrupt)?;
    String::from_utf8(bytes)
        .map_err(|_| PercibirError::corrupt_model("label is not valid UTF-8"))
}
