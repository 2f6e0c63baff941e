//! In-memory compression drivers.
//!
//! A stream is the coded bytes of the input followed by the end-of-stream
//! symbol, flushed. Nothing else is stored.

use log::debug;

use crate::coder::{ArithDecoder, ArithEncoder, RangeDecoder, RangeEncoder, SymbolDecoder, SymbolEncoder};
use crate::config::{CoderKind, PpmConfig};
use crate::error::{PpmError, Result};
use crate::ppm::{PpmModel, END_OF_STREAM};

/// Compress `input` into a new buffer.
///
/// # Example
///
/// ```
/// use ppm_arith::{compress, decompress, PpmConfig};
///
/// let config = PpmConfig::new(3, 1 << 20);
/// let packed = compress(b"abababababababab", &config)?;
/// assert_eq!(decompress(&packed, &config)?, b"abababababababab");
/// # Ok::<(), ppm_arith::PpmError>(())
/// ```
pub fn compress(input: &[u8], config: &PpmConfig) -> Result<Vec<u8>> {
    let mut model = PpmModel::new(config)?;
    let mut out = Vec::with_capacity(input.len() / 2 + 16);

    match config.coder {
        CoderKind::Arithmetic => {
            let mut coder = ArithEncoder::new(&mut out);
            encode_all(&mut model, &mut coder, input);
            coder.flush();
        }
        CoderKind::Range => {
            let mut coder = RangeEncoder::new(&mut out);
            encode_all(&mut model, &mut coder, input);
            coder.flush();
        }
    }

    debug!(
        "compressed {} -> {} bytes (order {}, {} restarts)",
        input.len(),
        out.len(),
        config.max_order,
        model.restarts()
    );
    Ok(out)
}

/// Decompress a stream produced by [`compress`] with the same configuration.
pub fn decompress(input: &[u8], config: &PpmConfig) -> Result<Vec<u8>> {
    let mut model = PpmModel::new(config)?;
    let out = match config.coder {
        CoderKind::Arithmetic => decode_until_end(&mut model, &mut ArithDecoder::new(input), config.max_output)?,
        CoderKind::Range => decode_until_end(&mut model, &mut RangeDecoder::new(input), config.max_output)?,
    };
    debug!("decompressed {} -> {} bytes ({} restarts)", input.len(), out.len(), model.restarts());
    Ok(out)
}

/// Decompress exactly `expected_len` bytes and require the end-of-stream
/// marker right after them.
///
/// Lengths above `config.max_output` are rejected before decoding.
pub fn decompress_exact(input: &[u8], config: &PpmConfig, expected_len: usize) -> Result<Vec<u8>> {
    if expected_len > config.max_output {
        return Err(PpmError::OutputLimitExceeded {
            limit: config.max_output,
        });
    }
    let mut model = PpmModel::new(config)?;
    match config.coder {
        CoderKind::Arithmetic => decode_exact(&mut model, &mut ArithDecoder::new(input), expected_len),
        CoderKind::Range => decode_exact(&mut model, &mut RangeDecoder::new(input), expected_len),
    }
}

fn encode_all<E: SymbolEncoder>(model: &mut PpmModel, coder: &mut E, input: &[u8]) {
    for &byte in input {
        model.encode(coder, byte);
    }
    model.encode_end_of_stream(coder);
}

fn decode_until_end<D: SymbolDecoder>(model: &mut PpmModel, coder: &mut D, limit: usize) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    loop {
        let symbol = model.decode(coder);
        if symbol == END_OF_STREAM {
            return Ok(out);
        }
        if out.len() == limit {
            return Err(PpmError::OutputLimitExceeded { limit });
        }
        out.push(symbol as u8);
    }
}

fn decode_exact<D: SymbolDecoder>(model: &mut PpmModel, coder: &mut D, expected: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(expected);
    while out.len() < expected {
        match model.decode(coder) {
            END_OF_STREAM => {
                return Err(PpmError::LengthMismatch {
                    expected,
                    actual: out.len(),
                })
            }
            symbol => out.push(symbol as u8),
        }
    }
    if model.decode(coder) != END_OF_STREAM {
        return Err(PpmError::MissingEndOfStream);
    }
    Ok(out)
}
