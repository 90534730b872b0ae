//! Deterministic binary codec shared by hashing, signing and the wire.
//!
//! The same byte layout is fed to the hasher, to the signer and to peers, so
//! two nodes that agree on a value always agree on its hash.
//!
//! Layout:
//! - integers are fixed-width little-endian
//! - `bool` is one byte, 0 or 1
//! - sequences (`Vec<T>`, `String`, `Bytes`) carry a `u32` length prefix
//! - `Option<T>` is a one-byte tag (0 = none, 1 = some) followed by the value
//! - fixed arrays are written element by element with no prefix

use bytes::Bytes;
use thiserror::Error;

/// Upper bound on decoded sequence lengths.
pub const MAX_SEQUENCE_LEN: usize = 16 * 1024 * 1024;

/// Destination for encoded bytes.
///
/// Hashers implement this too, so a value can be digested without first
/// being copied into a buffer.
pub trait EncodeSink {
    fn write(&mut self, bytes: &[u8]);
}

impl EncodeSink for Vec<u8> {
    fn write(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

/// Counts bytes instead of storing them.
#[derive(Default)]
pub struct LengthCounter(pub usize);

impl EncodeSink for LengthCounter {
    fn write(&mut self, bytes: &[u8]) {
        self.0 += bytes.len();
    }
}

pub trait Encode {
    fn encode<S: EncodeSink>(&self, out: &mut S);

    /// Size of the encoding in bytes.
    fn encoded_len(&self) -> usize {
        let mut counter = LengthCounter::default();
        self.encode(&mut counter);
        counter.0
    }

    fn encode_to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode(&mut out);
        out
    }

    fn to_bytes(&self) -> Bytes {
        Bytes::from(self.encode_to_vec())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("invalid value")]
    InvalidValue,
    #[error("length prefix exceeds {MAX_SEQUENCE_LEN}")]
    LengthOverflow,
}

pub trait Decode: Sized {
    /// Decodes one value and advances `input` past it.
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError>;

    /// Decodes a value that must span the whole buffer.
    fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        let mut input = data;
        let value = Self::decode(&mut input)?;
        if input.is_empty() {
            Ok(value)
        } else {
            Err(DecodeError::InvalidValue)
        }
    }
}

fn take<'a>(input: &mut &'a [u8], n: usize) -> Result<&'a [u8], DecodeError> {
    if input.len() < n {
        return Err(DecodeError::UnexpectedEof);
    }
    let (head, rest) = input.split_at(n);
    *input = rest;
    Ok(head)
}

fn take_array<const N: usize>(input: &mut &[u8]) -> Result<[u8; N], DecodeError> {
    let mut out = [0u8; N];
    out.copy_from_slice(take(input, N)?);
    Ok(out)
}

macro_rules! impl_fixed_int {
    ($($t:ty),*) => {$(
        impl Encode for $t {
            fn encode<S: EncodeSink>(&self, out: &mut S) {
                out.write(&self.to_le_bytes());
            }
        }

        impl Decode for $t {
            fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
                take_array(input).map(<$t>::from_le_bytes)
            }
        }
    )*};
}

impl_fixed_int!(u8, u16, u32, u64, i64);

impl Encode for bool {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        out.write(&[u8::from(*self)]);
    }
}

impl Decode for bool {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        match u8::decode(input)? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(DecodeError::InvalidValue),
        }
    }
}

fn encode_len<S: EncodeSink>(len: usize, out: &mut S) {
    // Lengths above u32::MAX never pass MAX_SEQUENCE_LEN on the way back in.
    let len = u32::try_from(len).unwrap_or(u32::MAX);
    len.encode(out);
}

fn decode_len(input: &mut &[u8]) -> Result<usize, DecodeError> {
    let len = u32::decode(input)? as usize;
    if len > MAX_SEQUENCE_LEN {
        return Err(DecodeError::LengthOverflow);
    }
    Ok(len)
}

impl<T: Encode> Encode for [T] {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        encode_len(self.len(), out);
        for item in self {
            item.encode(out);
        }
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.as_slice().encode(out);
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let len = decode_len(input)?;
        // Every element takes at least one byte, so a prefix larger than the
        // remaining input is already known to be truncated.
        if len > input.len() {
            return Err(DecodeError::UnexpectedEof);
        }
        (0..len).map(|_| T::decode(input)).collect()
    }
}

impl Encode for Bytes {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        encode_len(self.len(), out);
        out.write(self);
    }
}

impl Decode for Bytes {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let len = decode_len(input)?;
        Ok(Bytes::copy_from_slice(take(input, len)?))
    }
}

impl Encode for String {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        encode_len(self.len(), out);
        out.write(self.as_bytes());
    }
}

impl Decode for String {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let len = decode_len(input)?;
        let raw = take(input, len)?;
        String::from_utf8(raw.to_vec()).map_err(|_| DecodeError::InvalidValue)
    }
}

impl<T: Encode> Encode for Option<T> {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        match self {
            None => out.write(&[0]),
            Some(value) => {
                out.write(&[1]);
                value.encode(out);
            }
        }
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        match u8::decode(input)? {
            0 => Ok(None),
            1 => T::decode(input).map(Some),
            _ => Err(DecodeError::InvalidValue),
        }
    }
}

impl<const N: usize> Encode for [u8; N] {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        out.write(self);
    }
}

impl<const N: usize> Decode for [u8; N] {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        take_array(input)
    }
}

impl<T: Encode + ?Sized> Encode for &T {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        (**self).encode(out);
    }
}

impl<A: Encode, B: Encode> Encode for (A, B) {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.0.encode(out);
        self.1.encode(out);
    }
}
