//! Payload encoders and decoders
//!
//! An [`Encoder`] turns one live payload type into bytes; a [`Decoder`]
//! turns bytes back into a payload value. Both are type-erased entries:
//! the router keys them by `TypeId` and stores them in ordered tables so a
//! packed payload can reference its decoder by index across pack/unpack.
//!
//! The default set covers what messages actually carry in practice: UTF-8
//! text, the little-endian fixed-width numeric family, raw byte blobs, and
//! a JSON catch-all keyed on [`serde_json::Value`]. Arbitrary user types
//! opt into JSON via [`json_codec`].

use crate::error::CallbackError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use spindle_types::content::PayloadHandle;
use std::any::{Any, TypeId};
use std::sync::Arc;

/// Why an encoder invocation failed.
pub enum EncodeFailure {
    /// The value's runtime type is not the encoder's input type.
    Mismatch,
    /// The encoder callback returned an error.
    Callback(CallbackError),
}

type EncodeFn = dyn Fn(&(dyn Any + Send + Sync)) -> Result<Vec<u8>, EncodeFailure> + Send + Sync;
type DecodeFn = dyn Fn(&[u8]) -> Result<PayloadHandle, CallbackError> + Send + Sync;

/// Type-erased payload encoder: input type → output type → bytes.
pub struct Encoder {
    input: TypeId,
    input_name: &'static str,
    output: TypeId,
    output_name: &'static str,
    run: Box<EncodeFn>,
}

impl Encoder {
    /// Encoder whose output type is its input type, the common case.
    pub fn new<I, F>(f: F) -> Encoder
    where
        I: Any + Send + Sync,
        F: Fn(&I) -> Result<Vec<u8>, CallbackError> + Send + Sync + 'static,
    {
        Encoder {
            input: TypeId::of::<I>(),
            input_name: std::any::type_name::<I>(),
            output: TypeId::of::<I>(),
            output_name: std::any::type_name::<I>(),
            run: Box::new(move |value| match value.downcast_ref::<I>() {
                Some(v) => f(v).map_err(EncodeFailure::Callback),
                None => Err(EncodeFailure::Mismatch),
            }),
        }
    }

    /// Encoder producing bytes that a decoder for type `O` rehydrates.
    pub fn mapping<I, O, F>(f: F) -> Encoder
    where
        I: Any + Send + Sync,
        O: Any + Send + Sync,
        F: Fn(&I) -> Result<Vec<u8>, CallbackError> + Send + Sync + 'static,
    {
        Encoder {
            input: TypeId::of::<I>(),
            input_name: std::any::type_name::<I>(),
            output: TypeId::of::<O>(),
            output_name: std::any::type_name::<O>(),
            run: Box::new(move |value| match value.downcast_ref::<I>() {
                Some(v) => f(v).map_err(EncodeFailure::Callback),
                None => Err(EncodeFailure::Mismatch),
            }),
        }
    }

    pub fn input(&self) -> TypeId {
        self.input
    }

    pub fn input_name(&self) -> &'static str {
        self.input_name
    }

    pub fn output(&self) -> TypeId {
        self.output
    }

    pub fn output_name(&self) -> &'static str {
        self.output_name
    }

    pub fn encode(&self, value: &(dyn Any + Send + Sync)) -> Result<Vec<u8>, EncodeFailure> {
        (self.run)(value)
    }
}

/// Type-erased payload decoder: bytes → output type.
pub struct Decoder {
    output: TypeId,
    output_name: &'static str,
    run: Box<DecodeFn>,
}

impl Decoder {
    pub fn new<O, F>(f: F) -> Decoder
    where
        O: Any + Send + Sync,
        F: Fn(&[u8]) -> Result<O, CallbackError> + Send + Sync + 'static,
    {
        Decoder {
            output: TypeId::of::<O>(),
            output_name: std::any::type_name::<O>(),
            run: Box::new(move |bytes| f(bytes).map(|v| Arc::new(v) as PayloadHandle)),
        }
    }

    pub fn output(&self) -> TypeId {
        self.output
    }

    pub fn output_name(&self) -> &'static str {
        self.output_name
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<PayloadHandle, CallbackError> {
        (self.run)(bytes)
    }
}

/// JSON encoder/decoder pair for an arbitrary serde-capable type.
///
/// The JSON representation is a convenience, not a stable contract; types
/// that need a guaranteed layout should register a hand-written codec.
pub fn json_codec<T>() -> (Encoder, Decoder)
where
    T: Serialize + DeserializeOwned + Any + Send + Sync,
{
    (
        Encoder::new::<T, _>(|v| serde_json::to_vec(v).map_err(Into::into)),
        Decoder::new::<T, _>(|b| serde_json::from_slice(b).map_err(Into::into)),
    )
}

fn fixed_width<const N: usize>(bytes: &[u8], what: &'static str) -> Result<[u8; N], CallbackError> {
    bytes
        .try_into()
        .map_err(|_| format!("{what}: expected {N} bytes, got {}", bytes.len()).into())
}

macro_rules! numeric_codec {
    ($encoders:ident, $decoders:ident, $ty:ty, $width:expr) => {
        $encoders.push(Encoder::new::<$ty, _>(|v| Ok(v.to_le_bytes().to_vec())));
        $decoders.push(Decoder::new::<$ty, _>(|b| {
            Ok(<$ty>::from_le_bytes(fixed_width::<$width>(
                b,
                stringify!($ty),
            )?))
        }));
    };
}

/// The default codec set: UTF-8 text, LE fixed-width numerics, raw bytes,
/// and the generic JSON catch-all for [`serde_json::Value`].
pub fn defaults() -> (Vec<Encoder>, Vec<Decoder>) {
    let mut encoders = Vec::new();
    let mut decoders = Vec::new();

    encoders.push(Encoder::new::<String, _>(|s| Ok(s.as_bytes().to_vec())));
    decoders.push(Decoder::new::<String, _>(|b| {
        String::from_utf8(b.to_vec()).map_err(Into::into)
    }));

    numeric_codec!(encoders, decoders, i16, 2);
    numeric_codec!(encoders, decoders, i32, 4);
    numeric_codec!(encoders, decoders, i64, 8);
    numeric_codec!(encoders, decoders, i128, 16);
    numeric_codec!(encoders, decoders, u16, 2);
    numeric_codec!(encoders, decoders, u32, 4);
    numeric_codec!(encoders, decoders, u64, 8);
    numeric_codec!(encoders, decoders, f32, 4);
    numeric_codec!(encoders, decoders, f64, 8);

    encoders.push(Encoder::new::<bool, _>(|v| Ok(vec![u8::from(*v)])));
    decoders.push(Decoder::new::<bool, _>(|b| {
        Ok(fixed_width::<1>(b, "bool")?[0] != 0)
    }));

    // Raw byte payloads pass through untouched.
    encoders.push(Encoder::new::<Vec<u8>, _>(|b| Ok(b.clone())));
    decoders.push(Decoder::new::<Vec<u8>, _>(|b| Ok(b.to_vec())));

    let (generic_enc, generic_dec) = json_codec::<serde_json::Value>();
    encoders.push(generic_enc);
    decoders.push(generic_dec);

    (encoders, decoders)
}
