//! Routing and codec errors
//!
//! Three families: [`RouterError`] for table configuration, [`PackError`]
//! for the pack/unpack path, and [`WireError`] for malformed wire input.
//! Error variants carry the offending name/type and, where useful, what the
//! caller can check. The failure site rarely has enough context to recover,
//! so the message has to.

use thiserror::Error;

/// Boxed error produced by user-supplied encoder/decoder callbacks.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Errors from router table configuration and lookup.
#[derive(Debug, Error)]
pub enum RouterError {
    /// The signal table is at its 15-bit capacity.
    #[error("signal table full: {count} names registered, cap is {cap}")]
    RegistryFull { count: usize, cap: usize },

    /// The router was sealed by `build()` and no longer accepts changes.
    #[error("router already built: {operation} rejected after seal")]
    AlreadyBuilt { operation: &'static str },

    /// No signal with this name was registered before the seal.
    #[error("unknown signal name {name:?}")]
    UnknownSignal { name: String },

    /// The name was already taken (names compare case-insensitively).
    #[error("signal {name:?} already registered at index {index}")]
    SignalExists { name: String, index: u16 },

    /// An encoder or decoder was already registered for this key type.
    #[error("{kind} already registered for type {type_name}")]
    CodecExists {
        kind: &'static str,
        type_name: &'static str,
    },
}

impl RouterError {
    pub fn unknown_signal(name: impl Into<String>) -> Self {
        Self::UnknownSignal { name: name.into() }
    }
}

/// Errors on the payload pack/unpack path.
///
/// Every variant names the payload type that was in flight; callback
/// variants keep the underlying codec error as a source.
#[derive(Debug, Error)]
pub enum PackError {
    /// No encoder key matched the runtime type, the declared type, or the
    /// generic catch-all.
    #[error("no encoder for type {type_name} (tried runtime, declared and generic keys)")]
    NoEncoder { type_name: String },

    /// An encoder was selected but cannot operate on this value.
    #[error("encoder {encoder} cannot encode a value of type {type_name}")]
    InvalidEncoder { encoder: String, type_name: String },

    /// The encoder callback itself failed.
    #[error("encoder for {type_name} failed")]
    EncoderCallback {
        type_name: String,
        #[source]
        source: CallbackError,
    },

    /// No decoder is registered for the payload's resolved type.
    #[error("no decoder for type {type_name}")]
    NoDecoder { type_name: String },

    /// The packed record references a decoder slot that does not exist.
    #[error("decoder index {index} out of range for payload type {type_name}")]
    InvalidDecoder { index: i16, type_name: String },

    /// The decoder callback itself failed.
    #[error("decoder for {type_name} failed")]
    DecoderCallback {
        type_name: String,
        #[source]
        source: CallbackError,
    },

    /// The packed record's resolved type disagrees with the type the
    /// selected decoder produces. A stale decoder index (tables registered
    /// in a different order than the record's producer saw) is the usual
    /// cause.
    #[error("payload type mismatch: packed record resolves to {expected}, decoder produces {got}")]
    TypeMismatch {
        expected: String,
        got: &'static str,
    },
}

/// Errors decoding wire bytes into a content envelope.
#[derive(Debug, Error)]
pub enum WireError {
    /// The buffer ends before a declared field.
    #[error("wire data too small: need {need} bytes for {field} at offset {offset}, got {got}")]
    TooSmall {
        need: usize,
        got: usize,
        field: &'static str,
        offset: usize,
    },

    /// A length prefix is negative.
    #[error("negative length {len} for {field} at offset {offset}")]
    BadLength {
        len: i32,
        field: &'static str,
        offset: usize,
    },

    /// A text field is not valid UTF-8.
    #[error("invalid UTF-8 in {field} at offset {offset}")]
    InvalidText { field: &'static str, offset: usize },

    /// Bytes remained after the content was fully decoded.
    #[error("{remaining} trailing bytes after content at offset {offset}")]
    TrailingBytes { remaining: usize, offset: usize },

    /// The payload body cannot be represented on the wire. Live values
    /// must be packed before serialization.
    #[error("body {body} is not wire-encodable; pack the content first")]
    Unencodable { body: &'static str },
}

impl WireError {
    pub fn too_small(need: usize, got: usize, field: &'static str, offset: usize) -> Self {
        Self::TooSmall {
            need,
            got,
            field,
            offset,
        }
    }
}
