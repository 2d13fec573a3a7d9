//! Payload packing and unpacking
//!
//! Packing serializes a content's live payload through the encoder tables
//! and wraps the bytes in a [`PackedPayload`] record whose header carries
//! the packed bit. Unpacking reverses the trip: by decoder index when the
//! record carries one, by resolved type otherwise, with the generic JSON
//! decoder as the last resort for generically packed payloads.
//!
//! Encoder selection order: the payload's runtime type, then the content's
//! declared type, then the generic catch-all.

use crate::codecs::EncodeFailure;
use crate::error::PackError;
use crate::router::Router;
use spindle_types::content::PayloadHandle;
use spindle_types::{Content, PackedPayload, PayloadFlags, HEADER_PACKED};
use std::any::TypeId;
use tracing::trace;

impl Router {
    /// Pack a content's payload into bytes.
    ///
    /// Contents that are already packed, or carry no payload, pass through
    /// unchanged.
    pub fn pack_content(&self, content: Content) -> Result<Content, PackError> {
        if content.is_packed() {
            return Ok(content);
        }
        let Some(value) = content.payload_handle() else {
            return Ok(content);
        };

        let runtime_type = (*value).type_id();
        let generic_type = TypeId::of::<serde_json::Value>();

        self.with_tables(|tables| {
            let mut generic_used = false;
            let found = tables
                .encoder_for(runtime_type)
                .or_else(|| content.declared_type().and_then(|ty| tables.encoder_for(ty)))
                .or_else(|| {
                    generic_used = true;
                    tables.encoder_for(generic_type)
                });
            let Some((_, encoder)) = found else {
                return Err(PackError::NoEncoder {
                    type_name: type_name_of(&content),
                });
            };

            let bytes = encoder.encode(&*value).map_err(|failure| match failure {
                EncodeFailure::Mismatch => PackError::InvalidEncoder {
                    encoder: encoder.input_name().to_string(),
                    type_name: type_name_of(&content),
                },
                EncodeFailure::Callback(source) => PackError::EncoderCallback {
                    type_name: encoder.input_name().to_string(),
                    source,
                },
            })?;

            let decoder_index = tables
                .decoder_index_for(encoder.output())
                .map(|i| i as i16)
                .unwrap_or(-1);

            let mut flags = PayloadFlags::NONE;
            if generic_used && encoder.input() == generic_type && encoder.output() == generic_type {
                flags = flags | PayloadFlags::GENERIC;
            }
            if encoder.output() == TypeId::of::<i32>() {
                flags = flags | PayloadFlags::INT;
            } else if encoder.output() == TypeId::of::<String>() {
                flags = flags | PayloadFlags::STRING;
            } else if encoder.output() == TypeId::of::<Vec<u8>>() {
                flags = flags | PayloadFlags::BYTE;
            }

            trace!(
                output = encoder.output_name(),
                decoder_index,
                size = bytes.len(),
                "payload packed"
            );

            Ok(Content::packed(
                content.header() | HEADER_PACKED,
                PackedPayload {
                    flags,
                    decoder_index,
                    type_id: Some(encoder.output()),
                    type_name: encoder.output_name().to_string(),
                    bytes,
                },
            ))
        })
    }

    /// Unpack a packed payload back into a live value.
    ///
    /// Returns `None` when the content carries no packed payload or the
    /// packed bytes are empty. Raw byte payloads come back directly.
    pub fn unpack_content(&self, content: &Content) -> Result<Option<PayloadHandle>, PackError> {
        if !content.is_packed() {
            return Ok(None);
        }
        let Some(packed) = content.packed_payload() else {
            return Ok(None);
        };
        if packed.bytes.is_empty() {
            return Ok(None);
        }
        if packed.flags.contains(PayloadFlags::BYTE)
            || packed.type_id == Some(TypeId::of::<Vec<u8>>())
        {
            return Ok(Some(std::sync::Arc::new(packed.bytes.clone())));
        }

        self.with_tables(|tables| {
            let decoder = if packed.decoder_index >= 0 {
                tables
                    .decoder_at(packed.decoder_index as usize)
                    .ok_or_else(|| PackError::InvalidDecoder {
                        index: packed.decoder_index,
                        type_name: packed.type_name.clone(),
                    })?
            } else {
                let by_type = packed
                    .type_id
                    .and_then(|ty| tables.decoder_index_for(ty))
                    .or_else(|| tables.decoder_index_named(&packed.type_name));
                let by_type = match by_type {
                    Some(index) => Some(index),
                    None if packed.flags.contains(PayloadFlags::GENERIC) => {
                        tables.decoder_index_for(TypeId::of::<serde_json::Value>())
                    }
                    None => None,
                };
                let index = by_type.ok_or_else(|| PackError::NoDecoder {
                    type_name: packed.type_name.clone(),
                })?;
                tables
                    .decoder_at(index)
                    .ok_or_else(|| PackError::InvalidDecoder {
                        index: index as i16,
                        type_name: packed.type_name.clone(),
                    })?
            };

            // The record names the type its bytes encode; a decoder that
            // rehydrates anything else would hand the caller a lie.
            if let Some(expected) = packed.type_id {
                if decoder.output() != expected {
                    return Err(PackError::TypeMismatch {
                        expected: packed.type_name.clone(),
                        got: decoder.output_name(),
                    });
                }
            }

            decoder
                .decode(&packed.bytes)
                .map(Some)
                .map_err(|source| PackError::DecoderCallback {
                    type_name: packed.type_name.clone(),
                    source,
                })
        })
    }
}

fn type_name_of(content: &Content) -> String {
    use spindle_types::Body;
    match content.body() {
        Body::Text(_) => "alloc::string::String".to_string(),
        Body::Int(_) => "i32".to_string(),
        Body::Bytes(_) => "alloc::vec::Vec<u8>".to_string(),
        Body::Value(_) => content
            .declared_type_name()
            .unwrap_or("<opaque payload>")
            .to_string(),
        Body::Empty | Body::Packed(_) => "<no payload>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codecs::{Decoder, Encoder};
    use crate::router::RouterOptions;
    use spindle_types::INDEX_MASK;

    #[derive(Clone, PartialEq, Debug)]
    struct Cookie {
        data: i32,
    }

    fn router_with_cookie() -> Router {
        let router = Router::new(RouterOptions::default());
        router
            .register_encoder(Encoder::new::<Cookie, _>(|c| {
                Ok(c.data.to_le_bytes().to_vec())
            }))
            .unwrap();
        router
            .register_decoder(Decoder::new::<Cookie, _>(|b| {
                let bytes: [u8; 4] = b
                    .try_into()
                    .map_err(|_| format!("cookie payload must be 4 bytes, got {}", b.len()))?;
                Ok(Cookie {
                    data: i32::from_le_bytes(bytes),
                })
            }))
            .unwrap();
        router.register_signal("cookie", |_, _, _| Ok(())).unwrap();
        router
    }

    #[test]
    fn custom_codec_round_trips() {
        let router = router_with_cookie();
        router.build();

        let value = Cookie { data: 0x1234_5678 };
        let content = router.build_content("cookie", Some(value.clone())).unwrap();
        let header = content.header();

        let packed = router.pack_content(content).unwrap();
        assert!(packed.is_packed());
        assert_eq!(packed.header() & INDEX_MASK, header & INDEX_MASK);
        assert!(packed.packed_payload().unwrap().decoder_index >= 0);

        let handle = router.unpack_content(&packed).unwrap().unwrap();
        assert_eq!(handle.downcast_ref::<Cookie>(), Some(&value));
    }

    #[test]
    fn default_string_codec_round_trips() {
        let router = Router::new(RouterOptions::default());
        router.register_signal("note", |_, _, _| Ok(())).unwrap();
        router.build();

        let content = router
            .build_content("note", Some("spindle".to_string()))
            .unwrap();
        let packed = router.pack_content(content).unwrap();
        let record = packed.packed_payload().unwrap();
        assert!(record.flags.contains(PayloadFlags::STRING));
        assert_eq!(record.bytes, b"spindle");

        let handle = router.unpack_content(&packed).unwrap().unwrap();
        assert_eq!(handle.downcast_ref::<String>().unwrap(), "spindle");
    }

    #[test]
    fn int_payload_carries_the_int_flag() {
        let router = Router::new(RouterOptions::default());
        router.register_signal("count", |_, _, _| Ok(())).unwrap();
        router.build();

        let packed = router
            .pack_content(router.build_content("count", Some(9i32)).unwrap())
            .unwrap();
        assert!(packed
            .packed_payload()
            .unwrap()
            .flags
            .contains(PayloadFlags::INT));
    }

    #[test]
    fn byte_payload_unpacks_directly() {
        let router = Router::new(RouterOptions::default());
        router.register_signal("blob", |_, _, _| Ok(())).unwrap();
        router.build();

        let blob = vec![9u8, 8, 7];
        let packed = router
            .pack_content(router.build_content("blob", Some(blob.clone())).unwrap())
            .unwrap();
        assert!(packed
            .packed_payload()
            .unwrap()
            .flags
            .contains(PayloadFlags::BYTE));
        let handle = router.unpack_content(&packed).unwrap().unwrap();
        assert_eq!(handle.downcast_ref::<Vec<u8>>(), Some(&blob));
    }

    #[test]
    fn generic_value_payload_sets_generic_flag() {
        let router = Router::new(RouterOptions::default());
        router.register_signal("state", |_, _, _| Ok(())).unwrap();
        router.build();

        let value = serde_json::json!({"score": 10});
        let packed = router
            .pack_content(router.build_content("state", Some(value.clone())).unwrap())
            .unwrap();
        assert!(packed
            .packed_payload()
            .unwrap()
            .flags
            .contains(PayloadFlags::GENERIC));

        let handle = router.unpack_content(&packed).unwrap().unwrap();
        assert_eq!(handle.downcast_ref::<serde_json::Value>(), Some(&value));
    }

    #[test]
    fn unknown_payload_type_is_a_packing_error() {
        struct Opaque;
        let router = Router::new(RouterOptions {
            default_signals: true,
            default_codecs: false,
        });
        router.register_signal("raw", |_, _, _| Ok(())).unwrap();
        router.build();

        let err = router
            .pack_content(router.build_content("raw", Some(Opaque)).unwrap())
            .unwrap_err();
        assert!(matches!(err, PackError::NoEncoder { .. }));
    }

    #[test]
    fn unpacked_content_yields_none() {
        let router = Router::new(RouterOptions::default());
        router.register_signal("plain", |_, _, _| Ok(())).unwrap();
        router.build();

        let content = router.build_content("plain", Some(1i32)).unwrap();
        assert!(router.unpack_content(&content).unwrap().is_none());
    }

    #[test]
    fn empty_packed_bytes_yield_none() {
        let router = Router::new(RouterOptions::default());
        router.build();
        let content = Content::packed(
            1 | spindle_types::HEADER_PACKED,
            PackedPayload {
                flags: PayloadFlags::NONE,
                decoder_index: -1,
                type_id: None,
                type_name: "whatever".to_string(),
                bytes: Vec::new(),
            },
        );
        assert!(router.unpack_content(&content).unwrap().is_none());
    }

    #[test]
    fn stale_decoder_index_is_a_type_mismatch() {
        let router = Router::new(RouterOptions {
            default_signals: true,
            default_codecs: false,
        });
        // Slot 0 decodes String; the record below claims its bytes are i64.
        router
            .register_decoder(Decoder::new::<String, _>(|b| {
                String::from_utf8(b.to_vec()).map_err(Into::into)
            }))
            .unwrap();
        router.build();

        let content = Content::packed(
            1 | spindle_types::HEADER_PACKED,
            PackedPayload {
                flags: PayloadFlags::NONE,
                decoder_index: 0,
                type_id: Some(std::any::TypeId::of::<i64>()),
                type_name: "i64".to_string(),
                bytes: vec![1, 2, 3, 4, 5, 6, 7, 8],
            },
        );
        let err = router.unpack_content(&content).unwrap_err();
        assert!(matches!(err, PackError::TypeMismatch { expected, .. } if expected == "i64"));
    }

    #[test]
    fn missing_decoder_is_reported_by_name() {
        let router = Router::new(RouterOptions {
            default_signals: true,
            default_codecs: false,
        });
        router.build();
        let content = Content::packed(
            1 | spindle_types::HEADER_PACKED,
            PackedPayload {
                flags: PayloadFlags::NONE,
                decoder_index: -1,
                type_id: None,
                type_name: "ghost::Type".to_string(),
                bytes: vec![1],
            },
        );
        let err = router.unpack_content(&content).unwrap_err();
        assert!(matches!(err, PackError::NoDecoder { type_name } if type_name == "ghost::Type"));
    }
}
