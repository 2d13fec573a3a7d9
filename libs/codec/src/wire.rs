//! Content wire serialization
//!
//! The wire form is the same whether a content is stored or transmitted: a
//! `u16` little-endian header prefix, then, when the header's packed bit is
//! set, the packed payload block, else a compact flag blob for the
//! primitive bodies.
//!
//! ```text
//! u16 LE  header
//! u8      flags                     {GENERIC, INT, STRING, BYTE}
//! if flags & STRING:  i32 LE length, UTF-8 bytes
//! elif flags & INT:   i32 LE value
//! elif flags & BYTE:  i32 LE length, raw bytes
//! else (packed):
//!     i16 LE decoder-index
//!     if decoder-index < 0:  i32 LE length, UTF-8 type name
//!     i32 LE payload length, encoded bytes
//! ```
//!
//! Every read is bounds-checked before it happens; a malformed buffer
//! produces a [`WireError`] naming the field and offset, never a panic.

use crate::error::WireError;
use spindle_types::{Body, Content, PackedPayload, PayloadFlags};

/// Serialize a content envelope to its wire form.
///
/// Live [`Body::Value`] payloads are not wire-encodable; pack the content
/// through the router first.
pub fn encode_content(content: &Content) -> Result<Vec<u8>, WireError> {
    let mut out = Vec::with_capacity(16);
    out.extend_from_slice(&content.header().to_le_bytes());

    match content.body() {
        Body::Empty => {
            out.push(PayloadFlags::NONE.bits());
        }
        Body::Text(text) => {
            out.push(PayloadFlags::STRING.bits());
            write_block(&mut out, text.as_bytes());
        }
        Body::Int(value) => {
            out.push(PayloadFlags::INT.bits());
            out.extend_from_slice(&value.to_le_bytes());
        }
        Body::Bytes(bytes) => {
            out.push(PayloadFlags::BYTE.bits());
            write_block(&mut out, bytes);
        }
        Body::Packed(packed) => {
            out.push(packed.flags.bits());
            out.extend_from_slice(&packed.decoder_index.to_le_bytes());
            if packed.decoder_index < 0 {
                write_block(&mut out, packed.type_name.as_bytes());
            }
            write_block(&mut out, &packed.bytes);
        }
        Body::Value(_) => {
            return Err(WireError::Unencodable { body: "Value" });
        }
    }
    Ok(out)
}

/// Deserialize a wire buffer back into a content envelope.
///
/// Packed payloads come back with their type unresolved (`type_id` none);
/// the router rehydrates them by decoder index or type name.
pub fn decode_content(data: &[u8]) -> Result<Content, WireError> {
    let mut reader = Reader::new(data);
    let header = u16::from_le_bytes(reader.take::<2>("header")?);

    let content = if header & spindle_types::HEADER_PACKED != 0 {
        let flags = PayloadFlags::from_bits(reader.take::<1>("flags")?[0]);
        let decoder_index = i16::from_le_bytes(reader.take::<2>("decoder-index")?);
        let type_name = if decoder_index < 0 {
            let bytes = reader.take_block("type name")?;
            String::from_utf8(bytes.to_vec()).map_err(|_| WireError::InvalidText {
                field: "type name",
                offset: reader.offset,
            })?
        } else {
            String::new()
        };
        let bytes = reader.take_block("payload")?.to_vec();
        Content::packed(
            header,
            PackedPayload {
                flags,
                decoder_index,
                type_id: None,
                type_name,
                bytes,
            },
        )
    } else {
        let flags = PayloadFlags::from_bits(reader.take::<1>("flags")?[0]);
        let body = if flags.contains(PayloadFlags::STRING) {
            let bytes = reader.take_block("text")?;
            Body::Text(String::from_utf8(bytes.to_vec()).map_err(|_| {
                WireError::InvalidText {
                    field: "text",
                    offset: reader.offset,
                }
            })?)
        } else if flags.contains(PayloadFlags::INT) {
            Body::Int(i32::from_le_bytes(reader.take::<4>("int payload")?))
        } else if flags.contains(PayloadFlags::BYTE) {
            Body::Bytes(reader.take_block("byte payload")?.to_vec())
        } else {
            Body::Empty
        };
        // The header came off the wire inside the index range by
        // construction of the mask.
        Content::with_body(header & spindle_types::INDEX_MASK, body)
            .expect("masked index within range")
    };

    if !reader.is_empty() {
        return Err(WireError::TrailingBytes {
            remaining: reader.remaining(),
            offset: reader.offset,
        });
    }
    Ok(content)
}

fn write_block(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as i32).to_le_bytes());
    out.extend_from_slice(bytes);
}

struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Reader { data, offset: 0 }
    }

    fn take<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N], WireError> {
        if self.remaining() < N {
            return Err(WireError::too_small(N, self.remaining(), field, self.offset));
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[self.offset..self.offset + N]);
        self.offset += N;
        Ok(out)
    }

    fn take_block(&mut self, field: &'static str) -> Result<&'a [u8], WireError> {
        let start = self.offset;
        let len = i32::from_le_bytes(self.take::<4>(field)?);
        if len < 0 {
            return Err(WireError::BadLength {
                len,
                field,
                offset: start,
            });
        }
        let len = len as usize;
        if self.remaining() < len {
            return Err(WireError::too_small(len, self.remaining(), field, self.offset));
        }
        let block = &self.data[self.offset..self.offset + len];
        self.offset += len;
        Ok(block)
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    fn is_empty(&self) -> bool {
        self.remaining() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::{Router, RouterOptions};
    use spindle_types::HEADER_PACKED;

    #[test]
    fn primitive_bodies_round_trip() {
        for body in [
            Body::Empty,
            Body::Text("wire test".to_string()),
            Body::Int(-7),
            Body::Bytes(vec![1, 2, 3, 255]),
        ] {
            let content = Content::with_body(42, body).unwrap();
            let bytes = encode_content(&content).unwrap();
            let back = decode_content(&bytes).unwrap();
            assert_eq!(back.header(), content.header());
            match (content.body(), back.body()) {
                (Body::Empty, Body::Empty) => {}
                (Body::Text(a), Body::Text(b)) => assert_eq!(a, b),
                (Body::Int(a), Body::Int(b)) => assert_eq!(a, b),
                (Body::Bytes(a), Body::Bytes(b)) => assert_eq!(a, b),
                (a, b) => panic!("body changed shape: {:?} → {:?}", a, b),
            }
        }
    }

    #[test]
    fn packed_payload_survives_the_wire_and_rehydrates() {
        let router = Router::new(RouterOptions::default());
        router.register_signal("score", |_, _, _| Ok(())).unwrap();
        router.build();

        let packed = router
            .pack_content(router.build_content("score", Some(31337i64)).unwrap())
            .unwrap();
        let bytes = encode_content(&packed).unwrap();
        let back = decode_content(&bytes).unwrap();

        assert!(back.is_packed());
        let record = back.packed_payload().unwrap();
        assert_eq!(
            record.decoder_index,
            packed.packed_payload().unwrap().decoder_index
        );

        let handle = router.unpack_content(&back).unwrap().unwrap();
        assert_eq!(handle.downcast_ref::<i64>(), Some(&31337i64));
    }

    #[test]
    fn negative_decoder_index_carries_the_type_name() {
        let content = Content::packed(
            3 | HEADER_PACKED,
            PackedPayload {
                flags: PayloadFlags::NONE,
                decoder_index: -1,
                type_id: None,
                type_name: "demo::Cookie".to_string(),
                bytes: vec![9, 9],
            },
        );
        let bytes = encode_content(&content).unwrap();
        let back = decode_content(&bytes).unwrap();
        let record = back.packed_payload().unwrap();
        assert_eq!(record.decoder_index, -1);
        assert_eq!(record.type_name, "demo::Cookie");
        assert_eq!(record.bytes, vec![9, 9]);
    }

    #[test]
    fn live_values_refuse_the_wire() {
        let content = Content::typed(1, 1.5f64).unwrap();
        assert!(matches!(
            encode_content(&content),
            Err(WireError::Unencodable { .. })
        ));
    }

    #[test]
    fn truncated_buffers_name_the_missing_field() {
        let content = Content::with_body(9, Body::Text("hello".into())).unwrap();
        let bytes = encode_content(&content).unwrap();

        for cut in [1, 2, 3, 5, bytes.len() - 1] {
            let err = decode_content(&bytes[..cut]).unwrap_err();
            assert!(
                matches!(err, WireError::TooSmall { .. }),
                "cut at {cut}: {err}"
            );
        }
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let content = Content::with_body(9, Body::Int(1)).unwrap();
        let mut bytes = encode_content(&content).unwrap();
        bytes.push(0xff);
        assert!(matches!(
            decode_content(&bytes),
            Err(WireError::TrailingBytes { .. })
        ));
    }

    #[test]
    fn negative_length_is_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&9u16.to_le_bytes());
        bytes.push(PayloadFlags::STRING.bits());
        bytes.extend_from_slice(&(-4i32).to_le_bytes());
        assert!(matches!(
            decode_content(&bytes),
            Err(WireError::BadLength { .. })
        ));
    }
}
