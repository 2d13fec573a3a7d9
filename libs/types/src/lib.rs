//! # Spindle Types - Core Data Structures
//!
//! ## Purpose
//!
//! Pure data structures shared by every spindle crate: model addresses,
//! the content envelope that carries signal payloads, and the payload
//! flag bits used by the packed wire representation. This crate contains
//! no routing or scheduling logic.
//!
//! ## Architecture Role
//!
//! ```text
//! libs/types → libs/codec → libs/runtime
//!     ↑             ↓             ↓
//! Pure Data    Routing Rules   Scheduling
//! Structures   Pack/Unpack     Models/Containers
//! ModelId      Router/Signal   Schemas/Provider
//! ```
//!
//! ## What This Crate Contains
//! - **ModelId**: compact 64-bit model address with a printable 8-char form
//! - **Content**: header + payload envelope for in-flight signals
//! - **PackedPayload / PayloadFlags**: serialized payload record and its
//!   wire classification bits

pub mod content;
pub mod identifier;

pub use content::{
    Body, Content, ContentError, PackedPayload, PayloadFlags, HEADER_PACKED, INDEX_MASK,
};
pub use identifier::ModelId;
