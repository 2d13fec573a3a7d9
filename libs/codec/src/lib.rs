//! # Spindle Codec - Signal Routing and Payload Rules
//!
//! ## Purpose
//!
//! The "rules" layer of spindle: translation between symbolic signal names
//! and numeric header indices, typed payload encoding/decoding, handler
//! dispatch, and the optional wire serialization of content envelopes.
//! Everything here is configured once, sealed, and then read concurrently
//! by every model thread in the process.
//!
//! ## Architecture Role
//!
//! ```text
//! libs/types → [spindle-codec] → libs/runtime
//!     ↑              ↓                 ↓
//! Pure Data     Routing Rules      Scheduling
//! Structures    Pack/Unpack        Models/Containers
//! ```
//!
//! ## What This Crate Contains
//! - **Router**: write-once signal-name registry, codec tables, dispatch
//! - **Signal**: one in-flight message with addressing and lifecycle flags
//! - **Completer/Reply**: the one-shot request/reply primitive
//! - **wire**: the content wire format (encode/decode)
//! - **HandlerDescriptor**: batch registration façade
//!
//! ## What This Crate Does NOT Contain
//! - Model scheduling, containers or lifecycle (see `spindle-runtime`)
//! - Any transport; the wire form is defined, no socket carries it here

pub mod codecs;
pub mod completer;
pub mod descriptor;
pub mod error;
pub mod pack;
pub mod router;
pub mod signal;
pub mod wire;

pub use codecs::{json_codec, Decoder, Encoder};
pub use completer::{Completer, Reply, ReplyError};
pub use descriptor::{register_all, HandlerDescriptor};
pub use error::{CallbackError, PackError, RouterError, WireError};
pub use router::{Handler, HandlerResult, NullTarget, Router, RouterOptions, MAX_SIGNALS};
pub use signal::{Signal, SignalTarget};
