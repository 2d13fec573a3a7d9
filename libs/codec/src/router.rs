//! # Signal Router - Name Registry and Dispatch
//!
//! ## Purpose
//!
//! The router translates between symbolic signal names and the numeric
//! indices carried in content headers, owns the encoder/decoder tables, and
//! resolves handlers at dispatch time. It is *configured* during a setup
//! phase and then *sealed* by [`Router::build`]; after the seal the tables
//! are immutable and every lookup takes only the read side of the lock.
//!
//! ## Table Layout
//!
//! Parallel vectors keyed by a 15-bit signal index (`names` and `handlers`)
//! plus an inverse case-insensitive name map and the ordered
//! encoder/decoder tables with their type-keyed indexes. The first two
//! slots are reserved so a zero header never aliases a user signal.

use crate::codecs::{defaults, json_codec, Decoder, Encoder};
use crate::error::RouterError;
use crate::signal::{Signal, SignalTarget};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use spindle_types::{Content, ModelId};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Maximum number of registered signals (15-bit header index space).
pub const MAX_SIGNALS: usize = 32_767;

/// Result type for user signal handlers.
pub type HandlerResult = anyhow::Result<()>;

type PlainFn = dyn Fn(&Router, &dyn SignalTarget, &mut Signal) -> HandlerResult + Send + Sync;
type TypedFn = dyn Fn(&Router, &dyn SignalTarget, &mut Signal, &(dyn Any + Send + Sync)) -> HandlerResult
    + Send
    + Sync;

/// A registered signal handler.
///
/// Typed handlers remember their declared payload type so dispatch can
/// narrow the payload before invocation; a payload that does not narrow
/// leaves the signal unhandled for the next stage of the chain.
#[derive(Clone)]
pub enum Handler {
    Plain(Arc<PlainFn>),
    Typed {
        payload: TypeId,
        payload_name: &'static str,
        run: Arc<TypedFn>,
    },
}

/// Router construction options.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterOptions {
    /// Register the built-in `_null`, `exit` and `suspend` signals.
    pub default_signals: bool,
    /// Register the default codec set (text, numerics, bytes, JSON value).
    pub default_codecs: bool,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            default_signals: true,
            default_codecs: true,
        }
    }
}

struct Tables {
    names: Vec<String>,
    handlers: Vec<Option<Handler>>,
    /// Lowercased name → index. Lookups through this map are
    /// case-insensitive by construction.
    by_name: HashMap<String, u16>,
    encoders: Vec<Encoder>,
    encoder_by_type: HashMap<TypeId, usize>,
    decoders: Vec<Decoder>,
    decoder_by_type: HashMap<TypeId, usize>,
    decoder_by_name: HashMap<String, usize>,
}

/// Signal-name registry, codec tables and dispatch helper.
pub struct Router {
    tables: RwLock<Tables>,
    built: AtomicBool,
}

impl Router {
    pub fn new(options: RouterOptions) -> Router {
        let router = Router {
            tables: RwLock::new(Tables {
                names: Vec::new(),
                handlers: Vec::new(),
                by_name: HashMap::new(),
                encoders: Vec::new(),
                encoder_by_type: HashMap::new(),
                decoders: Vec::new(),
                decoder_by_type: HashMap::new(),
                decoder_by_name: HashMap::new(),
            }),
            built: AtomicBool::new(false),
        };

        if options.default_signals {
            router.register_defaults();
        } else {
            // The two reserved slots exist regardless, so a zero header
            // never aliases a user signal.
            router.register_placeholder("_null").expect("fresh table");
            router
                .register_placeholder("_reserved")
                .expect("fresh table");
        }

        if options.default_codecs {
            let (encoders, decoders) = defaults();
            for encoder in encoders {
                router.register_encoder(encoder).expect("fresh table");
            }
            for decoder in decoders {
                router.register_decoder(decoder).expect("fresh table");
            }
        }

        router
    }

    fn register_defaults(&self) {
        // Slot 0: the zero header. A no-op handler, so dispatching an
        // all-zero content is harmless.
        self.register_signal("_null", |_, _, _| Ok(()))
            .expect("fresh table");
        self.register_placeholder("_reserved").expect("fresh table");
        self.register_signal("exit", |_router, target, _signal| {
            debug!(target_id = %target.id(), "exit signal: halting destination container");
            target.halt();
            Ok(())
        })
        .expect("fresh table");
        self.register_signal("suspend", |_router, target, _signal| {
            debug!(target_id = %target.id(), "suspend signal: pausing destination container");
            target.suspend();
            Ok(())
        })
        .expect("fresh table");
    }

    /// Register a name with a handler slot left empty.
    fn register_placeholder(&self, name: &str) -> Result<u16, RouterError> {
        self.insert_signal(name, None)
    }

    /// Register a signal with an untyped handler.
    pub fn register_signal<F>(&self, name: &str, handler: F) -> Result<u16, RouterError>
    where
        F: Fn(&Router, &dyn SignalTarget, &mut Signal) -> HandlerResult + Send + Sync + 'static,
    {
        self.insert_signal(name, Some(Handler::Plain(Arc::new(handler))))
    }

    /// Register a signal whose handler declares payload type `T`.
    ///
    /// At dispatch the payload is narrowed to `T` first; the handler only
    /// runs when the narrow succeeds.
    pub fn register_signal_typed<T, F>(&self, name: &str, handler: F) -> Result<u16, RouterError>
    where
        T: Any + Send + Sync,
        F: Fn(&Router, &dyn SignalTarget, &mut Signal, &T) -> HandlerResult + Send + Sync + 'static,
    {
        let run: Arc<TypedFn> = Arc::new(
            move |router: &Router,
                  target: &dyn SignalTarget,
                  signal: &mut Signal,
                  data: &(dyn Any + Send + Sync)| {
                match data.downcast_ref::<T>() {
                    Some(value) => handler(router, target, signal, value),
                    // Dispatch narrows before invoking; a miss here means
                    // the payload changed between the check and the call.
                    None => Ok(()),
                }
            },
        );
        self.insert_signal(
            name,
            Some(Handler::Typed {
                payload: TypeId::of::<T>(),
                payload_name: std::any::type_name::<T>(),
                run,
            }),
        )
    }

    /// Register a signal from an already-built handler (descriptor path).
    pub(crate) fn register_prebuilt(&self, name: &str, handler: Handler) -> Result<u16, RouterError> {
        self.insert_signal(name, Some(handler))
    }

    fn insert_signal(&self, name: &str, handler: Option<Handler>) -> Result<u16, RouterError> {
        if self.is_built() {
            return Err(RouterError::AlreadyBuilt {
                operation: "register_signal",
            });
        }
        let mut tables = self.tables.write();
        let key = name.to_ascii_lowercase();
        if let Some(&index) = tables.by_name.get(&key) {
            return Err(RouterError::SignalExists {
                name: name.to_string(),
                index,
            });
        }
        if tables.names.len() >= MAX_SIGNALS {
            return Err(RouterError::RegistryFull {
                count: tables.names.len(),
                cap: MAX_SIGNALS,
            });
        }

        let index = tables.names.len() as u16;
        tables.names.push(name.to_string());
        tables.handlers.push(handler);
        tables.by_name.insert(key, index);
        debug!(name, index, "signal registered");
        Ok(index)
    }

    /// Register a payload encoder. The input type is the key; one encoder
    /// per input type.
    pub fn register_encoder(&self, encoder: Encoder) -> Result<usize, RouterError> {
        if self.is_built() {
            return Err(RouterError::AlreadyBuilt {
                operation: "register_encoder",
            });
        }
        let mut tables = self.tables.write();
        if tables.encoder_by_type.contains_key(&encoder.input()) {
            return Err(RouterError::CodecExists {
                kind: "encoder",
                type_name: encoder.input_name(),
            });
        }
        let index = tables.encoders.len();
        tables.encoder_by_type.insert(encoder.input(), index);
        debug!(type_name = encoder.input_name(), index, "encoder registered");
        tables.encoders.push(encoder);
        Ok(index)
    }

    /// Register a payload decoder. The output type is the key; one decoder
    /// per output type.
    pub fn register_decoder(&self, decoder: Decoder) -> Result<usize, RouterError> {
        if self.is_built() {
            return Err(RouterError::AlreadyBuilt {
                operation: "register_decoder",
            });
        }
        let mut tables = self.tables.write();
        if tables.decoder_by_type.contains_key(&decoder.output()) {
            return Err(RouterError::CodecExists {
                kind: "decoder",
                type_name: decoder.output_name(),
            });
        }
        let index = tables.decoders.len();
        tables.decoder_by_type.insert(decoder.output(), index);
        tables
            .decoder_by_name
            .insert(decoder.output_name().to_string(), index);
        debug!(type_name = decoder.output_name(), index, "decoder registered");
        tables.decoders.push(decoder);
        Ok(index)
    }

    /// Register a JSON encoder/decoder pair for a serde-capable type.
    pub fn register_json<T>(&self) -> Result<(), RouterError>
    where
        T: serde::Serialize + serde::de::DeserializeOwned + Any + Send + Sync,
    {
        let (encoder, decoder) = json_codec::<T>();
        self.register_encoder(encoder)?;
        self.register_decoder(decoder)?;
        Ok(())
    }

    /// Seal the router. Idempotent; registration fails afterwards.
    pub fn build(&self) {
        if self.built.swap(true, Ordering::SeqCst) {
            return;
        }
        let tables = self.tables.read();
        info!(
            signals = tables.names.len(),
            encoders = tables.encoders.len(),
            decoders = tables.decoders.len(),
            "router sealed"
        );
    }

    pub fn is_built(&self) -> bool {
        self.built.load(Ordering::SeqCst)
    }

    /// Resolve a name to its signal index. Case-insensitive.
    pub fn index_of(&self, name: &str) -> Option<u16> {
        self.tables
            .read()
            .by_name
            .get(&name.to_ascii_lowercase())
            .copied()
    }

    /// The registered name behind a content's header, if in range.
    pub fn header_name(&self, content: &Content) -> Option<String> {
        self.tables
            .read()
            .names
            .get(content.signal_index() as usize)
            .cloned()
    }

    /// Number of registered signals, reserved slots included.
    pub fn signal_count(&self) -> usize {
        self.tables.read().names.len()
    }

    /// Build content for a named signal. `None` data yields a payload-less
    /// content so the signal travels with just its header.
    pub fn build_content<T: Any + Send + Sync>(
        &self,
        name: &str,
        data: Option<T>,
    ) -> Result<Content, RouterError> {
        let index = self
            .index_of(name)
            .ok_or_else(|| RouterError::unknown_signal(name))?;
        let content = match data {
            Some(value) => Content::typed(index, value),
            None => Content::empty(index),
        };
        // The index came out of the table, so it is within the cap.
        Ok(content.expect("index within header range"))
    }

    /// The handler stored at this content's signal index, if any.
    pub fn signal_processor(&self, content: &Content) -> Option<Handler> {
        self.tables
            .read()
            .handlers
            .get(content.signal_index() as usize)
            .and_then(|slot| slot.clone())
    }

    /// Invoke a handler for a signal, narrowing typed payloads first.
    /// Marks the signal handled after a successful invocation.
    pub fn invoke_processor(
        &self,
        handler: &Handler,
        target: &dyn SignalTarget,
        signal: &mut Signal,
    ) -> HandlerResult {
        match handler {
            Handler::Plain(run) => {
                run(self, target, signal)?;
                signal.mark_handled();
                Ok(())
            }
            Handler::Typed {
                payload,
                payload_name,
                run,
            } => {
                let data = signal.resolve_payload(self)?;
                match data {
                    Some(handle) if (*handle).type_id() == *payload => {
                        run(self, target, signal, &*handle)?;
                        signal.mark_handled();
                        Ok(())
                    }
                    _ => {
                        debug!(
                            expected = payload_name,
                            "typed handler skipped: payload does not narrow"
                        );
                        Ok(())
                    }
                }
            }
        }
    }

    pub(crate) fn with_tables<R>(&self, f: impl FnOnce(&TablesView<'_>) -> R) -> R {
        let tables = self.tables.read();
        f(&TablesView { tables: &tables })
    }
}

/// Read-only view over the codec tables for the pack/unpack path.
pub(crate) struct TablesView<'a> {
    tables: &'a Tables,
}

impl TablesView<'_> {
    pub fn encoder_for(&self, ty: TypeId) -> Option<(usize, &Encoder)> {
        self.tables
            .encoder_by_type
            .get(&ty)
            .map(|&i| (i, &self.tables.encoders[i]))
    }

    pub fn decoder_at(&self, index: usize) -> Option<&Decoder> {
        self.tables.decoders.get(index)
    }

    pub fn decoder_index_for(&self, ty: TypeId) -> Option<usize> {
        self.tables.decoder_by_type.get(&ty).copied()
    }

    pub fn decoder_index_named(&self, name: &str) -> Option<usize> {
        self.tables.decoder_by_name.get(name).copied()
    }
}

/// A do-nothing signal target for dispatch outside any model context.
pub struct NullTarget(pub ModelId);

impl SignalTarget for NullTarget {
    fn id(&self) -> ModelId {
        self.0
    }

    fn halt(&self) {}

    fn suspend(&self) {}
}
