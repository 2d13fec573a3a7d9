//! Handler descriptors
//!
//! A registration façade for hosts that assemble their handler set as data
//! (from a plugin list, a builder, or generated glue) instead of calling
//! [`Router::register_signal`] one closure at a time. Each descriptor
//! carries a signal name and a ready-made callable; `register_all`
//! translates the batch into individual registrations and stops at the
//! first error.

use crate::router::{Handler, HandlerResult, Router};
use crate::signal::{Signal, SignalTarget};
use crate::RouterError;
use std::any::{Any, TypeId};
use std::sync::Arc;
use tracing::debug;

/// One named handler awaiting registration.
pub struct HandlerDescriptor {
    name: String,
    handler: Handler,
}

impl HandlerDescriptor {
    /// Descriptor for an untyped handler.
    pub fn plain<F>(name: impl Into<String>, handler: F) -> HandlerDescriptor
    where
        F: Fn(&Router, &dyn SignalTarget, &mut Signal) -> HandlerResult + Send + Sync + 'static,
    {
        HandlerDescriptor {
            name: name.into(),
            handler: Handler::Plain(Arc::new(handler)),
        }
    }

    /// Descriptor for a handler declaring payload type `T`.
    pub fn typed<T, F>(name: impl Into<String>, handler: F) -> HandlerDescriptor
    where
        T: Any + Send + Sync,
        F: Fn(&Router, &dyn SignalTarget, &mut Signal, &T) -> HandlerResult
            + Send
            + Sync
            + 'static,
    {
        let run = Arc::new(
            move |router: &Router,
                  target: &dyn SignalTarget,
                  signal: &mut Signal,
                  data: &(dyn Any + Send + Sync)| {
                match data.downcast_ref::<T>() {
                    Some(value) => handler(router, target, signal, value),
                    None => Ok(()),
                }
            },
        );
        HandlerDescriptor {
            name: name.into(),
            handler: Handler::Typed {
                payload: TypeId::of::<T>(),
                payload_name: std::any::type_name::<T>(),
                run,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Register every descriptor, in order. Fails fast: the first rejected
/// descriptor aborts the batch and earlier registrations stay in place.
pub fn register_all(
    router: &Router,
    descriptors: impl IntoIterator<Item = HandlerDescriptor>,
) -> Result<(), RouterError> {
    for descriptor in descriptors {
        let index = router.register_prebuilt(&descriptor.name, descriptor.handler)?;
        debug!(name = %descriptor.name, index, "descriptor registered");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::{NullTarget, RouterOptions};
    use spindle_types::ModelId;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn batch_registration_wires_every_descriptor() {
        let router = Arc::new(Router::new(RouterOptions::default()));
        let total = Arc::new(AtomicI32::new(0));
        let total_for_add = total.clone();

        register_all(
            &router,
            vec![
                HandlerDescriptor::plain("reset", |_, _, _| Ok(())),
                HandlerDescriptor::typed::<i32, _>("add", move |_, _, _, n| {
                    total_for_add.fetch_add(*n, Ordering::SeqCst);
                    Ok(())
                }),
            ],
        )
        .unwrap();
        router.build();

        let content = router.build_content("add", Some(5i32)).unwrap();
        let mut signal = Signal::new(router.clone(), ModelId::named("dest"), Some(content));
        let handler = router.signal_processor(signal.content().unwrap()).unwrap();
        router
            .invoke_processor(&handler, &NullTarget(ModelId::named("dest")), &mut signal)
            .unwrap();

        assert!(signal.handled());
        assert_eq!(total.load(Ordering::SeqCst), 5);
        assert!(router.index_of("reset").is_some());
    }

    #[test]
    fn batch_registration_fails_fast_on_duplicates() {
        let router = Router::new(RouterOptions::default());
        let err = register_all(
            &router,
            vec![
                HandlerDescriptor::plain("once", |_, _, _| Ok(())),
                HandlerDescriptor::plain("once", |_, _, _| Ok(())),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, RouterError::SignalExists { .. }));
        // The first registration survived the failed batch.
        assert!(router.index_of("once").is_some());
    }
}
