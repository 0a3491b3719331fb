//! Protocol extensions
//!
//! Extensions are registered explicitly at startup and run in registration
//! order around every method handler: once before the handler body (no data)
//! and once after it.
//!
//! Each extension decides per request how it supports the `(method, hook)`
//! pair. A `Strict` extension whose `process` returns `false` vetoes the
//! request and stops the pipeline; a `Soft` one is advisory only.
//!
//! Extensions never see a request body as a whole. One that needs the body
//! hands out a [`BodyObserver`], which is fed every chunk as it is written;
//! the after-hook then gets that observer's output.

use crate::protocol::{TusError, TusResponse};
use crate::router::TusMethod;
use hyper::header::HeaderMap;
use std::sync::Arc;

pub mod checksum;

pub use checksum::{ChecksumAlgorithm, ChecksumExtension, DigestObserver};

/// Point in the request lifecycle an extension runs at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    Before,
    After,
}

/// How an extension takes part in a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Support {
    None,
    Soft,
    Strict,
}

/// Consumes a request body chunk by chunk, in write order
pub trait BodyObserver: Send {
    fn update(&mut self, chunk: &[u8]);

    /// Output handed to [`Extension::process`]; called once, after the last chunk
    fn finish(&mut self) -> Vec<u8>;
}

/// A pluggable before/after check
pub trait Extension: Send + Sync {
    /// Name advertised in `Tus-Extension`
    fn name(&self) -> &'static str;

    /// Support level for this request; malformed extension headers are errors
    fn has_support(
        &self,
        method: TusMethod,
        headers: &HeaderMap,
        hook: Hook,
    ) -> Result<Support, TusError>;

    /// Observer for the body of a request this extension supports after the handler
    fn body_observer(
        &self,
        _method: TusMethod,
        _headers: &HeaderMap,
    ) -> Option<Box<dyn BodyObserver>> {
        None
    }

    /// Run the extension; `false` means the check failed
    ///
    /// `observed` is the output of this extension's body observer, or `None`
    /// when no body was observed.
    fn process(
        &self,
        headers: &HeaderMap,
        response: &mut TusResponse,
        observed: Option<&[u8]>,
    ) -> bool;
}

/// Per-request observers, one slot per registered extension
#[derive(Default)]
pub struct BodyObservers {
    slots: Vec<Option<Box<dyn BodyObserver>>>,
}

impl BodyObservers {
    /// Whether no extension asked to see the body
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    pub fn update(&mut self, chunk: &[u8]) {
        for observer in self.slots.iter_mut().flatten() {
            observer.update(chunk);
        }
    }

    pub fn finish(mut self) -> ObservedBody {
        ObservedBody {
            outputs: self
                .slots
                .iter_mut()
                .map(|slot| slot.as_mut().map(|observer| observer.finish()))
                .collect(),
        }
    }
}

/// Finished observer outputs, aligned with the registered extensions
#[derive(Debug, Default)]
pub struct ObservedBody {
    outputs: Vec<Option<Vec<u8>>>,
}

impl ObservedBody {
    fn get(&self, index: usize) -> Option<&[u8]> {
        self.outputs.get(index).and_then(|o| o.as_deref())
    }
}

/// Ordered registry of extensions
#[derive(Clone, Default)]
pub struct ExtensionPipeline {
    extensions: Vec<Arc<dyn Extension>>,
}

impl ExtensionPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, extension: Arc<dyn Extension>) {
        self.extensions.push(extension);
    }

    pub fn with(mut self, extension: Arc<dyn Extension>) -> Self {
        self.register(extension);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    /// Distinct extension names in registration order
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = Vec::new();
        for extension in &self.extensions {
            if !names.contains(&extension.name()) {
                names.push(extension.name());
            }
        }
        names
    }

    /// Observers for the after-hook of this request
    ///
    /// Runs the after-hook support check, so malformed extension headers fail
    /// here, before the body is read.
    pub fn observers(
        &self,
        method: TusMethod,
        headers: &HeaderMap,
    ) -> Result<BodyObservers, TusError> {
        let mut slots = Vec::with_capacity(self.extensions.len());
        for extension in &self.extensions {
            let slot = match extension.has_support(method, headers, Hook::After)? {
                Support::None => None,
                _ => extension.body_observer(method, headers),
            };
            slots.push(slot);
        }
        Ok(BodyObservers { slots })
    }

    /// Run the hook; `Ok(false)` means a strict extension vetoed the request
    pub fn run(
        &self,
        hook: Hook,
        method: TusMethod,
        headers: &HeaderMap,
        response: &mut TusResponse,
        observed: Option<&ObservedBody>,
    ) -> Result<bool, TusError> {
        for (index, extension) in self.extensions.iter().enumerate() {
            let support = extension.has_support(method, headers, hook)?;
            if support == Support::None {
                continue;
            }

            let data = observed.and_then(|body| body.get(index));
            let passed = extension.process(headers, response, data);
            if !passed {
                if support == Support::Strict {
                    tracing::info!(
                        extension = extension.name(),
                        method = %method,
                        hook = ?hook,
                        "Strict extension vetoed request"
                    );
                    return Ok(false);
                }
                tracing::debug!(
                    extension = extension.name(),
                    method = %method,
                    hook = ?hook,
                    "Soft extension check failed"
                );
            }
        }
        Ok(true)
    }
}
