//! Stream discovery and binding
//!
//! Resolves each requested stream name, checks that exactly one biosignal
//! stream and at most one marker stream were found, and only then opens the
//! subscriptions. Nothing is polled before the cardinality checks pass.

use super::{StreamHandle, StreamInfo, StreamKind, StreamResolver};
use crate::error::{Error, Result};
use std::collections::BTreeSet;
use std::time::Duration;

/// Default bound on the initial clock offset measurement
const DEFAULT_CORRECTION_TIMEOUT: Duration = Duration::from_secs(1);

/// The streams bound for one acquisition session
#[derive(Debug)]
pub struct BoundStreams {
    biosignal: StreamHandle,
    marker: Option<StreamHandle>,
}

impl BoundStreams {
    pub fn biosignal(&self) -> &StreamHandle {
        &self.biosignal
    }

    pub fn marker(&self) -> Option<&StreamHandle> {
        self.marker.as_ref()
    }

    /// Look up a bound stream by name
    pub fn get(&self, name: &str) -> Option<&StreamHandle> {
        std::iter::once(&self.biosignal)
            .chain(self.marker.as_ref())
            .find(|h| h.name() == name)
    }

    /// Names of all bound streams
    pub fn names(&self) -> Vec<&str> {
        std::iter::once(&self.biosignal)
            .chain(self.marker.as_ref())
            .map(|h| h.name())
            .collect()
    }

    /// Mutable access to both handles, as the acquisition loop needs them
    pub fn split_mut(&mut self) -> (&mut StreamHandle, Option<&mut StreamHandle>) {
        (&mut self.biosignal, self.marker.as_mut())
    }

    /// Release every subscription
    pub fn release(&mut self) {
        self.biosignal.release();
        if let Some(marker) = self.marker.as_mut() {
            marker.release();
        }
    }
}

/// Discovers and binds named streams through a [`StreamResolver`]
pub struct StreamRegistry<R> {
    resolver: R,
    max_chunk_len: usize,
    correction_timeout: Duration,
}

impl<R: StreamResolver> StreamRegistry<R> {
    /// Create a registry over a backend
    ///
    /// # Arguments
    /// * `resolver` - Network backend used for resolution and subscriptions
    /// * `max_chunk_len` - Chunk size hint passed to new subscriptions
    pub fn new(resolver: R, max_chunk_len: usize) -> Self {
        Self {
            resolver,
            max_chunk_len,
            correction_timeout: DEFAULT_CORRECTION_TIMEOUT,
        }
    }

    /// Set the bound on clock offset measurements taken at bind time
    pub fn with_correction_timeout(mut self, timeout: Duration) -> Self {
        self.correction_timeout = timeout;
        self
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    /// Resolve every stream visible under the given names without binding
    pub fn resolve_all<I, S>(&self, names: I, timeout: Duration) -> Result<Vec<StreamInfo>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let requested: BTreeSet<String> =
            names.into_iter().map(|s| s.as_ref().to_string()).collect();

        let mut resolved = Vec::new();
        for name in &requested {
            let found = self
                .resolver
                .resolve(name, timeout)
                .map_err(|e| {
                    tracing::error!(stream = %name, error = %e, "Stream resolution failed");
                    Error::StreamNotFound {
                        name: name.clone(),
                        timeout,
                    }
                })?;

            if found.is_empty() {
                return Err(Error::StreamNotFound {
                    name: name.clone(),
                    timeout,
                });
            }

            tracing::info!(stream = %name, candidates = found.len(), "Stream resolved");
            resolved.extend(found);
        }

        Ok(resolved)
    }

    /// Resolve the named streams and bind them
    ///
    /// # Errors
    /// - [`Error::StreamNotFound`] if a name resolves to nothing
    /// - [`Error::AmbiguousStream`] for more than one biosignal or marker stream
    /// - [`Error::MissingBiosignalStream`] if no biosignal stream was found
    /// - [`Error::StreamBind`] if a subscription cannot be opened
    pub fn discover<I, S>(&self, names: I, timeout: Duration) -> Result<BoundStreams>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let requested: Vec<String> = names
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let resolved = self.resolve_all(&requested, timeout)?;

        let (biosignals, markers): (Vec<StreamInfo>, Vec<StreamInfo>) = resolved
            .into_iter()
            .partition(|info| info.kind() == StreamKind::Biosignal);

        if biosignals.len() > 1 {
            return Err(Error::AmbiguousStream {
                kind: StreamKind::Biosignal,
                names: biosignals.into_iter().map(|i| i.name).collect(),
            });
        }
        if markers.len() > 1 {
            return Err(Error::AmbiguousStream {
                kind: StreamKind::Marker,
                names: markers.into_iter().map(|i| i.name).collect(),
            });
        }

        let biosignal_info = biosignals
            .into_iter()
            .next()
            .ok_or(Error::MissingBiosignalStream { requested })?;

        let biosignal = self.bind(&biosignal_info)?;
        // On failure here the biosignal handle is dropped, which releases it
        let marker = match markers.into_iter().next() {
            Some(info) => Some(self.bind(&info)?),
            None => None,
        };

        Ok(BoundStreams { biosignal, marker })
    }

    fn bind(&self, info: &StreamInfo) -> Result<StreamHandle> {
        let inlet = self
            .resolver
            .open(info, self.max_chunk_len)
            .map_err(|source| Error::StreamBind {
                name: info.name.clone(),
                source,
            })?;
        Ok(StreamHandle::bind(info, inlet, self.correction_timeout))
    }
}
