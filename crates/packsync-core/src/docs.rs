//! # Documentation Hook
//!
//! Generating and uploading pack documentation happens outside the engine.
//! The orchestrator only tells a [`DocPublisher`] which version namespace
//! was synced (or skipped); failures there are logged and never fail a pack.

use crate::pack::PackDefinition;
use crate::types::PackSyncError;

/// Receives the pack and version namespace after every sync attempt that
/// reached version resolution.
pub trait DocPublisher {
    fn publish(&mut self, pack: &PackDefinition, version_ns: &str) -> Result<(), PackSyncError>;
}

/// Publisher that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDocPublisher;

impl DocPublisher for NoopDocPublisher {
    fn publish(&mut self, _pack: &PackDefinition, _version_ns: &str) -> Result<(), PackSyncError> {
        Ok(())
    }
}

/// Publisher that remembers every call, in order.
#[derive(Debug, Clone, Default)]
pub struct RecordingDocPublisher {
    pub published: Vec<(String, String)>,
}

impl DocPublisher for RecordingDocPublisher {
    fn publish(&mut self, pack: &PackDefinition, version_ns: &str) -> Result<(), PackSyncError> {
        self.published.push((pack.name.clone(), version_ns.to_string()));
        Ok(())
    }
}
