//! ROM library: directory listing and validated downloads

pub mod catalog;
pub mod config;
pub mod platform;
pub mod security;
pub mod streamer;


use std::sync::Arc;

use async_trait::async_trait;

use crate::protocol::{LibraryError, Listing, ResolvedRom, StreamOutcome};

use catalog::DirectoryCatalog;
use config::LibraryConfig;
use security::PathValidator;
use streamer::{ByteSink, HandleGauge, SecureFileStreamer};

/// Everything the HTTP layer needs from the filesystem
#[async_trait]
pub trait RomStore: Send + Sync {
    async fn list_files(&self) -> Result<Listing, LibraryError>;

    async fn resolve_download(&self, raw_name: &str) -> Result<ResolvedRom, LibraryError>;

    async fn stream_download(
        &self,
        rom: &ResolvedRom,
        sink: &mut dyn ByteSink,
    ) -> Result<StreamOutcome, LibraryError>;
}

pub struct RomLibrary {
    config: Arc<LibraryConfig>,
    catalog: DirectoryCatalog,
    streamer: SecureFileStreamer,
}

impl RomLibrary {
    pub fn new(config: LibraryConfig) -> Self {
        let config = Arc::new(config);
        let validator = Arc::new(PathValidator::new(config.clone()));
        let catalog = DirectoryCatalog::new(validator.clone(), config.follow_symlinks);
        let streamer = SecureFileStreamer::new(validator, config.chunk_size);
        Self {
            config,
            catalog,
            streamer,
        }
    }

    pub fn config(&self) -> &LibraryConfig {
        self.config.as_ref()
    }

    pub fn handles(&self) -> &HandleGauge {
        self.streamer.gauge()
    }
}

#[async_trait]
impl RomStore for RomLibrary {
    async fn list_files(&self) -> Result<Listing, LibraryError> {
        self.catalog.list().await
    }

    async fn resolve_download(&self, raw_name: &str) -> Result<ResolvedRom, LibraryError> {
        self.streamer.resolve(raw_name).await
    }

    async fn stream_download(
        &self,
        rom: &ResolvedRom,
        sink: &mut dyn ByteSink,
    ) -> Result<StreamOutcome, LibraryError> {
        self.streamer.stream(rom, sink).await
    }
}
