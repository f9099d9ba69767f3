//! Task handlers run by `lumen worker`

mod media;
mod scan;

use media::{MetadataHandler, ThumbnailHandler};
use scan::ScanHandler;

use lumen_core::TaskKind;
use lumen_runtime::HandlerRegistry;

/// One handler per task kind
pub fn builtin_handlers() -> HandlerRegistry {
    HandlerRegistry::new()
        .register(TaskKind::ScanDirectory, ScanHandler)
        .register(TaskKind::ExtractMetadata, MetadataHandler::default())
        .register(TaskKind::GenerateThumbnail, ThumbnailHandler::default())
}
