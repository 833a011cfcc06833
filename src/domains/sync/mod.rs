pub mod drainer;
pub mod remote;
pub mod service;
pub mod uploader;

pub use drainer::{DrainCounts, DrainSummary, SyncDrainer};
pub use remote::{ApiRemoteStore, RemoteDoc, RemoteStore, SnapshotStream};
pub use service::{
    BatchSaveSummary, DeleteOutcome, EditStudent, GalleryService, SaveOutcome, ViewEvent,
};
pub use uploader::{HttpMediaUploader, MediaBlob, MediaType, MediaUploader, ProgressFn};
