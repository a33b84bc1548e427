//! Media ingestion: MIME resolution, scratch-space staging, and transcoding
//! through an external codec tool.

pub mod error;
pub mod mime;
pub mod staging;
pub mod transcode;
pub mod upload;

pub use {
    error::{Error, Result},
    staging::{StagePayload, StagedMedia, StagingStore},
    transcode::{
        FfmpegTranscoder, PassthroughTranscoder, TranscodeEngine, TranscodeJob, TranscodeProvider,
        TranscodeTarget, TranscodedFile,
    },
    upload::{PreparedUpload, prepare_local_file},
};
