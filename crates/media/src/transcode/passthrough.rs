use async_trait::async_trait;

use super::{TranscodeJob, TranscodeProvider};
use crate::{Error, Result};

/// Provider used when no codec tool is installed. Never available.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughTranscoder;

#[async_trait]
impl TranscodeProvider for PassthroughTranscoder {
    fn id(&self) -> &'static str {
        "passthrough"
    }

    async fn available(&self) -> bool {
        false
    }

    async fn transcode(&self, job: &TranscodeJob) -> Result<()> {
        Err(Error::Message(format!(
            "no transcoder installed, cannot convert {}",
            job.source.display()
        )))
    }
}
