//! Pipeline stage trait
//!
//! Defines the interface the engine uses to drive the stages of its playback
//! pipeline. Stages communicate through channels and run in their own async
//! task until the input side closes.

use anyhow::Result;
use async_trait::async_trait;

/// Trait for pipeline stages that process media data
#[async_trait]
pub trait PipelineStage: Send + Sync {
    /// Run the stage, processing data until the input channel closes
    async fn run(&mut self) -> Result<()>;

    /// Get the name of this stage for logging
    fn name(&self) -> &'static str;

    /// Gracefully shutdown the stage
    async fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}
