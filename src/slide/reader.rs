//! Entry point for opening slides and planning their extraction.

use std::path::Path;

use tracing::debug;

use super::extract::extract_region;
use super::handle::SlideHandle;
use super::region::{select_region, Envelope, PlannerSettings, RegionPlan, RegionRequest};
use crate::error::SlideError;
use crate::io::{FileRangeReader, RangeReader};
use crate::raster::PixelBuffer;

/// Opens slides and turns them into bounded-memory region requests.
#[derive(Debug, Clone, Copy)]
pub struct SlideReader {
    settings: PlannerSettings,
}

impl SlideReader {
    pub fn new(settings: PlannerSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &PlannerSettings {
        &self.settings
    }

    /// Open a slide file from the local filesystem.
    pub async fn open(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<SlideHandle<FileRangeReader>, SlideError> {
        let path = path.as_ref();
        let reader = FileRangeReader::open(path)
            .await
            .map_err(|e| SlideError::unreadable(path.display().to_string(), e))?;
        self.open_reader(reader).await
    }

    /// Open a slide from any byte source.
    pub async fn open_reader<R: RangeReader>(
        &self,
        reader: R,
    ) -> Result<SlideHandle<R>, SlideError> {
        let identifier = reader.identifier().to_string();
        SlideHandle::open(reader)
            .await
            .map_err(|e| SlideError::unreadable(identifier, e))
    }

    /// Plan which level (and, if needed, which tile grid) to extract so the
    /// output fits `envelope` without exceeding the memory ceiling.
    pub fn select_region<R: RangeReader>(
        &self,
        handle: &SlideHandle<R>,
        envelope: Envelope,
    ) -> Result<RegionPlan, SlideError> {
        let plan = select_region(&handle.levels(), envelope, &self.settings)
            .map_err(|e| SlideError::unreadable(handle.identifier(), e))?;
        debug!(
            slide = handle.identifier(),
            level = plan.level(),
            requests = plan.request_count(),
            envelope = %envelope,
            "Planned region"
        );
        Ok(plan)
    }

    pub async fn extract<R: RangeReader>(
        &self,
        handle: &SlideHandle<R>,
        request: &RegionRequest,
    ) -> Result<PixelBuffer, SlideError> {
        extract_region(handle, request).await
    }
}
