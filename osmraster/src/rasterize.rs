//! Rasterization trigger.
//!
//! Turns one category's vector table into one image. The [`Rasterizer`] is
//! idempotent across runs: the image path is deterministic, so an existing
//! image means the category was already done.
//!
//! | image exists | overwrite | action                          |
//! |--------------|-----------|---------------------------------|
//! | no           | -         | submit                          |
//! | yes          | no        | skip, no remote call            |
//! | yes          | yes       | delete image, then submit       |

use std::sync::Arc;

use tracing::{debug, info};

use crate::asset::AssetIds;
use crate::category::Category;
use crate::job::{JobError, JobRecord};
use crate::remote::{
    Dispatcher, ExportRequest, RasterizeRequest, Reducer, RemoteResult, RemoteService, Target,
};

/// Table property burned into raster cells.
pub const BURN_PROPERTY: &str = "burn";

/// Output grid CRS.
pub const DEFAULT_CRS: &str = "EPSG:4326";

/// Output grid resolution in meters.
pub const DEFAULT_SCALE_METERS: f64 = 300.0;

/// Where a category's features are read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableSource {
    /// Each category has its own imported table.
    PerCategory,
    /// All categories live in one pre-existing table.
    Shared(String),
}

/// What already exists remotely for a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The image is there.
    ImageExists,
    /// No image, but the source table is there; rasterize directly.
    TableExists,
    /// Neither; the table has to be imported first.
    NeedsImport,
}

/// Result of asking for one category's image.
#[derive(Debug, Clone, PartialEq)]
pub enum RasterizeOutcome {
    /// The image already existed and overwrite is off.
    Skipped(String),
    /// A rasterize job is running.
    Submitted(JobRecord),
}

/// Submits per-category rasterize jobs.
pub struct Rasterizer {
    service: Arc<dyn RemoteService>,
    dispatcher: Dispatcher,
    ids: AssetIds,
    tables: TableSource,
    overwrite: bool,
    crs: String,
    scale_meters: f64,
}

impl Rasterizer {
    pub fn new(service: Arc<dyn RemoteService>, ids: AssetIds) -> Self {
        Self {
            dispatcher: Dispatcher::new(Arc::clone(&service)),
            service,
            ids,
            tables: TableSource::PerCategory,
            overwrite: false,
            crs: DEFAULT_CRS.to_string(),
            scale_meters: DEFAULT_SCALE_METERS,
        }
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn with_table_source(mut self, tables: TableSource) -> Self {
        self.tables = tables;
        self
    }

    /// Sets the output grid.
    pub fn with_grid(mut self, crs: impl Into<String>, scale_meters: f64) -> Self {
        self.crs = crs.into();
        self.scale_meters = scale_meters;
        self
    }

    pub fn ids(&self) -> &AssetIds {
        &self.ids
    }

    pub fn overwrite(&self) -> bool {
        self.overwrite
    }

    pub fn table_source(&self) -> &TableSource {
        &self.tables
    }

    /// Table the category's features are read from.
    pub fn table_for(&self, category: &Category) -> String {
        match self.tables {
            TableSource::PerCategory => self.ids.table(category),
            TableSource::Shared(ref table) => table.clone(),
        }
    }

    /// Checks what already exists for `category`.
    ///
    /// This only looks; overwrite handling happens in [`Self::rasterize`].
    pub async fn readiness(&self, category: &Category) -> RemoteResult<Readiness> {
        if self.service.get_asset(&self.ids.image(category)).await? {
            return Ok(Readiness::ImageExists);
        }
        let table_exists = match self.tables {
            TableSource::Shared(_) => true,
            TableSource::PerCategory => self.service.get_asset(&self.ids.table(category)).await?,
        };
        Ok(if table_exists {
            Readiness::TableExists
        } else {
            Readiness::NeedsImport
        })
    }

    /// Export request for `category`.
    pub fn request(&self, category: &Category) -> RasterizeRequest {
        RasterizeRequest {
            table: self.table_for(category),
            category: category.clone(),
            burn_property: BURN_PROPERTY.to_string(),
            reducer: Reducer::Max,
            crs: self.crs.clone(),
            scale_meters: self.scale_meters,
            target: self.ids.image(category),
        }
    }

    /// Submits the rasterize job for `category`, honoring overwrite.
    pub async fn rasterize(&self, category: &Category) -> Result<RasterizeOutcome, JobError> {
        let image = self.ids.image(category);

        if self.dispatcher.vacate(&image, self.overwrite).await? == Target::Existing {
            debug!(attribute = %category.attribute, tag = %category.tag, "Image exists");
            return Ok(RasterizeOutcome::Skipped(image));
        }

        let request = ExportRequest::Rasterize(self.request(category));
        let record = self
            .dispatcher
            .submit_export(&request)
            .await?
            .for_category(category.clone());

        info!(
            job_id = %record.id(),
            attribute = %category.attribute,
            tag = %category.tag,
            asset = %image,
            "Rasterizing"
        );
        Ok(RasterizeOutcome::Submitted(record))
    }
}
