//! Pipeline driver.
//!
//! A run has three phases:
//!
//! 1. [`Pipeline::prepare`] checks preconditions, then acquires the input
//!    (download, conversion, per-category split).
//! 2. [`Pipeline::run`] fans out the remote work in waves: table imports,
//!    rasterization, the roads table and the composite merge. Each wave is
//!    polled to completion before the next starts; a table that finishes
//!    importing is rasterized right away.
//! 3. [`Pipeline::cleanup`] deletes everything transient.
//!
//! [`Pipeline::execute`] runs all three and guarantees cleanup happens on
//! every exit path.
//!
//! Failures of single units of work never abort the run. They are collected
//! in the [`PipelineReport`]; only precondition and planning errors end a run
//! early.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::asset::AssetIds;
use crate::auth::{GcloudTokenSource, StaticToken, TokenSource};
use crate::category::{Category, CategorySet};
use crate::cleanup::{CleanupCoordinator, CleanupReport, TransientAsset};
use crate::config::{PipelineConfig, SourceKind};
use crate::convert::{
    combine_layers, split_by_category, CategoryCsv, ConvertError, ConvertResult, Ogr2OgrConverter,
    VectorConverter,
};
use crate::error::{PipelineError, PipelineResult};
use crate::job::{JobError, JobKind, JobRecord};
use crate::logging::StageTimer;
use crate::merge::{plan_composite, BandMetadata, MergeError};
use crate::poller::{Collector, CompletionHandler, JobRegistry, Poller};
use crate::rasterize::{RasterizeOutcome, Rasterizer, Readiness, TableSource};
use crate::remote::{Dispatcher, EarthEngineClient, ExportRequest, ImportKind, RemoteService, Target};
use crate::roads::plan_roads;
use crate::source::Downloader;
use crate::storage::{BlobStore, BlobUri, GcsBlobStore, StorageError};
use crate::BoxFuture;

// =============================================================================
// Report
// =============================================================================

/// A unit of work that did not produce its asset.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitFailure {
    pub category: Option<Category>,
    pub kind: JobKind,
    /// Asset the unit was meant to write.
    pub asset: String,
    pub error: JobError,
}

impl UnitFailure {
    fn from_record(record: &JobRecord) -> Self {
        Self {
            category: record.category().cloned(),
            kind: record.kind(),
            asset: record.target().to_string(),
            error: record
                .error()
                .cloned()
                .unwrap_or_else(|| JobError::Submission("no error reported".to_string())),
        }
    }
}

/// What a run did.
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    /// Jobs accepted by the remote service.
    pub submitted: usize,
    /// Final assets written by jobs that succeeded.
    pub produced: Vec<String>,
    /// Final assets that already existed and were kept.
    pub skipped: Vec<String>,
    pub failures: Vec<UnitFailure>,
    /// Roads table, when one exists at the end of the run.
    pub roads: Option<String>,
    /// Composite image, when one exists at the end of the run.
    pub composite: Option<String>,
    /// The source had no rows for any configured category.
    pub nothing_to_import: bool,
    pub cleanup: Option<CleanupReport>,
}

impl PipelineReport {
    /// True when no unit of work failed.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.produced.len()
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    fn fail(&mut self, category: Option<&Category>, kind: JobKind, asset: &str, error: JobError) {
        warn!(kind = %kind, asset, error = %error, "Unit of work failed");
        self.failures.push(UnitFailure {
            category: category.cloned(),
            kind,
            asset: asset.to_string(),
            error,
        });
    }
}

/// Records final assets as their jobs finish.
impl CompletionHandler for PipelineReport {
    fn on_success(&mut self, record: JobRecord) -> BoxFuture<'_, ()> {
        let asset = record.target().to_string();
        match record.kind() {
            JobKind::TableMerge => self.roads = Some(asset.clone()),
            JobKind::Composite => self.composite = Some(asset.clone()),
            _ => {}
        }
        self.produced.push(asset);
        Box::pin(async {})
    }

    fn on_failure(&mut self, record: JobRecord) -> BoxFuture<'_, ()> {
        self.failures.push(UnitFailure::from_record(&record));
        Box::pin(async {})
    }
}

/// Rasterizes each table as soon as its import succeeds.
struct ImportHandler<'a> {
    rasterizer: &'a Rasterizer,
    rasters: &'a mut JobRegistry,
    report: &'a mut PipelineReport,
}

impl CompletionHandler for ImportHandler<'_> {
    fn on_success(&mut self, record: JobRecord) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let Some(category) = record.category() else {
                warn!(job_id = %record.id(), "Import finished without a category");
                return;
            };
            submit_raster(self.rasterizer, category, self.rasters, self.report).await;
        })
    }

    fn on_failure(&mut self, record: JobRecord) -> BoxFuture<'_, ()> {
        self.report.failures.push(UnitFailure::from_record(&record));
        Box::pin(async {})
    }
}

async fn submit_raster(
    rasterizer: &Rasterizer,
    category: &Category,
    rasters: &mut JobRegistry,
    report: &mut PipelineReport,
) {
    match rasterizer.rasterize(category).await {
        Ok(RasterizeOutcome::Submitted(record)) => {
            report.submitted += 1;
            rasters.insert(record);
        }
        Ok(RasterizeOutcome::Skipped(image)) => report.skipped.push(image),
        Err(e) => {
            let image = rasterizer.ids().image(category);
            report.fail(Some(category), JobKind::Rasterize, &image, e);
        }
    }
}

// =============================================================================
// Pipeline
// =============================================================================

enum Source {
    Table(String),
    Csv(PathBuf),
    File(PathBuf),
    Url(String),
}

enum Inputs {
    SharedTable(String),
    Csvs(Vec<CategoryCsv>),
    Nothing,
}

struct Prepared {
    inputs: Inputs,
    metadata: Option<BandMetadata>,
}

/// One pipeline run.
pub struct Pipeline {
    config: PipelineConfig,
    ids: AssetIds,
    service: Arc<dyn RemoteService>,
    blobs: Arc<dyn BlobStore>,
    converter: Arc<dyn VectorConverter>,
    downloader: Option<Downloader>,
    dispatcher: Dispatcher,
    cleanup: CleanupCoordinator,
    prepared: Option<Prepared>,
    report: PipelineReport,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        service: Arc<dyn RemoteService>,
        blobs: Arc<dyn BlobStore>,
        converter: Arc<dyn VectorConverter>,
    ) -> Self {
        let cleanup =
            CleanupCoordinator::new(service.clone(), blobs.clone()).with_skip(config.skip_cleanup);
        Self {
            ids: config.asset_ids(),
            dispatcher: Dispatcher::new(service.clone()),
            config,
            service,
            blobs,
            converter,
            downloader: None,
            cleanup,
            prepared: None,
            report: PipelineReport::default(),
        }
    }

    /// Builds a pipeline against Earth Engine and Cloud Storage.
    ///
    /// Staged blobs go under the run date in the configured bucket.
    pub fn connect(config: PipelineConfig) -> PipelineResult<Self> {
        let tokens: Arc<dyn TokenSource> = match config.access_token {
            Some(ref token) => Arc::new(StaticToken::new(token.clone())),
            None => Arc::new(GcloudTokenSource::new(
                config.gcloud.clone(),
                config.key_file.clone(),
            )),
        };

        let service = Arc::new(EarthEngineClient::new(config.project.clone(), tokens.clone())?);
        let blobs = Arc::new(
            GcsBlobStore::new(config.bucket.clone(), tokens)?.with_prefix(config.date.to_string()),
        );
        let converter = Arc::new(
            Ogr2OgrConverter::new(config.ogr2ogr.clone())
                .with_osm_config(config.osm_config_file.clone()),
        );

        Ok(Self::new(config, service, blobs, converter))
    }

    /// Uses `downloader` for URL sources instead of a default one.
    pub fn with_downloader(mut self, downloader: Downloader) -> Self {
        self.downloader = Some(downloader);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn report(&self) -> &PipelineReport {
        &self.report
    }

    /// Transient assets registered so far.
    pub fn transient(&self) -> &[TransientAsset] {
        self.cleanup.pending()
    }

    /// Runs prepare and run, then cleanup regardless of how they ended.
    pub async fn execute(mut self) -> PipelineResult<PipelineReport> {
        let result = self.run().await;

        let cleanup = self.cleanup().await;
        self.report.cleanup = Some(cleanup);

        match result {
            Ok(()) => {
                info!(
                    submitted = self.report.submitted,
                    succeeded = self.report.succeeded(),
                    skipped = self.report.skipped.len(),
                    failed = self.report.failed(),
                    "Pipeline finished"
                );
                Ok(self.report)
            }
            Err(e) => {
                error!(error = %e, "Pipeline aborted");
                Err(e)
            }
        }
    }

    /// Checks preconditions and acquires the input.
    ///
    /// Missing inputs fail here, before anything is submitted. A source
    /// with no rows for any configured category is not an error; the run
    /// then has nothing to do.
    pub async fn prepare(&mut self) -> PipelineResult<()> {
        let _timer = StageTimer::start("prepare");
        self.config.validate()?;

        let source = match self.config.source()? {
            SourceKind::Table(table) => Source::Table(table.to_string()),
            SourceKind::Csv(path) => Source::Csv(path.to_path_buf()),
            SourceKind::File(path) => Source::File(path.to_path_buf()),
            SourceKind::Url(url) => Source::Url(url.to_string()),
        };

        match source {
            Source::Table(ref table) => {
                if !self.service.get_asset(table).await? {
                    return Err(PipelineError::TableNotFound(table.clone()));
                }
            }
            Source::Csv(ref path) | Source::File(ref path) => {
                if !path.is_file() {
                    return Err(PipelineError::FileNotFound(path.clone()));
                }
            }
            Source::Url(_) => {}
        }

        let metadata = match self.config.metadata.clone() {
            Some(location) => Some(self.load_metadata(&location).await?),
            None => None,
        };

        let inputs = match source {
            Source::Table(table) => Inputs::SharedTable(table),
            Source::Csv(path) => {
                let scratch = self.scratch_dir().await?;
                self.split(path, &scratch).await?
            }
            Source::File(path) => {
                let scratch = self.scratch_dir().await?;
                self.convert(&path, &scratch).await?
            }
            Source::Url(url) => {
                let scratch = self.scratch_dir().await?;
                let downloader = match self.downloader.take() {
                    Some(downloader) => downloader,
                    None => Downloader::new()?,
                };
                let path = downloader.download(&url, &scratch).await?;
                self.convert(&path, &scratch).await?
            }
        };

        if matches!(inputs, Inputs::Nothing) {
            info!("No rows for any configured category, nothing to import");
            self.report.nothing_to_import = true;
        }
        self.prepared = Some(Prepared { inputs, metadata });
        Ok(())
    }

    /// Submits and polls every wave of remote work.
    ///
    /// Prepares first when [`Self::prepare`] has not been called.
    pub async fn run(&mut self) -> PipelineResult<()> {
        if self.prepared.is_none() {
            self.prepare().await?;
        }
        let Some(prepared) = self.prepared.take() else {
            return Ok(());
        };

        let tables = match prepared.inputs {
            Inputs::Nothing => return Ok(()),
            Inputs::SharedTable(ref table) => TableSource::Shared(table.clone()),
            Inputs::Csvs(_) => TableSource::PerCategory,
        };
        let rasterizer = Rasterizer::new(self.service.clone(), self.ids.clone())
            .with_overwrite(self.config.overwrite)
            .with_table_source(tables)
            .with_grid(self.config.crs.clone(), self.config.scale_meters);

        self.rasterize(&rasterizer, &prepared.inputs).await;

        if self.config.import_roads {
            self.roads(&rasterizer, &prepared.inputs).await;
        }

        if let Some(ref metadata) = prepared.metadata {
            self.merge(metadata).await?;
        }
        Ok(())
    }

    /// Deletes transient assets. Safe to call more than once.
    pub async fn cleanup(&mut self) -> CleanupReport {
        let _timer = StageTimer::start("cleanup");
        self.cleanup.cleanup().await
    }

    // -------------------------------------------------------------------------
    // Input acquisition
    // -------------------------------------------------------------------------

    async fn scratch_dir(&mut self) -> PipelineResult<PathBuf> {
        let dir = self
            .config
            .work_dir
            .join(format!("osmraster-{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| PipelineError::Io {
                path: dir.clone(),
                source,
            })?;
        self.cleanup.register(TransientAsset::LocalFile(dir.clone()));
        debug!(dir = %dir.display(), "Created scratch directory");
        Ok(dir)
    }

    async fn convert(&self, source: &Path, scratch: &Path) -> PipelineResult<Inputs> {
        let converted = self
            .converter
            .convert(source, &self.config.categories, scratch)
            .await?;

        let combined = scratch.join("combined.csv");
        let categories = self.config.categories.clone();
        let output = combined.clone();
        let rows = blocking("combine", move || {
            combine_layers(&converted, &categories, &output)
        })
        .await?;

        if rows == 0 {
            return Ok(Inputs::Nothing);
        }
        self.split(combined, scratch).await
    }

    async fn split(&self, combined: PathBuf, scratch: &Path) -> PipelineResult<Inputs> {
        let categories = self.config.categories.clone();
        let output_dir = scratch.join("categories");
        let csvs = blocking("split", move || {
            std::fs::create_dir_all(&output_dir)
                .map_err(|e| ConvertError::io(&output_dir, e))?;
            split_by_category(&combined, &categories, &output_dir)
        })
        .await?;

        if csvs.is_empty() {
            return Ok(Inputs::Nothing);
        }
        info!(categories = csvs.len(), "Split input by category");
        Ok(Inputs::Csvs(csvs))
    }

    async fn load_metadata(&self, location: &str) -> PipelineResult<BandMetadata> {
        let bytes = if BlobUri::is_blob_uri(location) {
            match self.blobs.read_text(location).await {
                Err(StorageError::NotFound(_)) => {
                    return Err(PipelineError::FileNotFound(PathBuf::from(location)))
                }
                other => other?,
            }
        } else {
            let path = PathBuf::from(location);
            tokio::fs::read(&path).await.map_err(|source| {
                if source.kind() == std::io::ErrorKind::NotFound {
                    PipelineError::FileNotFound(path.clone())
                } else {
                    PipelineError::Io {
                        path: path.clone(),
                        source,
                    }
                }
            })?
        };

        let metadata = BandMetadata::from_json(&bytes)?;
        if metadata.images().is_empty() {
            return Err(MergeError::EmptyInput.into());
        }
        debug!(
            images = metadata.images().len(),
            bands = metadata.bands().len(),
            "Loaded band metadata"
        );
        Ok(metadata)
    }

    // -------------------------------------------------------------------------
    // Remote waves
    // -------------------------------------------------------------------------

    fn poller(&self) -> Poller {
        Poller::new(self.service.clone())
            .with_backoff(self.config.poll_unit, self.config.poll_max_increments)
            .with_timeout(self.config.poll_timeout)
    }

    /// Imports and rasterizes every category with input.
    async fn rasterize(&mut self, rasterizer: &Rasterizer, inputs: &Inputs) {
        let mut imports = JobRegistry::new();
        let mut rasters = JobRegistry::new();
        let road_tables = if self.roads_pending().await {
            self.config
                .road_categories
                .restricted_to(&self.config.categories)
        } else {
            CategorySet::default()
        };

        {
            let _timer = StageTimer::start("import");
            match inputs {
                Inputs::SharedTable(_) => {
                    for category in self.config.categories.clone().iter() {
                        submit_raster(rasterizer, category, &mut rasters, &mut self.report).await;
                    }
                }
                Inputs::Csvs(csvs) => {
                    for csv in csvs {
                        let keep_table =
                            road_tables.contains(&csv.category.attribute, &csv.category.tag);
                        self.import_category(rasterizer, csv, keep_table, &mut imports, &mut rasters)
                            .await;
                    }
                }
                Inputs::Nothing => {}
            }

            let poller = self.poller();
            let mut handler = ImportHandler {
                rasterizer,
                rasters: &mut rasters,
                report: &mut self.report,
            };
            poller.drive(&mut imports, &mut handler).await;
        }

        let _timer = StageTimer::start("rasterize");
        let poller = self.poller();
        poller.drive(&mut rasters, &mut self.report).await;
    }

    /// Imports and rasterizes one category.
    ///
    /// With `keep_table` set the table is imported even when the image
    /// exists, so the roads table can be built from it.
    async fn import_category(
        &mut self,
        rasterizer: &Rasterizer,
        csv: &CategoryCsv,
        keep_table: bool,
        imports: &mut JobRegistry,
        rasters: &mut JobRegistry,
    ) {
        let category = &csv.category;
        let table = self.ids.table(category);

        let readiness = match rasterizer.readiness(category).await {
            Ok(readiness) => readiness,
            Err(e) => {
                let error = JobError::Submission(format!("existence check failed: {}", e));
                self.report
                    .fail(Some(category), JobKind::TableImport, &table, error);
                return;
            }
        };

        if !self.config.overwrite {
            match readiness {
                Readiness::ImageExists => {
                    if !keep_table || self.asset_exists(&table).await {
                        debug!(attribute = %category.attribute, tag = %category.tag, "Image exists");
                        self.report.skipped.push(self.ids.image(category));
                        return;
                    }
                    debug!(
                        attribute = %category.attribute,
                        tag = %category.tag,
                        "Image exists, importing table for the roads table"
                    );
                }
                Readiness::TableExists => {
                    submit_raster(rasterizer, category, rasters, &mut self.report).await;
                    return;
                }
                Readiness::NeedsImport => {}
            }
        }

        match self.import_table(csv, &table).await {
            Ok(record) => {
                self.report.submitted += 1;
                imports.insert(record);
            }
            Err(e) => self
                .report
                .fail(Some(category), JobKind::TableImport, &table, e),
        }
    }

    async fn import_table(&mut self, csv: &CategoryCsv, table: &str) -> Result<JobRecord, JobError> {
        if self.config.overwrite {
            self.dispatcher.vacate(table, true).await?;
        }

        let uri = self
            .blobs
            .upload(&csv.path)
            .await
            .map_err(|e| JobError::Submission(format!("upload failed: {}", e)))?;
        self.cleanup.register(TransientAsset::Blob(uri.clone()));

        let record = self
            .dispatcher
            .submit(ImportKind::Table, &uri, table)
            .await?
            .for_category(csv.category.clone());
        self.cleanup.register(TransientAsset::Table(table.to_string()));

        info!(
            job_id = %record.id(),
            attribute = %csv.category.attribute,
            tag = %csv.category.tag,
            rows = csv.rows,
            "Importing table"
        );
        Ok(record)
    }

    /// Whether this run still has to build the roads table.
    async fn roads_pending(&self) -> bool {
        if !self.config.import_roads {
            return false;
        }
        if self.config.overwrite {
            return true;
        }
        let target = self.ids.roads();
        match self.service.get_asset(&target).await {
            Ok(exists) => !exists,
            Err(e) => {
                warn!(asset = %target, error = %e, "Could not check roads table");
                true
            }
        }
    }

    async fn asset_exists(&self, asset: &str) -> bool {
        match self.service.get_asset(asset).await {
            Ok(exists) => exists,
            Err(e) => {
                warn!(asset, error = %e, "Could not check asset");
                false
            }
        }
    }

    /// Merges the road categories' tables into the roads table.
    async fn roads(&mut self, rasterizer: &Rasterizer, inputs: &Inputs) {
        let _timer = StageTimer::start("roads");
        let target = self.ids.roads();

        match self.dispatcher.vacate(&target, self.config.overwrite).await {
            Ok(Target::Existing) => {
                self.report.skipped.push(target.clone());
                self.report.roads = Some(target);
                return;
            }
            Ok(Target::Vacant) => {}
            Err(e) => {
                self.report.fail(None, JobKind::TableMerge, &target, e);
                return;
            }
        }

        let wanted = self
            .config
            .road_categories
            .restricted_to(&self.config.categories);
        let has_road_input = match inputs {
            Inputs::SharedTable(_) => !wanted.is_empty(),
            Inputs::Csvs(csvs) => csvs
                .iter()
                .any(|csv| wanted.contains(&csv.category.attribute, &csv.category.tag)),
            Inputs::Nothing => false,
        };

        let mut available = Vec::new();
        for category in &wanted {
            let table = rasterizer.table_for(category);
            if self.asset_exists(&table).await {
                available.push((category.clone(), table));
            }
        }

        let Some(request) = plan_roads(
            &available,
            &self.config.road_categories,
            &self.config.categories,
            &target,
        ) else {
            if has_road_input {
                let error = JobError::Submission("no road category table to merge".to_string());
                self.report.fail(None, JobKind::TableMerge, &target, error);
            } else {
                warn!("No road features in the input, roads table not built");
            }
            return;
        };

        let request = ExportRequest::TableMerge(request);
        match self.dispatcher.submit_export(&request).await {
            Ok(record) => {
                self.report.submitted += 1;
                let mut registry = JobRegistry::new();
                registry.insert(record);
                let poller = self.poller();
                poller.drive(&mut registry, &mut self.report).await;
            }
            Err(e) => self.report.fail(None, JobKind::TableMerge, &target, e),
        }
    }

    /// Imports the metadata's images and stacks them into the composite.
    async fn merge(&mut self, metadata: &BandMetadata) -> PipelineResult<()> {
        let _timer = StageTimer::start("merge");
        let target = self.ids.composite(&self.config.output_name);

        match self.dispatcher.vacate(&target, self.config.overwrite).await {
            Ok(Target::Existing) => {
                self.report.skipped.push(target.clone());
                self.report.composite = Some(target);
                return Ok(());
            }
            Ok(Target::Vacant) => {}
            Err(e) => {
                self.report.fail(None, JobKind::Composite, &target, e);
                return Ok(());
            }
        }

        let shards = self.import_shards(metadata).await;
        let request = plan_composite(&shards, metadata, &self.config.categories, &target)?;

        match self
            .dispatcher
            .submit_export(&ExportRequest::Composite(request))
            .await
        {
            Ok(record) => {
                self.report.submitted += 1;
                let mut registry = JobRegistry::new();
                registry.insert(record);
                let poller = self.poller();
                poller.drive(&mut registry, &mut self.report).await;
            }
            Err(e) => self.report.fail(None, JobKind::Composite, &target, e),
        }
        Ok(())
    }

    /// Imports each source image, returning the shards that are ready in
    /// metadata order.
    async fn import_shards(&mut self, metadata: &BandMetadata) -> Vec<String> {
        let mut ready = Vec::new();
        let mut registry = JobRegistry::new();

        for (i, uri) in metadata.images().iter().enumerate() {
            if metadata.images()[..i].contains(uri) {
                debug!(uri = %uri, "Image listed twice, importing once");
                continue;
            }
            let shard = self.ids.shard(uri);
            let result = match self.dispatcher.vacate(&shard, self.config.overwrite).await {
                Ok(Target::Existing) => {
                    ready.push(shard.clone());
                    continue;
                }
                Ok(Target::Vacant) => self.dispatcher.submit(ImportKind::Image, uri, &shard).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(record) => {
                    self.report.submitted += 1;
                    self.cleanup.register(TransientAsset::Image(shard));
                    registry.insert(record);
                }
                Err(e) => self.report.fail(None, JobKind::ImageImport, &shard, e),
            }
        }

        let mut collector = Collector::default();
        self.poller().drive(&mut registry, &mut collector).await;
        for record in &collector.failed {
            self.report.failures.push(UnitFailure::from_record(record));
        }

        let imported: Vec<&str> = collector.succeeded.iter().map(JobRecord::target).collect();
        metadata
            .images()
            .iter()
            .map(|uri| self.ids.shard(uri))
            .filter(|shard| ready.contains(shard) || imported.contains(&shard.as_str()))
            .collect()
    }
}

async fn blocking<T, F>(stage: &'static str, work: F) -> PipelineResult<T>
where
    F: FnOnce() -> ConvertResult<T> + Send + 'static,
    T: Send + 'static,
{
    let result = tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| PipelineError::Worker(stage, e.to_string()))?;
    Ok(result?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::CategorySet;
    use crate::remote::mock::{Call, MockRemoteService};
    use crate::storage::memory::MemoryBlobStore;
    use chrono::NaiveDate;
    use std::time::Duration;
    use tempfile::TempDir;

    const ROOT: &str = "projects/hii/assets/osm";

    /// Writes a fixed `lines.csv` layer, as `ogr2ogr` would.
    struct StubConverter {
        layer: String,
    }

    impl VectorConverter for StubConverter {
        fn convert<'a>(
            &'a self,
            _source: &'a Path,
            _categories: &'a CategorySet,
            work_dir: &'a Path,
        ) -> BoxFuture<'a, ConvertResult<PathBuf>> {
            Box::pin(async move {
                let dir = work_dir.join("converted");
                std::fs::create_dir_all(&dir).unwrap();
                std::fs::write(dir.join("lines.csv"), &self.layer).unwrap();
                Ok(dir)
            })
        }
    }

    const LAYER: &str = "WKT,osm_id,highway,landuse\n\
        \"LINESTRING (0 0,1 1)\",1,residential,\n\
        \"POLYGON ((0 0,1 0,1 1,0 0))\",2,,quarry\n\
        \"POINT (0 0)\",3,footway,\n";

    const COMBINED: &str = "\"WKT\",\"attribute\",\"tag\",\"burn\"\n\
        \"LINESTRING (0 0,1 1)\",\"highway\",\"residential\",\"1\"\n\
        \"POLYGON ((0 0,1 0,1 1,0 0))\",\"landuse\",\"quarry\",\"1\"\n\
        \"POINT (5 5)\",\"amenity\",\"bench\",\"1\"\n";

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 12, 31).unwrap()
    }

    fn ids() -> AssetIds {
        AssetIds::new(ROOT, date())
    }

    fn residential() -> Category {
        Category::new("highway", "residential")
    }

    fn quarry() -> Category {
        Category::new("landuse", "quarry")
    }

    fn config(work: &TempDir) -> PipelineConfig {
        PipelineConfig::new("hii", "hii-osm", date())
            .with_categories(CategorySet::from_pairs([
                ("highway", "residential"),
                ("landuse", "quarry"),
                ("amenity", "school"),
            ]))
            .with_road_categories(CategorySet::from_pairs([
                ("highway", "residential"),
                ("highway", "motorway"),
            ]))
            .with_work_dir(work.path())
            .with_poll_backoff(Duration::from_millis(10), 3)
    }

    fn csv_config(work: &TempDir) -> PipelineConfig {
        let path = work.path().join("input.csv");
        std::fs::write(&path, COMBINED).unwrap();
        config(work).with_csv_file(path)
    }

    fn pipeline(
        config: PipelineConfig,
        service: &Arc<MockRemoteService>,
        blobs: &Arc<MemoryBlobStore>,
    ) -> Pipeline {
        let converter = Arc::new(StubConverter {
            layer: LAYER.to_string(),
        });
        Pipeline::new(config, service.clone(), blobs.clone(), converter)
    }

    fn scratch_dirs(work: &TempDir) -> usize {
        std::fs::read_dir(work.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with("osmraster-"))
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_csv_run_produces_one_image_per_category_with_rows() {
        let work = TempDir::new().unwrap();
        let service = Arc::new(MockRemoteService::new());
        let blobs = Arc::new(MemoryBlobStore::new());

        let report = pipeline(csv_config(&work), &service, &blobs)
            .execute()
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(report.submitted, 4);
        assert_eq!(report.succeeded(), 2);
        assert!(service.has_asset(&ids().image(&residential())));
        assert!(service.has_asset(&ids().image(&quarry())));
        assert!(!service.has_asset(&ids().image(&Category::new("amenity", "school"))));
        assert_eq!(service.exports().len(), 2);

        // Transient tables, blobs and the scratch directory are gone.
        assert!(!service.has_asset(&ids().table(&residential())));
        assert!(!service.has_asset(&ids().table(&quarry())));
        assert_eq!(blobs.uploads().len(), 2);
        assert_eq!(blobs.deletes().len(), 2);
        assert_eq!(scratch_dirs(&work), 0);
        assert!(report.cleanup.unwrap().is_clean());
    }

    #[tokio::test(start_paused = true)]
    async fn test_file_source_is_converted() {
        let work = TempDir::new().unwrap();
        let source = work.path().join("belize.pbf");
        std::fs::write(&source, b"pbf").unwrap();
        let service = Arc::new(MockRemoteService::new());
        let blobs = Arc::new(MemoryBlobStore::new());

        let report = pipeline(config(&work).with_source_file(source), &service, &blobs)
            .execute()
            .await
            .unwrap();

        assert_eq!(report.succeeded(), 2);
        assert!(service.has_asset(&ids().image(&residential())));
        assert!(service.has_asset(&ids().image(&quarry())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_to_import() {
        let work = TempDir::new().unwrap();
        let source = work.path().join("empty.pbf");
        std::fs::write(&source, b"pbf").unwrap();
        let service = Arc::new(MockRemoteService::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let converter = Arc::new(StubConverter {
            layer: "WKT,highway\n\"POINT (0 0)\",footway\n".to_string(),
        });

        let report = Pipeline::new(
            config(&work).with_source_file(source),
            service.clone(),
            blobs.clone(),
            converter,
        )
        .execute()
        .await
        .unwrap();

        assert!(report.nothing_to_import);
        assert!(report.is_success());
        assert_eq!(service.submission_count(), 0);
        assert_eq!(scratch_dirs(&work), 0);
    }

    #[tokio::test]
    async fn test_missing_csv_fails_before_remote_work() {
        let work = TempDir::new().unwrap();
        let service = Arc::new(MockRemoteService::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let missing = work.path().join("missing.csv");

        let err = pipeline(config(&work).with_csv_file(&missing), &service, &blobs)
            .execute()
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::FileNotFound(ref p) if *p == missing));
        assert!(service.calls().is_empty());
        assert!(blobs.uploads().is_empty());
    }

    #[tokio::test]
    async fn test_missing_table_fails_before_remote_work() {
        let work = TempDir::new().unwrap();
        let service = Arc::new(MockRemoteService::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let table = format!("{}/tables/all", ROOT);

        let err = pipeline(config(&work).with_table_id(&table), &service, &blobs)
            .execute()
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::TableNotFound(ref t) if *t == table));
        assert_eq!(service.submission_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_table_is_rasterized_directly() {
        let work = TempDir::new().unwrap();
        let service = Arc::new(MockRemoteService::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let table = format!("{}/tables/all", ROOT);
        service.add_asset(&table);

        let report = pipeline(config(&work).with_table_id(&table), &service, &blobs)
            .execute()
            .await
            .unwrap();

        assert_eq!(report.succeeded(), 3);
        assert!(blobs.uploads().is_empty());
        assert!(!service
            .calls()
            .iter()
            .any(|c| matches!(c, Call::TableImport(_))));
        // The input table is not ours to delete.
        assert!(service.has_asset(&table));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rerun_skips_existing_images() {
        let work = TempDir::new().unwrap();
        let service = Arc::new(MockRemoteService::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        service.add_asset(&ids().image(&residential()));
        service.add_asset(&ids().image(&quarry()));

        let report = pipeline(csv_config(&work), &service, &blobs)
            .execute()
            .await
            .unwrap();

        assert_eq!(service.submission_count(), 0);
        assert_eq!(report.skipped.len(), 2);
        assert!(blobs.uploads().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_existing_table_is_not_reimported() {
        let work = TempDir::new().unwrap();
        let service = Arc::new(MockRemoteService::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        service.add_asset(&ids().table(&residential()));

        let report = pipeline(csv_config(&work), &service, &blobs)
            .execute()
            .await
            .unwrap();

        assert_eq!(report.succeeded(), 2);
        let imports: Vec<Call> = service
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::TableImport(_)))
            .collect();
        assert_eq!(imports, vec![Call::TableImport(ids().table(&quarry()))]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_replaces_existing_assets() {
        let work = TempDir::new().unwrap();
        let service = Arc::new(MockRemoteService::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let image = ids().image(&residential());
        let table = ids().table(&residential());
        service.add_asset(&image);
        service.add_asset(&table);

        let report = pipeline(csv_config(&work).with_overwrite(true), &service, &blobs)
            .execute()
            .await
            .unwrap();

        assert_eq!(report.succeeded(), 2);
        assert!(service.has_asset(&image));
        let calls = service.mutations();
        let deleted_table = calls
            .iter()
            .position(|c| *c == Call::DeleteAsset(table.clone()))
            .unwrap();
        let imported = calls
            .iter()
            .position(|c| *c == Call::TableImport(table.clone()))
            .unwrap();
        let deleted_image = calls
            .iter()
            .position(|c| *c == Call::DeleteAsset(image.clone()))
            .unwrap();
        assert!(deleted_table < imported);
        assert!(imported < deleted_image);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_failure_is_reported() {
        let work = TempDir::new().unwrap();
        let service = Arc::new(MockRemoteService::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        service.fail_job(&ids().image(&quarry()), "Computation timed out.");

        let report = pipeline(csv_config(&work), &service, &blobs)
            .execute()
            .await
            .unwrap();

        assert!(!report.is_success());
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failures.len(), 1);
        let failure = &report.failures[0];
        assert_eq!(failure.category, Some(quarry()));
        assert_eq!(failure.kind, JobKind::Rasterize);
        assert!(matches!(failure.error, JobError::Conversion { .. }));
        assert!(service.has_asset(&ids().image(&residential())));
        assert_eq!(blobs.deletes().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_import_is_not_rasterized() {
        let work = TempDir::new().unwrap();
        let service = Arc::new(MockRemoteService::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        service.fail_job(&ids().table(&quarry()), "Invalid geometry.");

        let report = pipeline(csv_config(&work), &service, &blobs)
            .execute()
            .await
            .unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].kind, JobKind::TableImport);
        assert_eq!(service.exports().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_cleanup_leaves_transient_assets() {
        let work = TempDir::new().unwrap();
        let service = Arc::new(MockRemoteService::new());
        let blobs = Arc::new(MemoryBlobStore::new());

        let report = pipeline(csv_config(&work).with_skip_cleanup(true), &service, &blobs)
            .execute()
            .await
            .unwrap();

        assert!(report.cleanup.unwrap().skipped);
        assert!(blobs.deletes().is_empty());
        assert!(!service
            .calls()
            .iter()
            .any(|c| matches!(c, Call::DeleteAsset(_))));
        assert!(service.has_asset(&ids().table(&residential())));
        assert_eq!(scratch_dirs(&work), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_roads_table_from_road_categories() {
        let work = TempDir::new().unwrap();
        let service = Arc::new(MockRemoteService::new());
        let blobs = Arc::new(MemoryBlobStore::new());

        let mut pipeline = pipeline(csv_config(&work).with_import_roads(true), &service, &blobs);
        pipeline.run().await.unwrap();

        let roads = ids().roads();
        assert_eq!(pipeline.report().roads.as_deref(), Some(roads.as_str()));
        let merge = service
            .exports()
            .into_iter()
            .find_map(|e| match e {
                ExportRequest::TableMerge(request) => Some(request),
                _ => None,
            })
            .unwrap();
        assert_eq!(merge.sources, vec![ids().table(&residential())]);

        pipeline.cleanup().await;
        assert!(service.has_asset(&roads));
        assert!(!service.has_asset(&ids().table(&residential())));
    }

    const METADATA_URI: &str = "gs://test-bucket/2021-12-31/metadata.json";
    const METADATA: &str = r#"{
        "images": [
            "gs://hii-osm/2021-12-31/osm-0000.tif",
            "gs://hii-osm/2021-12-31/osm-0001.tif"
        ],
        "bands": {
            "b1": {"attribute": "highway", "tag": "residential", "bands": [0]},
            "b2": {"attribute": "amenity", "tag": "zzz_unconfigured", "bands": [1]},
            "b3": {"attribute": "landuse", "tag": "quarry", "bands": [2]}
        }
    }"#;

    #[tokio::test(start_paused = true)]
    async fn test_merge_builds_composite_from_metadata() {
        let work = TempDir::new().unwrap();
        let service = Arc::new(MockRemoteService::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        blobs.put(METADATA_URI, METADATA);

        let report = pipeline(
            csv_config(&work)
                .with_metadata(METADATA_URI)
                .with_output_name("osm_belize"),
            &service,
            &blobs,
        )
        .execute()
        .await
        .unwrap();

        let composite = ids().composite("osm_belize");
        assert_eq!(report.composite.as_deref(), Some(composite.as_str()));
        let request = service
            .exports()
            .into_iter()
            .find_map(|e| match e {
                ExportRequest::Composite(request) => Some(request),
                _ => None,
            })
            .unwrap();
        let names: Vec<String> = request.bands.iter().map(|b| b.name.clone()).collect();
        assert_eq!(names, vec!["highway_residential", "landuse_quarry"]);
        assert_eq!(request.bands[0].sources.len(), 2);

        // Shards are transient; the composite is not.
        assert!(service.has_asset(&composite));
        assert!(!service.has_asset(&ids().shard("gs://hii-osm/2021-12-31/osm-0000.tif")));
    }

    #[tokio::test]
    async fn test_missing_metadata_fails_before_remote_work() {
        let work = TempDir::new().unwrap();
        let service = Arc::new(MockRemoteService::new());
        let blobs = Arc::new(MemoryBlobStore::new());

        let err = pipeline(csv_config(&work).with_metadata(METADATA_URI), &service, &blobs)
            .execute()
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::FileNotFound(_)));
        assert_eq!(service.submission_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_runs_when_merge_fails() {
        let work = TempDir::new().unwrap();
        let service = Arc::new(MockRemoteService::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        blobs.put(
            METADATA_URI,
            r#"{"images": ["gs://hii-osm/a.tif"],
                "bands": {"b1": {"attribute": "amenity", "tag": "bench", "bands": [0]}}}"#,
        );

        let err = pipeline(csv_config(&work).with_metadata(METADATA_URI), &service, &blobs)
            .execute()
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Merge(MergeError::NoConfiguredBands { total: 1 })
        ));
        assert!(!service.has_asset(&ids().shard("gs://hii-osm/a.tif")));
        assert!(!service.has_asset(&ids().table(&quarry())));
        assert_eq!(blobs.deletes().len(), 2);
        assert_eq!(scratch_dirs(&work), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rerun_builds_missing_roads_table() {
        let work = TempDir::new().unwrap();
        let service = Arc::new(MockRemoteService::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        service.add_asset(&ids().image(&residential()));
        service.add_asset(&ids().image(&quarry()));

        let report = pipeline(csv_config(&work).with_import_roads(true), &service, &blobs)
            .execute()
            .await
            .unwrap();

        assert!(report.is_success());
        let roads = ids().roads();
        assert_eq!(report.roads.as_deref(), Some(roads.as_str()));
        assert!(service.has_asset(&roads));

        // Only the road category's table comes back, and nothing is rasterized.
        let imports: Vec<Call> = service
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::TableImport(_)))
            .collect();
        assert_eq!(imports, vec![Call::TableImport(ids().table(&residential()))]);
        assert!(!service
            .exports()
            .iter()
            .any(|e| matches!(e, ExportRequest::Rasterize(_))));
        assert_eq!(
            report.skipped,
            vec![ids().image(&quarry()), ids().image(&residential())]
        );
        assert!(!service.has_asset(&ids().table(&residential())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_existing_roads_table_is_reported() {
        let work = TempDir::new().unwrap();
        let service = Arc::new(MockRemoteService::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let roads = ids().roads();
        service.add_asset(&ids().image(&residential()));
        service.add_asset(&ids().image(&quarry()));
        service.add_asset(&roads);

        let report = pipeline(csv_config(&work).with_import_roads(true), &service, &blobs)
            .execute()
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(service.submission_count(), 0);
        assert_eq!(report.roads.as_deref(), Some(roads.as_str()));
        assert!(report.skipped.contains(&roads));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_road_tables_fail_the_roads_table() {
        let work = TempDir::new().unwrap();
        let service = Arc::new(MockRemoteService::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        service.fail_job(&ids().table(&residential()), "Invalid geometry.");

        let report = pipeline(csv_config(&work).with_import_roads(true), &service, &blobs)
            .execute()
            .await
            .unwrap();

        assert!(!report.is_success());
        assert_eq!(report.roads, None);
        let kinds: Vec<JobKind> = report.failures.iter().map(|f| f.kind).collect();
        assert_eq!(kinds, vec![JobKind::TableImport, JobKind::TableMerge]);
        assert_eq!(report.failures[1].asset, ids().roads());
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_named_images_get_separate_shards() {
        let work = TempDir::new().unwrap();
        let service = Arc::new(MockRemoteService::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        blobs.put(
            METADATA_URI,
            r#"{"images": ["gs://b/east/osm.tif", "gs://b/west/osm.tif", "gs://b/east/osm.tif"],
                "bands": {"b1": {"attribute": "highway", "tag": "residential", "bands": [0]}}}"#,
        );

        let report = pipeline(csv_config(&work).with_metadata(METADATA_URI), &service, &blobs)
            .execute()
            .await
            .unwrap();

        assert!(report.is_success());
        let east = ids().shard("gs://b/east/osm.tif");
        let west = ids().shard("gs://b/west/osm.tif");
        let imports: Vec<Call> = service
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::ImageImport(_)))
            .collect();
        assert_eq!(
            imports,
            vec![Call::ImageImport(east.clone()), Call::ImageImport(west.clone())]
        );

        let request = service
            .exports()
            .into_iter()
            .find_map(|e| match e {
                ExportRequest::Composite(request) => Some(request),
                _ => None,
            })
            .unwrap();
        let sources: Vec<&str> = request.bands[0]
            .sources
            .iter()
            .map(|s| s.image.as_str())
            .collect();
        assert_eq!(sources, vec![east.as_str(), west.as_str(), east.as_str()]);
    }

    #[test]
    fn test_report_handler_records_final_assets() {
        let mut report = PipelineReport::default();
        let roads = JobRecord::new("JOB0001".into(), JobKind::TableMerge, "roads");
        futures::executor::block_on(report.on_success(roads));

        assert_eq!(report.roads.as_deref(), Some("roads"));
        assert_eq!(report.produced, vec!["roads".to_string()]);
        assert!(report.is_success());
    }
}
