//! One ingestion run: fetch, validate, persist, publish.
//!
//! Persistence and publishing are independent side effects of the same
//! validated set. A failed save is counted and the run continues; a failed
//! publish fails the run. Nothing done by earlier stages is rolled back.

use std::sync::Arc;

use fxstream_common::{IngestionBatch, IngestionStage};
use fxstream_fx::{ProviderFactory, RateRepository, RateValidator, ValidatedRate};
use tracing::{error, info, instrument, warn};

use crate::config::IngestionConfig;
use crate::metrics::IngestionMetrics;
use crate::publisher::EventPublisher;

/// Runs the ingestion state machine once per call.
pub struct IngestionPipeline {
    config: IngestionConfig,
    providers: ProviderFactory,
    validator: RateValidator,
    repository: Arc<dyn RateRepository>,
    publisher: EventPublisher,
    metrics: Arc<IngestionMetrics>,
}

impl IngestionPipeline {
    pub fn new(
        config: IngestionConfig,
        providers: ProviderFactory,
        repository: Arc<dyn RateRepository>,
        publisher: EventPublisher,
        metrics: Arc<IngestionMetrics>,
    ) -> Self {
        let validator = RateValidator::new(config.validation.clone());
        Self {
            config,
            providers,
            validator,
            repository,
            publisher,
            metrics,
        }
    }

    pub fn config(&self) -> &IngestionConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<IngestionMetrics> {
        &self.metrics
    }

    pub fn validator(&self) -> &RateValidator {
        &self.validator
    }

    /// Execute one run and return its batch record.
    ///
    /// The ingestion status event is published whatever the outcome.
    #[instrument(skip(self), fields(pairs = self.config.currency_pairs.len()))]
    pub async fn run_once(&self) -> IngestionBatch {
        self.metrics.run_started();
        let mut batch = IngestionBatch::new(self.config.currency_pairs.clone());
        batch.provider_name = Some(self.config.provider_name.clone());

        info!(batch_id = %batch.batch_id, "Starting ingestion run");

        if let Err(e) = self.execute(&mut batch).await {
            error!(batch_id = %batch.batch_id, stage = ?batch.stage, error = %e, "Ingestion run failed");
            if let Err(t) = batch.fail(e) {
                warn!(batch_id = %batch.batch_id, error = %t, "Run already finished");
            }
        }

        self.publisher.publish_status(&batch);
        self.metrics.record_batch(&batch);

        info!(
            batch_id = %batch.batch_id,
            status = ?batch.status,
            fetched = batch.fetched,
            accepted = batch.accepted,
            persisted = batch.persisted,
            published = batch.published,
            duration_ms = batch.duration_ms(),
            "Ingestion run finished"
        );
        batch
    }

    async fn execute(&self, batch: &mut IngestionBatch) -> Result<(), String> {
        let fetch = self
            .providers
            .fetch_rates(&batch.requested)
            .await
            .map_err(|e| e.to_string())?;
        batch.provider_name = Some(fetch.provider_name.clone());
        batch.fetched = fetch.rates.len();

        if fetch.rates.is_empty() {
            return Err(format!("No rates returned by {}", fetch.provider_name));
        }
        if batch.fetched < batch.requested.len() {
            warn!(
                batch_id = %batch.batch_id,
                requested = batch.requested.len(),
                fetched = batch.fetched,
                "Provider returned fewer rates than requested"
            );
        }

        advance(batch, IngestionStage::Validating)?;
        let outcome = self.validator.validate(fetch.rates);
        batch.accepted = outcome.accepted.len();
        batch.rejected = outcome.rejected.len();

        advance(batch, IngestionStage::Persisting)?;
        self.persist(batch, &outcome.accepted).await;

        advance(batch, IngestionStage::Publishing)?;
        let events = self.publisher.build_events(&outcome.accepted);
        batch.published = self
            .publisher
            .publish_rates(&events)
            .map_err(|e| e.to_string())?;

        advance(batch, IngestionStage::Done)
    }

    async fn persist(&self, batch: &mut IngestionBatch, accepted: &[ValidatedRate]) {
        for validated in accepted {
            match self.repository.save(validated.rate.clone()).await {
                Ok(_) => batch.persisted += 1,
                Err(e) => {
                    warn!(pair = %validated.rate.pair, error = %e, "Failed to persist rate");
                    batch.persist_failures += 1;
                }
            }
        }
    }
}

fn advance(batch: &mut IngestionBatch, stage: IngestionStage) -> Result<(), String> {
    batch.transition_to(stage).map_err(|e| e.to_string())
}
