//! Component wiring

use crate::classifier::{Classifier, RemoteClassifierClient};
use crate::db::{FraudReportRepository, TransactionRepository};
use crate::dispatcher::{DispatcherConfig, ScoringDispatcher};
use crate::docstore::{DocumentStore, SqliteDocumentStore};
use crate::error::FraudResult;
use crate::ingest::IngestionLoader;
use crate::report::ReportGenerator;
use crate::service::{FraudReportService, TransactionService};
use finsys_common::config::TomlConfig;
use finsys_common::db::init_database_with;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::info;

/// Every pipeline component, built from one configuration
pub struct FraudPipeline {
    pub pool: SqlitePool,
    pub transactions: TransactionRepository,
    pub reports: FraudReportRepository,
    pub dispatcher: Arc<ScoringDispatcher>,
    pub report_service: FraudReportService,
    pub transaction_service: TransactionService,
    pub loader: IngestionLoader,
}

impl FraudPipeline {
    /// Open both stores and start the dispatcher against the remote classifier
    pub async fn open(config: &TomlConfig) -> FraudResult<Self> {
        let classifier: Arc<dyn Classifier> =
            Arc::new(RemoteClassifierClient::new(config.classifier.endpoint.clone()));
        Self::open_with_classifier(config, classifier).await
    }

    pub async fn open_with_classifier(
        config: &TomlConfig,
        classifier: Arc<dyn Classifier>,
    ) -> FraudResult<Self> {
        let pool = init_database_with(&config.database_path, config.database.busy_timeout()).await?;
        let docs: Arc<dyn DocumentStore> = Arc::new(
            SqliteDocumentStore::open(
                &config.document_store_path,
                &config.document_store.collection,
            )
            .await?,
        );
        Ok(Self::assemble(config, pool, docs, classifier))
    }

    /// Wire components over already-open stores
    pub fn assemble(
        config: &TomlConfig,
        pool: SqlitePool,
        docs: Arc<dyn DocumentStore>,
        classifier: Arc<dyn Classifier>,
    ) -> Self {
        let transactions = TransactionRepository::new(pool.clone());
        let reports =
            FraudReportRepository::new(pool.clone(), docs, config.document_store.timeout());

        let dispatcher = Arc::new(ScoringDispatcher::start(
            transactions.clone(),
            classifier,
            DispatcherConfig::from_config(config),
        ));

        let report_service = FraudReportService::new(
            reports.clone(),
            transactions.clone(),
            ReportGenerator::from_config(&config.report),
        );
        let transaction_service = TransactionService::new(transactions.clone(), dispatcher.clone());
        let loader = IngestionLoader::new(
            transactions.clone(),
            dispatcher.clone(),
            config.ingestion.batch_size,
        );

        info!("Fraud pipeline ready");
        Self {
            pool,
            transactions,
            reports,
            dispatcher,
            report_service,
            transaction_service,
            loader,
        }
    }

    /// Drain the scoring queue and close the relational pool
    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
        self.pool.close().await;
    }
}
