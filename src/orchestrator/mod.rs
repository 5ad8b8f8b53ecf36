//! Diagnosis orchestration.
//!
//! This module coordinates the services for one submission at a time:
//! - Persisting the image to the blob store
//! - Opening a bot session and classifying the stored image
//! - Serving follow-up questions and explicit cleanup
//!
//! The orchestrator only records success or failure; timeouts and retries
//! belong to the service clients.

pub mod state;

use std::{collections::HashMap, future::Future};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, instrument};

use crate::{
    base::{
        config::Config,
        error::DiagnosisError,
        types::{BotSession, ImageSubmission, StoredObjectRef, WeatherReport},
    },
    service::{blob::BlobClient, bot::BotClient, weather::WeatherClient, weather::resolve_location},
};

use state::{Diagnosis, DiagnosisOutcome};

/// Per-request options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiagnoseOptions {
    /// Hand the bot session back on the outcome, for follow-up questions.
    pub keep_session: bool,
}

/// Diagnosis orchestrator.
///
/// This is trivially cloneable; requests share nothing but the clients.
#[derive(Clone)]
pub struct Orchestrator {
    config: Config,
    blob: BlobClient,
    bot: BotClient,
    weather: WeatherClient,
}

impl Orchestrator {
    pub fn new(config: Config, blob: BlobClient, bot: BotClient, weather: WeatherClient) -> Self {
        Self { config, blob, bot, weather }
    }

    /// Run one submission to a terminal state.
    ///
    /// The image is always written before a bot session is opened. Cancelling
    /// `cancel` aborts whichever client call is outstanding and ends the request
    /// as `Failed` with a `Cancelled` kind; anything already stored is kept.
    #[instrument(name = "Orchestrator::diagnose", skip_all, fields(submission_id = %submission.id))]
    pub async fn diagnose(&self, submission: ImageSubmission, options: DiagnoseOptions, cancel: &CancellationToken) -> DiagnosisOutcome {
        let request = Diagnosis::new(submission);

        // Received -> Stored.

        let stored = until_cancelled(cancel, self.blob.put(request.submission())).await;

        let object = match stored {
            Ok(object) => object,
            Err(err) => return request.failed(err),
        };

        let request = request.stored(object);

        // Stored -> Classifying.

        if cancel.is_cancelled() {
            return request.failed(DiagnosisError::Cancelled);
        }

        let session = self.bot.open_session(request.object());
        let mut request = request.classifying(session);

        // Classifying -> Completed.

        let (object, submission, session) = request.parts_mut();

        let classified = until_cancelled(cancel, self.bot.classify(object, submission, session)).await;

        match classified {
            Ok(result) => request.completed(result, options.keep_session),
            Err(err) => request.failed(err),
        }
    }

    /// Run a diagnosis as its own task.
    pub fn spawn(&self, submission: ImageSubmission, options: DiagnoseOptions, cancel: CancellationToken) -> JoinHandle<DiagnosisOutcome> {
        let orchestrator = self.clone();

        tokio::spawn(async move { orchestrator.diagnose(submission, options, &cancel).await }.in_current_span())
    }

    /// Ask a follow-up question on a session kept from a diagnosis.
    #[instrument(name = "Orchestrator::ask", skip(self, session), fields(session_id = %session.session_id))]
    pub async fn ask(&self, session: &mut BotSession, question: &str, location: Option<&str>) -> Result<Vec<String>, DiagnosisError> {
        let (location, _) = resolve_location(location, &self.config.default_location);
        let attributes = HashMap::from([("currentLocation".to_string(), location)]);

        self.bot.converse(session, question, &attributes).await
    }

    /// Delete an object left behind by a failed or cancelled request.
    #[instrument(name = "Orchestrator::discard", skip(self), fields(object = %object))]
    pub async fn discard(&self, object: &StoredObjectRef) -> Result<(), DiagnosisError> {
        self.blob.delete(object).await?;

        info!("Discarded orphaned object.");

        Ok(())
    }

    /// Current weather for a field location.
    pub async fn weather(&self, location: Option<&str>) -> Result<WeatherReport, DiagnosisError> {
        self.weather.weather_for(location).await
    }
}

/// Race a client call against cancellation; the call is dropped if cancellation wins.
async fn until_cancelled<T>(cancel: &CancellationToken, call: impl Future<Output = Result<T, DiagnosisError>>) -> Result<T, DiagnosisError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DiagnosisError::Cancelled),
        result = call => result,
    }
}
