//! Library root for `potato-health`.
//!
//! Potato-health diagnoses potato plant health from field images:
//! - Stores each submitted image in an S3 bucket
//! - Asks a Lex V2 bot to classify the stored image
//! - Returns a structured diagnosis, or a failure with its cause
//! - Answers follow-up questions with field weather as context
//!
//! The architecture is built around extensible traits that allow for
//! different implementations of each service.

pub mod base;
pub mod orchestrator;
pub mod runtime;
pub mod service;

use base::{
    config::Config,
    types::{Res, WeatherReport},
};
use futures::future::join_all;
use orchestrator::{DiagnoseOptions, state::DiagnosisOutcome};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::base::types::ImageSubmission;

/// Public async entry for the binary crate: diagnose a batch of submissions.
///
/// Sets up the runtime and runs every submission concurrently:
/// - Each submission is an independent task
/// - Cancelling `cancel` aborts whatever is still in flight
/// - Follow-up `questions` are asked on each completed diagnosis' session
pub async fn diagnose(config: Config, submissions: Vec<ImageSubmission>, questions: Vec<String>, cancel: CancellationToken) -> Res<Vec<(DiagnosisOutcome, Vec<String>)>> {
    info!("Starting potato-health with {} submission(s) ...", submissions.len());

    let runtime = runtime::Runtime::new(config).await?;

    let options = DiagnoseOptions {
        keep_session: !questions.is_empty(),
    };

    let handles = submissions
        .into_iter()
        .map(|submission| {
            let location = submission.location.clone();
            let handle = runtime.orchestrator.spawn(submission, options, cancel.child_token());
            (handle, location)
        })
        .collect::<Vec<_>>();

    let mut results = Vec::with_capacity(handles.len());

    for (outcome, location) in join_all(handles.into_iter().map(|(handle, location)| async move { (handle.await, location) })).await {
        let mut outcome = outcome?;
        let mut answers = Vec::new();

        if let Some(mut session) = outcome.take_session() {
            for question in &questions {
                match runtime.orchestrator.ask(&mut session, question, location.as_deref()).await {
                    Ok(messages) => answers.extend(messages),
                    Err(err) => {
                        error!("Follow-up question failed: {err}");
                        answers.push(format!("Error: {err}"));
                    }
                }
            }
        }

        results.push((outcome, answers));
    }

    Ok(results)
}

/// Public async entry for the binary crate: current weather for a location.
pub async fn weather(config: Config, location: Option<&str>) -> Res<WeatherReport> {
    let weather = service::weather::WeatherClient::smhi(&config)?;

    Ok(weather.weather_for(location).await?)
}
