//! Runtime services and shared state for potato-health.

use aws_config::{BehaviorVersion, Region};
use tracing::{info, instrument};

use crate::{
    base::{config::Config, types::Res},
    orchestrator::Orchestrator,
    service::{blob::BlobClient, bot::BotClient, weather::WeatherClient},
};

/// Runtime service context that can be shared across the application.
///
/// This struct holds the configuration, the service clients, and the
/// orchestrator built from them. It is designed to be trivially cloneable,
/// allowing it to be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct Runtime {
    /// The configuration for the application.
    pub config: Config,
    /// The blob store client instance.
    pub blob: BlobClient,
    /// The bot client instance.
    pub bot: BotClient,
    /// The weather client instance.
    pub weather: WeatherClient,
    /// The diagnosis orchestrator.
    pub orchestrator: Orchestrator,
}

impl Runtime {
    /// Create a new runtime instance against AWS.
    ///
    /// The AWS SDK configuration (credentials chain, region) is resolved once
    /// and shared by the S3 and Lex clients.
    #[instrument(skip_all)]
    pub async fn new(config: Config) -> Res<Self> {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.aws_region.clone()))
            .load()
            .await;

        // Initialize the blob store.
        let blob = BlobClient::s3(&config, &sdk_config);

        // Initialize the bot client.
        let bot = BotClient::lex(&config, &sdk_config);

        // Initialize the weather client.
        let weather = WeatherClient::smhi(&config)?;

        info!("Runtime initialized for bucket `{}` and bot `{}`.", config.s3_bucket_name, config.lex_bot_id);

        Ok(Self::from_clients(config, blob, bot, weather))
    }

    /// Assemble a runtime from already-built clients.
    pub fn from_clients(config: Config, blob: BlobClient, bot: BotClient, weather: WeatherClient) -> Self {
        let orchestrator = Orchestrator::new(config.clone(), blob.clone(), bot.clone(), weather.clone());

        Self {
            config,
            blob,
            bot,
            weather,
            orchestrator,
        }
    }
}
