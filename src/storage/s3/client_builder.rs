use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Builder;
use aws_types::SdkConfig;

use crate::config::ClientConfig;

impl ClientConfig {
    /// Builds an S3 client for one side of a transfer. The profile and
    /// endpoint URL override whatever the environment supplies; region and
    /// credentials otherwise resolve through the SDK's default chain
    /// (config files under `HOME`/`USERPROFILE`, environment variables,
    /// instance metadata).
    pub async fn create_client(&self) -> Client {
        let config_builder =
            Builder::from(&self.load_sdk_config().await).force_path_style(self.force_path_style);

        Client::from_conf(config_builder.build())
    }

    async fn load_sdk_config(&self) -> SdkConfig {
        let mut config_loader = aws_config::defaults(BehaviorVersion::latest());

        if let Some(profile) = &self.profile {
            config_loader = config_loader.profile_name(profile);
        }

        if let Some(endpoint_url) = &self.endpoint_url {
            config_loader = config_loader.endpoint_url(endpoint_url);
        }

        config_loader.load().await
    }
}
