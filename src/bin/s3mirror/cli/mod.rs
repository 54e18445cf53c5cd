use anyhow::{Result, anyhow};
use tokio::time::Instant;
use tracing::{error, trace};

use s3mirror::Config;
use s3mirror::config::CommandConfig;
use s3mirror::pipeline::Pipeline;
use s3mirror::transfer::client_copy::ClientCopier;
use s3mirror::types::token::create_pipeline_cancellation_token;

mod ctrl_c_handler;

pub async fn run(config: Config) -> Result<()> {
    let cancellation_token = create_pipeline_cancellation_token();

    ctrl_c_handler::spawn_ctrl_c_handler(cancellation_token.clone());

    let start_time = Instant::now();

    match &config.command {
        CommandConfig::Sync(_) => {
            trace!("sync pipeline start.");

            let mut pipeline = Pipeline::new(config.clone(), cancellation_token).await;
            pipeline.run().await;

            let duration_sec = format!("{:.3}", start_time.elapsed().as_secs_f32());
            if pipeline.has_error() {
                error!(duration_sec = duration_sec, "s3mirror failed.");

                return Err(anyhow!("s3mirror failed."));
            }

            trace!(duration_sec = duration_sec, "s3mirror has been completed.");
        }
        CommandConfig::ClientCopy(client_copy_config) => {
            trace!("client copy start.");

            let copier = ClientCopier::new(
                client_copy_config.clone(),
                config.retry_config.clone(),
                config.staging_dir.clone(),
                cancellation_token,
            );

            if let Err(e) = copier.copy().await {
                let duration_sec = format!("{:.3}", start_time.elapsed().as_secs_f32());
                error!(duration_sec = duration_sec, "s3mirror failed.");

                return Err(e);
            }

            let duration_sec = format!("{:.3}", start_time.elapsed().as_secs_f32());
            trace!(duration_sec = duration_sec, "s3mirror has been completed.");
        }
    }

    Ok(())
}
