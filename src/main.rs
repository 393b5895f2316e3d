use narrated_shorts::config::Config;
use narrated_shorts::generator::Generator;
use narrated_shorts::init;
use tracing::{error, info, warn};

const CONFIG_PATH: &str = "config.json";

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt::init();

    if !init::check_ffmpeg().await || !init::check_ffprobe().await {
        warn!("ffmpeg/ffprobe not found in PATH. Please install FFmpeg.");
    }

    let cfg = match Config::load(CONFIG_PATH).await {
        Ok(cfg) => cfg,
        Err(err) => {
            error!("{}", err);
            std::process::exit(err.exit_code());
        }
    };

    let generator = match Generator::from_config(cfg) {
        Ok(generator) => generator,
        Err(err) => {
            error!("{}", err);
            std::process::exit(err.exit_code());
        }
    };

    match generator.run().await {
        Ok(output) => info!("done: {}", output.display()),
        Err(err) => {
            error!("{}", err);
            std::process::exit(err.exit_code());
        }
    }
}
