// hlsmill daemon - batch HLS transcoding engine
// Validates and renames a folder of media, fans it out to sandboxed ffmpeg
// processes, and organizes the resulting playlist trees

mod cli;
mod context;
mod shutdown;

use clap::Parser;
use cli::Args;
use log::error;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging based on verbosity
    let log_level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let code = match context::run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!("fatal: {:#}", e);
            1
        }
    };

    std::process::exit(code);
}
