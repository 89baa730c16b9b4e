use std::io;

use log::info;
use tokio::{net::UnixStream, signal};

use runner::{ModelProgram, RunnerConfig, RunnerErr, serve};

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let config = RunnerConfig::from_env()?;
    let stream = UnixStream::connect(config.socket()).await?;
    let (rx, tx) = stream.into_split();
    info!("connected to host at {}", config.socket().display());

    // Deployments register their model program here.
    let loader = |path: &str| -> runner::Result<Box<dyn ModelProgram>> {
        Err(RunnerErr::Exception(format!(
            "no model program is linked into this binary (requested path {path})"
        )))
    };

    tokio::select! {
        ret = serve(rx, tx, loader) => {
            ret?;
            info!("host session ended");
        }
        _ = signal::ctrl_c() => {
            info!("received SIGTERM");
        }
    }

    Ok(())
}
