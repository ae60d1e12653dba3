use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use log::*;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

use common::{init_log, wait_tasks};
use link::run_link;
use state::Relay;
use web::{run_web, AppCtx};

mod config;

const DEFAULT_CONFIG_PATH: &str = "relay.toml";

#[tokio::main]
async fn main() -> Result<()> {
    init_log();

    let config_path = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = config::load(&config_path)?;
    let addr: SocketAddr = config
        .http
        .listen
        .parse()
        .with_context(|| format!("invalid listen address {}", config.http.listen))?;

    let relay = Relay::new();
    let (command_tx, command_rx) = mpsc::channel(8);
    let (frame_tx, frame_rx) = watch::channel(Vec::new());

    let mut tasks = JoinSet::<Result<()>>::new();
    tasks.spawn(run_link(config.serial.port.clone(), relay.clone(), command_rx));

    let banner = match camera::Camera::open(&config.camera.device) {
        Ok(cam) => {
            let banner = cam.info().to_string();
            tasks.spawn(camera::run_camera(cam, frame_tx));
            banner
        }
        Err(e) => {
            error!("camera unavailable: {e:#}");
            relay
                .push_process_error(format!("camera unavailable: {e:#}"))
                .await;
            // With the sender gone, /video_feed responses end right away.
            drop(frame_tx);
            "camera unavailable".into()
        }
    };

    tasks.spawn(run_web(
        addr,
        AppCtx {
            relay,
            commands: command_tx,
            frames: frame_rx,
            banner,
        },
    ));

    wait_tasks(tasks).await;
    Ok(())
}
