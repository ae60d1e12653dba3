use anyhow::Result;
use log::*;
use tokio::task::JoinSet;

pub fn init_log() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log_panics::init();
}

/// Supervise a set of tasks that are all expected to run forever.
pub async fn wait_tasks(mut tasks: JoinSet<Result<()>>) {
    while let Some(res) = tasks.join_next().await {
        match res {
            Ok(Ok(())) => error!("task exited"),
            Ok(Err(e)) => error!("task failed: {e:#}"),
            Err(e) => error!("task panicked: {e}"),
        }
    }
}
