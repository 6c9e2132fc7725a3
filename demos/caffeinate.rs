#![forbid(unsafe_code)]
#![warn(clippy::all)]

//! Keep the machine awake until Ctrl-C, or until a process exits.
//!
//! usage: caffeinate [-d] [-i] [-s] [-u] [-t seconds] [-w pid]

#[cfg(target_os = "macos")]
#[tokio::main]
async fn main() {
  use std::{sync::Arc, time::Duration};

  use nodoze::{AssertionKind, ManagerConfig, SleepManager};
  use tokio::sync::Notify;
  use tracing::{error, info};

  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
    )
    .init();

  let mut kinds = Vec::new();
  let mut config = ManagerConfig::new("caffeinate demo");
  let mut args = std::env::args().skip(1);
  while let Some(arg) = args.next() {
    match arg.as_str() {
      "-t" => match args.next().map(|s| s.parse::<u64>()) {
        Some(Ok(secs)) => config = config.timeout(Duration::from_secs(secs)),
        _ => {
          error!("-t needs a number of seconds");
          return;
        }
      },
      "-w" => match args.next().map(|s| s.parse::<i32>()) {
        Some(Ok(pid)) => config = config.watch_pid(pid),
        _ => {
          error!("-w needs a pid");
          return;
        }
      },
      flag => match flag.trim_start_matches('-').parse::<AssertionKind>() {
        Ok(kind) => kinds.push(kind),
        Err(err) => {
          error!("{err}");
          return;
        }
      },
    }
  }
  let config = config.kinds(kinds);

  let manager = SleepManager::new(config);
  let stopped = Arc::new(Notify::new());
  let notify = stopped.clone();
  manager.set_termination_handler(move |_| notify.notify_one());

  if let Err(err) = manager.start() {
    error!("could not keep awake: {err}");
    return;
  }

  info!("chugging the caffeine. Ctrl-C to stop");
  tokio::select! {
    _ = tokio::signal::ctrl_c() => info!("interrupted"),
    _ = stopped.notified() => info!("watched process is gone"),
  }
  manager.close();
}

#[cfg(not(target_os = "macos"))]
fn main() {
  eprintln!("caffeinate needs IOKit, macOS only");
}
