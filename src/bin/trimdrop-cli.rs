//! Command-line presentation surface for the controller: accepts one media
//! file, drives the conversion session to its terminal state, and saves the
//! finished artifact.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use trimdrop_core::{
    ApiConfig, ControllerEvent, ConversionState, EventEmitter, FfprobeDurationProbe, HttpJobApi,
    JobController, TimerConfig,
};

fn usage() -> ! {
    eprintln!("usage: trimdrop-cli <media-file> [output-dir]");
    eprintln!();
    eprintln!("environment:");
    eprintln!("  TRIMDROP_API_URL       service base URL (default http://localhost:8080)");
    eprintln!("  TRIMDROP_TOKEN         bearer token for the service");
    eprintln!("  TRIMDROP_FFPROBE_PATH  override the ffprobe binary");
    process::exit(2);
}

fn print_event(event: ControllerEvent) {
    match event {
        ControllerEvent::UploadProgress { progress } => {
            println!("upload    {:>3}%", progress);
        }
        ControllerEvent::UploadReady => println!("upload    ready"),
        ControllerEvent::ConvertProgress { progress } => {
            println!("convert   {:>3}%", progress);
        }
        ControllerEvent::JobObserved { job } => {
            println!("job       {} ({:?})", job.id, job.status);
        }
        ControllerEvent::ConversionCompleted { job_id } => {
            println!("completed {}", job_id);
        }
        ControllerEvent::ConversionFailed { message } => eprintln!("failed    {}", message),
        ControllerEvent::Error { message } => eprintln!("error     {}", message),
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let mut args = std::env::args_os().skip(1);
    let Some(input) = args.next().map(PathBuf::from) else {
        usage();
    };
    let dest_dir = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    if args.next().is_some() {
        usage();
    }

    let api = Arc::new(HttpJobApi::new(ApiConfig::from_env()));
    let probe = Arc::new(FfprobeDurationProbe);
    let emitter: EventEmitter = Arc::new(print_event);
    let controller = JobController::with_config(api, probe, TimerConfig::default(), Some(emitter));

    if let Err(e) = controller.accept_files(vec![input]).await {
        eprintln!("error: {}", e);
        process::exit(1);
    }

    // The submit guard requires the upload session to finish first.
    while controller.snapshot().is_uploading {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    if let Err(e) = controller.start_conversion().await {
        eprintln!("error: {}", e);
        process::exit(1);
    }

    loop {
        tokio::time::sleep(Duration::from_millis(250)).await;
        let snapshot = controller.snapshot();
        match snapshot.conversion {
            ConversionState::Done { .. } => break,
            ConversionState::Failed { message } => {
                eprintln!("error: {}", message);
                process::exit(1);
            }
            _ => {
                if let Some(message) = snapshot.error {
                    // The poll loop stopped on a local fault; nothing further
                    // will happen without user action.
                    eprintln!("error: {}", message);
                    process::exit(1);
                }
            }
        }
    }

    match controller.download_result(&dest_dir).await {
        Ok(Some(path)) => println!("saved     {}", path.display()),
        Ok(None) => {}
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    }
}
