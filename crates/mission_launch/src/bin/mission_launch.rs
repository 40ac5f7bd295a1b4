//! Mission Launch CLI
//!
//! Usage:
//!   mission_launch launch/suave_rosa.launch.yaml
//!   mission_launch launch/suave_rosa.launch.yaml -a result_filename:=run1.csv
//!   mission_launch launch/suave_rosa.launch.yaml --dry-run

use mission_launch::{
    load_plan, ArgumentResolver, LaunchArgs, LaunchError, LaunchFile, LaunchOutcome, Supervisor,
};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::watch;

const EXIT_RUNTIME: u8 = 1;
const EXIT_CONFIG: u8 = 2;

fn exit_code(error: &LaunchError) -> ExitCode {
    if error.is_configuration() {
        ExitCode::from(EXIT_CONFIG)
    } else {
        ExitCode::from(EXIT_RUNTIME)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args: LaunchArgs = argh::from_env();

    // Initialize logging
    let log_level = match args.log_level.to_lowercase().as_str() {
        "error" => "error",
        "warn" => "warn",
        "info" => "info",
        "debug" => "debug",
        "trace" => "trace",
        _ => "info",
    };
    let env = env_logger::Env::default().default_filter_or(log_level);
    env_logger::init_from_env(env);

    let path = Path::new(&args.launch_file);

    // Validate / show-args only need the file itself
    if args.validate || args.show_args {
        let launch_file = match LaunchFile::from_file(path) {
            Ok(lf) => lf,
            Err(e) => {
                log::error!("Failed to load launch file: {}", e);
                return ExitCode::from(EXIT_CONFIG);
            }
        };

        if args.validate {
            println!("Launch file '{}' is valid", args.launch_file);
            println!("  Version: {}", launch_file.version);
            println!("  Args: {}", launch_file.args.len());
            println!("  Units: {}", launch_file.units.len());
        }

        if args.show_args {
            println!("Arguments for '{}':", args.launch_file);
            for arg in ArgumentResolver::from_launch_file(&launch_file).arguments() {
                let default = match &arg.default {
                    Some(value) => format!("(default: {:?})", value),
                    None => "(required)".to_string(),
                };
                println!("  {} {}", arg.name, default);
                if let Some(allowed) = &arg.allowed_values {
                    println!("      choices: {}", allowed.join(", "));
                }
                if let Some(description) = &arg.description {
                    println!("      {}", description);
                }
            }
        }
        return ExitCode::SUCCESS;
    }

    // Build phase: every configuration error surfaces here
    log::info!("Loading launch file: {}", args.launch_file);
    let locator = Arc::new(args.locator());
    let plan = match load_plan(
        path,
        &args.arg_overrides(),
        locator.clone(),
        args.allow_reregistration,
    ) {
        Ok(plan) => plan,
        Err(e) => {
            log::error!("{}", e);
            return exit_code(&e);
        }
    };

    if args.json {
        match serde_json::to_string_pretty(&plan) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                log::error!("Failed to serialize launch plan: {}", e);
                return ExitCode::from(EXIT_RUNTIME);
            }
        }
        return ExitCode::SUCCESS;
    }

    if args.dry_run {
        println!("{}", plan);
        return ExitCode::SUCCESS;
    }

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(());

    // Set up Ctrl+C handler
    if let Err(e) = ctrlc::set_handler(move || {
        log::info!("Received Ctrl+C, initiating shutdown...");
        let _ = shutdown_tx.send(());
    }) {
        log::error!("Error setting Ctrl+C handler: {}", e);
        return ExitCode::from(EXIT_RUNTIME);
    }

    let mut supervisor = Supervisor::new(plan, locator, args.supervisor_config());

    // Launch all units
    if let Err(e) = supervisor.launch(shutdown_rx.clone()).await {
        log::error!("Launch failed: {}", e);
        supervisor.shutdown().await;
        return exit_code(&e);
    }

    // Wait for shutdown signal, a required failure, or all units to finish
    let outcome = supervisor.wait(shutdown_rx).await;

    supervisor.shutdown().await;

    for (id, state) in supervisor.states() {
        log::debug!("[{}] Final state: {}", id, state);
    }

    match outcome {
        LaunchOutcome::Completed | LaunchOutcome::Interrupted => {
            log::info!("Mission launcher exiting");
            ExitCode::SUCCESS
        }
        LaunchOutcome::Failed { unit, cause } => {
            log::error!("Required unit '{}' failed: {}", unit, cause);
            ExitCode::from(EXIT_RUNTIME)
        }
    }
}
