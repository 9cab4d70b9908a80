//
// main.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
//
//

//! Main binary entry point for the Carme gateway.

#![allow(missing_docs)]

use std::fs::File;
use std::sync::Arc;

use clap::{command, Parser};
use log::LevelFilter;
use simplelog::{ColorChoice, CombinedLogger, Config, TermLogger, TerminalMode, WriteLogger};

mod aggregation;
mod config;
mod error;
mod execution;
mod files;
mod health;
mod jupyter_api;
mod jupyter_messages;
mod kernel_channel;
mod result_shaper;
mod server;
mod wire_message;

use config::GatewayConfig;
use server::Gateway;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// The port to bind the gateway to
    #[arg(short, long, default_value_t = 6000)]
    port: u16,

    /// The base URL of the Jupyter server the gateway executes against
    #[arg(short, long, default_value = "http://localhost:8888")]
    jupyter_url: String,

    /// The directory staged files are read from and written to
    #[arg(short, long, default_value = "/mnt/data")]
    working_dir: String,

    /// Sign outgoing kernel messages with an HMAC-SHA256 signature in
    /// addition to the URL token
    #[arg(long, default_value_t = false)]
    sign_messages: bool,

    /// The log level to use. Valid values are "trace", "debug", "info",
    /// "warn", and "error". If not specified, the default log level is
    /// "info", or the value of `RUST_LOG` if set.
    #[arg(short, long)]
    log_level: Option<String>,

    /// The path to a log file. If specified, log output will be written to
    /// this file in addition to standard streams.
    #[arg(long)]
    log_file: Option<String>,
}

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args = Args::parse();

    // Derive the log level
    let log_level = match args.log_level {
        Some(ref level) => {
            // If the log level is set in the command-line arguments, use it
            level.to_string()
        }
        None => match std::env::var("RUST_LOG") {
            Ok(level) => {
                // If the log level is set in the RUST_LOG environment variable, use it
                level
            }
            Err(_) => {
                // If no log level is set, use "info"
                "info".to_string()
            }
        },
    };

    // Match the log level to a `LevelFilter`
    let log_level = match log_level.as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => {
            println!("Invalid log level '{}'; using 'info'", log_level);
            LevelFilter::Info
        }
    };

    // Check to see if a log file was provided
    match args.log_file {
        Some(ref log_file) => {
            // A log file was provided; use a combined logger that writes to the
            // log file and stdout
            let file = match File::create(log_file) {
                Ok(file) => file,
                Err(err) => {
                    println!("Failed to create log file '{}': {}", log_file, err);
                    std::process::exit(1);
                }
            };
            if let Err(err) = CombinedLogger::init(vec![
                TermLogger::new(
                    log_level,
                    Config::default(),
                    TerminalMode::Mixed,
                    ColorChoice::Auto,
                ),
                WriteLogger::new(log_level, Config::default(), file),
            ]) {
                // Consider it a fatal error if we can't initialize logging
                println!(
                    "Failed to initialize combined file/terminal logging: {}",
                    err
                );
                std::process::exit(1);
            }
        }
        None => {
            // No log file was provided; use a terminal logger only
            if let Err(err) = TermLogger::init(
                log_level,
                Config::default(),
                TerminalMode::Mixed,
                ColorChoice::Auto,
            ) {
                // Consider it a fatal error if we can't initialize logging
                println!("Failed to initialize terminal logging: {}", err);
                std::process::exit(1);
            }
        }
    }

    println!(
        r#"
   ___
  / __\__ _ _ __ _ __ ___   ___
 / /  / _` | '__| '_ ` _ \ / _ \
/ /__| (_| | |  | | | | | |  __/
\____/\__,_|_|  |_| |_| |_|\___|
  A Jupyter execution gateway. Version {}.
"#,
        env!("CARGO_PKG_VERSION")
    );

    let config = Arc::new(GatewayConfig::from_env(
        args.port,
        &args.jupyter_url,
        &args.working_dir,
        args.sign_messages,
    ));

    log::info!(
        "Starting Carme against Jupyter server at {} with token: {}",
        config.jupyter_url,
        config.token()
    );

    let gateway = match Gateway::new(config) {
        Ok(gateway) => Arc::new(gateway),
        Err(err) => {
            log::error!("Failed to initialize gateway: {}", err);
            std::process::exit(1);
        }
    };

    // Run the health probe in the background
    gateway
        .health
        .clone()
        .start(gateway.api.clone(), gateway.coordinator.clone());

    // Serve until the process is stopped; a bind failure is fatal
    if let Err(err) = server::create(gateway).await {
        log::error!("Failed to start server: {}", err);
        std::process::exit(1);
    }
}
