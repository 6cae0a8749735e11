// Copyright 2024 Remexec project contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use clap::error::ErrorKind;
use clap::Parser;

use runner::{parse_log_level, Runner, RunnerOptions, RUNNER_CAPABILITIES};

fn init_logging(options: &RunnerOptions) -> Result<(), String> {
    let level = if options.verbose {
        log::LevelFilter::Debug
    } else {
        parse_log_level(&options.log_level)?
    };

    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    if let Some(path) = &options.log_file {
        let file = std::fs::File::create(path)
            .map_err(|err| format!("--log-file: unable to write to {path:?}: {err}"))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

#[tokio::main]
async fn main() {
    let options = match RunnerOptions::try_parse() {
        Ok(options) => options,
        Err(err) => {
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = err.print();
            std::process::exit(code);
        }
    };

    if let Err(err) = init_logging(&options) {
        eprintln!("{err}");
        std::process::exit(1);
    }

    if options.capabilities {
        for capability in RUNNER_CAPABILITIES {
            println!("{capability}");
        }
        return;
    }

    let exit_code = Runner::run(options).await;
    std::process::exit(exit_code);
}
