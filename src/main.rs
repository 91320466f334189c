use clap::Parser;
use sharepoint_consent_probe_lib::Cli;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    std::panic::set_hook(Box::new(|panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());
        // Payload is not logged; it may carry token material.
        tracing::error!(location = %location, "PANIC: probe panicked at {location}");
        eprintln!("error: probe panicked at {location}");
    }));

    let cli = Cli::parse();
    match sharepoint_consent_probe_lib::run(cli).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(code = err.code(), "walkthrough aborted");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
