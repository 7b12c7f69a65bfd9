use std::env;
use std::process::ExitCode;

use club_ledger::csv::{read_commands, read_statement, write_balances};
use club_ledger::{Ledger, LedgerConfig, MemoryStore};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: club-ledger <commands.csv> [statement.csv|statement.json]";

#[tokio::main]
async fn main() -> ExitCode {
    let filter = match "warn".parse() {
        Ok(directive) => EnvFilter::from_default_env().add_directive(directive),
        Err(_) => EnvFilter::from_default_env(),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut args = env::args().skip(1);
    let Some(path) = args.next() else {
        eprintln!("{USAGE}");
        return ExitCode::FAILURE;
    };
    let statement_path = args.next();

    if !path.ends_with(".csv") {
        warn!(path, "command file seems to not be a csv file");
    }

    let config = match LedgerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let commands = match read_commands(path.clone()) {
        Ok(commands) => commands,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let ledger = Ledger::new(MemoryStore::new(), config);
    let (cmd_sender, cmd_receiver) = tokio::sync::mpsc::channel(16);

    let reader = tokio::task::spawn_blocking(move || {
        for result in commands {
            match result {
                Ok(command) => {
                    if cmd_sender.blocking_send(command).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("{e}");
                }
            }
        }
    });

    ledger.run(ReceiverStream::new(cmd_receiver)).await;
    if let Err(e) = reader.await {
        error!("command reader failed: {e}");
        return ExitCode::FAILURE;
    }

    if let Some(statement_path) = statement_path {
        let matched = read_statement(&statement_path)
            .map_err(|e| e.to_string())
            .and_then(|statement| ledger.match_statement(&statement).map_err(|e| e.to_string()));
        if let Err(e) = matched {
            error!(path = statement_path, "statement not matched: {e}");
            return ExitCode::FAILURE;
        }
    }

    let balances = match ledger.balances() {
        Ok(balances) => balances,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = write_balances(std::io::stdout().lock(), balances.into_values()) {
        error!("{e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
