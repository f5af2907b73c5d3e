use std::io::BufRead;
use std::process::ExitCode;

use zeroize::Zeroizing;

use minipanel_lib::config::ConfigStorage;

const USAGE: &str = "usage: minipanel [add-user <name>]";

fn read_password() -> std::io::Result<Zeroizing<String>> {
    let mut line = Zeroizing::new(String::new());
    std::io::stdin().lock().read_line(&mut line)?;
    let trimmed = line.trim_end_matches(['\r', '\n']).len();
    line.truncate(trimmed);
    Ok(line)
}

async fn add_user(name: &str) -> Result<(), String> {
    let storage = ConfigStorage::new().map_err(|e| e.to_string())?;
    eprintln!("Password for {}:", name);
    let password = read_password().map_err(|e| e.to_string())?;
    minipanel_lib::add_user(&storage, name, &password)
        .await
        .map_err(|e| e.to_string())
}

fn main() -> ExitCode {
    minipanel_lib::init_logging();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("Failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let args: Vec<String> = std::env::args().skip(1).collect();
    let result = runtime.block_on(async {
        match args.as_slice() {
            [] => minipanel_lib::run().await.map_err(|e| e.to_string()),
            [command, name] if command == "add-user" => add_user(name).await,
            _ => Err(USAGE.to_string()),
        }
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
