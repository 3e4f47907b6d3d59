//! crmsync - probe a CRM OData endpoint.
//!
//! ```text
//! crmsync get <service> <id>
//! crmsync list <service> [filter]...
//! ```
//!
//! Configuration comes from the environment (or a `.env` file), see
//! [`ClientConfig::from_env`].

use crmsync_client::{ClientConfig, ClientError, ODataClient};
use crmsync_engine::{RemoteApi, RemoteSnapshot};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Get { service: String, id: String },
    List { service: String, filters: Vec<String> },
}

impl Command {
    fn parse(args: &[String]) -> Result<Self, ClientError> {
        match args {
            [cmd, service, id] if cmd == "get" => Ok(Command::Get {
                service: service.clone(),
                id: id.clone(),
            }),
            [cmd, service, filters @ ..] if cmd == "list" => Ok(Command::List {
                service: service.clone(),
                filters: filters.to_vec(),
            }),
            _ => Err(ClientError::Usage(
                "crmsync get <service> <id> | crmsync list <service> [filter]...".to_string(),
            )),
        }
    }
}

fn print_snapshot(snapshot: &RemoteSnapshot) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(snapshot)?);
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "crmsync_client=debug,crmsync_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = ClientConfig::from_env()?;
    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = Command::parse(&args)?;

    tracing::info!("Connecting to {}", config.rest_root());
    let client = ODataClient::from_config(&config)?;

    match command {
        Command::Get { service, id } => {
            let snapshot = client.get(&service, &id)?;
            print_snapshot(&snapshot)?;
        }
        Command::List { service, filters } => {
            let snapshots = client.list(&service, &filters)?;
            tracing::info!("{} {} record(s)", snapshots.len(), service);
            for snapshot in &snapshots {
                print_snapshot(snapshot)?;
            }
        }
    }

    client.session().release();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_get() {
        assert_eq!(
            Command::parse(&args(&["get", "Account", "guid-1"])).unwrap(),
            Command::Get {
                service: "Account".into(),
                id: "guid-1".into()
            }
        );
    }

    #[test]
    fn parses_list_with_filters() {
        assert_eq!(
            Command::parse(&args(&["list", "Contact", "FirstName eq 'Jane'"])).unwrap(),
            Command::List {
                service: "Contact".into(),
                filters: vec!["FirstName eq 'Jane'".into()]
            }
        );
    }

    #[test]
    fn rejects_unknown_command() {
        assert!(matches!(
            Command::parse(&args(&["delete", "Account"])),
            Err(ClientError::Usage(_))
        ));
        assert!(Command::parse(&args(&[])).is_err());
    }
}
