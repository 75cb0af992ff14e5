use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use serde_json::Value;
use std::path::PathBuf;

#[zbus::proxy(
    interface = "org.rollcall.Rollcall1",
    default_service = "org.rollcall.Rollcall1",
    default_path = "/org/rollcall/Rollcall1"
)]
trait Rollcall {
    async fn enroll(&self, employee_id: &str, name: &str, department: &str) -> zbus::Result<String>;
    async fn start(&self) -> zbus::Result<()>;
    async fn stop(&self) -> zbus::Result<()>;
    async fn status(&self) -> zbus::Result<String>;
    async fn list_records(&self, employee_id: &str, since: &str) -> zbus::Result<String>;
    async fn list_identities(&self) -> zbus::Result<String>;
    async fn snapshot(&self, path: &str) -> zbus::Result<bool>;

    #[zbus(signal)]
    fn outcome(&self, payload: &str) -> zbus::Result<()>;
}

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall face attendance CLI")]
struct Cli {
    /// Talk to the daemon on the system bus (also ROLLCALL_SYSTEM_BUS=1)
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll the person currently in front of the camera
    Enroll {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        department: String,
    },
    /// Start recording attendance
    Start,
    /// Stop recording attendance
    Stop,
    /// Show daemon status
    Status,
    /// List attendance records
    Records {
        /// Only this employee
        #[arg(long)]
        employee: Option<String>,
        /// Only records at or after "YYYY-MM-DD HH:MM:SS" (or a bare date)
        #[arg(long)]
        since: Option<String>,
    },
    /// List enrolled identities
    Identities,
    /// Save the latest annotated camera frame
    Snapshot { path: PathBuf },
    /// List V4L2 capture devices (does not need the daemon)
    Devices,
    /// Print outcomes as the daemon produces them, until Ctrl-C
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Commands::Devices = cli.command {
        list_devices();
        return Ok(());
    }

    let system = cli.system || std::env::var("ROLLCALL_SYSTEM_BUS").is_ok_and(|v| v == "1");
    let conn = if system {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    }
    .context("failed to connect to D-Bus")?;
    let proxy = RollcallProxy::new(&conn)
        .await
        .context("rollcalld is not reachable; is the daemon running?")?;

    match cli.command {
        Commands::Enroll { id, name, department } => {
            let identity = parse(&proxy.enroll(&id, &name, &department).await?)?;
            println!(
                "Enrolled {} ({}, {})",
                field(&identity, "employee_id"),
                field(&identity, "name"),
                field(&identity, "department")
            );
            println!("Reference sample: {}", field(&identity, "reference_sample"));
        }
        Commands::Start => {
            proxy.start().await?;
            println!("Attendance detection started");
        }
        Commands::Stop => {
            proxy.stop().await?;
            println!("Attendance detection stopped");
        }
        Commands::Status => {
            let status = parse(&proxy.status().await?)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Records { employee, since } => {
            let records = parse(
                &proxy
                    .list_records(employee.as_deref().unwrap_or(""), since.as_deref().unwrap_or(""))
                    .await?,
            )?;
            let rows = records.as_array().map(Vec::as_slice).unwrap_or_default();
            if rows.is_empty() {
                println!("No attendance records");
            }
            for row in rows {
                println!("{}", record_line(row));
            }
        }
        Commands::Identities => {
            let identities = parse(&proxy.list_identities().await?)?;
            let rows = identities.as_array().map(Vec::as_slice).unwrap_or_default();
            if rows.is_empty() {
                println!("No identities enrolled");
            }
            for row in rows {
                println!(
                    "{:<12} {:<24} {}",
                    field(row, "employee_id"),
                    field(row, "name"),
                    field(row, "department")
                );
            }
        }
        Commands::Snapshot { path } => {
            let path = if path.is_absolute() {
                path
            } else {
                std::env::current_dir()?.join(path)
            };
            let Some(target) = path.to_str() else {
                bail!("snapshot path is not valid UTF-8: {}", path.display());
            };
            if proxy.snapshot(target).await? {
                println!("Snapshot written to {target}");
            } else {
                println!("No frame captured yet");
            }
        }
        Commands::Watch => {
            let mut stream = proxy.receive_outcome().await?;
            println!("Watching attendance outcomes (Ctrl-C to quit)");
            loop {
                tokio::select! {
                    signal = stream.next() => {
                        let Some(signal) = signal else { break };
                        match signal.args() {
                            Ok(args) => println!("{}", outcome_line(&parse(args.payload())?)),
                            Err(err) => tracing::warn!(error = %err, "malformed Outcome signal"),
                        }
                    }
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
        }
        Commands::Devices => list_devices(),
    }

    Ok(())
}

fn list_devices() {
    let devices = rollcall_hw::Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
    }
    for dev in devices {
        println!("{}  {} [{}] {}", dev.path, dev.name, dev.driver, dev.bus);
    }
}

fn parse(json: &str) -> Result<Value> {
    serde_json::from_str(json).context("daemon returned malformed JSON")
}

fn field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or("-")
}

fn record_line(event: &Value) -> String {
    format!(
        "{}  {:<12} {:<24} {}",
        field(event, "timestamp"),
        field(event, "employee_id"),
        field(event, "name"),
        field(event, "department")
    )
}

fn outcome_line(outcome: &Value) -> String {
    match field(outcome, "kind") {
        "recorded" => format!("recorded    {}", record_line(outcome)),
        "debounced" => format!("debounced   {}", field(outcome, "employee_id")),
        "not_recognized" => match outcome.get("score").and_then(Value::as_f64) {
            Some(score) => format!("unknown     best score {score:.3}"),
            None => "unknown     no candidates".to_string(),
        },
        "log_failed" => format!(
            "log failed  {}: {}",
            field(outcome, "employee_id"),
            field(outcome, "reason")
        ),
        other => format!("{other}: {outcome}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cli_parses_enroll() {
        let cli = Cli::try_parse_from([
            "rollcall", "enroll", "--id", "E1", "--name", "Alice", "--department", "Eng",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Enroll { ref id, .. } if id == "E1"));
        assert!(!cli.system);
    }

    #[test]
    fn test_cli_records_filters_optional() {
        let cli = Cli::try_parse_from(["rollcall", "--system", "records", "--since", "2024-09-02"]).unwrap();
        assert!(cli.system);
        match cli.command {
            Commands::Records { employee, since } => {
                assert_eq!(employee, None);
                assert_eq!(since.as_deref(), Some("2024-09-02"));
            }
            _ => panic!("expected records"),
        }
    }

    #[test]
    fn test_enroll_requires_all_fields() {
        assert!(Cli::try_parse_from(["rollcall", "enroll", "--id", "E1"]).is_err());
    }

    #[test]
    fn test_outcome_lines() {
        // Recorded events are flattened next to the tag.
        let recorded = json!({
            "kind": "recorded",
            "employee_id": "E1",
            "name": "Alice",
            "department": "Eng",
            "timestamp": "2024-09-02 09:00:01",
            "matched_sample": "/faces/E1.png"
        });
        let line = outcome_line(&recorded);
        assert!(line.starts_with("recorded"));
        assert!(line.contains("2024-09-02 09:00:01"));
        assert!(line.contains("Alice"));

        assert_eq!(outcome_line(&json!({"kind": "debounced", "employee_id": "E1"})), "debounced   E1");
        assert_eq!(
            outcome_line(&json!({"kind": "not_recognized", "score": null})),
            "unknown     no candidates"
        );
        assert!(outcome_line(&json!({"kind": "not_recognized", "score": 0.8123})).contains("0.812"));
    }
}
