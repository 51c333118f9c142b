use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

// `#[zbus::proxy]` generates `AttendanceProxy` (async) from this trait.
#[zbus::proxy(
    interface = "org.rollcall.Attendance1",
    default_service = "org.rollcall.Attendance1",
    default_path = "/org/rollcall/Attendance1"
)]
trait Attendance {
    async fn scan(&self, payload: &str) -> zbus::Result<String>;
    async fn enroll(&self, user_id: &str, embedding_json: &str, replace: bool)
        -> zbus::Result<String>;
    async fn deactivate(&self, user_id: &str) -> zbus::Result<u32>;
    async fn records(&self, user_id: &str, date: &str) -> zbus::Result<String>;
    async fn sweep_absences(&self, date: &str) -> zbus::Result<u32>;
    async fn refresh_gallery(&self) -> zbus::Result<u32>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance CLI")]
struct Cli {
    /// Talk to a daemon on the session bus (development setups).
    #[arg(long, global = true)]
    session: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a probe embedding for an attendance scan
    Scan {
        /// JSON file holding the embedding as a number array
        file: PathBuf,
        /// Free-form location label recorded on the ledger entry
        #[arg(short, long)]
        location: Option<String>,
        #[arg(long)]
        latitude: Option<f64>,
        #[arg(long)]
        longitude: Option<f64>,
        /// Path of the captured frame, stored as a reference
        #[arg(long)]
        image: Option<String>,
    },
    /// Enroll a face template for a user
    Enroll {
        user_id: String,
        /// JSON file holding the embedding as a number array
        file: PathBuf,
        /// Deactivate the user's existing templates first
        #[arg(long)]
        replace: bool,
    },
    /// Deactivate all templates for a user
    Deactivate { user_id: String },
    /// Show a user's ledger entries for a day
    Records {
        user_id: String,
        /// Day as YYYY-MM-DD
        date: String,
    },
    /// Append absence records for users with no entries on a day
    Sweep {
        /// Day as YYYY-MM-DD
        date: String,
    },
    /// Reload enrolled templates from storage
    Refresh,
    /// Show daemon status
    Status,
}

async fn connect(session: bool) -> Result<AttendanceProxy<'static>> {
    let connection = if session {
        zbus::Connection::session().await
    } else {
        zbus::Connection::system().await
    }
    .context("connecting to the bus — is rollcalld running?")?;
    Ok(AttendanceProxy::new(&connection).await?)
}

fn read_embedding(file: &PathBuf) -> Result<String> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    // Validate locally so a typo fails here, not at the daemon.
    let values: Vec<f32> = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a JSON number array", file.display()))?;
    Ok(serde_json::to_string(&values)?)
}

fn print_json(raw: &str) {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) => match serde_json::to_string_pretty(&value) {
            Ok(pretty) => println!("{pretty}"),
            Err(_) => println!("{raw}"),
        },
        Err(_) => println!("{raw}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let proxy = connect(cli.session).await?;

    match cli.command {
        Commands::Scan {
            file,
            location,
            latitude,
            longitude,
            image,
        } => {
            let embedding: serde_json::Value = serde_json::from_str(&read_embedding(&file)?)?;
            let payload = serde_json::json!({
                "embedding": embedding,
                "location": location,
                "latitude": latitude,
                "longitude": longitude,
                "face_image_path": image,
            });
            let outcome = proxy.scan(&payload.to_string()).await?;
            print_json(&outcome);
        }
        Commands::Enroll {
            user_id,
            file,
            replace,
        } => {
            let embedding = read_embedding(&file)?;
            let template_id = proxy.enroll(&user_id, &embedding, replace).await?;
            println!("enrolled template {template_id} for {user_id}");
        }
        Commands::Deactivate { user_id } => {
            let count = proxy.deactivate(&user_id).await?;
            println!("deactivated {count} template(s) for {user_id}");
        }
        Commands::Records { user_id, date } => {
            let records = proxy.records(&user_id, &date).await?;
            print_json(&records);
        }
        Commands::Sweep { date } => {
            let appended = proxy.sweep_absences(&date).await?;
            println!("recorded {appended} absence(s) for {date}");
        }
        Commands::Refresh => {
            let loaded = proxy.refresh_gallery().await?;
            println!("gallery reloaded: {loaded} template(s)");
        }
        Commands::Status => {
            let status = proxy.status().await?;
            print_json(&status);
        }
    }

    Ok(())
}
