use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[zbus::proxy(
    interface = "org.porter.Porter1",
    default_service = "org.porter.Porter1",
    default_path = "/org/porter/Porter1"
)]
trait Porter {
    async fn resolve_permission(&self, action: &str, name: &str) -> zbus::Result<String>;
    async fn permission_status(&self) -> zbus::Result<String>;
    async fn face_image(&self) -> zbus::Result<Vec<u8>>;
    async fn access_log(&self, date: &str) -> zbus::Result<String>;
    async fn notifications(&self) -> zbus::Result<String>;
    async fn mark_notifications_read(&self) -> zbus::Result<()>;
    async fn list_known(&self) -> zbus::Result<String>;
    async fn list_visitors(&self) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "porter", about = "Porter door access control CLI")]
struct Cli {
    /// Talk to a daemon on the session bus instead of the system bus
    #[arg(long, global = true)]
    session: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon status
    Status,
    /// Show the pending visitor request, if any
    Pending,
    /// Register the pending visitor under NAME and open the door
    Allow { name: String },
    /// Let the pending visitor in once without registering them
    AllowOnce { name: String },
    /// Turn the pending visitor away
    Deny,
    /// Save the pending visitor's face still to a file
    FaceImage { output: PathBuf },
    /// Show the access log for a day
    Log {
        /// Day as YYYY-MM-DD (default: today, UTC)
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },
    /// Show recent notifications
    Notifications {
        /// Mark all notifications as read afterwards
        #[arg(long)]
        mark_read: bool,
    },
    /// List registered faces
    Known,
    /// List visitors admitted once
    Visitors,
}

/// Re-indent a JSON reply for the terminal; pass anything else through.
fn pretty(reply: &str) -> String {
    serde_json::from_str::<serde_json::Value>(reply)
        .and_then(|v| serde_json::to_string_pretty(&v))
        .unwrap_or_else(|_| reply.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = if cli.session {
        zbus::Connection::session().await
    } else {
        zbus::Connection::system().await
    }
    .context("failed to connect to D-Bus")?;
    let proxy = PorterProxy::new(&conn)
        .await
        .context("porterd is not reachable")?;

    match cli.command {
        Commands::Status => println!("{}", pretty(&proxy.status().await?)),
        Commands::Pending => println!("{}", pretty(&proxy.permission_status().await?)),
        Commands::Allow { name } => println!("{}", pretty(&proxy.resolve_permission("allow", &name).await?)),
        Commands::AllowOnce { name } => {
            println!("{}", pretty(&proxy.resolve_permission("allowonce", &name).await?))
        }
        Commands::Deny => println!("{}", pretty(&proxy.resolve_permission("deny", "").await?)),
        Commands::FaceImage { output } => {
            let bytes = proxy.face_image().await.context("no face image available")?;
            std::fs::write(&output, &bytes).with_context(|| format!("failed to write {}", output.display()))?;
            println!("Saved {} bytes to {}", bytes.len(), output.display());
        }
        Commands::Log { date } => {
            let date = date.map(|d| d.to_string()).unwrap_or_default();
            println!("{}", pretty(&proxy.access_log(&date).await?));
        }
        Commands::Notifications { mark_read } => {
            println!("{}", pretty(&proxy.notifications().await?));
            if mark_read {
                proxy.mark_notifications_read().await?;
            }
        }
        Commands::Known => println!("{}", pretty(&proxy.list_known().await?)),
        Commands::Visitors => println!("{}", pretty(&proxy.list_visitors().await?)),
    }

    Ok(())
}
