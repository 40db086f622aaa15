use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use clap::{Parser, Subcommand};

#[zbus::proxy(
    interface = "org.muster.Attendance1",
    default_service = "org.muster.Attendance1",
    default_path = "/org/muster/Attendance1"
)]
trait Attendance {
    async fn check_face(&self, image: &str) -> zbus::Result<String>;
    async fn face_login(&self, image: &str, email: &str) -> zbus::Result<String>;
    async fn face_logout(&self, email: &str) -> zbus::Result<String>;
    async fn enroll(&self, staff_id: &str, image: &str, password: &str) -> zbus::Result<String>;
    async fn password_login(&self, email: &str, password: &str) -> zbus::Result<String>;
    async fn add_staff(
        &self,
        full_name: &str,
        email: &str,
        role: &str,
        job_type: &str,
    ) -> zbus::Result<String>;
    async fn set_schedule(
        &self,
        staff_id: &str,
        check_in: &str,
        check_out: &str,
    ) -> zbus::Result<String>;
    async fn remove_staff(&self, staff_id: &str) -> zbus::Result<String>;
    async fn get_staff(&self, staff_id: &str) -> zbus::Result<String>;
    async fn list_staff(&self) -> zbus::Result<String>;
    async fn attendance_report(
        &self,
        staff_id: &str,
        from: &str,
        to: &str,
        status: &str,
    ) -> zbus::Result<String>;
    async fn today_summary(&self) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "muster", about = "Muster attendance daemon CLI")]
struct Cli {
    /// Connect over the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Count faces in an image file
    CheckFace {
        /// Path to a JPEG/PNG capture
        image: PathBuf,
    },
    /// Face login (check-in); omit --email to search the whole gallery
    Login {
        image: PathBuf,
        #[arg(short, long)]
        email: Option<String>,
    },
    /// Check out
    Logout { email: String },
    /// Register a face capture and password for a staff member
    Enroll {
        staff_id: String,
        image: PathBuf,
        #[arg(short, long)]
        password: String,
    },
    /// Log in with email and password
    PasswordLogin {
        email: String,
        #[arg(short, long)]
        password: String,
    },
    /// Staff directory management
    #[command(subcommand)]
    Staff(StaffCommands),
    /// Attendance rows for one staff member over a date range
    Report {
        staff_id: String,
        /// Start date, YYYY-MM-DD
        #[arg(long)]
        from: String,
        /// End date, YYYY-MM-DD (inclusive)
        #[arg(long)]
        to: String,
        /// Filter: Late, Active or Inactive
        #[arg(long, default_value = "")]
        status: String,
    },
    /// Per-status headcounts for today
    Summary,
    /// Show daemon status
    Status,
}

#[derive(Subcommand)]
enum StaffCommands {
    /// Add a staff member (allocates the next sequential id)
    Add {
        full_name: String,
        email: String,
        #[arg(long, default_value = "staff")]
        role: String,
        #[arg(long, default_value = "")]
        job_type: String,
    },
    /// List the staff directory
    List,
    /// Show one staff member
    Get { staff_id: String },
    /// Remove a staff member (enrollment and attendance cascade)
    Remove { staff_id: String },
    /// Set ("HH:MM") or clear ("") the required check-in/check-out times
    Schedule {
        staff_id: String,
        #[arg(long, default_value = "")]
        check_in: String,
        #[arg(long, default_value = "")]
        check_out: String,
    },
}

/// Read an image file and encode it the way the daemon expects.
fn encode_image(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(BASE64.encode(bytes))
}

fn print_json(raw: &str) -> Result<()> {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        Err(_) => println!("{raw}"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let connection = if cli.system {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    }
    .context("connecting to the bus (is musterd running?)")?;
    let proxy = AttendanceProxy::new(&connection).await?;

    let raw = match cli.command {
        Commands::CheckFace { image } => proxy.check_face(&encode_image(&image)?).await?,
        Commands::Login { image, email } => {
            proxy
                .face_login(&encode_image(&image)?, email.as_deref().unwrap_or(""))
                .await?
        }
        Commands::Logout { email } => proxy.face_logout(&email).await?,
        Commands::Enroll {
            staff_id,
            image,
            password,
        } => {
            proxy
                .enroll(&staff_id, &encode_image(&image)?, &password)
                .await?
        }
        Commands::PasswordLogin { email, password } => {
            proxy.password_login(&email, &password).await?
        }
        Commands::Staff(staff) => match staff {
            StaffCommands::Add {
                full_name,
                email,
                role,
                job_type,
            } => proxy.add_staff(&full_name, &email, &role, &job_type).await?,
            StaffCommands::List => proxy.list_staff().await?,
            StaffCommands::Get { staff_id } => proxy.get_staff(&staff_id).await?,
            StaffCommands::Remove { staff_id } => proxy.remove_staff(&staff_id).await?,
            StaffCommands::Schedule {
                staff_id,
                check_in,
                check_out,
            } => proxy.set_schedule(&staff_id, &check_in, &check_out).await?,
        },
        Commands::Report {
            staff_id,
            from,
            to,
            status,
        } => proxy.attendance_report(&staff_id, &from, &to, &status).await?,
        Commands::Summary => proxy.today_summary().await?,
        Commands::Status => proxy.status().await?,
    };

    print_json(&raw)
}
