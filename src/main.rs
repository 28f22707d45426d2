use std::env;
use std::io::BufRead;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facegate::accounts::{AccountError, Accounts};
use facegate::matcher::MatchPolicy;
use facegate::storage::{FileStore, UserStore};
use facegate::{config, identity, CaptureMode, RegionDetector, Signature};
use facegate_vision::capture::{CancelToken, CaptureSession, FrameSource, ImageFiles};
use facegate_vision::extract::RawPixelExtractor;
use facegate_vision::video::Camera;
use log::{info, warn};

#[derive(Parser)]
#[command(name = "facegate")]
#[command(
    version,
    about = "Face login with duplicate-face protection"
)]
struct Cli {
    /// Config file (defaults to the system config path)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an account, optionally capturing a face for it
    Register {
        /// Username to create (defaults to current user)
        #[arg(short, long)]
        user: Option<String>,
        /// Create a password-only account
        #[arg(long)]
        no_face: bool,
        /// Read frames from image files instead of the camera
        #[arg(long, num_args = 1..)]
        image: Vec<PathBuf>,
    },
    /// Capture a face and bind it to an existing account
    Enroll {
        #[arg(short, long)]
        user: Option<String>,
        #[arg(long, num_args = 1..)]
        image: Vec<PathBuf>,
    },
    /// Log in by matching a captured face against the account's face
    Verify {
        #[arg(short, long)]
        user: Option<String>,
        #[arg(long, num_args = 1..)]
        image: Vec<PathBuf>,
    },
    /// List accounts that share a face
    Duplicates {
        /// Print clusters as JSON
        #[arg(long)]
        json: bool,
    },
    /// List all accounts
    Users,
    /// Remove the face from an account
    Purge {
        #[arg(short, long)]
        user: Option<String>,
    },
    /// Delete an account
    Delete {
        #[arg(short, long)]
        user: String,
    },
    /// Open config file in editor
    Config,
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(cli.config.as_deref())?;
    let accounts = Accounts::new(
        FileStore::new(cfg.store_dir.clone()),
        MatchPolicy::new(cfg.threshold),
    );

    match cli.command {
        Commands::Register {
            user,
            no_face,
            image,
        } => register(&cfg, &accounts, identity::resolve_username(user)?, no_face, image),
        Commands::Enroll { user, image } => {
            enroll(&cfg, &accounts, &identity::resolve_username(user)?, image)
        }
        Commands::Verify { user, image } => {
            verify(&cfg, &accounts, &identity::resolve_username(user)?, image)
        }
        Commands::Duplicates { json } => duplicates(&accounts, json),
        Commands::Users => users(&accounts),
        Commands::Purge { user } => purge(&accounts, &identity::resolve_username(user)?),
        Commands::Delete { user } => delete(&accounts, &user),
        Commands::Config => open_config(cli.config),
    }
}

/// Set `cancel` when the user types `q` on stdin.
fn watch_for_quit(cancel: CancelToken) {
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(l) if l.trim().eq_ignore_ascii_case("q") => {
                    cancel.cancel();
                    break;
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
    });
}

fn capture(cfg: &config::Config, mode: CaptureMode, images: Vec<PathBuf>) -> Result<Signature> {
    let detector = RegionDetector::global(&cfg.cascades)
        .context("Failed to load face detector models")?;

    let cancel = CancelToken::new();
    let mut source: Box<dyn FrameSource> = if images.is_empty() {
        info!("Opening camera: {}", cfg.camera);
        let camera = Camera::open(&cfg.camera)?;
        info!("Look straight at the camera. Type 'q' and Enter to quit.");
        watch_for_quit(cancel.clone());
        Box::new(camera)
    } else {
        info!("Reading {} image(s)", images.len());
        Box::new(ImageFiles::new(images))
    };

    let session = CaptureSession::new(detector, &RawPixelExtractor, mode)
        .max_attempts(cfg.max_attempts)
        .cancel_token(cancel);
    Ok(session.run(source.as_mut())?)
}

fn register(
    cfg: &config::Config,
    accounts: &Accounts<FileStore>,
    user_id: String,
    no_face: bool,
    images: Vec<PathBuf>,
) -> Result<()> {
    info!("Registering user: {}", user_id);
    accounts.check_new_username(&user_id)?;

    let signature = if no_face {
        None
    } else {
        match capture(cfg, CaptureMode::Enroll, images) {
            Ok(sig) => Some(sig),
            Err(e) => {
                warn!("{e:#}");
                warn!("Account will be created without a face. Run 'enroll' later to add one.");
                None
            }
        }
    };
    let has_face = signature.is_some();

    match accounts.register(&user_id, signature.map(Vec::from)) {
        Ok(()) if has_face => info!("✓ Account created. Log in with password or face."),
        Ok(()) => info!("✓ Account created. Log in with password only."),
        Err(AccountError::DuplicateFace { existing }) => {
            anyhow::bail!("This face is already registered with username: {existing}")
        }
        Err(e) => return Err(e).context("Failed to create account"),
    }
    Ok(())
}

fn enroll(
    cfg: &config::Config,
    accounts: &Accounts<FileStore>,
    user_id: &str,
    images: Vec<PathBuf>,
) -> Result<()> {
    info!("Enrolling face for user: {}", user_id);
    if accounts.store().get(user_id)?.is_none() {
        anyhow::bail!("No account named {user_id}. Run 'register' first.");
    }

    let signature = capture(cfg, CaptureMode::Enroll, images).context("Face capture failed")?;
    accounts
        .enroll_face(user_id, Some(signature.into()))
        .context("Failed to enroll face")?;

    info!("✓ Face enrolled successfully for user: {}", user_id);
    Ok(())
}

fn verify(
    cfg: &config::Config,
    accounts: &Accounts<FileStore>,
    user_id: &str,
    images: Vec<PathBuf>,
) -> Result<()> {
    info!("Verifying face for user: {}", user_id);
    if !accounts.has_face(user_id)? {
        anyhow::bail!("No face registered for user: {user_id}. Use password login or 'enroll'.");
    }

    let signature = capture(cfg, CaptureMode::Verify, images).context("Face capture failed")?;
    if accounts.verify_face(user_id, Some(signature.into()))? {
        info!("✓ Face matched! Welcome {}!", user_id);
        Ok(())
    } else {
        anyhow::bail!("Authentication failed: face does not match")
    }
}

fn duplicates(accounts: &Accounts<FileStore>, json: bool) -> Result<()> {
    let clusters = accounts.find_duplicates_across_population()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&clusters)?);
        return Ok(());
    }
    if clusters.is_empty() {
        info!("No duplicate faces found");
        return Ok(());
    }
    for cluster in &clusters {
        println!("{}: {}", cluster.primary, cluster.similar.join(", "));
    }
    info!("{} duplicate group(s)", clusters.len());
    Ok(())
}

fn users(accounts: &Accounts<FileStore>) -> Result<()> {
    let records = accounts.users()?;
    for r in &records {
        let hash = r
            .content_hash
            .map(|h| h.to_string()[..12].to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<24} face={:<5} id={:<14} hash={:<12} created={} updated={}",
            r.username,
            r.has_face,
            r.face_id.as_deref().unwrap_or("-"),
            hash,
            r.created_at.format("%Y-%m-%d %H:%M:%S"),
            r.updated_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    info!("{} account(s)", records.len());
    Ok(())
}

fn purge(accounts: &Accounts<FileStore>, user_id: &str) -> Result<()> {
    info!("Removing face for user: {}", user_id);
    if !accounts.remove_face(user_id)? {
        anyhow::bail!("No account named {user_id}");
    }
    info!("✓ Face removed for user: {}", user_id);
    Ok(())
}

fn delete(accounts: &Accounts<FileStore>, user_id: &str) -> Result<()> {
    if !accounts.delete(user_id)? {
        anyhow::bail!("No account named {user_id}");
    }
    info!("✓ Deleted user: {}", user_id);
    Ok(())
}

fn open_config(path: Option<PathBuf>) -> Result<()> {
    let config_path = path.unwrap_or_else(|| config::CONFIG_PATH.to_path_buf());
    if !config_path.exists() {
        config::save_config(&config::Config::default(), Some(&config_path))
            .context("Failed to write default config")?;
    }
    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    info!("Opening config file: {:?}", config_path);

    let status = std::process::Command::new(editor)
        .arg(&config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}
