mod commands;

use crate::commands::{AdminCommands, AdminError, AdminProfile, CreateAdminOutcome};
use clap::{Parser, Subcommand};
use common::firebase_auth::FirebaseAuthClient;
use common::google_auth::{IDENTITY_TOOLKIT_SCOPE, ServiceAccountKey, ServiceAccountTokenProvider};
use common::server_config::{self, AppConfig};
use common::utils::setup_logging;
use database::portal_pg::PgDbProvider;
use slog::{Logger, error, info};
use std::process::ExitCode;
use std::sync::Arc;

/// Administration of the mammography portal
#[derive(Debug, Parser)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create an administrator, or promote the account that already uses the email
    CreateAdmin {
        email: String,
        first_name: String,
        last_name: String,
        title: String,
        dni: String,
        address: String,
    },
    /// Grant the admin and approved claims to an existing account
    SetAdmin { uid: String },
    /// Create the portal tables when they are missing
    InitSchema,
    /// Delete a study with its series and images from the local mirror
    DeleteStudy { study_instance_uid: String },
}

fn build_commands(config: &AppConfig, log: &Logger) -> Result<AdminCommands, AdminError> {
    let http = reqwest::Client::new();
    let key = ServiceAccountKey::from_file(&config.firebase.service_account_path)?;
    let tokens = Arc::new(ServiceAccountTokenProvider::new(
        key,
        &[IDENTITY_TOOLKIT_SCOPE],
        http.clone(),
        log.clone(),
    ));
    let identity = Arc::new(FirebaseAuthClient::new(
        &config.firebase,
        http,
        tokens,
        log.clone(),
    ));
    let db = Arc::new(PgDbProvider::new(
        config.database.connection_string(),
        log.clone(),
    ));
    Ok(AdminCommands::new(identity, db, log.clone()))
}

async fn run(command: Command, commands: &AdminCommands, log: &Logger) -> Result<(), AdminError> {
    match command {
        Command::CreateAdmin {
            email,
            first_name,
            last_name,
            title,
            dni,
            address,
        } => {
            let profile = AdminProfile {
                email,
                first_name,
                last_name,
                title,
                dni,
                address,
            };
            match commands.create_admin(profile).await? {
                CreateAdminOutcome::Promoted { uid } => {
                    info!(log, "Existing user is now admin"; "uid" => uid)
                }
                CreateAdminOutcome::Created { uid } => {
                    info!(log, "New admin created"; "uid" => uid)
                }
            }
        }
        Command::SetAdmin { uid } => {
            commands.set_admin(&uid).await?;
            info!(log, "User assigned as admin"; "uid" => uid);
        }
        Command::InitSchema => commands.init_schema().await?,
        Command::DeleteStudy { study_instance_uid } => {
            commands.delete_study(&study_instance_uid).await?
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let log = setup_logging("portal-admin");

    let config = match server_config::load_config() {
        Ok(config) => config,
        Err(e) => {
            error!(log, "Error loading config: {:?}", e);
            return ExitCode::FAILURE;
        }
    };
    let result = match build_commands(&config, &log) {
        Ok(commands) => run(cli.command, &commands, &log).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(log, "{}", e);
            ExitCode::FAILURE
        }
    }
}
