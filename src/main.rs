use std::{env, io};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fern::colors::{Color, ColoredLevelConfig};
use log::{info, LevelFilter};
use tokio::io::BufReader;

mod auth;
mod browser;
mod config;
mod console;
mod datetime;
mod entry_command;
mod error;
mod export;
mod firestore;
mod functions;
mod list_command;
mod login_command;
mod member_command;
mod report;
mod report_command;
mod stopwatch;
mod store;
mod time_entry;
mod track_command;

use auth::{IdentityClient, SessionStore};
use config::Config;
use entry_command::{AddArgs, EditArgs, EntryCommand, EntryIdArgs};
use firestore::FirestoreClient;
use functions::FunctionsClient;
use member_command::{MemberArgs, MemberCommand, TaskArgs, TaskCommand};
use list_command::{ListArgs, ListCommand};
use login_command::{
    member_session, refresh_session, LoginArgs, LoginCommand, MemberLoginArgs, MemberLoginCommand,
};
use report_command::{ExportArgs, ReportArgs, ReportCommand};
use time_entry::EntryStatus;
use track_command::{TrackArgs, TrackCommand};

/// 会社の作業時間を記録し、確認するためのCLIアプリケーション。
///
/// # Examples
/// ```
/// $ cargo run -- login --email boss@example.com
/// $ cargo run -- track "website redesign"
/// $ cargo run -- list --status pending
/// $ cargo run -- member invite --name Ana --email ana@example.com
/// ```
#[derive(Debug, Parser)]
#[clap(version, about)]
struct Args {
    #[clap(short = 'v', long = "verbose", help = "Prints debug logs")]
    verbose: bool,

    #[clap(subcommand)]
    subcommand: SubCommands,
}

/// サブコマンドを表す列挙型。
#[derive(Debug, Subcommand)]
enum SubCommands {
    /// Signs in with the company account
    Login(LoginArgs),
    /// Signs in as a collaborator with a login token
    MemberLogin(MemberLoginArgs),
    /// Forgets the saved session
    Logout,
    /// Runs a stopwatch and saves the elapsed time
    Track(TrackArgs),
    /// Adds a time entry by hand
    Add(AddArgs),
    /// Edits a time entry
    Edit(EditArgs),
    /// Browses time entries page by page
    List(ListArgs),
    /// Approves a collaborator's time entry
    Approve(EntryIdArgs),
    /// Rejects a collaborator's time entry
    Reject(EntryIdArgs),
    /// Deletes a time entry
    Delete(EntryIdArgs),
    /// Prints hours by project, member and day
    Report(ReportArgs),
    /// Writes all time entries as CSV
    Export(ExportArgs),
    /// Manages the company's collaborators
    Member(MemberArgs),
    /// Manages the company's task catalog
    Task(TaskArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logger(args.verbose)?;

    let config = Config::from_env()?;
    let sessions = SessionStore::new(config.session_path.clone());

    match args.subcommand {
        SubCommands::Login(login) => {
            let password = match login.password {
                Some(password) => password,
                None => read_password()?,
            };
            let auth = IdentityClient::new(&config);
            let session = LoginCommand::new(&auth).run(&login.email, &password).await?;
            sessions.save(&session)?;
            println!("Signed in as {}.", session.email);
        }
        SubCommands::MemberLogin(member) => {
            let auth = IdentityClient::new(&config);
            let functions = FunctionsClient::new(&config);
            let identity = MemberLoginCommand::new(&auth, &functions)
                .run(&member.token)
                .await?;
            let repository = FirestoreClient::new(&config, &identity.id_token);
            let session = member_session(&repository, identity).await?;
            sessions.save(&session)?;
            println!("Signed in as {}.", session.email);
        }
        SubCommands::Logout => {
            sessions.clear()?;
            println!("Signed out.");
        }
        subcommand => {
            let stored = sessions.current_session()?;
            let session = refresh_session(&IdentityClient::new(&config), stored.clone()).await?;
            if session != stored {
                sessions.save(&session)?;
            }
            let repository = FirestoreClient::new(&config, &session.id_token);
            info!("Using company {} as {:?}", session.company_id, session.role);

            match subcommand {
                SubCommands::Track(track) => {
                    let input = BufReader::new(tokio::io::stdin());
                    TrackCommand::new(&repository, &session)
                        .run(track, input, &mut io::stdout())
                        .await?;
                }
                SubCommands::Add(add) => {
                    let id = EntryCommand::new(&repository, &session).add(add).await?;
                    println!("Added time entry {}.", id);
                }
                SubCommands::Edit(edit) => {
                    let entry = EntryCommand::new(&repository, &session).edit(edit).await?;
                    println!("Updated time entry {}.", entry.id);
                }
                SubCommands::List(list) => {
                    let input = BufReader::new(tokio::io::stdin());
                    ListCommand::new(&repository, &session)
                        .run(list, input, &mut io::stdout())
                        .await?;
                }
                SubCommands::Approve(target) => {
                    EntryCommand::new(&repository, &session)
                        .review(target, EntryStatus::Approved)
                        .await?;
                }
                SubCommands::Reject(target) => {
                    EntryCommand::new(&repository, &session)
                        .review(target, EntryStatus::Rejected)
                        .await?;
                }
                SubCommands::Delete(target) => {
                    EntryCommand::new(&repository, &session).delete(target).await?;
                }
                SubCommands::Report(report) => {
                    ReportCommand::new(&repository, &session)
                        .report(report, &mut io::stdout())
                        .await?;
                }
                SubCommands::Export(export) => {
                    ReportCommand::new(&repository, &session)
                        .export(export, &mut io::stdout())
                        .await?;
                }
                SubCommands::Member(member) => {
                    let functions = FunctionsClient::new(&config).with_id_token(&session.id_token);
                    MemberCommand::new(&repository, &functions, &session)
                        .run(member, &mut io::stdout())
                        .await?;
                }
                SubCommands::Task(task) => {
                    TaskCommand::new(&repository, &session)
                        .run(task, &mut io::stdout())
                        .await?;
                }
                SubCommands::Login(_) | SubCommands::MemberLogin(_) | SubCommands::Logout => {}
            }
        }
    }

    Ok(())
}

/// ログの出力先と書式を設定する。
///
/// `--verbose`が指定された場合はdebug、それ以外は`PUNCHCLOCK_LOG`のレベル（既定はwarn）で出力する。
fn setup_logger(verbose: bool) -> Result<()> {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        env::var("PUNCHCLOCK_LOG")
            .ok()
            .and_then(|level| level.parse().ok())
            .unwrap_or(LevelFilter::Warn)
    };
    let colors = ColoredLevelConfig::new()
        .error(Color::Red)
        .warn(Color::Yellow)
        .info(Color::Green)
        .debug(Color::Cyan);

    fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                chrono::Local::now().format("%H:%M:%S"),
                colors.color(record.level()),
                record.target(),
                message
            ))
        })
        .level(level)
        .level_for("reqwest", LevelFilter::Warn)
        .level_for("hyper", LevelFilter::Warn)
        .chain(io::stderr())
        .apply()
        .context("Failed to set up logger")?;

    Ok(())
}

/// パスワードを`PUNCHCLOCK_PASSWORD`か端末から読み込む。端末への入力はエコーしない。
fn read_password() -> Result<String> {
    if let Ok(password) = env::var("PUNCHCLOCK_PASSWORD") {
        return Ok(password);
    }

    rpassword::prompt_password("Password: ").context("Failed to read password")
}
