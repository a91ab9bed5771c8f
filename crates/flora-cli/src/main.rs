use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use flora_contracts::ledger::CreditPackage;
use flora_contracts::media::Image;
use flora_contracts::models::{Mode, StylePreferences, Submission, SUPPORTED_LANGUAGES};
use flora_contracts::projects::Project;
use flora_engine::{Studio, StudioConfig, StudioError};
use serde_json::json;

/// Exit code for generation failures the user can act on.
const EXIT_REJECTED: i32 = 2;

#[derive(Debug, Parser)]
#[command(name = "flora", version, about = "FloraDesign studio: AI edits for floral photos")]
struct Cli {
    /// Emit debug diagnostics on stderr.
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Sign in (registers the account on first use).
    Login(LoginArgs),
    Logout,
    Whoami,
    Generate(GenerateArgs),
    #[command(subcommand)]
    Projects(ProjectsCommand),
    #[command(subcommand)]
    Credits(CreditsCommand),
    #[command(subcommand)]
    Prefs(PrefsCommand),
    /// Show or set the interface language.
    Language { code: Option<String> },
    #[command(subcommand)]
    Admin(AdminCommand),
}

#[derive(Debug, Args)]
struct LoginArgs {
    #[arg(long)]
    email: String,
    #[arg(long, default_value = "")]
    name: String,
}

#[derive(Debug, Args)]
struct GenerateArgs {
    /// Photo of the space or arrangement.
    #[arg(long)]
    image: Option<PathBuf>,
    /// edit, create or humanize.
    #[arg(long, default_value = "edit")]
    mode: String,
    #[arg(long, default_value = "")]
    prompt: String,
    /// Ask for maximum detail.
    #[arg(long)]
    hd: bool,
    /// Keep the before/after pair as a project.
    #[arg(long)]
    save: bool,
    /// Where to write the resulting image.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum ProjectsCommand {
    List,
    Show { id: String },
    Delete { id: String },
    /// Write the before and after images into a directory.
    Export {
        id: String,
        #[arg(long)]
        out: PathBuf,
    },
}

#[derive(Debug, Subcommand)]
enum CreditsCommand {
    Balance,
    Packages,
    Buy { package: String },
    History,
}

#[derive(Debug, Subcommand)]
enum PrefsCommand {
    Set {
        #[arg(long = "color")]
        colors: Vec<String>,
        #[arg(long)]
        foliage: Vec<String>,
        #[arg(long)]
        style: Option<String>,
    },
    Show,
}

#[derive(Debug, Subcommand)]
enum AdminCommand {
    /// Show settings, optionally changing the model or mock reference.
    Settings {
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        mock_url: Option<String>,
    },
    SetKey { key: String },
    ClearKey,
    Report,
    /// List packages, or replace the catalog from a JSON file.
    Packages {
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Tail the studio event log.
    Events {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("flora error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;
    let config = StudioConfig::from_env()?;
    tracing::debug!(data_dir = %config.data_dir.display(), model = %config.image_model, "opening studio");
    let mut studio = Studio::open(config)?;

    match cli.command {
        Command::Login(args) => {
            let profile = studio.sign_in(&args.email, &args.name)?;
            println!("Signed in as {} <{}>", profile.name, profile.email);
            if let Some(balance) = studio.balance() {
                println!("Balance: {balance} credits");
            }
            Ok(0)
        }
        Command::Logout => {
            studio.sign_out()?;
            println!("Signed out");
            Ok(0)
        }
        Command::Whoami => {
            match studio.current_user() {
                Some(user) => println!(
                    "{} <{}> ({:?}), {} credits",
                    user.name,
                    user.email,
                    user.role,
                    studio.balance().unwrap_or_default()
                ),
                None => println!("guest ({} free generation(s) used)", studio.guest_uses()),
            }
            Ok(0)
        }
        Command::Generate(args) => run_generate(&mut studio, args),
        Command::Projects(command) => run_projects(&mut studio, command),
        Command::Credits(command) => run_credits(&mut studio, command),
        Command::Prefs(command) => run_prefs(&mut studio, command),
        Command::Language { code } => {
            match code {
                Some(code) => println!("Language set to {}", studio.set_language(&code)?),
                None => println!(
                    "{} (available: {})",
                    studio.language(),
                    SUPPORTED_LANGUAGES.join(", ")
                ),
            }
            Ok(0)
        }
        Command::Admin(command) => run_admin(&mut studio, command),
    }
}

fn init_tracing(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_env("FLORA_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow::anyhow!("failed to initialize tracing subscriber: {err}"))
}

fn run_generate(studio: &mut Studio, args: GenerateArgs) -> Result<i32> {
    let mode: Mode = args.mode.parse()?;
    let image = args
        .image
        .as_deref()
        .map(Image::from_path)
        .transpose()?;
    let submission = Submission::new(image, args.prompt, mode).with_quality_hint(args.hd);

    println!("Generating ({mode}, {} credits)...", studio.cost_for(mode));
    let outcome = match studio.submit(submission) {
        Ok(outcome) => outcome,
        Err(StudioError::Generation(err)) => {
            eprintln!("{}", err.user_message());
            return Ok(EXIT_REJECTED);
        }
        Err(StudioError::Other(err)) => return Err(err),
    };

    if let Some(fallback) = outcome.result.fallback.as_ref() {
        println!("Preview result (reason: {}); no credits were used.", fallback.code());
    }
    let out = args
        .out
        .unwrap_or_else(|| PathBuf::from(format!("flora-result.{}", outcome.result.image.extension())));
    outcome.result.image.write_to(&out)?;
    println!("Wrote {}", out.display());
    if let Some(balance) = outcome.balance {
        println!("Charged {} credits; balance {balance}", outcome.credits_charged);
    }
    if args.save {
        let project = studio.save_project(&outcome)?;
        println!("Saved project {}", project.id);
    }
    Ok(0)
}

fn run_projects(studio: &mut Studio, command: ProjectsCommand) -> Result<i32> {
    match command {
        ProjectsCommand::List => {
            let projects = studio.projects();
            if projects.is_empty() {
                println!("No saved projects");
            }
            for project in projects {
                println!("{}", project_line(&project));
            }
        }
        ProjectsCommand::Show { id } => {
            let project = require_project(studio, &id)?;
            let summary = json!({
                "id": project.id,
                "mode": project.mode,
                "instruction": project.instruction,
                "created_at": project.created_at,
                "before": {"encoding": project.before_image.encoding(), "bytes": project.before_image.len()},
                "after": {"encoding": project.after_image.encoding(), "bytes": project.after_image.len()},
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        ProjectsCommand::Delete { id } => {
            if !studio.delete_project(&id)? {
                bail!("no project with id {id}");
            }
            println!("Deleted project {id}");
        }
        ProjectsCommand::Export { id, out } => {
            let project = require_project(studio, &id)?;
            export_project(&project, &out)?;
            println!("Exported to {}", out.display());
        }
    }
    Ok(0)
}

fn require_project(studio: &Studio, id: &str) -> Result<Project> {
    studio
        .project(id)
        .with_context(|| format!("no project with id {id}"))
}

fn project_line(project: &Project) -> String {
    let instruction = if project.instruction.is_empty() {
        "(no instruction)"
    } else {
        project.instruction.as_str()
    };
    format!(
        "{}  {}  {:<8}  {}",
        project.id,
        project.created_at.format("%Y-%m-%d %H:%M"),
        project.mode.as_str(),
        instruction
    )
}

fn export_project(project: &Project, out: &Path) -> Result<()> {
    fs::create_dir_all(out).with_context(|| format!("failed to create {}", out.display()))?;
    let before = out.join(format!("{}-before.{}", project.id, project.before_image.extension()));
    let after = out.join(format!("{}-after.{}", project.id, project.after_image.extension()));
    project.before_image.write_to(&before)?;
    project.after_image.write_to(&after)?;
    Ok(())
}

fn run_credits(studio: &mut Studio, command: CreditsCommand) -> Result<i32> {
    match command {
        CreditsCommand::Balance => match studio.balance() {
            Some(balance) => println!("{balance} credits"),
            None => println!("Sign in to see your credit balance"),
        },
        CreditsCommand::Packages => print_packages(&studio.packages()),
        CreditsCommand::Buy { package } => {
            let tx = studio.purchase(&package)?;
            println!(
                "Added {} credits for ${:.2}; balance {}",
                tx.credits,
                tx.amount_usd,
                studio.balance().unwrap_or_default()
            );
        }
        CreditsCommand::History => {
            for tx in studio.transactions() {
                println!(
                    "{}  {:<8}  {:>+6}  {}",
                    tx.created_at.format("%Y-%m-%d %H:%M"),
                    format!("{:?}", tx.kind).to_lowercase(),
                    tx.credits,
                    tx.package_id.as_deref().or(tx.note.as_deref()).unwrap_or_default()
                );
            }
        }
    }
    Ok(0)
}

fn print_packages(packages: &[CreditPackage]) {
    for package in packages {
        println!(
            "{:<10} {:<12} {:>6} credits  ${:.2}",
            package.id, package.name, package.credits, package.price_usd
        );
    }
}

fn run_prefs(studio: &mut Studio, command: PrefsCommand) -> Result<i32> {
    match command {
        PrefsCommand::Set {
            colors,
            foliage,
            style,
        } => {
            let preferences = StylePreferences {
                colors,
                foliage,
                style: style.filter(|value| !value.trim().is_empty()),
            };
            studio.set_preferences(preferences)?;
            println!("Preferences saved");
        }
        PrefsCommand::Show => match studio.preferences().describe() {
            Some(text) => println!("{text}"),
            None => println!("No saved preferences"),
        },
    }
    Ok(0)
}

fn run_admin(studio: &mut Studio, command: AdminCommand) -> Result<i32> {
    match command {
        AdminCommand::Settings { model, mock_url } => {
            let settings = if model.is_none() && mock_url.is_none() {
                studio.admin_settings()?
            } else {
                studio.update_admin_settings(|settings| {
                    if let Some(model) = model {
                        settings.image_model = Some(model).filter(|value| !value.trim().is_empty());
                    }
                    if let Some(url) = mock_url {
                        settings.mock_image_url = Some(url).filter(|value| !value.trim().is_empty());
                    }
                })?
            };
            println!("{}", serde_json::to_string_pretty(&settings)?);
            println!(
                "credential: {}",
                if studio.credential().is_some() { "configured" } else { "missing (mock mode)" }
            );
        }
        AdminCommand::SetKey { key } => {
            studio.update_admin_settings(|settings| settings.api_key = Some(key.trim().to_string()))?;
            if studio.credential().is_none() {
                println!("Key stored but not usable; generations will use the mock preview");
            } else {
                println!("API key updated");
            }
        }
        AdminCommand::ClearKey => {
            studio.update_admin_settings(|settings| settings.api_key = None)?;
            println!("API key cleared");
        }
        AdminCommand::Report => {
            let report = studio.financial_report()?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        AdminCommand::Packages { file } => {
            if let Some(file) = file {
                let raw = fs::read_to_string(&file)
                    .with_context(|| format!("failed to read {}", file.display()))?;
                let packages: Vec<CreditPackage> = serde_json::from_str(&raw)
                    .with_context(|| format!("invalid package list in {}", file.display()))?;
                studio.set_packages(&packages)?;
            } else {
                // Listing still requires the admin role.
                studio.admin_settings()?;
            }
            print_packages(&studio.packages());
        }
        AdminCommand::Events { limit } => {
            for event in studio.recent_events(limit)? {
                println!(
                    "{}  {:<24} {}  {}",
                    event.ts.to_rfc3339(),
                    event.kind.as_str(),
                    event.session_id,
                    serde_json::Value::Object(event.fields)
                );
            }
        }
    }
    Ok(0)
}
