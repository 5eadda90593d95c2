//! `storefront`: command-line client for the storefront's account session.
//!
//! Registers, logs in and out, edits the profile, and evaluates the route
//! guards against the hosted backend, keeping the session in a local redb
//! file between runs.

mod commands;
mod config;

use std::io::Write;

use clap::{Parser, Subcommand};

use commands::app::App;
use config::ClientConfig;

/// Storefront CLI tool.
#[derive(Parser, Debug)]
#[command(name = "storefront", about = "Storefront session client")]
struct Cli {
    /// Path to client config file (default: ~/.storefront/config.toml).
    #[arg(long = "config", global = true)]
    config: Option<String>,

    /// Output format: table or json.
    #[arg(long = "output", short = 'o', global = true, default_value = "table")]
    output: String,

    /// Per-request timeout in milliseconds.
    #[arg(long = "timeout-ms", global = true)]
    timeout_ms: Option<u64>,

    /// Locale for messages (es or en).
    #[arg(long = "locale", global = true)]
    locale: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show or edit the client config.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Create an account.
    Register {
        /// E-mail address.
        #[arg(long)]
        email: Option<String>,
        /// Display name (default: the e-mail's local part).
        #[arg(long)]
        name: Option<String>,
        /// Password (prefer the interactive prompt).
        #[arg(long)]
        password: Option<String>,
    },

    /// Log in with e-mail and password.
    Login {
        /// E-mail address.
        #[arg(long)]
        email: Option<String>,
        /// Password (prefer the interactive prompt).
        #[arg(long)]
        password: Option<String>,
    },

    /// Log out and clear local session state.
    Logout,

    /// Show the logged-in identity.
    Whoami {
        /// Ask the backend instead of reading local state.
        #[arg(long)]
        refresh: bool,
    },

    /// Check whether the session is still valid.
    Status,

    /// Profile management.
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },

    /// Evaluate a route guard (`session` or `admin`). Exits 1 on redirect.
    Guard { which: String },

    /// Keep the session refreshed and print changes until Ctrl-C.
    Watch,

    /// Show version.
    Version,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Set backend connection and local options.
    Set {
        #[arg(long)]
        url: Option<String>,
        #[arg(long = "anon-key")]
        anon_key: Option<String>,
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
        #[arg(long)]
        locale: Option<String>,
    },
    /// Print the effective config.
    Show,
}

#[derive(Subcommand, Debug)]
enum ProfileAction {
    /// Change display name and, optionally, avatar URL.
    Update {
        #[arg(long)]
        name: String,
        #[arg(long)]
        avatar: Option<String>,
    },
}

fn prompt(label: &str) -> anyhow::Result<String> {
    eprint!("{}", label);
    std::io::stderr().flush()?;
    let mut s = String::new();
    std::io::stdin().read_line(&mut s)?;
    Ok(s.trim().to_string())
}

fn load_config(cli: &Cli, path: &std::path::Path) -> anyhow::Result<ClientConfig> {
    let mut config = ClientConfig::load(path)?.with_env();
    let mut overrides = Vec::new();
    if let Some(ms) = cli.timeout_ms {
        overrides.push(format!("--timeout-ms={}", ms));
    }
    if let Some(locale) = &cli.locale {
        overrides.push(format!("--locale={}", locale));
    }
    config.session = config.session.with_args(&overrides);
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Library logs go to stderr; quiet unless RUST_LOG asks.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config_path = cli
        .config
        .as_ref()
        .map(std::path::PathBuf::from)
        .unwrap_or_else(ClientConfig::default_path);
    let json = cli.output == "json";

    match &cli.command {
        Commands::Config { action } => match action {
            ConfigAction::Set { url, anon_key, data_dir, locale } => {
                commands::config::set(
                    url.as_deref(),
                    anon_key.as_deref(),
                    data_dir.as_deref(),
                    locale.as_deref(),
                    &config_path,
                )?;
            }
            ConfigAction::Show => commands::config::show(&config_path)?,
        },

        Commands::Version => {
            println!("storefront cli v{}", env!("CARGO_PKG_VERSION"));
        }

        command => {
            let config = load_config(&cli, &config_path)?;
            let mut app = App::open(&config, json)?;

            let allowed = match command {
                Commands::Register { email, name, password } => {
                    let email = match email {
                        Some(e) => e.clone(),
                        None => prompt("E-mail: ")?,
                    };
                    let password = match password {
                        Some(p) => p.clone(),
                        None => {
                            let pw = rpassword::prompt_password("Password: ")?;
                            let confirm = rpassword::prompt_password("Confirm password: ")?;
                            if pw != confirm {
                                anyhow::bail!("Passwords do not match.");
                            }
                            pw
                        }
                    };
                    commands::account::register(&app, &email, &password, name.as_deref()).await?;
                    true
                }
                Commands::Login { email, password } => {
                    let email = match email {
                        Some(e) => e.clone(),
                        None => prompt("E-mail: ")?,
                    };
                    let password = match password {
                        Some(p) => p.clone(),
                        None => rpassword::prompt_password("Password: ")?,
                    };
                    commands::account::login(&app, &email, &password).await?;
                    true
                }
                Commands::Logout => {
                    commands::account::logout(&app).await?;
                    true
                }
                Commands::Whoami { refresh } => {
                    commands::account::whoami(&app, *refresh).await?;
                    true
                }
                Commands::Status => {
                    commands::account::status(&app).await?;
                    true
                }
                Commands::Profile { action } => match action {
                    ProfileAction::Update { name, avatar } => {
                        commands::account::update_profile(&app, name, avatar.as_deref()).await?;
                        true
                    }
                },
                Commands::Guard { which } => commands::guard::check(&app, which).await?,
                Commands::Watch => {
                    commands::watch::run(&app).await?;
                    true
                }
                Commands::Config { .. } | Commands::Version => true,
            };

            app.ctx.shutdown();
            drop(app);
            if !allowed {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
