//! InstaClone CLI - sign in, browse the live feed, and share posts.

mod commands;
mod output;

use clap::{Parser, Subcommand};
use client_config_and_utils::{init_logging, Config, Paths};
use tracing::debug;

/// InstaClone CLI - a terminal client for the InstaClone photo feed.
#[derive(Parser)]
#[command(name = "instaclone")]
#[command(about = "Sign in, follow the live feed, and share posts")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Use the built-in demo backend, signed in as demo@instaclone.dev
    #[arg(long, global = true)]
    offline: bool,

    /// Output format (text or json)
    #[arg(short, long, default_value = "text", global = true)]
    format: output::OutputFormat,

    /// Log level (trace, debug, info, warn, error); defaults to the config file
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Mirror logs to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Login with email and password
    Login {
        #[arg(long)]
        email: Option<String>,
        #[arg(long, env = "INSTACLONE_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Create an account and sign in
    Signup {
        #[arg(long)]
        email: Option<String>,
        #[arg(long, env = "INSTACLONE_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Logout and clear session
    Logout,

    /// Check authentication status
    Status,

    /// Show the feed, newest first
    Feed {
        /// Keep running and print new posts as they arrive
        #[arg(long)]
        follow: bool,
    },

    /// Share a post from an already uploaded image
    Post {
        #[arg(long)]
        caption: Option<String>,
        /// Public URL of the image
        #[arg(long)]
        image_url: String,
    },

    /// Show a profile (defaults to the signed-in user)
    Profile {
        user_id: Option<String>,
    },
}

impl Commands {
    fn wants_demo_session(&self) -> bool {
        !matches!(self, Commands::Login { .. } | Commands::Signup { .. })
    }
}

async fn run(cli: Cli, paths: Paths, config: Config) -> anyhow::Result<()> {
    let ctx = commands::Context::connect(
        &paths,
        config,
        cli.offline,
        cli.command.wants_demo_session(),
        cli.format,
    )
    .await?;

    let result = match cli.command {
        Commands::Login { email, password } => commands::login(&ctx, email, password).await,
        Commands::Signup { email, password } => commands::signup(&ctx, email, password).await,
        Commands::Logout => commands::logout(&ctx).await,
        Commands::Status => commands::status(&ctx).await,
        Commands::Feed { follow } => commands::feed(&ctx, follow).await,
        Commands::Post { caption, image_url } => {
            commands::post(&ctx, caption, image_url).await
        }
        Commands::Profile { user_id } => commands::profile(&ctx, user_id).await,
    };

    ctx.close();
    result
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let paths = match Paths::new() {
        Ok(paths) => paths,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let config = match Config::load(&paths) {
        Ok(config) => config,
        Err(e) if cli.offline => {
            eprintln!("warning: ignoring invalid config in offline mode: {e}");
            Config::default()
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let level = cli.log_level.clone().unwrap_or_else(|| config.log_level.clone());
    init_logging(&paths, &level, cli.verbose);
    debug!(offline = cli.offline, level = %level, "CLI starting");

    if let Err(e) = run(cli, paths, config).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
