use arbeit::cli::{parse_tool_args, read_stdin, Cli, Commands};
use arbeit::error::Result;
use arbeit::logging::{cleanup_old_logs, default_log_file, ApplicationMode, LoggingConfig};
use arbeit::project::{self, init_status, ProjectContext};
use arbeit::tools::{Dispatcher, TOOL_NAMES};
use clap::Parser;
use std::io::IsTerminal;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // The tool server owns stdout, so its logs go to a file.
    let log_config = if matches!(cli.command, Commands::Serve) {
        let mut config = LoggingConfig::for_mode(ApplicationMode::ToolServer);
        if cli.verbose > 0 {
            config.level = LoggingConfig::from_args(cli.quiet, cli.verbose, true).level;
        }
        config
    } else {
        LoggingConfig::from_args(cli.quiet, cli.verbose, cli.json)
    }
    .with_env_overrides();

    if let Err(e) = arbeit::logging::init_logging(log_config) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    if matches!(cli.command, Commands::Serve) {
        let retention_days = std::env::var("ARBEIT_LOG_RETENTION_DAYS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(7);
        if let Some(dir) = default_log_file("serve").and_then(|f| f.parent().map(|p| p.to_path_buf()))
        {
            cleanup_old_logs(&dir, retention_days).ok();
        }
    }

    if let Err(e) = run(&cli).await {
        let error_response = e.to_error_response();
        match serde_json::to_string_pretty(&error_response) {
            Ok(json) => eprintln!("{}", json),
            Err(_) => eprintln!("{}", e),
        }
        std::process::exit(1);
    }
}

async fn run(cli: &Cli) -> Result<()> {
    let dir = project::resolve_dir(cli.dir.as_deref())?;

    match &cli.command {
        Commands::Init => {
            let already_initialized = init_status(&dir).is_initialized();
            let ctx = ProjectContext::init(&dir).await?;
            if already_initialized {
                println!("Arbeit already initialized in {}", ctx.root.display());
            } else {
                println!("Initialized Arbeit in {}", ctx.root.display());
            }
        },

        Commands::Status => {
            let status = init_status(&dir);
            println!("{}", serde_json::to_string_pretty(&status)?);
        },

        Commands::Tool { name, args } => {
            let raw = match args {
                Some(raw) => raw.clone(),
                None if !std::io::stdin().is_terminal() => read_stdin()?,
                None => String::new(),
            };
            let args = parse_tool_args(&raw)?;

            let response = Dispatcher::new(dir).call(name, args).await;
            println!("{}", serde_json::to_string_pretty(&response)?);
            if !response.success {
                std::process::exit(1);
            }
        },

        Commands::Tools => {
            for name in TOOL_NAMES {
                println!("{}", name);
            }
        },

        Commands::Serve => {
            arbeit::server::run(Dispatcher::new(dir)).await?;
        },
    }

    Ok(())
}
