use std::path::PathBuf;

use clap::{Parser, Subcommand};
use pathlease::commands::{self, Ctx};
use pathlease::commands::lease::ReserveArgs;
use pathlease::logging;
use pathlease::model::LeaseMode;
use pathlease::output::Format;

#[derive(Parser)]
#[command(
    name = "pathlease",
    version = pathlease::build_info::version_string(),
    about = "Path reservation leases for concurrent coding agents"
)]
struct Cli {
    /// Output format
    #[arg(long, global = true, value_enum, default_value = "json")]
    format: Format,
    /// Shorthand for --format pretty
    #[arg(long, global = true, hide = true)]
    pretty: bool,
    /// Config file (default: <root>/.pathlease/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Use a process-local store instead of the database
    #[arg(long, global = true)]
    memory: bool,
    /// Debug logging on stderr
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reserve path patterns for an agent
    Reserve {
        /// Project-relative glob patterns (e.g. 'src/api/*.py', 'docs/')
        #[arg(required = true)]
        patterns: Vec<String>,
        /// Agent identity (default: $PATHLEASE_AGENT)
        #[arg(long)]
        holder: Option<String>,
        /// Conflict scope (default: $PATHLEASE_PROJECT or the root path)
        #[arg(long)]
        project: Option<String>,
        #[arg(long, value_enum, default_value = "exclusive")]
        mode: LeaseMode,
        /// Shorthand for --mode shared
        #[arg(long)]
        shared: bool,
        /// Lease duration in seconds (default from config)
        #[arg(long)]
        ttl: Option<u64>,
        /// Why the paths are needed; shown to blocked agents
        #[arg(long, short)]
        reason: Option<String>,
    },
    /// Extend a lease you hold
    Renew {
        lease_id: String,
        #[arg(long)]
        holder: Option<String>,
        #[arg(long)]
        ttl: Option<u64>,
    },
    /// Release a lease you hold
    Release {
        lease_id: String,
        #[arg(long)]
        holder: Option<String>,
    },
    /// Release every lease you hold in the project, or only those holding
    /// one of the given patterns
    ReleaseAll {
        patterns: Vec<String>,
        #[arg(long)]
        holder: Option<String>,
        #[arg(long)]
        project: Option<String>,
    },
    /// Release someone else's lease (administrative)
    ForceRelease {
        lease_id: String,
        /// Administrator identity (default: $PATHLEASE_AGENT)
        #[arg(long)]
        admin: Option<String>,
        #[arg(long, short)]
        reason: Option<String>,
    },
    /// List active leases
    List {
        #[arg(long)]
        project: Option<String>,
        /// Only leases of this holder
        #[arg(long)]
        holder: Option<String>,
        /// Only leases with a pattern starting with this prefix
        #[arg(long)]
        prefix: Option<String>,
    },
    /// Report which paths are leased by other agents
    Check {
        #[arg(required = true)]
        paths: Vec<String>,
        #[arg(long)]
        holder: Option<String>,
        #[arg(long)]
        project: Option<String>,
        /// Also report shared leases
        #[arg(long)]
        strict: bool,
    },
    /// Pre-commit guard: fail if staged files are leased by other agents
    Guard {
        #[arg(long)]
        holder: Option<String>,
        #[arg(long)]
        project: Option<String>,
        /// Also block on shared leases
        #[arg(long)]
        strict: bool,
        /// Install as .git/hooks/pre-commit instead of running
        #[arg(long, conflicts_with = "uninstall")]
        install: bool,
        /// Remove the pre-commit hook installed by --install
        #[arg(long)]
        uninstall: bool,
        /// Replace an existing pre-commit hook
        #[arg(long, requires = "install")]
        force: bool,
    },
    /// Reap expired leases now
    Sweep,
    /// Show the lease audit log, newest first
    Events {
        #[arg(long)]
        project: Option<String>,
        /// Events of every project
        #[arg(long, conflicts_with = "project")]
        all: bool,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Run the lease server (line-delimited JSON over TCP)
    Serve {
        /// Listen address (overrides config)
        #[arg(long)]
        listen: Option<String>,
    },
}

fn run(cli: Cli, format: Format) -> pathlease::Result<()> {
    let cwd = std::env::current_dir()?;
    let root = pathlease::config::find_root(&cwd);
    let ctx = Ctx::new(&root, cli.config.as_deref(), format, cli.memory)?;

    match cli.command {
        Commands::Reserve {
            patterns,
            holder,
            project,
            mode,
            shared,
            ttl,
            reason,
        } => commands::lease::reserve(
            &ctx,
            ReserveArgs {
                patterns,
                holder,
                project,
                mode: if shared { LeaseMode::Shared } else { mode },
                ttl,
                reason,
            },
        ),
        Commands::Renew {
            lease_id,
            holder,
            ttl,
        } => commands::lease::renew(&ctx, &lease_id, holder, ttl),
        Commands::Release { lease_id, holder } => commands::lease::release(&ctx, &lease_id, holder),
        Commands::ReleaseAll {
            patterns,
            holder,
            project,
        } => commands::lease::release_all(&ctx, patterns, holder, project),
        Commands::ForceRelease {
            lease_id,
            admin,
            reason,
        } => commands::lease::force_release(&ctx, &lease_id, admin, reason),
        Commands::List {
            project,
            holder,
            prefix,
        } => commands::lease::list(&ctx, project, holder, prefix),
        Commands::Check {
            paths,
            holder,
            project,
            strict,
        } => commands::check::check(&ctx, paths, holder, project, strict),
        Commands::Guard {
            holder,
            project,
            strict,
            install,
            uninstall,
            force,
        } => {
            if install {
                commands::check::install_guard(&ctx, force)
            } else if uninstall {
                commands::check::uninstall_guard(&ctx)
            } else {
                commands::check::guard(&ctx, holder, project, strict)
            }
        }
        Commands::Sweep => commands::admin::sweep(&ctx),
        Commands::Events {
            project,
            all,
            limit,
        } => commands::admin::events(&ctx, project, all, limit),
        Commands::Serve { listen } => commands::serve::run(ctx, listen),
    }
}

fn main() {
    let cli = Cli::parse();
    let format = if cli.pretty {
        Format::Pretty
    } else {
        cli.format
    };
    let filter = match (&cli.command, cli.verbose) {
        (_, true) => logging::VERBOSE_FILTER,
        (Commands::Serve { .. }, false) => logging::SERVER_FILTER,
        _ => logging::CLI_FILTER,
    };
    logging::init(filter);

    if let Err(e) = run(cli, format) {
        match format {
            Format::Json => {
                let mut body = serde_json::json!({
                    "error": e.code(),
                    "message": e.to_string()
                });
                if let Some(blocking) = e.blocking() {
                    body["blocking"] = serde_json::json!(blocking);
                }
                eprintln!("{body}");
            }
            _ => eprintln!("error: {e}"),
        }
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn shared_flag_parses() {
        let cli = Cli::try_parse_from(["pathlease", "reserve", "src/**", "--shared", "--ttl", "60"])
            .unwrap();
        let Commands::Reserve {
            patterns, shared, ttl, ..
        } = cli.command
        else {
            panic!("expected reserve");
        };
        assert_eq!(patterns, vec!["src/**"]);
        assert!(shared);
        assert_eq!(ttl, Some(60));
    }

    #[test]
    fn force_requires_install() {
        assert!(Cli::try_parse_from(["pathlease", "guard", "--force"]).is_err());
    }

    #[test]
    fn version_flag_reports_build_version() {
        let err = match Cli::try_parse_from(["pathlease", "--version"]) {
            Err(err) => err,
            Ok(_) => panic!("--version should exit early"),
        };
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
        assert!(err.to_string().contains(pathlease::build_info::version_string()));
    }

    #[test]
    fn install_and_uninstall_are_exclusive() {
        assert!(Cli::try_parse_from(["pathlease", "guard", "--install", "--uninstall"]).is_err());
        assert!(Cli::try_parse_from(["pathlease", "guard", "--uninstall"]).is_ok());
    }
}
