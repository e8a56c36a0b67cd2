use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;
use itertools::Itertools;
use miette::{IntoDiagnostic, WrapErr};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use url::Url;

use duffel_resolver::requirements_txt::requirements_from_file;
use duffel_resolver::resolve::{ResolveError, Resolver, ResolverOptions};
use duffel_resolver::types::Link;
use duffel_resolver::{InterpreterIdentity, Platform, ProbeError, Resolvable};

/// Exit code when a source distribution cannot be packaged.
const EXIT_UNTRANSLATEABLE: u8 = 101;
/// Exit code when the target interpreter cannot be set up.
const EXIT_INTERPRETER: u8 = 102;

#[derive(Parser)]
#[command(
    name = "duffel",
    author,
    version,
    about = "Resolve Python package requirements into a set of distributions"
)]
struct Args {
    /// Requirement expressions, local archives, or direct archive URLs.
    specs: Vec<String>,

    /// Requirements files to read, in order.
    #[arg(short = 'r', long = "requirement", value_name = "FILE")]
    requirement_files: Vec<PathBuf>,

    /// Additional repositories (directories or flat link pages).
    #[arg(short = 'f', long = "find-links", value_name = "URL|PATH")]
    find_links: Vec<String>,

    /// Package index base URLs; the first replaces the default index, the
    /// rest are extra indexes.
    #[arg(short = 'i', long = "index-url", value_name = "URL")]
    index_urls: Vec<Url>,

    /// Do not consult any package index.
    #[arg(long)]
    no_index: bool,

    /// Use wheels (the default; counters an earlier --no-wheel).
    #[arg(long, overrides_with = "no_wheel")]
    wheel: bool,

    /// Do not use wheels.
    #[arg(long)]
    no_wheel: bool,

    /// Build source distributions when no binary matches (the default).
    #[arg(long, overrides_with = "no_build")]
    build: bool,

    /// Do not build source distributions.
    #[arg(long)]
    no_build: bool,

    /// Directory for the package cache.
    #[arg(long, value_name = "PATH")]
    cache_dir: Option<PathBuf>,

    /// Seconds to trust cached candidates for non-exact requirements.
    #[arg(long, value_name = "SECS")]
    cache_ttl: Option<u64>,

    /// Target interpreter: a path or a name looked up on PATH.
    #[arg(long, default_value = "python3", value_name = "PATH_OR_NAME")]
    python: String,

    /// Target platform string (defaults to the current machine).
    #[arg(long, value_name = "STR")]
    platform: Option<String>,

    /// Crawler worker threads.
    #[arg(long, default_value_t = 1, value_name = "N")]
    workers: usize,

    /// Increase log verbosity (repeatable).
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_env_filter(args.verbose)),
        )
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(failure) => {
            eprintln!("{:?}", failure.report);
            ExitCode::from(failure.code)
        }
    }
}

struct Failure {
    code: u8,
    report: miette::Report,
}

impl Failure {
    fn new(code: u8, report: miette::Report) -> Failure {
        Failure { code, report }
    }
}

impl From<miette::Report> for Failure {
    fn from(report: miette::Report) -> Failure {
        Failure::new(1, report)
    }
}

async fn run(args: Args) -> Result<(), Failure> {
    // The interpreter probe provides both the identity used for tag
    // filtering and the marker snapshot for conditional dependencies.
    let (identity, probed_markers) = match InterpreterIdentity::from_python(&args.python).await {
        Ok(probed) => probed,
        Err(e @ ProbeError::NotFound(_)) if args.python == "python3" => {
            // The default name is a guess; fall back to the other
            // conventional spelling before giving up.
            InterpreterIdentity::from_python("python").await.map_err(|_| {
                Failure::new(EXIT_INTERPRETER, miette::Report::new(e))
            })?
        }
        Err(e) => {
            return Err(Failure::new(
                EXIT_INTERPRETER,
                miette::Report::new(e).wrap_err("failed to set up the target interpreter"),
            ))
        }
    };
    tracing::debug!(
        "resolving for {} {} ({})",
        identity.implementation,
        identity.version.full(),
        identity.abi
    );

    let platform = match &args.platform {
        Some(platform) => Platform::new(platform.clone()),
        None => Platform::current(),
    };
    // When cross-targeting another platform the probed markers describe the
    // wrong machine; derive a snapshot from the identity instead.
    let markers = if args.platform.is_some() {
        identity.marker_snapshot(&platform)
    } else {
        probed_markers
    };

    let mut builder = ResolverOptions::builder();
    builder.workers(args.workers);

    let mut resolvables: Vec<Resolvable> = Vec::new();
    for file in &args.requirement_files {
        let from_file = requirements_from_file(file, &mut builder)
            .into_diagnostic()
            .wrap_err_with(|| format!("failed to read {}", file.display()))?;
        resolvables.extend(from_file);
    }

    for (position, index) in args.index_urls.iter().enumerate() {
        if position == 0 {
            builder.set_index(index.clone());
        } else {
            builder.add_index(index.clone());
        }
    }
    for repository in &args.find_links {
        let link = Link::wrap(repository)
            .into_diagnostic()
            .wrap_err_with(|| format!("invalid repository '{repository}'"))?;
        builder.add_repository(link);
    }
    if args.no_index {
        builder.clear_indices();
    }
    if args.wheel {
        builder.use_wheel();
    }
    if args.no_wheel {
        builder.no_use_wheel();
    }
    if args.build {
        builder.allow_builds();
    }
    if args.no_build {
        builder.no_allow_builds();
    }

    let cache_dir = args.cache_dir.clone().or_else(|| {
        dirs::cache_dir().map(|cache| cache.join("duffel").join("packages"))
    });
    if let Some(cache_dir) = cache_dir {
        tracing::debug!("package cache: {}", cache_dir.display());
        builder.cache_dir(cache_dir);
    }
    if let Some(ttl) = args.cache_ttl {
        builder.cache_ttl(Duration::from_secs(ttl));
    }
    if let Ok(python) = which_python(&args.python) {
        builder.python(python);
    }

    for spec in &args.specs {
        let resolvable = Resolvable::parse(spec)
            .into_diagnostic()
            .wrap_err_with(|| format!("invalid requirement '{spec}'"))?;
        resolvables.push(resolvable);
    }

    let resolver = Resolver::new(builder.build(), identity, platform, markers)
        .map_err(|e| Failure::from(miette::Report::new(e)))?;
    let resolved = match resolver.resolve(resolvables).await {
        Ok(resolved) => resolved,
        Err(e @ ResolveError::Untranslateable { .. }) => {
            return Err(Failure::new(EXIT_UNTRANSLATEABLE, miette::Report::new(e)))
        }
        Err(e) => return Err(Failure::from(miette::Report::new(e))),
    };

    println!("{}:", console::style("Resolved distributions").bold());
    let mut table = tabwriter::TabWriter::new(std::io::stdout());
    writeln!(
        table,
        "{}\t{}\t{}",
        console::style("Name").bold(),
        console::style("Version").bold(),
        console::style("Location").bold()
    )
    .into_diagnostic()?;
    for distribution in resolved
        .iter()
        .sorted_by(|a, b| a.name().cmp(b.name()))
    {
        writeln!(
            table,
            "{}\t{}\t{}",
            distribution.name().as_str(),
            distribution.version(),
            distribution.location().display()
        )
        .into_diagnostic()?;
    }
    table.flush().into_diagnostic()?;

    Ok(())
}

fn which_python(python: &str) -> Result<PathBuf, std::io::Error> {
    let path = PathBuf::from(python);
    if path.components().count() > 1 || path.exists() {
        return Ok(path);
    }
    // A bare name: resolve against PATH the same way the probe did.
    std::env::var_os("PATH")
        .map(|paths| {
            std::env::split_paths(&paths)
                .map(|dir| dir.join(python))
                .find(|candidate| candidate.is_file())
        })
        .flatten()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, python.to_owned()))
}

/// The filter used when RUST_LOG is not set: our own crates get noisier with
/// every `-v`.
fn default_env_filter(verbosity: u8) -> EnvFilter {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let mut filter = EnvFilter::new("warn");
    for target in ["duffel_bin", "duffel_resolver"] {
        filter = filter.add_directive(
            Directive::from_str(&format!("{target}={level}")).expect("static directive parses"),
        );
    }
    filter
}
