use clap::{Parser, Subcommand};
use cvpress::build::{BuildRequest, Builder, CancelToken};
use cvpress::{config, output, template, watch};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Inputs and outputs shared by every command that runs the pipeline.
#[derive(clap::Args, Clone)]
struct BuildArgs {
    /// YAML files with the CV content, merged in order (default: [build].inputs)
    inputs: Vec<PathBuf>,

    /// Template file, template directory, or theme name
    #[arg(long, short)]
    template: Option<String>,

    /// Output PDF path (default: [build].output)
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// BibTeX file, overriding the `bibliography:` key of the inputs
    #[arg(long)]
    bib: Option<PathBuf>,

    /// Also write the intermediate HTML next to the PDF
    #[arg(long)]
    keep_html: bool,
}

#[derive(Parser)]
#[command(name = "cvpress")]
#[command(about = "Build a styled PDF résumé from YAML, a template, and headless Chrome")]
#[command(long_about = "\
Build a styled PDF résumé from YAML, a template, and headless Chrome

Project structure:

  my-cv/
  ├── cvpress.toml              # Optional settings (run 'cvpress gen-config')
  ├── cv.yaml                   # CV content: header data + sections
  ├── pubs.bib                  # Optional BibTeX file for publication lists
  ├── icons/github.svg          # Assets referenced from cv.yaml
  └── themes/classic/
      ├── templates/cv.html     # Entry template
      ├── templates/sections/   # Named section layouts (layout: compact)
      └── assets/               # Theme assets, available as asset('<id>')

Input files are merged in order: mappings merge key by key, everything else
is replaced by the later file. Keep a base cv.yaml and a short override
per application.

Set CVPRESS_LOG (e.g. CVPRESS_LOG=debug) to control log output.")]
#[command(version)]
struct Cli {
    /// Project directory: holds cvpress.toml, relative config paths resolve here
    #[arg(long, short = 'C', default_value = ".", global = true)]
    dir: PathBuf,

    /// Verbose logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build the PDF once
    Build(BuildArgs),
    /// Build, then rebuild whenever an input, asset or template changes
    Watch(BuildArgs),
    /// Load and resolve everything without rendering
    Check {
        #[command(flatten)]
        args: BuildArgs,
        /// Print the normalized document model as JSON
        #[arg(long)]
        dump: bool,
    },
    /// List themes available from the project directory
    Themes,
    /// Print a stock cvpress.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Build(args) => {
            let config = config::load_config(&cli.dir)?;
            init_thread_pool(&config.processing);
            let request = build_request(&args, &cli.dir, &config);
            let mut builder = Builder::new(config);
            let result = builder.build(&request, &CancelToken::new());
            output::print_build_result(&result);
            if !result.is_success() {
                std::process::exit(1);
            }
        }
        Command::Watch(args) => {
            let config = config::load_config(&cli.dir)?;
            init_thread_pool(&config.processing);
            let request = build_request(&args, &cli.dir, &config);
            let summary = watch::watch(&request, config)?;
            println!(
                "==> Stopped after {} rebuild(s), {} failed",
                summary.builds, summary.failures
            );
        }
        Command::Check { args, dump } => {
            let config = config::load_config(&cli.dir)?;
            init_thread_pool(&config.processing);
            let request = build_request(&args, &cli.dir, &config);
            let builder = Builder::new(config);
            match builder.check(&request) {
                Ok(prepared) if dump => {
                    println!("{}", serde_json::to_string_pretty(&prepared.document)?);
                }
                Ok(prepared) => {
                    output::print_check_output(&prepared);
                    println!("==> Content is valid");
                }
                Err(errors) => {
                    for e in &errors {
                        eprintln!("{e}");
                    }
                    std::process::exit(1);
                }
            }
        }
        Command::Themes => {
            output::print_theme_list(&template::list_themes(&cli.dir));
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// Logs go to stderr, filtered by `CVPRESS_LOG`. `-v` raises the default.
fn init_tracing(verbose: bool) {
    let default = if verbose { "cvpress=debug" } else { "cvpress=info" };
    let filter =
        EnvFilter::try_from_env("CVPRESS_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Initialize the rayon thread pool based on processing config.
///
/// Capped at the number of available CPU cores.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}

/// `[build]` settings from the config, overridden by whatever was given on
/// the command line.
fn build_request(args: &BuildArgs, dir: &Path, config: &config::ProjectConfig) -> BuildRequest {
    let mut request = BuildRequest::from_config(&config.build, dir);
    if !args.inputs.is_empty() {
        request.inputs = args.inputs.clone();
    }
    if let Some(output) = &args.output {
        request.output = output.clone();
    }
    request.template = args.template.clone();
    request.bibliography = args.bib.clone();
    request.keep_html |= args.keep_html;
    request
}
