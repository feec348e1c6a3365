use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use owo_colors::{OwoColorize, Style};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use costpie_resilience::boundary::{
    BoundaryBuilder, BoundaryEvent, ErrorBoundary, FallbackView, Rendered, Subtree,
};
use costpie_resilience::error::{
    classify, error_title, format_message, suggested_action, Failure,
};
use costpie_resilience::error_log::{self, Environment, ErrorLogger, LoggerConfig};
use costpie_resilience::logging::{init_logging, LoggingConfig};
use costpie_resilience::navigation::{NavigateOptions, Navigator};
use costpie_resilience::retry::{next_delay_with, DEFAULT_MAX_DELAY};

#[derive(Parser, Debug)]
#[command(name = "costpie-errors")]
#[command(version)]
#[command(about = "Explore CostPie error classification, backoff and recovery")]
struct Cli {
    /// Disable colors (also respects NO_COLOR environment variable)
    #[arg(long, global = true)]
    no_color: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Error logger configuration file (TOML)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Classify a failure and show how it would be presented
    Classify {
        /// HTTP status returned by the server
        #[arg(long, conflicts_with_all = ["exception", "code", "text"])]
        status: Option<u16>,

        /// Exception name, e.g. TimeoutError
        #[arg(long, conflicts_with_all = ["code", "text"])]
        exception: Option<String>,

        /// Cloud provider error code, e.g. AWS.AccessDenied
        #[arg(long, conflicts_with = "text")]
        code: Option<String>,

        /// Message carried by the failure
        #[arg(long, short)]
        message: Option<String>,

        /// A bare error string
        #[arg(long)]
        text: Option<String>,

        /// Print the error record as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the retry delay schedule
    Backoff {
        /// Number of attempts to show
        #[arg(long, default_value = "6")]
        attempts: u32,

        /// Base delay in milliseconds
        #[arg(long, default_value = "1000")]
        base_ms: u64,

        /// Delay cap in milliseconds
        #[arg(long, default_value_t = DEFAULT_MAX_DELAY.as_millis() as u64)]
        max_ms: u64,

        /// Seed the jitter for a reproducible schedule
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Run a failing view under a supervision boundary
    Simulate {
        /// Kind of failure the view raises
        #[arg(long, short, default_value = "server", value_enum)]
        error: SimulatedError,

        /// How many renders fail before the view recovers
        #[arg(long, default_value = "1")]
        fail_times: u32,

        /// Retries allowed by the boundary
        #[arg(long, default_value = "3")]
        max_retries: u32,

        /// Base retry delay in milliseconds
        #[arg(long, default_value = "1000")]
        base_ms: u64,

        /// Delay before the sign-in redirect in milliseconds
        #[arg(long, default_value = "3000")]
        redirect_ms: u64,

        /// Start retries automatically instead of one per prompt
        #[arg(long)]
        auto: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SimulatedError {
    Server,
    Network,
    Timeout,
    Auth,
    NotFound,
    RateLimit,
    Provider,
    Panic,
}

impl SimulatedError {
    fn failure(self) -> Failure {
        match self {
            SimulatedError::Server => Failure::status(500),
            SimulatedError::Network => Failure::exception("TypeError", "Network request failed"),
            SimulatedError::Timeout => Failure::exception("TimeoutError", "Request timed out"),
            SimulatedError::Auth => Failure::status(401),
            SimulatedError::NotFound => Failure::status(404),
            SimulatedError::RateLimit => Failure::status(429),
            SimulatedError::Provider => Failure::coded("AWS.Throttling", None),
            SimulatedError::Panic => Failure::exception("Panic", "cost chart failed to render"),
        }
    }
}

struct Palette {
    color: bool,
}

impl Palette {
    fn paint(&self, text: &str, style: Style) -> String {
        if self.color {
            text.style(style).to_string()
        } else {
            text.to_string()
        }
    }

    fn heading(&self, text: &str) -> String {
        self.paint(text, Style::new().bold())
    }

    fn bad(&self, text: &str) -> String {
        self.paint(text, Style::new().red().bold())
    }

    fn warn(&self, text: &str) -> String {
        self.paint(text, Style::new().yellow())
    }

    fn good(&self, text: &str) -> String {
        self.paint(text, Style::new().green().bold())
    }
}

/// Prints navigation requests instead of changing routes.
struct PrintNavigator {
    palette: Arc<Palette>,
}

impl Navigator for PrintNavigator {
    fn navigate(&self, path: &str, options: NavigateOptions) {
        let mode = if options.replace { "replace" } else { "push" };
        println!("{} {} ({})", self.palette.warn("navigate ->"), path, mode);
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let color = !cli.no_color && std::env::var_os("NO_COLOR").is_none();
    init_logging(LoggingConfig::from_verbosity(cli.verbose).with_ansi(color))?;
    let palette = Arc::new(Palette { color });

    let config = match &cli.config {
        Some(path) => LoggerConfig::load(path)?,
        None => LoggerConfig::for_environment(Environment::current()),
    };
    let logger = error_log::install_global(ErrorLogger::from_config(config)?)?;

    match cli.command {
        Commands::Classify {
            status,
            exception,
            code,
            message,
            text,
            json,
        } => {
            let failure = match (status, exception, code, text) {
                (Some(status), ..) => match message {
                    Some(message) => Failure::http(status, message),
                    None => Failure::status(status),
                },
                (_, Some(name), ..) => Failure::exception(name, message.unwrap_or_default()),
                (_, _, Some(code), _) => Failure::coded(code, message),
                (_, _, _, Some(text)) => Failure::Text(text),
                _ => match message {
                    Some(message) => Failure::Text(message),
                    None => Failure::Unknown,
                },
            };
            run_classify(failure, json, &palette)
        }
        Commands::Backoff {
            attempts,
            base_ms,
            max_ms,
            seed,
        } => {
            run_backoff(attempts, base_ms, max_ms, seed, &palette);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Simulate {
            error,
            fail_times,
            max_retries,
            base_ms,
            redirect_ms,
            auto,
        } => {
            let options = SimulateOptions {
                error,
                fail_times,
                max_retries,
                base_delay: Duration::from_millis(base_ms),
                redirect_delay: Duration::from_millis(redirect_ms),
                auto,
            };
            Ok(run_simulate(options, logger, palette).await)
        }
    }
}

fn run_classify(
    failure: Failure,
    json: bool,
    palette: &Palette,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let record = classify(failure, None);

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(ExitCode::SUCCESS);
    }

    println!("{}", palette.heading(error_title(&record)));
    println!("  kind:      {}", record.kind);
    if let Some(status) = record.status_code {
        println!("  status:    {}", status);
    }
    println!("  retryable: {}", record.retryable);
    println!("  message:   {}", record.message);
    println!("  shown as:  {}", format_message(&record));
    println!("  action:    {}", suggested_action(&record));
    for (key, value) in &record.context {
        println!("  {}: {}", key, value);
    }
    Ok(ExitCode::SUCCESS)
}

fn run_backoff(attempts: u32, base_ms: u64, max_ms: u64, seed: Option<u64>, palette: &Palette) {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let base = Duration::from_millis(base_ms);
    let cap = Duration::from_millis(max_ms);

    println!("{}", palette.heading("attempt  delay_ms"));
    for attempt in 0..attempts {
        let delay = next_delay_with(attempt, base, cap, &mut rng);
        println!("{:>7}  {:>8}", attempt, delay.as_millis());
    }
}

struct SimulateOptions {
    error: SimulatedError,
    fail_times: u32,
    max_retries: u32,
    base_delay: Duration,
    redirect_delay: Duration,
    auto: bool,
}

async fn run_simulate(
    options: SimulateOptions,
    logger: Arc<ErrorLogger>,
    palette: Arc<Palette>,
) -> ExitCode {
    let mut renders = 0u32;
    let fail_times = options.fail_times;
    let error = options.error;
    let view = move || {
        renders += 1;
        if renders <= fail_times {
            if let SimulatedError::Panic = error {
                panic!("cost chart failed to render");
            }
            return Err(error.failure());
        }
        Ok(format!("Cost chart rendered after {} attempt(s)", renders))
    };

    let mut boundary = BoundaryBuilder::new()
        .name("CostChart")
        .max_retries(options.max_retries)
        .base_delay(options.base_delay)
        .redirect_delay(options.redirect_delay)
        .auto_retry(options.auto)
        .logger(logger)
        .navigator(Arc::new(PrintNavigator {
            palette: Arc::clone(&palette),
        }))
        .build(view);

    let recovered = loop {
        match boundary.render() {
            Rendered::Content(text) | Rendered::Custom(text) => {
                println!("{}", palette.good(&text));
                break true;
            }
            Rendered::Fallback(view) => {
                print_fallback(&view, &palette);
                if view.exhausted {
                    drain_events(&mut boundary, &palette).await;
                    break false;
                }
                if !boundary.state().is_retrying() && !boundary.retry() {
                    break false;
                }
                drain_events(&mut boundary, &palette).await;
            }
        }
    };

    let history: Vec<String> = boundary
        .transitions()
        .iter()
        .map(|tag| tag.to_string())
        .collect();
    println!("transitions: {}", history.join(" -> "));

    if recovered {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}

async fn drain_events<S: Subtree>(boundary: &mut ErrorBoundary<S>, palette: &Palette) {
    while let Some(event) = boundary.next_event().await {
        match event {
            BoundaryEvent::Countdown { remaining_secs } if remaining_secs > 0 => {
                let plural = if remaining_secs == 1 { "" } else { "s" };
                println!("  Retrying in {} second{}...", remaining_secs, plural);
            }
            BoundaryEvent::Countdown { .. } => {}
            BoundaryEvent::Resumed { attempt } => {
                println!("  {} (attempt {})", palette.warn("retrying"), attempt);
                return;
            }
            BoundaryEvent::Redirected { path } => {
                println!("  redirected to {}", path);
            }
        }
    }
}

fn print_fallback(view: &FallbackView, palette: &Palette) {
    let mut lines = view.to_string().lines().map(str::to_string).collect::<Vec<_>>();
    if let Some(title) = lines.first_mut() {
        *title = palette.bad(title);
    }
    for line in lines {
        println!("{}", line);
    }
}
