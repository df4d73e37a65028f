//! CLI entry point for `mailtriage`.

use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use mailtriage::artifact;
use mailtriage::config::{self, Config};
use mailtriage::dataset::DatasetBuilder;
use mailtriage::extract::Extractor;
use mailtriage::infer::{Action, InferenceSummary, Scanner};
use mailtriage::store::mbox::MboxTreeStore;
use mailtriage::train::{self as training, TrainingOutcome};

#[derive(Parser)]
#[command(name = "mailtriage", version, about = "Learn from past mail which messages need action, and flag new ones")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(clap::Args)]
struct IdentityArgs {
    /// Your email address (overrides the config file)
    #[arg(long)]
    email: Option<String>,

    /// Your display name (overrides the config file)
    #[arg(long)]
    name: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Walk a mailbox and write the labelled dataset
    Extract {
        /// MBOX file or Thunderbird-style mail directory
        #[arg(short, long)]
        mailbox: Option<PathBuf>,
        /// Dataset file to write
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Only look at mail received in the last N days
        #[arg(long)]
        days: Option<u32>,
        #[command(flatten)]
        identity: IdentityArgs,
        #[arg(long)]
        json: bool,
    },
    /// Train the urgency model from a dataset
    Train {
        /// Dataset file to read
        #[arg(short, long)]
        dataset: Option<PathBuf>,
        /// Model file to write
        #[arg(short, long)]
        model: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Score unread mail and tag what looks urgent
    Scan {
        /// MBOX file or Thunderbird-style mail directory
        #[arg(long)]
        mailbox: Option<PathBuf>,
        /// Model file to load
        #[arg(short, long)]
        model: Option<PathBuf>,
        /// Score and report without tagging anything
        #[arg(long)]
        dry_run: bool,
        #[command(flatten)]
        identity: IdentityArgs,
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration
    Config {
        /// Write the effective configuration to the config file
        #[arg(long)]
        init: bool,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = config::load_config();

    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    match cli.command {
        Commands::Extract {
            mailbox,
            output,
            days,
            identity,
            json,
        } => {
            apply_identity(&mut config, identity);
            if let Some(days) = days {
                config.extraction.lookback_days = days;
            }
            let mailbox = mailbox_path(mailbox, &config)?;
            let output = output.unwrap_or_else(|| config.paths.dataset.clone());
            cmd_extract(&config, &mailbox, &output, json)
        }
        Commands::Train {
            dataset,
            model,
            json,
        } => {
            let dataset = dataset.unwrap_or_else(|| config.paths.dataset.clone());
            let model = model.unwrap_or_else(|| config.paths.model.clone());
            cmd_train(&config, &dataset, &model, json)
        }
        Commands::Scan {
            mailbox,
            model,
            dry_run,
            identity,
            json,
        } => {
            apply_identity(&mut config, identity);
            let mailbox = mailbox_path(mailbox, &config)?;
            let model = model.unwrap_or_else(|| config.paths.model.clone());
            cmd_scan(&config, &mailbox, &model, dry_run, json)
        }
        Commands::Config { init } => cmd_config(&config, init),
        Commands::Completions { shell } => cmd_completions(shell),
        Commands::Manpage => cmd_manpage(),
    }
}

fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_dir = config::cache_dir(config);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, "mailtriage.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

fn apply_identity(config: &mut Config, args: IdentityArgs) {
    if let Some(email) = args.email {
        config.identity.email = email;
    }
    if let Some(name) = args.name {
        config.identity.display_name = name;
    }
}

fn mailbox_path(arg: Option<PathBuf>, config: &Config) -> anyhow::Result<PathBuf> {
    match arg.or_else(|| config.paths.mailbox.clone()) {
        Some(path) => Ok(path),
        None => anyhow::bail!("No mailbox given: pass --mailbox or set paths.mailbox in the config file"),
    }
}

fn open_store(config: &Config, mailbox: &Path) -> anyhow::Result<MboxTreeStore> {
    if config.identity.email.trim().is_empty() && config.identity.display_name.trim().is_empty() {
        anyhow::bail!("No identity configured: pass --email/--name or set [identity] in the config file");
    }
    Ok(MboxTreeStore::open(mailbox)?.with_directory(&config.identity.directory))
}

fn spinner(template: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template(template)
            .expect("valid template"),
    );
    pb.enable_steady_tick(std::time::Duration::from_millis(120));
    pb
}

fn cmd_extract(config: &Config, mailbox: &Path, output: &Path, json: bool) -> anyhow::Result<()> {
    config.validate()?;
    let store = open_store(config, mailbox)?;
    let extractor = Extractor::new(&config.identity, &config.extraction, &config.labeling);

    let pb = spinner("{spinner:.green} Extracting {msg}");
    let start = Instant::now();
    let extraction = extractor.run(
        &store,
        Some(&|folder: &str, records: usize| {
            pb.set_message(format!("{folder}: {records} record(s)"));
        }),
    )?;
    pb.finish_and_clear();

    let mut builder = DatasetBuilder::new();
    builder.extend(extraction.records);
    let written = builder.write(output)?;
    let elapsed = start.elapsed();

    if json {
        let out = serde_json::json!({
            "mailbox": mailbox.to_string_lossy(),
            "dataset": output.to_string_lossy(),
            "records": written,
            "skipped_items": extraction.skipped_items,
            "failed_folders": extraction.failed_folders,
            "folders": extraction.folders,
            "elapsed_ms": elapsed.as_millis(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!("  {:<40} {:>8} {:>8}", "Folder", "Records", "Skipped");
    println!("  {}", "-".repeat(58));
    for f in &extraction.folders {
        let path: String = f.path.chars().take(39).collect();
        println!("  {:<40} {:>8} {:>8}", path, f.records, f.skipped);
    }
    for f in &extraction.failed_folders {
        println!("  {f:<40} {:>8}", "failed");
    }
    println!();
    println!("  {:<20} {}", "Records", written);
    println!("  {:<20} {}", "Skipped items", extraction.skipped_items);
    println!("  {:<20} {}", "Dataset", output.display());
    println!("  {:<20} {:.2?}", "Time", elapsed);
    println!();
    Ok(())
}

fn cmd_train(config: &Config, dataset: &Path, model_path: &Path, json: bool) -> anyhow::Result<()> {
    config.validate()?;
    let examples = training::load_examples(dataset)?;

    let pb = spinner("{spinner:.green} Training on {msg}");
    pb.set_message(format!("{} row(s)", examples.len()));
    let start = Instant::now();
    let outcome = training::train(&examples, &config.training)?;
    pb.finish_and_clear();

    let size = artifact::save_model(&outcome.model, model_path)?;
    let elapsed = start.elapsed();

    if json {
        let out = serde_json::json!({
            "dataset": dataset.to_string_lossy(),
            "model": model_path.to_string_lossy(),
            "rows": outcome.rows,
            "positives": outcome.positives,
            "features": outcome.model.width(),
            "model_size": size,
            "evaluation": outcome.evaluation,
            "elapsed_ms": elapsed.as_millis(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    print_training_report(&outcome);
    use humansize::{format_size, BINARY};
    println!("  {:<20} {}", "Model", model_path.display());
    println!("  {:<20} {}", "Model size", format_size(size, BINARY));
    println!("  {:<20} {:.2?}", "Time", elapsed);
    println!();
    Ok(())
}

fn print_training_report(outcome: &TrainingOutcome) {
    println!();
    println!("  {:<20} {}", "Rows", outcome.rows);
    println!("  {:<20} {}", "Actioned", outcome.positives);
    println!("  {:<20} {}", "Features", outcome.model.width());
    println!();

    let Some(report) = &outcome.evaluation else {
        println!("  Holdout split was empty, no evaluation.");
        println!();
        return;
    };
    let cm = &report.confusion;
    println!("  Accuracy: {:.2}%", report.accuracy * 100.0);
    println!();
    println!("  Confusion matrix:");
    println!("  {:>14} {:>12} {:>12}", "", "pred Normal", "pred Urgent");
    println!("  {:>14} {:>12} {:>12}", "Normal", cm.true_negative, cm.false_positive);
    println!("  {:>14} {:>12} {:>12}", "Urgent", cm.false_negative, cm.true_positive);
    println!();
    for line in report.to_string().lines() {
        println!("  {line}");
    }
    println!();
}

fn cmd_scan(
    config: &Config,
    mailbox: &Path,
    model_path: &Path,
    dry_run: bool,
    json: bool,
) -> anyhow::Result<()> {
    config.validate()?;
    // Model problems are fatal before any mail is touched
    let model = artifact::load_model(model_path)?;
    let mut store = open_store(config, mailbox)?;
    let scanner = Scanner::new(&model, &config.identity, &config.extraction, &config.inference)?;

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} Scanning [{bar:40.cyan/blue}] {pos}/{len}")
            .expect("valid template")
            .progress_chars("#>-"),
    );
    let summary = scanner.run(
        &mut store,
        dry_run,
        Some(&|done: usize, total: Option<usize>| {
            if let Some(total) = total {
                pb.set_length(total as u64);
            }
            pb.set_position(done as u64);
        }),
    )?;
    pb.finish_and_clear();

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_scan_table(&summary, dry_run);
    }
    Ok(())
}

fn print_scan_table(summary: &InferenceSummary, dry_run: bool) {
    let flagged: Vec<_> = summary
        .decisions
        .iter()
        .filter(|d| d.action != Action::None)
        .collect();

    println!();
    if !flagged.is_empty() {
        println!("  {:<8} {:>6}  {:<60}", "Action", "Score", "Subject");
        println!("  {}", "-".repeat(76));
        for d in &flagged {
            let action = match d.action {
                Action::Urgent => "urgent",
                Action::Review => "review",
                Action::None => "",
            };
            let subject: String = d.subject.chars().take(59).collect();
            println!("  {:<8} {:>6.3}  {:<60}", action, d.probability, subject);
        }
        println!();
    }
    println!("  {:<20} {}", "Scanned", summary.scanned);
    println!("  {:<20} {}", "Urgent", summary.urgent);
    println!("  {:<20} {}", "Review", summary.review);
    println!("  {:<20} {}", "Skipped (not mail)", summary.skipped_non_mail);
    println!("  {:<20} {}", "Failed", summary.failed);
    if dry_run {
        println!();
        println!("  Dry run: no tags were written.");
    }
    println!();
}

fn cmd_config(config: &Config, init: bool) -> anyhow::Result<()> {
    if init {
        config::save_config(config)?;
    }
    if let Some(path) = config::config_file_path() {
        println!("# config file: {}", path.display());
    }
    println!("# log file: {}", config::log_file_path(config).display());
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "mailtriage", &mut std::io::stdout());
    Ok(())
}

fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}
