pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

use commands::apply::ApplyArgs;
use commands::coupon::{CreateArgs, UpdateArgs};
use commands::generate::CodeArgs;
use commands::list::ListArgs;

#[derive(Debug, Parser)]
#[command(
    name = "couponkit",
    about = "Coupon engine operator CLI",
    long_about = "Manage coupons, generate codes, and apply them to carts against the configured store.",
    after_help = "Examples:\n  couponkit migrate\n  couponkit seed\n  couponkit generate --prefix SPRING --count 5\n  couponkit apply SAVE20 --user seed-user-new --subtotal 100"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the demo coupons and accounts")]
    Seed {
        #[arg(long, help = "Remove previously seeded rows before loading")]
        reset: bool,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Generate unique coupon codes")]
    Generate {
        #[command(flatten)]
        options: CodeArgs,
        #[arg(long, default_value_t = 1)]
        count: u32,
    },
    #[command(about = "Check the trailing checksum of a generated code")]
    Verify {
        code: String,
        #[command(flatten)]
        options: CodeArgs,
    },
    #[command(about = "Create a coupon")]
    Create(CreateArgs),
    #[command(about = "Update fields of an existing coupon")]
    Update(UpdateArgs),
    #[command(about = "Delete a coupon; saved copies are kept")]
    Delete { id: String },
    #[command(about = "Show a coupon by id or code")]
    Show { key: String },
    #[command(about = "List coupons newest first, one page at a time")]
    List(ListArgs),
    #[command(about = "Validate a code against a cart and consume one use")]
    Apply(ApplyArgs),
    #[command(about = "Save a coupon to a user's wallet")]
    Save { user: String, coupon_id: String },
    #[command(about = "List coupons saved by a user")]
    Saved { user: String },
    #[command(about = "List coupons a user currently qualifies for")]
    Available { user: String },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed { reset } => commands::seed::run(reset),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Generate { options, count } => commands::generate::run(options, count),
        Command::Verify { code, options } => commands::generate::verify(&code, &options),
        Command::Create(args) => commands::coupon::create(args),
        Command::Update(args) => commands::coupon::update(args),
        Command::Delete { id } => commands::coupon::delete(id),
        Command::Show { key } => commands::coupon::show(key),
        Command::List(args) => commands::list::run(args),
        Command::Apply(args) => commands::apply::run(args),
        Command::Save { user, coupon_id } => commands::saved::save(user, coupon_id),
        Command::Saved { user } => commands::saved::saved(user),
        Command::Available { user } => commands::saved::available(user),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

/// Sends logs to stderr so stdout stays a single JSON payload.
pub fn init_logging() -> anyhow::Result<()> {
    use anyhow::Context;
    use couponkit_core::config::{AppConfig, LoadOptions, LogFormat};
    use tracing::Level;

    let config =
        AppConfig::load(LoadOptions::default()).context("loading logging configuration")?;
    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);
    let installed = match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|error| anyhow::anyhow!(error)).context("installing tracing subscriber")
}
