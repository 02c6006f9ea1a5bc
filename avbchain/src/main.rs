use std::path::PathBuf;

use anyhow::{Context, Result};
use avbchain::{cmd, config::Config, ctx::AppContext};
use clap::*;
use colored::Colorize;
use log::LevelFilter;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file, `./avbchain.toml` is used when present
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// More output, repeat for more
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: SubCommands,
}

#[derive(Subcommand)]
enum SubCommands {
    /// Extract firmware images into one directory per partition
    Unpack(UnpackArgs),
    /// Repack and re-sign extracted partitions
    Pack(PackArgs),
}

#[derive(Args, Debug)]
struct UnpackArgs {
    /// Directory with vbmeta*.img, super.img.* and the other images
    #[arg(short, long)]
    input: PathBuf,
    /// Directory to extract into
    #[arg(short, long)]
    output: PathBuf,
}

#[derive(Args, Debug)]
struct PackArgs {
    /// Directory created by `unpack`
    #[arg(short, long)]
    input: PathBuf,
    /// Directory for the signed images
    #[arg(short, long)]
    output: PathBuf,
    /// Private key to sign with
    #[arg(short, long)]
    key: PathBuf,
}

fn log_level(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(log_level(cli.verbose))
        .parse_default_env()
        .format_timestamp(None)
        .init();

    let config = Config::discover(cli.config.as_deref()).context("failed to load config")?;
    let ctx = AppContext::new(config);
    let version = ctx.check_codec()?;
    log::debug!("Using avbroot {version}");

    match cli.command {
        SubCommands::Unpack(args) => {
            let summary = cmd::unpack(&ctx, &args.input, &args.output)
                .with_context(|| format!("failed to unpack {}", args.input.display()))?;
            println!(
                "Unpacked {} partitions into {}",
                summary.len(),
                args.output.display()
            );
        }
        SubCommands::Pack(args) => {
            let summary = cmd::pack(&ctx, &args.input, &args.output, &args.key)
                .with_context(|| format!("failed to pack {}", args.input.display()))?;
            println!(
                "Packed {} partitions into {}",
                summary.order.len(),
                args.output.display()
            );
        }
    }

    println!("{}", "Done!".green().bold());
    Ok(())
}
