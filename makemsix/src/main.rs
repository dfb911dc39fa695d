use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use msix::{unpack_package, ValidationOptions};

#[derive(Parser, Clone, Debug)]
struct UnpackOptions {
    /// Input package filepath
    #[arg(short, long)]
    package: PathBuf,

    /// Output directory path
    #[arg(short, long)]
    directory: PathBuf,

    /// Skips manifest validation. By default manifest validation is enabled.
    #[arg(long = "mv")]
    skip_manifest_validation: bool,

    /// Skips signature validation. By default signature validation is enabled.
    #[arg(long = "sv")]
    allow_unknown_signature_origin: bool,

    /// Skips enforcement of signed packages. By default packages must be signed.
    #[arg(long = "ss")]
    skip_signature_enforcement: bool,
}

#[derive(Subcommand, Clone, Debug)]
enum Commands {
    /// Unpack files from a package to disk
    Unpack(UnpackOptions),
}

#[derive(Parser, Debug)]
#[command(version, about = "Unpack MSIX/AppX app packages", arg_required_else_help = true)]
struct Opts {
    #[command(subcommand)]
    cmd: Commands,

    #[arg(long, short)]
    verbose: bool,
}

fn main() -> ExitCode {
    let opts: Opts = Opts::parse();

    let level = if opts.verbose {
        log::Level::Debug
    } else {
        log::Level::Info
    };
    if simple_logger::init_with_level(level).is_err() {
        eprintln!("failed to initialize logging");
        return ExitCode::FAILURE;
    }

    match opts.cmd {
        Commands::Unpack(args) => {
            let options = ValidationOptions {
                skip_manifest_validation: args.skip_manifest_validation,
                allow_unknown_signature_origin: args.allow_unknown_signature_origin,
                skip_signature_enforcement: args.skip_signature_enforcement,
                ..Default::default()
            };

            match unpack_package(&args.package, &args.directory, options) {
                Ok(()) => {
                    log::info!("unpacked {:?} to {:?}", args.package, args.directory);
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    log::error!("{e}");
                    ExitCode::from(e.code() as u8)
                }
            }
        }
    }
}
