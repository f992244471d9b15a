use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use midi2nes::pipeline::{compile, CompileRequest, MapperChoice};
use midi2nes::song_bank::{SongBank, SongMetadata};
use midi2nes::{CompileConfig, CompileContext};

/// Compile a MIDI file into a playable NES ROM.
#[derive(Parser, Debug)]
#[command(name = "midi2nes", version, about, long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Input MIDI file
    input: Option<PathBuf>,

    /// Output NES ROM (default: input with a .nes extension)
    output: Option<PathBuf>,

    /// Disable pattern detection and compression
    #[arg(long)]
    no_patterns: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Compile configuration (JSON)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Keep the generated assembler project in this directory
    #[arg(long, value_name = "DIR")]
    project_dir: Option<PathBuf>,

    /// Write the project but do not run ca65/ld65
    #[arg(long)]
    prepare_only: bool,

    /// Write the pattern archive as JSON
    #[arg(long, value_name = "FILE")]
    patterns: Option<PathBuf>,

    /// Also export FamiTracker-style text
    #[arg(long, value_name = "FILE")]
    famistudio: Option<PathBuf>,

    /// Also export an NSF rendition
    #[arg(long, value_name = "FILE")]
    nsf: Option<PathBuf>,

    /// DPCM sample index (JSON); the built-in kit applies otherwise
    #[arg(long, value_name = "FILE")]
    dpcm_index: Option<PathBuf>,

    /// Cartridge mapper
    #[arg(long, value_enum, default_value = "mmc1")]
    mapper: MapperArg,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum MapperArg {
    Mmc1,
    Nrom,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add a song to a song bank
    SongAdd {
        /// Input MIDI file
        input: PathBuf,
        /// Song bank file (created when absent)
        #[arg(long, default_value = "song_bank.json")]
        bank: PathBuf,
        /// Song title
        #[arg(long)]
        name: String,
        #[arg(long)]
        composer: Option<String>,
        /// Loop start frame
        #[arg(long)]
        loop_point: Option<u32>,
        /// Comma-separated tags
        #[arg(long)]
        tags: Option<String>,
        /// Base tempo in BPM
        #[arg(long)]
        tempo: Option<u32>,
    },
    /// List songs in a song bank
    SongList {
        #[arg(long, default_value = "song_bank.json")]
        bank: PathBuf,
    },
    /// Remove a song from a song bank
    SongRemove {
        /// Song title
        name: String,
        #[arg(long, default_value = "song_bank.json")]
        bank: PathBuf,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();

    let filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Some(command) => run_song_command(command),
        None => run_compile(args),
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<CompileConfig, ExitCode> {
    match path {
        Some(path) => CompileConfig::load(path).map_err(|e| {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }),
        None => Ok(CompileConfig::default()),
    }
}

fn run_compile(args: Args) -> ExitCode {
    let Some(input) = args.input else {
        eprintln!("error: an input MIDI file is required");
        return ExitCode::FAILURE;
    };
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| input.with_extension("nes"));

    let mut config = match load_config(args.config.as_ref()) {
        Ok(config) => config,
        Err(code) => return code,
    };
    config.use_patterns = config.use_patterns && !args.no_patterns;
    if args.dpcm_index.is_some() {
        config.dpcm_index = args.dpcm_index.clone();
    }
    let mut ctx = CompileContext::new(config);

    let request = CompileRequest {
        input,
        output,
        project_dir: args.project_dir,
        prepare_only: args.prepare_only,
        patterns_out: args.patterns,
        famistudio_out: args.famistudio,
        nsf_out: args.nsf,
        mapper: match args.mapper {
            MapperArg::Mmc1 => MapperChoice::Mmc1,
            MapperArg::Nrom => MapperChoice::Nrom,
        },
    };

    match compile(&request, &mut ctx) {
        Ok(outcome) => {
            eprint!("{}", ctx.diagnostics);
            if let Some(rom) = &outcome.rom_path {
                eprintln!(
                    "wrote {} ({} frames, {} patterns, ratio {:.2}, {} loops)",
                    rom.display(),
                    outcome.total_frames,
                    outcome.unique_patterns,
                    outcome.compression_ratio,
                    outcome.loop_count,
                );
            } else {
                eprintln!("prepared project at {}", outcome.project_dir.display());
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprint!("{}", ctx.diagnostics);
            eprintln!("error: {e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

fn run_song_command(command: Command) -> ExitCode {
    let result: anyhow::Result<()> = match command {
        Command::SongAdd {
            input,
            bank,
            name,
            composer,
            loop_point,
            tags,
            tempo,
        } => (|| {
            let mut songs = if bank.exists() {
                SongBank::import_bank(&bank)?
            } else {
                SongBank::new()
            };
            let metadata = SongMetadata {
                composer,
                loop_point,
                tags: tags
                    .map(|t| t.split(',').map(|s| s.trim().to_string()).collect())
                    .unwrap_or_default(),
                tempo_base: tempo,
            };
            let entry =
                songs.add_song_from_midi(&input, &name, metadata, &CompileConfig::default())?;
            println!(
                "added '{name}' to {} ({} frames, {} bytes)",
                entry.bank, entry.total_frames, entry.data_bytes
            );
            songs.export_bank(&bank)?;
            println!("song bank saved: {}", bank.display());
            Ok(())
        })(),
        Command::SongList { bank } => (|| {
            let songs = SongBank::import_bank(&bank)?;
            if songs.songs.is_empty() {
                println!("song bank is empty");
            }
            for (name, entry) in &songs.songs {
                println!("{name}  [{}]  {} frames", entry.bank, entry.total_frames);
                if let Some(composer) = &entry.metadata.composer {
                    println!("  composer: {composer}");
                }
                if !entry.metadata.tags.is_empty() {
                    println!("  tags: {}", entry.metadata.tags.join(", "));
                }
                if let Some(loop_point) = entry.metadata.loop_point {
                    println!("  loop point: {loop_point}");
                }
            }
            Ok(())
        })(),
        Command::SongRemove { name, bank } => (|| {
            let mut songs = SongBank::import_bank(&bank)?;
            songs.remove_song(&name)?;
            songs.export_bank(&bank)?;
            println!("removed '{name}' from {}", bank.display());
            Ok(())
        })(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
