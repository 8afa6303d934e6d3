//! songwalker: compile, analyze, render and play `.sw` scores.

use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use songwalker::audio::AudioEngine;
use songwalker::config::WalkerConfig;
use songwalker::dsl::Compiler;
use songwalker::loader::{compile_file, read_source, LoadedSong};
use songwalker::preset::PresetCatalog;
use songwalker::walker::SongWalker;

#[derive(Parser)]
#[command(name = "songwalker")]
#[command(about = "Score compiler and track-walking player", version, long_about = None)]
struct Cli {
    /// Config file (default: ~/.songwalker/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Tempo of the root track, overriding the config
    #[arg(long, global = true)]
    bpm: Option<f64>,

    /// Sample rate in Hz, overriding the config
    #[arg(long, global = true)]
    sample_rate: Option<u32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the token stream as JSON
    Tokens { file: PathBuf },

    /// Print the generated listing
    Compile { file: PathBuf },

    /// Walk the song without audio and report its length
    Analyze { file: PathBuf },

    /// Render the song to a WAV file
    Render {
        file: PathBuf,

        /// Output WAV file path
        #[arg(short, long, default_value = "out.wav")]
        output: PathBuf,
    },

    /// Play the song on the default output device (Ctrl-C stops)
    Play { file: PathBuf },
}

fn load_config(cli: &Cli) -> Result<WalkerConfig> {
    let config = match &cli.config {
        Some(path) => WalkerConfig::load_from(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => WalkerConfig::load_or_default(),
    };
    config
        .with_overrides(cli.bpm, cli.sample_rate)
        .context("invalid command-line override")
}

fn load_song(path: &Path) -> Result<LoadedSong> {
    compile_file(path).with_context(|| format!("compiling {}", path.display()))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let catalog = PresetCatalog::with_builtin();

    match &cli.command {
        Commands::Tokens { file } => {
            let source = read_source(file)?;
            let tokens = Compiler::tokenize(&source);
            println!("{}", serde_json::to_string_pretty(&tokens)?);
        }
        Commands::Compile { file } => {
            let loaded = load_song(file)?;
            println!("{}", loaded.song.listing);
        }
        Commands::Analyze { file } => {
            let loaded = load_song(file)?;
            let walker = SongWalker::new(&catalog, config);
            let report = walker
                .analyze(&loaded.song)
                .with_context(|| format!("analyzing {}", loaded.name()))?;
            println!("duration: {:.3}s", report.duration);
            println!("root position: {:.3} beats", report.root_position);
            println!("tracks: {}", report.tracks);
            println!("commands: {}", report.commands);
        }
        Commands::Render { file, output } => {
            let loaded = load_song(file)?;
            let walker = SongWalker::new(&catalog, config);
            let rendered = walker
                .render(&loaded.song)
                .with_context(|| format!("rendering {}", loaded.name()))?;
            rendered
                .write_wav(output)
                .with_context(|| format!("writing {}", output.display()))?;
            println!(
                "wrote {} ({:.2}s, {} Hz)",
                output.display(),
                rendered.seconds(),
                rendered.sample_rate
            );
        }
        Commands::Play { file } => {
            let loaded = load_song(file)?;
            let engine = AudioEngine::with_config(config.sample_rate, config.channels)
                .context("starting audio engine")?;
            engine.set_volume(config.volume)?;
            let volume = config.volume;
            let walker = SongWalker::new(&catalog, config);

            let stop = walker.stop_handle();
            ctrlc::set_handler(move || stop.stop()).context("installing Ctrl-C handler")?;

            log::info!("playing {} at volume {volume}", loaded.name());
            let report = walker
                .play(&loaded.song, Rc::new(engine))
                .with_context(|| format!("playing {}", loaded.name()))?;
            if report.stopped {
                println!("stopped.");
            } else {
                println!("done ({:.2}s).", report.duration);
            }
        }
    }
    Ok(())
}
