//! Segwave command line
//!
//! Usage:
//!   segwave script edits.json   - Run an edit script, print channel summary
//!   segwave stress              - Hammer one signal from several threads
//!   segwave config out.json     - Write the default storage configuration

mod script;

use std::path::{Path, PathBuf};
use std::sync::Barrier;
use std::thread;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use sg_core::{InsertMode, Sample, StorageConfig};
use sg_state::{SignalEditor, UndoManager};
use sg_storage::SignalStore;

#[derive(Parser)]
#[command(name = "segwave", about = "Segmented sample store driver")]
struct Cli {
    /// Storage configuration (JSON), defaults are used if missing
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an edit script against a fresh signal
    Script {
        /// Script file (JSON array of edits)
        file: PathBuf,
        /// Number of channels
        #[arg(long, default_value_t = 2)]
        channels: usize,
        /// Initial length in samples (silence)
        #[arg(long, default_value_t = 0)]
        length: usize,
        /// Undo everything afterwards and check the initial signal is back
        #[arg(long)]
        verify_undo: bool,
        /// Merge small segments before printing the summary
        #[arg(long)]
        defragment: bool,
    },
    /// Concurrent writers and readers on one signal
    Stress {
        /// Writer threads, each owns one region
        #[arg(short, long, default_value_t = 4)]
        threads: usize,
        /// Samples per region
        #[arg(long, default_value_t = 64 * 1024)]
        region: usize,
        /// Overwrites per thread
        #[arg(short, long, default_value_t = 200)]
        rounds: usize,
        /// Number of channels
        #[arg(long, default_value_t = 2)]
        channels: usize,
    },
    /// Write the default configuration
    Config {
        /// Output file
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Script {
            file,
            channels,
            length,
            verify_undo,
            defragment,
        } => run_script(config, &file, channels, length, verify_undo, defragment),
        Commands::Stress {
            threads,
            region,
            rounds,
            channels,
        } => run_stress(config, threads, region, rounds, channels),
        Commands::Config { output } => {
            StorageConfig::default()
                .save_to(&output)
                .with_context(|| format!("writing {}", output.display()))?;
            println!("Wrote {}", output.display());
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<StorageConfig> {
    match path {
        Some(path) => StorageConfig::load_from(path).with_context(|| format!("loading {}", path.display())),
        None => Ok(StorageConfig::default()),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SCRIPT
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Serialize)]
struct ChannelSummary {
    channel: usize,
    length: usize,
    segments: usize,
    checksum: u64,
}

fn checksum(samples: &[Sample]) -> u64 {
    // FNV-1a over the raw sample bytes
    samples
        .iter()
        .flat_map(|s| s.to_le_bytes())
        .fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
            (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
        })
}

fn summarize(signal: &SignalStore) -> Result<Vec<ChannelSummary>> {
    signal
        .channels()
        .enumerate()
        .map(|(index, channel)| -> Result<ChannelSummary> {
            let samples = channel.read_range(0, channel.length())?;
            Ok(ChannelSummary {
                channel: index,
                length: samples.len(),
                segments: channel.segment_count(),
                checksum: checksum(&samples),
            })
        })
        .collect()
}

fn run_script(
    config: StorageConfig,
    file: &Path,
    channels: usize,
    length: usize,
    verify_undo: bool,
    defragment: bool,
) -> Result<()> {
    let text = std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let ops = script::parse(&text)?;

    let mut manager = UndoManager::new(&config.undo);
    let signal = SignalStore::with_channels(channels, length, config)?;
    let initial = summarize(&signal)?;

    let started = Instant::now();
    let mut editor = SignalEditor::new(&signal, &mut manager);
    script::run(&mut editor, &ops)?;
    log::info!("{} edits in {:?}", ops.len(), started.elapsed());

    if defragment {
        let merged = signal.defragment()?;
        log::info!("defragment merged {} segments", merged);
    }
    let summary = summarize(&signal)?;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if verify_undo {
        let mut steps = 0;
        while editor.undo()? {
            steps += 1;
        }
        let restored = summarize(&signal)?;
        for (before, after) in initial.iter().zip(&restored) {
            if before.length != after.length || before.checksum != after.checksum {
                bail!(
                    "channel {} differs after {} undo steps: {} samples, expected {}",
                    before.channel,
                    steps,
                    after.length,
                    before.length
                );
            }
        }
        println!("Undo verified: {} steps restored the initial signal", steps);
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════
// STRESS
// ═══════════════════════════════════════════════════════════════════════════

fn run_stress(config: StorageConfig, threads: usize, region: usize, rounds: usize, channels: usize) -> Result<()> {
    if threads == 0 || region == 0 || channels == 0 {
        bail!("threads, region and channels must be positive");
    }

    let signal = SignalStore::with_channels(channels, threads * region, config)?;
    let selection = signal.all_channels();
    let block_size = signal.config().reader_block_size;
    let barrier = Barrier::new(threads + 2);
    let started = Instant::now();

    let reads = thread::scope(|s| -> Result<usize> {
        let mut workers = Vec::new();
        for t in 0..threads {
            let signal = &signal;
            let selection = &selection;
            let barrier = &barrier;
            workers.push(s.spawn(move || -> Result<()> {
                barrier.wait();
                let base = t * region;
                let block = (region / 4).max(1);
                for round in 0..rounds {
                    let left = base + (round * 131) % (region - block + 1);
                    let mut writer = signal.open_writer(selection, InsertMode::Overwrite, left, left + block - 1)?;
                    writer.write_all(&vec![t as Sample; block])?;
                    writer.close()?;
                }
                // final pass so every region ends up uniform
                let mut writer = signal.open_writer(selection, InsertMode::Overwrite, base, base + region - 1)?;
                writer.write_all(&vec![t as Sample; region])?;
                writer.close()?;
                Ok(())
            }));
        }

        // appends never touch the regions above
        let appender = {
            let signal = &signal;
            let selection = &selection;
            let barrier = &barrier;
            s.spawn(move || -> Result<()> {
                barrier.wait();
                for _ in 0..rounds {
                    let mut writer = signal.open_writer(selection, InsertMode::Append, 0, 0)?;
                    writer.write_all(&[-1; 64])?;
                    writer.close()?;
                }
                Ok(())
            })
        };

        let reader = {
            let signal = &signal;
            let selection = &selection;
            let barrier = &barrier;
            s.spawn(move || -> Result<usize> {
                barrier.wait();
                let mut total = 0;
                for _ in 0..rounds {
                    let mut reader = signal.open_reader(selection, 0, threads * region - 1)?;
                    loop {
                        let (blocks, end) = reader.read(block_size);
                        total += blocks.iter().map(Vec::len).sum::<usize>();
                        if end {
                            break;
                        }
                    }
                }
                Ok(total)
            })
        };

        for worker in workers {
            worker.join().map_err(|_| anyhow::anyhow!("writer thread panicked"))??;
        }
        appender.join().map_err(|_| anyhow::anyhow!("append thread panicked"))??;
        reader.join().map_err(|_| anyhow::anyhow!("reader thread panicked"))?
    })?;

    let expected_length = threads * region + rounds * 64;
    for (c, channel) in signal.channels().enumerate() {
        if channel.length() != expected_length {
            bail!("channel {} has {} samples, expected {}", c, channel.length(), expected_length);
        }
        for t in 0..threads {
            let samples = channel.read_range(t * region, region)?;
            if let Some(pos) = samples.iter().position(|&s| s != t as Sample) {
                bail!("channel {}: sample {} of region {} is {}", c, pos, t, samples[pos]);
            }
        }
    }

    println!(
        "Stress passed: {} writers x {} rounds, {} samples read, {} segments, {:?}",
        threads,
        rounds,
        reads,
        signal.channels().map(|c| c.segment_count()).sum::<usize>(),
        started.elapsed()
    );
    Ok(())
}
