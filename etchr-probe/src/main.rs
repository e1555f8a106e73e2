use anyhow::{Context, Result, anyhow};
use clap::{ArgAction, Parser, Subcommand};
use console::style;
use etchr_model::formats::{self, Category};
use etchr_model::{FlashStage, ImageMetadata, Snapshot, Store, SupportedFormats, inspect};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::{BufRead, BufReader, stdin};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "etchr-probe")]
#[command(about = "Checks disk images and replays recorded flash actions", version)]
struct Cli {
    /// Increase log verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Load the supported format registry from a JSON file
    #[arg(long, value_name = "FILE", global = true)]
    formats: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether files are flashable images
    Check {
        /// Image files to check
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// List the supported file extensions
    Formats,
    /// Replay a JSON-lines file of store actions ("-" reads stdin)
    Replay {
        #[arg(required = true)]
        actions: PathBuf,
    },
}

fn load_formats(path: Option<&Path>) -> Result<SupportedFormats> {
    match path {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let registry = SupportedFormats::from_json(&json)
                .with_context(|| format!("Invalid format registry in {}", path.display()))?;
            log::info!(
                "Loaded {} file types from {}",
                registry.file_types().len(),
                path.display()
            );
            Ok(registry)
        }
        None => Ok(SupportedFormats::default()),
    }
}

/// Prints the verdict for one image. Returns whether it is supported.
fn check_image(path: &Path, registry: &SupportedFormats) -> bool {
    // Fall back to the path alone so an unreadable file can still be classified.
    let (image, scanned) = match inspect::inspect_with(path, registry) {
        Ok(image) => (image, true),
        Err(e) => {
            log::warn!("Could not inspect {}: {}", path.display(), e);
            (ImageMetadata::from_path(path), false)
        }
    };

    if !registry.is_supported_image(&image) {
        println!(
            "{} {}",
            style("UNSUPPORTED").red().bold(),
            style(path.display()).cyan()
        );
        return false;
    }

    match image.size {
        Some(size) => println!(
            "{} {} ({:.1} MB)",
            style("SUPPORTED").green().bold(),
            style(path.display()).cyan(),
            size as f64 / (1024.0 * 1024.0)
        ),
        None => println!(
            "{} {}",
            style("SUPPORTED").green().bold(),
            style(path.display()).cyan()
        ),
    }

    if formats::looks_like_windows_image(&image) {
        println!(
            "  {} This looks like a Windows image. A raw write usually won't make it bootable.",
            style("WARNING:").yellow().bold()
        );
    }

    if formats::missing_partition_table(&image) {
        let reason = if scanned {
            "No partition table found. The image may not boot."
        } else {
            "The image could not be scanned for a partition table."
        };
        println!("  {} {}", style("WARNING:").yellow().bold(), reason);
    } else if let Some(mbr) = &image.mbr {
        println!("  Disk signature: 0x{:08x}", mbr.disk_signature);
        for partition in &mbr.partitions {
            println!("  {}", partition);
        }
    }

    true
}

/// Renders store snapshots as one progress bar per flash stage.
#[derive(Default)]
struct ProgressView {
    bar: Option<ProgressBar>,
    stage: Option<FlashStage>,
}

impl ProgressView {
    fn start_stage(&mut self, stage: FlashStage) -> Result<()> {
        if let Some(bar) = self.bar.take() {
            bar.finish_with_message("Complete.");
        }

        let (prefix, color) = match stage {
            FlashStage::Write => ("Writing", "green"),
            FlashStage::Check => ("Verifying", "magenta"),
        };
        let bar = ProgressBar::new(100);
        bar.set_prefix(prefix);
        bar.set_style(
            ProgressStyle::default_bar()
                .template(&format!(
                    "{{prefix:12}} [{{elapsed_precise}}] [{{bar:40.{}/black}}] {{pos:>3}}% {{msg}}",
                    color
                ))?
                .progress_chars("■ "),
        );

        self.bar = Some(bar);
        self.stage = Some(stage);
        Ok(())
    }

    fn render(&mut self, snapshot: &Snapshot) -> Result<()> {
        match &snapshot.flash_state {
            Some(state) => {
                if self.stage != Some(state.stage) {
                    self.start_stage(state.stage)?;
                }
                if let Some(bar) = &self.bar {
                    bar.set_position(state.percentage.round() as u64);
                    match (state.speed, state.eta) {
                        (Some(speed), Some(eta)) => {
                            bar.set_message(format!("{:.2} MB/s, {}s left", speed, eta))
                        }
                        (Some(speed), None) => bar.set_message(format!("{:.2} MB/s", speed)),
                        _ => {}
                    }
                }
            }
            None if !snapshot.is_flashing => {
                if let Some(bar) = self.bar.take() {
                    let message = match &snapshot.flash_results {
                        Some(results) if results.cancelled => "Cancelled.".to_string(),
                        Some(results) => match &results.error_code {
                            Some(code) => format!("❌ Failed ({}).", code),
                            None => "Complete.".to_string(),
                        },
                        None => "Reset.".to_string(),
                    };
                    bar.finish_with_message(message);
                }
                self.stage = None;
            }
            None => {}
        }
        Ok(())
    }

    fn abandon(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.abandon_with_message("❌ Replay failed.");
        }
    }
}

fn replay(actions: &Path) -> Result<()> {
    let reader: Box<dyn BufRead> = if actions == Path::new("-") {
        Box::new(stdin().lock())
    } else {
        let file = File::open(actions)
            .with_context(|| format!("Failed to open {}", actions.display()))?;
        Box::new(BufReader::new(file))
    };

    let store = Store::new();
    let dispatched = replay_lines(reader, &store)?;
    log::info!("Replayed {} actions", dispatched);

    println!("{}", serde_json::to_string_pretty(&*store.state())?);
    Ok(())
}

/// Dispatches every action line into `store`, skipping blank and `#` lines.
/// Stops at the first rejected action. Returns how many actions were applied.
fn replay_lines(reader: impl BufRead, store: &Store) -> Result<usize> {
    let mut view = ProgressView::default();
    let mut dispatched = 0usize;

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match store.dispatch_json(line) {
            Ok(snapshot) => {
                dispatched += 1;
                view.render(&snapshot)?;
            }
            Err(e) => {
                view.abandon();
                return Err(anyhow!("Line {}: {}", index + 1, e));
            }
        }
    }

    if let Some(bar) = view.bar.take() {
        bar.finish();
    }
    Ok(dispatched)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG still wins over -v when it is set.
    let default_filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let registry = load_formats(cli.formats.as_deref())?;

    match cli.command {
        Commands::Check { images } => {
            let unsupported = images
                .iter()
                .filter(|image| !check_image(image, &registry))
                .count();
            if unsupported > 0 {
                return Err(anyhow!(
                    "{} of {} files are not supported images",
                    unsupported,
                    images.len()
                ));
            }
        }
        Commands::Formats => {
            println!("Supported formats:");
            for category in Category::ALL {
                println!(
                    "  {} {}",
                    style(format!("{:<12}", category)).bold(),
                    registry.extensions_of(category).join(", ")
                );
            }
        }
        Commands::Replay { actions } => replay(&actions)?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use etchr_model::{Action, FlashResults, FlashState};

    #[test]
    fn test_default_formats_without_a_file() {
        let registry = load_formats(None).unwrap();
        assert_eq!(registry, SupportedFormats::default());
    }

    #[test]
    fn test_missing_formats_file_is_reported() {
        let err = load_formats(Some(Path::new("/nonexistent/formats.json"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read"));
    }

    const RECORDED_RUN: &str = r#"# recorded from a failing writer

{"type":"SET_FLASHING_FLAG"}
{"type":"SET_FLASH_STATE","data":{"type":"write","percentage":50}}
{"type":"SET_FLASH_STATE","data":{"type":"write","percentage":101}}
{"type":"SET_FLASH_STATE","data":{"type":"write","percentage":60}}
"#;

    #[test]
    fn test_replay_stops_at_rejected_line() {
        let store = Store::new();
        let err = replay_lines(RECORDED_RUN.as_bytes(), &store).unwrap_err();
        assert_eq!(err.to_string(), "Line 5: Excessive state percentage: 101");

        let state = store.state();
        assert!(state.is_flashing);
        assert_eq!(state.flash_state.as_ref().unwrap().percentage, 50.0);
    }

    #[test]
    fn test_replay_skips_blank_and_comment_lines() {
        let input = "# start\n\n   \n{\"type\":\"SET_FLASHING_FLAG\"}\n\
                     {\"type\":\"SET_FLASH_STATE\",\"data\":{\"type\":\"check\",\"percentage\":100}}\n\
                     # done\n\
                     {\"type\":\"UNSET_FLASHING_FLAG\",\"data\":{}}\n";
        let store = Store::new();
        assert_eq!(replay_lines(input.as_bytes(), &store).unwrap(), 3);

        let state = store.state();
        assert!(!state.is_flashing);
        assert_eq!(state.flash_results, Some(FlashResults::default()));
    }

    #[test]
    fn test_replay_reports_unknown_actions_by_line() {
        let store = Store::new();
        let err = replay_lines("{\"type\":\"EJECT\"}\n".as_bytes(), &store).unwrap_err();
        assert!(err.to_string().starts_with("Line 1: Invalid JSON"));
        assert_eq!(*store.state(), Snapshot::default());
    }

    #[test]
    fn test_unreadable_image_is_classified_by_path() {
        let registry = SupportedFormats::default();
        assert!(check_image(
            Path::new("/nonexistent/etchr-probe/win10.img.gz"),
            &registry
        ));
        assert!(!check_image(
            Path::new("/nonexistent/etchr-probe/notes.txt.gz"),
            &registry
        ));
    }

    #[test]
    fn test_progress_view_follows_stages() {
        let store = Store::new();
        let mut view = ProgressView::default();

        view.render(&store.dispatch(Action::SetFlashingFlag).unwrap())
            .unwrap();
        assert!(view.bar.is_none());

        let write = Action::SetFlashState(FlashState::new(FlashStage::Write, 40.0));
        view.render(&store.dispatch(write).unwrap()).unwrap();
        assert_eq!(view.stage, Some(FlashStage::Write));
        assert_eq!(view.bar.as_ref().unwrap().position(), 40);

        let check = Action::SetFlashState(FlashState::new(FlashStage::Check, 99.6));
        view.render(&store.dispatch(check).unwrap()).unwrap();
        assert_eq!(view.stage, Some(FlashStage::Check));
        assert_eq!(view.bar.as_ref().unwrap().position(), 100);

        let done = Action::UnsetFlashingFlag(FlashResults::default());
        view.render(&store.dispatch(done).unwrap()).unwrap();
        assert!(view.bar.is_none());
        assert_eq!(view.stage, None);
    }
}
