//! m4bmeta - M4A/M4B metadata, chapter and cover art extraction
//!
//! Command-line front end for the `m4bmeta` library.

use anyhow::{Context, Result};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use log::{Level, LevelFilter, Log, Metadata, Record};
use m4bmeta::mp4::atom;
use m4bmeta::{open, FileMetadata, SafeReader};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Depth limit for `-t`
const TREE_DEPTH: usize = 16;

// =============================================================================
// Options
// =============================================================================

#[derive(Default)]
struct Options {
    // Extraction options
    strict: bool,  // -s
    artwork: bool, // -a

    // Output options
    json: bool,                  // -j
    chapters: bool,              // -c
    tree: bool,                  // -t
    output_dir: Option<PathBuf>, // -o <dir>

    // Behavior options
    quiet: bool,   // -q
    verbose: bool, // -V

    // Files
    files: Vec<PathBuf>,
}

impl Options {
    fn library_options(&self) -> m4bmeta::Options {
        m4bmeta::Options {
            strict: self.strict,
            with_artwork: self.artwork || self.output_dir.is_some(),
        }
    }
}

// =============================================================================
// Logging
// =============================================================================

/// Writes library log records to stderr
struct StderrLogger;

static LOGGER: StderrLogger = StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let label = match record.level() {
            Level::Error => "error".red().bold(),
            Level::Warn => "warning".yellow().bold(),
            Level::Info => "info".cyan(),
            Level::Debug => "debug".blue(),
            Level::Trace => "trace".dimmed(),
        };
        eprintln!("{}: {}", label, record.args());
    }

    fn flush(&self) {}
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Off
    };
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}

// =============================================================================
// Main
// =============================================================================

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return Ok(());
    }

    let opts = parse_args(&args[1..])?;
    init_logging(opts.verbose);

    let failures = run(&opts)?;
    if failures > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn parse_args(args: &[String]) -> Result<Options> {
    let mut opts = Options::default();
    let mut i = 0;

    while i < args.len() {
        let arg = &args[i];

        if arg.starts_with('-') && arg.len() > 1 {
            let flag = &arg[1..];

            match flag {
                "o" => {
                    i += 1;
                    if i >= args.len() {
                        eprintln!("{}: -o requires an argument", "error".red().bold());
                        std::process::exit(1);
                    }
                    opts.output_dir = Some(PathBuf::from(&args[i]));
                }
                "s" => opts.strict = true,
                "a" => opts.artwork = true,
                "j" => opts.json = true,
                "c" => opts.chapters = true,
                "t" => opts.tree = true,
                "q" => opts.quiet = true,
                "V" => opts.verbose = true,
                "v" | "-version" => {
                    print_version();
                    std::process::exit(0);
                }
                "h" | "-help" => {
                    print_usage();
                    std::process::exit(0);
                }
                // Handle combined short flags like -jc
                _ if flag.chars().all(|c| "sajctqV".contains(c)) => {
                    for c in flag.chars() {
                        match c {
                            's' => opts.strict = true,
                            'a' => opts.artwork = true,
                            'j' => opts.json = true,
                            'c' => opts.chapters = true,
                            't' => opts.tree = true,
                            'q' => opts.quiet = true,
                            'V' => opts.verbose = true,
                            _ => {}
                        }
                    }
                }
                // Handle -o with attached value (e.g., -ocovers)
                _ if flag.starts_with('o') => {
                    opts.output_dir = Some(PathBuf::from(&flag[1..]));
                }
                _ => {
                    eprintln!("{}: unknown option: -{}", "warning".yellow().bold(), flag);
                }
            }
        } else {
            // It's a file
            opts.files.push(PathBuf::from(arg));
        }

        i += 1;
    }

    Ok(opts)
}

/// Process every file, returning how many failed
fn run(opts: &Options) -> Result<usize> {
    if opts.files.is_empty() {
        eprintln!("{}: no files specified", "error".red().bold());
        std::process::exit(1);
    }

    if let Some(dir) = &opts.output_dir {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;
    }

    if opts.tree {
        cmd_tree(&opts.files)
    } else if opts.json {
        cmd_json(&opts.files, opts)
    } else {
        cmd_info(&opts.files, opts)
    }
}

// =============================================================================
// Commands
// =============================================================================

fn cmd_info(files: &[PathBuf], opts: &Options) -> Result<usize> {
    let mut failures = 0;
    for file in files {
        if !process_info(file, opts)? {
            failures += 1;
        }
    }
    Ok(failures)
}

fn cmd_json(files: &[PathBuf], opts: &Options) -> Result<usize> {
    let progress = if files.len() > 1 && !opts.quiet {
        let bar = ProgressBar::new(files.len() as u64);
        if let Ok(style) = ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} {msg}") {
            bar.set_style(style);
        }
        Some(bar)
    } else {
        None
    };

    let mut results = Vec::new();
    let mut failures = 0;
    for file in files {
        if let Some(bar) = &progress {
            bar.set_message(display_name(file).to_string());
        }
        match open(file, &opts.library_options()) {
            Ok(meta) => {
                write_artwork(&meta, opts)?;
                results.push(meta);
            }
            Err(e) => {
                failures += 1;
                if let Some(bar) = &progress {
                    bar.suspend(|| eprintln!("{} - {}", display_name(file).red(), e));
                } else {
                    eprintln!("{} - {}", display_name(file).red(), e);
                }
            }
        }
        if let Some(bar) = &progress {
            bar.inc(1);
        }
    }
    if let Some(bar) = progress {
        bar.finish_and_clear();
    }

    // A single file prints as an object, several as an array
    let json = match results.as_slice() {
        [meta] if files.len() == 1 => serde_json::to_string_pretty(meta),
        [] if files.len() == 1 => return Ok(failures),
        _ => serde_json::to_string_pretty(&results),
    };
    println!("{}", json.context("Failed to serialize metadata")?);

    Ok(failures)
}

fn cmd_tree(files: &[PathBuf]) -> Result<usize> {
    let mut failures = 0;
    for file in files {
        if let Err(e) = print_tree(file) {
            failures += 1;
            eprintln!("{} - {:#}", display_name(file).red(), e);
        }
    }
    Ok(failures)
}

// =============================================================================
// File processing
// =============================================================================

/// Print one file's summary. Returns false when the file could not be read.
fn process_info(file: &Path, opts: &Options) -> Result<bool> {
    let filename = display_name(file);

    let meta = match open(file, &opts.library_options()) {
        Ok(meta) => meta,
        Err(e) => {
            eprintln!("{} - {}", filename.red(), e);
            return Ok(false);
        }
    };

    if opts.quiet {
        // Quiet mode: tab-separated output
        println!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            filename,
            meta.format,
            meta.tags.title,
            meta.tags.artist,
            format_duration(meta.audio.duration),
            meta.chapters.len(),
            meta.warnings.len()
        );
    } else {
        print_summary(filename, &meta, opts);
    }

    write_artwork(&meta, opts)?;
    Ok(true)
}

fn print_summary(filename: &str, meta: &FileMetadata, opts: &Options) {
    let tags = &meta.tags;
    let audio = &meta.audio;

    println!("{}", filename.cyan().bold());
    println!("  Format:      {}", meta.format);
    print_field("Title", &tags.title);
    print_field("Artist", &tags.artist);
    print_field("Album", &tags.album);
    print_field("Narrator", &tags.narrator);
    if !tags.series.is_empty() || !tags.series_part.is_empty() {
        let part = if tags.series_part.is_empty() {
            String::new()
        } else {
            format!(" #{}", tags.series_part)
        };
        println!("  Series:      {}{}", tags.series, part.green());
    }
    println!("  Duration:    {}", format_duration(audio.duration));
    if !audio.codec.is_empty() {
        let profile = if audio.codec_profile.is_empty() {
            String::new()
        } else {
            format!(" ({})", audio.codec_profile)
        };
        println!("  Codec:       {}{}", audio.codec_name, profile);
        println!(
            "  Audio:       {} Hz, {} channel(s), {} kbps",
            audio.sample_rate,
            audio.channels,
            audio.bitrate / 1000
        );
    }
    println!("  Chapters:    {}", meta.chapters.len());
    if !meta.artwork.is_empty() {
        let covers: Vec<String> = meta
            .artwork
            .iter()
            .map(|a| format!("{} {}x{}", a.mime_type, a.width, a.height))
            .collect();
        println!("  Artwork:     {}", covers.join(", "));
    }

    if opts.chapters {
        for chapter in &meta.chapters {
            println!(
                "    {:>3}  {}  {}",
                chapter.index,
                format_duration(chapter.start_time).dimmed(),
                chapter.title
            );
        }
    }

    for warning in &meta.warnings {
        println!("  {} {}", "!".yellow(), warning);
    }
    println!();
}

fn print_field(label: &str, value: &str) {
    if !value.is_empty() {
        println!("  {:<12} {}", format!("{}:", label), value);
    }
}

/// Save covers as `<stem>_cover<N>.<ext>` when `-o` was given
fn write_artwork(meta: &FileMetadata, opts: &Options) -> Result<()> {
    let Some(dir) = &opts.output_dir else {
        return Ok(());
    };
    let stem = meta
        .path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("cover");

    for (i, art) in meta.artwork.iter().enumerate() {
        let target = dir.join(format!("{}_cover{}.{}", stem, i + 1, art.extension()));
        fs::write(&target, &art.data)
            .with_context(|| format!("Failed to write artwork: {}", target.display()))?;
        if !opts.quiet && !opts.json {
            println!("  {} {}", "✓".green(), target.display());
        }
    }
    Ok(())
}

/// Dump the box tree of one file
fn print_tree(file: &Path) -> Result<()> {
    let handle =
        fs::File::open(file).with_context(|| format!("Failed to open: {}", file.display()))?;
    let size = handle
        .metadata()
        .with_context(|| format!("Failed to stat: {}", file.display()))?
        .len();
    let reader = SafeReader::new(&handle, size, file);

    println!("{}", display_name(file).cyan().bold());
    for entry in atom::tree(&reader, TREE_DEPTH) {
        let a = entry.atom;
        println!(
            "{}{} {} {}",
            "  ".repeat(entry.depth + 1),
            a.kind.to_string().green(),
            a.size,
            format!("@{}", a.offset).dimmed()
        );
    }
    println!();
    Ok(())
}

fn display_name(file: &Path) -> &str {
    file.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown")
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, secs / 60 % 60, secs % 60)
}

// =============================================================================
// Help / Version
// =============================================================================

fn print_version() {
    println!("m4bmeta version {}", VERSION);
    println!("M4A/M4B metadata extraction written in Rust");
}

fn print_usage() {
    println!("{} version {}", "m4bmeta".green().bold(), VERSION);
    println!("Metadata, chapter and cover art extraction for M4A/M4B files");
    println!();
    println!("{}", "USAGE:".cyan().bold());
    println!("    m4bmeta [OPTIONS] <FILES>...");
    println!();
    println!("{}", "OPTIONS:".cyan().bold());
    println!("    -s        Strict mode (treat warnings as errors)");
    println!("    -a        Extract cover art");
    println!("    -o <dir>  Write cover art files to <dir> (implies -a)");
    println!("    -c        List chapters");
    println!("    -j        JSON output");
    println!("    -t        Dump the box tree");
    println!("    -q        Quiet mode (tab-separated output)");
    println!("    -V        Verbose logging to stderr");
    println!("    -v        Show version");
    println!("    -h        Show this help");
    println!();
    println!("{}", "EXAMPLES:".cyan().bold());
    println!("    m4bmeta book.m4b               Show file info");
    println!("    m4bmeta -c book.m4b            Show file info and chapters");
    println!("    m4bmeta -j *.m4b               JSON for all files");
    println!("    m4bmeta -o covers book.m4b     Save cover art to ./covers");
    println!("    m4bmeta -s *.m4a               Fail on any malformed file");
}
