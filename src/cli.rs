//! Command-line interface for covmark.

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use walkdir::WalkDir;

use crate::config::Config;
use crate::instrument::{self, InstrumentSummary};

/// Exit codes.
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILED: i32 = 1;
pub const EXIT_ERROR: i32 = 2;

/// Load-time JavaScript coverage instrumenter.
///
/// Covmark rewrites JavaScript so that executing it records coverage in a
/// process-wide registry: statements get line counters, conditional
/// expressions get probes that log which arm ran. This binary performs the
/// same rewrite ahead of time, for build pipelines that cannot hook the
/// module loader.
#[derive(Parser)]
#[command(name = "covmark")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Instrument a file (to stdout) or a directory tree (to --output)
    Instrument(InstrumentArgs),
    /// Show what instrumentation would inject, without rewriting anything
    #[command(visible_alias = "show")]
    Inspect(InspectArgs),
}

/// Arguments for the instrument command.
#[derive(Parser)]
pub struct InstrumentArgs {
    /// File or directory to instrument
    pub path: PathBuf,

    /// Output file (file input) or output directory (directory input)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Path to covmark.yaml (default: auto-discover next to the input)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

/// Arguments for the inspect command.
#[derive(Parser)]
pub struct InspectArgs {
    /// File to inspect
    pub path: PathBuf,

    /// Output format: pretty or json
    #[arg(short, long, default_value = "pretty")]
    pub format: String,
}

/// Run the instrument command.
pub fn run_instrument(args: &InstrumentArgs) -> anyhow::Result<i32> {
    let metadata = match fs::metadata(&args.path) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("Error: cannot access path {:?}: {}", args.path, e);
            return Ok(EXIT_ERROR);
        }
    };

    if metadata.is_dir() {
        instrument_tree(args)
    } else {
        instrument_single(args)
    }
}

/// Instrument one file to stdout or to --output.
fn instrument_single(args: &InstrumentArgs) -> anyhow::Result<i32> {
    let text = match instrument::instrument_file(&args.path) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("Error: {}", e);
            return Ok(EXIT_FAILED);
        }
    };

    match &args.output {
        Some(output) => {
            if let Some(parent) = output.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            fs::write(output, text)?;
            println!("Wrote {}", output.display());
        }
        None => print!("{}", text),
    }
    Ok(EXIT_SUCCESS)
}

/// Instrument every eligible file under a directory into --output,
/// preserving relative layout.
fn instrument_tree(args: &InstrumentArgs) -> anyhow::Result<i32> {
    let output_dir = match &args.output {
        Some(dir) => dir.clone(),
        None => {
            eprintln!("Error: directory input requires --output");
            return Ok(EXIT_ERROR);
        }
    };

    let config = match load_config(args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            return Ok(EXIT_ERROR);
        }
    };

    let files = collect_files(&args.path, &config)?;
    if files.is_empty() {
        eprintln!("Warning: no files to instrument");
        return Ok(EXIT_SUCCESS);
    }

    let bar = ProgressBar::new(files.len() as u64);
    bar.set_style(ProgressStyle::with_template("  {bar:30} {pos}/{len}").unwrap());

    let results: Vec<(&PathBuf, anyhow::Result<()>)> = files
        .par_iter()
        .map(|path| {
            let outcome = instrument_into(path, &args.path, &output_dir);
            bar.inc(1);
            (path, outcome)
        })
        .collect();
    bar.finish_and_clear();

    let mut failed = 0;
    for (path, outcome) in &results {
        if let Err(e) = outcome {
            eprintln!("Warning: skipped {}: {}", path.display(), e);
            failed += 1;
        }
    }

    println!(
        "Instrumented {} of {} files into {}",
        results.len() - failed,
        results.len(),
        output_dir.display()
    );

    if failed > 0 {
        Ok(EXIT_FAILED)
    } else {
        Ok(EXIT_SUCCESS)
    }
}

/// Instrument `path` and write it under `output_dir`, keeping its position
/// relative to `root`.
fn instrument_into(path: &Path, root: &Path, output_dir: &Path) -> anyhow::Result<()> {
    let text = instrument::instrument_file(path)?;
    let relative = path.strip_prefix(root).unwrap_or(path);
    let target = output_dir.join(relative);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&target, text)?;
    Ok(())
}

/// Explicit --config wins; otherwise probe next to the input.
fn load_config(args: &InstrumentArgs) -> anyhow::Result<Config> {
    match &args.config {
        Some(path) => Config::parse_file(path),
        None => {
            let dir = if args.path.is_dir() {
                args.path.as_path()
            } else {
                args.path.parent().unwrap_or(Path::new("."))
            };
            Config::discover(dir)
        }
    }
}

/// Collect instrumentable files under a directory, pruning the same
/// directories the load-time filter would refuse.
fn collect_files(root: &Path, config: &Config) -> anyhow::Result<Vec<PathBuf>> {
    let extensions = config.hooked_extensions();
    let excludes = build_excludes(&config.exclude)?;

    let mut files = Vec::new();

    for entry in WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| {
            if e.depth() == 0 || !e.file_type().is_dir() {
                return true;
            }
            let name = e.file_name().to_string_lossy();
            // Skip hidden, dependency, and test directories
            !(name.starts_with('.')
                || name == "node_modules"
                || name == "test"
                || name == "tests")
        })
    {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let ext = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        if !extensions.iter().any(|&wanted| wanted == ext) {
            continue;
        }

        if let Some(globs) = &excludes {
            if globs.is_match(instrument::normalize_path(path).as_str()) {
                continue;
            }
        }

        files.push(path.to_path_buf());
    }

    files.sort();
    Ok(files)
}

fn build_excludes(patterns: &[String]) -> anyhow::Result<Option<globset::GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = globset::GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(globset::Glob::new(pattern)?);
    }
    Ok(Some(builder.build()?))
}

/// Run the inspect command.
pub fn run_inspect(args: &InspectArgs) -> anyhow::Result<i32> {
    if args.format != "pretty" && args.format != "json" {
        eprintln!(
            "Error: invalid format {:?}, must be 'pretty' or 'json'",
            args.format
        );
        return Ok(EXIT_ERROR);
    }

    let summary = match instrument::summarize_file(&args.path) {
        Ok(summary) => summary,
        Err(e) => {
            eprintln!("Error: {}", e);
            return Ok(EXIT_FAILED);
        }
    };

    match args.format.as_str() {
        "json" => {
            let json = serde_json::to_string_pretty(&summary)?;
            println!("{}", json);
        }
        _ => write_pretty_summary(&summary),
    }

    Ok(EXIT_SUCCESS)
}

fn write_pretty_summary(summary: &InstrumentSummary) {
    println!();
    print!("  ");
    print!("{}", "covmark".cyan().bold());
    println!(" v{}", env!("CARGO_PKG_VERSION"));
    println!();

    print!("  {}", "File: ".dimmed());
    println!("{}", summary.file);
    print!("  {}", "Counters: ".dimmed());
    println!(
        "{} on {} distinct lines",
        summary.statement_count,
        summary.tracked_lines.len()
    );
    print!("  {}", "Branches: ".dimmed());
    println!("{}", summary.branches.len());

    if !summary.branches.is_empty() {
        println!();
        for branch in &summary.branches {
            println!(
                "    {} {}:{}  consequent {}  alternate {}",
                "?".yellow(),
                branch.line,
                branch.column,
                branch.consequent,
                branch.alternate
            );
        }
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_collect_files_prunes_dependency_and_test_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("lib")).unwrap();
        fs::create_dir_all(root.join("node_modules/dep")).unwrap();
        fs::create_dir_all(root.join("test")).unwrap();
        fs::write(root.join("app.js"), "f();\n").unwrap();
        fs::write(root.join("lib/util.js"), "g();\n").unwrap();
        fs::write(root.join("lib/notes.txt"), "skip\n").unwrap();
        fs::write(root.join("node_modules/dep/index.js"), "h();\n").unwrap();
        fs::write(root.join("test/app.js"), "t();\n").unwrap();

        let files = collect_files(root, &Config::default()).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| {
                p.strip_prefix(root)
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect();
        assert_eq!(names, vec!["app.js", "lib/util.js"]);
    }

    #[test]
    fn test_collect_files_applies_config_excludes() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("vendor")).unwrap();
        fs::write(root.join("main.js"), "f();\n").unwrap();
        fs::write(root.join("vendor/blob.js"), "v();\n").unwrap();

        let config = Config {
            exclude: vec!["**/vendor/**".to_string()],
            ..Default::default()
        };
        let files = collect_files(root, &config).unwrap();
        assert_eq!(files, vec![root.join("main.js")]);
    }

    #[test]
    fn test_collect_files_honors_extra_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("a.js"), "f();\n").unwrap();
        fs::write(root.join("b.mjs"), "g();\n").unwrap();

        let config = Config {
            extensions: Some(vec![".mjs".to_string()]),
            ..Default::default()
        };
        let files = collect_files(root, &config).unwrap();
        assert_eq!(files, vec![root.join("b.mjs")]);
    }

    #[test]
    fn test_instrument_single_file_writes_to_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("app.js");
        fs::write(&input, "f();\n").unwrap();
        let output = dir.path().join("built").join("app.js");

        let args = InstrumentArgs {
            path: input,
            output: Some(output.clone()),
            config: None,
        };
        assert_eq!(run_instrument(&args).unwrap(), EXIT_SUCCESS);

        let text = fs::read_to_string(&output).unwrap();
        assert!(text.starts_with("if (typeof __covLine !== 'function'"));
        assert!(text.contains("__covLine('"));
    }

    #[test]
    fn test_instrument_tree_requires_an_output_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("app.js"), "f();\n").unwrap();

        let args = InstrumentArgs {
            path: dir.path().to_path_buf(),
            output: None,
            config: None,
        };
        assert_eq!(run_instrument(&args).unwrap(), EXIT_ERROR);
    }

    #[test]
    fn test_instrument_tree_continues_past_a_broken_file() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("project");
        fs::create_dir_all(root.join("lib")).unwrap();
        fs::write(root.join("app.js"), "f();\n").unwrap();
        fs::write(root.join("lib/ok.js"), "g();\n").unwrap();
        fs::write(root.join("lib/broken.js"), "function (\n").unwrap();
        let output = dir.path().join("out");

        let args = InstrumentArgs {
            path: root,
            output: Some(output.clone()),
            config: None,
        };
        assert_eq!(run_instrument(&args).unwrap(), EXIT_FAILED);

        let app = fs::read_to_string(output.join("app.js")).unwrap();
        assert!(app.starts_with("if (typeof __covLine !== 'function'"));
        let ok = fs::read_to_string(output.join("lib").join("ok.js")).unwrap();
        assert!(ok.contains("__covLine('"));
        assert!(!output.join("lib").join("broken.js").exists());
    }
}
