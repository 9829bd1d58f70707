use std::{
    collections::{BTreeSet, HashSet},
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use diary_stats::core::{DiaryRecord, Granularity, GroupingNode, Separator};
use diary_stats::render::render_json;
use diary_stats::storage::DiaryParser;
use diary_stats::summary::{Summary, SummaryOptions};
use diary_stats::{CsvDiaryParser, build_tag_tree, render_outline};
use serde::Deserialize;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "diary-stats",
    about = "Weekly, monthly and yearly tag summaries for a Letterboxd diary export",
    version
)]
struct Cli {
    /// Enable verbose logging for debugging.
    #[arg(long, global = true)]
    verbose: bool,
    /// TOML file with default summary settings (`[summary]` table).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Parse diary exports and print the records.
    Parse(ParseArgs),

    /// Group watched titles by period, tag hierarchy and release decade.
    Summary(SummaryArgs),

    /// Group watched titles by tag hierarchy across the whole diary.
    Tags(TagsArgs),
}

#[derive(Debug, Args)]
struct ParseArgs {
    /// Diary CSV files or directories containing them.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// Emit JSON instead of one line per record.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct SummaryArgs {
    /// Diary CSV files or directories containing them.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// Text splitting a tag into levels. Defaults to `:`.
    #[arg(long)]
    separator: Option<String>,
    /// Time bucket above the tag hierarchy. Defaults to month.
    #[arg(long, value_enum)]
    group_by: Option<GroupBy>,
    /// Emit JSON instead of an indented outline.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct TagsArgs {
    /// Diary CSV files or directories containing them.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// Text splitting a tag into levels. Defaults to `:`.
    #[arg(long)]
    separator: Option<String>,
    /// Emit JSON instead of an indented outline.
    #[arg(long)]
    json: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum GroupBy {
    Year,
    Month,
    Week,
}

impl From<GroupBy> for Granularity {
    fn from(group_by: GroupBy) -> Self {
        match group_by {
            GroupBy::Year => Granularity::Year,
            GroupBy::Month => Granularity::Month,
            GroupBy::Week => Granularity::Week,
        }
    }
}

/// Contents of the `--config` file.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(default)]
    summary: SummaryOptions,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => FileConfig::default(),
    };
    match cli.command {
        Commands::Parse(args) => handle_parse(args),
        Commands::Summary(args) => handle_summary(args, &config),
        Commands::Tags(args) => handle_tags(args, &config),
    }
}

fn init_tracing(verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "warn" };
    let subscriber = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("installing tracing subscriber")
}

fn load_config(path: &Path) -> Result<FileConfig> {
    let content =
        fs::read_to_string(path).with_context(|| format!("reading config {:?}", path))?;
    toml::from_str(&content).with_context(|| format!("parsing config {:?}", path))
}

/// CLI flags win over the config file, which wins over built-in defaults.
fn resolve_options(
    config: &FileConfig,
    separator: Option<String>,
    group_by: Option<GroupBy>,
) -> Result<SummaryOptions> {
    let mut options = config.summary.clone();
    if let Some(separator) = separator {
        options.separator = Separator::new(separator).context("invalid --separator")?;
    }
    if let Some(group_by) = group_by {
        options.granularity = group_by.into();
    }
    Ok(options)
}

fn handle_parse(args: ParseArgs) -> Result<()> {
    let ParseArgs { inputs, json } = args;
    let expanded = expand_inputs(&inputs)?;
    if expanded.is_empty() {
        anyhow::bail!("no diary CSV files found in the provided inputs");
    }

    let parser = CsvDiaryParser;
    let mut parsed = Vec::new();
    for path in expanded {
        let records = parser
            .parse_file(&path)
            .with_context(|| format!("parsing {:?}", path))?;
        parsed.push((path, records));
    }
    if parsed.iter().all(|(_, records)| records.is_empty()) {
        eprintln!("No diary entries found in the provided inputs.");
        return Ok(());
    }

    if json {
        #[derive(serde::Serialize)]
        struct JsonOutput<'a> {
            path: String,
            records: &'a [DiaryRecord],
        }

        let payload: Vec<JsonOutput<'_>> = parsed
            .iter()
            .map(|(path, records)| JsonOutput {
                path: path.display().to_string(),
                records,
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        for (idx, (path, records)) in parsed.iter().enumerate() {
            if parsed.len() > 1 {
                println!("== {} ==", path.display());
            }
            for record in records {
                println!("{}", describe_record(record));
            }
            if parsed.len() > 1 && idx + 1 < parsed.len() {
                println!();
            }
        }
    }
    Ok(())
}

fn handle_summary(args: SummaryArgs, config: &FileConfig) -> Result<()> {
    let SummaryArgs {
        inputs,
        separator,
        group_by,
        json,
    } = args;
    let options = resolve_options(config, separator, group_by)?;
    let records = load_records(&inputs)?;
    if records.is_empty() {
        eprintln!("No diary entries found in the provided inputs.");
        return Ok(());
    }

    info!(
        records = records.len(),
        separator = %options.separator,
        granularity = %options.granularity,
        "building summary"
    );
    let summary = Summary::new(records, options);
    print_tree(summary.tree(), json)
}

fn handle_tags(args: TagsArgs, config: &FileConfig) -> Result<()> {
    let TagsArgs {
        inputs,
        separator,
        json,
    } = args;
    let options = resolve_options(config, separator, None)?;
    let records = load_records(&inputs)?;
    if records.is_empty() {
        eprintln!("No diary entries found in the provided inputs.");
        return Ok(());
    }

    let tree = build_tag_tree(&records, &options.separator);
    print_tree(&tree, json)
}

fn print_tree(tree: &GroupingNode, json: bool) -> Result<()> {
    if json {
        println!("{}", render_json(tree)?);
    } else {
        print!("{}", render_outline(tree));
    }
    Ok(())
}

fn describe_record(record: &DiaryRecord) -> String {
    let year = record
        .release_year
        .map(|y| format!(" ({y})"))
        .unwrap_or_default();
    let rating = record
        .rating
        .map(|r| format!(" ★{r}"))
        .unwrap_or_default();
    let rewatch = if record.is_rewatch == Some(true) {
        " ↻"
    } else {
        ""
    };
    let tags = if record.tag_paths.is_empty() {
        String::new()
    } else {
        format!(" [{}]", record.tag_paths.join(", "))
    };
    format!(
        "{:<10} {}{}{}{}{}",
        record.watched_date, record.title, year, rating, rewatch, tags
    )
}

/// Records from every input, concatenated in path order.
fn load_records(inputs: &[PathBuf]) -> Result<Vec<DiaryRecord>> {
    let expanded = expand_inputs(inputs)?;
    if expanded.is_empty() {
        anyhow::bail!("no diary CSV files found in the provided inputs");
    }

    let parser = CsvDiaryParser;
    let mut records = Vec::new();
    for path in expanded {
        debug!("Parsing diary {:?}", path);
        let parsed = parser
            .parse_file(&path)
            .with_context(|| format!("parsing {:?}", path))?;
        records.extend(parsed);
    }
    Ok(records)
}

fn is_csv(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("csv"))
        .unwrap_or(false)
}

fn collect_csv_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut visited = HashSet::new();
    visit_dir(dir, &mut out, &mut visited)?;
    out.sort();
    out.dedup();
    Ok(out)
}

fn expand_inputs(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut visited = BTreeSet::new();
    for path in paths {
        let canonical =
            fs::canonicalize(path).with_context(|| format!("resolving path {:?}", path))?;
        let meta = fs::metadata(&canonical)
            .with_context(|| format!("reading metadata for {:?}", canonical))?;
        if meta.is_dir() {
            debug!("Scanning directory {:?}", canonical);
            for file in collect_csv_files(&canonical)? {
                if visited.insert(file.clone()) {
                    out.push(file);
                }
            }
        } else if meta.is_file() {
            if is_csv(&canonical) {
                debug!("Adding file {:?}", canonical);
                if visited.insert(canonical.clone()) {
                    out.push(canonical);
                }
            } else {
                anyhow::bail!("{:?} is not a .csv file", canonical);
            }
        }
    }
    Ok(out)
}

fn visit_dir(path: &Path, out: &mut Vec<PathBuf>, visited: &mut HashSet<PathBuf>) -> Result<()> {
    let canonical = fs::canonicalize(path)?;
    if !visited.insert(canonical.clone()) {
        return Ok(());
    }

    let metadata = fs::metadata(&canonical)?;
    if metadata.is_dir() {
        debug!("Visiting directory {:?}", canonical);
        for entry in fs::read_dir(&canonical)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if file_type.is_symlink() {
                continue;
            }
            visit_dir(&entry.path(), out, visited)?;
        }
    } else if metadata.is_file() && is_csv(&canonical) {
        debug!("Found diary export {:?}", canonical);
        out.push(canonical);
    }
    Ok(())
}
