use clap::Parser;
use colored::Colorize;
use gpugrep::config::parse_size;
use gpugrep::{
    BackendOverride, DispatchTuning, SearchError, SearchOptions, SearchOutput, Searcher,
};
use memmap2::Mmap;
use rayon::prelude::*;
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Files at or above this size are memory-mapped instead of read.
const MMAP_THRESHOLD: u64 = 10 * 1024 * 1024;

#[derive(Parser)]
#[command(
    name = "gpugrep",
    version,
    about = "grep-compatible search with CPU, Metal and Vulkan engines",
    long_about = None
)]
struct Cli {
    /// Pattern to search for (omit when using -e)
    pattern: Option<String>,

    /// Files to search; reads stdin when none are given
    files: Vec<PathBuf>,

    /// Pattern to search for (can be specified multiple times)
    #[arg(short = 'e', long = "regexp")]
    patterns: Vec<String>,

    /// Case-insensitive matching (ASCII)
    #[arg(short = 'i', long = "ignore-case")]
    ignore_case: bool,

    /// Match whole words only
    #[arg(short = 'w', long = "word-regexp")]
    word_regexp: bool,

    /// Select lines that do not match
    #[arg(short = 'v', long = "invert-match")]
    invert_match: bool,

    /// Treat patterns as literal strings
    #[arg(short = 'F', long = "fixed-strings", conflicts_with_all = ["extended_regexp", "perl_regexp"])]
    fixed_strings: bool,

    /// Extended regular expression syntax
    #[arg(short = 'E', long = "extended-regexp")]
    extended_regexp: bool,

    /// Perl-compatible regular expressions
    #[arg(short = 'P', long = "perl-regexp", conflicts_with = "extended_regexp")]
    perl_regexp: bool,

    /// Prefix each line with its line number
    #[arg(short = 'n', long = "line-number")]
    line_number: bool,

    /// Print only a count of matching lines per file
    #[arg(short = 'c', long = "count")]
    count: bool,

    /// Print only names of files with matches
    #[arg(short = 'l', long = "files-with-matches", conflicts_with = "files_without_match")]
    files_with_matches: bool,

    /// Print only names of files without matches
    #[arg(short = 'L', long = "files-without-match")]
    files_without_match: bool,

    /// Print each match on its own line instead of the whole line
    #[arg(short = 'o', long = "only-matching")]
    only_matching: bool,

    /// Search binary files as if they were text
    #[arg(short = 'a', long = "text")]
    text: bool,

    /// Execution engine (auto|cpu|gpu|metal|vulkan)
    #[arg(long = "backend", default_value = "auto")]
    backend: String,

    /// Bias added to the GPU workload score (-8..8)
    #[arg(long = "gpu-bias")]
    gpu_bias: Option<i32>,

    /// Pattern length scored as "short"
    #[arg(long = "short-pattern-len")]
    short_pattern_len: Option<u32>,

    /// Pattern length scored as "long"
    #[arg(long = "long-pattern-len")]
    long_pattern_len: Option<u32>,

    /// Minimum buffer size worth sending to the GPU (e.g. 512K)
    #[arg(long = "min-gpu-size")]
    min_gpu_size: Option<String>,

    /// Maximum buffer size the GPU accepts (e.g. 1G)
    #[arg(long = "max-gpu-size")]
    max_gpu_size: Option<String>,

    /// Tuning config file (default: ~/.config/gpugrep/config.yaml)
    #[arg(long = "config")]
    config: Option<PathBuf>,

    /// Print match statistics instead of matches
    #[arg(long = "stats")]
    stats: bool,

    /// Disable colored output
    #[arg(short = 'N', long = "no-color")]
    no_color: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long = "log-level", default_value = "warn")]
    log_level: String,

    /// Number of worker threads for multi-file searches
    #[arg(short = 'j', long = "threads")]
    threads: Option<usize>,
}

impl Cli {
    fn search_options(&self) -> SearchOptions {
        SearchOptions {
            case_insensitive: self.ignore_case,
            word_boundary: self.word_regexp,
            invert_match: self.invert_match,
            fixed_string: self.fixed_strings,
            extended: self.extended_regexp,
            perl: self.perl_regexp,
        }
    }

    fn tuning(&self) -> Result<DispatchTuning, SearchError> {
        let base = DispatchTuning::load_from(self.config.as_deref())
            .map_err(|e| SearchError::config_error(format!("bad config file: {e}")))?;
        let min = self
            .min_gpu_size
            .as_deref()
            .map(parse_size)
            .transpose()
            .map_err(SearchError::config_error)?;
        let max = self
            .max_gpu_size
            .as_deref()
            .map(parse_size)
            .transpose()
            .map_err(SearchError::config_error)?;
        Ok(base.merge_with_cli(
            self.gpu_bias,
            self.short_pattern_len,
            self.long_pattern_len,
            min,
            max,
        ))
    }

    fn effective_patterns(&self) -> Result<Vec<Vec<u8>>, SearchError> {
        let mut patterns: Vec<Vec<u8>> =
            self.patterns.iter().map(|p| p.clone().into_bytes()).collect();
        if patterns.is_empty() {
            match &self.pattern {
                Some(p) => patterns.push(p.clone().into_bytes()),
                None => {
                    return Err(SearchError::config_error(
                        "no pattern given (use PATTERN or -e)",
                    ))
                }
            }
        }
        Ok(patterns)
    }

    /// When -e is used, the positional "pattern" is actually the first file.
    fn effective_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        if !self.patterns.is_empty() {
            if let Some(first) = &self.pattern {
                files.push(PathBuf::from(first));
            }
        }
        files.extend(self.files.iter().cloned());
        files
    }
}

enum Buffer {
    Owned(Vec<u8>),
    Mapped(Mmap),
}

impl AsRef<[u8]> for Buffer {
    fn as_ref(&self) -> &[u8] {
        match self {
            Buffer::Owned(v) => v,
            Buffer::Mapped(m) => m,
        }
    }
}

fn read_input(path: &PathBuf) -> Result<Buffer, SearchError> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    if len >= MMAP_THRESHOLD {
        let mmap = unsafe { Mmap::map(&file) }?;
        Ok(Buffer::Mapped(mmap))
    } else {
        let mut data = Vec::with_capacity(len as usize);
        file.read_to_end(&mut data)?;
        Ok(Buffer::Owned(data))
    }
}

fn looks_binary(data: &[u8]) -> bool {
    data.iter().take(4096).any(|&b| b == 0)
}

struct FileReport {
    name: String,
    matched: bool,
    binary: bool,
    lines: u64,
    output: SearchOutput,
    data: Buffer,
}

fn search_buffer(
    searcher: &Searcher,
    data: Buffer,
    name: String,
    patterns: &[Vec<u8>],
) -> Result<FileReport, SearchError> {
    let slices: Vec<&[u8]> = patterns.iter().map(|p| p.as_slice()).collect();
    let output = if slices.len() == 1 {
        searcher.search(data.as_ref(), slices[0])?
    } else {
        searcher.search_all(data.as_ref(), &slices)?
    };

    let mut line_records = output.records.clone();
    gpugrep::aggregate::dedup_by_line(&mut line_records);

    Ok(FileReport {
        matched: output.has_matches(),
        binary: looks_binary(data.as_ref()),
        lines: line_records.len() as u64,
        output,
        name,
        data,
    })
}

fn line_end(data: &[u8], line_start: usize) -> usize {
    memchr::memchr(b'\n', &data[line_start..]).map_or(data.len(), |p| line_start + p)
}

fn print_report(report: &FileReport, cli: &Cli, show_name: bool) {
    let name = &report.name;
    if cli.files_with_matches {
        if report.matched {
            println!("{}", name.purple());
        }
        return;
    }
    if cli.files_without_match {
        if !report.matched {
            println!("{}", name.purple());
        }
        return;
    }
    if cli.count {
        if show_name {
            println!("{}:{}", name.purple(), report.lines);
        } else {
            println!("{}", report.lines);
        }
        return;
    }
    if report.binary && !cli.text {
        if report.matched {
            println!("Binary file {name} matches");
        }
        return;
    }

    let data = report.data.as_ref();
    let mut i = 0;
    let records = &report.output.records;
    while i < records.len() {
        let line_start = records[i].line_start as usize;
        let end = line_end(data, line_start);
        let mut j = i;
        while j < records.len() && records[j].line_start as usize == line_start {
            j += 1;
        }
        let line_records = &records[i..j];
        i = j;

        let mut prefix = String::new();
        if show_name {
            prefix.push_str(&format!("{}{}", name.purple(), ":".cyan()));
        }
        if cli.line_number {
            prefix.push_str(&format!(
                "{}{}",
                line_records[0].line_num.to_string().green(),
                ":".cyan()
            ));
        }

        if cli.only_matching {
            if cli.invert_match {
                continue; // inverted line records are not occurrences
            }
            for record in line_records {
                if record.match_len == 0 {
                    continue;
                }
                let m = &data[record.position as usize..record.end() as usize];
                println!("{}{}", prefix, String::from_utf8_lossy(m).red().bold());
            }
            continue;
        }

        let line = &data[line_start..end];
        if cli.invert_match {
            println!("{}{}", prefix, String::from_utf8_lossy(line));
            continue;
        }

        // highlight every match on the line
        let mut rendered = String::new();
        let mut cursor = line_start;
        for record in line_records {
            let (start, stop) = (record.position as usize, record.end() as usize);
            if record.match_len == 0 || start < cursor || stop > end {
                continue;
            }
            rendered.push_str(&String::from_utf8_lossy(&data[cursor..start]));
            rendered.push_str(&format!(
                "{}",
                String::from_utf8_lossy(&data[start..stop]).red().bold()
            ));
            cursor = stop;
        }
        rendered.push_str(&String::from_utf8_lossy(&data[cursor..end]));
        println!("{prefix}{rendered}");
    }
}

fn run(cli: &Cli) -> Result<(bool, bool), SearchError> {
    let options = cli.search_options();
    let tuning = cli.tuning()?;
    let backend: BackendOverride = cli
        .backend
        .parse()
        .map_err(SearchError::config_error)?;
    let patterns = cli.effective_patterns()?;
    let files = cli.effective_files();

    debug!(?backend, files = files.len(), "starting search");

    if files.is_empty() {
        let mut data = Vec::new();
        std::io::stdin().read_to_end(&mut data)?;
        let searcher = Searcher::with_config(options, tuning, backend);
        let report = search_buffer(
            &searcher,
            Buffer::Owned(data),
            "(standard input)".to_string(),
            &patterns,
        )?;
        print_report(&report, cli, false);
        if cli.stats {
            print_stats(&[&report]);
        }
        return Ok((report.matched, false));
    }

    let show_name = files.len() > 1;
    let results: Vec<Result<FileReport, (String, SearchError)>> = files
        .par_iter()
        .map_init(
            || Searcher::with_config(options, tuning, backend),
            |searcher, path| {
                let name = path.display().to_string();
                let data = read_input(path).map_err(|e| (name.clone(), e))?;
                search_buffer(searcher, data, name.clone(), &patterns)
                    .map_err(|e| (name, e))
            },
        )
        .collect();

    let mut any_match = false;
    let mut any_error = false;
    let mut reports = Vec::new();
    for result in results {
        match result {
            Ok(report) => {
                any_match |= report.matched;
                print_report(&report, cli, show_name);
                reports.push(report);
            }
            Err((name, e)) => {
                eprintln!("gpugrep: {name}: {e}");
                any_error = true;
            }
        }
    }
    if cli.stats {
        let refs: Vec<&FileReport> = reports.iter().collect();
        print_stats(&refs);
    }
    Ok((any_match, any_error))
}

fn print_stats(reports: &[&FileReport]) {
    let total: u64 = reports.iter().map(|r| r.output.total_matches).sum();
    let with_matches = reports.iter().filter(|r| r.matched).count();
    println!(
        "{total} matches across {with_matches} of {} inputs",
        reports.len()
    );
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cli.log_level))
        .with_writer(std::io::stderr)
        .init();

    if cli.no_color {
        colored::control::set_override(false);
    }

    if let Some(threads) = cli.threads {
        let _ = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .build_global();
    }

    match run(&cli) {
        Ok((_, true)) => ExitCode::from(2),
        Ok((true, false)) => ExitCode::SUCCESS,
        Ok((false, false)) => ExitCode::from(1),
        Err(e) => {
            eprintln!("gpugrep: {e}");
            ExitCode::from(2)
        }
    }
}
