use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "mapbundle")]
#[command(version)]
#[command(about = "Inspect and extract map bundles from local files or HTTP URLs", long_about = None)]
#[command(after_help = "Examples:\n  \
  mapbundle -l bundle.zip                       list files in bundle.zip\n  \
  mapbundle -p bundle.zip styles/basic.json     print one file\n  \
  mapbundle -d out https://example.com/map.zip 'styles/*'   extract remote styles")]
pub struct Cli {
    /// Bundle path or HTTP URL
    #[arg(value_name = "FILE")]
    pub file: String,

    /// Files to extract, `*` and `?` allowed (default: all)
    #[arg(value_name = "FILES")]
    pub files: Vec<String>,

    /// List files (short format)
    #[arg(short = 'l')]
    pub list: bool,

    /// List verbosely with sizes and offsets; enables debug logging
    #[arg(short = 'v')]
    pub verbose: bool,

    /// Extract files to pipe, no messages
    #[arg(short = 'p')]
    pub pipe: bool,

    /// Extract files into exdir
    #[arg(short = 'd', value_name = "DIR")]
    pub extract_dir: Option<String>,

    /// Exclude files that follow
    #[arg(short = 'x', value_name = "FILE", num_args = 1..)]
    pub exclude: Vec<String>,

    /// Never overwrite existing files
    #[arg(short = 'n')]
    pub never_overwrite: bool,

    /// Overwrite files WITHOUT prompting
    #[arg(short = 'o')]
    pub overwrite: bool,

    /// Junk paths (do not make directories)
    #[arg(short = 'j')]
    pub junk_paths: bool,

    /// Quiet mode (-qq => quieter)
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,

    /// Maximum number of cached directory tables and files
    #[arg(long, value_name = "N", default_value_t = 100)]
    pub max_cache_entries: usize,
}

impl Cli {
    pub fn is_http_url(&self) -> bool {
        self.file.starts_with("http://") || self.file.starts_with("https://")
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet > 0 || self.pipe
    }

    /// Default log filter when `RUST_LOG` is not set.
    pub fn log_filter(&self) -> &'static str {
        match (self.verbose, self.quiet) {
            (true, _) => "mapbundle=debug",
            (false, 0) => "warn",
            (false, _) => "error",
        }
    }

    /// Whether `path` is selected by the positional filters and not
    /// excluded by `-x`.
    pub fn selects(&self, path: &str) -> bool {
        let included = self.files.is_empty()
            || self.files.iter().any(|f| {
                if has_glob_chars(f) {
                    glob_match(f, path)
                } else {
                    path == f.as_str() || basename(path) == f.as_str()
                }
            });
        let excluded = self
            .exclude
            .iter()
            .any(|x| path.contains(x.as_str()) || glob_match(x, path));
        included && !excluded
    }
}

/// Final component of an archive path.
pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn has_glob_chars(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?')
}

/// Match `text` against a pattern where `*` is any run of characters and
/// `?` any single character.
fn glob_match(pattern: &str, text: &str) -> bool {
    fn do_match(pattern: &[char], text: &[char]) -> bool {
        match (pattern.first(), text.first()) {
            (None, None) => true,
            (Some('*'), _) => {
                do_match(&pattern[1..], text) || (!text.is_empty() && do_match(pattern, &text[1..]))
            }
            (Some('?'), Some(_)) => do_match(&pattern[1..], &text[1..]),
            (Some(p), Some(t)) if p == t => do_match(&pattern[1..], &text[1..]),
            _ => false,
        }
    }

    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    do_match(&pattern, &text)
}
