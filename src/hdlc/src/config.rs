// src/config.rs
//! Project configuration files.
//!
//! A configuration is a TOML file with an `[options]` table, whose keys are
//! the named analysis options accepted by [`Options::set`], and a `[library]`
//! table describing the work library and the search path:
//!
//! ```toml
//! [options]
//! error-limit = 20
//! standard-revision = 2008
//! relax-rules = ["impure", "out-port-read"]
//!
//! [library]
//! work = "work"
//! directory = "build/work"
//!
//! [[library.search]]
//! name = "ieee"
//! directory = "/opt/hdl/ieee"
//! ```
//!
//! Relative directories are resolved against the file's own directory.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use hdlc_identity::Ident;
use hdlc_object::{Library, LibraryError, LibraryStore};
use hdlc_sema::{OptionError, Options};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("option '{name}': {source}")]
    Option {
        name: String,
        #[source]
        source: OptionError,
    },

    #[error("option '{name}' has an unsupported value type")]
    OptionType { name: String },

    #[error(transparent)]
    Library(#[from] LibraryError),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Named analysis options, applied in key order.
    pub options: BTreeMap<String, toml::Value>,
    pub library: LibraryConfig,
    /// Directory relative paths are resolved against.
    #[serde(skip)]
    pub base: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct LibraryConfig {
    /// Name of the work library.
    pub work: String,
    /// Directory backing the work library; in memory when absent.
    pub directory: Option<PathBuf>,
    pub search: Vec<SearchEntry>,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        LibraryConfig {
            work: "work".to_owned(),
            directory: None,
            search: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchEntry {
    pub name: String,
    pub directory: PathBuf,
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut config: Config = text.parse()?;
        config.base = path.parent().map(Path::to_path_buf);
        Ok(config)
    }

    /// Analysis options: the defaults with every configured option applied.
    pub fn analysis_options(&self) -> Result<Options, ConfigError> {
        let mut options = Options::default();
        for (name, value) in &self.options {
            let text = option_text(value).ok_or_else(|| ConfigError::OptionType { name: name.clone() })?;
            options.set(name, &text).map_err(|source| ConfigError::Option {
                name: name.clone(),
                source,
            })?;
        }
        Ok(options)
    }

    /// Open the configured libraries.
    pub fn library_store(&self) -> Result<LibraryStore, ConfigError> {
        let mut libs = LibraryStore::new();
        for entry in &self.library.search {
            let name = library_name(&entry.name);
            libs.add_search_path(Library::open(name, self.resolve(&entry.directory))?);
        }
        let work = library_name(&self.library.work);
        let work = match &self.library.directory {
            Some(dir) => Library::open(work, self.resolve(dir))?,
            None => Library::in_memory(work),
        };
        libs.set_work(work);
        Ok(libs)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.base {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }
}

fn library_name(name: &str) -> Ident {
    Ident::new(&name.to_ascii_uppercase())
}

/// Textual form of an option value; arrays become comma-separated lists.
fn option_text(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Integer(i) => Some(i.to_string()),
        toml::Value::Boolean(b) => Some(b.to_string()),
        toml::Value::Array(items) => {
            let parts: Option<Vec<String>> = items.iter().map(option_text).collect();
            Some(parts?.join(","))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use hdlc_sema::{CoverMask, RelaxRules, StandardRevision};

    use super::*;

    #[test]
    fn options_are_applied_by_name() {
        let config: Config = r#"
            [options]
            error-limit = 5
            standard-revision = 2008
            relax-rules = ["impure", "out-port-read"]
            cover = ["statement", "toggle"]
            cover-array-limit = 32
            jit-threshold = "off"
        "#
        .parse()
        .unwrap();
        let options = config.analysis_options().unwrap();
        assert_eq!(options.error_limit, Some(5));
        assert_eq!(options.standard, StandardRevision::Vhdl08);
        assert!(options.is_relaxed(RelaxRules::IMPURE));
        assert!(options.is_relaxed(RelaxRules::OUT_PORT_READ));
        assert!(!options.is_relaxed(RelaxRules::UNIVERSAL_BOUND));
        assert_eq!(options.cover, CoverMask::STATEMENT | CoverMask::TOGGLE);
        assert_eq!(options.cover_array_limit, 32);
        assert_eq!(options.jit_threshold, None);
    }

    #[test]
    fn empty_file_gives_defaults() {
        let config: Config = "".parse().unwrap();
        assert_eq!(config.analysis_options().unwrap(), Options::default());
        assert_eq!(config.library.work, "work");
    }

    #[test]
    fn unknown_option_is_rejected() {
        let config: Config = "[options]\nwarp-speed = 9\n".parse().unwrap();
        let err = config.analysis_options().unwrap_err();
        assert!(matches!(err, ConfigError::Option { ref name, .. } if name == "warp-speed"));
    }

    #[test]
    fn bad_value_is_rejected() {
        let config: Config = "[options]\nstandard-revision = 1987\n".parse().unwrap();
        assert!(matches!(
            config.analysis_options(),
            Err(ConfigError::Option { .. })
        ));
    }

    #[test]
    fn unknown_table_is_a_parse_error() {
        let err = "[simulation]\nstop-time = 10\n".parse::<Config>().unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn library_directories_resolve_against_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hdlc.toml");
        fs::write(
            &path,
            "[library]\nwork = \"mylib\"\ndirectory = \"out/mylib\"\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        let libs = config.library_store().unwrap();
        let work = libs.work().unwrap();
        assert_eq!(work.name().as_str(), "MYLIB");
        assert_eq!(work.dir(), Some(dir.path().join("out/mylib").as_path()));
    }
}
