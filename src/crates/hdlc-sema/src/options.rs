// src/options.rs
//! Analysis options.
//!
//! Passes copy the [`Options`] they need when they start, so changing a
//! session's options affects only passes started afterwards.

use std::fmt;
use std::str::FromStr;

use hdlc_codegen::EvalOptions;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OptionError {
    #[error("unknown option '{0}'")]
    Unknown(String),

    #[error("invalid value '{value}' for option '{option}'")]
    InvalidValue { option: &'static str, value: String },
}

/// Language revision the design is analysed against.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StandardRevision {
    #[default]
    Vhdl93,
    Vhdl00,
    Vhdl02,
    Vhdl08,
}

impl StandardRevision {
    pub fn year(self) -> u32 {
        match self {
            StandardRevision::Vhdl93 => 1993,
            StandardRevision::Vhdl00 => 2000,
            StandardRevision::Vhdl02 => 2002,
            StandardRevision::Vhdl08 => 2008,
        }
    }
}

impl FromStr for StandardRevision {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s.trim() {
            "1993" | "93" => Ok(StandardRevision::Vhdl93),
            "2000" | "00" => Ok(StandardRevision::Vhdl00),
            "2002" | "02" => Ok(StandardRevision::Vhdl02),
            "2008" | "08" => Ok(StandardRevision::Vhdl08),
            _ => Err(()),
        }
    }
}

impl fmt::Display for StandardRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.year())
    }
}

/// Language rules that may be relaxed.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RelaxRules(u32);

impl RelaxRules {
    /// Bounds of numeric type definitions need not be locally static.
    pub const LOCALLY_STATIC: RelaxRules = RelaxRules(1 << 0);
    /// Discrete ranges may have arbitrary universal integer bounds.
    pub const UNIVERSAL_BOUND: RelaxRules = RelaxRules(1 << 1);
    /// Pure functions may call impure ones.
    pub const IMPURE: RelaxRules = RelaxRules(1 << 2);
    /// Output ports may be read before VHDL-2008.
    pub const OUT_PORT_READ: RelaxRules = RelaxRules(1 << 3);

    const NAMES: [(&'static str, RelaxRules); 4] = [
        ("locally-static", RelaxRules::LOCALLY_STATIC),
        ("universal-bound", RelaxRules::UNIVERSAL_BOUND),
        ("impure", RelaxRules::IMPURE),
        ("out-port-read", RelaxRules::OUT_PORT_READ),
    ];

    pub const fn empty() -> RelaxRules {
        RelaxRules(0)
    }

    pub const fn all() -> RelaxRules {
        RelaxRules(0b1111)
    }

    pub fn contains(self, other: RelaxRules) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: RelaxRules) {
        self.0 |= other.0;
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    /// A single rule by name; `_` and `-` are interchangeable.
    pub fn from_name(name: &str) -> Option<RelaxRules> {
        let name = name.trim().to_ascii_lowercase().replace('_', "-");
        Self::NAMES
            .iter()
            .find(|(n, _)| *n == name)
            .map(|&(_, rule)| rule)
    }
}

impl FromStr for RelaxRules {
    type Err = ();

    /// Comma-separated rule names, `all` or `none`.
    fn from_str(s: &str) -> Result<Self, ()> {
        let mut rules = RelaxRules::empty();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match part.to_ascii_lowercase().as_str() {
                "none" => {}
                "all" => rules = RelaxRules::all(),
                _ => rules.insert(RelaxRules::from_name(part).ok_or(())?),
            }
        }
        Ok(rules)
    }
}

impl std::ops::BitOr for RelaxRules {
    type Output = RelaxRules;

    fn bitor(self, rhs: RelaxRules) -> RelaxRules {
        RelaxRules(self.0 | rhs.0)
    }
}

impl fmt::Debug for RelaxRules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(_, rule)| self.contains(*rule))
            .map(|(name, _)| *name)
            .collect();
        write!(f, "RelaxRules({})", names.join(","))
    }
}

/// Kinds of coverage collected during elaboration. Empty turns coverage off.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CoverMask(u32);

impl CoverMask {
    pub const STATEMENT: CoverMask = CoverMask(1 << 0);
    pub const BRANCH: CoverMask = CoverMask(1 << 1);
    /// Transitions of bit-like signals and ports.
    pub const TOGGLE: CoverMask = CoverMask(1 << 2);
    /// Outcomes of conditions and logical operators.
    pub const EXPRESSION: CoverMask = CoverMask(1 << 3);

    const NAMES: [(&'static str, CoverMask); 4] = [
        ("statement", CoverMask::STATEMENT),
        ("branch", CoverMask::BRANCH),
        ("toggle", CoverMask::TOGGLE),
        ("expression", CoverMask::EXPRESSION),
    ];

    pub const fn empty() -> CoverMask {
        CoverMask(0)
    }

    pub const fn all() -> CoverMask {
        CoverMask(0b1111)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: CoverMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: CoverMask) {
        self.0 |= other.0;
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    /// Bits not naming a coverage kind are dropped.
    pub fn from_bits_truncate(bits: u32) -> CoverMask {
        CoverMask(bits & CoverMask::all().0)
    }

    pub fn from_name(name: &str) -> Option<CoverMask> {
        let name = name.trim().to_ascii_lowercase();
        Self::NAMES
            .iter()
            .find(|(n, _)| *n == name)
            .map(|&(_, kind)| kind)
    }
}

impl FromStr for CoverMask {
    type Err = ();

    /// Comma-separated kinds, `all` or `none`. The boolean words turn every
    /// kind on or off.
    fn from_str(s: &str) -> Result<Self, ()> {
        let mut mask = CoverMask::empty();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match part.to_ascii_lowercase().as_str() {
                "none" | "0" | "false" | "no" | "off" => {}
                "all" | "1" | "true" | "yes" | "on" => mask = CoverMask::all(),
                _ => mask.insert(CoverMask::from_name(part).ok_or(())?),
            }
        }
        Ok(mask)
    }
}

impl std::ops::BitOr for CoverMask {
    type Output = CoverMask;

    fn bitor(self, rhs: CoverMask) -> CoverMask {
        CoverMask(self.0 | rhs.0)
    }
}

impl fmt::Debug for CoverMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(_, kind)| self.contains(*kind))
            .map(|(name, _)| *name)
            .collect();
        write!(f, "CoverMask({})", names.join(","))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Options {
    /// Errors after which diagnostics are no longer reported. `None` never
    /// stops reporting.
    pub error_limit: Option<u32>,
    pub standard: StandardRevision,
    pub relax: RelaxRules,
    /// Coverage kinds tagged during elaboration.
    pub cover: CoverMask,
    /// Arrays with at least this many elements get no toggle tags; 0 tags
    /// every array.
    pub cover_array_limit: u32,
    pub eval_max_steps: u64,
    pub eval_max_depth: u32,
    pub jit_threshold: Option<u32>,
}

impl Default for Options {
    fn default() -> Self {
        let eval = EvalOptions::default();
        Options {
            error_limit: None,
            standard: StandardRevision::default(),
            relax: RelaxRules::empty(),
            cover: CoverMask::empty(),
            cover_array_limit: 0,
            eval_max_steps: eval.max_steps,
            eval_max_depth: eval.max_depth,
            jit_threshold: eval.jit_threshold,
        }
    }
}

impl Options {
    pub fn is_relaxed(&self, rule: RelaxRules) -> bool {
        self.relax.contains(rule)
    }

    /// Set a named option from its textual value.
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), OptionError> {
        let value = value.trim();
        match name {
            "error-limit" => {
                self.error_limit = match value {
                    "-1" | "none" | "unlimited" => None,
                    _ => Some(parse("error-limit", value)?),
                };
            }
            "standard-revision" | "std" => {
                self.standard = value.parse().map_err(|()| invalid("standard-revision", value))?;
            }
            "relax-rules" | "relax" => {
                self.relax = value.parse().map_err(|()| invalid("relax-rules", value))?;
            }
            "cover" => {
                self.cover = value.parse().map_err(|()| invalid("cover", value))?;
            }
            "cover-array-limit" => self.cover_array_limit = parse("cover-array-limit", value)?,
            "eval-max-steps" => self.eval_max_steps = parse("eval-max-steps", value)?,
            "eval-max-depth" => self.eval_max_depth = parse("eval-max-depth", value)?,
            "jit-threshold" => {
                self.jit_threshold = match value {
                    "off" | "none" => None,
                    _ => Some(parse("jit-threshold", value)?),
                };
            }
            _ => return Err(OptionError::Unknown(name.to_owned())),
        }
        Ok(())
    }

    pub fn eval_options(&self) -> EvalOptions {
        EvalOptions {
            max_steps: self.eval_max_steps,
            max_depth: self.eval_max_depth,
            jit_threshold: self.jit_threshold,
        }
    }
}

fn invalid(option: &'static str, value: &str) -> OptionError {
    OptionError::InvalidValue {
        option,
        value: value.to_owned(),
    }
}

fn parse<T: FromStr>(option: &'static str, value: &str) -> Result<T, OptionError> {
    value.parse().map_err(|_| invalid(option, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_options_are_parsed() {
        let mut opts = Options::default();
        opts.set("error-limit", "5").unwrap();
        opts.set("standard-revision", "08").unwrap();
        opts.set("relax-rules", "impure, out_port_read").unwrap();
        opts.set("jit-threshold", "off").unwrap();
        assert_eq!(opts.error_limit, Some(5));
        assert_eq!(opts.standard, StandardRevision::Vhdl08);
        assert!(opts.is_relaxed(RelaxRules::IMPURE | RelaxRules::OUT_PORT_READ));
        assert!(!opts.is_relaxed(RelaxRules::LOCALLY_STATIC));
        assert_eq!(opts.eval_options().jit_threshold, None);

        opts.set("error-limit", "-1").unwrap();
        assert_eq!(opts.error_limit, None);
    }

    #[test]
    fn bad_names_and_values_are_rejected() {
        let mut opts = Options::default();
        assert_eq!(
            opts.set("warp-speed", "9"),
            Err(OptionError::Unknown("warp-speed".into()))
        );
        assert!(matches!(
            opts.set("standard-revision", "1987"),
            Err(OptionError::InvalidValue { option: "standard-revision", .. })
        ));
        assert!(opts.set("relax-rules", "locally-static,bogus").is_err());
        assert_eq!(opts, Options::default());
    }

    #[test]
    fn cover_takes_kinds_or_a_switch() {
        let mut opts = Options::default();
        assert!(opts.cover.is_empty());
        opts.set("cover", "statement, toggle").unwrap();
        assert_eq!(opts.cover, CoverMask::STATEMENT | CoverMask::TOGGLE);
        assert!(!opts.cover.contains(CoverMask::BRANCH));

        opts.set("cover", "on").unwrap();
        assert_eq!(opts.cover, CoverMask::all());
        opts.set("cover", "false").unwrap();
        assert!(opts.cover.is_empty());

        opts.set("cover-array-limit", "64").unwrap();
        assert_eq!(opts.cover_array_limit, 64);
        assert!(opts.set("cover", "statement,path").is_err());
        assert_eq!(format!("{:?}", CoverMask::BRANCH | CoverMask::EXPRESSION), "CoverMask(branch,expression)");
    }

    #[test]
    fn revisions_order_by_year() {
        assert!(StandardRevision::Vhdl93 < StandardRevision::Vhdl08);
        assert_eq!("2002".parse(), Ok(StandardRevision::Vhdl02));
        assert_eq!(StandardRevision::Vhdl00.to_string(), "2000");
    }
}
