//! Command line options.
//! `sokodlex [level] [levelset] [--backward] [--steps N] ...`

use std::path::PathBuf;

use clap::{Arg, ArgAction, Command, value_parser};

const DEFAULT_LEVELSET: &str = "./data/Large Test Suite Sets/XSokoban_90.xsb";

fn make_options_parser() -> Command {
    Command::new("sokodlex")
        .about("Sokoban deadlock explorer")
        .version("v0.1.0")
        .arg(
            Arg::new("level")
                .value_parser(value_parser!(usize))
                .default_value("1")
                .help("Level number 1 ... len(levels)"),
        )
        .arg(
            Arg::new("levelset")
                .value_parser(value_parser!(PathBuf))
                .default_value(DEFAULT_LEVELSET)
                .help("File to load the level set from (xsb format)"),
        )
        .arg(
            Arg::new("var_dir")
                .long("var-dir")
                .value_name("DIR")
                .value_parser(value_parser!(PathBuf))
                .help("Directory for deadlock stores and solution logs"),
        )
        .arg(
            Arg::new("steps")
                .long("steps")
                .value_parser(value_parser!(u64))
                .help("Driver step limit"),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .value_parser(value_parser!(u64))
                .help("Seed for the action-sampling RNG"),
        )
        .arg(
            Arg::new("backward")
                .long("backward")
                .action(ArgAction::SetTrue)
                .help("Explore with pulls from the solved position"),
        )
        .arg(
            Arg::new("report")
                .long("report")
                .value_name("FILE")
                .help("Write the search report here (plus a .json sibling)"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .help("TOML solver configuration"),
        )
}

#[derive(Debug)]
pub struct Options {
    pub level: usize,
    pub levelset: PathBuf,
    pub var_dir: Option<PathBuf>,
    pub steps: Option<u64>,
    pub seed: Option<u64>,
    pub backward: bool,
    pub report: Option<String>,
    pub config: Option<PathBuf>,
}

impl Options {
    pub fn from_env() -> Options {
        Self::from_matches(make_options_parser().get_matches())
    }

    pub fn parse_from<I, T>(args: I) -> Options
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Self::from_matches(make_options_parser().get_matches_from(args))
    }

    fn from_matches(matches: clap::ArgMatches) -> Options {
        Options {
            level: *matches.get_one::<usize>("level").expect("has a default"),
            levelset: matches
                .get_one::<PathBuf>("levelset")
                .expect("has a default")
                .clone(),
            var_dir: matches.get_one::<PathBuf>("var_dir").cloned(),
            steps: matches.get_one::<u64>("steps").copied(),
            seed: matches.get_one::<u64>("seed").copied(),
            backward: matches.get_flag("backward"),
            report: matches.get_one::<String>("report").cloned(),
            config: matches.get_one::<PathBuf>("config").cloned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_flags() {
        let options = Options::parse_from(["sokodlex", "7", "levels.xsb", "--backward"]);
        assert_eq!(options.level, 7);
        assert_eq!(options.levelset, PathBuf::from("levels.xsb"));
        assert!(options.backward);
        assert!(options.steps.is_none());

        let defaults = Options::parse_from(["sokodlex"]);
        assert_eq!(defaults.level, 1);
        assert!(!defaults.backward);
    }
}
