//! Integration tests for configuration lookup and output directory
//! resolution against real files.

use camino::Utf8PathBuf;
use ppk::config::{Config, ConfigError};
use ppk::dirs::{APP_DIR, BaseDirs, CONFIG_FILE, output_dir};
use rstest::{fixture, rstest};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// Directories rooted in a scratch tree.
struct ScratchDirs {
    root: TempDir,
    desktop: bool,
}

impl ScratchDirs {
    fn config_file(&self) -> PathBuf {
        self.root.path().join("config").join(APP_DIR).join(CONFIG_FILE)
    }

    fn write_config(&self, text: &str) {
        let path = self.config_file();
        fs::create_dir_all(path.parent().expect("config parent")).expect("create config dir");
        fs::write(path, text).expect("write config");
    }
}

impl BaseDirs for ScratchDirs {
    fn home_dir(&self) -> Option<PathBuf> {
        Some(self.root.path().join("home"))
    }

    fn desktop_dir(&self) -> Option<PathBuf> {
        self.desktop.then(|| self.root.path().join("home").join("Desktop"))
    }

    fn config_dir(&self) -> Option<PathBuf> {
        Some(self.root.path().join("config"))
    }
}

#[fixture]
fn dirs() -> ScratchDirs {
    ScratchDirs {
        root: tempfile::tempdir().expect("scratch"),
        desktop: true,
    }
}

#[rstest]
fn missing_user_config_yields_defaults(dirs: ScratchDirs) {
    let config = Config::load(None, &dirs).expect("defaults");
    assert_eq!(config, Config::default());
    assert_eq!(config.verification.tests, ["checksum", "vulnerability"]);
}

#[rstest]
fn user_config_overrides_selected_keys(dirs: ScratchDirs) {
    dirs.write_config(
        "[verification]\ntests = [\"checksum\"]\n\n[tools]\narchiver = \"7za\"\n",
    );

    let config = Config::load(None, &dirs).expect("user config");

    assert_eq!(config.verification.tests, ["checksum"]);
    assert_eq!(config.tools.archiver, "7za");
    assert_eq!(config.tools.pip, "pip");
    assert_eq!(config.index.url, "https://pypi.org");
}

#[rstest]
fn explicit_config_wins_over_user_config(dirs: ScratchDirs) {
    dirs.write_config("[index]\ntimeout_secs = 9\n");
    let explicit = dirs.root.path().join("explicit.toml");
    fs::write(&explicit, "[index]\ntimeout_secs = 2\n").expect("write explicit");
    let explicit = Utf8PathBuf::try_from(explicit).expect("UTF-8 path");

    let config = Config::load(Some(&explicit), &dirs).expect("explicit config");

    assert_eq!(config.index.timeout_secs, 2);
}

#[rstest]
fn missing_explicit_config_is_an_error(dirs: ScratchDirs) {
    let explicit = Utf8PathBuf::from("/nonexistent/ppk.toml");
    let err = Config::load(Some(&explicit), &dirs).expect_err("missing file");
    assert!(matches!(err, ConfigError::NotFound { .. }));
}

#[rstest]
fn unknown_key_names_the_file(dirs: ScratchDirs) {
    dirs.write_config("[tools]\nzip = \"7z\"\n");
    let err = Config::load(None, &dirs).expect_err("unknown key");
    assert!(matches!(err, ConfigError::Parse { .. }));
    assert!(err.to_string().contains(CONFIG_FILE));
}

#[rstest]
#[case::desktop(true, "Desktop")]
#[case::home_fallback(false, "home")]
fn archives_default_to_desktop_then_home(
    mut dirs: ScratchDirs,
    #[case] desktop: bool,
    #[case] leaf: &str,
) {
    dirs.desktop = desktop;
    let dir = output_dir(&dirs, None).expect("output dir");
    assert_eq!(dir.file_name(), Some(leaf));
}

#[rstest]
fn configured_output_dir_wins(dirs: ScratchDirs) {
    dirs.write_config("[paths]\noutput_dir = \"/srv/transfer\"\n");
    let config = Config::load(None, &dirs).expect("user config");
    let dir = output_dir(&dirs, config.paths.output_dir.as_deref()).expect("output dir");
    assert_eq!(dir, Utf8PathBuf::from("/srv/transfer"));
}
