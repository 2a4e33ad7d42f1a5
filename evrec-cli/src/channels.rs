//! Channel directory location and loading

use anyhow::{Context, Result};
use evrec_core::ChannelDirectory;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Environment variable overriding the channel directory path
pub const CHANNELS_CONF_ENV: &str = "EVREC_CHANNELS_CONF";

/// Pick the channel directory file.
///
/// Order: explicit path, `EVREC_CHANNELS_CONF`, then
/// `<user config dir>/evrec/dvb-channels.conf`.
pub fn directory_path(explicit: Option<&Path>, env_override: Option<String>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Some(path) = env_override.filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    let base = dirs_next::config_dir().context("Cannot determine the user config directory")?;
    Ok(base.join("evrec").join("dvb-channels.conf"))
}

/// Read and parse the channel directory
pub fn load_directory(path: &Path) -> Result<ChannelDirectory> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open channel directory: {:?}", path))?;
    let directory = ChannelDirectory::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to read channel directory: {:?}", path))?;
    log::debug!("Loaded {} channels from {:?}", directory.len(), path);
    Ok(directory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use evrec_core::ChannelResolver;
    use std::io::Write;

    #[test]
    fn test_explicit_path_wins() {
        let path = directory_path(Some(Path::new("/tmp/a.conf")), Some("/tmp/b.conf".into())).unwrap();
        assert_eq!(path, PathBuf::from("/tmp/a.conf"));
    }

    #[test]
    fn test_env_override() {
        let path = directory_path(None, Some("/tmp/b.conf".into())).unwrap();
        assert_eq!(path, PathBuf::from("/tmp/b.conf"));
    }

    #[test]
    fn test_load_directory_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# name:delivery:params:sid").unwrap();
        writeln!(file, "NHK-G:DTV_ISDB_T:FREQUENCY=557142857:0x400").unwrap();
        file.flush().unwrap();

        let directory = load_directory(file.path()).unwrap();
        assert_eq!(directory.lookup(Some("NHK-G"), None).unwrap().service_id, 0x400);
    }

    #[test]
    fn test_missing_directory_file() {
        assert!(load_directory(Path::new("/nonexistent/evrec/channels.conf")).is_err());
    }
}
