use crate::error::{Error, Result};
use std::path::Path;

/// Current local time as `YYYYMMDD_HHMMSS`, the key for every output file of
/// one run.
pub fn timestamp() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}

pub fn read_prompt(path: &Path) -> Result<String> {
    let prompt = std::fs::read_to_string(path).map_err(|source| Error::PromptFile {
        path: path.to_path_buf(),
        source,
    })?;

    if prompt.is_empty() {
        return Err(Error::EmptyPromptFile(path.to_path_buf()));
    }
    Ok(prompt)
}

/// Opens `path` with the platform's default application without waiting
/// for it to exit.
pub fn open_file(path: &Path) -> Result<()> {
    let mut command = if cfg!(target_os = "macos") {
        std::process::Command::new("open")
    } else if cfg!(target_os = "windows") {
        let mut command = std::process::Command::new("cmd");
        command.args(["/c", "start", ""]);
        command
    } else if cfg!(unix) {
        std::process::Command::new("xdg-open")
    } else {
        return Err(Error::IOError(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            format!("unsupported platform: {}", std::env::consts::OS),
        )));
    };

    command.arg(path).spawn()?;
    Ok(())
}
