use crate::logi;
use anyhow::{Context, Result};
use std::path::Path;
use tokio::fs;

/// Creates the parent directory of every path that has one.
pub async fn ensure_parent_dirs<'a, I>(paths: I) -> Result<()>
where
    I: IntoIterator<Item = &'a Path>,
{
    for path in paths {
        let Some(parent) = path.parent() else {
            continue;
        };
        if parent.as_os_str().is_empty() || parent.exists() {
            continue;
        }
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        logi(format!("Created directory: {}", parent.display()));
    }
    Ok(())
}

async fn tool_available(tool: &str) -> bool {
    match tokio::process::Command::new(tool)
        .arg("-version")
        .output()
        .await
    {
        Ok(output) => output.status.success(),
        Err(_) => false,
    }
}

pub async fn check_ffmpeg() -> bool {
    tool_available("ffmpeg").await
}

pub async fn check_ffprobe() -> bool {
    tool_available("ffprobe").await
}
