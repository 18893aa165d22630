use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::model::Attachment;

/// An attachment binary staged into the output directory, ready to be
/// referenced by patch statements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedAttachment {
    pub file_name: String,
    pub disk_name: String,
    pub size: u64,
    pub digest: String,
}

/// Locations an export may have stored an attachment under, in probe
/// order. Older exports nest an extra numeric directory level.
pub fn candidate_paths(
    source_root: &Path,
    project_key: &str,
    issue_key: &str,
    attachment_id: &str,
    file_name: &str,
) -> [PathBuf; 4] {
    let direct = source_root.join(project_key).join(issue_key);
    let nested = source_root.join(project_key).join("10000").join(issue_key);
    [
        direct.join(attachment_id),
        direct.join(format!("{attachment_id}_{file_name}")),
        nested.join(attachment_id),
        nested.join(format!("{attachment_id}_{file_name}")),
    ]
}

/// Copy an attachment binary to the output directory and checksum it.
/// Returns `None` when the source file is absent or unreadable at every
/// candidate path; the caller logs and skips, the issue migration goes on.
pub fn stage(
    source_root: &Path,
    output_dir: &Path,
    project_key: &str,
    issue_key: &str,
    attachment_id: &str,
    attachment: &Attachment,
) -> Result<Option<StagedAttachment>> {
    let candidates = candidate_paths(
        source_root,
        project_key,
        issue_key,
        attachment_id,
        &attachment.file_name,
    );
    let Some(source) = candidates.iter().find(|p| p.is_file()) else {
        return Ok(None);
    };

    let disk_name = format!("{attachment_id}_{}", attachment.file_name);
    let destination = output_dir.join(&disk_name);
    if std::fs::copy(source, &destination).is_err() {
        // unreadable source counts the same as a missing one
        return Ok(None);
    }

    let (digest, size) = sha256_file(&destination)?;
    Ok(Some(StagedAttachment {
        file_name: attachment.file_name.clone(),
        disk_name,
        size,
        digest,
    }))
}

fn sha256_file(path: &Path) -> Result<(String, u64)> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    let mut total = 0u64;
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        total += read as u64;
        hasher.update(&buffer[..read]);
    }
    let digest = hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect();
    Ok((digest, total))
}
